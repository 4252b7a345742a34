//! NIST P-256 instantiation of the curve abstraction.

use crate::{
    curve::{CurveTrait, ScalarTrait, SignatureTrait, VerifyingKeyTrait},
    errors::{Error, Result},
};
use generic_array::GenericArray;
use libpaillier::unknown_order::BigNumber;
use p256::{
    ecdsa::{signature::hazmat::PrehashVerifier, VerifyingKey},
    elliptic_curve::{
        bigint::Encoding, group::GroupEncoding, point::AffineCoordinates, scalar::IsHigh,
        AffinePoint, Curve, Field, Group, PrimeField,
    },
    NistP256, ProjectivePoint, Scalar,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;
use tracing::error;
use zeroize::{Zeroize, Zeroizing};

/// Wrapper around [`p256::ProjectivePoint`] carrying our own serde
/// implementation (affine encoding).
///
/// Note that this type derives [`Debug`]; if a [`P256`] appears in a private
/// type, `Debug` should be implemented manually with the field redacted.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Zeroize)]
pub struct P256(pub(crate) ProjectivePoint);

impl P256 {
    fn x_affine(&self) -> p256::FieldBytes {
        self.0.to_affine().x()
    }
}

impl std::ops::Add for P256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Serialize for P256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        AffinePoint::<NistP256>::from(self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for P256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = AffinePoint::<NistP256>::deserialize(deserializer)?;
        Ok(Self(p.into()))
    }
}

/// ECDSA signature over P-256.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SignatureP256(p256::ecdsa::Signature);

impl SignatureTrait for SignatureP256 {
    fn from_scalars(r: &BigNumber, s: &BigNumber) -> Result<Self> {
        let r_scalar = P256::bn_to_scalar(r)?;
        let s_scalar = P256::bn_to_scalar(s)?;
        let sig = p256::ecdsa::Signature::from_scalars(r_scalar, s_scalar)
            .map_err(|_| Error::LocalFailure("signature scalars out of range"))?;
        Ok(SignatureP256(sig))
    }
}

impl Deref for SignatureP256 {
    type Target = p256::ecdsa::Signature;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl CurveTrait for P256 {
    const GENERATOR: Self = P256(ProjectivePoint::GENERATOR);
    const IDENTITY: Self = P256(ProjectivePoint::IDENTITY);

    type Scalar = Scalar;
    type VerifyingKey = VerifyingKey;
    type ECDSASignature = SignatureP256;

    fn order() -> BigNumber {
        let order_bytes: [u8; 32] = NistP256::ORDER.to_be_bytes();
        BigNumber::from_slice(order_bytes)
    }

    fn mul(&self, scalar: &Self::Scalar) -> Self {
        Self(self.0 * scalar)
    }

    fn multiply_by_bignum(&self, scalar: &BigNumber) -> Result<Self> {
        let s = Zeroizing::new(Self::bn_to_scalar(scalar)?);
        Ok(self.mul(&s))
    }

    fn scale_generator(scalar: &BigNumber) -> Result<Self> {
        Self::GENERATOR.multiply_by_bignum(scalar)
    }

    fn x_projection(&self) -> Result<Self::Scalar> {
        Option::from(<Scalar as PrimeField>::from_repr(self.x_affine())).ok_or_else(|| {
            error!("failed to interpret x-coordinate as a scalar");
            Error::LocalFailure("x-projection not a canonical scalar")
        })
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut encoded = AffinePoint::<NistP256>::from(self.0).to_bytes();
        let bytes = encoded.to_vec();
        encoded.zeroize();
        bytes
    }

    fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut fixed: [u8; 33] = bytes
            .try_into()
            .map_err(|_| Error::MalformedMessage("curve point must be 33 bytes"))?;
        let point: Option<AffinePoint<NistP256>> =
            AffinePoint::<NistP256>::from_bytes(&fixed.into()).into();
        fixed.zeroize();
        match point {
            Some(point) => Ok(Self(point.into())),
            None => {
                error!("failed to decode bytes as a curve point");
                Err(Error::MalformedMessage("invalid curve point encoding"))
            }
        }
    }

    fn bn_to_scalar(x: &BigNumber) -> Result<Self::Scalar> {
        let order = Self::order();
        let x_modded = x % &order;

        let bytes = Zeroizing::new(x_modded.to_bytes());
        let mut slice = Zeroizing::new(vec![0u8; 32 - bytes.len()]);
        slice.extend_from_slice(&bytes);

        let mut ret: Self::Scalar = Option::from(<Scalar as PrimeField>::from_repr(
            GenericArray::clone_from_slice(&slice),
        ))
        .ok_or_else(|| {
            error!("failed to convert BigNumber into p256::Scalar");
            Error::LocalFailure("BigNumber does not reduce to a scalar")
        })?;

        if x < &BigNumber::zero() {
            ret = ret.negate();
        }
        Ok(ret)
    }

    fn scalar_to_bn(x: &Self::Scalar) -> BigNumber {
        BigNumber::from_slice(x.to_repr())
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(ProjectivePoint::random(rng))
    }
}

impl ScalarTrait for Scalar {
    fn zero() -> Self {
        Scalar::ZERO
    }

    fn one() -> Self {
        Scalar::ONE
    }

    fn from_u128(x: u128) -> Self {
        <Scalar as PrimeField>::from_u128(x)
    }

    fn add(&self, other: &Self) -> Self {
        std::ops::Add::add(self, other)
    }

    fn sub(&self, other: &Self) -> Self {
        std::ops::Sub::sub(self, other)
    }

    fn mul(&self, other: &Self) -> Self {
        std::ops::Mul::mul(self, other)
    }

    fn negate(&self) -> Self {
        -self
    }

    fn invert(&self) -> Option<Self> {
        Scalar::invert(self).into()
    }

    fn is_high(&self) -> bool {
        <Scalar as IsHigh>::is_high(self).into()
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        <Scalar as Field>::random(rng)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.to_repr().to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::MalformedMessage("scalar must be 32 bytes"));
        }
        Option::from(<Scalar as PrimeField>::from_repr(
            GenericArray::clone_from_slice(bytes),
        ))
        .ok_or(Error::MalformedMessage("non-canonical scalar encoding"))
    }
}

impl VerifyingKeyTrait for VerifyingKey {
    type C = P256;

    fn from_point(point: Self::C) -> Result<Self> {
        VerifyingKey::from_sec1_bytes(&point.to_bytes())
            .map_err(|_| Error::LocalFailure("aggregated public key is not a valid point"))
    }

    fn verify_prehash(
        &self,
        prehash: &[u8; 32],
        signature: &<Self::C as CurveTrait>::ECDSASignature,
    ) -> Result<()> {
        PrehashVerifier::verify_prehash(self, prehash, signature.deref())
            .map_err(|_| Error::LocalFailure("signature does not verify"))
    }
}
