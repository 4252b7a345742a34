//! Elliptic curve abstraction.
//!
//! The protocol engine is parametric over the signing curve; everything it
//! needs from a curve is collected in [`CurveTrait`] and the associated
//! scalar, verifying-key and signature traits. [`K256`](crate::k256::K256)
//! and [`P256`](crate::p256::P256) provide the two supported instantiations.

use crate::errors::Result;
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, ops::Add};
use zeroize::Zeroize;

/// Generic elliptic curve point.
pub trait CurveTrait:
    'static
    + Clone
    + Copy
    + Debug
    + Send
    + Sync
    + Eq
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Add<Output = Self>
    + Zeroize
{
    /// The generator point.
    const GENERATOR: Self;

    /// The identity point, used to initialize point aggregations.
    const IDENTITY: Self;

    /// The scalar field type.
    type Scalar: ScalarTrait;

    /// The ECDSA verifying key.
    type VerifyingKey: VerifyingKeyTrait<C = Self>;

    /// The ECDSA signature type.
    type ECDSASignature: SignatureTrait;

    /// The order of the curve group.
    fn order() -> BigNumber;

    /// Multiply `self` by a scalar.
    fn mul(&self, scalar: &Self::Scalar) -> Self;

    /// Multiply `self` by a [`BigNumber`], which is first reduced into the
    /// scalar field.
    fn multiply_by_bignum(&self, scalar: &BigNumber) -> Result<Self>;

    /// Multiply the generator by a [`BigNumber`] scalar.
    fn scale_generator(scalar: &BigNumber) -> Result<Self>;

    /// The x-coordinate of the point, interpreted as a scalar.
    fn x_projection(&self) -> Result<Self::Scalar>;

    /// Serialize the point as a compressed affine encoding.
    fn to_bytes(self) -> Vec<u8>;

    /// Deserialize a point from a compressed affine encoding.
    fn try_from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Reduce a [`BigNumber`] into the scalar field (mod `q`, preserving
    /// sign).
    fn bn_to_scalar(x: &BigNumber) -> Result<Self::Scalar>;

    /// Lift a scalar into a non-negative [`BigNumber`].
    fn scalar_to_bn(x: &Self::Scalar) -> BigNumber;

    /// A uniformly random point.
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self;
}

/// Scalar field element.
pub trait ScalarTrait:
    'static
    + Clone
    + Copy
    + Debug
    + Send
    + Sync
    + Eq
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Zeroize
{
    /// The zero scalar.
    fn zero() -> Self;

    /// The one scalar.
    fn one() -> Self;

    /// Embed a small integer into the field.
    fn from_u128(x: u128) -> Self;

    /// Add two scalars.
    fn add(&self, other: &Self) -> Self;

    /// Subtract `other` from `self`.
    fn sub(&self, other: &Self) -> Self;

    /// Multiply two scalars.
    fn mul(&self, other: &Self) -> Self;

    /// The additive inverse.
    fn negate(&self) -> Self;

    /// The multiplicative inverse, if `self` is nonzero.
    fn invert(&self) -> Option<Self>;

    /// True iff `self` is larger than half the group order.
    fn is_high(&self) -> bool;

    /// A uniformly random scalar.
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self;

    /// Canonical big-endian byte encoding.
    fn to_bytes(&self) -> Vec<u8>;

    /// Parse a canonical byte encoding.
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

/// ECDSA verifying key.
pub trait VerifyingKeyTrait: Clone + Copy + Debug + Send + Sync + Eq + PartialEq {
    /// The curve this key verifies over.
    type C: CurveTrait;

    /// Build a verifying key from a curve point.
    fn from_point(point: Self::C) -> Result<Self>;

    /// Verify a signature against an already-hashed message. The caller
    /// owns the hashing convention; the 32 bytes are interpreted directly
    /// as the ECDSA `m` value.
    fn verify_prehash(
        &self,
        prehash: &[u8; 32],
        signature: &<Self::C as CurveTrait>::ECDSASignature,
    ) -> Result<()>;
}

/// ECDSA signature.
pub trait SignatureTrait: Clone + Copy + Debug + PartialEq {
    /// Assemble a signature from the `r` and `s` scalars.
    fn from_scalars(r: &BigNumber, s: &BigNumber) -> Result<Self>;
}

/// Default curve used by the test suite.
#[cfg(test)]
pub(crate) type TestCurve = crate::k256::K256;
