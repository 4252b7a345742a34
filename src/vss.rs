//! Feldman verifiable secret sharing over the signing curve.
//!
//! A dealer samples a degree-`t` polynomial with its secret as the constant
//! term, publishes the coefficients in the exponent, and hands each party an
//! evaluation. Any party can check its share against the public commitment;
//! any `t + 1` shares reconstruct the secret by Lagrange interpolation.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{Error, Result},
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use zeroize::ZeroizeOnDrop;

/// A secret polynomial; the dealer's side of a sharing.
#[derive(Clone, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct Polynomial<C: CurveTrait> {
    coefficients: Vec<C::Scalar>,
}

impl<C: CurveTrait> Debug for Polynomial<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Polynomial([redacted])")
    }
}

impl<C: CurveTrait> Polynomial<C> {
    /// Sample a degree-`threshold` polynomial. The constant term is the
    /// shared secret; pass `None` to share a fresh random value.
    pub(crate) fn sample<R: RngCore + CryptoRng>(
        secret: Option<C::Scalar>,
        threshold: usize,
        rng: &mut R,
    ) -> Self {
        let mut coefficients = Vec::with_capacity(threshold + 1);
        coefficients.push(secret.unwrap_or_else(|| C::Scalar::random(rng)));
        for _ in 0..threshold {
            coefficients.push(C::Scalar::random(rng));
        }
        Self { coefficients }
    }

    /// Evaluate at `x` by Horner's rule.
    pub(crate) fn evaluate(&self, x: &C::Scalar) -> C::Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(C::Scalar::zero(), |acc, coefficient| {
                acc.mul(x).add(coefficient)
            })
    }

    pub(crate) fn constant_term(&self) -> &C::Scalar {
        &self.coefficients[0]
    }

    /// The public coefficient commitments.
    pub(crate) fn commitment(&self) -> VssCommitment<C> {
        VssCommitment {
            coefficients: self
                .coefficients
                .iter()
                .map(|coefficient| C::GENERATOR.mul(coefficient))
                .collect(),
        }
    }
}

/// Public commitment to a shared polynomial: its coefficients in the
/// exponent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct VssCommitment<C: CurveTrait> {
    coefficients: Vec<C>,
}

impl<C: CurveTrait> VssCommitment<C> {
    /// The degree of the committed polynomial.
    pub(crate) fn threshold(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// The commitment to the shared secret (`g^secret`).
    pub(crate) fn constant_term(&self) -> C {
        self.coefficients[0]
    }

    /// Evaluate the committed polynomial in the exponent.
    pub(crate) fn evaluate(&self, x: &C::Scalar) -> C {
        self.coefficients
            .iter()
            .rev()
            .fold(C::IDENTITY, |acc, coefficient| acc.mul(x) + *coefficient)
    }

    /// Check a received share against the commitment.
    pub(crate) fn verify_share(&self, x: &C::Scalar, share: &C::Scalar) -> bool {
        C::GENERATOR.mul(share) == self.evaluate(x)
    }

    /// Sum commitments coefficient-wise; the commitment to the sum of the
    /// underlying polynomials.
    pub(crate) fn sum(commitments: &[&VssCommitment<C>]) -> Result<VssCommitment<C>> {
        let first = commitments
            .first()
            .ok_or(Error::LocalFailure("cannot sum zero commitments"))?;
        let len = first.coefficients.len();
        if commitments.iter().any(|c| c.coefficients.len() != len) {
            return Err(Error::LocalFailure("commitment degrees differ"));
        }
        let coefficients = (0..len)
            .map(|i| {
                commitments
                    .iter()
                    .fold(C::IDENTITY, |acc, c| acc + c.coefficients[i])
            })
            .collect();
        Ok(VssCommitment { coefficients })
    }
}

/// The Lagrange coefficient at zero for `my_point` within `all_points`.
///
/// Multiplying a party's Shamir share by this converts it into an additive
/// share of the secret, valid for this exact set of participants.
pub(crate) fn lagrange_coefficient_at_zero<C: CurveTrait>(
    my_point: &C::Scalar,
    all_points: &[C::Scalar],
) -> Result<C::Scalar> {
    let mut result = C::Scalar::one();
    for point in all_points {
        if point == my_point {
            continue;
        }
        let numerator = point.negate();
        let denominator = my_point.sub(point);
        let inverse = denominator
            .invert()
            .ok_or(Error::LocalFailure("duplicate interpolation points"))?;
        result = result.mul(&numerator.mul(&inverse));
    }
    Ok(result)
}

/// Reconstruct the secret (the value at zero) from `(point, share)` pairs.
pub(crate) fn reconstruct_at_zero<C: CurveTrait>(
    shares: &[(C::Scalar, C::Scalar)],
) -> Result<C::Scalar> {
    let points: Vec<C::Scalar> = shares.iter().map(|(point, _)| *point).collect();
    let mut secret = C::Scalar::zero();
    for (point, share) in shares {
        let lambda = lagrange_coefficient_at_zero::<C>(point, &points)?;
        secret = secret.add(&lambda.mul(share));
    }
    Ok(secret)
}
