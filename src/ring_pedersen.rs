//! Ring-Pedersen commitments over a modulus of unknown order.
//!
//! The commitment space used by the range and consistency proofs: a modulus
//! `N̂` (product of two safe primes) and two generators `s = t^λ`, `t` of the
//! subgroup of squares. A party publishes its parameters once, during key
//! generation, together with a proof that `s` really lies in the subgroup
//! generated by `t` ([`PiPrmProof`]).

use crate::{
    errors::{Error, Result},
    paillier::prime_gen,
    utils::{modpow_signed, random_bn_in_z_star, random_plusminus_scaled, random_positive_bn},
    zkp::{piprm::PiPrmProof, Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use zeroize::ZeroizeOnDrop;

/// A ring-Pedersen commitment `s^x t^r mod N̂`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Commitment(BigNumber);

impl Commitment {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }
}

/// Randomness used to form a commitment.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub(crate) struct CommitmentRandomness(BigNumber);

impl Debug for CommitmentRandomness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CommitmentRandomness([redacted])")
    }
}

/// Commitment randomness masked by a challenge; safe to reveal in a proof
/// response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MaskedRandomness(BigNumber);

impl CommitmentRandomness {
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    /// Produce the response `mask + e * self`.
    pub(crate) fn mask(&self, mask: &CommitmentRandomness, e: &BigNumber) -> MaskedRandomness {
        MaskedRandomness(&mask.0 + e * &self.0)
    }

    /// Produce `base - x * self`, linking `self` to another commitment's
    /// randomness.
    pub(crate) fn mask_neg(
        &self,
        base: &CommitmentRandomness,
        x: &BigNumber,
    ) -> MaskedRandomness {
        MaskedRandomness(&base.0 - x * &self.0)
    }

    /// View the raw randomness as an (unmasked) response value.
    pub(crate) fn as_masked(&self) -> MaskedRandomness {
        MaskedRandomness(self.0.clone())
    }
}

impl MaskedRandomness {
    /// Produce the response `mask + e * self`.
    pub(crate) fn remask(&self, mask: &CommitmentRandomness, e: &BigNumber) -> MaskedRandomness {
        MaskedRandomness(&mask.0 + e * &self.0)
    }
}

/// Public ring-Pedersen parameters `(N̂, s, t)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RingPedersen {
    modulus: BigNumber,
    s: BigNumber,
    t: BigNumber,
}

/// The secrets behind a [`RingPedersen`] instance, kept only long enough to
/// produce the parameter proof.
#[derive(ZeroizeOnDrop)]
pub(crate) struct RingPedersenWitness {
    pub(crate) lambda: BigNumber,
    pub(crate) totient: BigNumber,
}

impl Debug for RingPedersenWitness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RingPedersenWitness([redacted])")
    }
}

impl RingPedersen {
    /// Sample parameters from a fresh safe-prime modulus.
    pub(crate) fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> Result<(Self, RingPedersenWitness)> {
        let (p, q) = prime_gen::safe_prime_pair(rng)?;
        let modulus = &p * &q;
        let totient = (&p - 1) * (&q - 1);

        let lambda = random_positive_bn(rng, &totient);
        let r = random_bn_in_z_star(rng, &modulus)?;
        // Squaring lands in the cyclic subgroup of squares.
        let t = r.modmul(&r, &modulus);
        let s = t.modpow(&lambda, &modulus);

        Ok((
            Self { modulus, s, t },
            RingPedersenWitness { lambda, totient },
        ))
    }

    pub(crate) fn modulus(&self) -> &BigNumber {
        &self.modulus
    }

    pub(crate) fn s(&self) -> &BigNumber {
        &self.s
    }

    pub(crate) fn t(&self) -> &BigNumber {
        &self.t
    }

    /// Cheap structural sanity of received parameters.
    pub(crate) fn validate_basic(&self) -> Result<()> {
        let one = BigNumber::one();
        if self.modulus <= one || self.s <= one || self.t <= one {
            return Err(Error::MalformedMessage("degenerate ring-Pedersen parameters"));
        }
        if &self.s >= &self.modulus || &self.t >= &self.modulus {
            return Err(Error::MalformedMessage("ring-Pedersen generator out of range"));
        }
        if self.s.gcd(&self.modulus) != one || self.t.gcd(&self.modulus) != one {
            return Err(Error::MalformedMessage("ring-Pedersen generator not a unit"));
        }
        Ok(())
    }

    pub(crate) fn modulus_bit_length(&self) -> usize {
        self.modulus.bit_length()
    }

    /// Sample commitment randomness in `±2^range * scale * N̂`.
    pub(crate) fn commitment_randomness<R: RngCore + CryptoRng>(
        &self,
        range: usize,
        scale: &BigNumber,
        rng: &mut R,
    ) -> CommitmentRandomness {
        CommitmentRandomness(random_plusminus_scaled(rng, range, &(scale * &self.modulus)))
    }

    /// Commit to `x` with fresh randomness in `±2^range * N̂`.
    pub(crate) fn commit<R: RngCore + CryptoRng>(
        &self,
        x: &BigNumber,
        range: usize,
        rng: &mut R,
    ) -> Result<(Commitment, CommitmentRandomness)> {
        let randomness = self.commitment_randomness(range, &BigNumber::one(), rng);
        let com = self.reconstruct(x, &randomness.as_masked())?;
        Ok((com, randomness))
    }

    /// Commit to `x` under an arbitrary base commitment instead of `s`.
    pub(crate) fn commit_with_commitment<R: RngCore + CryptoRng>(
        &self,
        base: &Commitment,
        x: &BigNumber,
        range: usize,
        scale: &BigNumber,
        rng: &mut R,
    ) -> Result<(Commitment, CommitmentRandomness)> {
        let randomness = self.commitment_randomness(range, scale, rng);
        let com = self.reconstruct_with_commitment(base, x, &randomness.as_masked())?;
        Ok((com, randomness))
    }

    /// Evaluate `s^x t^r`.
    pub(crate) fn reconstruct(&self, x: &BigNumber, r: &MaskedRandomness) -> Result<Commitment> {
        let s_to_x = modpow_signed(&self.s, x, &self.modulus)?;
        let t_to_r = modpow_signed(&self.t, &r.0, &self.modulus)?;
        Ok(Commitment(s_to_x.modmul(&t_to_r, &self.modulus)))
    }

    /// Evaluate `base^x t^r`.
    pub(crate) fn reconstruct_with_commitment(
        &self,
        base: &Commitment,
        x: &BigNumber,
        r: &MaskedRandomness,
    ) -> Result<Commitment> {
        let base_to_x = modpow_signed(&base.0, x, &self.modulus)?;
        let t_to_r = modpow_signed(&self.t, &r.0, &self.modulus)?;
        Ok(Commitment(base_to_x.modmul(&t_to_r, &self.modulus)))
    }

    /// Evaluate `a * b^e`.
    pub(crate) fn combine(
        &self,
        a: &Commitment,
        b: &Commitment,
        e: &BigNumber,
    ) -> Result<Commitment> {
        let b_to_e = modpow_signed(&b.0, e, &self.modulus)?;
        Ok(Commitment(a.0.modmul(&b_to_e, &self.modulus)))
    }
}

/// Ring-Pedersen parameters bundled with the proof of their well-formedness.
///
/// This is the form parameters travel in: a receiver calls [`verify`] once
/// and from then on trusts the scheme as a commitment space for the other
/// proofs.
///
/// [`verify`]: VerifiedRingPedersen::verify
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct VerifiedRingPedersen {
    scheme: RingPedersen,
    proof: PiPrmProof,
}

impl PartialEq for VerifiedRingPedersen {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme
    }
}

impl VerifiedRingPedersen {
    /// Sample fresh parameters and prove them well-formed.
    pub(crate) fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        context: &impl ProofContext,
    ) -> Result<Self> {
        let (scheme, witness) = RingPedersen::generate(rng)?;
        let mut transcript = Transcript::new(b"PiPrmProof");
        let proof = PiPrmProof::prove(&scheme, &witness, context, &mut transcript, rng)?;
        Ok(Self { scheme, proof })
    }

    /// Check the parameter proof.
    pub(crate) fn verify(&self, context: &impl ProofContext) -> Result<()> {
        self.scheme.validate_basic()?;
        let mut transcript = Transcript::new(b"PiPrmProof");
        self.proof.clone().verify(&self.scheme, context, &mut transcript)
    }

    pub(crate) fn scheme(&self) -> &RingPedersen {
        &self.scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{random_plusminus_by_size, testing::init_testing};

    #[test]
    fn commitments_open_correctly() {
        let mut rng = init_testing();
        let (scheme, _witness) = RingPedersen::generate(&mut rng).unwrap();
        let x = random_plusminus_by_size(&mut rng, 256);
        let (com, r) = scheme.commit(&x, 256, &mut rng).unwrap();
        let reopened = scheme.reconstruct(&x, &r.as_masked()).unwrap();
        assert_eq!(com, reopened);
    }

    #[test]
    fn masked_responses_satisfy_the_verification_identity() {
        let mut rng = init_testing();
        let (scheme, _witness) = RingPedersen::generate(&mut rng).unwrap();

        // A miniature sigma run: commit to x, mask with alpha, respond.
        let x = random_plusminus_by_size(&mut rng, 128);
        let alpha = random_plusminus_by_size(&mut rng, 200);
        let e = random_plusminus_by_size(&mut rng, 64);

        let (x_com, mu) = scheme.commit(&x, 128, &mut rng).unwrap();
        let (alpha_com, gamma) = scheme.commit(&alpha, 200, &mut rng).unwrap();

        let z = &alpha + &e * &x;
        let masked = mu.mask(&gamma, &e);

        let lhs = scheme.reconstruct(&z, &masked).unwrap();
        let rhs = scheme.combine(&alpha_com, &x_com, &e).unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn verified_parameters_round_trip() {
        let mut rng = init_testing();
        let verified = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        assert!(verified.verify(&()).is_ok());
    }
}
