//! Proof that a modulus has no small factors.
//!
//! Shows `N0 = pq` where both factors exceed `2^ELL`; a peer's Paillier
//! modulus with a tiny factor would let it cheat the range arguments the
//! MtA exchange depends on. Commitments are made under the *verifier's*
//! ring-Pedersen parameters, so each party proves this separately to every
//! peer during key generation.

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    parameters::{ELL, EPSILON},
    ring_pedersen::{Commitment, CommitmentRandomness, MaskedRandomness, VerifiedRingPedersen},
    utils::{plusminus_challenge_from_transcript, random_plusminus_scaled},
    zkp::{Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use num_bigint::{BigInt, Sign};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, marker::PhantomData};
use tracing::error;
use zeroize::ZeroizeOnDrop;

/// Proof that neither factor of a modulus is smaller than `2^ELL`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiFacProof<C> {
    /// Commitment to the factor `p` (`P`).
    p_commitment: Commitment,
    /// Commitment to the factor `q` (`Q`).
    q_commitment: Commitment,
    /// Commitment to the mask for `p` (`A`).
    p_mask_commitment: Commitment,
    /// Commitment to the mask for `q` (`B`).
    q_mask_commitment: Commitment,
    /// Commitment linking the `p` mask to `q`'s commitment (`T`).
    link_commitment: Commitment,
    /// Randomness tying the modulus to the linked commitments (`σ`).
    link_randomness: CommitmentRandomness,
    /// Masked `p` (`z1`).
    p_masked: BigNumber,
    /// Masked `q` (`z2`).
    q_masked: BigNumber,
    /// Masked commitment randomness for `p` (`w1`).
    masked_p_randomness: MaskedRandomness,
    /// Masked commitment randomness for `q` (`w2`).
    masked_q_randomness: MaskedRandomness,
    /// Masked link randomness (`v`).
    masked_link: MaskedRandomness,
    curve: PhantomData<C>,
}

/// The public statement: the verifier's commitment parameters and the
/// prover's modulus.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    setup: &'a VerifiedRingPedersen,
    modulus: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(setup: &'a VerifiedRingPedersen, modulus: &'a BigNumber) -> Self {
        Self { setup, modulus }
    }
}

/// The prover's secret factorization.
#[derive(ZeroizeOnDrop)]
pub(crate) struct ProverSecret {
    p: BigNumber,
    q: BigNumber,
}

impl Debug for ProverSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pifac::ProverSecret([redacted])")
    }
}

impl ProverSecret {
    pub(crate) fn new(p: &BigNumber, q: &BigNumber) -> Self {
        Self {
            p: p.clone(),
            q: q.clone(),
        }
    }
}

impl<C: CurveTrait> Proof for PiFacProof<C> {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = &'a ProverSecret;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let scheme = input.setup.scheme();
        let sqrt_modulus = sqrt(input.modulus);

        let p_mask = random_plusminus_scaled(rng, ELL + EPSILON, &sqrt_modulus);
        let q_mask = random_plusminus_scaled(rng, ELL + EPSILON, &sqrt_modulus);
        let link_randomness = scheme.commitment_randomness(ELL, input.modulus, rng);

        let (p_commitment, mu) = scheme.commit(&secret.p, ELL, rng)?;
        let (q_commitment, nu) = scheme.commit(&secret.q, ELL, rng)?;
        let (p_mask_commitment, x) = scheme.commit(&p_mask, ELL + EPSILON, rng)?;
        let (q_mask_commitment, y) = scheme.commit(&q_mask, ELL + EPSILON, rng)?;
        let (link_commitment, r) = scheme.commit_with_commitment(
            &q_commitment,
            &p_mask,
            ELL + EPSILON,
            input.modulus,
            rng,
        )?;

        fill_transcript(
            transcript,
            context,
            &input,
            &p_commitment,
            &q_commitment,
            &p_mask_commitment,
            &q_mask_commitment,
            &link_commitment,
            &link_randomness,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        let sigma_hat = nu.mask_neg(&link_randomness, &secret.p);
        let p_masked = &p_mask + &e * &secret.p;
        let q_masked = &q_mask + &e * &secret.q;
        let masked_p_randomness = mu.mask(&x, &e);
        let masked_q_randomness = nu.mask(&y, &e);
        let masked_link = sigma_hat.remask(&r, &e);

        Ok(Self {
            p_commitment,
            q_commitment,
            p_mask_commitment,
            q_mask_commitment,
            link_commitment,
            link_randomness,
            p_masked,
            q_masked,
            masked_p_randomness,
            masked_q_randomness,
            masked_link,
            curve: PhantomData,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        fill_transcript(
            transcript,
            context,
            &input,
            &self.p_commitment,
            &self.q_commitment,
            &self.p_mask_commitment,
            &self.q_mask_commitment,
            &self.link_commitment,
            &self.link_randomness,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        let scheme = input.setup.scheme();

        let masked_p_is_valid = {
            let lhs = scheme.reconstruct(&self.p_masked, &self.masked_p_randomness)?;
            let rhs = scheme.combine(&self.p_mask_commitment, &self.p_commitment, &e)?;
            lhs == rhs
        };
        if !masked_p_is_valid {
            error!("p-factor commitment check failed");
            return Err(Error::LocalFailure("pifac: p equation failed"));
        }

        let masked_q_is_valid = {
            let lhs = scheme.reconstruct(&self.q_masked, &self.masked_q_randomness)?;
            let rhs = scheme.combine(&self.q_mask_commitment, &self.q_commitment, &e)?;
            lhs == rhs
        };
        if !masked_q_is_valid {
            error!("q-factor commitment check failed");
            return Err(Error::LocalFailure("pifac: q equation failed"));
        }

        let modulus_links_factors = {
            let modulus_commitment =
                scheme.reconstruct(input.modulus, &self.link_randomness.as_masked())?;
            let lhs = scheme.reconstruct_with_commitment(
                &self.q_commitment,
                &self.p_masked,
                &self.masked_link,
            )?;
            let rhs = scheme.combine(&self.link_commitment, &modulus_commitment, &e)?;
            lhs == rhs
        };
        if !modulus_links_factors {
            error!("modulus linking check failed");
            return Err(Error::LocalFailure("pifac: linking equation failed"));
        }

        // Range check: z1, z2 within ±2^(ELL+EPSILON) * sqrt(N0).
        let sqrt_modulus = sqrt(input.modulus);
        let bound = &sqrt_modulus * (BigNumber::one() << (ELL + EPSILON));
        if self.p_masked < -bound.clone() || self.p_masked > bound {
            error!("masked p out of range");
            return Err(Error::LocalFailure("pifac: p out of range"));
        }
        if self.q_masked < -bound.clone() || self.q_masked > bound {
            error!("masked q out of range");
            return Err(Error::LocalFailure("pifac: q out of range"));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_transcript(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput<'_>,
    p_commitment: &Commitment,
    q_commitment: &Commitment,
    p_mask_commitment: &Commitment,
    q_mask_commitment: &Commitment,
    link_commitment: &Commitment,
    link_randomness: &CommitmentRandomness,
) -> Result<()> {
    transcript.append_message(b"PiFac ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiFac setup", &input.setup.scheme().modulus().to_bytes());
    transcript.append_message(b"PiFac modulus", &input.modulus.to_bytes());
    transcript.append_message(
        b"PiFac commitments",
        &[
            p_commitment.to_bytes(),
            q_commitment.to_bytes(),
            p_mask_commitment.to_bytes(),
            q_mask_commitment.to_bytes(),
            link_commitment.to_bytes(),
            link_randomness.to_bytes(),
        ]
        .concat(),
    );
    Ok(())
}

/// Integer square root, rounding down.
fn sqrt(num: &BigNumber) -> BigNumber {
    let num_bigint: BigInt = BigInt::from_bytes_be(Sign::Plus, &num.to_bytes());
    let root = num_bigint.sqrt();
    BigNumber::from_slice(root.to_bytes_be().1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve, paillier::prime_gen, utils::testing::init_testing, zkp::BadContext,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"PiFacProof Test")
    }

    type TestProof = PiFacProof<TestCurve>;

    fn no_small_factors_instance(
        rng: &mut rand::rngs::StdRng,
    ) -> (VerifiedRingPedersen, BigNumber, ProverSecret) {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let modulus = &p * &q;
        let setup = VerifiedRingPedersen::generate(rng, &()).unwrap();
        (setup, modulus, ProverSecret::new(&p, &q))
    }

    #[test]
    fn valid_proof_verifies() {
        let mut rng = init_testing();
        let (setup, modulus, secret) = no_small_factors_instance(&mut rng);
        let input = CommonInput::new(&setup, &modulus);
        let proof =
            TestProof::prove(input, &secret, &(), &mut transcript(), &mut rng).unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn factorization_must_match_modulus() {
        let mut rng = init_testing();
        let (setup, modulus, _) = no_small_factors_instance(&mut rng);
        // A factorization of some *other* modulus cannot satisfy the linking
        // equation for this one.
        let (other_p, other_q) = std::iter::repeat_with(|| {
            prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap()
        })
        .find(|(p, q)| &(p * q) != &modulus)
        .unwrap();
        let input = CommonInput::new(&setup, &modulus);
        let proof = TestProof::prove(
            input,
            &ProverSecret::new(&other_p, &other_q),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn proof_does_not_transfer_to_other_modulus() {
        let mut rng = init_testing();
        let (setup, modulus, secret) = no_small_factors_instance(&mut rng);
        let other = prime_gen::try_get_prime_from_pool_insecure(&mut rng).unwrap();
        let input = CommonInput::new(&setup, &modulus);
        let proof =
            TestProof::prove(input, &secret, &(), &mut transcript(), &mut rng).unwrap();
        let other_input = CommonInput::new(&setup, &other);
        assert!(proof.verify(other_input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn setup_parameters_must_match() {
        let mut rng = init_testing();
        let (setup, modulus, secret) = no_small_factors_instance(&mut rng);
        let other_setup = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let input = CommonInput::new(&setup, &modulus);
        let proof =
            TestProof::prove(input, &secret, &(), &mut transcript(), &mut rng).unwrap();
        let other_input = CommonInput::new(&other_setup, &modulus);
        assert!(proof.verify(other_input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn context_must_match() {
        let mut rng = init_testing();
        let (setup, modulus, secret) = no_small_factors_instance(&mut rng);
        let input = CommonInput::new(&setup, &modulus);
        let proof =
            TestProof::prove(input, &secret, &(), &mut transcript(), &mut rng).unwrap();
        assert!(proof.verify(input, &BadContext, &mut transcript()).is_err());
    }
}
