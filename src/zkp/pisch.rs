//! Proof of knowledge of the discrete logarithm of a curve point
//! (Schnorr's identification protocol, made non-interactive).

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    utils::{positive_challenge_from_transcript, random_positive_bn},
    zkp::{Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;

/// Proof of knowledge of `x` such that `X = g^x`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PiSchProof<C> {
    /// Commitment to the proof mask (`A` in the literature).
    commitment: C,
    /// Fiat-Shamir challenge.
    challenge: BigNumber,
    /// Response binding the mask, challenge, and secret.
    response: BigNumber,
}

/// The public statement: the committed point.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    x_commitment: &'a C,
}

impl<'a, C> CommonInput<'a, C> {
    pub(crate) fn new(x_commitment: &'a C) -> Self {
        Self { x_commitment }
    }
}

/// The prover's secret exponent.
pub(crate) struct ProverSecret<'a> {
    x: &'a BigNumber,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pisch::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(x: &'a BigNumber) -> Self {
        Self { x }
    }
}

impl<C: CurveTrait> Proof for PiSchProof<C> {
    type CommonInput<'a> = CommonInput<'a, C>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let order = C::order();
        let alpha = random_positive_bn(rng, &order);
        let commitment = C::scale_generator(&alpha)?;

        Self::fill_transcript(transcript, context, &input, &commitment)?;
        let challenge = positive_challenge_from_transcript(transcript, &order)?;

        let response = &alpha + &challenge * secret.x;
        Ok(Self {
            commitment,
            challenge,
            response,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        Self::fill_transcript(transcript, context, &input, &self.commitment)?;
        let challenge = positive_challenge_from_transcript(transcript, &C::order())?;
        if challenge != self.challenge {
            error!("Fiat-Shamir consistency check failed");
            return Err(Error::LocalFailure("pisch: challenge mismatch"));
        }

        let lhs = C::scale_generator(&self.response)?;
        let rhs = self.commitment + input.x_commitment.mul(&C::bn_to_scalar(&self.challenge)?);
        if lhs != rhs {
            error!("knowledge-of-exponent check failed");
            return Err(Error::LocalFailure("pisch: response equation failed"));
        }
        Ok(())
    }
}

impl<C: CurveTrait> PiSchProof<C> {
    fn fill_transcript(
        transcript: &mut Transcript,
        context: &impl ProofContext,
        input: &CommonInput<C>,
        commitment: &C,
    ) -> Result<()> {
        transcript.append_message(b"PiSch ProofContext", &context.as_bytes()?);
        transcript.append_message(b"PiSch X", &input.x_commitment.to_bytes());
        transcript.append_message(b"PiSch A", &commitment.to_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        utils::testing::init_testing,
        zkp::BadContext,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"PiSchProof Test")
    }

    #[test]
    fn valid_proof_verifies() {
        let mut rng = init_testing();
        let x = random_positive_bn(&mut rng, &TestCurve::order());
        let x_commitment = TestCurve::scale_generator(&x).unwrap();

        let input = CommonInput::new(&x_commitment);
        let proof =
            PiSchProof::<TestCurve>::prove(input, ProverSecret::new(&x), &(), &mut transcript(), &mut rng)
                .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn proof_for_wrong_secret_fails() {
        let mut rng = init_testing();
        let x = random_positive_bn(&mut rng, &TestCurve::order());
        let y = random_positive_bn(&mut rng, &TestCurve::order());
        assert_ne!(x, y);
        let x_commitment = TestCurve::scale_generator(&x).unwrap();

        let input = CommonInput::new(&x_commitment);
        let proof =
            PiSchProof::<TestCurve>::prove(input, ProverSecret::new(&y), &(), &mut transcript(), &mut rng)
                .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn tampered_response_fails() {
        let mut rng = init_testing();
        let x = random_positive_bn(&mut rng, &TestCurve::order());
        let x_commitment = TestCurve::scale_generator(&x).unwrap();

        let input = CommonInput::new(&x_commitment);
        let mut proof =
            PiSchProof::<TestCurve>::prove(input, ProverSecret::new(&x), &(), &mut transcript(), &mut rng)
                .unwrap();
        proof.response = random_positive_bn(&mut rng, &TestCurve::order());
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn context_must_match() {
        let mut rng = init_testing();
        let x = random_positive_bn(&mut rng, &TestCurve::order());
        let x_commitment = TestCurve::scale_generator(&x).unwrap();

        let input = CommonInput::new(&x_commitment);
        let proof =
            PiSchProof::<TestCurve>::prove(input, ProverSecret::new(&x), &(), &mut transcript(), &mut rng)
                .unwrap();
        assert!(proof.verify(input, &BadContext, &mut transcript()).is_err());
    }
}
