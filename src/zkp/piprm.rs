//! Proof that ring-Pedersen parameters are well-formed: `s` lies in the
//! subgroup generated by `t` modulo `N̂`.
//!
//! A standard parallel-repetition sigma protocol: soundness error `2^-1` per
//! iteration, repeated [`SOUNDNESS_ROUNDS`] times.

use crate::{
    errors::{Error, Result},
    parameters::SOUNDNESS_ROUNDS,
    ring_pedersen::{RingPedersen, RingPedersenWitness},
    utils::random_positive_bn,
    zkp::{Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Proof that `s = t^λ mod N̂` for some known `λ`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiPrmProof {
    /// Per-iteration commitments `t^{a_i}`.
    commitments: Vec<BigNumber>,
    /// Per-iteration responses `a_i + e_i λ mod φ(N̂)`.
    responses: Vec<BigNumber>,
}

impl Proof for PiPrmProof {
    type CommonInput<'a> = &'a RingPedersen;
    type ProverSecret<'a> = &'a RingPedersenWitness;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let masks: Vec<BigNumber> = (0..SOUNDNESS_ROUNDS)
            .map(|_| random_positive_bn(rng, &secret.totient))
            .collect();
        let commitments: Vec<BigNumber> = masks
            .iter()
            .map(|a| input.t().modpow(a, input.modulus()))
            .collect();

        let challenges = challenge_bits(transcript, context, input, &commitments)?;

        let responses = masks
            .iter()
            .zip(&challenges)
            .map(|(a, &bit)| {
                if bit {
                    a.modadd(&secret.lambda, &secret.totient)
                } else {
                    a.clone()
                }
            })
            .collect();

        Ok(Self {
            commitments,
            responses,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        if self.commitments.len() != SOUNDNESS_ROUNDS || self.responses.len() != SOUNDNESS_ROUNDS {
            error!("ring-Pedersen parameter proof has wrong length");
            return Err(Error::LocalFailure("piprm: truncated proof"));
        }
        let challenges = challenge_bits(transcript, context, input, &self.commitments)?;

        for ((commitment, response), bit) in
            self.commitments.iter().zip(&self.responses).zip(challenges)
        {
            let lhs = input.t().modpow(response, input.modulus());
            let rhs = if bit {
                commitment.modmul(input.s(), input.modulus())
            } else {
                commitment.clone()
            };
            if lhs != rhs {
                error!("ring-Pedersen parameter equation failed");
                return Err(Error::LocalFailure("piprm: iteration check failed"));
            }
        }
        Ok(())
    }
}

/// Derive one challenge bit per iteration from the transcript.
fn challenge_bits(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &RingPedersen,
    commitments: &[BigNumber],
) -> Result<Vec<bool>> {
    transcript.append_message(b"PiPrm ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiPrm modulus", &input.modulus().to_bytes());
    transcript.append_message(b"PiPrm s", &input.s().to_bytes());
    transcript.append_message(b"PiPrm t", &input.t().to_bytes());
    for commitment in commitments {
        transcript.append_message(b"PiPrm commitment", &commitment.to_bytes());
    }
    let mut bytes = vec![0u8; SOUNDNESS_ROUNDS];
    transcript.challenge_bytes(b"PiPrm challenges", &mut bytes);
    Ok(bytes.into_iter().map(|b| b & 1 == 1).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{utils::testing::init_testing, zkp::BadContext};

    fn transcript() -> Transcript {
        Transcript::new(b"PiPrmProof Test")
    }

    #[test]
    fn valid_proof_verifies() {
        let mut rng = init_testing();
        let (scheme, witness) = RingPedersen::generate(&mut rng).unwrap();
        let proof =
            PiPrmProof::prove(&scheme, &witness, &(), &mut transcript(), &mut rng).unwrap();
        assert!(proof.verify(&scheme, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn proof_against_unrelated_parameters_fails() {
        let mut rng = init_testing();
        let (scheme, witness) = RingPedersen::generate(&mut rng).unwrap();
        let (other_scheme, _) = RingPedersen::generate(&mut rng).unwrap();
        let proof =
            PiPrmProof::prove(&scheme, &witness, &(), &mut transcript(), &mut rng).unwrap();
        assert!(proof.verify(&other_scheme, &(), &mut transcript()).is_err());
    }

    #[test]
    fn truncated_proof_fails() {
        let mut rng = init_testing();
        let (scheme, witness) = RingPedersen::generate(&mut rng).unwrap();
        let mut proof =
            PiPrmProof::prove(&scheme, &witness, &(), &mut transcript(), &mut rng).unwrap();
        proof.responses.pop();
        assert!(proof.verify(&scheme, &(), &mut transcript()).is_err());
    }

    #[test]
    fn context_must_match() {
        let mut rng = init_testing();
        let (scheme, witness) = RingPedersen::generate(&mut rng).unwrap();
        let proof =
            PiPrmProof::prove(&scheme, &witness, &(), &mut transcript(), &mut rng).unwrap();
        assert!(proof.verify(&scheme, &BadContext, &mut transcript()).is_err());
    }
}
