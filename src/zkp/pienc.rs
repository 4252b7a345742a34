//! Proof of knowledge of a Paillier plaintext in a bounded range.
//!
//! The prover shows it knows `k` and nonce `ρ` with `K = enc(k, ρ)` and
//! `k ∊ ±2^ELL`, committing to `k` under the verifier's ring-Pedersen
//! parameters. Presigning round one attaches one of these per peer to the
//! broadcast ciphertexts.

use crate::{
    errors::{Error, Result},
    paillier::{Ciphertext, EncryptionKey, Nonce},
    parameters::{ELL, EPSILON},
    ring_pedersen::{Commitment, MaskedRandomness, VerifiedRingPedersen},
    utils::{
        modpow_signed, plusminus_challenge_from_transcript, random_bn_in_z_star,
        random_plusminus_by_size, within_bound_by_size,
    },
    zkp::{Proof, ProofContext},
};
use crate::curve::CurveTrait;
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, marker::PhantomData};
use tracing::error;

/// Proof that an encrypted value lies in `±2^(ELL + EPSILON)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiEncProof<C> {
    /// Commitment to the plaintext (`S` in the literature).
    plaintext_commitment: Commitment,
    /// Encryption of the mask (`A`).
    mask_ciphertext: Ciphertext,
    /// Commitment to the mask (`C`).
    mask_commitment: Commitment,
    /// Masked plaintext (`z1`).
    masked_plaintext: BigNumber,
    /// Masked encryption nonce (`z2`).
    masked_nonce: BigNumber,
    /// Masked commitment randomness (`z3`).
    masked_randomness: MaskedRandomness,
    curve: PhantomData<C>,
}

/// The public statement: verifier's commitment parameters, the prover's
/// encryption key, and the ciphertext in question.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    setup: &'a VerifiedRingPedersen,
    prover_pk: &'a EncryptionKey,
    ciphertext: &'a Ciphertext,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(
        setup: &'a VerifiedRingPedersen,
        prover_pk: &'a EncryptionKey,
        ciphertext: &'a Ciphertext,
    ) -> Self {
        Self {
            setup,
            prover_pk,
            ciphertext,
        }
    }
}

/// The prover's secrets: the plaintext and encryption nonce.
pub(crate) struct ProverSecret<'a> {
    plaintext: &'a BigNumber,
    nonce: &'a Nonce,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pienc::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(plaintext: &'a BigNumber, nonce: &'a Nonce) -> Self {
        Self { plaintext, nonce }
    }
}

impl<C: CurveTrait> Proof for PiEncProof<C> {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let scheme = input.setup.scheme();

        let alpha = random_plusminus_by_size(rng, ELL + EPSILON);
        let (plaintext_commitment, mu) = scheme.commit(secret.plaintext, ELL, rng)?;
        let r = Nonce::from_bn(random_bn_in_z_star(rng, input.prover_pk.modulus())?);
        let mask_ciphertext = input.prover_pk.encrypt_with_nonce(&alpha, &r)?;
        let (mask_commitment, gamma) = scheme.commit(&alpha, ELL + EPSILON, rng)?;

        fill_transcript(
            transcript,
            context,
            &input,
            &plaintext_commitment,
            &mask_ciphertext,
            &mask_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        let masked_plaintext = &alpha + &e * secret.plaintext;
        let masked_nonce = r
            .as_bn()
            .modmul(
                &modpow_signed(secret.nonce.as_bn(), &e, input.prover_pk.modulus())?,
                input.prover_pk.modulus(),
            );
        let masked_randomness = mu.mask(&gamma, &e);

        Ok(Self {
            plaintext_commitment,
            mask_ciphertext,
            mask_commitment,
            masked_plaintext,
            masked_nonce,
            masked_randomness,
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
            &self.plaintext_commitment,
            &self.mask_ciphertext,
            &self.mask_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        // Ciphertext equation: enc(z1, z2) == A * K^e.
        let lhs = input
            .prover_pk
            .encrypt_with_nonce(&self.masked_plaintext, &Nonce::from_bn(self.masked_nonce.clone()))?;
        let k_to_e = input.prover_pk.multiply(input.ciphertext, &e)?;
        let rhs = input.prover_pk.add(&self.mask_ciphertext, &k_to_e)?;
        if lhs != rhs {
            error!("ciphertext consistency check failed");
            return Err(Error::LocalFailure("pienc: ciphertext equation failed"));
        }

        // Commitment equation: s^z1 t^z3 == C * S^e.
        let scheme = input.setup.scheme();
        let lhs = scheme.reconstruct(&self.masked_plaintext, &self.masked_randomness)?;
        let rhs = scheme.combine(&self.mask_commitment, &self.plaintext_commitment, &e)?;
        if lhs != rhs {
            error!("commitment consistency check failed");
            return Err(Error::LocalFailure("pienc: commitment equation failed"));
        }

        // Range check on the masked plaintext.
        if !within_bound_by_size(&self.masked_plaintext, ELL + EPSILON) {
            error!("masked plaintext out of range");
            return Err(Error::LocalFailure("pienc: response out of range"));
        }
        Ok(())
    }
}

fn fill_transcript(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput<'_>,
    plaintext_commitment: &Commitment,
    mask_ciphertext: &Ciphertext,
    mask_commitment: &Commitment,
) -> Result<()> {
    transcript.append_message(b"PiEnc ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiEnc modulus", &input.prover_pk.modulus().to_bytes());
    transcript.append_message(b"PiEnc setup", &input.setup.scheme().modulus().to_bytes());
    transcript.append_message(b"PiEnc ciphertext", &input.ciphertext.as_bn().to_bytes());
    transcript.append_message(
        b"PiEnc commitments",
        &[
            plaintext_commitment.to_bytes(),
            mask_ciphertext.as_bn().to_bytes(),
            mask_commitment.to_bytes(),
        ]
        .concat(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve, paillier::DecryptionKey, utils::testing::init_testing, zkp::BadContext,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"PiEncProof Test")
    }

    type TestProof = PiEncProof<TestCurve>;

    fn setup() -> (
        rand::rngs::StdRng,
        VerifiedRingPedersen,
        EncryptionKey,
        BigNumber,
        Ciphertext,
        Nonce,
    ) {
        let mut rng = init_testing();
        let setup = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();
        let plaintext = random_plusminus_by_size(&mut rng, ELL);
        let (ciphertext, nonce) = pk.encrypt(&mut rng, &plaintext).unwrap();
        (rng, setup, pk, plaintext, ciphertext, nonce)
    }

    #[test]
    fn valid_proof_verifies() {
        let (mut rng, setup, pk, plaintext, ciphertext, nonce) = setup();
        let input = CommonInput::new(&setup, &pk, &ciphertext);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&plaintext, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn out_of_range_plaintext_fails() {
        let (mut rng, setup, pk, _, _, _) = setup();
        // A plaintext far beyond the proven range.
        let plaintext = random_plusminus_by_size(&mut rng, ELL + EPSILON + 128);
        let (ciphertext, nonce) = pk.encrypt(&mut rng, &plaintext).unwrap();
        let input = CommonInput::new(&setup, &pk, &ciphertext);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&plaintext, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn proof_does_not_transfer_to_other_ciphertext(
    ) {
        let (mut rng, setup, pk, plaintext, ciphertext, nonce) = setup();
        let other_plaintext = random_plusminus_by_size(&mut rng, ELL);
        let (other_ciphertext, _) = pk.encrypt(&mut rng, &other_plaintext).unwrap();
        assert_ne!(ciphertext, other_ciphertext);

        let input = CommonInput::new(&setup, &pk, &ciphertext);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&plaintext, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        let other_input = CommonInput::new(&setup, &pk, &other_ciphertext);
        assert!(proof.verify(other_input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn context_must_match() {
        let (mut rng, setup, pk, plaintext, ciphertext, nonce) = setup();
        let input = CommonInput::new(&setup, &pk, &ciphertext);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&plaintext, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &BadContext, &mut transcript()).is_err());
    }
}
