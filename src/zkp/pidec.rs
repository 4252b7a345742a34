//! Proof that a ciphertext decrypts to a claimed value modulo the curve
//! order.
//!
//! The disputed ciphertexts in an identification run are homomorphic
//! combinations whose plaintexts are far larger than the curve order; the
//! share each party previously broadcast is that plaintext reduced mod `q`.
//! This proof ties the two together without revealing the full plaintext.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{Error, Result},
    paillier::{Ciphertext, EncryptionKey, Nonce},
    parameters::{ELL, EPSILON},
    ring_pedersen::{Commitment, MaskedRandomness, VerifiedRingPedersen},
    utils::{
        modpow_signed, plusminus_challenge_from_transcript, random_bn_in_z_star,
        random_plusminus_by_size,
    },
    zkp::{Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;

/// Proof that `dec(C) ≡ x (mod q)` for a public claim `x`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PiDecProof<C: CurveTrait> {
    /// Commitment to the full plaintext (`S`).
    plaintext_commitment: Commitment,
    /// Commitment to the mask (`T`).
    mask_commitment: Commitment,
    /// Encryption of the mask (`A`).
    mask_ciphertext: Ciphertext,
    /// The mask reduced mod `q` (`γ`).
    mask_mod_order: C::Scalar,
    /// Masked plaintext (`z1`).
    masked_plaintext: BigNumber,
    /// Masked nonce (`z2`).
    masked_nonce: BigNumber,
    /// Masked commitment randomness (`w`).
    masked_randomness: MaskedRandomness,
}

/// The public statement: the ciphertext and the claimed reduction of its
/// plaintext.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C: CurveTrait> {
    setup: &'a VerifiedRingPedersen,
    prover_pk: &'a EncryptionKey,
    ciphertext: &'a Ciphertext,
    claim: &'a C::Scalar,
}

impl<'a, C: CurveTrait> CommonInput<'a, C> {
    pub(crate) fn new(
        setup: &'a VerifiedRingPedersen,
        prover_pk: &'a EncryptionKey,
        ciphertext: &'a Ciphertext,
        claim: &'a C::Scalar,
    ) -> Self {
        Self {
            setup,
            prover_pk,
            ciphertext,
            claim,
        }
    }
}

/// The prover's secrets: the full (signed) plaintext and the ciphertext's
/// nonce. A decryption-key holder can always recover both.
pub(crate) struct ProverSecret<'a> {
    plaintext: &'a BigNumber,
    nonce: &'a Nonce,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pidec::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(plaintext: &'a BigNumber, nonce: &'a Nonce) -> Self {
        Self { plaintext, nonce }
    }
}

/// The mask in `PiDec` must dominate `e * plaintext`, where the plaintext of
/// a combined MtA ciphertext can reach roughly `ELL + ELL_PRIME` bits.
const DEC_MASK_BITS: usize = crate::parameters::ELL_PRIME + ELL + EPSILON;

impl<C: CurveTrait> Proof for PiDecProof<C> {
    type CommonInput<'a> = CommonInput<'a, C>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let scheme = input.setup.scheme();
        let order = C::order();

        let alpha = random_plusminus_by_size(rng, DEC_MASK_BITS);
        let (plaintext_commitment, mu) = scheme.commit(secret.plaintext, ELL, rng)?;
        let (mask_commitment, nu) = scheme.commit(&alpha, DEC_MASK_BITS, rng)?;
        let r = Nonce::from_bn(random_bn_in_z_star(rng, input.prover_pk.modulus())?);
        let mask_ciphertext = input.prover_pk.encrypt_with_nonce(&alpha, &r)?;
        let mask_mod_order = C::bn_to_scalar(&alpha.nmod(&order))?;

        fill_transcript(
            transcript,
            context,
            &input,
            &plaintext_commitment,
            &mask_commitment,
            &mask_ciphertext,
            &mask_mod_order,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        let masked_plaintext = &alpha + &e * secret.plaintext;
        let masked_nonce = r.as_bn().modmul(
            &modpow_signed(secret.nonce.as_bn(), &e, input.prover_pk.modulus())?,
            input.prover_pk.modulus(),
        );
        let masked_randomness = mu.mask(&nu, &e);

        Ok(Self {
            plaintext_commitment,
            mask_commitment,
            mask_ciphertext,
            mask_mod_order,
            masked_plaintext,
            masked_nonce,
            masked_randomness,
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
            &self.mask_commitment,
            &self.mask_ciphertext,
            &self.mask_mod_order,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        // enc(z1, z2) == A * C^e.
        let ciphertext_is_consistent = {
            let lhs = input.prover_pk.encrypt_with_nonce(
                &self.masked_plaintext,
                &Nonce::from_bn(self.masked_nonce.clone()),
            )?;
            let rhs = {
                let c_to_e = input.prover_pk.multiply(input.ciphertext, &e)?;
                input.prover_pk.add(&self.mask_ciphertext, &c_to_e)?
            };
            lhs == rhs
        };
        if !ciphertext_is_consistent {
            error!("ciphertext consistency check failed");
            return Err(Error::LocalFailure("pidec: ciphertext equation failed"));
        }

        // z1 mod q == γ + e * claim (mod q).
        let reduction_is_consistent = {
            let lhs = C::bn_to_scalar(&self.masked_plaintext.nmod(&C::order()))?;
            let e_scalar = C::bn_to_scalar(&e)?;
            let rhs = self.mask_mod_order.add(&e_scalar.mul(input.claim));
            lhs == rhs
        };
        if !reduction_is_consistent {
            error!("claimed reduction check failed");
            return Err(Error::LocalFailure("pidec: reduction equation failed"));
        }

        // s^z1 t^w == T * S^e.
        let scheme = input.setup.scheme();
        let commitment_is_consistent = {
            let lhs = scheme.reconstruct(&self.masked_plaintext, &self.masked_randomness)?;
            let rhs = scheme.combine(&self.mask_commitment, &self.plaintext_commitment, &e)?;
            lhs == rhs
        };
        if !commitment_is_consistent {
            error!("commitment consistency check failed");
            return Err(Error::LocalFailure("pidec: commitment equation failed"));
        }
        Ok(())
    }
}

fn fill_transcript<C: CurveTrait>(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput<'_, C>,
    plaintext_commitment: &Commitment,
    mask_commitment: &Commitment,
    mask_ciphertext: &Ciphertext,
    mask_mod_order: &C::Scalar,
) -> Result<()> {
    transcript.append_message(b"PiDec ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiDec setup", &input.setup.scheme().modulus().to_bytes());
    transcript.append_message(
        b"PiDec statement",
        &[
            input.prover_pk.modulus().to_bytes(),
            input.ciphertext.as_bn().to_bytes(),
            input.claim.to_bytes(),
        ]
        .concat(),
    );
    transcript.append_message(
        b"PiDec commitments",
        &[
            plaintext_commitment.to_bytes(),
            mask_commitment.to_bytes(),
            mask_ciphertext.as_bn().to_bytes(),
            mask_mod_order.to_bytes(),
        ]
        .concat(),
    );
    Ok(())
}
