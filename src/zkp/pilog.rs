//! Proof that an encrypted value equals the discrete log of a public point
//! with respect to an arbitrary base.
//!
//! Binds a Paillier ciphertext `C = enc(x, ρ)` to a curve point `X = G^x`.
//! Presigning uses it twice: to tie the `G_i` ciphertext to `Γ_i = g^{γ_i}`
//! in round two, and to tie `K_i` to `Δ_i = Γ^{k_i}` in round three.

use crate::{
    curve::CurveTrait,
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
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;

/// Proof of log-equality between a ciphertext and a curve point.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiLogProof<C> {
    /// Commitment to the secret (`S`).
    secret_commitment: Commitment,
    /// Encryption of the mask (`A`).
    mask_ciphertext: Ciphertext,
    /// Exponentiation of the base by the mask (`Y`).
    mask_point: C,
    /// Commitment to the mask (`D`).
    mask_commitment: Commitment,
    /// Masked secret (`z1`).
    masked_secret: BigNumber,
    /// Masked nonce (`z2`).
    masked_nonce: BigNumber,
    /// Masked commitment randomness (`z3`).
    masked_randomness: MaskedRandomness,
}

/// The public statement.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    setup: &'a VerifiedRingPedersen,
    prover_pk: &'a EncryptionKey,
    ciphertext: &'a Ciphertext,
    base: &'a C,
    point: &'a C,
}

impl<'a, C> CommonInput<'a, C> {
    pub(crate) fn new(
        setup: &'a VerifiedRingPedersen,
        prover_pk: &'a EncryptionKey,
        ciphertext: &'a Ciphertext,
        base: &'a C,
        point: &'a C,
    ) -> Self {
        Self {
            setup,
            prover_pk,
            ciphertext,
            base,
            point,
        }
    }
}

/// The prover's secrets: the discrete log and the encryption nonce.
pub(crate) struct ProverSecret<'a> {
    secret: &'a BigNumber,
    nonce: &'a Nonce,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pilog::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(secret: &'a BigNumber, nonce: &'a Nonce) -> Self {
        Self { secret, nonce }
    }
}

impl<C: CurveTrait> Proof for PiLogProof<C> {
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

        let alpha = random_plusminus_by_size(rng, ELL + EPSILON);
        let (secret_commitment, mu) = scheme.commit(secret.secret, ELL, rng)?;
        let r = Nonce::from_bn(random_bn_in_z_star(rng, input.prover_pk.modulus())?);
        let mask_ciphertext = input.prover_pk.encrypt_with_nonce(&alpha, &r)?;
        let mask_point = input.base.multiply_by_bignum(&alpha)?;
        let (mask_commitment, gamma) = scheme.commit(&alpha, ELL + EPSILON, rng)?;

        fill_transcript(
            transcript,
            context,
            &input,
            &secret_commitment,
            &mask_ciphertext,
            &mask_point,
            &mask_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        let masked_secret = &alpha + &e * secret.secret;
        let masked_nonce = r.as_bn().modmul(
            &modpow_signed(secret.nonce.as_bn(), &e, input.prover_pk.modulus())?,
            input.prover_pk.modulus(),
        );
        let masked_randomness = mu.mask(&gamma, &e);

        Ok(Self {
            secret_commitment,
            mask_ciphertext,
            mask_point,
            mask_commitment,
            masked_secret,
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
            &self.secret_commitment,
            &self.mask_ciphertext,
            &self.mask_point,
            &self.mask_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        // enc(z1, z2) == A * C^e.
        let ciphertext_is_consistent = {
            let lhs = input.prover_pk.encrypt_with_nonce(
                &self.masked_secret,
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
            return Err(Error::LocalFailure("pilog: ciphertext equation failed"));
        }

        // base^z1 == Y + X * e.
        let point_is_consistent = {
            let lhs = input.base.multiply_by_bignum(&self.masked_secret)?;
            let rhs = self.mask_point + input.point.mul(&C::bn_to_scalar(&e)?);
            lhs == rhs
        };
        if !point_is_consistent {
            error!("curve consistency check failed");
            return Err(Error::LocalFailure("pilog: curve equation failed"));
        }

        // s^z1 t^z3 == D * S^e.
        let scheme = input.setup.scheme();
        let commitment_is_consistent = {
            let lhs = scheme.reconstruct(&self.masked_secret, &self.masked_randomness)?;
            let rhs = scheme.combine(&self.mask_commitment, &self.secret_commitment, &e)?;
            lhs == rhs
        };
        if !commitment_is_consistent {
            error!("commitment consistency check failed");
            return Err(Error::LocalFailure("pilog: commitment equation failed"));
        }

        if !within_bound_by_size(&self.masked_secret, ELL + EPSILON) {
            error!("masked secret out of range");
            return Err(Error::LocalFailure("pilog: response out of range"));
        }
        Ok(())
    }
}

fn fill_transcript<C: CurveTrait>(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput<'_, C>,
    secret_commitment: &Commitment,
    mask_ciphertext: &Ciphertext,
    mask_point: &C,
    mask_commitment: &Commitment,
) -> Result<()> {
    transcript.append_message(b"PiLog ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiLog setup", &input.setup.scheme().modulus().to_bytes());
    transcript.append_message(
        b"PiLog statement",
        &[
            input.prover_pk.modulus().to_bytes(),
            input.ciphertext.as_bn().to_bytes(),
            input.base.to_bytes(),
            input.point.to_bytes(),
        ]
        .concat(),
    );
    transcript.append_message(
        b"PiLog commitments",
        &[
            secret_commitment.to_bytes(),
            mask_ciphertext.as_bn().to_bytes(),
            mask_point.to_bytes(),
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
        Transcript::new(b"PiLogProof Test")
    }

    type TestProof = PiLogProof<TestCurve>;

    #[test]
    fn valid_proof_verifies_with_arbitrary_base() {
        let mut rng = init_testing();
        let setup = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();

        let x = random_plusminus_by_size(&mut rng, ELL);
        let (ciphertext, nonce) = pk.encrypt(&mut rng, &x).unwrap();
        let base = TestCurve::random(&mut rng);
        let point = base.multiply_by_bignum(&x).unwrap();

        let input = CommonInput::new(&setup, &pk, &ciphertext, &base, &point);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&x, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn wrong_point_fails() {
        let mut rng = init_testing();
        let setup = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();

        let x = random_plusminus_by_size(&mut rng, ELL);
        let (ciphertext, nonce) = pk.encrypt(&mut rng, &x).unwrap();
        let base = TestCurve::GENERATOR;
        let wrong_point = TestCurve::random(&mut rng);

        let input = CommonInput::new(&setup, &pk, &ciphertext, &base, &wrong_point);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&x, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn context_must_match() {
        let mut rng = init_testing();
        let setup = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();

        let x = random_plusminus_by_size(&mut rng, ELL);
        let (ciphertext, nonce) = pk.encrypt(&mut rng, &x).unwrap();
        let base = TestCurve::GENERATOR;
        let point = base.multiply_by_bignum(&x).unwrap();

        let input = CommonInput::new(&setup, &pk, &ciphertext, &base, &point);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&x, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &BadContext, &mut transcript()).is_err());
    }
}
