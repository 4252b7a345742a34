//! Proof of a correct affine-group operation on a ciphertext.
//!
//! The MtA sender applies `D = K^x * enc(y, ρ)` to the receiver's ciphertext
//! `K` and publishes `F = enc'(y, ρ_y)` under its own key together with the
//! curve commitment `X = g^x`. This proof shows the same `x` and `y` were
//! used throughout and that both lie in their expected ranges.

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    paillier::{Ciphertext, EncryptionKey, Nonce},
    parameters::{ELL, ELL_PRIME, EPSILON},
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

/// Proof that an affine transformation of a ciphertext used committed,
/// range-bounded multiplier and summand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiAffgProof<C> {
    /// Commitment to the multiplier (`S`).
    multiplier_commitment: Commitment,
    /// Commitment to the summand (`T`).
    summand_commitment: Commitment,
    /// Affine transformation of `K` by the masks (`A`).
    mask_transformation: Ciphertext,
    /// Curve commitment to the multiplier mask (`B_x`).
    mask_curve_commitment: C,
    /// Encryption of the summand mask under the prover's key (`B_y`).
    mask_summand_ciphertext: Ciphertext,
    /// Ring-Pedersen commitment to the multiplier mask (`E`).
    mask_multiplier_commitment: Commitment,
    /// Ring-Pedersen commitment to the summand mask (`F`).
    mask_summand_commitment: Commitment,
    /// Masked multiplier (`z1`).
    masked_multiplier: BigNumber,
    /// Masked summand (`z2`).
    masked_summand: BigNumber,
    /// Masked multiplier commitment randomness (`z3`).
    masked_multiplier_randomness: MaskedRandomness,
    /// Masked summand commitment randomness (`z4`).
    masked_summand_randomness: MaskedRandomness,
    /// Masked nonce for the transformation (`w`).
    masked_transformation_nonce: BigNumber,
    /// Masked nonce for the summand encryption (`w_y`).
    masked_summand_nonce: BigNumber,
}

/// The public statement.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    setup: &'a VerifiedRingPedersen,
    receiver_pk: &'a EncryptionKey,
    prover_pk: &'a EncryptionKey,
    receiver_ciphertext: &'a Ciphertext,
    transformed_ciphertext: &'a Ciphertext,
    summand_ciphertext: &'a Ciphertext,
    multiplier_point: &'a C,
}

impl<'a, C> CommonInput<'a, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        setup: &'a VerifiedRingPedersen,
        receiver_pk: &'a EncryptionKey,
        prover_pk: &'a EncryptionKey,
        receiver_ciphertext: &'a Ciphertext,
        transformed_ciphertext: &'a Ciphertext,
        summand_ciphertext: &'a Ciphertext,
        multiplier_point: &'a C,
    ) -> Self {
        Self {
            setup,
            receiver_pk,
            prover_pk,
            receiver_ciphertext,
            transformed_ciphertext,
            summand_ciphertext,
            multiplier_point,
        }
    }
}

/// The prover's secrets: the multiplier `x`, summand `y`, and the two
/// encryption nonces.
pub(crate) struct ProverSecret<'a> {
    multiplier: &'a BigNumber,
    summand: &'a BigNumber,
    transformation_nonce: &'a Nonce,
    summand_nonce: &'a Nonce,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("piaffg::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(
        multiplier: &'a BigNumber,
        summand: &'a BigNumber,
        transformation_nonce: &'a Nonce,
        summand_nonce: &'a Nonce,
    ) -> Self {
        Self {
            multiplier,
            summand,
            transformation_nonce,
            summand_nonce,
        }
    }
}

impl<C: CurveTrait> Proof for PiAffgProof<C> {
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
        let beta = random_plusminus_by_size(rng, ELL_PRIME + EPSILON);
        let r = Nonce::from_bn(random_bn_in_z_star(rng, input.receiver_pk.modulus())?);
        let r_y = Nonce::from_bn(random_bn_in_z_star(rng, input.prover_pk.modulus())?);

        let mask_transformation = {
            let scaled = input
                .receiver_pk
                .multiply(input.receiver_ciphertext, &alpha)?;
            let summand_part = input.receiver_pk.encrypt_with_nonce(&beta, &r)?;
            input.receiver_pk.add(&scaled, &summand_part)?
        };
        let mask_curve_commitment = C::scale_generator(&alpha)?;
        let mask_summand_ciphertext = input.prover_pk.encrypt_with_nonce(&beta, &r_y)?;

        let (multiplier_commitment, m) = scheme.commit(secret.multiplier, ELL, rng)?;
        let (summand_commitment, mu) = scheme.commit(secret.summand, ELL_PRIME, rng)?;
        let (mask_multiplier_commitment, gamma) = scheme.commit(&alpha, ELL + EPSILON, rng)?;
        let (mask_summand_commitment, delta) = scheme.commit(&beta, ELL_PRIME + EPSILON, rng)?;

        fill_transcript(
            transcript,
            context,
            &input,
            &multiplier_commitment,
            &summand_commitment,
            &mask_transformation,
            &mask_curve_commitment,
            &mask_summand_ciphertext,
            &mask_multiplier_commitment,
            &mask_summand_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        let masked_multiplier = &alpha + &e * secret.multiplier;
        let masked_summand = &beta + &e * secret.summand;
        let masked_multiplier_randomness = m.mask(&gamma, &e);
        let masked_summand_randomness = mu.mask(&delta, &e);
        let masked_transformation_nonce = r.as_bn().modmul(
            &modpow_signed(
                secret.transformation_nonce.as_bn(),
                &e,
                input.receiver_pk.modulus(),
            )?,
            input.receiver_pk.modulus(),
        );
        let masked_summand_nonce = r_y.as_bn().modmul(
            &modpow_signed(secret.summand_nonce.as_bn(), &e, input.prover_pk.modulus())?,
            input.prover_pk.modulus(),
        );

        Ok(Self {
            multiplier_commitment,
            summand_commitment,
            mask_transformation,
            mask_curve_commitment,
            mask_summand_ciphertext,
            mask_multiplier_commitment,
            mask_summand_commitment,
            masked_multiplier,
            masked_summand,
            masked_multiplier_randomness,
            masked_summand_randomness,
            masked_transformation_nonce,
            masked_summand_nonce,
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
            &self.multiplier_commitment,
            &self.summand_commitment,
            &self.mask_transformation,
            &self.mask_curve_commitment,
            &self.mask_summand_ciphertext,
            &self.mask_multiplier_commitment,
            &self.mask_summand_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        // K^z1 * enc(z2, w) == A * D^e under the receiver's key.
        let transformation_is_consistent = {
            let lhs = {
                let scaled = input
                    .receiver_pk
                    .multiply(input.receiver_ciphertext, &self.masked_multiplier)?;
                let summand_part = input.receiver_pk.encrypt_with_nonce(
                    &self.masked_summand,
                    &Nonce::from_bn(self.masked_transformation_nonce.clone()),
                )?;
                input.receiver_pk.add(&scaled, &summand_part)?
            };
            let rhs = {
                let d_to_e = input
                    .receiver_pk
                    .multiply(input.transformed_ciphertext, &e)?;
                input.receiver_pk.add(&self.mask_transformation, &d_to_e)?
            };
            lhs == rhs
        };
        if !transformation_is_consistent {
            error!("affine transformation check failed");
            return Err(Error::LocalFailure("piaffg: transformation equation failed"));
        }

        // g^z1 == B_x + X * e.
        let curve_commitment_is_consistent = {
            let lhs = C::scale_generator(&self.masked_multiplier)?;
            let rhs =
                self.mask_curve_commitment + input.multiplier_point.mul(&C::bn_to_scalar(&e)?);
            lhs == rhs
        };
        if !curve_commitment_is_consistent {
            error!("curve commitment check failed");
            return Err(Error::LocalFailure("piaffg: curve equation failed"));
        }

        // enc'(z2, w_y) == B_y * F^e under the prover's key.
        let summand_is_consistent = {
            let lhs = input.prover_pk.encrypt_with_nonce(
                &self.masked_summand,
                &Nonce::from_bn(self.masked_summand_nonce.clone()),
            )?;
            let rhs = {
                let f_to_e = input.prover_pk.multiply(input.summand_ciphertext, &e)?;
                input.prover_pk.add(&self.mask_summand_ciphertext, &f_to_e)?
            };
            lhs == rhs
        };
        if !summand_is_consistent {
            error!("summand encryption check failed");
            return Err(Error::LocalFailure("piaffg: summand equation failed"));
        }

        // Ring-Pedersen consistency for both secrets.
        let scheme = input.setup.scheme();
        let multiplier_commitment_is_consistent = {
            let lhs = scheme.reconstruct(&self.masked_multiplier, &self.masked_multiplier_randomness)?;
            let rhs = scheme.combine(
                &self.mask_multiplier_commitment,
                &self.multiplier_commitment,
                &e,
            )?;
            lhs == rhs
        };
        if !multiplier_commitment_is_consistent {
            error!("multiplier commitment check failed");
            return Err(Error::LocalFailure(
                "piaffg: multiplier commitment equation failed",
            ));
        }

        let summand_commitment_is_consistent = {
            let lhs = scheme.reconstruct(&self.masked_summand, &self.masked_summand_randomness)?;
            let rhs = scheme.combine(&self.mask_summand_commitment, &self.summand_commitment, &e)?;
            lhs == rhs
        };
        if !summand_commitment_is_consistent {
            error!("summand commitment check failed");
            return Err(Error::LocalFailure(
                "piaffg: summand commitment equation failed",
            ));
        }

        // Range checks.
        if !within_bound_by_size(&self.masked_multiplier, ELL + EPSILON) {
            error!("masked multiplier out of range");
            return Err(Error::LocalFailure("piaffg: multiplier out of range"));
        }
        if !within_bound_by_size(&self.masked_summand, ELL_PRIME + EPSILON) {
            error!("masked summand out of range");
            return Err(Error::LocalFailure("piaffg: summand out of range"));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_transcript<C: CurveTrait>(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput<'_, C>,
    multiplier_commitment: &Commitment,
    summand_commitment: &Commitment,
    mask_transformation: &Ciphertext,
    mask_curve_commitment: &C,
    mask_summand_ciphertext: &Ciphertext,
    mask_multiplier_commitment: &Commitment,
    mask_summand_commitment: &Commitment,
) -> Result<()> {
    transcript.append_message(b"PiAffg ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiAffg setup", &input.setup.scheme().modulus().to_bytes());
    transcript.append_message(
        b"PiAffg statement",
        &[
            input.receiver_pk.modulus().to_bytes(),
            input.prover_pk.modulus().to_bytes(),
            input.receiver_ciphertext.as_bn().to_bytes(),
            input.transformed_ciphertext.as_bn().to_bytes(),
            input.summand_ciphertext.as_bn().to_bytes(),
            input.multiplier_point.to_bytes(),
        ]
        .concat(),
    );
    transcript.append_message(
        b"PiAffg commitments",
        &[
            multiplier_commitment.to_bytes(),
            summand_commitment.to_bytes(),
            mask_transformation.as_bn().to_bytes(),
            mask_curve_commitment.to_bytes(),
            mask_summand_ciphertext.as_bn().to_bytes(),
            mask_multiplier_commitment.to_bytes(),
            mask_summand_commitment.to_bytes(),
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
        Transcript::new(b"PiAffgProof Test")
    }

    type TestProof = PiAffgProof<TestCurve>;

    struct AffgInstance {
        setup: VerifiedRingPedersen,
        receiver_pk: EncryptionKey,
        prover_pk: EncryptionKey,
        receiver_ciphertext: Ciphertext,
        transformed: Ciphertext,
        summand_ciphertext: Ciphertext,
        multiplier_point: TestCurve,
        multiplier: BigNumber,
        summand: BigNumber,
        transformation_nonce: Nonce,
        summand_nonce: Nonce,
    }

    fn affg_instance(rng: &mut rand::rngs::StdRng) -> AffgInstance {
        let setup = VerifiedRingPedersen::generate(rng, &()).unwrap();
        let receiver_dk = DecryptionKey::generate(rng).unwrap();
        let receiver_pk = receiver_dk.encryption_key();
        let prover_dk = DecryptionKey::generate(rng).unwrap();
        let prover_pk = prover_dk.encryption_key();

        let k = random_plusminus_by_size(rng, ELL);
        let (receiver_ciphertext, _) = receiver_pk.encrypt(rng, &k).unwrap();

        let multiplier = random_plusminus_by_size(rng, ELL);
        let summand = random_plusminus_by_size(rng, ELL_PRIME);

        let transformation_nonce =
            Nonce::from_bn(random_bn_in_z_star(rng, receiver_pk.modulus()).unwrap());
        let summand_part = receiver_pk
            .encrypt_with_nonce(&summand, &transformation_nonce)
            .unwrap();
        let transformed = {
            let scaled = receiver_pk
                .multiply(&receiver_ciphertext, &multiplier)
                .unwrap();
            receiver_pk.add(&scaled, &summand_part).unwrap()
        };
        let (summand_ciphertext, summand_nonce) = prover_pk.encrypt(rng, &summand).unwrap();
        let multiplier_point = TestCurve::scale_generator(&multiplier).unwrap();

        AffgInstance {
            setup,
            receiver_pk,
            prover_pk,
            receiver_ciphertext,
            transformed,
            summand_ciphertext,
            multiplier_point,
            multiplier,
            summand,
            transformation_nonce,
            summand_nonce,
        }
    }

    #[test]
    fn valid_proof_verifies() {
        let mut rng = init_testing();
        let instance = affg_instance(&mut rng);
        let input = CommonInput::new(
            &instance.setup,
            &instance.receiver_pk,
            &instance.prover_pk,
            &instance.receiver_ciphertext,
            &instance.transformed,
            &instance.summand_ciphertext,
            &instance.multiplier_point,
        );
        let proof = TestProof::prove(
            input,
            ProverSecret::new(
                &instance.multiplier,
                &instance.summand,
                &instance.transformation_nonce,
                &instance.summand_nonce,
            ),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn mismatched_curve_point_fails() {
        let mut rng = init_testing();
        let instance = affg_instance(&mut rng);
        let wrong_point = TestCurve::random(&mut rng);
        let input = CommonInput::new(
            &instance.setup,
            &instance.receiver_pk,
            &instance.prover_pk,
            &instance.receiver_ciphertext,
            &instance.transformed,
            &instance.summand_ciphertext,
            &wrong_point,
        );
        let proof = TestProof::prove(
            input,
            ProverSecret::new(
                &instance.multiplier,
                &instance.summand,
                &instance.transformation_nonce,
                &instance.summand_nonce,
            ),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn corrupted_proof_bytes_fail() {
        let mut rng = init_testing();
        let instance = affg_instance(&mut rng);
        let input = CommonInput::new(
            &instance.setup,
            &instance.receiver_pk,
            &instance.prover_pk,
            &instance.receiver_ciphertext,
            &instance.transformed,
            &instance.summand_ciphertext,
            &instance.multiplier_point,
        );
        let mut proof = TestProof::prove(
            input,
            ProverSecret::new(
                &instance.multiplier,
                &instance.summand,
                &instance.transformation_nonce,
                &instance.summand_nonce,
            ),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        proof.masked_multiplier = &proof.masked_multiplier + BigNumber::one();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn context_must_match() {
        let mut rng = init_testing();
        let instance = affg_instance(&mut rng);
        let input = CommonInput::new(
            &instance.setup,
            &instance.receiver_pk,
            &instance.prover_pk,
            &instance.receiver_ciphertext,
            &instance.transformed,
            &instance.summand_ciphertext,
            &instance.multiplier_point,
        );
        let proof = TestProof::prove(
            input,
            ProverSecret::new(
                &instance.multiplier,
                &instance.summand,
                &instance.transformation_nonce,
                &instance.summand_nonce,
            ),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &BadContext, &mut transcript()).is_err());
    }
}
