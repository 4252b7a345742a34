//! Proof of correct scalar multiplication of a ciphertext, with the scalar
//! committed on the curve.
//!
//! Given a ciphertext `C` under the prover's key, shows that
//! `D = C^x * ρ^N` where `X = g^x` is public. Signing identification uses it
//! to show the disclosed masked-key product used the party's real key share.

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

/// Proof of a correct curve-committed ciphertext scaling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiMulStarProof<C> {
    /// Commitment to the multiplier (`S`).
    multiplier_commitment: Commitment,
    /// Scaling of `C` by the mask, re-randomized (`A`).
    mask_product: Ciphertext,
    /// Curve commitment to the mask (`B_x`).
    mask_point: C,
    /// Commitment to the mask (`E`).
    mask_commitment: Commitment,
    /// Masked multiplier (`z1`).
    masked_multiplier: BigNumber,
    /// Masked commitment randomness (`z2`).
    masked_randomness: MaskedRandomness,
    /// Masked product nonce (`w`).
    masked_nonce: BigNumber,
}

/// The public statement.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    setup: &'a VerifiedRingPedersen,
    prover_pk: &'a EncryptionKey,
    base_ciphertext: &'a Ciphertext,
    product_ciphertext: &'a Ciphertext,
    multiplier_point: &'a C,
}

impl<'a, C> CommonInput<'a, C> {
    pub(crate) fn new(
        setup: &'a VerifiedRingPedersen,
        prover_pk: &'a EncryptionKey,
        base_ciphertext: &'a Ciphertext,
        product_ciphertext: &'a Ciphertext,
        multiplier_point: &'a C,
    ) -> Self {
        Self {
            setup,
            prover_pk,
            base_ciphertext,
            product_ciphertext,
            multiplier_point,
        }
    }
}

/// The prover's secrets: the multiplier and the product re-randomizer.
pub(crate) struct ProverSecret<'a> {
    multiplier: &'a BigNumber,
    product_nonce: &'a Nonce,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pimulstar::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(multiplier: &'a BigNumber, product_nonce: &'a Nonce) -> Self {
        Self {
            multiplier,
            product_nonce,
        }
    }
}

impl<C: CurveTrait> Proof for PiMulStarProof<C> {
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
        let n = input.prover_pk.modulus();

        let alpha = random_plusminus_by_size(rng, ELL + EPSILON);
        let r = random_bn_in_z_star(rng, n)?;

        let mask_product = {
            let scaled = input.prover_pk.multiply(input.base_ciphertext, &alpha)?;
            let rerandomizer = input
                .prover_pk
                .encrypt_with_nonce(&BigNumber::zero(), &Nonce::from_bn(r.clone()))?;
            input.prover_pk.add(&scaled, &rerandomizer)?
        };
        let mask_point = C::scale_generator(&alpha)?;
        let (multiplier_commitment, m) = scheme.commit(secret.multiplier, ELL, rng)?;
        let (mask_commitment, gamma) = scheme.commit(&alpha, ELL + EPSILON, rng)?;

        fill_transcript(
            transcript,
            context,
            &input,
            &multiplier_commitment,
            &mask_product,
            &mask_point,
            &mask_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        let masked_multiplier = &alpha + &e * secret.multiplier;
        let masked_randomness = m.mask(&gamma, &e);
        let masked_nonce = r.modmul(&modpow_signed(secret.product_nonce.as_bn(), &e, n)?, n);

        Ok(Self {
            multiplier_commitment,
            mask_product,
            mask_point,
            mask_commitment,
            masked_multiplier,
            masked_randomness,
            masked_nonce,
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
            &self.mask_product,
            &self.mask_point,
            &self.mask_commitment,
        )?;
        let e = plusminus_challenge_from_transcript::<C>(transcript)?;

        // C^z1 * w^N == A * D^e.
        let product_is_consistent = {
            let lhs = {
                let scaled = input
                    .prover_pk
                    .multiply(input.base_ciphertext, &self.masked_multiplier)?;
                let rerandomizer = input.prover_pk.encrypt_with_nonce(
                    &BigNumber::zero(),
                    &Nonce::from_bn(self.masked_nonce.clone()),
                )?;
                input.prover_pk.add(&scaled, &rerandomizer)?
            };
            let rhs = {
                let d_to_e = input.prover_pk.multiply(input.product_ciphertext, &e)?;
                input.prover_pk.add(&self.mask_product, &d_to_e)?
            };
            lhs == rhs
        };
        if !product_is_consistent {
            error!("product consistency check failed");
            return Err(Error::LocalFailure("pimulstar: product equation failed"));
        }

        // g^z1 == B_x + X * e.
        let point_is_consistent = {
            let lhs = C::scale_generator(&self.masked_multiplier)?;
            let rhs = self.mask_point + input.multiplier_point.mul(&C::bn_to_scalar(&e)?);
            lhs == rhs
        };
        if !point_is_consistent {
            error!("curve consistency check failed");
            return Err(Error::LocalFailure("pimulstar: curve equation failed"));
        }

        // s^z1 t^z2 == E * S^e.
        let scheme = input.setup.scheme();
        let commitment_is_consistent = {
            let lhs = scheme.reconstruct(&self.masked_multiplier, &self.masked_randomness)?;
            let rhs = scheme.combine(&self.mask_commitment, &self.multiplier_commitment, &e)?;
            lhs == rhs
        };
        if !commitment_is_consistent {
            error!("commitment consistency check failed");
            return Err(Error::LocalFailure("pimulstar: commitment equation failed"));
        }

        if !within_bound_by_size(&self.masked_multiplier, ELL + EPSILON) {
            error!("masked multiplier out of range");
            return Err(Error::LocalFailure("pimulstar: response out of range"));
        }
        Ok(())
    }
}

fn fill_transcript<C: CurveTrait>(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput<'_, C>,
    multiplier_commitment: &Commitment,
    mask_product: &Ciphertext,
    mask_point: &C,
    mask_commitment: &Commitment,
) -> Result<()> {
    transcript.append_message(b"PiMulStar ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiMulStar setup", &input.setup.scheme().modulus().to_bytes());
    transcript.append_message(
        b"PiMulStar statement",
        &[
            input.prover_pk.modulus().to_bytes(),
            input.base_ciphertext.as_bn().to_bytes(),
            input.product_ciphertext.as_bn().to_bytes(),
            input.multiplier_point.to_bytes(),
        ]
        .concat(),
    );
    transcript.append_message(
        b"PiMulStar commitments",
        &[
            multiplier_commitment.to_bytes(),
            mask_product.as_bn().to_bytes(),
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
        Transcript::new(b"PiMulStarProof Test")
    }

    type TestProof = PiMulStarProof<TestCurve>;

    #[test]
    fn valid_proof_verifies() {
        let mut rng = init_testing();
        let setup = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();

        let k = random_plusminus_by_size(&mut rng, ELL);
        let (base_ciphertext, _) = pk.encrypt(&mut rng, &k).unwrap();
        let x = random_plusminus_by_size(&mut rng, ELL);
        let product_nonce = Nonce::from_bn(random_bn_in_z_star(&mut rng, pk.modulus()).unwrap());
        let product = {
            let scaled = pk.multiply(&base_ciphertext, &x).unwrap();
            let rerandomizer = pk
                .encrypt_with_nonce(&BigNumber::zero(), &product_nonce)
                .unwrap();
            pk.add(&scaled, &rerandomizer).unwrap()
        };
        let point = TestCurve::scale_generator(&x).unwrap();

        let input = CommonInput::new(&setup, &pk, &base_ciphertext, &product, &point);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&x, &product_nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn wrong_multiplier_point_fails() {
        let mut rng = init_testing();
        let setup = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();

        let k = random_plusminus_by_size(&mut rng, ELL);
        let (base_ciphertext, _) = pk.encrypt(&mut rng, &k).unwrap();
        let x = random_plusminus_by_size(&mut rng, ELL);
        let product_nonce = Nonce::from_bn(random_bn_in_z_star(&mut rng, pk.modulus()).unwrap());
        let product = {
            let scaled = pk.multiply(&base_ciphertext, &x).unwrap();
            let rerandomizer = pk
                .encrypt_with_nonce(&BigNumber::zero(), &product_nonce)
                .unwrap();
            pk.add(&scaled, &rerandomizer).unwrap()
        };
        let wrong_point = TestCurve::random(&mut rng);

        let input = CommonInput::new(&setup, &pk, &base_ciphertext, &product, &wrong_point);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&x, &product_nonce),
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

        let k = random_plusminus_by_size(&mut rng, ELL);
        let (base_ciphertext, _) = pk.encrypt(&mut rng, &k).unwrap();
        let x = random_plusminus_by_size(&mut rng, ELL);
        let product_nonce = Nonce::from_bn(random_bn_in_z_star(&mut rng, pk.modulus()).unwrap());
        let product = {
            let scaled = pk.multiply(&base_ciphertext, &x).unwrap();
            let rerandomizer = pk
                .encrypt_with_nonce(&BigNumber::zero(), &product_nonce)
                .unwrap();
            pk.add(&scaled, &rerandomizer).unwrap()
        };
        let point = TestCurve::scale_generator(&x).unwrap();

        let input = CommonInput::new(&setup, &pk, &base_ciphertext, &product, &point);
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&x, &product_nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &BadContext, &mut transcript()).is_err());
    }
}
