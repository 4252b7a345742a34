//! Proof of correct ciphertext-ciphertext multiplication.
//!
//! Given ciphertexts `X`, `Y`, and `C` under the prover's own key, shows
//! that `C = Y^x * ρ^N` where `x` is the plaintext of `X`. Used during
//! identification to show the disclosed product ciphertext really combines
//! the committed ephemeral shares.

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    paillier::{Ciphertext, EncryptionKey, Nonce},
    utils::{
        modpow_signed, positive_challenge_from_transcript, random_bn_in_z_star, random_positive_bn,
    },
    zkp::{Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, marker::PhantomData};
use tracing::error;

/// Proof that a ciphertext is a correct homomorphic product.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiMulProof<C> {
    /// `Y` raised to the mask, re-randomized (`A`).
    mask_product: Ciphertext,
    /// Encryption of the mask (`B`).
    mask_ciphertext: Ciphertext,
    /// Masked multiplier (`z`).
    masked_multiplier: BigNumber,
    /// Masked product nonce (`u`).
    masked_product_nonce: BigNumber,
    /// Masked multiplier nonce (`v`).
    masked_multiplier_nonce: BigNumber,
    curve: PhantomData<C>,
}

/// The public statement: three ciphertexts under the prover's key with
/// `C = Y^{plaintext(X)}`.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    prover_pk: &'a EncryptionKey,
    multiplier_ciphertext: &'a Ciphertext,
    multiplicand_ciphertext: &'a Ciphertext,
    product_ciphertext: &'a Ciphertext,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(
        prover_pk: &'a EncryptionKey,
        multiplier_ciphertext: &'a Ciphertext,
        multiplicand_ciphertext: &'a Ciphertext,
        product_ciphertext: &'a Ciphertext,
    ) -> Self {
        Self {
            prover_pk,
            multiplier_ciphertext,
            multiplicand_ciphertext,
            product_ciphertext,
        }
    }
}

/// The prover's secrets: the multiplier plaintext, its encryption nonce, and
/// the re-randomizer of the product.
pub(crate) struct ProverSecret<'a> {
    multiplier: &'a BigNumber,
    multiplier_nonce: &'a Nonce,
    product_nonce: &'a Nonce,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pimul::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(
        multiplier: &'a BigNumber,
        multiplier_nonce: &'a Nonce,
        product_nonce: &'a Nonce,
    ) -> Self {
        Self {
            multiplier,
            multiplier_nonce,
            product_nonce,
        }
    }
}

impl<C: CurveTrait> Proof for PiMulProof<C> {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let n = input.prover_pk.modulus();

        let alpha = random_positive_bn(rng, n);
        let r = random_bn_in_z_star(rng, n)?;
        let s = random_bn_in_z_star(rng, n)?;

        // A = Y^alpha * r^N.
        let mask_product = {
            let scaled = input
                .prover_pk
                .multiply(input.multiplicand_ciphertext, &alpha)?;
            let rerandomizer = input
                .prover_pk
                .encrypt_with_nonce(&BigNumber::zero(), &Nonce::from_bn(r.clone()))?;
            input.prover_pk.add(&scaled, &rerandomizer)?
        };
        // B = enc(alpha, s).
        let mask_ciphertext = input
            .prover_pk
            .encrypt_with_nonce(&alpha, &Nonce::from_bn(s.clone()))?;

        fill_transcript(transcript, context, &input, &mask_product, &mask_ciphertext)?;
        let e = positive_challenge_from_transcript(transcript, &C::order())?;

        let masked_multiplier = &alpha + &e * secret.multiplier;
        let masked_product_nonce =
            r.modmul(&modpow_signed(secret.product_nonce.as_bn(), &e, n)?, n);
        let masked_multiplier_nonce =
            s.modmul(&modpow_signed(secret.multiplier_nonce.as_bn(), &e, n)?, n);

        Ok(Self {
            mask_product,
            mask_ciphertext,
            masked_multiplier,
            masked_product_nonce,
            masked_multiplier_nonce,
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
            &self.mask_product,
            &self.mask_ciphertext,
        )?;
        let e = positive_challenge_from_transcript(transcript, &C::order())?;

        // Y^z * u^N == A * C^e.
        let product_is_consistent = {
            let lhs = {
                let scaled = input
                    .prover_pk
                    .multiply(input.multiplicand_ciphertext, &self.masked_multiplier)?;
                let rerandomizer = input.prover_pk.encrypt_with_nonce(
                    &BigNumber::zero(),
                    &Nonce::from_bn(self.masked_product_nonce.clone()),
                )?;
                input.prover_pk.add(&scaled, &rerandomizer)?
            };
            let rhs = {
                let c_to_e = input.prover_pk.multiply(input.product_ciphertext, &e)?;
                input.prover_pk.add(&self.mask_product, &c_to_e)?
            };
            lhs == rhs
        };
        if !product_is_consistent {
            error!("product consistency check failed");
            return Err(Error::LocalFailure("pimul: product equation failed"));
        }

        // enc(z, v) == B * X^e.
        let multiplier_is_consistent = {
            let lhs = input.prover_pk.encrypt_with_nonce(
                &self.masked_multiplier,
                &Nonce::from_bn(self.masked_multiplier_nonce.clone()),
            )?;
            let rhs = {
                let x_to_e = input.prover_pk.multiply(input.multiplier_ciphertext, &e)?;
                input.prover_pk.add(&self.mask_ciphertext, &x_to_e)?
            };
            lhs == rhs
        };
        if !multiplier_is_consistent {
            error!("multiplier consistency check failed");
            return Err(Error::LocalFailure("pimul: multiplier equation failed"));
        }
        Ok(())
    }
}

fn fill_transcript(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput<'_>,
    mask_product: &Ciphertext,
    mask_ciphertext: &Ciphertext,
) -> Result<()> {
    transcript.append_message(b"PiMul ProofContext", &context.as_bytes()?);
    transcript.append_message(
        b"PiMul statement",
        &[
            input.prover_pk.modulus().to_bytes(),
            input.multiplier_ciphertext.as_bn().to_bytes(),
            input.multiplicand_ciphertext.as_bn().to_bytes(),
            input.product_ciphertext.as_bn().to_bytes(),
        ]
        .concat(),
    );
    transcript.append_message(
        b"PiMul commitments",
        &[mask_product.as_bn().to_bytes(), mask_ciphertext.as_bn().to_bytes()].concat(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve, paillier::DecryptionKey, parameters::ELL,
        utils::{random_plusminus_by_size, testing::init_testing},
        zkp::BadContext,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"PiMulProof Test")
    }

    type TestProof = PiMulProof<TestCurve>;

    struct MulInstance {
        pk: EncryptionKey,
        x_ciphertext: Ciphertext,
        y_ciphertext: Ciphertext,
        product: Ciphertext,
        x: BigNumber,
        x_nonce: Nonce,
        product_nonce: Nonce,
    }

    fn mul_instance(rng: &mut rand::rngs::StdRng) -> MulInstance {
        let dk = DecryptionKey::generate(rng).unwrap();
        let pk = dk.encryption_key();
        let x = random_plusminus_by_size(rng, ELL);
        let y = random_plusminus_by_size(rng, ELL);
        let (x_ciphertext, x_nonce) = pk.encrypt(rng, &x).unwrap();
        let (y_ciphertext, _) = pk.encrypt(rng, &y).unwrap();
        let product_nonce = Nonce::from_bn(random_bn_in_z_star(rng, pk.modulus()).unwrap());
        let product = {
            let scaled = pk.multiply(&y_ciphertext, &x).unwrap();
            let rerandomizer = pk
                .encrypt_with_nonce(&BigNumber::zero(), &product_nonce)
                .unwrap();
            pk.add(&scaled, &rerandomizer).unwrap()
        };
        MulInstance {
            pk,
            x_ciphertext,
            y_ciphertext,
            product,
            x,
            x_nonce,
            product_nonce,
        }
    }

    #[test]
    fn valid_proof_verifies() {
        let mut rng = init_testing();
        let instance = mul_instance(&mut rng);
        let input = CommonInput::new(
            &instance.pk,
            &instance.x_ciphertext,
            &instance.y_ciphertext,
            &instance.product,
        );
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&instance.x, &instance.x_nonce, &instance.product_nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn wrong_product_fails() {
        let mut rng = init_testing();
        let instance = mul_instance(&mut rng);
        // A product of the wrong ciphertexts.
        let (bogus, _) = instance
            .pk
            .encrypt(&mut rng, &BigNumber::from(99u64))
            .unwrap();
        let input = CommonInput::new(
            &instance.pk,
            &instance.x_ciphertext,
            &instance.y_ciphertext,
            &bogus,
        );
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&instance.x, &instance.x_nonce, &instance.product_nonce),
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
        let instance = mul_instance(&mut rng);
        let input = CommonInput::new(
            &instance.pk,
            &instance.x_ciphertext,
            &instance.y_ciphertext,
            &instance.product,
        );
        let proof = TestProof::prove(
            input,
            ProverSecret::new(&instance.x, &instance.x_nonce, &instance.product_nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &BadContext, &mut transcript()).is_err());
    }
}
