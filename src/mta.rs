//! The multiplicative-to-additive (MtA) sub-protocol.
//!
//! Converts a product of two parties' secrets into additive shares: the
//! receiver holds `k` inside the ciphertext `K = enc(k)`, the sender holds a
//! multiplier `a`, and after one exchange the receiver learns
//! `alpha = a*k + beta` while the sender keeps `-beta` — additive shares of
//! `a*k`, with neither secret revealed. Presigning runs this twice per
//! ordered peer pair: once for the nonce product (`k*gamma`) and once for
//! the masked key (`k*w`).

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    paillier::{Ciphertext, DecryptionKey, EncryptionKey},
    parameters::ELL_PRIME,
    protocol::PartyId,
    ring_pedersen::VerifiedRingPedersen,
    utils::random_plusminus_by_size,
    zkp::{piaffg, pilog, Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// One direction of an MtA exchange as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct MtaLeg<C: CurveTrait> {
    /// The affine transformation of the receiver's ciphertext
    /// (`a ⊙ K ⊕ enc(beta)`), under the receiver's key.
    pub(crate) d: Ciphertext,
    /// The sender's beta, encrypted under its own key.
    pub(crate) f: Ciphertext,
    /// Proof the same committed multiplier and summand were used throughout.
    pub(crate) proof: piaffg::PiAffgProof<C>,
}

/// The sender's retained half of one MtA exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MtaOutgoing {
    /// The additive mask; the sender's output share is `-beta`.
    pub(crate) beta: BigNumber,
    /// Copy of the `d` ciphertext sent, for later disclosure.
    pub(crate) d: Ciphertext,
    /// Copy of the `f` ciphertext sent, for later disclosure.
    pub(crate) f: Ciphertext,
}

/// The raw ciphertext pair of one MtA exchange, as disclosed during
/// identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MtaRecord {
    pub(crate) d: Ciphertext,
    pub(crate) f: Ciphertext,
}

impl MtaOutgoing {
    pub(crate) fn record(&self) -> MtaRecord {
        MtaRecord {
            d: self.d.clone(),
            f: self.f.clone(),
        }
    }
}

/// The full presign round-two payload for one peer: both MtA legs (nonce
/// product and masked key), the revealed `Γ` point, and the proof binding
/// `Γ` to the round-one `G` ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct MtaPayload<C: CurveTrait> {
    /// MtA leg for `k * gamma`.
    pub(crate) delta: MtaLeg<C>,
    /// MtA leg for `k * w`.
    pub(crate) chi: MtaLeg<C>,
    /// `Γ_i = g^{γ_i}`.
    pub(crate) gamma_point: C,
    /// Log-equality of `gamma_point` with the round-one `G` ciphertext.
    pub(crate) log_proof: pilog::PiLogProof<C>,
}

impl<C: CurveTrait> MtaPayload<C> {
    pub(crate) fn validate_basic(&self) -> Result<()> {
        Ok(())
    }
}

/// Sender side: apply our multiplier to the receiver's ciphertext and build
/// the accompanying proof.
#[allow(clippy::too_many_arguments)]
pub(crate) fn mta_send<C: CurveTrait, R: RngCore + CryptoRng>(
    rng: &mut R,
    context: &impl ProofContext,
    multiplier: &BigNumber,
    multiplier_point: &C,
    receiver_k: &Ciphertext,
    receiver_pk: &EncryptionKey,
    receiver_rped: &VerifiedRingPedersen,
    own_pk: &EncryptionKey,
) -> Result<(MtaLeg<C>, MtaOutgoing)> {
    let beta = random_plusminus_by_size(rng, ELL_PRIME);

    let (beta_ciphertext, d_nonce) = receiver_pk.encrypt(rng, &beta)?;
    let d = receiver_pk.multiply_and_add(multiplier, receiver_k, &beta_ciphertext)?;
    let (f, f_nonce) = own_pk.encrypt(rng, &beta)?;

    let proof = piaffg::PiAffgProof::<C>::prove(
        piaffg::CommonInput::new(
            receiver_rped,
            receiver_pk,
            own_pk,
            receiver_k,
            &d,
            &f,
            multiplier_point,
        ),
        piaffg::ProverSecret::new(multiplier, &beta, &d_nonce, &f_nonce),
        context,
        &mut Transcript::new(b"PiAffgProof"),
        rng,
    )?;

    Ok((
        MtaLeg {
            d: d.clone(),
            f: f.clone(),
            proof,
        },
        MtaOutgoing { beta, d, f },
    ))
}

/// Receiver side: verify the sender's proof against our own parameters and
/// decrypt our additive share. A failed proof names the sender.
#[allow(clippy::too_many_arguments)]
pub(crate) fn mta_receive<C: CurveTrait>(
    context: &impl ProofContext,
    leg: &MtaLeg<C>,
    sender: &PartyId,
    multiplier_point: &C,
    own_k: &Ciphertext,
    own_pk: &EncryptionKey,
    own_sk: &DecryptionKey,
    own_rped: &VerifiedRingPedersen,
    sender_pk: &EncryptionKey,
) -> Result<BigNumber> {
    leg.proof
        .clone()
        .verify(
            piaffg::CommonInput::new(
                own_rped,
                own_pk,
                sender_pk,
                own_k,
                &leg.d,
                &leg.f,
                multiplier_point,
            ),
            context,
            &mut Transcript::new(b"PiAffgProof"),
        )
        .map_err(|_| {
            error!("MtA affine proof failed");
            Error::culprit(sender, "MtA affine proof failed")
        })?;

    own_sk.decrypt(&leg.d).map_err(|_| {
        error!("MtA share failed to decrypt");
        Error::culprit(sender, "MtA share undecryptable")
    })
}

/// The log-equality leg each presign round-two message carries: binds the
/// broadcast `G` ciphertext to the revealed `Γ = g^γ` point.
pub(crate) fn prove_gamma_binding<C: CurveTrait, R: RngCore + CryptoRng>(
    rng: &mut R,
    context: &impl ProofContext,
    gamma: &BigNumber,
    gamma_nonce: &crate::paillier::Nonce,
    g_ciphertext: &Ciphertext,
    gamma_point: &C,
    own_pk: &EncryptionKey,
    verifier_rped: &VerifiedRingPedersen,
) -> Result<pilog::PiLogProof<C>> {
    pilog::PiLogProof::<C>::prove(
        pilog::CommonInput::new(
            verifier_rped,
            own_pk,
            g_ciphertext,
            &C::GENERATOR,
            gamma_point,
        ),
        pilog::ProverSecret::new(gamma, gamma_nonce),
        context,
        &mut Transcript::new(b"PiLogProof"),
        rng,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{ScalarTrait, TestCurve},
        paillier::DecryptionKey,
        parameters::ELL,
        protocol::PartyId,
        utils::{random_plusminus_by_size, testing::init_testing},
    };

    #[test]
    fn mta_produces_additive_shares_of_the_product() {
        let mut rng = init_testing();

        // Receiver holds k inside K.
        let receiver_sk = DecryptionKey::generate(&mut rng).unwrap();
        let receiver_pk = receiver_sk.encryption_key();
        let receiver_rped = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let k = random_plusminus_by_size(&mut rng, ELL);
        let (k_ciphertext, _) = receiver_pk.encrypt(&mut rng, &k).unwrap();

        // Sender holds a multiplier.
        let sender_sk = DecryptionKey::generate(&mut rng).unwrap();
        let sender_pk = sender_sk.encryption_key();
        let a = random_plusminus_by_size(&mut rng, ELL);
        let a_point = TestCurve::scale_generator(&a).unwrap();

        let (leg, outgoing) = mta_send::<TestCurve, _>(
            &mut rng,
            &(),
            &a,
            &a_point,
            &k_ciphertext,
            &receiver_pk,
            &receiver_rped,
            &sender_pk,
        )
        .unwrap();

        let sender_id = PartyId::new("sender", "sender");
        let alpha = mta_receive::<TestCurve>(
            &(),
            &leg,
            &sender_id,
            &a_point,
            &k_ciphertext,
            &receiver_pk,
            &receiver_sk,
            &receiver_rped,
            &sender_pk,
        )
        .unwrap();

        // alpha - beta == a * k over the integers.
        assert_eq!(&alpha - &outgoing.beta, &a * &k);

        // And therefore additively mod q as scalars.
        let order = TestCurve::order();
        let lhs = TestCurve::bn_to_scalar(&alpha.nmod(&order))
            .unwrap()
            .sub(&TestCurve::bn_to_scalar(&outgoing.beta.nmod(&order)).unwrap());
        let rhs = TestCurve::bn_to_scalar(&(&a * &k).nmod(&order)).unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn tampered_leg_names_the_sender() {
        let mut rng = init_testing();

        let receiver_sk = DecryptionKey::generate(&mut rng).unwrap();
        let receiver_pk = receiver_sk.encryption_key();
        let receiver_rped = VerifiedRingPedersen::generate(&mut rng, &()).unwrap();
        let k = random_plusminus_by_size(&mut rng, ELL);
        let (k_ciphertext, _) = receiver_pk.encrypt(&mut rng, &k).unwrap();

        let sender_sk = DecryptionKey::generate(&mut rng).unwrap();
        let sender_pk = sender_sk.encryption_key();
        let a = random_plusminus_by_size(&mut rng, ELL);
        let a_point = TestCurve::scale_generator(&a).unwrap();

        let (mut leg, _) = mta_send::<TestCurve, _>(
            &mut rng,
            &(),
            &a,
            &a_point,
            &k_ciphertext,
            &receiver_pk,
            &receiver_rped,
            &sender_pk,
        )
        .unwrap();

        // Swap the transformation for an unrelated ciphertext.
        let (bogus, _) = receiver_pk
            .encrypt(&mut rng, &BigNumber::from(1u64))
            .unwrap();
        leg.d = bogus;

        let sender_id = PartyId::new("sender", "sender");
        let err = mta_receive::<TestCurve>(
            &(),
            &leg,
            &sender_id,
            &a_point,
            &k_ciphertext,
            &receiver_pk,
            &receiver_sk,
            &receiver_rped,
            &sender_pk,
        )
        .unwrap_err();
        assert_eq!(err.culprit_party(), Some(&sender_id));
    }
}
