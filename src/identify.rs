//! The identification sub-protocol: replay a committed MtA transcript to
//! name the party whose disclosed values are inconsistent.
//!
//! Entered only after an integrity check fails without a single obviously
//! bad proof — the presign output equation `g^δ = Σ Δ_j`, or final
//! signature verification. Each party then discloses, per verifier, the
//! homomorphically combined ciphertext behind its claimed share, the raw
//! MtA records it exchanged, a proof the combination multiplies its own
//! committed ephemeral values (`Mul` for the nonce product, `Mul*` for the
//! masked key), and a proof the combination decrypts to the share it
//! broadcast (`Dec`). An honest verifier recomputes the combination and
//! flags the first party whose disclosure does not hold together. Only
//! per-session randomness is revealed; long-term key shares stay hidden.
//!
//! The presign (delta) and sign (sigma) disputes differ only in the shape
//! of the multiplicative factor and the final claimed value, so both run
//! through the same disclosure type and verification core.

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    mta::MtaRecord,
    paillier::{Ciphertext, DecryptionKey, EncryptionKey},
    protocol::PartyId,
    ring_pedersen::VerifiedRingPedersen,
    round::store_once,
    zkp::{pidec, pimul, pimulstar, Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Proof that the disclosed product ciphertext really multiplies the
/// discloser's committed ephemeral values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) enum MulEvidence<C: CurveTrait> {
    /// Delta dispute: `H = G^k`, both factors ciphertexts of the discloser.
    Product(pimul::PiMulProof<C>),
    /// Sigma dispute: `H = K^w` with `g^w` public.
    KeyProduct(pimulstar::PiMulStarProof<C>),
}

/// One party's transcript disclosure, tailored to a single verifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct Disclosure<C: CurveTrait> {
    /// The discloser's own product ciphertext (`H`).
    pub(crate) product: Ciphertext,
    /// Why `H` is well-formed.
    pub(crate) evidence: MulEvidence<C>,
    /// Why the full combination decrypts to the share the discloser
    /// broadcast earlier.
    pub(crate) dec_proof: pidec::PiDecProof<C>,
    /// MtA records the discloser received, indexed by peer.
    pub(crate) received: Vec<Option<MtaRecord>>,
    /// MtA records the discloser sent, indexed by peer.
    pub(crate) sent: Vec<Option<MtaRecord>>,
}

impl<C: CurveTrait> Disclosure<C> {
    pub(crate) fn validate_basic(&self) -> Result<()> {
        if self.received.len() != self.sent.len() {
            return Err(Error::MalformedMessage("disclosure tables disagree"));
        }
        Ok(())
    }
}

/// Reassemble the combined share ciphertext from a disclosure:
/// `H ⊕ Σ received.d ⊖ Σ sent.f`, all under the discloser's key.
pub(crate) fn combine_disclosed(
    pk: &EncryptionKey,
    product: &Ciphertext,
    received: &[Option<MtaRecord>],
    sent: &[Option<MtaRecord>],
    discloser_index: usize,
) -> Result<Ciphertext> {
    let minus_one = -BigNumber::one();
    let mut combined = product.clone();
    for (j, slot) in received.iter().enumerate() {
        if j == discloser_index {
            continue;
        }
        let record = slot
            .as_ref()
            .ok_or(Error::MalformedMessage("missing received record"))?;
        combined = pk.add(&combined, &record.d)?;
    }
    for (j, slot) in sent.iter().enumerate() {
        if j == discloser_index {
            continue;
        }
        let record = slot
            .as_ref()
            .ok_or(Error::MalformedMessage("missing sent record"))?;
        let negated = pk.multiply(&record.f, &minus_one)?;
        combined = pk.add(&combined, &negated)?;
    }
    Ok(combined)
}

/// Everything the prover computes once, before tailoring per-verifier
/// proofs.
pub(crate) struct DisclosureSecrets<C: CurveTrait> {
    product: Ciphertext,
    product_nonce: crate::paillier::Nonce,
    /// The target ciphertext the `Dec` proof speaks about.
    target: Ciphertext,
    target_plaintext: BigNumber,
    target_nonce: crate::paillier::Nonce,
    claim: C::Scalar,
    received: Vec<Option<MtaRecord>>,
    sent: Vec<Option<MtaRecord>>,
}

/// Prover side of a delta dispute: `H = G^k`, target is the combined delta
/// ciphertext itself.
#[allow(clippy::too_many_arguments)]
pub(crate) fn delta_disclosure_base<C: CurveTrait, R: RngCore + CryptoRng>(
    rng: &mut R,
    own_sk: &DecryptionKey,
    g_ciphertext: &Ciphertext,
    k_plaintext: &BigNumber,
    claim: C::Scalar,
    received: Vec<Option<MtaRecord>>,
    sent: Vec<Option<MtaRecord>>,
    self_index: usize,
) -> Result<DisclosureSecrets<C>> {
    let pk = own_sk.encryption_key();
    let product_nonce =
        crate::paillier::Nonce::from_bn(crate::utils::random_bn_in_z_star(rng, pk.modulus())?);
    let product = {
        let scaled = pk.multiply(g_ciphertext, k_plaintext)?;
        let rerandomizer = pk.encrypt_with_nonce(&BigNumber::zero(), &product_nonce)?;
        pk.add(&scaled, &rerandomizer)?
    };
    let target = combine_disclosed(&pk, &product, &received, &sent, self_index)?;
    let target_plaintext = own_sk.decrypt(&target)?;
    let target_nonce = own_sk.nonce(&target)?;
    Ok(DisclosureSecrets {
        product,
        product_nonce,
        target,
        target_plaintext,
        target_nonce,
        claim,
        received,
        sent,
    })
}

/// Prover side of a sigma dispute: `H = K^w`, target is
/// `m ⊙ K ⊕ r ⊙ (combined chi)`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sigma_disclosure_base<C: CurveTrait, R: RngCore + CryptoRng>(
    rng: &mut R,
    own_sk: &DecryptionKey,
    k_ciphertext: &Ciphertext,
    w_plaintext: &BigNumber,
    digest: &C::Scalar,
    r_x: &C::Scalar,
    claim: C::Scalar,
    received: Vec<Option<MtaRecord>>,
    sent: Vec<Option<MtaRecord>>,
    self_index: usize,
) -> Result<DisclosureSecrets<C>> {
    let pk = own_sk.encryption_key();
    let product_nonce =
        crate::paillier::Nonce::from_bn(crate::utils::random_bn_in_z_star(rng, pk.modulus())?);
    let product = {
        let scaled = pk.multiply(k_ciphertext, w_plaintext)?;
        let rerandomizer = pk.encrypt_with_nonce(&BigNumber::zero(), &product_nonce)?;
        pk.add(&scaled, &rerandomizer)?
    };
    let combined_chi = combine_disclosed(&pk, &product, &received, &sent, self_index)?;
    let target = sigma_target::<C>(&pk, k_ciphertext, &combined_chi, digest, r_x)?;
    let target_plaintext = own_sk.decrypt(&target)?;
    let target_nonce = own_sk.nonce(&target)?;
    Ok(DisclosureSecrets {
        product,
        product_nonce,
        target,
        target_plaintext,
        target_nonce,
        claim,
        received,
        sent,
    })
}

/// The ciphertext a signature share must decrypt from:
/// `m ⊙ K ⊕ r ⊙ enc(chi)`.
fn sigma_target<C: CurveTrait>(
    pk: &EncryptionKey,
    k_ciphertext: &Ciphertext,
    combined_chi: &Ciphertext,
    digest: &C::Scalar,
    r_x: &C::Scalar,
) -> Result<Ciphertext> {
    let masked_digest = pk.multiply(k_ciphertext, &C::scalar_to_bn(digest))?;
    let masked_chi = pk.multiply(combined_chi, &C::scalar_to_bn(r_x))?;
    pk.add(&masked_digest, &masked_chi)
}

impl<C: CurveTrait> DisclosureSecrets<C> {
    /// Build the disclosure for one verifier (delta dispute).
    pub(crate) fn for_delta_verifier<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        context: &impl ProofContext,
        own_sk: &DecryptionKey,
        k_ciphertext: &Ciphertext,
        g_ciphertext: &Ciphertext,
        k_plaintext: &BigNumber,
        verifier_rped: &VerifiedRingPedersen,
    ) -> Result<Disclosure<C>> {
        let pk = own_sk.encryption_key();
        let k_nonce = own_sk.nonce(k_ciphertext)?;
        let mul_proof = pimul::PiMulProof::<C>::prove(
            pimul::CommonInput::new(&pk, k_ciphertext, g_ciphertext, &self.product),
            pimul::ProverSecret::new(k_plaintext, &k_nonce, &self.product_nonce),
            context,
            &mut Transcript::new(b"PiMulProof"),
            rng,
        )?;
        let dec_proof = self.dec_proof(rng, context, &pk, verifier_rped)?;
        Ok(Disclosure {
            product: self.product.clone(),
            evidence: MulEvidence::Product(mul_proof),
            dec_proof,
            received: self.received.clone(),
            sent: self.sent.clone(),
        })
    }

    /// Build the disclosure for one verifier (sigma dispute).
    pub(crate) fn for_sigma_verifier<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        context: &impl ProofContext,
        own_sk: &DecryptionKey,
        k_ciphertext: &Ciphertext,
        w_plaintext: &BigNumber,
        verifier_rped: &VerifiedRingPedersen,
    ) -> Result<Disclosure<C>> {
        let pk = own_sk.encryption_key();
        let mulstar_proof = pimulstar::PiMulStarProof::<C>::prove(
            pimulstar::CommonInput::new(
                verifier_rped,
                &pk,
                k_ciphertext,
                &self.product,
                &C::scale_generator(w_plaintext)?,
            ),
            pimulstar::ProverSecret::new(w_plaintext, &self.product_nonce),
            context,
            &mut Transcript::new(b"PiMulStarProof"),
            rng,
        )?;
        let dec_proof = self.dec_proof(rng, context, &pk, verifier_rped)?;
        Ok(Disclosure {
            product: self.product.clone(),
            evidence: MulEvidence::KeyProduct(mulstar_proof),
            dec_proof,
            received: self.received.clone(),
            sent: self.sent.clone(),
        })
    }

    fn dec_proof<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        context: &impl ProofContext,
        pk: &EncryptionKey,
        verifier_rped: &VerifiedRingPedersen,
    ) -> Result<pidec::PiDecProof<C>> {
        pidec::PiDecProof::<C>::prove(
            pidec::CommonInput::new(verifier_rped, pk, &self.target, &self.claim),
            pidec::ProverSecret::new(&self.target_plaintext, &self.target_nonce),
            context,
            &mut Transcript::new(b"PiDecProof"),
            rng,
        )
    }
}

/// The dispute-specific inputs a verifier brings to one disclosure.
pub(crate) enum DisputeKind<'a, C: CurveTrait> {
    /// Presign output mismatch: the disputed value is a delta share and the
    /// discloser's factor is its own `G` ciphertext.
    Delta { g_ciphertext: &'a Ciphertext },
    /// Signature verification failure: the disputed value is a sigma share
    /// and the discloser's factor is its public masked-key point.
    Sigma {
        w_point: &'a C,
        digest: &'a C::Scalar,
        r_x: &'a C::Scalar,
    },
}

/// Verify one party's disclosure. Any inconsistency names the discloser.
#[allow(clippy::too_many_arguments)]
pub(crate) fn verify_disclosure<C: CurveTrait>(
    context: &impl ProofContext,
    disclosure: &Disclosure<C>,
    discloser: &PartyId,
    discloser_index: usize,
    claim: &C::Scalar,
    k_ciphertext: &Ciphertext,
    discloser_pk: &EncryptionKey,
    own_rped: &VerifiedRingPedersen,
    kind: DisputeKind<'_, C>,
    record_we_sent: &MtaRecord,
    record_we_received: &MtaRecord,
    self_index: usize,
) -> Result<()> {
    // The discloser's account of what passed between us must match our own
    // records; a lie about the transcript is itself the inconsistency.
    let their_received = disclosure.received[self_index]
        .as_ref()
        .ok_or(Error::culprit(discloser, "disclosure omits our exchange"))?;
    let their_sent = disclosure.sent[self_index]
        .as_ref()
        .ok_or(Error::culprit(discloser, "disclosure omits our exchange"))?;
    if their_received != record_we_sent || their_sent != record_we_received {
        error!("disclosed transcript disagrees with our records");
        return Err(Error::culprit(discloser, "disclosed transcript mismatch"));
    }

    // The product ciphertext must really multiply the committed values.
    match (&disclosure.evidence, &kind) {
        (MulEvidence::Product(proof), DisputeKind::Delta { g_ciphertext }) => proof
            .clone()
            .verify(
                pimul::CommonInput::new(
                    discloser_pk,
                    k_ciphertext,
                    g_ciphertext,
                    &disclosure.product,
                ),
                context,
                &mut Transcript::new(b"PiMulProof"),
            )
            .map_err(|_| Error::culprit(discloser, "product proof failed")),
        (MulEvidence::KeyProduct(proof), DisputeKind::Sigma { w_point, .. }) => proof
            .clone()
            .verify(
                pimulstar::CommonInput::new(
                    own_rped,
                    discloser_pk,
                    k_ciphertext,
                    &disclosure.product,
                    w_point,
                ),
                context,
                &mut Transcript::new(b"PiMulStarProof"),
            )
            .map_err(|_| Error::culprit(discloser, "masked-key product proof failed")),
        _ => Err(Error::culprit(discloser, "wrong evidence kind for dispute")),
    }?;

    // Recompute the combination from the disclosed records and check the
    // claimed share is its decryption.
    let combined = combine_disclosed(
        discloser_pk,
        &disclosure.product,
        &disclosure.received,
        &disclosure.sent,
        discloser_index,
    )
    .map_err(|_| Error::culprit(discloser, "disclosure does not combine"))?;
    let target = match &kind {
        DisputeKind::Delta { .. } => combined,
        DisputeKind::Sigma { digest, r_x, .. } => {
            sigma_target::<C>(discloser_pk, k_ciphertext, &combined, digest, r_x)
                .map_err(|_| Error::culprit(discloser, "disclosure does not combine"))?
        }
    };
    disclosure
        .dec_proof
        .clone()
        .verify(
            pidec::CommonInput::new(own_rped, discloser_pk, &target, claim),
            context,
            &mut Transcript::new(b"PiDecProof"),
        )
        .map_err(|_| {
            error!("claimed share is not the decryption of the combined transcript");
            Error::culprit(discloser, "share disagrees with committed transcript")
        })
}

/// Store a disclosure slot, with the usual duplicate policy.
pub(crate) fn store_disclosure<C: CurveTrait>(
    slot: &mut Option<Disclosure<C>>,
    disclosure: Disclosure<C>,
    sender: &PartyId,
    expected_parties: usize,
) -> Result<()> {
    if disclosure.received.len() != expected_parties {
        return Err(Error::culprit(sender, "disclosure has wrong table size"));
    }
    store_once(slot, disclosure, sender)
}
