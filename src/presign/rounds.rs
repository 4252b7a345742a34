//! The four-round presigning machine, plus its identification sub-phase.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{Error, Result},
    identify::{
        delta_disclosure_base, store_disclosure, verify_disclosure, Disclosure, DisputeKind,
    },
    keygen::SaveData,
    messages::{Content, Message, Phase},
    mta::{mta_receive, mta_send, prove_gamma_binding, MtaOutgoing, MtaPayload, MtaRecord},
    paillier::{Ciphertext, EncryptionKey, Nonce},
    presign::{PreSignature, PresignTranscript},
    protocol::{Parameters, PartyId, SharedContext},
    ring_pedersen::VerifiedRingPedersen,
    round::{merge_verification_results, store_once, OkVector, Round, Transition},
    vss::lagrange_coefficient_at_zero,
    zkp::{pienc, pilog, Proof},
};
use libpaillier::unknown_order::BigNumber;
use std::marker::PhantomData;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Round-one broadcast: the two ephemeral ciphertexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PresignCiphertexts {
    /// Encryption of the nonce share `k`.
    pub(crate) k: Ciphertext,
    /// Encryption of the exponent share `γ`.
    pub(crate) g: Ciphertext,
}

impl PresignCiphertexts {
    pub(crate) fn validate_basic(&self) -> Result<()> {
        Ok(())
    }
}

/// Round-one direct message: the range proof for `K`, tailored to one
/// verifier's commitment parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PresignRangeProof<C: CurveTrait> {
    pub(crate) proof: pienc::PiEncProof<C>,
}

/// Round-three direct message: the delta share, its point form, and the
/// consistency proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct DeltaReveal<C: CurveTrait> {
    pub(crate) delta_share: C::Scalar,
    pub(crate) big_delta: C,
    pub(crate) log_proof: pilog::PiLogProof<C>,
}

/// The signing quorum's view of the key material: Lagrange-prepared shares
/// and per-member public tables, quorum-ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct QuorumView<C: CurveTrait> {
    /// Our Lagrange-scaled key share `w = λ·x`.
    pub(crate) w_share: C::Scalar,
    /// Every member's masked-key point `W_j = X_j^{λ_j}`.
    pub(crate) big_w: Vec<C>,
    pub(crate) pks: Vec<EncryptionKey>,
    pub(crate) rpeds: Vec<VerifiedRingPedersen>,
}

impl<C: CurveTrait> QuorumView<C> {
    /// Map the signing quorum onto the key-generation committee and prepare
    /// the threshold-interpolated shares.
    pub(crate) fn build(params: &Parameters<C>, save: &SaveData<C>) -> Result<Self> {
        save.validate(save.committee.size())?;
        if params.n() < save.committee.threshold() + 1 {
            return Err(Error::BadInput("quorum smaller than threshold"));
        }

        let keygen_indices: Vec<usize> = params
            .committee()
            .parties()
            .iter()
            .map(|party| {
                save.committee
                    .index_of(party)
                    .ok_or(Error::BadInput("quorum member not a key holder"))
            })
            .collect::<Result<_>>()?;
        let points: Vec<C::Scalar> = keygen_indices.iter().map(|&i| save.ks[i]).collect();

        let mut big_w = Vec::with_capacity(params.n());
        for (quorum_index, &keygen_index) in keygen_indices.iter().enumerate() {
            let lambda = lagrange_coefficient_at_zero::<C>(&points[quorum_index], &points)?;
            big_w.push(save.big_x[keygen_index].mul(&lambda));
        }

        let own_lambda = lagrange_coefficient_at_zero::<C>(
            &points[params.self_index()],
            &points,
        )?;
        let w_share = own_lambda.mul(&save.xi);

        // The interpolated commitments must re-assemble the public key.
        let total = big_w
            .iter()
            .fold(C::IDENTITY, |acc, w| acc + *w);
        if total != save.public_key_point {
            return Err(Error::BadInput("quorum does not reconstruct the public key"));
        }

        Ok(Self {
            w_share,
            big_w,
            pks: keygen_indices
                .iter()
                .map(|&i| save.paillier_pks[i].clone())
                .collect(),
            rpeds: keygen_indices
                .iter()
                .map(|&i| save.rped[i].clone())
                .collect(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum PresignRound {
    Round1,
    Round2,
    Round3,
    Output,
    Identify1,
    Identify2,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct PresignTemp<C: CurveTrait> {
    k: Option<BigNumber>,
    gamma: Option<BigNumber>,
    k_nonce: Option<Nonce>,
    gamma_nonce: Option<Nonce>,
    gamma_point: Option<C>,
    r1_ciphertexts: Vec<Option<PresignCiphertexts>>,
    r1_proofs: Vec<Option<PresignRangeProof<C>>>,
    r2: Vec<Option<MtaPayload<C>>>,
    delta_outgoing: Vec<Option<MtaOutgoing>>,
    chi_outgoing: Vec<Option<MtaOutgoing>>,
    delta_alphas: Vec<Option<BigNumber>>,
    chi_alphas: Vec<Option<BigNumber>>,
    r3: Vec<Option<DeltaReveal<C>>>,
    gamma_sum: Option<C>,
    delta_share: Option<C::Scalar>,
    chi_share: Option<C::Scalar>,
    big_delta: Option<C>,
    delta_consistent: Option<bool>,
    disclosures: Vec<Option<Disclosure<C>>>,
}

impl<C: CurveTrait> PresignTemp<C> {
    fn new(n: usize) -> Self {
        Self {
            k: None,
            gamma: None,
            k_nonce: None,
            gamma_nonce: None,
            gamma_point: None,
            r1_ciphertexts: vec![None; n],
            r1_proofs: vec![None; n],
            r2: vec![None; n],
            delta_outgoing: vec![None; n],
            chi_outgoing: vec![None; n],
            delta_alphas: vec![None; n],
            chi_alphas: vec![None; n],
            r3: vec![None; n],
            gamma_sum: None,
            delta_share: None,
            chi_share: None,
            big_delta: None,
            delta_consistent: None,
            disclosures: vec![None; n],
        }
    }
}

/// The presigning machine. Completes with a [`PreSignature`], or aborts
/// naming a culprit.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct Presign<C: CurveTrait> {
    params: Parameters<C>,
    save: SaveData<C>,
    view: QuorumView<C>,
    retain_transcript: bool,
    round: PresignRound,
    started: bool,
    ok: OkVector,
    temp: PresignTemp<C>,
}

impl<C: CurveTrait> Presign<C> {
    /// Set up a presigning run for a quorum of key holders.
    ///
    /// `retain_transcript` keeps the exchanged ciphertexts inside the
    /// resulting [`PreSignature`], which is what later makes sign-time
    /// identification possible.
    pub fn new(
        params: Parameters<C>,
        save: SaveData<C>,
        retain_transcript: bool,
    ) -> Result<Self> {
        let view = QuorumView::build(&params, &save)?;
        let n = params.n();
        let self_index = params.self_index();
        Ok(Self {
            params,
            save,
            view,
            retain_transcript,
            round: PresignRound::Round1,
            started: false,
            ok: OkVector::with_exempt(n, [self_index]),
            temp: PresignTemp::new(n),
        })
    }

    /// Checkpoint the machine for resumption.
    pub fn dump(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Rebuild a machine from a checkpoint.
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }

    fn context(&self) -> SharedContext {
        SharedContext::new::<C>(
            b"presign",
            self.save.ssid().as_bytes(),
            self.params.committee(),
        )
    }

    fn reset_for_next_round(&mut self, round: PresignRound) {
        self.round = round;
        self.started = false;
        self.ok = OkVector::with_exempt(self.params.n(), [self.params.self_index()]);
    }

    fn own_pk(&self) -> &EncryptionKey {
        &self.view.pks[self.params.self_index()]
    }

    fn own_rped(&self) -> &VerifiedRingPedersen {
        &self.view.rpeds[self.params.self_index()]
    }

    fn own_ciphertexts(&self) -> Result<&PresignCiphertexts> {
        self.temp.r1_ciphertexts[self.params.self_index()]
            .as_ref()
            .ok_or(Error::LocalFailure("own ciphertexts missing"))
    }

    #[instrument(skip_all)]
    fn start_round_one<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        info!("presign: sampling ephemeral shares");
        let order = C::order();
        let context = self.context();

        let k = crate::utils::random_positive_bn(rng, &order);
        let gamma = crate::utils::random_positive_bn(rng, &order);
        let (k_ciphertext, k_nonce) = self.own_pk().encrypt(rng, &k)?;
        let (g_ciphertext, gamma_nonce) = self.own_pk().encrypt(rng, &gamma)?;
        let gamma_point = C::scale_generator(&gamma)?;

        let ciphertexts = PresignCiphertexts {
            k: k_ciphertext.clone(),
            g: g_ciphertext,
        };
        self.temp.r1_ciphertexts[self.params.self_index()] = Some(ciphertexts.clone());

        let mut messages = vec![Message::broadcast(
            self.params.self_id().clone(),
            Content::PresignRound1Broadcast(ciphertexts),
        )];
        for j in self.params.other_indices() {
            let proof = pienc::PiEncProof::<C>::prove(
                pienc::CommonInput::new(&self.view.rpeds[j], self.own_pk(), &k_ciphertext),
                pienc::ProverSecret::new(&k, &k_nonce),
                &context,
                &mut Transcript::new(b"PiEncProof"),
                rng,
            )?;
            messages.push(Message::direct(
                self.params.self_id().clone(),
                self.params.party(j)?.clone(),
                Content::PresignRound1Proof(PresignRangeProof { proof }),
            ));
        }

        self.temp.k = Some(k);
        self.temp.gamma = Some(gamma);
        self.temp.k_nonce = Some(k_nonce);
        self.temp.gamma_nonce = Some(gamma_nonce);
        self.temp.gamma_point = Some(gamma_point);
        Ok(messages)
    }

    fn verify_round_one(&self, j: usize) -> Result<()> {
        let sender = self.params.party(j)?;
        let ciphertexts = self.temp.r1_ciphertexts[j]
            .as_ref()
            .ok_or(Error::LocalFailure("round-one ciphertexts missing"))?;
        let proof = self.temp.r1_proofs[j]
            .as_ref()
            .ok_or(Error::LocalFailure("round-one proof missing"))?;
        proof
            .proof
            .clone()
            .verify(
                pienc::CommonInput::new(self.own_rped(), &self.view.pks[j], &ciphertexts.k),
                &self.context(),
                &mut Transcript::new(b"PiEncProof"),
            )
            .map_err(|_| Error::culprit(sender, "nonce-share range proof failed"))
    }

    #[instrument(skip_all)]
    fn start_round_two<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        info!("presign: running MtA exchanges");
        let context = self.context();
        let gamma = self
            .temp
            .gamma
            .clone()
            .ok_or(Error::LocalFailure("gamma missing"))?;
        let gamma_nonce = self
            .temp
            .gamma_nonce
            .clone()
            .ok_or(Error::LocalFailure("gamma nonce missing"))?;
        let gamma_point = self
            .temp
            .gamma_point
            .ok_or(Error::LocalFailure("gamma point missing"))?;
        let w_bn = C::scalar_to_bn(&self.view.w_share);
        let own_w_point = self.view.big_w[self.params.self_index()];
        let own_g = self.own_ciphertexts()?.g.clone();

        let mut messages = Vec::with_capacity(self.params.n() - 1);
        for j in self.params.other_indices() {
            let peer_k = &self.temp.r1_ciphertexts[j]
                .as_ref()
                .ok_or(Error::LocalFailure("peer ciphertexts missing"))?
                .k;

            let (delta_leg, delta_outgoing) = mta_send::<C, _>(
                rng,
                &context,
                &gamma,
                &gamma_point,
                peer_k,
                &self.view.pks[j],
                &self.view.rpeds[j],
                self.own_pk(),
            )?;
            let (chi_leg, chi_outgoing) = mta_send::<C, _>(
                rng,
                &context,
                &w_bn,
                &own_w_point,
                peer_k,
                &self.view.pks[j],
                &self.view.rpeds[j],
                self.own_pk(),
            )?;
            let log_proof = prove_gamma_binding(
                rng,
                &context,
                &gamma,
                &gamma_nonce,
                &own_g,
                &gamma_point,
                self.own_pk(),
                &self.view.rpeds[j],
            )?;

            self.temp.delta_outgoing[j] = Some(delta_outgoing);
            self.temp.chi_outgoing[j] = Some(chi_outgoing);
            messages.push(Message::direct(
                self.params.self_id().clone(),
                self.params.party(j)?.clone(),
                Content::PresignRound2(MtaPayload {
                    delta: delta_leg,
                    chi: chi_leg,
                    gamma_point,
                    log_proof,
                }),
            ));
        }
        Ok(messages)
    }

    fn verify_round_two(&self, j: usize) -> Result<(BigNumber, BigNumber)> {
        let sender = self.params.party(j)?;
        let context = self.context();
        let payload = self.temp.r2[j]
            .as_ref()
            .ok_or(Error::LocalFailure("round-two payload missing"))?;
        let peer_ciphertexts = self.temp.r1_ciphertexts[j]
            .as_ref()
            .ok_or(Error::LocalFailure("peer ciphertexts missing"))?;
        let own_k = &self.own_ciphertexts()?.k;

        payload
            .log_proof
            .clone()
            .verify(
                pilog::CommonInput::new(
                    self.own_rped(),
                    &self.view.pks[j],
                    &peer_ciphertexts.g,
                    &C::GENERATOR,
                    &payload.gamma_point,
                ),
                &context,
                &mut Transcript::new(b"PiLogProof"),
            )
            .map_err(|_| Error::culprit(sender, "gamma binding proof failed"))?;

        let delta_alpha = mta_receive::<C>(
            &context,
            &payload.delta,
            sender,
            &payload.gamma_point,
            own_k,
            self.own_pk(),
            &self.save.paillier_sk,
            self.own_rped(),
            &self.view.pks[j],
        )?;
        let chi_alpha = mta_receive::<C>(
            &context,
            &payload.chi,
            sender,
            &self.view.big_w[j],
            own_k,
            self.own_pk(),
            &self.save.paillier_sk,
            self.own_rped(),
            &self.view.pks[j],
        )?;
        Ok((delta_alpha, chi_alpha))
    }

    #[instrument(skip_all)]
    fn start_round_three<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message<C>>> {
        info!("presign: accumulating shares");
        let context = self.context();
        let order = C::order();
        let k = self
            .temp
            .k
            .clone()
            .ok_or(Error::LocalFailure("k missing"))?;
        let k_nonce = self
            .temp
            .k_nonce
            .clone()
            .ok_or(Error::LocalFailure("k nonce missing"))?;
        let gamma = self
            .temp
            .gamma
            .clone()
            .ok_or(Error::LocalFailure("gamma missing"))?;

        // Γ = Σ Γ_j over the whole quorum.
        let mut gamma_sum = self
            .temp
            .gamma_point
            .ok_or(Error::LocalFailure("gamma point missing"))?;
        for j in self.params.other_indices() {
            let payload = self.temp.r2[j]
                .as_ref()
                .ok_or(Error::LocalFailure("round-two payload missing"))?;
            gamma_sum = gamma_sum + payload.gamma_point;
        }

        // δ_i = k·γ + Σ (α - β); χ_i = k·w + Σ (α̂ - β̂).
        let mut delta = C::bn_to_scalar(&k.modmul(&gamma, &order))?;
        let k_scalar = C::bn_to_scalar(&k)?;
        let mut chi = k_scalar.mul(&self.view.w_share);
        for j in self.params.other_indices() {
            let alpha = self.temp.delta_alphas[j]
                .as_ref()
                .ok_or(Error::LocalFailure("delta share missing"))?;
            let beta = &self.temp.delta_outgoing[j]
                .as_ref()
                .ok_or(Error::LocalFailure("delta mask missing"))?
                .beta;
            delta = delta.add(&C::bn_to_scalar(alpha)?).sub(&C::bn_to_scalar(beta)?);

            let alpha_hat = self.temp.chi_alphas[j]
                .as_ref()
                .ok_or(Error::LocalFailure("chi share missing"))?;
            let beta_hat = &self.temp.chi_outgoing[j]
                .as_ref()
                .ok_or(Error::LocalFailure("chi mask missing"))?
                .beta;
            chi = chi
                .add(&C::bn_to_scalar(alpha_hat)?)
                .sub(&C::bn_to_scalar(beta_hat)?);
        }

        let big_delta = gamma_sum.multiply_by_bignum(&k)?;
        let own_k_ciphertext = self.own_ciphertexts()?.k.clone();

        let mut messages = Vec::with_capacity(self.params.n() - 1);
        for j in self.params.other_indices() {
            let log_proof = pilog::PiLogProof::<C>::prove(
                pilog::CommonInput::new(
                    &self.view.rpeds[j],
                    self.own_pk(),
                    &own_k_ciphertext,
                    &gamma_sum,
                    &big_delta,
                ),
                pilog::ProverSecret::new(&k, &k_nonce),
                &context,
                &mut Transcript::new(b"PiLogProof"),
                rng,
            )?;
            messages.push(Message::direct(
                self.params.self_id().clone(),
                self.params.party(j)?.clone(),
                Content::PresignRound3(DeltaReveal {
                    delta_share: delta,
                    big_delta,
                    log_proof,
                }),
            ));
        }

        // Our own reveal, for the output-round accumulation.
        let own_log_proof = pilog::PiLogProof::<C>::prove(
            pilog::CommonInput::new(
                self.own_rped(),
                self.own_pk(),
                &own_k_ciphertext,
                &gamma_sum,
                &big_delta,
            ),
            pilog::ProverSecret::new(&k, &k_nonce),
            &context,
            &mut Transcript::new(b"PiLogProof"),
            rng,
        )?;
        self.temp.r3[self.params.self_index()] = Some(DeltaReveal {
            delta_share: delta,
            big_delta,
            log_proof: own_log_proof,
        });

        self.temp.gamma_sum = Some(gamma_sum);
        self.temp.delta_share = Some(delta);
        self.temp.chi_share = Some(chi);
        self.temp.big_delta = Some(big_delta);
        Ok(messages)
    }

    fn verify_round_three(&self, j: usize) -> Result<()> {
        let sender = self.params.party(j)?;
        let reveal = self.temp.r3[j]
            .as_ref()
            .ok_or(Error::LocalFailure("round-three reveal missing"))?;
        let peer_ciphertexts = self.temp.r1_ciphertexts[j]
            .as_ref()
            .ok_or(Error::LocalFailure("peer ciphertexts missing"))?;
        let gamma_sum = self
            .temp
            .gamma_sum
            .ok_or(Error::LocalFailure("gamma sum missing"))?;
        reveal
            .log_proof
            .clone()
            .verify(
                pilog::CommonInput::new(
                    self.own_rped(),
                    &self.view.pks[j],
                    &peer_ciphertexts.k,
                    &gamma_sum,
                    &reveal.big_delta,
                ),
                &self.context(),
                &mut Transcript::new(b"PiLogProof"),
            )
            .map_err(|_| Error::culprit(sender, "delta consistency proof failed"))
    }

    /// The output-round integrity check: `g^δ == Σ Δ_j`.
    fn check_delta_consistency(&mut self) -> Result<bool> {
        if let Some(consistent) = self.temp.delta_consistent {
            return Ok(consistent);
        }
        let mut delta_total = C::Scalar::zero();
        let mut big_delta_total = C::IDENTITY;
        for slot in &self.temp.r3 {
            let reveal = slot
                .as_ref()
                .ok_or(Error::LocalFailure("missing delta reveal"))?;
            delta_total = delta_total.add(&reveal.delta_share);
            big_delta_total = big_delta_total + reveal.big_delta;
        }
        let consistent = C::GENERATOR.mul(&delta_total) == big_delta_total;
        if !consistent {
            warn!("presign: delta mismatch; escalating to identification");
        }
        self.temp.delta_consistent = Some(consistent);
        Ok(consistent)
    }

    fn assemble_presignature(&mut self) -> Result<PreSignature<C>> {
        let mut delta_total = C::Scalar::zero();
        for slot in &self.temp.r3 {
            let reveal = slot
                .as_ref()
                .ok_or(Error::LocalFailure("missing delta reveal"))?;
            delta_total = delta_total.add(&reveal.delta_share);
        }
        let delta_inverse = delta_total
            .invert()
            .ok_or(Error::LocalFailure("delta sum is zero"))?;
        let gamma_sum = self
            .temp
            .gamma_sum
            .ok_or(Error::LocalFailure("gamma sum missing"))?;
        let big_r = gamma_sum.mul(&delta_inverse);

        let k = self
            .temp
            .k
            .clone()
            .ok_or(Error::LocalFailure("k missing"))?;
        let transcript = if self.retain_transcript {
            Some(PresignTranscript {
                k_ciphertexts: self
                    .temp
                    .r1_ciphertexts
                    .iter()
                    .map(|slot| {
                        slot.as_ref()
                            .map(|c| c.k.clone())
                            .ok_or(Error::LocalFailure("missing ciphertext"))
                    })
                    .collect::<Result<_>>()?,
                chi_received: self
                    .temp
                    .r2
                    .iter()
                    .map(|slot| {
                        slot.as_ref().map(|payload| MtaRecord {
                            d: payload.chi.d.clone(),
                            f: payload.chi.f.clone(),
                        })
                    })
                    .collect(),
                chi_sent: self
                    .temp
                    .chi_outgoing
                    .iter()
                    .map(|slot| slot.as_ref().map(MtaOutgoing::record))
                    .collect(),
                curve: PhantomData,
            })
        } else {
            None
        };

        info!("presign: complete");
        Ok(PreSignature {
            ssid: self.save.ssid(),
            big_r,
            k_share: C::bn_to_scalar(&k)?,
            chi_share: self
                .temp
                .chi_share
                .ok_or(Error::LocalFailure("chi share missing"))?,
            transcript,
        })
    }

    #[instrument(skip_all)]
    fn start_identification<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message<C>>> {
        info!("presign: disclosing transcript for identification");
        let context = self.context();
        let self_index = self.params.self_index();
        let own = self.own_ciphertexts()?;
        let own_k_ciphertext = own.k.clone();
        let own_g_ciphertext = own.g.clone();
        let k = self
            .temp
            .k
            .clone()
            .ok_or(Error::LocalFailure("k missing"))?;
        let claim = self
            .temp
            .delta_share
            .ok_or(Error::LocalFailure("delta share missing"))?;

        let received: Vec<Option<MtaRecord>> = self
            .temp
            .r2
            .iter()
            .map(|slot| {
                slot.as_ref().map(|payload| MtaRecord {
                    d: payload.delta.d.clone(),
                    f: payload.delta.f.clone(),
                })
            })
            .collect();
        let sent: Vec<Option<MtaRecord>> = self
            .temp
            .delta_outgoing
            .iter()
            .map(|slot| slot.as_ref().map(MtaOutgoing::record))
            .collect();

        let base = delta_disclosure_base::<C, _>(
            rng,
            &self.save.paillier_sk,
            &own_g_ciphertext,
            &k,
            claim,
            received,
            sent,
            self_index,
        )?;

        let mut messages = Vec::with_capacity(self.params.n() - 1);
        for j in self.params.other_indices() {
            let disclosure = base.for_delta_verifier(
                rng,
                &context,
                &self.save.paillier_sk,
                &own_k_ciphertext,
                &own_g_ciphertext,
                &k,
                &self.view.rpeds[j],
            )?;
            messages.push(Message::direct(
                self.params.self_id().clone(),
                self.params.party(j)?.clone(),
                Content::PresignIdentify(disclosure),
            ));
        }
        Ok(messages)
    }

    fn verify_identification(&self, j: usize) -> Result<()> {
        let sender = self.params.party(j)?;
        let disclosure = self.temp.disclosures[j]
            .as_ref()
            .ok_or(Error::LocalFailure("disclosure missing"))?;
        let peer_ciphertexts = self.temp.r1_ciphertexts[j]
            .as_ref()
            .ok_or(Error::LocalFailure("peer ciphertexts missing"))?;
        let claim = self.temp.r3[j]
            .as_ref()
            .ok_or(Error::LocalFailure("peer reveal missing"))?
            .delta_share;
        let record_we_sent = self.temp.delta_outgoing[j]
            .as_ref()
            .ok_or(Error::LocalFailure("own outgoing record missing"))?
            .record();
        let payload = self.temp.r2[j]
            .as_ref()
            .ok_or(Error::LocalFailure("round-two payload missing"))?;
        let record_we_received = MtaRecord {
            d: payload.delta.d.clone(),
            f: payload.delta.f.clone(),
        };

        verify_disclosure::<C>(
            &self.context(),
            disclosure,
            sender,
            j,
            &claim,
            &peer_ciphertexts.k,
            &self.view.pks[j],
            self.own_rped(),
            DisputeKind::Delta {
                g_ciphertext: &peer_ciphertexts.g,
            },
            &record_we_sent,
            &record_we_received,
            self.params.self_index(),
        )
    }
}

impl<C: CurveTrait> Round<C> for Presign<C> {
    type Output = PreSignature<C>;

    fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        if self.started {
            return Err(Error::LocalFailure("round already started"));
        }
        self.started = true;
        match self.round {
            PresignRound::Round1 => self.start_round_one(rng),
            PresignRound::Round2 => self.start_round_two(rng),
            PresignRound::Round3 => self.start_round_three(rng),
            PresignRound::Output => Ok(Vec::new()),
            PresignRound::Identify1 => self.start_identification(rng),
            PresignRound::Identify2 => Ok(Vec::new()),
        }
    }

    fn can_accept(&self, message: &Message<C>) -> bool {
        message.validate_basic().is_ok()
            && message.content().phase() == Phase::Presign
            && message.is_for(self.params.self_id())
            && message.from() != self.params.self_id()
            && self.params.committee().contains(message.from())
    }

    fn store_message(&mut self, message: Message<C>) -> Result<()> {
        let sender = message.from().clone();
        let j = self
            .params
            .committee()
            .index_of(&sender)
            .ok_or(Error::MalformedMessage("sender not in quorum"))?;
        match message.into_content() {
            Content::PresignRound1Broadcast(payload) => {
                store_once(&mut self.temp.r1_ciphertexts[j], payload, &sender)
            }
            Content::PresignRound1Proof(payload) => {
                store_once(&mut self.temp.r1_proofs[j], payload, &sender)
            }
            Content::PresignRound2(payload) => store_once(&mut self.temp.r2[j], payload, &sender),
            Content::PresignRound3(payload) => store_once(&mut self.temp.r3[j], payload, &sender),
            Content::PresignIdentify(disclosure) => store_disclosure(
                &mut self.temp.disclosures[j],
                disclosure,
                &sender,
                self.params.n(),
            ),
            _ => Err(Error::MalformedMessage("not a presign message")),
        }
    }

    fn update(&mut self) -> Result<bool> {
        match self.round {
            PresignRound::Round1 => {
                let pending: Vec<usize> = self
                    .params
                    .other_indices()
                    .filter(|&j| {
                        !self.ok.is_marked(j)
                            && self.temp.r1_ciphertexts[j].is_some()
                            && self.temp.r1_proofs[j].is_some()
                    })
                    .collect();
                let results: Vec<(usize, Result<()>)> = pending
                    .par_iter()
                    .map(|&j| (j, self.verify_round_one(j)))
                    .collect();
                for (j, ()) in merge_verification_results(results)? {
                    self.ok.mark(j);
                }
            }
            PresignRound::Round2 => {
                let pending: Vec<usize> = self
                    .params
                    .other_indices()
                    .filter(|&j| !self.ok.is_marked(j) && self.temp.r2[j].is_some())
                    .collect();
                let results: Vec<(usize, Result<(BigNumber, BigNumber)>)> = pending
                    .par_iter()
                    .map(|&j| (j, self.verify_round_two(j)))
                    .collect();
                for (j, (delta_alpha, chi_alpha)) in merge_verification_results(results)? {
                    self.temp.delta_alphas[j] = Some(delta_alpha);
                    self.temp.chi_alphas[j] = Some(chi_alpha);
                    self.ok.mark(j);
                }
            }
            PresignRound::Round3 => {
                let pending: Vec<usize> = self
                    .params
                    .other_indices()
                    .filter(|&j| !self.ok.is_marked(j) && self.temp.r3[j].is_some())
                    .collect();
                let results: Vec<(usize, Result<()>)> = pending
                    .par_iter()
                    .map(|&j| (j, self.verify_round_three(j)))
                    .collect();
                for (j, ()) in merge_verification_results(results)? {
                    self.ok.mark(j);
                }
            }
            PresignRound::Output => {
                // Everything needed is already in; the consistency check
                // itself decides which way next_round goes.
                self.check_delta_consistency()?;
            }
            PresignRound::Identify1 => {
                for j in self.params.other_indices() {
                    if self.temp.disclosures[j].is_some() {
                        self.ok.mark(j);
                    }
                }
            }
            PresignRound::Identify2 => {
                let pending: Vec<usize> = self
                    .params
                    .other_indices()
                    .filter(|&j| !self.ok.is_marked(j) && self.temp.disclosures[j].is_some())
                    .collect();
                let results: Vec<(usize, Result<()>)> = pending
                    .par_iter()
                    .map(|&j| (j, self.verify_identification(j)))
                    .collect();
                for (j, ()) in merge_verification_results(results)? {
                    self.ok.mark(j);
                }
            }
        }
        Ok(self.can_proceed())
    }

    fn can_proceed(&self) -> bool {
        self.started && self.ok.all_marked()
    }

    fn waiting_for(&self) -> Vec<PartyId> {
        self.ok
            .missing()
            .iter()
            .filter_map(|&j| self.params.party(j).ok().cloned())
            .collect()
    }

    fn next_round<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
    ) -> Result<Transition<Self::Output>> {
        if !self.can_proceed() {
            return Err(Error::LocalFailure("round is not complete"));
        }
        match self.round {
            PresignRound::Round1 => {
                self.reset_for_next_round(PresignRound::Round2);
                Ok(Transition::Continue)
            }
            PresignRound::Round2 => {
                self.reset_for_next_round(PresignRound::Round3);
                Ok(Transition::Continue)
            }
            PresignRound::Round3 => {
                self.reset_for_next_round(PresignRound::Output);
                // The output round consumes nothing new; it only checks.
                self.ok = OkVector::with_exempt(self.params.n(), 0..self.params.n());
                Ok(Transition::Continue)
            }
            PresignRound::Output => {
                if self.check_delta_consistency()? {
                    Ok(Transition::Complete(self.assemble_presignature()?))
                } else {
                    // Every intermediate value is committed and replayable;
                    // name the culprit instead of aborting blind.
                    self.reset_for_next_round(PresignRound::Identify1);
                    Ok(Transition::Continue)
                }
            }
            PresignRound::Identify1 => {
                self.reset_for_next_round(PresignRound::Identify2);
                Ok(Transition::Continue)
            }
            PresignRound::Identify2 => {
                // Every peer's disclosure checked out, so the inconsistency
                // is not attributable; treat it as our own failure.
                Err(Error::LocalFailure(
                    "identification did not locate a culprit",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        errors::Error,
        protocol::testing::random_committee,
        round::Session,
        sim::{deliver_all, run_keygen, run_to_completion},
        utils::testing::init_testing,
    };
    use itertools::Itertools;
    use rand::Rng;
    use std::collections::HashMap;

    type PresignSession = Session<TestCurve, Presign<TestCurve>>;
    type Scalar = <TestCurve as CurveTrait>::Scalar;

    fn presign_sessions(
        committee: &crate::protocol::Committee,
        saves: &[SaveData<TestCurve>],
        retain: bool,
    ) -> Vec<PresignSession> {
        committee
            .parties()
            .iter()
            .zip(saves.iter())
            .map(|(id, save)| {
                let params = Parameters::new(committee.clone(), id).unwrap();
                Session::new(Presign::new(params, save.clone(), retain).unwrap())
            })
            .collect()
    }

    #[test]
    fn presign_produces_valid_presignatures() -> Result<()> {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let saves = run_keygen(&committee, &mut rng)?;
        let ids: Vec<PartyId> = committee.parties().to_vec();

        let mut sessions = presign_sessions(&committee, &saves, true);
        run_to_completion(&mut sessions, &ids, &mut rng)?;
        let outputs: Vec<PreSignature<TestCurve>> = sessions
            .iter_mut()
            .map(|s| s.take_output().unwrap())
            .collect();

        // Everyone agrees on the nonce point and session binding.
        assert!(outputs.iter().map(|o| o.big_r).all_equal());
        assert!(outputs.iter().map(|o| o.ssid()).all_equal());
        assert_eq!(outputs[0].ssid(), saves[0].ssid());
        assert!(outputs.iter().all(|o| o.has_transcript()));

        // R = g^(1/k) for k the sum of the nonce shares: R^k == g.
        let k_total = outputs
            .iter()
            .fold(Scalar::zero(), |acc, o| acc.add(&o.k_share));
        assert_eq!(outputs[0].big_r.mul(&k_total), TestCurve::GENERATOR);

        // The chi shares sum to k times the secret key.
        let secret = crate::vss::reconstruct_at_zero::<TestCurve>(
            &saves.iter().map(|s| (s.share_id, s.xi)).collect::<Vec<_>>(),
        )
        .unwrap();
        let chi_total = outputs
            .iter()
            .fold(Scalar::zero(), |acc, o| acc.add(&o.chi_share));
        assert_eq!(chi_total, k_total.mul(&secret));
        Ok(())
    }

    #[test]
    fn corrupted_mta_proof_names_the_culprit() {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let saves = run_keygen(&committee, &mut rng).unwrap();
        let ids: Vec<PartyId> = committee.parties().to_vec();
        let mut sessions = presign_sessions(&committee, &saves, false);

        let mut inboxes: HashMap<PartyId, Vec<Message<TestCurve>>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        for session in sessions.iter_mut() {
            session.initialize(&mut rng).unwrap();
        }
        for session in sessions.iter_mut() {
            deliver_all(session.outbound(), &mut inboxes);
        }

        // Drive until somebody errors, swapping the affine proofs inside
        // every round-two payload party 2 sends. The mismatched proof must
        // be detected and blamed on party 2.
        let culprit = ids[2].clone();
        let mut blamed = None;
        'outer: for _ in 0..100_000 {
            let index = rng.gen_range(0..sessions.len());
            let inbox = inboxes.get_mut(&ids[index]).unwrap();
            if inbox.is_empty() || sessions[index].is_complete() {
                continue;
            }
            let mut message = inbox.remove(rng.gen_range(0..inbox.len()));
            if message.from() == &culprit {
                if let Content::PresignRound2(payload) = message.content() {
                    let mut corrupted = payload.clone();
                    std::mem::swap(&mut corrupted.delta.proof, &mut corrupted.chi.proof);
                    message = Message::direct(
                        culprit.clone(),
                        ids[index].clone(),
                        Content::PresignRound2(corrupted),
                    );
                }
            }
            match sessions[index].handle_message(&mut rng, message) {
                Ok(()) => deliver_all(sessions[index].outbound(), &mut inboxes),
                Err(err) => {
                    blamed = err.culprit_party().cloned();
                    break 'outer;
                }
            }
        }
        assert_eq!(blamed, Some(culprit));
    }

    #[test]
    fn corrupted_delta_share_is_identified() {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let saves = run_keygen(&committee, &mut rng).unwrap();
        let ids: Vec<PartyId> = committee.parties().to_vec();
        let mut sessions = presign_sessions(&committee, &saves, false);

        let mut inboxes: HashMap<PartyId, Vec<Message<TestCurve>>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        for session in sessions.iter_mut() {
            session.initialize(&mut rng).unwrap();
        }
        for session in sessions.iter_mut() {
            deliver_all(session.outbound(), &mut inboxes);
        }

        // Party 2 lies about its delta share — in the reveals it sends and
        // in its own bookkeeping, like a real cheater would. Every proof it
        // sent earlier is valid, so nothing catches the lie until the
        // output round's consistency check; identification must then name
        // party 2 and nobody else.
        let culprit = ids[2].clone();
        let mut corrupted = false;
        let mut corrupt_outbound = |session: &mut PresignSession,
                                    already: &mut bool|
         -> Vec<Message<TestCurve>> {
            let messages = session.outbound();
            let has_reveal = messages
                .iter()
                .any(|m| matches!(m.content(), Content::PresignRound3(_)));
            if !has_reveal {
                return messages;
            }
            if !*already {
                *already = true;
                let machine = session.machine_mut();
                let lied = machine.temp.delta_share.unwrap().add(&Scalar::one());
                machine.temp.delta_share = Some(lied);
                let own = machine.params.self_index();
                machine.temp.r3[own].as_mut().unwrap().delta_share = lied;
            }
            messages
                .into_iter()
                .map(|m| match m.content() {
                    Content::PresignRound3(reveal) => {
                        let mut lied = reveal.clone();
                        lied.delta_share = lied.delta_share.add(&Scalar::one());
                        Message::direct(
                            m.from().clone(),
                            m.recipients().unwrap()[0].clone(),
                            Content::PresignRound3(lied),
                        )
                    }
                    _ => m,
                })
                .collect()
        };

        let mut failures: HashMap<PartyId, Error> = HashMap::new();
        let mut dead: Vec<PartyId> = Vec::new();
        for _ in 0..200_000 {
            if failures.len() + sessions.iter().filter(|s| s.is_complete()).count()
                == sessions.len()
            {
                break;
            }
            let index = rng.gen_range(0..sessions.len());
            if dead.contains(&ids[index]) || sessions[index].is_complete() {
                continue;
            }
            let inbox = inboxes.get_mut(&ids[index]).unwrap();
            if inbox.is_empty() {
                continue;
            }
            let message = inbox.remove(rng.gen_range(0..inbox.len()));
            match sessions[index].handle_message(&mut rng, message) {
                Ok(()) => {
                    let outbound = if ids[index] == culprit {
                        corrupt_outbound(&mut sessions[index], &mut corrupted)
                    } else {
                        sessions[index].outbound()
                    };
                    deliver_all(outbound, &mut inboxes);
                }
                Err(err) => {
                    dead.push(ids[index].clone());
                    let _ = failures.insert(ids[index].clone(), err);
                }
            }
        }

        // Both honest parties identified party 2. Party 2's run also dies,
        // but without finding anyone else to blame.
        assert_eq!(failures.len(), 3, "failures: {failures:?}");
        for (victim, err) in &failures {
            if victim == &culprit {
                assert_eq!(err.culprit_party(), None, "got {err:?}");
            } else {
                assert_eq!(err.culprit_party(), Some(&culprit), "got {err:?}");
            }
        }
    }
}
