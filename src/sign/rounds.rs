//! The one-round signing machine, plus its identification sub-phase.

use crate::{
    curve::{CurveTrait, ScalarTrait, SignatureTrait, VerifyingKeyTrait},
    errors::{Error, Result},
    identify::{
        sigma_disclosure_base, store_disclosure, verify_disclosure, Disclosure, DisputeKind,
    },
    keygen::SaveData,
    messages::{Content, Message, Phase},
    presign::{PreSignature, PresignTranscript, QuorumView},
    protocol::{Parameters, PartyId, SharedContext},
    round::{merge_verification_results, store_once, OkVector, Round, Transition},
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// The round-one broadcast: one party's signature share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct SignatureShare<C: CurveTrait> {
    pub(crate) sigma: C::Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum SignRound {
    Round1,
    Output,
    Identify1,
    Identify2,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct SignTemp<C: CurveTrait> {
    shares: Vec<Option<SignatureShare<C>>>,
    x_projection: Option<C::Scalar>,
    signature_valid: Option<bool>,
    transcript: Option<PresignTranscript<C>>,
    k_share: Option<C::Scalar>,
    chi_share: Option<C::Scalar>,
    big_r: Option<C>,
    disclosures: Vec<Option<Disclosure<C>>>,
}

impl<C: CurveTrait> SignTemp<C> {
    fn new(n: usize) -> Self {
        Self {
            shares: vec![None; n],
            x_projection: None,
            signature_valid: None,
            transcript: None,
            k_share: None,
            chi_share: None,
            big_r: None,
            disclosures: vec![None; n],
        }
    }
}

/// The signing machine. Completes with an ECDSA signature, or aborts naming
/// a culprit.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct Sign<C: CurveTrait> {
    params: Parameters<C>,
    save: SaveData<C>,
    view: QuorumView<C>,
    digest: [u8; 32],
    shift: Option<C::Scalar>,
    round: SignRound,
    started: bool,
    ok: OkVector,
    temp: SignTemp<C>,
}

impl<C: CurveTrait> Sign<C> {
    /// Set up a signing run.
    ///
    /// `digest` is the 32-byte message digest, already reduced to the curve
    /// order by the caller's hashing convention. `shift` is an optional
    /// additive key-derivation offset: the signature verifies under
    /// `public_key + g^shift`.
    ///
    /// The presignature must come from the same key material (checked via
    /// its session identifier) and must never be used again.
    pub fn new(
        params: Parameters<C>,
        save: SaveData<C>,
        presignature: PreSignature<C>,
        digest: [u8; 32],
        shift: Option<C::Scalar>,
    ) -> Result<Self> {
        if presignature.ssid() != save.ssid() {
            return Err(Error::BadInput("presignature is bound to other key material"));
        }
        let view = QuorumView::build(&params, &save)?;
        let n = params.n();
        let self_index = params.self_index();

        let mut temp = SignTemp::new(n);
        // Pull the pieces out of the presignature; it is consumed here and
        // must never serve another signing run.
        let mut presignature = presignature;
        temp.transcript = presignature.transcript.take();
        temp.k_share = Some(presignature.k_share);
        temp.chi_share = Some(presignature.chi_share);
        temp.big_r = Some(presignature.big_r);

        Ok(Self {
            params,
            save,
            view,
            digest,
            shift,
            round: SignRound::Round1,
            started: false,
            ok: OkVector::with_exempt(n, [self_index]),
            temp,
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
        let mut binder = Vec::with_capacity(64);
        binder.extend_from_slice(self.save.ssid().as_bytes());
        binder.extend_from_slice(&self.digest);
        SharedContext::new::<C>(b"sign", &binder, self.params.committee())
    }

    fn reset_for_next_round(&mut self, round: SignRound) {
        self.round = round;
        self.started = false;
        self.ok = OkVector::with_exempt(self.params.n(), [self.params.self_index()]);
    }

    fn digest_scalar(&self) -> Result<C::Scalar> {
        C::bn_to_scalar(&BigNumber::from_slice(self.digest).nmod(&C::order()))
    }

    fn shift_value(&self) -> C::Scalar {
        self.shift.unwrap_or_else(C::Scalar::zero)
    }

    /// The verifying key the assembled signature must check under,
    /// including the derivation offset.
    fn expected_key(&self) -> Result<C::VerifyingKey> {
        let shifted = self.save.public_key_point + C::GENERATOR.mul(&self.shift_value());
        C::VerifyingKey::from_point(shifted)
    }

    #[instrument(skip_all)]
    fn start_round_one(&mut self) -> Result<Vec<Message<C>>> {
        info!("sign: broadcasting signature share");
        let k = self
            .temp
            .k_share
            .ok_or(Error::LocalFailure("nonce share missing"))?;
        let chi = self
            .temp
            .chi_share
            .ok_or(Error::LocalFailure("masked key share missing"))?;
        let big_r = self
            .temp
            .big_r
            .ok_or(Error::LocalFailure("nonce point missing"))?;

        let m = self.digest_scalar()?;
        let r = big_r.x_projection()?;

        // σ = k·m + r·χ, plus the derivation offset term r·k·shift.
        let sigma = k
            .mul(&m)
            .add(&r.mul(&chi))
            .add(&r.mul(&k.mul(&self.shift_value())));

        let share = SignatureShare { sigma };
        self.temp.shares[self.params.self_index()] = Some(share.clone());
        self.temp.x_projection = Some(r);

        Ok(vec![Message::broadcast(
            self.params.self_id().clone(),
            Content::SignRound1(share),
        )])
    }

    /// Assemble and check the signature once every share is in.
    fn check_signature(&mut self) -> Result<bool> {
        if let Some(valid) = self.temp.signature_valid {
            return Ok(valid);
        }
        let signature = self.assemble_signature()?;
        let valid = self
            .expected_key()?
            .verify_prehash(&self.digest, &signature)
            .is_ok();
        if !valid {
            warn!("sign: assembled signature does not verify; escalating to identification");
        }
        self.temp.signature_valid = Some(valid);
        Ok(valid)
    }

    fn assemble_signature(&self) -> Result<C::ECDSASignature> {
        let r = self
            .temp
            .x_projection
            .ok_or(Error::LocalFailure("x-projection missing"))?;
        let mut s = C::Scalar::zero();
        for slot in &self.temp.shares {
            let share = slot
                .as_ref()
                .ok_or(Error::LocalFailure("missing signature share"))?;
            s = s.add(&share.sigma);
        }
        // Low-s normalization.
        if s.is_high() {
            s = s.negate();
        }
        C::ECDSASignature::from_scalars(&C::scalar_to_bn(&r), &C::scalar_to_bn(&s))
    }

    #[instrument(skip_all)]
    fn start_identification<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message<C>>> {
        info!("sign: disclosing transcript for identification");
        let transcript = self
            .temp
            .transcript
            .as_ref()
            .ok_or(Error::IdentificationRequired)?;
        let context = self.context();
        let self_index = self.params.self_index();

        let own_k_ciphertext = transcript.k_ciphertexts[self_index].clone();
        let w_bn = C::scalar_to_bn(&self.view.w_share);
        let r = self
            .temp
            .x_projection
            .ok_or(Error::LocalFailure("x-projection missing"))?;
        // σ = k·(m + r·shift) + r·χ, so replay against the effective digest.
        let m = self
            .digest_scalar()?
            .add(&r.mul(&self.shift_value()));
        let claim = self.temp.shares[self_index]
            .as_ref()
            .ok_or(Error::LocalFailure("own share missing"))?
            .sigma;

        let base = sigma_disclosure_base::<C, _>(
            rng,
            &self.save.paillier_sk,
            &own_k_ciphertext,
            &w_bn,
            &m,
            &r,
            claim,
            transcript.chi_received.clone(),
            transcript.chi_sent.clone(),
            self_index,
        )?;

        let mut messages = Vec::with_capacity(self.params.n() - 1);
        for j in self.params.other_indices() {
            let disclosure = base.for_sigma_verifier(
                rng,
                &context,
                &self.save.paillier_sk,
                &own_k_ciphertext,
                &w_bn,
                &self.view.rpeds[j],
            )?;
            messages.push(Message::direct(
                self.params.self_id().clone(),
                self.params.party(j)?.clone(),
                Content::SignIdentify(disclosure),
            ));
        }
        Ok(messages)
    }

    fn verify_identification(&self, j: usize) -> Result<()> {
        let sender = self.params.party(j)?;
        let transcript = self
            .temp
            .transcript
            .as_ref()
            .ok_or(Error::LocalFailure("transcript missing"))?;
        let disclosure = self.temp.disclosures[j]
            .as_ref()
            .ok_or(Error::LocalFailure("disclosure missing"))?;
        let claim = self.temp.shares[j]
            .as_ref()
            .ok_or(Error::LocalFailure("peer share missing"))?
            .sigma;
        let r = self
            .temp
            .x_projection
            .ok_or(Error::LocalFailure("x-projection missing"))?;
        let m = self
            .digest_scalar()?
            .add(&r.mul(&self.shift_value()));

        let record_we_sent = transcript.chi_sent[j]
            .as_ref()
            .ok_or(Error::LocalFailure("own sent record missing"))?;
        let record_we_received = transcript.chi_received[j]
            .as_ref()
            .ok_or(Error::LocalFailure("own received record missing"))?;

        verify_disclosure::<C>(
            &self.context(),
            disclosure,
            sender,
            j,
            &claim,
            &transcript.k_ciphertexts[j],
            &self.view.pks[j],
            &self.view.rpeds[self.params.self_index()],
            DisputeKind::Sigma {
                w_point: &self.view.big_w[j],
                digest: &m,
                r_x: &r,
            },
            record_we_sent,
            record_we_received,
            self.params.self_index(),
        )
    }
}

impl<C: CurveTrait> Round<C> for Sign<C> {
    type Output = C::ECDSASignature;

    fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        if self.started {
            return Err(Error::LocalFailure("round already started"));
        }
        self.started = true;
        match self.round {
            SignRound::Round1 => self.start_round_one(),
            SignRound::Output => Ok(Vec::new()),
            SignRound::Identify1 => self.start_identification(rng),
            SignRound::Identify2 => Ok(Vec::new()),
        }
    }

    fn can_accept(&self, message: &Message<C>) -> bool {
        message.validate_basic().is_ok()
            && message.content().phase() == Phase::Sign
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
            Content::SignRound1(share) => store_once(&mut self.temp.shares[j], share, &sender),
            Content::SignIdentify(disclosure) => store_disclosure(
                &mut self.temp.disclosures[j],
                disclosure,
                &sender,
                self.params.n(),
            ),
            _ => Err(Error::MalformedMessage("not a sign message")),
        }
    }

    fn update(&mut self) -> Result<bool> {
        match self.round {
            // Shares carry no proofs; the aggregate check is the gate.
            SignRound::Round1 => {
                for j in self.params.other_indices() {
                    if self.temp.shares[j].is_some() {
                        self.ok.mark(j);
                    }
                }
            }
            SignRound::Output => {
                self.check_signature()?;
            }
            SignRound::Identify1 => {
                for j in self.params.other_indices() {
                    if self.temp.disclosures[j].is_some() {
                        self.ok.mark(j);
                    }
                }
            }
            SignRound::Identify2 => {
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
            SignRound::Round1 => {
                self.reset_for_next_round(SignRound::Output);
                // The output round consumes nothing new; it only checks.
                self.ok = OkVector::with_exempt(self.params.n(), 0..self.params.n());
                Ok(Transition::Continue)
            }
            SignRound::Output => {
                if self.check_signature()? {
                    info!("sign: complete");
                    Ok(Transition::Complete(self.assemble_signature()?))
                } else if self.temp.transcript.is_some() {
                    self.reset_for_next_round(SignRound::Identify1);
                    Ok(Transition::Continue)
                } else {
                    // Without a retained transcript there is nothing to
                    // replay; all we can report is that identification
                    // would be needed.
                    Err(Error::IdentificationRequired)
                }
            }
            SignRound::Identify1 => {
                self.reset_for_next_round(SignRound::Identify2);
                Ok(Transition::Continue)
            }
            SignRound::Identify2 => Err(Error::LocalFailure(
                "identification did not locate a culprit",
            )),
        }
    }
}
