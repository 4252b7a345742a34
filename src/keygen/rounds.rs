//! The four-round key generation machine.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{Error, Result},
    keygen::{
        commit::{KeygenCommit, KeygenDecommit},
        save::SaveData,
        share::EncryptedShare,
    },
    messages::{Content, Message, Phase},
    paillier::DecryptionKey,
    parameters::PRIME_BITS,
    protocol::{Parameters, PartyId, SharedContext},
    ring_pedersen::VerifiedRingPedersen,
    round::{merge_verification_results, store_once, OkVector, Round, Transition},
    utils::xor_bytes_32,
    vss::{Polynomial, VssCommitment},
    zkp::{pifac, pimod, pisch, Proof},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// The round-three payload: this party's encrypted share for one peer, plus
/// the proofs about its own key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct KeygenShareBundle<C: CurveTrait> {
    /// The VSS evaluation for the recipient, under its Paillier key.
    pub(crate) encrypted_share: EncryptedShare<C>,
    /// Knowledge of the secret behind the VSS constant term.
    pub(crate) sch_proof: pisch::PiSchProof<C>,
    /// Well-formedness of the sender's Paillier modulus.
    pub(crate) mod_proof: pimod::PiModProof,
    /// No small factors, proven against the recipient's parameters.
    pub(crate) fac_proof: pifac::PiFacProof<C>,
}

impl<C: CurveTrait> KeygenShareBundle<C> {
    pub(crate) fn validate_basic(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum KeygenRound {
    Round1,
    Round2,
    Round3,
    Round4,
}

/// Per-run scratch state shared by all rounds.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct KeygenTemp<C: CurveTrait> {
    polynomial: Option<Polynomial<C>>,
    paillier_sk: Option<DecryptionKey>,
    commits: Vec<Option<KeygenCommit>>,
    decommits: Vec<Option<KeygenDecommit<C>>>,
    bundles: Vec<Option<KeygenShareBundle<C>>>,
    /// Decrypted and verified incoming shares, our own included.
    shares: Vec<Option<C::Scalar>>,
    rid: Option<[u8; 32]>,
}

impl<C: CurveTrait> KeygenTemp<C> {
    fn new(n: usize) -> Self {
        Self {
            polynomial: None,
            paillier_sk: None,
            commits: vec![None; n],
            decommits: vec![None; n],
            bundles: vec![None; n],
            shares: vec![None; n],
            rid: None,
        }
    }
}

/// The distributed key generation machine. Drive it with a
/// [`Session`](crate::round::Session); it completes with a [`SaveData`].
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct Keygen<C: CurveTrait> {
    params: Parameters<C>,
    round: KeygenRound,
    started: bool,
    ok: OkVector,
    temp: KeygenTemp<C>,
}

impl<C: CurveTrait> Keygen<C> {
    pub fn new(params: Parameters<C>) -> Self {
        let n = params.n();
        let self_index = params.self_index();
        Self {
            params,
            round: KeygenRound::Round1,
            started: false,
            ok: OkVector::with_exempt(n, [self_index]),
            temp: KeygenTemp::new(n),
        }
    }

    /// Checkpoint the machine (round tag plus temp state) for resumption.
    pub fn dump(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Rebuild a machine from a checkpoint.
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }

    fn setup_context(&self) -> SharedContext {
        SharedContext::new::<C>(b"keygen-setup", &[], self.params.committee())
    }

    fn session_context(&self) -> Result<SharedContext> {
        let rid = self
            .temp
            .rid
            .ok_or(Error::LocalFailure("session nonce not yet combined"))?;
        Ok(SharedContext::new::<C>(
            b"keygen-session",
            &rid,
            self.params.committee(),
        ))
    }

    fn reset_for_next_round(&mut self, round: KeygenRound) {
        self.round = round;
        self.started = false;
        self.ok = OkVector::with_exempt(self.params.n(), [self.params.self_index()]);
    }

    #[instrument(skip_all)]
    fn start_round_one<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        info!("keygen: generating round one commitment");

        let polynomial = Polynomial::<C>::sample(None, self.params.t(), rng);
        let vss_commitment = polynomial.commitment();
        let paillier_sk = DecryptionKey::generate(rng)?;
        let rped = VerifiedRingPedersen::generate(rng, &self.setup_context())?;

        let decommit = KeygenDecommit::new(
            rng,
            self.params.self_index(),
            vss_commitment,
            paillier_sk.encryption_key(),
            rped,
        );
        let commit = decommit.commit()?;

        let self_index = self.params.self_index();
        self.temp.polynomial = Some(polynomial);
        self.temp.paillier_sk = Some(paillier_sk);
        self.temp.commits[self_index] = Some(commit.clone());
        self.temp.decommits[self_index] = Some(decommit);

        Ok(vec![Message::broadcast(
            self.params.self_id().clone(),
            Content::KeygenRound1(commit),
        )])
    }

    #[instrument(skip_all)]
    fn start_round_two(&mut self) -> Result<Vec<Message<C>>> {
        info!("keygen: opening round one commitment");
        let decommit = self.temp.decommits[self.params.self_index()]
            .clone()
            .ok_or(Error::LocalFailure("own opening missing"))?;
        Ok(vec![Message::broadcast(
            self.params.self_id().clone(),
            Content::KeygenRound2(decommit),
        )])
    }

    #[instrument(skip_all)]
    fn start_round_three<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message<C>>> {
        info!("keygen: distributing encrypted shares");

        let context = self.session_context()?;
        let polynomial = self
            .temp
            .polynomial
            .as_ref()
            .ok_or(Error::LocalFailure("polynomial missing"))?;
        let paillier_sk = self
            .temp
            .paillier_sk
            .as_ref()
            .ok_or(Error::LocalFailure("Paillier key missing"))?;

        // Our own share goes straight into the accumulator.
        let own_share = polynomial.evaluate(&self.params.own_share_id());
        self.temp.shares[self.params.self_index()] = Some(own_share);

        // The knowledge and modulus proofs are peer-independent; prove once.
        let u_bn = C::scalar_to_bn(polynomial.constant_term());
        let own_constant = self.temp.decommits[self.params.self_index()]
            .as_ref()
            .ok_or(Error::LocalFailure("own opening missing"))?
            .vss_commitment
            .constant_term();
        let sch_proof = pisch::PiSchProof::<C>::prove(
            pisch::CommonInput::new(&own_constant),
            pisch::ProverSecret::new(&u_bn),
            &context,
            &mut Transcript::new(b"PiSchProof"),
            rng,
        )?;
        let (p, q) = paillier_sk.primes();
        let mod_proof = pimod::PiModProof::prove(
            pimod::CommonInput::new(paillier_sk.modulus()),
            pimod::ProverSecret::new(p, q),
            &context,
            &mut Transcript::new(b"PiModProof"),
            rng,
        )?;
        let fac_secret = pifac::ProverSecret::new(p, q);

        let mut messages = Vec::with_capacity(self.params.n() - 1);
        for j in self.params.other_indices() {
            let peer_decommit = self.temp.decommits[j]
                .as_ref()
                .ok_or(Error::LocalFailure("peer opening missing"))?;

            let share = polynomial.evaluate(&self.params.share_id(j));
            let encrypted_share =
                EncryptedShare::<C>::encrypt(&share, &peer_decommit.paillier_pk, rng)?;

            // The factor proof commits under the *recipient's* parameters.
            let fac_proof = pifac::PiFacProof::<C>::prove(
                pifac::CommonInput::new(&peer_decommit.rped, paillier_sk.modulus()),
                &fac_secret,
                &context,
                &mut Transcript::new(b"PiFacProof"),
                rng,
            )?;

            messages.push(Message::direct(
                self.params.self_id().clone(),
                self.params.party(j)?.clone(),
                Content::KeygenRound3(KeygenShareBundle {
                    encrypted_share,
                    sch_proof: sch_proof.clone(),
                    mod_proof: mod_proof.clone(),
                    fac_proof,
                }),
            ));
        }
        Ok(messages)
    }

    /// Verify one peer's round-two opening: the hash binding, the parameter
    /// proof, and the modulus width.
    fn verify_decommit(&self, j: usize) -> Result<()> {
        let sender = self.params.party(j)?;
        let commit = self.temp.commits[j]
            .as_ref()
            .ok_or(Error::LocalFailure("commit missing for stored opening"))?;
        let decommit = self.temp.decommits[j]
            .as_ref()
            .ok_or(Error::LocalFailure("opening missing"))?;

        decommit.verify(sender, self.params.t(), commit)?;
        if decommit.rped.scheme().modulus_bit_length() < 2 * PRIME_BITS - 1 {
            return Err(Error::culprit(sender, "ring-Pedersen modulus too short"));
        }
        decommit
            .rped
            .verify(&self.setup_context())
            .map_err(|_| Error::culprit(sender, "ring-Pedersen parameter proof failed"))?;
        Ok(())
    }

    /// Verify one peer's round-three bundle and recover our share of its
    /// secret.
    fn verify_bundle(&self, j: usize) -> Result<C::Scalar> {
        let sender = self.params.party(j)?;
        let context = self.session_context()?;
        let bundle = self.temp.bundles[j]
            .as_ref()
            .ok_or(Error::LocalFailure("bundle missing"))?;
        let decommit = self.temp.decommits[j]
            .as_ref()
            .ok_or(Error::LocalFailure("peer opening missing"))?;
        let paillier_sk = self
            .temp
            .paillier_sk
            .as_ref()
            .ok_or(Error::LocalFailure("Paillier key missing"))?;
        let own_rped = &self.temp.decommits[self.params.self_index()]
            .as_ref()
            .ok_or(Error::LocalFailure("own opening missing"))?
            .rped;

        let share = bundle
            .encrypted_share
            .decrypt(paillier_sk)
            .map_err(|_| Error::culprit(sender, "share does not decrypt in range"))?;

        if !decommit
            .vss_commitment
            .verify_share(&self.params.own_share_id(), &share)
        {
            return Err(Error::culprit(sender, "share inconsistent with commitment"));
        }

        let constant = decommit.vss_commitment.constant_term();
        bundle
            .sch_proof
            .clone()
            .verify(
                pisch::CommonInput::new(&constant),
                &context,
                &mut Transcript::new(b"PiSchProof"),
            )
            .map_err(|_| Error::culprit(sender, "knowledge-of-secret proof failed"))?;

        bundle
            .mod_proof
            .clone()
            .verify(
                pimod::CommonInput::new(decommit.paillier_pk.modulus()),
                &context,
                &mut Transcript::new(b"PiModProof"),
            )
            .map_err(|_| Error::culprit(sender, "Paillier modulus proof failed"))?;

        bundle
            .fac_proof
            .clone()
            .verify(
                pifac::CommonInput::new(own_rped, decommit.paillier_pk.modulus()),
                &context,
                &mut Transcript::new(b"PiFacProof"),
            )
            .map_err(|_| Error::culprit(sender, "no-small-factor proof failed"))?;

        Ok(share)
    }

    fn assemble_save_data(&mut self) -> Result<SaveData<C>> {
        let n = self.params.n();

        let mut xi = C::Scalar::zero();
        for slot in &self.temp.shares {
            let share = slot
                .as_ref()
                .ok_or(Error::LocalFailure("missing verified share"))?;
            xi = xi.add(share);
        }

        let decommits: Vec<&KeygenDecommit<C>> = self
            .temp
            .decommits
            .iter()
            .map(|slot| slot.as_ref().ok_or(Error::LocalFailure("missing opening")))
            .collect::<Result<_>>()?;

        let commitments: Vec<&VssCommitment<C>> =
            decommits.iter().map(|d| &d.vss_commitment).collect();
        let total = VssCommitment::sum(&commitments)?;

        let ks = self.params.committee().share_ids::<C>();
        let big_x: Vec<C> = ks.iter().map(|k| total.evaluate(k)).collect();

        // Sanity: our own share must sit on the aggregated polynomial.
        if C::GENERATOR.mul(&xi) != big_x[self.params.self_index()] {
            return Err(Error::LocalFailure("own share disagrees with aggregate"));
        }

        let save = SaveData {
            committee: self.params.committee().clone(),
            xi,
            self_index: self.params.self_index(),
            share_id: self.params.own_share_id(),
            paillier_sk: self
                .temp
                .paillier_sk
                .take()
                .ok_or(Error::LocalFailure("Paillier key missing"))?,
            paillier_pks: decommits.iter().map(|d| d.paillier_pk.clone()).collect(),
            rped: decommits.iter().map(|d| d.rped.clone()).collect(),
            big_x,
            public_key_point: total.constant_term(),
            ks,
            rid: self
                .temp
                .rid
                .ok_or(Error::LocalFailure("session nonce missing"))?,
        };
        save.validate(n)?;
        Ok(save)
    }
}

impl<C: CurveTrait> Round<C> for Keygen<C> {
    type Output = SaveData<C>;

    fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        if self.started {
            return Err(Error::LocalFailure("round already started"));
        }
        self.started = true;
        match self.round {
            KeygenRound::Round1 => self.start_round_one(rng),
            KeygenRound::Round2 => self.start_round_two(),
            KeygenRound::Round3 => self.start_round_three(rng),
            // The final round only aggregates; nothing to send.
            KeygenRound::Round4 => Ok(Vec::new()),
        }
    }

    fn can_accept(&self, message: &Message<C>) -> bool {
        message.validate_basic().is_ok()
            && message.content().phase() == Phase::Keygen
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
            .ok_or(Error::MalformedMessage("sender not in committee"))?;
        match message.into_content() {
            Content::KeygenRound1(commit) => store_once(&mut self.temp.commits[j], commit, &sender),
            Content::KeygenRound2(decommit) => {
                store_once(&mut self.temp.decommits[j], decommit, &sender)
            }
            Content::KeygenRound3(bundle) => store_once(&mut self.temp.bundles[j], bundle, &sender),
            _ => Err(Error::MalformedMessage("not a keygen message")),
        }
    }

    fn update(&mut self) -> Result<bool> {
        match self.round {
            // Commit hashes and share bundles need no verification at
            // arrival time; presence is enough.
            KeygenRound::Round1 => {
                for j in self.params.other_indices() {
                    if self.temp.commits[j].is_some() {
                        self.ok.mark(j);
                    }
                }
            }
            KeygenRound::Round3 => {
                for j in self.params.other_indices() {
                    if self.temp.bundles[j].is_some() {
                        self.ok.mark(j);
                    }
                }
            }
            // Openings carry the parameter proofs; verify them as they come
            // in, independent peers in parallel.
            KeygenRound::Round2 => {
                let pending: Vec<usize> = self
                    .params
                    .other_indices()
                    .filter(|&j| !self.ok.is_marked(j) && self.temp.decommits[j].is_some())
                    .collect();
                let results: Vec<(usize, Result<()>)> = pending
                    .par_iter()
                    .map(|&j| (j, self.verify_decommit(j)))
                    .collect();
                for (j, ()) in merge_verification_results(results)? {
                    self.ok.mark(j);
                }
            }
            // The terminal round decrypts and checks everything it was sent.
            KeygenRound::Round4 => {
                let pending: Vec<usize> = self
                    .params
                    .other_indices()
                    .filter(|&j| !self.ok.is_marked(j) && self.temp.bundles[j].is_some())
                    .collect();
                let results: Vec<(usize, Result<C::Scalar>)> = pending
                    .par_iter()
                    .map(|&j| (j, self.verify_bundle(j)))
                    .collect();
                for (j, share) in merge_verification_results(results)? {
                    self.temp.shares[j] = Some(share);
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
            KeygenRound::Round1 => {
                self.reset_for_next_round(KeygenRound::Round2);
                Ok(Transition::Continue)
            }
            KeygenRound::Round2 => {
                // Everyone's nonce share is now bound and opened; combine
                // them so the session identifier is unpredictable to any
                // single party.
                let mut rid = [0u8; 32];
                for slot in &self.temp.decommits {
                    let decommit = slot
                        .as_ref()
                        .ok_or(Error::LocalFailure("missing opening"))?;
                    rid = xor_bytes_32(&rid, &decommit.rid_share);
                }
                self.temp.rid = Some(rid);
                self.reset_for_next_round(KeygenRound::Round3);
                Ok(Transition::Continue)
            }
            KeygenRound::Round3 => {
                self.reset_for_next_round(KeygenRound::Round4);
                Ok(Transition::Continue)
            }
            KeygenRound::Round4 => {
                info!("keygen: complete");
                Ok(Transition::Complete(self.assemble_save_data()?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        protocol::testing::random_committee,
        round::Session,
        sim::run_keygen,
        utils::testing::init_testing,
        vss,
    };

    type KeygenSession = Session<TestCurve, Keygen<TestCurve>>;

    #[test]
    fn keygen_produces_consistent_outputs() -> Result<()> {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let outputs = run_keygen(&committee, &mut rng)?;

        // Everyone agrees on the public material.
        for output in &outputs[1..] {
            assert_eq!(output.public_key_point, outputs[0].public_key_point);
            assert_eq!(output.big_x, outputs[0].big_x);
            assert_eq!(output.rid, outputs[0].rid);
            assert_eq!(output.ssid(), outputs[0].ssid());
        }

        // Every share commitment matches the share.
        for output in &outputs {
            assert_eq!(
                TestCurve::GENERATOR.mul(&output.xi),
                output.big_x[output.self_index]
            );
            output.validate(committee.size())?;
        }

        // Any t+1 shares reconstruct a secret matching the public key.
        let shares: Vec<_> = outputs.iter().map(|o| (o.share_id, o.xi)).collect();
        for window in shares.windows(committee.threshold() + 1) {
            let secret = vss::reconstruct_at_zero::<TestCurve>(window).unwrap();
            assert_eq!(
                TestCurve::GENERATOR.mul(&secret),
                outputs[0].public_key_point
            );
        }
        Ok(())
    }

    #[test]
    fn tampered_opening_names_the_culprit() {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let ids: Vec<PartyId> = committee.parties().to_vec();
        let mut sessions: Vec<KeygenSession> = ids
            .iter()
            .map(|id| {
                let params = Parameters::new(committee.clone(), id).unwrap();
                Session::new(Keygen::new(params))
            })
            .collect();

        for session in sessions.iter_mut() {
            session.initialize(&mut rng).unwrap();
        }
        // Collect round-one broadcasts and deliver them everywhere.
        let round_one: Vec<Message<TestCurve>> = sessions
            .iter_mut()
            .flat_map(|s| s.outbound())
            .collect();
        for message in &round_one {
            for (i, session) in sessions.iter_mut().enumerate() {
                if &ids[i] != message.from() {
                    session.handle_message(&mut rng, message.clone()).unwrap();
                }
            }
        }

        // Party 2's opening, with a flipped nonce byte, delivered to party 0.
        let mut openings: Vec<Message<TestCurve>> =
            sessions[2].outbound().into_iter().collect();
        let opening = openings
            .iter_mut()
            .find(|m| matches!(m.content(), Content::KeygenRound2(_)))
            .expect("party 2 must have opened");
        let tampered = match opening.content().clone() {
            Content::KeygenRound2(mut decommit) => {
                decommit.rid_share[0] ^= 0xff;
                Message::broadcast(ids[2].clone(), Content::KeygenRound2(decommit))
            }
            _ => unreachable!(),
        };

        let err = sessions[0]
            .handle_message(&mut rng, tampered)
            .expect_err("tampered opening must be rejected");
        assert_eq!(err.culprit_party(), Some(&ids[2]));
    }

    #[test]
    fn duplicate_delivery_is_idempotent_and_contradiction_is_blamed() {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let ids: Vec<PartyId> = committee.parties().to_vec();
        let mut sessions: Vec<KeygenSession> = ids
            .iter()
            .map(|id| {
                let params = Parameters::new(committee.clone(), id).unwrap();
                Session::new(Keygen::new(params))
            })
            .collect();
        for session in sessions.iter_mut() {
            session.initialize(&mut rng).unwrap();
        }

        let commit_from_1 = sessions[1]
            .outbound()
            .into_iter()
            .find(|m| matches!(m.content(), Content::KeygenRound1(_)))
            .unwrap();

        // Twice is fine.
        sessions[0]
            .handle_message(&mut rng, commit_from_1.clone())
            .unwrap();
        sessions[0]
            .handle_message(&mut rng, commit_from_1.clone())
            .unwrap();

        // A *different* value in the same slot is a violation.
        let contradictory = Message::broadcast(
            ids[1].clone(),
            Content::KeygenRound1(KeygenCommit::from_hash([42u8; 32])),
        );
        let err = sessions[0]
            .handle_message(&mut rng, contradictory)
            .expect_err("contradictory redelivery must be rejected");
        assert_eq!(err.culprit_party(), Some(&ids[1]));
    }
}
