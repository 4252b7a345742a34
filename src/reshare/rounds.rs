//! The four-round resharing machine.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{Error, Result},
    keygen::{EncryptedShare, SaveData},
    messages::{Content, Message, Phase},
    paillier::{DecryptionKey, EncryptionKey},
    parameters::PRIME_BITS,
    protocol::{Committee, PartyId, SharedContext},
    ring_pedersen::VerifiedRingPedersen,
    round::{merge_verification_results, store_once, OkVector, Round, Transition},
    utils::xor_bytes_32,
    vss::{lagrange_coefficient_at_zero, Polynomial, VssCommitment},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// The old committee's public key material, as the new members must know it
/// before trusting any contribution: the joint key, each participating old
/// member's share commitment, and their evaluation points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct OldCommitteePublic<C: CurveTrait> {
    pub(crate) public_key_point: C,
    /// Share commitments of the participating old members, old-quorum
    /// ordered.
    pub(crate) big_x: Vec<C>,
    /// Evaluation points of the participating old members, old-quorum
    /// ordered.
    pub(crate) ks: Vec<C::Scalar>,
}

impl<C: CurveTrait> OldCommitteePublic<C> {
    /// Extract the public summary for a participating old quorum from any
    /// member's save data.
    pub fn from_save_data(save: &SaveData<C>, old: &Committee) -> Result<Self> {
        let mut big_x = Vec::with_capacity(old.size());
        let mut ks = Vec::with_capacity(old.size());
        for party in old.parties() {
            let index = save
                .committee
                .index_of(party)
                .ok_or(Error::BadInput("old quorum member is not a key holder"))?;
            big_x.push(save.big_x[index]);
            ks.push(save.ks[index]);
        }
        Ok(Self {
            public_key_point: save.public_key_point,
            big_x,
            ks,
        })
    }
}

/// Parameters for one party's run of resharing: the participating old
/// quorum, the new committee, this party's identity, and the old
/// committee's public material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct ResharingParameters<C: CurveTrait> {
    old: Committee,
    new: Committee,
    me: PartyId,
    old_public: OldCommitteePublic<C>,
}

impl<C: CurveTrait> ResharingParameters<C> {
    pub fn new(
        old: Committee,
        new: Committee,
        me: PartyId,
        old_public: OldCommitteePublic<C>,
    ) -> Result<Self> {
        if !old.contains(&me) && !new.contains(&me) {
            return Err(Error::BadInput("local party is in neither committee"));
        }
        if old_public.big_x.len() != old.size() || old_public.ks.len() != old.size() {
            return Err(Error::BadInput("old committee summary has wrong size"));
        }
        Ok(Self {
            old,
            new,
            me,
            old_public,
        })
    }

    pub fn is_old_committee(&self) -> bool {
        self.old.contains(&self.me)
    }

    pub fn is_new_committee(&self) -> bool {
        self.new.contains(&self.me)
    }

    fn old_index(&self) -> Option<usize> {
        self.old.index_of(&self.me)
    }

    fn new_index(&self) -> Option<usize> {
        self.new.index_of(&self.me)
    }
}

/// Round-one broadcast: hash commitment to an old member's re-sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ReshareCommit {
    hash: [u8; 32],
}

impl ReshareCommit {
    pub(crate) fn validate_basic(&self) -> Result<()> {
        Ok(())
    }
}

/// The opening behind a [`ReshareCommit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct ReshareDecommit<C: CurveTrait> {
    sender_old_index: usize,
    rid_share: [u8; 32],
    vss_commitment: VssCommitment<C>,
}

impl<C: CurveTrait> ReshareDecommit<C> {
    fn commit(&self) -> Result<ReshareCommit> {
        let mut transcript = Transcript::new(b"ReshareR1");
        transcript.append_message(b"decommit", &serialize!(&self)?);
        let mut hash = [0u8; 32];
        transcript.challenge_bytes(b"hashing r1", &mut hash);
        Ok(ReshareCommit { hash })
    }
}

/// Round-two broadcast: a new member's fresh auxiliary parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct ReshareSetup<C: CurveTrait> {
    sender_new_index: usize,
    paillier_pk: EncryptionKey,
    rped: VerifiedRingPedersen,
    curve: std::marker::PhantomData<C>,
}

impl<C: CurveTrait> ReshareSetup<C> {
    pub(crate) fn validate_basic(&self) -> Result<()> {
        self.rped.scheme().validate_basic()
    }
}

/// Round-three direct message, old member to new member: the opening plus
/// the recipient's encrypted share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct ReshareOpen<C: CurveTrait> {
    decommit: ReshareDecommit<C>,
    encrypted_share: EncryptedShare<C>,
}

impl<C: CurveTrait> ReshareOpen<C> {
    pub(crate) fn validate_basic(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ReshareRound {
    Round1,
    Round2,
    Round3,
    Round4,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct ReshareTemp<C: CurveTrait> {
    w_polynomial: Option<Polynomial<C>>,
    own_decommit: Option<ReshareDecommit<C>>,
    paillier_sk: Option<DecryptionKey>,
    /// Old-quorum indexed.
    commits: Vec<Option<ReshareCommit>>,
    /// New-committee indexed.
    setups: Vec<Option<ReshareSetup<C>>>,
    /// Old-quorum indexed.
    opens: Vec<Option<ReshareOpen<C>>>,
    /// Old-quorum indexed: verified contributions to our new share.
    shares: Vec<Option<C::Scalar>>,
}

impl<C: CurveTrait> ReshareTemp<C> {
    fn new(n_old: usize, n_new: usize) -> Self {
        Self {
            w_polynomial: None,
            own_decommit: None,
            paillier_sk: None,
            commits: vec![None; n_old],
            setups: vec![None; n_new],
            opens: vec![None; n_old],
            shares: vec![None; n_old],
        }
    }
}

/// The resharing machine. New-committee members complete with
/// `Some(SaveData)`; members of only the old committee complete with
/// `None` once they have dealt their shares.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct Reshare<C: CurveTrait> {
    params: ResharingParameters<C>,
    save: Option<SaveData<C>>,
    round: ReshareRound,
    started: bool,
    ok: OkVector,
    temp: ReshareTemp<C>,
}

impl<C: CurveTrait> Reshare<C> {
    /// Set up a resharing run. Old-committee members must supply their save
    /// data; fresh joiners pass `None`.
    pub fn new(params: ResharingParameters<C>, save: Option<SaveData<C>>) -> Result<Self> {
        match (&save, params.is_old_committee()) {
            (Some(save), true) => {
                save.validate(save.committee.size())?;
                if params.old.size() < save.committee.threshold() + 1 {
                    return Err(Error::BadInput("old quorum smaller than threshold"));
                }
            }
            (None, false) => {}
            (Some(_), false) => {
                return Err(Error::BadInput("save data supplied by non-member of old committee"))
            }
            (None, true) => return Err(Error::BadInput("old committee member needs save data")),
        }

        let n_old = params.old.size();
        let n_new = params.new.size();
        let ok = round_one_ok(&params);
        Ok(Self {
            params,
            save,
            round: ReshareRound::Round1,
            started: false,
            ok,
            temp: ReshareTemp::new(n_old, n_new),
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

    fn setup_context(&self) -> SharedContext {
        SharedContext::new::<C>(
            b"reshare-setup",
            &self.params.old_public.public_key_point.to_bytes(),
            &self.params.new,
        )
    }

    #[instrument(skip_all)]
    fn start_round_one<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        let Some(old_index) = self.params.old_index() else {
            return Ok(Vec::new());
        };
        info!("reshare: committing to a fresh sharing of our share");
        let save = self
            .save
            .as_ref()
            .ok_or(Error::LocalFailure("save data missing"))?;

        // Convert our Shamir share into an additive share for this quorum,
        // then re-share it under the new threshold.
        let lambda = lagrange_coefficient_at_zero::<C>(
            &self.params.old_public.ks[old_index],
            &self.params.old_public.ks,
        )?;
        let w = lambda.mul(&save.xi);
        let polynomial = Polynomial::<C>::sample(Some(w), self.params.new.threshold(), rng);

        let mut rid_share = [0u8; 32];
        rng.fill_bytes(&mut rid_share);
        let decommit = ReshareDecommit {
            sender_old_index: old_index,
            rid_share,
            vss_commitment: polynomial.commitment(),
        };
        let commit = decommit.commit()?;

        self.temp.w_polynomial = Some(polynomial);
        self.temp.commits[old_index] = Some(commit.clone());
        self.temp.own_decommit = Some(decommit);

        Ok(vec![Message::broadcast(
            self.params.me.clone(),
            Content::ReshareRound1(commit),
        )])
    }

    #[instrument(skip_all)]
    fn start_round_two<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        let Some(new_index) = self.params.new_index() else {
            return Ok(Vec::new());
        };
        info!("reshare: generating fresh auxiliary parameters");

        let paillier_sk = DecryptionKey::generate(rng)?;
        let rped = VerifiedRingPedersen::generate(rng, &self.setup_context())?;
        let setup = ReshareSetup {
            sender_new_index: new_index,
            paillier_pk: paillier_sk.encryption_key(),
            rped,
            curve: std::marker::PhantomData,
        };

        self.temp.paillier_sk = Some(paillier_sk);
        self.temp.setups[new_index] = Some(setup.clone());

        Ok(vec![Message::broadcast(
            self.params.me.clone(),
            Content::ReshareRound2(setup),
        )])
    }

    #[instrument(skip_all)]
    fn start_round_three<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message<C>>> {
        let Some(old_index) = self.params.old_index() else {
            return Ok(Vec::new());
        };
        info!("reshare: opening toward the new committee");
        let polynomial = self
            .temp
            .w_polynomial
            .as_ref()
            .ok_or(Error::LocalFailure("polynomial missing"))?;
        let decommit = self
            .temp
            .own_decommit
            .clone()
            .ok_or(Error::LocalFailure("own opening missing"))?;

        let mut messages = Vec::new();
        for j in 0..self.params.new.size() {
            let share = polynomial.evaluate(&self.params.new.share_id::<C>(j));
            if Some(j) == self.params.new_index() {
                // Our own contribution to our own new share.
                self.temp.shares[old_index] = Some(share);
                self.temp.opens[old_index] = Some(ReshareOpen {
                    decommit: decommit.clone(),
                    encrypted_share: EncryptedShare::encrypt(
                        &share,
                        &self
                            .temp
                            .paillier_sk
                            .as_ref()
                            .ok_or(Error::LocalFailure("own Paillier key missing"))?
                            .encryption_key(),
                        rng,
                    )?,
                });
                continue;
            }
            let recipient_setup = self.temp.setups[j]
                .as_ref()
                .ok_or(Error::LocalFailure("recipient parameters missing"))?;
            let encrypted_share =
                EncryptedShare::<C>::encrypt(&share, &recipient_setup.paillier_pk, rng)?;
            messages.push(Message::direct(
                self.params.me.clone(),
                self.params.new.party(j)?.clone(),
                Content::ReshareRound3(ReshareOpen {
                    decommit: decommit.clone(),
                    encrypted_share,
                }),
            ));
        }
        Ok(messages)
    }

    fn verify_setup(&self, j: usize) -> Result<()> {
        let sender = self.params.new.party(j)?;
        let setup = self.temp.setups[j]
            .as_ref()
            .ok_or(Error::LocalFailure("setup missing"))?;
        if setup.sender_new_index != j {
            return Err(Error::culprit(sender, "setup claims wrong sender"));
        }
        if setup.rped.scheme().modulus_bit_length() < 2 * PRIME_BITS - 1 {
            return Err(Error::culprit(sender, "ring-Pedersen modulus too short"));
        }
        setup
            .rped
            .verify(&self.setup_context())
            .map_err(|_| Error::culprit(sender, "ring-Pedersen parameter proof failed"))
    }

    /// Verify one old member's opening and recover its contribution to our
    /// new share.
    fn verify_open(&self, i: usize) -> Result<C::Scalar> {
        let sender = self.params.old.party(i)?;
        let open = self.temp.opens[i]
            .as_ref()
            .ok_or(Error::LocalFailure("opening missing"))?;
        let commit = self.temp.commits[i]
            .as_ref()
            .ok_or(Error::LocalFailure("commit missing"))?;
        let new_index = self
            .params
            .new_index()
            .ok_or(Error::LocalFailure("only new members verify openings"))?;

        if &open.decommit.commit()? != commit {
            return Err(Error::culprit(sender, "opening does not match commitment"));
        }
        if open.decommit.sender_old_index != i {
            return Err(Error::culprit(sender, "opening claims wrong sender"));
        }
        if open.decommit.vss_commitment.threshold() != self.params.new.threshold() {
            return Err(Error::culprit(sender, "wrong VSS threshold"));
        }

        // The constant term must be the contributor's Lagrange-scaled public
        // share; anything else means it re-shared a different value than it
        // holds. This is what pins a dissenting contributor.
        let lambda = lagrange_coefficient_at_zero::<C>(
            &self.params.old_public.ks[i],
            &self.params.old_public.ks,
        )?;
        let expected_constant = self.params.old_public.big_x[i].mul(&lambda);
        if open.decommit.vss_commitment.constant_term() != expected_constant {
            return Err(Error::culprit(sender, "re-shared value disagrees with public share"));
        }

        let share = open
            .encrypted_share
            .decrypt(
                self.temp
                    .paillier_sk
                    .as_ref()
                    .ok_or(Error::LocalFailure("own Paillier key missing"))?,
            )
            .map_err(|_| Error::culprit(sender, "share does not decrypt in range"))?;
        if !open
            .decommit
            .vss_commitment
            .verify_share(&self.params.new.share_id::<C>(new_index), &share)
        {
            return Err(Error::culprit(sender, "share inconsistent with commitment"));
        }
        Ok(share)
    }

    fn assemble_save_data(&mut self) -> Result<Option<SaveData<C>>> {
        let Some(new_index) = self.params.new_index() else {
            info!("reshare: dealt our shares; not part of the new committee");
            return Ok(None);
        };

        let mut xi = C::Scalar::zero();
        for slot in &self.temp.shares {
            let share = slot
                .as_ref()
                .ok_or(Error::LocalFailure("missing verified contribution"))?;
            xi = xi.add(share);
        }

        let mut rid = [0u8; 32];
        let commitments: Vec<&VssCommitment<C>> = self
            .temp
            .opens
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .map(|open| {
                        rid = xor_bytes_32(&rid, &open.decommit.rid_share);
                        &open.decommit.vss_commitment
                    })
                    .ok_or(Error::LocalFailure("missing opening"))
            })
            .collect::<Result<_>>()?;
        let total = VssCommitment::sum(&commitments)?;

        // The invariant of the whole exercise: the key did not move.
        if total.constant_term() != self.params.old_public.public_key_point {
            return Err(Error::LocalFailure("resharing moved the public key"));
        }

        let ks = self.params.new.share_ids::<C>();
        let big_x: Vec<C> = ks.iter().map(|k| total.evaluate(k)).collect();
        if C::GENERATOR.mul(&xi) != big_x[new_index] {
            return Err(Error::LocalFailure("own new share disagrees with aggregate"));
        }

        let setups: Vec<&ReshareSetup<C>> = self
            .temp
            .setups
            .iter()
            .map(|slot| slot.as_ref().ok_or(Error::LocalFailure("missing setup")))
            .collect::<Result<_>>()?;

        let save = SaveData {
            committee: self.params.new.clone(),
            xi,
            self_index: new_index,
            share_id: self.params.new.share_id::<C>(new_index),
            paillier_sk: self
                .temp
                .paillier_sk
                .take()
                .ok_or(Error::LocalFailure("own Paillier key missing"))?,
            paillier_pks: setups.iter().map(|s| s.paillier_pk.clone()).collect(),
            rped: setups.iter().map(|s| s.rped.clone()).collect(),
            big_x,
            public_key_point: self.params.old_public.public_key_point,
            ks,
            rid,
        };
        save.validate(self.params.new.size())?;
        info!("reshare: complete");
        Ok(Some(save))
    }
}

/// Expected senders for round one: the old committee, except ourselves.
fn round_one_ok<C: CurveTrait>(params: &ResharingParameters<C>) -> OkVector {
    OkVector::with_exempt(params.old.size(), params.old_index())
}

/// Expected senders for round two: the new committee, except ourselves.
fn round_two_ok<C: CurveTrait>(params: &ResharingParameters<C>) -> OkVector {
    OkVector::with_exempt(params.new.size(), params.new_index())
}

/// Expected senders for round three: for new members, the old committee
/// except ourselves; members of only the old committee expect nothing.
fn round_three_ok<C: CurveTrait>(params: &ResharingParameters<C>) -> OkVector {
    if params.is_new_committee() {
        OkVector::with_exempt(params.old.size(), params.old_index())
    } else {
        OkVector::with_exempt(params.old.size(), 0..params.old.size())
    }
}

impl<C: CurveTrait> Round<C> for Reshare<C> {
    type Output = Option<SaveData<C>>;

    fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>> {
        if self.started {
            return Err(Error::LocalFailure("round already started"));
        }
        self.started = true;
        match self.round {
            ReshareRound::Round1 => self.start_round_one(rng),
            ReshareRound::Round2 => self.start_round_two(rng),
            ReshareRound::Round3 => self.start_round_three(rng),
            ReshareRound::Round4 => Ok(Vec::new()),
        }
    }

    fn can_accept(&self, message: &Message<C>) -> bool {
        if message.validate_basic().is_err()
            || message.content().phase() != Phase::Reshare
            || !message.is_for(&self.params.me)
            || message.from() == &self.params.me
        {
            return false;
        }
        match message.content() {
            Content::ReshareRound1(_) | Content::ReshareRound3(_) => {
                self.params.old.contains(message.from())
            }
            Content::ReshareRound2(_) => self.params.new.contains(message.from()),
            _ => false,
        }
    }

    fn store_message(&mut self, message: Message<C>) -> Result<()> {
        let sender = message.from().clone();
        match message.into_content() {
            Content::ReshareRound1(commit) => {
                let i = self
                    .params
                    .old
                    .index_of(&sender)
                    .ok_or(Error::MalformedMessage("sender not in old committee"))?;
                store_once(&mut self.temp.commits[i], commit, &sender)
            }
            Content::ReshareRound2(setup) => {
                let j = self
                    .params
                    .new
                    .index_of(&sender)
                    .ok_or(Error::MalformedMessage("sender not in new committee"))?;
                store_once(&mut self.temp.setups[j], setup, &sender)
            }
            Content::ReshareRound3(open) => {
                let i = self
                    .params
                    .old
                    .index_of(&sender)
                    .ok_or(Error::MalformedMessage("sender not in old committee"))?;
                store_once(&mut self.temp.opens[i], open, &sender)
            }
            _ => Err(Error::MalformedMessage("not a resharing message")),
        }
    }

    fn update(&mut self) -> Result<bool> {
        match self.round {
            ReshareRound::Round1 => {
                for i in 0..self.params.old.size() {
                    if self.temp.commits[i].is_some() {
                        self.ok.mark(i);
                    }
                }
            }
            ReshareRound::Round2 => {
                let pending: Vec<usize> = (0..self.params.new.size())
                    .filter(|&j| !self.ok.is_marked(j) && self.temp.setups[j].is_some())
                    .collect();
                let results: Vec<(usize, Result<()>)> = pending
                    .par_iter()
                    .map(|&j| (j, self.verify_setup(j)))
                    .collect();
                for (j, ()) in merge_verification_results(results)? {
                    self.ok.mark(j);
                }
            }
            ReshareRound::Round3 => {
                if self.params.is_new_committee() {
                    let pending: Vec<usize> = (0..self.params.old.size())
                        .filter(|&i| !self.ok.is_marked(i) && self.temp.opens[i].is_some())
                        .collect();
                    let results: Vec<(usize, Result<C::Scalar>)> = pending
                        .par_iter()
                        .map(|&i| (i, self.verify_open(i)))
                        .collect();
                    for (i, share) in merge_verification_results(results)? {
                        self.temp.shares[i] = Some(share);
                        self.ok.mark(i);
                    }
                }
            }
            ReshareRound::Round4 => {}
        }
        Ok(self.can_proceed())
    }

    fn can_proceed(&self) -> bool {
        self.started && self.ok.all_marked()
    }

    fn waiting_for(&self) -> Vec<PartyId> {
        let committee = match self.round {
            ReshareRound::Round2 => &self.params.new,
            _ => &self.params.old,
        };
        self.ok
            .missing()
            .iter()
            .filter_map(|&j| committee.party(j).ok().cloned())
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
            ReshareRound::Round1 => {
                self.round = ReshareRound::Round2;
                self.started = false;
                self.ok = round_two_ok(&self.params);
                Ok(Transition::Continue)
            }
            ReshareRound::Round2 => {
                self.round = ReshareRound::Round3;
                self.started = false;
                self.ok = round_three_ok(&self.params);
                Ok(Transition::Continue)
            }
            ReshareRound::Round3 => {
                self.round = ReshareRound::Round4;
                self.started = false;
                self.ok = OkVector::with_exempt(1, [0]);
                Ok(Transition::Continue)
            }
            ReshareRound::Round4 => Ok(Transition::Complete(self.assemble_save_data()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        messages::Message,
        protocol::{testing::random_committee, Parameters},
        round::Session,
        sim::{deliver_all, run_keygen, run_to_completion},
        utils::testing::init_testing,
        vss::reconstruct_at_zero,
    };
    use rand::Rng;
    use std::collections::HashMap;

    type Scalar = <TestCurve as CurveTrait>::Scalar;
    type ReshareSession = Session<TestCurve, Reshare<TestCurve>>;

    /// Build resharing sessions for the union of both committees.
    fn reshare_sessions(
        old: &Committee,
        new: &Committee,
        saves: &[SaveData<TestCurve>],
    ) -> (Vec<PartyId>, Vec<ReshareSession>) {
        let mut union: Vec<PartyId> = old.parties().to_vec();
        for party in new.parties() {
            if !union.contains(party) {
                union.push(party.clone());
            }
        }
        let sessions = union
            .iter()
            .map(|id| {
                let old_public = OldCommitteePublic::from_save_data(&saves[0], old).unwrap();
                let params = ResharingParameters::new(
                    old.clone(),
                    new.clone(),
                    id.clone(),
                    old_public,
                )
                .unwrap();
                let save = old
                    .index_of(id)
                    .map(|i| saves[i].clone());
                Session::new(Reshare::new(params, save).unwrap())
            })
            .collect();
        (union, sessions)
    }

    #[test]
    fn resharing_preserves_the_key_and_produces_usable_shares() -> Result<()> {
        let mut rng = init_testing();
        let old_committee = random_committee(3, 1, &mut rng);
        let saves = run_keygen(&old_committee, &mut rng)?;
        let public_key_point = saves[0].public_key_point;

        // New committee: two continuing members plus two fresh joiners,
        // under a higher threshold.
        let mut new_parties: Vec<PartyId> = old_committee.parties()[..2].to_vec();
        new_parties.push(PartyId::new("joiner-a", "joiner-a"));
        new_parties.push(PartyId::new("joiner-b", "joiner-b"));
        let new_committee = Committee::new(new_parties, 2)?;

        let (union, mut sessions) =
            reshare_sessions(&old_committee, &new_committee, &saves);
        run_to_completion(&mut sessions, &union, &mut rng)?;

        let mut new_saves: HashMap<PartyId, SaveData<TestCurve>> = HashMap::new();
        for (id, session) in union.iter().zip(sessions.iter_mut()) {
            let output = session.take_output().unwrap();
            match output {
                Some(save) => {
                    assert!(new_committee.contains(id));
                    assert_eq!(save.public_key_point, public_key_point);
                    save.validate(new_committee.size())?;
                    let _ = new_saves.insert(id.clone(), save);
                }
                None => assert!(!new_committee.contains(id)),
            }
        }
        assert_eq!(new_saves.len(), new_committee.size());

        // The new shares reconstruct the same secret.
        let shares: Vec<(Scalar, Scalar)> = new_committee
            .parties()
            .iter()
            .map(|id| {
                let save = &new_saves[id];
                (save.share_id, save.xi)
            })
            .collect();
        let secret = reconstruct_at_zero::<TestCurve>(&shares).unwrap();
        assert_eq!(TestCurve::GENERATOR.mul(&secret), public_key_point);

        // And they sign: run presign + sign over the new committee.
        let ordered_saves: Vec<SaveData<TestCurve>> = new_committee
            .parties()
            .iter()
            .map(|id| new_saves[id].clone())
            .collect();
        let ids: Vec<PartyId> = new_committee.parties().to_vec();
        let mut presign_sessions: Vec<Session<TestCurve, crate::presign::Presign<TestCurve>>> =
            ids.iter()
                .zip(ordered_saves.iter())
                .map(|(id, save)| {
                    let params = Parameters::new(new_committee.clone(), id).unwrap();
                    Session::new(
                        crate::presign::Presign::new(params, save.clone(), false).unwrap(),
                    )
                })
                .collect();
        run_to_completion(&mut presign_sessions, &ids, &mut rng)?;
        let presignatures: Vec<_> = presign_sessions
            .iter_mut()
            .map(|s| s.take_output().unwrap())
            .collect();

        let digest: [u8; 32] = rng.gen();
        let mut sign_sessions: Vec<Session<TestCurve, crate::sign::Sign<TestCurve>>> = ids
            .iter()
            .zip(ordered_saves.iter().zip(presignatures))
            .map(|(id, (save, presignature))| {
                let params = Parameters::new(new_committee.clone(), id).unwrap();
                Session::new(
                    crate::sign::Sign::new(params, save.clone(), presignature, digest, None)
                        .unwrap(),
                )
            })
            .collect();
        run_to_completion(&mut sign_sessions, &ids, &mut rng)?;

        use crate::curve::VerifyingKeyTrait;
        let signature = sign_sessions[0].take_output().unwrap();
        // The signature verifies under the *original* public key.
        assert!(saves[0]
            .public_key()?
            .verify_prehash(&digest, &signature)
            .is_ok());
        Ok(())
    }

    #[test]
    fn dissenting_contributor_is_named() {
        let mut rng = init_testing();
        let old_committee = random_committee(3, 1, &mut rng);
        let mut saves = run_keygen(&old_committee, &mut rng).unwrap();

        let new_committee = Committee::new(
            vec![
                old_committee.parties()[1].clone(),
                PartyId::new("joiner", "joiner"),
            ],
            1,
        )
        .unwrap();

        // Old member 0 re-shares a *different* value than its real share.
        // Its commitment and shares are self-consistent, so only the check
        // against the old committee's public material can catch it.
        saves[0].xi = saves[0].xi.add(&Scalar::one());
        let culprit = old_committee.parties()[0].clone();

        let (union, mut sessions) =
            reshare_sessions(&old_committee, &new_committee, &saves);

        let mut inboxes: HashMap<PartyId, Vec<Message<TestCurve>>> =
            union.iter().map(|id| (id.clone(), Vec::new())).collect();
        for session in sessions.iter_mut() {
            session.initialize(&mut rng).unwrap();
        }
        for session in sessions.iter_mut() {
            deliver_all(session.outbound(), &mut inboxes);
        }

        let mut failures: HashMap<PartyId, Error> = HashMap::new();
        let mut dead: Vec<PartyId> = Vec::new();
        for _ in 0..200_000 {
            let done = sessions
                .iter()
                .enumerate()
                .all(|(i, s)| s.is_complete() || dead.contains(&union[i]));
            if done {
                break;
            }
            let index = rng.gen_range(0..sessions.len());
            if dead.contains(&union[index]) || sessions[index].is_complete() {
                continue;
            }
            let inbox = inboxes.get_mut(&union[index]).unwrap();
            if inbox.is_empty() {
                continue;
            }
            let message = inbox.remove(rng.gen_range(0..inbox.len()));
            match sessions[index].handle_message(&mut rng, message) {
                Ok(()) => deliver_all(sessions[index].outbound(), &mut inboxes),
                Err(err) => {
                    dead.push(union[index].clone());
                    let _ = failures.insert(union[index].clone(), err);
                }
            }
        }

        // Every new-committee member other than the culprit's co-conspirators
        // (there are none) must name old member 0.
        assert!(!failures.is_empty());
        for (victim, err) in &failures {
            assert!(new_committee.contains(victim));
            assert_eq!(err.culprit_party(), Some(&culprit), "got {err:?}");
        }
    }

    /// The share-conversion algebra alone, across many randomized committee
    /// transitions: the value at zero never moves.
    #[test]
    fn redistribution_preserves_the_secret_across_random_transitions() {
        let rng = &mut init_testing();
        for _ in 0..100 {
            let n = rng.gen_range(2..6);
            let t = rng.gen_range(0..n);
            let n_new = rng.gen_range(2..6);
            let t_new = rng.gen_range(0..n_new);

            let secret = <Scalar as ScalarTrait>::random(rng);
            let polynomial = Polynomial::<TestCurve>::sample(Some(secret), t, rng);

            // A participating quorum of t+1 old holders.
            let points: Vec<Scalar> =
                (1..=t + 1).map(|i| Scalar::from_u128(i as u128)).collect();

            // Each re-shares its Lagrange-scaled share for the new committee.
            let new_points: Vec<Scalar> = (1..=n_new)
                .map(|i| Scalar::from_u128(i as u128))
                .collect();
            let mut new_shares = vec![Scalar::zero(); n_new];
            for point in &points {
                let lambda =
                    lagrange_coefficient_at_zero::<TestCurve>(point, &points).unwrap();
                let w = lambda.mul(&polynomial.evaluate(point));
                let resharing = Polynomial::<TestCurve>::sample(Some(w), t_new, rng);
                for (j, new_point) in new_points.iter().enumerate() {
                    new_shares[j] = new_shares[j].add(&resharing.evaluate(new_point));
                }
            }

            // Any t'+1 of the new shares reconstruct the original secret.
            let collected: Vec<(Scalar, Scalar)> = new_points
                .iter()
                .copied()
                .zip(new_shares.iter().copied())
                .take(t_new + 1)
                .collect();
            assert_eq!(
                reconstruct_at_zero::<TestCurve>(&collected).unwrap(),
                secret
            );
        }
    }
}
