//! The generic round state machine every protocol phase instantiates.
//!
//! A phase is a single machine value holding its parameters, a shared
//! mutable temp record, and a tag for the current round. The [`Round`]
//! trait is the contract between a machine and the [`Session`] dispatch
//! loop:
//!
//! - `start` performs this party's computation for the current round and
//!   emits outbound messages; called exactly once per round.
//! - `can_accept` is the cheap structural filter the transport can apply
//!   before storage.
//! - `store_message` slots a message by sender; duplicates must be
//!   idempotent, contradictions name the sender.
//! - `update` verifies stored-but-unverified peer inputs (the expensive
//!   proof checks live here, fanned out across peers) and reports whether
//!   the round can proceed.
//! - `next_round` advances the round tag, or completes the phase.
//!
//! Splitting acceptance from verification lets the transport store messages
//! immediately while the costly modular exponentiation happens only when the
//! round needs the result, and lets independent peers verify concurrently.

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    messages::Message,
    protocol::PartyId,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, instrument};

/// What a machine does after a round completes.
pub enum Transition<O> {
    /// Move on to the next round.
    Continue,
    /// The phase is finished; deliver the output.
    Complete(O),
}

/// One protocol phase, drivable round by round.
pub trait Round<C: CurveTrait>: Sized {
    /// The phase's final output.
    type Output;

    /// Run this party's computation for the current round, emitting the
    /// round's outbound messages. Must be called exactly once per round.
    fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message<C>>>;

    /// Cheap structural acceptance check; no cryptography.
    fn can_accept(&self, message: &Message<C>) -> bool;

    /// Store an accepted message in its round slot.
    fn store_message(&mut self, message: Message<C>) -> Result<()>;

    /// Verify stored inputs for the current round; returns `true` once every
    /// required peer contribution has been verified.
    fn update(&mut self) -> Result<bool>;

    /// Whether every required contribution for the current round is in and
    /// verified.
    fn can_proceed(&self) -> bool;

    /// Parties whose contribution to the current round is still missing.
    fn waiting_for(&self) -> Vec<PartyId>;

    /// Advance past a completed round.
    fn next_round<R: RngCore + CryptoRng>(&mut self, rng: &mut R)
        -> Result<Transition<Self::Output>>;
}

/// Tracker for which peers' required inputs to the current round have been
/// verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OkVector {
    ok: Vec<bool>,
}

impl OkVector {
    /// All slots pending except the listed ones (ourselves, or parties with
    /// nothing to send this round).
    pub(crate) fn with_exempt(n: usize, exempt: impl IntoIterator<Item = usize>) -> Self {
        let mut ok = vec![false; n];
        for index in exempt {
            ok[index] = true;
        }
        Self { ok }
    }

    pub(crate) fn mark(&mut self, index: usize) {
        self.ok[index] = true;
    }

    pub(crate) fn is_marked(&self, index: usize) -> bool {
        self.ok[index]
    }

    pub(crate) fn all_marked(&self) -> bool {
        self.ok.iter().all(|&b| b)
    }

    /// Indices still pending.
    pub(crate) fn missing(&self) -> Vec<usize> {
        self.ok
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| (!b).then_some(i))
            .collect()
    }
}

/// The dispatch loop driving one machine through its rounds.
///
/// Single-threaded by construction: messages are handed in one at a time,
/// and all state mutation happens on the caller's thread. Outbound messages
/// accumulate in a queue the transport collaborator drains.
pub struct Session<C: CurveTrait, M: Round<C>> {
    machine: M,
    outbound: VecDeque<Message<C>>,
    output: Option<M::Output>,
}

impl<C: CurveTrait, M: Round<C>> Session<C, M> {
    pub fn new(machine: M) -> Self {
        Self {
            machine,
            outbound: VecDeque::new(),
            output: None,
        }
    }

    /// Start the first round. Must be called once, before any messages are
    /// handled.
    pub fn initialize<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        let messages = self.machine.start(rng)?;
        self.outbound.extend(messages);
        self.pump(rng)
    }

    /// Feed one inbound message. Malformed or out-of-place messages are
    /// dropped silently; verified misbehavior surfaces as an error naming
    /// the culprit.
    #[instrument(skip_all, fields(from = %message.from()))]
    pub fn handle_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: Message<C>,
    ) -> Result<()> {
        if self.output.is_some() {
            return Err(Error::AlreadyTerminated);
        }
        if !self.machine.can_accept(&message) {
            debug!("dropping unacceptable message");
            return Ok(());
        }
        self.machine.store_message(message)?;
        self.pump(rng)
    }

    /// Advance through as many rounds as the stored messages allow.
    fn pump<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        while self.machine.update()? {
            match self.machine.next_round(rng)? {
                Transition::Continue => {
                    let messages = self.machine.start(rng)?;
                    self.outbound.extend(messages);
                }
                Transition::Complete(output) => {
                    self.output = Some(output);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Drain the outbound queue for the transport collaborator.
    pub fn outbound(&mut self) -> Vec<Message<C>> {
        self.outbound.drain(..).collect()
    }

    /// The phase output, once complete.
    pub fn output(&self) -> Option<&M::Output> {
        self.output.as_ref()
    }

    /// Take ownership of the phase output.
    pub fn take_output(&mut self) -> Option<M::Output> {
        self.output.take()
    }

    pub fn is_complete(&self) -> bool {
        self.output.is_some()
    }

    /// Peers whose contribution the current round is still waiting on; for
    /// diagnostics and transport timeouts.
    pub fn waiting_for(&self) -> Vec<PartyId> {
        self.machine.waiting_for()
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// Test-only access for fault injection.
    #[cfg(test)]
    pub(crate) fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }
}

/// Store a message payload in its sender's slot.
///
/// Redelivery of the identical payload is idempotent; a *different* payload
/// for an already-filled slot is a protocol violation naming the sender.
pub(crate) fn store_once<T: serde::Serialize>(
    slot: &mut Option<T>,
    value: T,
    sender: &PartyId,
) -> Result<()> {
    match slot {
        None => {
            *slot = Some(value);
            Ok(())
        }
        Some(existing) => {
            if serialize!(existing)? == serialize!(&value)? {
                debug!("ignoring duplicate delivery");
                Ok(())
            } else {
                Err(Error::culprit(sender, "contradictory redelivery"))
            }
        }
    }
}

/// Merge per-peer verification results, surfacing the lowest-indexed
/// failure so culprit attribution is deterministic regardless of the order
/// the verifications ran in.
pub(crate) fn merge_verification_results<T>(
    mut results: Vec<(usize, Result<T>)>,
) -> Result<Vec<(usize, T)>> {
    results.sort_by_key(|(index, _)| *index);
    results
        .into_iter()
        .map(|(index, result)| result.map(|value| (index, value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_vector_tracks_pending_slots() {
        let mut ok = OkVector::with_exempt(4, [2]);
        assert!(!ok.all_marked());
        assert_eq!(ok.missing(), vec![0, 1, 3]);

        ok.mark(0);
        ok.mark(1);
        ok.mark(3);
        assert!(ok.all_marked());
        assert!(ok.is_marked(2));
        assert!(ok.missing().is_empty());
    }

    #[test]
    fn merge_returns_lowest_indexed_failure() {
        let results: Vec<(usize, Result<()>)> = vec![
            (2, Err(Error::LocalFailure("two"))),
            (0, Ok(())),
            (1, Err(Error::LocalFailure("one"))),
        ];
        let err = merge_verification_results(results).unwrap_err();
        assert_eq!(err, Error::LocalFailure("one"));
    }
}
