//! In-process multi-party simulation harness for tests.
//!
//! Owns the inboxes explicitly; nothing here is process-global. Delivery
//! order is randomized so tests exercise out-of-order and interleaved
//! arrivals.

use crate::{
    curve::TestCurve,
    errors::Result,
    keygen::{Keygen, SaveData},
    messages::Message,
    protocol::{Committee, Parameters, PartyId},
    round::{Round, Session},
};
use rand::{rngs::StdRng, Rng};
use std::collections::HashMap;

/// Deliver messages into every addressed party's inbox.
pub(crate) fn deliver_all(
    messages: Vec<Message<TestCurve>>,
    inboxes: &mut HashMap<PartyId, Vec<Message<TestCurve>>>,
) {
    for message in messages {
        for (id, inbox) in inboxes.iter_mut() {
            if id != message.from() && message.is_for(id) {
                inbox.push(message.clone());
            }
        }
    }
}

/// Drive a set of sessions to completion with randomized delivery order.
pub(crate) fn run_to_completion<M>(
    sessions: &mut [Session<TestCurve, M>],
    ids: &[PartyId],
    rng: &mut StdRng,
) -> Result<()>
where
    M: Round<TestCurve>,
{
    let mut inboxes: HashMap<PartyId, Vec<Message<TestCurve>>> =
        ids.iter().map(|id| (id.clone(), Vec::new())).collect();

    for session in sessions.iter_mut() {
        session.initialize(rng)?;
    }
    for session in sessions.iter_mut() {
        deliver_all(session.outbound(), &mut inboxes);
    }

    let mut idle_rounds = 0;
    while sessions.iter().any(|s| !s.is_complete()) {
        let index = rng.gen_range(0..sessions.len());
        let id = &ids[index];
        let inbox = inboxes.get_mut(id).unwrap();
        if inbox.is_empty() || sessions[index].is_complete() {
            idle_rounds += 1;
            assert!(idle_rounds < 100_000, "simulation is stuck");
            continue;
        }
        idle_rounds = 0;
        let message = inbox.remove(rng.gen_range(0..inbox.len()));
        sessions[index].handle_message(rng, message)?;
        deliver_all(sessions[index].outbound(), &mut inboxes);
    }
    Ok(())
}

/// Run a full key generation for `committee`, returning each party's save
/// data in committee order.
pub(crate) fn run_keygen(
    committee: &Committee,
    rng: &mut StdRng,
) -> Result<Vec<SaveData<TestCurve>>> {
    let ids: Vec<PartyId> = committee.parties().to_vec();
    let mut sessions: Vec<Session<TestCurve, Keygen<TestCurve>>> = ids
        .iter()
        .map(|id| {
            let params = Parameters::new(committee.clone(), id).unwrap();
            Session::new(Keygen::new(params))
        })
        .collect();
    run_to_completion(&mut sessions, &ids, rng)?;
    Ok(sessions
        .iter_mut()
        .map(|s| s.take_output().unwrap())
        .collect())
}
