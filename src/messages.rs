//! The wire envelope exchanged between parties.
//!
//! A [`Message`] carries a typed, per-round content variant. The envelope
//! says who sent it and whether it is a broadcast or a point-to-point
//! delivery; routing by [`PartyId`] is the transport's job. Nothing here is
//! trusted until the receiving round verifies it: [`Message::validate_basic`]
//! is only the cheap structural gate a message must pass to be stored at
//! all.

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    identify::Disclosure,
    keygen::{KeygenCommit, KeygenDecommit, KeygenShareBundle},
    mta::MtaPayload,
    presign::{DeltaReveal, PresignCiphertexts, PresignRangeProof},
    protocol::PartyId,
    reshare::{ReshareCommit, ReshareOpen, ReshareSetup},
    sign::SignatureShare,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The protocol phase a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Phase {
    Keygen,
    Presign,
    Sign,
    Reshare,
}

/// Typed message content, one variant per round message. Opaque outside the
/// crate: the transport's wire contract is the serialized [`Message`]
/// envelope, not its internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) enum Content<C: CurveTrait> {
    /// Keygen round 1: hash commitment to the round-2 opening.
    KeygenRound1(KeygenCommit),
    /// Keygen round 2: the opened commitment.
    KeygenRound2(KeygenDecommit<C>),
    /// Keygen round 3: encrypted VSS share plus modulus proofs, per peer.
    KeygenRound3(KeygenShareBundle<C>),
    /// Presign round 1 (broadcast): the `K` and `G` ciphertexts.
    PresignRound1Broadcast(PresignCiphertexts),
    /// Presign round 1 (direct): the range proof for `K`, per verifier.
    PresignRound1Proof(PresignRangeProof<C>),
    /// Presign round 2 (direct): the MtA payload for one peer pair.
    PresignRound2(MtaPayload<C>),
    /// Presign round 3 (direct): delta share and its consistency proof.
    PresignRound3(DeltaReveal<C>),
    /// Presign identification (direct): transcript disclosure.
    PresignIdentify(Disclosure<C>),
    /// Sign round 1 (broadcast): the signature share.
    SignRound1(SignatureShare<C>),
    /// Sign identification (direct): transcript disclosure.
    SignIdentify(Disclosure<C>),
    /// Resharing round 1 (broadcast, old committee): commitment hash.
    ReshareRound1(ReshareCommit),
    /// Resharing round 2 (broadcast, new committee): auxiliary parameters.
    ReshareRound2(ReshareSetup<C>),
    /// Resharing round 3 (direct, old to new): opening plus encrypted share.
    ReshareRound3(ReshareOpen<C>),
}

impl<C: CurveTrait> Content<C> {
    /// The phase this content belongs to.
    pub(crate) fn phase(&self) -> Phase {
        match self {
            Content::KeygenRound1(_) | Content::KeygenRound2(_) | Content::KeygenRound3(_) => {
                Phase::Keygen
            }
            Content::PresignRound1Broadcast(_)
            | Content::PresignRound1Proof(_)
            | Content::PresignRound2(_)
            | Content::PresignRound3(_)
            | Content::PresignIdentify(_) => Phase::Presign,
            Content::SignRound1(_) | Content::SignIdentify(_) => Phase::Sign,
            Content::ReshareRound1(_) | Content::ReshareRound2(_) | Content::ReshareRound3(_) => {
                Phase::Reshare
            }
        }
    }

    /// Whether this content travels as a broadcast. Round messages whose
    /// proofs are tailored to one verifier's commitment parameters travel
    /// point-to-point even when their non-proof payload is identical for
    /// every peer.
    pub(crate) fn expects_broadcast(&self) -> bool {
        match self {
            Content::KeygenRound1(_)
            | Content::KeygenRound2(_)
            | Content::PresignRound1Broadcast(_)
            | Content::SignRound1(_)
            | Content::ReshareRound1(_)
            | Content::ReshareRound2(_) => true,
            Content::KeygenRound3(_)
            | Content::PresignRound1Proof(_)
            | Content::PresignRound2(_)
            | Content::PresignRound3(_)
            | Content::PresignIdentify(_)
            | Content::SignIdentify(_)
            | Content::ReshareRound3(_) => false,
        }
    }

    /// Structural validity of the payload.
    fn validate_basic(&self) -> Result<()> {
        match self {
            Content::KeygenRound1(payload) => payload.validate_basic(),
            Content::KeygenRound2(payload) => payload.validate_basic(),
            Content::KeygenRound3(payload) => payload.validate_basic(),
            Content::PresignRound1Broadcast(payload) => payload.validate_basic(),
            Content::PresignRound1Proof(_) => Ok(()),
            Content::PresignRound2(payload) => payload.validate_basic(),
            Content::PresignRound3(_) => Ok(()),
            Content::PresignIdentify(payload) => payload.validate_basic(),
            Content::SignRound1(_) => Ok(()),
            Content::SignIdentify(payload) => payload.validate_basic(),
            Content::ReshareRound1(payload) => payload.validate_basic(),
            Content::ReshareRound2(payload) => payload.validate_basic(),
            Content::ReshareRound3(payload) => payload.validate_basic(),
        }
    }
}

/// A message in flight between parties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct Message<C: CurveTrait> {
    from: PartyId,
    /// Recipients; `None` means every party.
    to: Option<Vec<PartyId>>,
    is_broadcast: bool,
    content: Content<C>,
}

impl<C: CurveTrait> Message<C> {
    /// A message for every party.
    pub(crate) fn broadcast(from: PartyId, content: Content<C>) -> Self {
        Self {
            from,
            to: None,
            is_broadcast: true,
            content,
        }
    }

    /// A message for a single recipient.
    pub(crate) fn direct(from: PartyId, to: PartyId, content: Content<C>) -> Self {
        Self {
            from,
            to: Some(vec![to]),
            is_broadcast: false,
            content,
        }
    }

    pub fn from(&self) -> &PartyId {
        &self.from
    }

    pub(crate) fn content(&self) -> &Content<C> {
        &self.content
    }

    pub(crate) fn into_content(self) -> Content<C> {
        self.content
    }

    pub fn is_broadcast(&self) -> bool {
        self.is_broadcast
    }

    /// The explicit recipient list, if this is not a broadcast.
    pub fn recipients(&self) -> Option<&[PartyId]> {
        self.to.as_deref()
    }

    /// Whether `id` is among the recipients.
    pub fn is_for(&self, id: &PartyId) -> bool {
        match &self.to {
            None => true,
            Some(recipients) => recipients.contains(id),
        }
    }

    /// Cheap structural checks: flag consistency, recipient sanity, payload
    /// shape. Run by the transport before storage; failure means the message
    /// is dropped without blame.
    pub fn validate_basic(&self) -> Result<()> {
        if self.is_broadcast != self.to.is_none() {
            return Err(Error::MalformedMessage("broadcast flag disagrees with recipients"));
        }
        if self.is_broadcast != self.content.expects_broadcast() {
            return Err(Error::MalformedMessage("delivery mode wrong for content type"));
        }
        if let Some(recipients) = &self.to {
            if recipients.is_empty() {
                return Err(Error::MalformedMessage("empty recipient list"));
            }
            let unique: HashSet<&PartyId> = recipients.iter().collect();
            if unique.len() != recipients.len() {
                return Err(Error::MalformedMessage("duplicate recipients"));
            }
            if recipients.contains(&self.from) {
                return Err(Error::MalformedMessage("sender in recipient list"));
            }
        }
        self.content.validate_basic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, keygen::KeygenCommit, protocol::PartyId};

    fn commit_content() -> Content<TestCurve> {
        Content::KeygenRound1(KeygenCommit::from_hash([7u8; 32]))
    }

    #[test]
    fn broadcast_flag_must_match_recipients() {
        let alice = PartyId::new("alice", "alice");
        let bob = PartyId::new("bob", "bob");

        let ok = Message::broadcast(alice.clone(), commit_content());
        assert!(ok.validate_basic().is_ok());
        assert!(ok.is_for(&bob));

        // A commit hash is a broadcast-only content type.
        let bad = Message::direct(alice, bob, commit_content());
        assert!(bad.validate_basic().is_err());
    }

    #[test]
    fn self_addressed_messages_are_malformed() {
        let alice = PartyId::new("alice", "alice");
        let mut message = Message::direct(
            alice.clone(),
            PartyId::new("bob", "bob"),
            commit_content(),
        );
        message.is_broadcast = false;
        message.to = Some(vec![alice]);
        assert!(message.validate_basic().is_err());
    }
}
