//! Error types for the protocol engine.
//!
//! The variants follow the failure classes a multiparty run can hit: a
//! malformed message (dropped, nobody blamed), a verified protocol violation
//! (always blamed on a specific party), a local computational failure (our
//! own fault), a transport-reported timeout, and the internal marker used to
//! escalate an ambiguous inconsistency into the identification sub-protocol.

use crate::protocol::PartyId;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while driving a protocol phase.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// A message failed its structural checks and was rejected before
    /// storage. No culprit is named: a garbled message is not evidence of
    /// malice.
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    /// A specific peer's proof failed verification, or a committed value did
    /// not match its opening. The run of the phase is over; the caller
    /// decides whether to restart without the culprit.
    #[error("party {culprit} violated the protocol: {reason}")]
    ProtocolViolation {
        /// The party named by the failed verification.
        culprit: PartyId,
        /// Short description of what failed.
        reason: &'static str,
    },

    /// A local computation failed on our own inputs. Not attributable to any
    /// peer; fatal to this party's run of the phase.
    #[error("local computation failed: {0}")]
    LocalFailure(&'static str),

    /// The transport collaborator gave up waiting for a peer. Constructed by
    /// the caller, never by the engine itself.
    #[error("party {culprit} did not respond before the deadline")]
    Timeout {
        /// The unresponsive party.
        culprit: PartyId,
    },

    /// An integrity check failed without a single obviously-bad proof. The
    /// engine transitions into the identification sub-protocol instead of
    /// surfacing this directly; callers only see it if identification is
    /// impossible (e.g. no transcript was retained).
    #[error("inconsistency detected; identification required but unavailable")]
    IdentificationRequired,

    /// The caller supplied inputs the phase cannot run with.
    #[error("invalid input: {0}")]
    BadInput(&'static str),

    /// The phase already delivered its output; no further messages are
    /// accepted.
    #[error("protocol phase already terminated")]
    AlreadyTerminated,

    /// Serialization of a wire or checkpoint value failed.
    #[error("serialization failed")]
    Serialization,
}

impl Error {
    /// Construct a protocol violation naming `culprit`.
    pub(crate) fn culprit(culprit: &PartyId, reason: &'static str) -> Self {
        Error::ProtocolViolation {
            culprit: culprit.clone(),
            reason,
        }
    }

    /// The party this error blames, if it blames anyone.
    pub fn culprit_party(&self) -> Option<&PartyId> {
        match self {
            Error::ProtocolViolation { culprit, .. } | Error::Timeout { culprit } => Some(culprit),
            _ => None,
        }
    }
}
