//! A round-based multiparty protocol engine for threshold ECDSA[^cite].
//!
//! A set of `n` parties jointly holds an ECDSA key such that any `t + 1` of
//! them can produce a signature while no coalition of `t` or fewer learns
//! anything about the key. The crate implements the four protocol phases —
//! distributed key generation ([`Keygen`]), signature pre-computation
//! ([`Presign`]), final signing ([`Sign`]), and committee resharing
//! ([`Reshare`]) — as round machines driven by a single [`Session`] dispatch
//! loop, with identifiable aborts: a failed run names the misbehaving party
//! instead of failing anonymously.
//!
//! # Driving a phase
//!
//! Construct a machine with its [`Parameters`] and inputs, wrap it in a
//! [`Session`], call [`Session::initialize`], and then feed every inbound
//! [`Message`] to [`Session::handle_message`], draining
//! [`Session::outbound`] to the transport after each call. The session
//! reports completion through [`Session::output`]; a protocol violation
//! surfaces as an [`Error`] carrying the culprit's [`PartyId`].
//!
//! The engine does not know network addresses, retransmission, or storage:
//! routing by party identifier is the transport collaborator's job, and the
//! long-lived [`SaveData`] record is handed to the keystore collaborator as
//! an opaque serde blob. Peer silence is likewise the transport's concern;
//! [`Session::waiting_for`] names the parties a timeout should blame.
//!
//! The protocol is parametric over the signing curve via
//! [`CurveTrait`](curve::CurveTrait); secp256k1 and NIST P-256
//! instantiations are provided.
//!
//! [^cite]: Ran Canetti, Rosario Gennaro, Steven Goldfeder, Nikolaos
//! Makriyannis, and Udi Peled. UC Non-Interactive, Proactive, Threshold
//! ECDSA with Identifiable Aborts. [EPrint archive,
//! 2021](https://eprint.iacr.org/2021/060.pdf).

#![allow(non_snake_case)]

macro_rules! serialize {
    ($x:expr) => {{
        bincode::serialize($x).map_err(|_| crate::errors::Error::Serialization)
    }};
}

macro_rules! deserialize {
    ($x:expr) => {{
        bincode::deserialize($x).map_err(|_| crate::errors::Error::Serialization)
    }};
}

pub mod curve;
pub mod errors;
mod identify;
pub mod k256;
pub mod keygen;
pub mod messages;
mod mta;
pub mod p256;
mod paillier;
mod parameters;
pub mod presign;
pub mod protocol;
pub mod reshare;
mod ring_pedersen;
pub mod round;
pub mod sign;
#[cfg(test)]
pub(crate) mod sim;
mod utils;
mod vss;
mod zkp;

pub use errors::{Error, Result};
pub use keygen::{Keygen, SaveData};
pub use messages::Message;
pub use presign::{PreSignature, Presign};
pub use protocol::{Committee, Parameters, PartyId, Ssid};
pub use reshare::{OldCommitteePublic, Reshare, ResharingParameters};
pub use round::{Round, Session, Transition};
pub use sign::Sign;
