//! Distributed key generation.
//!
//! Produces an ECDSA public key whose private key is Shamir-shared among
//! `n` parties with threshold `t`: any `t + 1` can sign, no `t` learn
//! anything about the key.
//!
//! # High-level protocol description
//! The protocol runs in four rounds:
//! - In the first round, each party samples its secret contribution and
//!   shares it with a verifiable secret sharing, samples a session nonce,
//!   generates Paillier and ring-Pedersen parameters with a well-formedness
//!   proof for the latter, and broadcasts only a *hash* of all of it. The
//!   commit-then-open shape stops a rushing adversary from choosing its
//!   contribution after seeing everyone else's.
//! - In the second round each party broadcasts the opening.
//! - In the third round each party checks every opening against its round-one
//!   hash and the parameter proofs, combines the session nonces into a
//!   shared random identifier, and sends each peer its VSS share encrypted
//!   under that peer's Paillier key, together with proofs that its own
//!   Paillier modulus is well-formed (`Mod`) and has no small factors
//!   (`Fac`), and that it knows its secret contribution (`Sch`).
//! - In the fourth round each party decrypts and checks its incoming shares
//!   against the public commitments, verifies the proofs, and sums the
//!   shares into its long-lived key share.
//!
//! Any verification failure aborts the whole run naming the offending
//! party; key generation has no committed transcript to replay, so there is
//! no identification sub-protocol here.

mod commit;
mod rounds;
mod save;
mod share;

pub(crate) use commit::{KeygenCommit, KeygenDecommit};
pub(crate) use rounds::KeygenShareBundle;
pub use rounds::Keygen;
pub use save::SaveData;
pub(crate) use share::EncryptedShare;
