//! Committee resharing.
//!
//! Redistributes a shared key from an old committee `(n, t)` to a new
//! committee `(n', t')` without ever reconstructing it. A party may sit in
//! both committees, either one, or — for a fresh joiner — only the new one.
//!
//! # High-level protocol description
//! - Round 1 (old committee): each old member converts its Shamir share to
//!   an additive share with the Lagrange coefficient for the participating
//!   quorum, re-shares that value under the new threshold with a fresh VSS,
//!   and broadcasts a hash commitment to the sharing.
//! - Round 2 (new committee): each new member generates fresh Paillier and
//!   ring-Pedersen parameters and broadcasts them with a well-formedness
//!   proof.
//! - Rounds 3/4: old members open their commitments toward the new members,
//!   each share encrypted to its recipient. A new member checks every
//!   contributor's opening against the round-one hash, against the old
//!   committee's public share commitments (a dissenting contributor is
//!   named), and against its own received share, then sums the
//!   contributions into its new key share.
//!
//! The public key is unchanged by construction, and the old committee's
//! shares become useless the moment the new committee starts using its own:
//! the sharings are fresh, so old and new shares do not combine.

mod rounds;

pub(crate) use rounds::{ReshareCommit, ReshareOpen, ReshareSetup};
pub use rounds::{OldCommitteePublic, Reshare, ResharingParameters};
