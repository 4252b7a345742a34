//! Final signing.
//!
//! Given a [`PreSignature`](crate::presign::PreSignature) and a message
//! digest, signing is a single broadcast round: each party reveals
//! `σ_i = k_i·m + r·χ_i` and the signature is the public modular sum of the
//! shares. All the expensive work already happened during presigning; this
//! round is a handful of scalar operations. No proof accompanies the shares
//! — the check that the assembled signature verifies under the known public
//! key is itself the integrity check.
//!
//! If that final check fails, the machine does not merely error: provided
//! the presignature retained its transcript, it enters the identification
//! sub-protocol and names the party whose share disagrees with its
//! committed transcript. A blind retry would reveal nothing about the
//! saboteur.

mod rounds;

pub(crate) use rounds::SignatureShare;
pub use rounds::Sign;
