//! Signature pre-computation.
//!
//! Performs all the expensive, message-independent work of an ECDSA
//! signature ahead of time, so that signing itself is a single cheap round
//! once the message is known. That split is the performance point of the
//! whole protocol.
//!
//! # High-level protocol description
//! A quorum of at least `t + 1` key holders runs four rounds:
//!
//! 1. Each party samples ephemeral shares `k_i` and `γ_i`, encrypts both
//!    under its own Paillier key, broadcasts the ciphertexts, and proves to
//!    each peer that the `k_i` ciphertext is well-formed.
//! 2. Each ordered pair runs the MtA conversion twice — once for the nonce
//!    product `k·γ` and once against the Lagrange-prepared key share for
//!    `k·w` — with affine-operation proofs, plus a log-equality proof
//!    binding the revealed `Γ_i = g^{γ_i}` to the round-one ciphertext.
//! 3. Each party decrypts its MtA shares, accumulates `δ_i` (a share of
//!    `k·γ`) and `χ_i` (a share of `k·x`), and reveals `δ_i` together with
//!    `Δ_i = Γ^{k_i}` and a consistency proof.
//! 4. The output round checks `g^δ = Σ Δ_j` for `δ = Σ δ_j`. On success the
//!    nonce point `R = Γ^{δ^{-1}}` is fixed and each party records its
//!    [`PreSignature`]. On mismatch every intermediate value has already
//!    been committed, so instead of aborting blind the machine enters the
//!    identification sub-protocol and names the inconsistent party.

mod rounds;

pub(crate) use rounds::{DeltaReveal, PresignCiphertexts, PresignRangeProof, QuorumView};
pub use rounds::Presign;

use crate::{
    curve::CurveTrait,
    mta::MtaRecord,
    paillier::Ciphertext,
    protocol::Ssid,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;
use zeroize::Zeroize;

/// The retained exchange transcript, kept only when the caller wants the
/// option of identifying a cheater during a later signing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct PresignTranscript<C: CurveTrait> {
    /// Every quorum member's `K` ciphertext, quorum-ordered.
    pub(crate) k_ciphertexts: Vec<Ciphertext>,
    /// Masked-key MtA records received from each peer.
    pub(crate) chi_received: Vec<Option<MtaRecord>>,
    /// Masked-key MtA records sent to each peer.
    pub(crate) chi_sent: Vec<Option<MtaRecord>>,
    /// Binds the transcript to its curve for the serde bound above.
    pub(crate) curve: PhantomData<C>,
}

/// The message-independent signature precursor.
///
/// Consumed by exactly one signing run; never reuse one, even after a
/// failed signing attempt.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct PreSignature<C: CurveTrait> {
    /// Binds this precursor to the key material it was made for.
    pub(crate) ssid: Ssid,
    /// The candidate nonce point `R`.
    pub(crate) big_r: C,
    /// This party's share of the nonce.
    pub(crate) k_share: C::Scalar,
    /// This party's share of the masked key `k·x`.
    pub(crate) chi_share: C::Scalar,
    /// The exchange transcript, if retained for identification.
    pub(crate) transcript: Option<PresignTranscript<C>>,
}

impl<C: CurveTrait> Debug for PreSignature<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSignature")
            .field("ssid", &self.ssid)
            .field("big_r", &"[redacted]")
            .field("k_share", &"[redacted]")
            .field("chi_share", &"[redacted]")
            .finish()
    }
}

impl<C: CurveTrait> Drop for PreSignature<C> {
    fn drop(&mut self) {
        self.k_share.zeroize();
        self.chi_share.zeroize();
    }
}

impl<C: CurveTrait> PreSignature<C> {
    /// The session this precursor is bound to.
    pub fn ssid(&self) -> Ssid {
        self.ssid
    }

    /// Whether the exchange transcript was retained.
    pub fn has_transcript(&self) -> bool {
        self.transcript.is_some()
    }
}
