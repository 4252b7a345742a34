//! Zero-knowledge proofs consumed by the round protocols.
//!
//! Every proof follows the same contract: `prove` takes the public statement,
//! the prover's secrets, a caller-supplied [`ProofContext`] binding the proof
//! to the session, and a [`Transcript`] for the Fiat-Shamir transformation;
//! `verify` consumes the proof against the same statement and context. The
//! orchestration layer treats the constructions as opaque: it only relies on
//! honest proofs verifying and dishonest ones failing.

use crate::errors::Result;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};

pub(crate) mod piaffg;
pub(crate) mod pidec;
pub(crate) mod pienc;
pub(crate) mod pifac;
pub(crate) mod pilog;
pub(crate) mod pimod;
pub(crate) mod pimul;
pub(crate) mod pimulstar;
pub(crate) mod piprm;
pub(crate) mod pisch;

/// Common interface for proofs.
pub(crate) trait Proof: Sized {
    /// The public statement, shared between prover and verifier.
    type CommonInput<'a>;
    /// The prover's secret knowledge.
    type ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self>;

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()>;
}

/// Session context a proof is bound to; prevents replaying proofs across
/// sessions or protocols.
pub(crate) trait ProofContext {
    fn as_bytes(&self) -> Result<Vec<u8>>;
}

impl ProofContext for () {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// A context that never matches any other; for negative tests.
#[cfg(test)]
pub(crate) struct BadContext;

#[cfg(test)]
impl ProofContext for BadContext {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(b"bad context".to_vec())
    }
}
