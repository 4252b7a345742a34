//! Statistical and range parameters shared by the zero-knowledge proofs.
//!
//! The range proofs commit to values in `±2^ELL` and mask them with
//! `±2^(ELL + EPSILON)` noise; the MtA betas live in `±2^ELL_PRIME`. The
//! constraints: an MtA beta must statistically mask a product of two
//! `ELL`-bit values, and every homomorphic combination the protocol (or an
//! identification replay) decrypts — up to `r · chi`, about
//! `2 * ELL + ELL_PRIME` bits plus slack — must stay inside the signed
//! Paillier plaintext range `±N/2` of a `2 * PRIME_BITS`-bit modulus.

/// Bit length of each Paillier / ring-Pedersen safe prime.
pub(crate) const PRIME_BITS: usize = 512;

/// Bit length of the secrets being range-proven (the curve order size).
pub(crate) const ELL: usize = 256;

/// Slack parameter for the proof masks.
pub(crate) const EPSILON: usize = 384;

/// Bit length of the MtA beta masks.
pub(crate) const ELL_PRIME: usize = 576;

/// Number of parallel iterations in the `Prm` and `Mod` proofs.
pub(crate) const SOUNDNESS_ROUNDS: usize = 80;
