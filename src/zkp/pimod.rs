//! Proof that a Paillier modulus is a well-formed Blum integer: `N = pq`
//! with `p ≡ q ≡ 3 (mod 4)`, and `N` has no small square factors.
//!
//! Each iteration asks the prover to extract an `N`-th root and a fourth
//! root of a challenge value, which is only possible with knowledge of the
//! factorization.

use crate::{
    errors::{Error, Result},
    parameters::SOUNDNESS_ROUNDS,
    utils::{jacobi, positive_challenge_from_transcript, random_positive_bn},
    zkp::{Proof, ProofContext},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;

/// One iteration of the proof: a fourth root `x` of the adjusted challenge,
/// the adjustment bits, and an `N`-th root `z` of the raw challenge.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PiModIteration {
    x: BigNumber,
    negate: bool,
    scale_by_w: bool,
    z: BigNumber,
}

/// Proof of Paillier-Blum modulus well-formedness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PiModProof {
    /// A quadratic non-residue with Jacobi symbol -1 used to adjust
    /// challenges into the square subgroup.
    w: BigNumber,
    iterations: Vec<PiModIteration>,
}

/// The public statement: the modulus.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    modulus: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(modulus: &'a BigNumber) -> Self {
        Self { modulus }
    }
}

/// The prover's secret: the factorization of the modulus.
pub(crate) struct ProverSecret<'a> {
    p: &'a BigNumber,
    q: &'a BigNumber,
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pimod::ProverSecret([redacted])")
    }
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(p: &'a BigNumber, q: &'a BigNumber) -> Self {
        Self { p, q }
    }
}

/// The square root of a quadratic residue `u` modulo a prime `p ≡ 3 (mod 4)`
/// that is itself a quadratic residue. Exactly one of the two roots is.
fn qr_sqrt_mod_prime(u: &BigNumber, p: &BigNumber) -> BigNumber {
    let exponent = (p + 1) >> 2;
    let root = u.modpow(&exponent, p);
    let legendre_exp = (p - 1) >> 1;
    if root.modpow(&legendre_exp, p) == BigNumber::one() {
        root
    } else {
        (p - &root).nmod(p)
    }
}

/// Combine residues mod `p` and mod `q` into a residue mod `pq`.
fn crt_combine(
    x_p: &BigNumber,
    x_q: &BigNumber,
    p: &BigNumber,
    q: &BigNumber,
) -> Result<BigNumber> {
    let p_inv = p
        .invert(q)
        .ok_or(Error::LocalFailure("pimod: primes not coprime"))?;
    let diff = (x_q - x_p).nmod(q);
    Ok((x_p + p * diff.modmul(&p_inv, q)).nmod(&(p * q)))
}

/// Check whether `u` is a quadratic residue mod the prime `p ≡ 3 (mod 4)`.
fn is_qr(u: &BigNumber, p: &BigNumber) -> bool {
    let legendre_exp = (p - 1) >> 1;
    u.modpow(&legendre_exp, p) == BigNumber::one()
}

impl Proof for PiModProof {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let n = input.modulus;
        let (p, q) = (secret.p, secret.q);
        if &(p * q) != n {
            return Err(Error::LocalFailure("pimod: secret does not factor modulus"));
        }

        // A unit with Jacobi symbol -1; together with -1 it spans all four
        // quadratic classes.
        let w = std::iter::repeat_with(|| random_positive_bn(rng, n))
            .take(crate::utils::CRYPTOGRAPHIC_RETRY_MAX)
            .find(|candidate| jacobi(candidate, n) == -1)
            .ok_or(Error::LocalFailure("pimod: no Jacobi -1 witness found"))?;

        fill_transcript(transcript, context, n, &w)?;

        let totient = (p - 1) * (q - 1);
        let n_inverse = n
            .invert(&totient)
            .ok_or(Error::LocalFailure("pimod: modulus not invertible"))?;

        let mut iterations = Vec::with_capacity(SOUNDNESS_ROUNDS);
        for _ in 0..SOUNDNESS_ROUNDS {
            let y = positive_challenge_from_transcript(transcript, n)?;

            // Find the unique adjustment (-1)^a w^b that lands y in the
            // squares mod both primes.
            let mut found = None;
            'outer: for negate in [false, true] {
                for scale_by_w in [false, true] {
                    let mut candidate = y.clone();
                    if scale_by_w {
                        candidate = candidate.modmul(&w, n);
                    }
                    if negate {
                        candidate = (n - &candidate).nmod(n);
                    }
                    if is_qr(&candidate, p) && is_qr(&candidate, q) {
                        found = Some((negate, scale_by_w, candidate));
                        break 'outer;
                    }
                }
            }
            let (negate, scale_by_w, adjusted) = found.ok_or(Error::LocalFailure(
                "pimod: no quadratic adjustment found; modulus is not Blum",
            ))?;

            // Fourth root via two successive QR square roots mod each prime.
            let root_p = qr_sqrt_mod_prime(&qr_sqrt_mod_prime(&adjusted, p), p);
            let root_q = qr_sqrt_mod_prime(&qr_sqrt_mod_prime(&adjusted, q), q);
            let x = crt_combine(&root_p, &root_q, p, q)?;

            let z = y.modpow(&n_inverse, n);

            iterations.push(PiModIteration {
                x,
                negate,
                scale_by_w,
                z,
            });
        }

        Ok(Self { w, iterations })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let n = input.modulus;
        let two = BigNumber::from(2u64);
        if n <= &BigNumber::one() || n % &two == BigNumber::zero() {
            error!("modulus is trivially malformed");
            return Err(Error::LocalFailure("pimod: modulus not odd"));
        }
        if self.w <= BigNumber::zero() || &self.w >= n || jacobi(&self.w, n) != -1 {
            error!("witness does not have Jacobi symbol -1");
            return Err(Error::LocalFailure("pimod: bad witness"));
        }
        if self.iterations.len() != SOUNDNESS_ROUNDS {
            error!("modulus proof has wrong length");
            return Err(Error::LocalFailure("pimod: truncated proof"));
        }

        fill_transcript(transcript, context, n, &self.w)?;

        let four = BigNumber::from(4u64);
        for iteration in &self.iterations {
            let y = positive_challenge_from_transcript(transcript, n)?;

            // z is an N-th root of y.
            if iteration.z.modpow(n, n) != y {
                error!("N-th root check failed");
                return Err(Error::LocalFailure("pimod: nth-root check failed"));
            }

            // x is a fourth root of the adjusted challenge.
            let mut adjusted = y;
            if iteration.scale_by_w {
                adjusted = adjusted.modmul(&self.w, n);
            }
            if iteration.negate {
                adjusted = (n - &adjusted).nmod(n);
            }
            if iteration.x.modpow(&four, n) != adjusted {
                error!("fourth-root check failed");
                return Err(Error::LocalFailure("pimod: fourth-root check failed"));
            }
        }
        Ok(())
    }
}

fn fill_transcript(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    n: &BigNumber,
    w: &BigNumber,
) -> Result<()> {
    transcript.append_message(b"PiMod ProofContext", &context.as_bytes()?);
    transcript.append_message(b"PiMod modulus", &n.to_bytes());
    transcript.append_message(b"PiMod witness", &w.to_bytes());
    Ok(())
}
