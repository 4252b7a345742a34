use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, Rng, RngCore};

pub(crate) const CRYPTOGRAPHIC_RETRY_MAX: usize = 500usize;

/// Returns `true` if `value ∊ [-2^n, 2^n]`.
pub(crate) fn within_bound_by_size(value: &BigNumber, n: usize) -> bool {
    let bound = BigNumber::one() << n;
    value <= &bound && value >= &-bound
}

/// Sample a number uniformly at random from the range `[0, n)`.
pub(crate) fn random_positive_bn<R: RngCore + CryptoRng>(rng: &mut R, n: &BigNumber) -> BigNumber {
    BigNumber::from_rng(n, rng)
}

/// Sample a number uniformly at random from the range `[-n, n]`.
pub(crate) fn random_plusminus<R: RngCore + CryptoRng>(rng: &mut R, n: &BigNumber) -> BigNumber {
    // `from_rng()` samples the open interval; add 1 to close it at `n`.
    let open_interval_max: BigNumber = n + 1;
    let val = BigNumber::from_rng(&open_interval_max, rng);
    let is_positive: bool = rng.gen();
    match is_positive {
        true => val,
        false => -val,
    }
}

/// Sample a number uniformly at random from the range `[-2^n, 2^n]`.
pub(crate) fn random_plusminus_by_size<R: RngCore + CryptoRng>(rng: &mut R, n: usize) -> BigNumber {
    let range = BigNumber::one() << n;
    random_plusminus(rng, &range)
}

/// Sample a number uniformly at random from the range
/// `[-scale * 2^n, scale * 2^n]`.
pub(crate) fn random_plusminus_scaled<R: RngCore + CryptoRng>(
    rng: &mut R,
    n: usize,
    scale: &BigNumber,
) -> BigNumber {
    let range = (BigNumber::one() << n) * scale;
    random_plusminus(rng, &range)
}

/// Derive a deterministic pseudorandom value in `[-q, q]` from the
/// [`Transcript`], where `q` is the curve order.
pub(crate) fn plusminus_challenge_from_transcript<C: CurveTrait>(
    transcript: &mut Transcript,
) -> Result<BigNumber> {
    let mut is_neg_byte = [0u8; 1];
    transcript.challenge_bytes(b"sampling negation bit", &mut is_neg_byte);
    let is_neg: bool = is_neg_byte[0] & 1 == 1;

    // The sampling method samples from the open interval, so add 1 to sample
    // from the closed interval we want here.
    let open_interval_max = C::order() + 1;
    let b = positive_challenge_from_transcript(transcript, &open_interval_max)?;
    Ok(match is_neg {
        true => -b,
        false => b,
    })
}

/// Derive a deterministic pseudorandom value in `[0, n)` from the
/// [`Transcript`].
pub(crate) fn positive_challenge_from_transcript(
    transcript: &mut Transcript,
    n: &BigNumber,
) -> Result<BigNumber> {
    // To avoid sampling bias we cannot reduce mod `n`; instead re-sample until
    // the draw lands below `n` (each draw appends to the transcript, so
    // successive draws differ).
    let len = n.to_bytes().len();
    let mut t = vec![0u8; len];
    for _ in 0..CRYPTOGRAPHIC_RETRY_MAX {
        transcript.challenge_bytes(b"sampling randomness", t.as_mut_slice());
        let b = BigNumber::from_slice(t.as_slice());
        if &b < n {
            return Ok(b);
        }
    }
    Err(Error::LocalFailure("challenge sampling exhausted retries"))
}

/// Generate a random `BigNumber` in the multiplicative group of integers
/// modulo `n`.
pub(crate) fn random_bn_in_z_star<R: RngCore + CryptoRng>(
    rng: &mut R,
    n: &BigNumber,
) -> Result<BigNumber> {
    std::iter::repeat_with(|| BigNumber::from_rng(n, rng))
        .take(CRYPTOGRAPHIC_RETRY_MAX)
        .find(|result| result != &BigNumber::zero() && result.gcd(n) == BigNumber::one())
        .ok_or(Error::LocalFailure("sampling in Z* exhausted retries"))
}

/// Compute `a^e mod n` for a possibly-negative exponent `e`.
///
/// Requires `gcd(a, n) == 1` when `e` is negative.
pub(crate) fn modpow_signed(a: &BigNumber, e: &BigNumber, n: &BigNumber) -> Result<BigNumber> {
    if e >= &BigNumber::zero() {
        Ok(a.modpow(e, n))
    } else {
        let inv = a
            .invert(n)
            .ok_or(Error::LocalFailure("base not invertible in signed modpow"))?;
        Ok(inv.modpow(&-e.clone(), n))
    }
}

/// Compute the Jacobi symbol `(a / n)` for odd positive `n`.
///
/// Returns 0 when `gcd(a, n) != 1`.
pub(crate) fn jacobi(a: &BigNumber, n: &BigNumber) -> i32 {
    let zero = BigNumber::zero();
    let one = BigNumber::one();
    let two = BigNumber::from(2u64);
    let three = BigNumber::from(3u64);
    let four = BigNumber::from(4u64);
    let five = BigNumber::from(5u64);
    let eight = BigNumber::from(8u64);

    let mut a = a.nmod(n);
    let mut n = n.clone();
    let mut result = 1i32;

    while a != zero {
        // Pull out factors of two, flipping the sign when n ≡ 3, 5 (mod 8).
        while &a % &two == zero {
            a = a >> 1;
            let r = &n % &eight;
            if r == three || r == five {
                result = -result;
            }
        }
        std::mem::swap(&mut a, &mut n);
        // Quadratic reciprocity.
        if &a % &four == three && &n % &four == three {
            result = -result;
        }
        a = a.nmod(&n);
    }
    if n == one {
        result
    } else {
        0
    }
}

/// XOR two 32-byte session-nonce contributions.
pub(crate) fn xor_bytes_32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn random_plusminus_values_are_large_enough() {
        let mut rng = init_testing();
        let num_bytes = 100;

        let mut max_len = 0;
        for _ in 0..1000 {
            let bn = random_plusminus_by_size(&mut rng, num_bytes * 8);
            max_len = max_len.max(bn.to_bytes().len());
        }
        assert!(max_len > num_bytes - 2);
    }

    #[test]
    fn jacobi_matches_legendre_for_small_primes() {
        // 23 is prime: (a/23) = a^11 mod 23 mapped to {1, -1}.
        let p = BigNumber::from(23u64);
        let exp = BigNumber::from(11u64);
        for a in 1u64..23 {
            let a_bn = BigNumber::from(a);
            let legendre = a_bn.modpow(&exp, &p);
            let expected = if legendre == BigNumber::one() { 1 } else { -1 };
            assert_eq!(jacobi(&a_bn, &p), expected, "a = {a}");
        }
    }

    #[test]
    fn signed_modpow_inverts_negative_exponents() {
        let mut rng = init_testing();
        let n = BigNumber::from(101u64);
        let a = random_bn_in_z_star(&mut rng, &n).unwrap();
        let e = BigNumber::from(17u64);
        let forward = modpow_signed(&a, &e, &n).unwrap();
        let backward = modpow_signed(&a, &-e, &n).unwrap();
        assert_eq!(forward.modmul(&backward, &n), BigNumber::one());
    }
}

////////////////////////////
// Test utility functions //
////////////////////////////

/// Returns an rng to be used for testing, printing the seed to stderr so
/// that a failing run can be reproduced.
#[cfg(test)]
pub(crate) mod testing {
    use rand::{
        rngs::{OsRng, StdRng},
        Rng, SeedableRng,
    };

    /// Initialize the test rng. This will print the rng seed to stderr so
    /// that if a test fails, the failing seed can be recovered and used for
    /// debugging with [`init_testing_with_seed`].
    pub(crate) fn init_testing() -> StdRng {
        let mut seeder = OsRng;
        let seed = seeder.gen();
        eprintln!(
            "To re-run test with the same randomness, use init_testing_with_seed() with the following seed:"
        );
        eprintln!("\t{seed:?}");
        StdRng::from_seed(seed)
    }

    /// A seeded version of [`init_testing`] for reproducing a failing run.
    ///
    /// **Additionally, turns on logging by default.** Avoid calling as part
    /// of a normal unit test execution; some tests purposely feed bad input
    /// to functions and the resulting error events are confusing next to an
    /// `ok` test result.
    #[allow(unused)]
    pub(crate) fn init_testing_with_seed(seed: [u8; 32]) -> StdRng {
        use tracing_subscriber::{
            filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, Layer,
        };

        let targets = Targets::new().with_target("threshold_ecdsa", tracing::Level::DEBUG);
        let stdout_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_filter(targets);
        // It's okay if this fails; it just means logging has already been set
        // up for this thread.
        let _ = tracing_subscriber::registry().with(stdout_layer).try_init();

        StdRng::from_seed(seed)
    }
}
