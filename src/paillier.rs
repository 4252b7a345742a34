//! Paillier encryption over a modulus of unknown factorization.
//!
//! The homomorphic layer the multiplicative-to-additive conversion runs on:
//! parties compute on each other's encrypted shares without decrypting them.
//! Plaintexts are treated as signed representatives in `(-N/2, N/2]`, which
//! is what the MtA accumulation arithmetic needs.

use crate::{
    errors::{Error, Result},
    utils::{modpow_signed, random_bn_in_z_star},
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A Paillier ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(BigNumber);

impl Ciphertext {
    pub(crate) fn as_bn(&self) -> &BigNumber {
        &self.0
    }
}

/// The randomizer of a Paillier ciphertext. Must never travel to a verifier
/// outside of a zero-knowledge proof response.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Nonce(BigNumber);

impl Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Nonce([redacted])")
    }
}

impl Nonce {
    pub(crate) fn from_bn(bn: BigNumber) -> Self {
        Nonce(bn)
    }

    pub(crate) fn as_bn(&self) -> &BigNumber {
        &self.0
    }
}

/// A Paillier encryption key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    n: BigNumber,
}

impl EncryptionKey {
    pub(crate) fn from_modulus(n: BigNumber) -> Self {
        Self { n }
    }

    /// The public modulus `N`.
    pub(crate) fn modulus(&self) -> &BigNumber {
        &self.n
    }

    fn modulus_squared(&self) -> BigNumber {
        &self.n * &self.n
    }

    /// Half the modulus; the boundary of the signed plaintext range.
    fn half_n(&self) -> BigNumber {
        self.n.clone() >> 1
    }

    /// Encrypt a plaintext in the signed range `(-N/2, N/2]` with a fresh
    /// nonce.
    pub(crate) fn encrypt<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        x: &BigNumber,
    ) -> Result<(Ciphertext, Nonce)> {
        if x > &self.half_n() || x < &-self.half_n() {
            return Err(Error::LocalFailure("plaintext out of encryptable range"));
        }
        let nonce = Nonce(random_bn_in_z_star(rng, &self.n)?);
        let c = self.encrypt_with_nonce(x, &nonce)?;
        Ok((c, nonce))
    }

    /// Encrypt with a caller-supplied nonce. Does not range-check the
    /// plaintext; it is reduced mod `N`. Used by proof verification and by
    /// transcript replay, where the "plaintext" is a masked response value.
    pub(crate) fn encrypt_with_nonce(&self, x: &BigNumber, nonce: &Nonce) -> Result<Ciphertext> {
        let nn = self.modulus_squared();
        let m = x.nmod(&self.n);
        // (1 + N)^m = 1 + mN (mod N^2).
        let g_to_m = (BigNumber::one() + &m * &self.n).nmod(&nn);
        let masked = modpow_signed(nonce.as_bn(), &self.n, &nn)?;
        Ok(Ciphertext(g_to_m.modmul(&masked, &nn)))
    }

    fn check_ciphertext(&self, c: &Ciphertext, nn: &BigNumber) -> Result<()> {
        if c.0 <= BigNumber::zero() || &c.0 >= nn || c.0.gcd(&self.n) != BigNumber::one() {
            return Err(Error::MalformedMessage("ciphertext outside group"));
        }
        Ok(())
    }

    /// Homomorphic addition: a ciphertext of `m1 + m2`.
    pub(crate) fn add(&self, c1: &Ciphertext, c2: &Ciphertext) -> Result<Ciphertext> {
        let nn = self.modulus_squared();
        self.check_ciphertext(c1, &nn)?;
        self.check_ciphertext(c2, &nn)?;
        Ok(Ciphertext(c1.0.modmul(&c2.0, &nn)))
    }

    /// Homomorphic scalar multiplication: a ciphertext of `a * m`. The scalar
    /// may be negative.
    pub(crate) fn multiply(&self, c: &Ciphertext, a: &BigNumber) -> Result<Ciphertext> {
        let nn = self.modulus_squared();
        self.check_ciphertext(c, &nn)?;
        Ok(Ciphertext(modpow_signed(&c.0, a, &nn)?))
    }

    /// Homomorphic affine step: a ciphertext of `a * m_c + m_b`. The core of
    /// the MtA exchange.
    pub(crate) fn multiply_and_add(
        &self,
        a: &BigNumber,
        c: &Ciphertext,
        b: &Ciphertext,
    ) -> Result<Ciphertext> {
        let scaled = self.multiply(c, a)?;
        self.add(&scaled, b)
    }
}

/// A Paillier decryption key.
///
/// Holds the factorization of the modulus; must be persisted only through an
/// encrypting keystore.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct DecryptionKey {
    p: BigNumber,
    q: BigNumber,
    #[zeroize(skip)]
    n: BigNumber,
    totient: BigNumber,
}

impl Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKey")
            .field("p", &"[redacted]")
            .field("q", &"[redacted]")
            .field("n", &self.n)
            .finish()
    }
}

impl PartialEq for DecryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.n == other.n
    }
}

impl DecryptionKey {
    /// Build a keypair from two distinct primes.
    pub(crate) fn from_primes(p: &BigNumber, q: &BigNumber) -> Result<Self> {
        if p == q {
            return Err(Error::LocalFailure("Paillier primes must be distinct"));
        }
        let n = p * q;
        let totient = (p - 1) * (q - 1);
        Ok(Self {
            p: p.clone(),
            q: q.clone(),
            n,
            totient,
        })
    }

    /// Generate a fresh keypair from two safe primes.
    pub(crate) fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let (p, q) = prime_gen::safe_prime_pair(rng)?;
        Self::from_primes(&p, &q)
    }

    /// The matching encryption key.
    pub(crate) fn encryption_key(&self) -> EncryptionKey {
        EncryptionKey::from_modulus(self.n.clone())
    }

    pub(crate) fn modulus(&self) -> &BigNumber {
        &self.n
    }

    /// The prime factors of the modulus, for the `Fac` and `Mod` proofs.
    pub(crate) fn primes(&self) -> (&BigNumber, &BigNumber) {
        (&self.p, &self.q)
    }

    /// Decrypt to the signed representative in `(-N/2, N/2]`.
    pub(crate) fn decrypt(&self, c: &Ciphertext) -> Result<BigNumber> {
        let nn = &self.n * &self.n;
        self.encryption_key().check_ciphertext(c, &nn)?;
        // m = L(c^phi mod N^2) * phi^{-1} mod N, with L(u) = (u - 1) / N.
        let u = c.0.modpow(&self.totient, &nn);
        let ell = (u - BigNumber::one()) / self.n.clone();
        let phi_inv = self
            .totient
            .invert(&self.n)
            .ok_or(Error::LocalFailure("totient not invertible"))?;
        let m = ell.modmul(&phi_inv, &self.n);
        if m > (self.n.clone() >> 1) {
            Ok(m - &self.n)
        } else {
            Ok(m)
        }
    }

    /// Recover the nonce a ciphertext was encrypted with. Only the key owner
    /// can do this; it is what lets a party prove statements about
    /// ciphertexts other parties homomorphically assembled for it.
    pub(crate) fn nonce(&self, c: &Ciphertext) -> Result<Nonce> {
        let n_inv = self
            .n
            .invert(&self.totient)
            .ok_or(Error::LocalFailure("modulus not invertible mod totient"))?;
        // c = (1 + N)^m r^N, so c mod N = r^N mod N; undo the N-th power.
        let r = c.0.nmod(&self.n).modpow(&n_inv, &self.n);
        if r.gcd(&self.n) != BigNumber::one() {
            return Err(Error::LocalFailure("recovered nonce outside group"));
        }
        Ok(Nonce(r))
    }
}

/// Safe prime generation.
pub(crate) mod prime_gen {
    use super::*;
    #[cfg(not(test))]
    use crate::parameters::PRIME_BITS;

    /// Sample a pair of distinct safe primes for a Paillier or ring-Pedersen
    /// modulus. The generator draws its own entropy; the rng parameter keeps
    /// the call sites uniform with the pooled test variant.
    #[cfg(not(test))]
    pub(crate) fn safe_prime_pair<R: RngCore + CryptoRng>(
        _rng: &mut R,
    ) -> Result<(BigNumber, BigNumber)> {
        let p = BigNumber::safe_prime(PRIME_BITS);
        let q = std::iter::repeat_with(|| BigNumber::safe_prime(PRIME_BITS))
            .take(4)
            .find(|q| q != &p)
            .ok_or(Error::LocalFailure("prime generation failed"))?;
        Ok((p, q))
    }

    /// Tests draw from a fixed pool instead of paying for safe-prime
    /// generation on every run.
    #[cfg(test)]
    pub(crate) fn safe_prime_pair<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> Result<(BigNumber, BigNumber)> {
        get_prime_pair_from_pool_insecure(rng)
    }

    /// A pool of pre-generated 512-bit safe primes. Obviously insecure for
    /// anything but tests.
    #[cfg(test)]
    const POOL_OF_PRIMES: &[&str] = &[
        "C369218FD3664CB44913FEFEEFB3D7B2DB0C606572393BF56EB4C7AF0664DE1B8714AD8E6068B76FEC7FB4A950BEF8CD40469C6706C23D46251C5E6DFF36445B",
        "D381A7801143F32A72122E2A67660AD06D463E1C0161BC07C700F3483528301C6E08525397F707DFD5ACC6D92BFFB70203C4DFC1083223E11F0C8502B86F7CDF",
        "DBA1075285ECB3B28BA3EACC4D2DF77FC35C7DF48E9EEB40D7206AA700B30C7BFC508CE35BCFDFC8CD60E0D18FF2BAAF6E6B466326824456373C0044D439A9A3",
        "EEF7EFA23F417A60B8E556A2F098C76865152D2539ECB49A2D7F1858D0132951A78BA097D6192F5AC1FEED724B2DDDC02B501BE22070AB522AC80D037C43D8DB",
        "E5AD3D94CB2A7F0CC1957AB2145FCAD7EAB8EED569C1D5E3917712C15F7F7F55F59857826B7CAA0E1BAFA4E0D050FBDEB0319ACDFC6AFC05B07D0075DF4BF577",
        "D331299108C1E58534F8BB4442EC16624B8CEFFDAE3E9EAD7AAA40E11995BB0E355476195799F1FCF1A9A7EEF4A1BBC2D807F2A4685E7C6D7B8FC78DBF34932F",
        "DE504EC6089F639ED46E11F4B73CF57615BBFA11E830AD96C61BAC44EC39AC42967F0471B5D546FCB1FD930C7AE63F6244930A81831AE2DCF34A7A2756C6B057",
        "FA4CCC3DEBCB7339B5060F386416505A1F1937AD9FD6D997F328EFC3689D0DB751D21A8807E5A3E16F90BC18417C562E0933528DA0ADCC0FF9991C611F705093",
        "FAB168B34B474172D56EBF0ECADB4AF92E874159D79A339F86D73DD281F0DA5DBDAAC8AE16D0D6FAB746ED2B38F8BA6CB812F5F667D15A62CD5F52DF3A188197",
        "F5311E0AD24E8BF08352B38607D28248EF1DB5778EFFC4FF1BFE4DF1F1A3CB9A30B6137860A1B5A51A08FF3F34B6AA91F96E79BB9D40BA316120A3D1ADBD8977",
        "E4EDC16E0646B9E3DDCCAF2AD364B8A543ECF210F7807B5D43863BF38B47FA237D3A63F883AA17AA995E594C92173DF6456D71CF4821CC895D4ACAAFF7D7CCF3",
        "F3567CF95680A71A62DF10D3CE4BE9A87904A98D2D1B6F23C3EEF64E21D0BEF1BA149BE535E174E8261E1D9E812162DA3D4544950B3F49FB331465654C7EE31B",
        "E723EDC790C389B2034CCB25D4F6A7B5C549BC5A477B6C729AE32C125FADB2C537B492E692F617B5BF32A1AB4D099D732C5F5885F295FD0AAB44675B62BF17D3",
        "F5F1137E790FD3A0CA1F15AC69E7F09ABB9DC9A8F541D2A0AE059AD96594FF74E6B89F503858A4B5A97C73064F0CD395DEBEF73F24A2C96A209F113B6947E523",
        "DF79449761652181AFE5542123CB75490A92BE8C362C6C9A1C209A252DD2D3027D2B7C2ECFF6A565A51261B1EC0B4EABC38D8EF5E75166B20E22F4D931D09E6B",
        "C07BCCE993058DB4DC6AE27F08430BE0BA5913812FF1B8A5CF087B8B6F6F857B24B82E6B1FABCC10C9215CC338AD7F880FFE8B08D5C332CCBA60A704C85F88DF",
        "E7306489C16F544513164C6939367E75EBD537DF9BC567ED183B7DCE5966A7403FF085D9A175DA07CFAC2E0A38D49878943502BCDD2A8A084EED13165BD99917",
        "E4512AE1A3C61538C709A806B449F8D81142A6B499469F55DD7A4304673AAACA0D4192722632C45A159EAD5D6326C037D6A573057FFC551A410FEBDF1A5064A7",
        "E9EA1DAC3595D1602E1C8AB82DDF54F755DDE5C70FF1A6D6C4D19B2DF8E22366837813239D09918DF6B78BAC6E0B6B6834877257BFED7FAFFA4EA94793282BB7",
        "F839C454028676471C51FF6349FE0F1DA631EF4854CD03355052E20E117963FF885FA5CC7CEBB9F7BCA63267BB5BEE28A7C0111F42295DBF963B680804DC0427",
        "E80C7867A8C370D2C295DA3D8869EF12E87446C3993F940570A65C6CD1C9A24F1E588D9D300552DEDE7BFF01FF11636A647C05BDFE52841E0A76577597AB0F2B",
        "DE199736C2F23F8DC83052F645064F99B619C39D6BDE5626FFC6AA02CCF42320EBBADB44D24272CCCE931E1B30D908EBE810A943F9EEB8645357A031F9E1713B",
    ];

    #[cfg(test)]
    fn pool_prime(index: usize) -> BigNumber {
        let hex = POOL_OF_PRIMES[index % POOL_OF_PRIMES.len()];
        let bytes: Vec<u8> = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("pool entries are valid hex"))
            .collect();
        BigNumber::from_slice(bytes)
    }

    /// Draw a random safe prime from the pool. Insecure: for tests only.
    #[cfg(test)]
    pub(crate) fn try_get_prime_from_pool_insecure<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> Result<BigNumber> {
        use rand::Rng;
        Ok(pool_prime(rng.gen_range(0..POOL_OF_PRIMES.len())))
    }

    /// Draw a random pair of distinct safe primes from the pool. Insecure:
    /// for tests only.
    #[cfg(test)]
    pub(crate) fn get_prime_pair_from_pool_insecure<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> Result<(BigNumber, BigNumber)> {
        use rand::Rng;
        let i = rng.gen_range(0..POOL_OF_PRIMES.len());
        let offset = rng.gen_range(1..POOL_OF_PRIMES.len());
        Ok((pool_prime(i), pool_prime(i + offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{random_positive_bn, testing::init_testing};

    fn keypair() -> (rand::rngs::StdRng, EncryptionKey, DecryptionKey) {
        let mut rng = init_testing();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();
        (rng, pk, dk)
    }

    #[test]
    fn encryption_round_trips() {
        let (mut rng, pk, dk) = keypair();
        let x = random_positive_bn(&mut rng, &(pk.modulus().clone() >> 2));
        let (c, _nonce) = pk.encrypt(&mut rng, &x).unwrap();
        assert_eq!(dk.decrypt(&c).unwrap(), x);
    }

    #[test]
    fn negative_plaintexts_round_trip() {
        let (mut rng, pk, dk) = keypair();
        let x = -random_positive_bn(&mut rng, &(pk.modulus().clone() >> 2));
        let (c, _nonce) = pk.encrypt(&mut rng, &x).unwrap();
        assert_eq!(dk.decrypt(&c).unwrap(), x);
    }

    #[test]
    fn plaintexts_outside_half_range_are_rejected() {
        let (mut rng, pk, _dk) = keypair();
        let too_big = pk.modulus().clone();
        assert!(pk.encrypt(&mut rng, &too_big).is_err());
    }

    #[test]
    fn homomorphic_addition_works() {
        let (mut rng, pk, dk) = keypair();
        let bound = pk.modulus().clone() >> 3;
        let x = random_positive_bn(&mut rng, &bound);
        let y = random_positive_bn(&mut rng, &bound);
        let (cx, _) = pk.encrypt(&mut rng, &x).unwrap();
        let (cy, _) = pk.encrypt(&mut rng, &y).unwrap();
        let sum = pk.add(&cx, &cy).unwrap();
        assert_eq!(dk.decrypt(&sum).unwrap(), x + y);
    }

    #[test]
    fn multiply_and_add_matches_plain_arithmetic() {
        let (mut rng, pk, dk) = keypair();
        let bound = BigNumber::one() << 64;
        let a = random_positive_bn(&mut rng, &bound);
        let x = random_positive_bn(&mut rng, &bound);
        let b = random_positive_bn(&mut rng, &bound);
        let (cx, _) = pk.encrypt(&mut rng, &x).unwrap();
        let (cb, _) = pk.encrypt(&mut rng, &b).unwrap();
        let combined = pk.multiply_and_add(&a, &cx, &cb).unwrap();
        assert_eq!(dk.decrypt(&combined).unwrap(), &a * &x + &b);
    }

    #[test]
    fn negative_scalar_multiplication_works() {
        let (mut rng, pk, dk) = keypair();
        let x = random_positive_bn(&mut rng, &(BigNumber::one() << 64));
        let (cx, _) = pk.encrypt(&mut rng, &x).unwrap();
        let negated = pk.multiply(&cx, &-BigNumber::one()).unwrap();
        assert_eq!(dk.decrypt(&negated).unwrap(), -x);
    }

    #[test]
    fn nonce_recovery_matches_encryption_nonce() {
        let (mut rng, pk, dk) = keypair();
        let x = random_positive_bn(&mut rng, &(BigNumber::one() << 100));
        let (c, nonce) = pk.encrypt(&mut rng, &x).unwrap();
        let recovered = dk.nonce(&c).unwrap();
        assert_eq!(recovered.as_bn(), nonce.as_bn());
        // And the recovered nonce re-encrypts to the same ciphertext.
        let again = pk.encrypt_with_nonce(&x, &recovered).unwrap();
        assert_eq!(again, c);
    }

    #[test]
    fn tampered_ciphertexts_are_rejected() {
        let (mut rng, pk, dk) = keypair();
        let x = random_positive_bn(&mut rng, &(BigNumber::one() << 64));
        let (c, _) = pk.encrypt(&mut rng, &x).unwrap();
        let zero = Ciphertext(BigNumber::zero());
        assert!(dk.decrypt(&zero).is_err());
        assert!(pk.add(&c, &zero).is_err());
    }
}
