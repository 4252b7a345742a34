//! Paillier-encrypted VSS shares.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{Error, Result},
    paillier::{Ciphertext, DecryptionKey, EncryptionKey},
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::error;

/// A secret-sharing evaluation encrypted to its recipient.
///
/// The plaintext is a scalar in `[1, q)`; anything outside that range on
/// decryption means the sender cheated (or the ciphertext was for someone
/// else).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EncryptedShare<C> {
    ciphertext: Ciphertext,
    curve: PhantomData<C>,
}

impl<C: CurveTrait> EncryptedShare<C> {
    pub(crate) fn encrypt<R: RngCore + CryptoRng>(
        share: &C::Scalar,
        pk: &EncryptionKey,
        rng: &mut R,
    ) -> Result<Self> {
        if &(C::order() * 2) >= pk.modulus() {
            error!("peer Paillier modulus is too small to hold a share");
            return Err(Error::LocalFailure("Paillier modulus smaller than share space"));
        }
        let plaintext = C::scalar_to_bn(share);
        if plaintext < BigNumber::one() {
            return Err(Error::LocalFailure("degenerate zero share"));
        }
        let (ciphertext, _nonce) = pk.encrypt(rng, &plaintext)?;
        Ok(Self {
            ciphertext,
            curve: PhantomData,
        })
    }

    pub(crate) fn decrypt(&self, dk: &DecryptionKey) -> Result<C::Scalar> {
        let plaintext = dk.decrypt(&self.ciphertext).map_err(|_| {
            error!("share decryption failed, ciphertext out of range");
            Error::MalformedMessage("undecryptable share ciphertext")
        })?;
        if plaintext >= C::order() || plaintext < BigNumber::one() {
            error!("decrypted share out of range");
            return Err(Error::MalformedMessage("share plaintext out of range"));
        }
        C::bn_to_scalar(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    #[test]
    fn share_encryption_round_trips() {
        let mut rng = init_testing();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();

        let share = <Scalar as ScalarTrait>::random(&mut rng);
        let encrypted = EncryptedShare::<TestCurve>::encrypt(&share, &pk, &mut rng).unwrap();
        assert_eq!(encrypted.decrypt(&dk).unwrap(), share);
    }

    #[test]
    fn out_of_range_plaintexts_are_rejected() {
        let mut rng = init_testing();
        let dk = DecryptionKey::generate(&mut rng).unwrap();
        let pk = dk.encryption_key();

        // An encryption of q is out of range for a share.
        let (ciphertext, _) = pk.encrypt(&mut rng, &TestCurve::order()).unwrap();
        let encrypted = EncryptedShare::<TestCurve> {
            ciphertext,
            curve: PhantomData,
        };
        assert!(encrypted.decrypt(&dk).is_err());
    }
}
