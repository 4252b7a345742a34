//! The long-lived secret record produced by key generation.

use crate::{
    curve::{CurveTrait, ScalarTrait, VerifyingKeyTrait},
    errors::{Error, Result},
    paillier::{DecryptionKey, EncryptionKey},
    parameters::PRIME_BITS,
    protocol::{Committee, Ssid},
    ring_pedersen::VerifiedRingPedersen,
};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt::Debug;
use zeroize::Zeroize;

/// Everything a party must persist between phases: its key share, every
/// party's public material, and the session binder. Created by key
/// generation, replaced wholesale by resharing, and handed to the keystore
/// collaborator as an opaque blob.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct SaveData<C: CurveTrait> {
    /// The committee this key is shared across.
    pub(crate) committee: Committee,
    /// This party's additive share of the private key (a Shamir share).
    pub(crate) xi: C::Scalar,
    /// This party's index in the committee order.
    pub(crate) self_index: usize,
    /// The evaluation point of this party's share.
    pub(crate) share_id: C::Scalar,
    /// This party's Paillier decryption key.
    pub(crate) paillier_sk: DecryptionKey,
    /// Every party's Paillier encryption key, committee-ordered.
    pub(crate) paillier_pks: Vec<EncryptionKey>,
    /// Every party's ring-Pedersen parameters, committee-ordered.
    pub(crate) rped: Vec<VerifiedRingPedersen>,
    /// Public commitment to every party's key share (`g^{x_j}`).
    pub(crate) big_x: Vec<C>,
    /// The joint public key.
    pub(crate) public_key_point: C,
    /// Every party's evaluation point, committee-ordered. Fixed at keygen;
    /// only resharing changes it.
    pub(crate) ks: Vec<C::Scalar>,
    /// The combined session nonce all parties contributed to.
    pub(crate) rid: [u8; 32],
}

impl<C: CurveTrait> Debug for SaveData<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveData")
            .field("xi", &"[redacted]")
            .field("self_index", &self.self_index)
            .field("public_key_point", &self.public_key_point)
            .finish()
    }
}

impl<C: CurveTrait> Drop for SaveData<C> {
    fn drop(&mut self) {
        self.xi.zeroize();
    }
}

impl<C: CurveTrait> SaveData<C> {
    /// Check the record's internal consistency for a committee of size `n`.
    ///
    /// Every per-party table must have exactly one entry per party, and our
    /// own ring-Pedersen modulus must have the full double-prime width; a
    /// shorter own modulus means parameter generation was broken and no
    /// peer should be asked to trust it.
    pub fn validate(&self, n: usize) -> Result<()> {
        if self.committee.size() != n
            || self.big_x.len() != n
            || self.paillier_pks.len() != n
            || self.rped.len() != n
            || self.ks.len() != n
        {
            return Err(Error::BadInput("save data tables disagree on party count"));
        }
        if self.self_index >= n {
            return Err(Error::BadInput("save data self index out of range"));
        }
        if self.rped[self.self_index].scheme().modulus_bit_length() < 2 * PRIME_BITS - 1 {
            return Err(Error::BadInput("own ring-Pedersen modulus too short"));
        }
        if self.paillier_pks[self.self_index].modulus() != self.paillier_sk.modulus() {
            return Err(Error::BadInput("own Paillier keypair mismatch"));
        }
        Ok(())
    }

    /// The session identifier derived from this key material. Binds
    /// presignatures to this exact set of key-share commitments.
    pub fn ssid(&self) -> Ssid {
        let mut hasher = Keccak256::new();
        hasher.update(self.rid);
        for commitment in &self.big_x {
            hasher.update(commitment.to_bytes());
        }
        for k in &self.ks {
            hasher.update(k.to_bytes());
        }
        hasher.update(self.public_key_point.to_bytes());
        Ssid::from_bytes(hasher.finalize().into())
    }

    /// The joint ECDSA verifying key.
    pub fn public_key(&self) -> Result<C::VerifyingKey> {
        C::VerifyingKey::from_point(self.public_key_point)
    }

    pub(crate) fn own_paillier_pk(&self) -> &EncryptionKey {
        &self.paillier_pks[self.self_index]
    }

    pub(crate) fn own_rped(&self) -> &VerifiedRingPedersen {
        &self.rped[self.self_index]
    }
}
