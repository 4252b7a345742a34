//! Commit-then-open values for key generation round one.

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    paillier::EncryptionKey,
    protocol::PartyId,
    ring_pedersen::VerifiedRingPedersen,
    vss::VssCommitment,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// The hash broadcast in round one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct KeygenCommit {
    hash: [u8; 32],
}

impl KeygenCommit {
    #[cfg(test)]
    pub(crate) fn from_hash(hash: [u8; 32]) -> Self {
        Self { hash }
    }

    pub(crate) fn validate_basic(&self) -> Result<()> {
        Ok(())
    }
}

/// The opening broadcast in round two: everything round one committed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct KeygenDecommit<C: CurveTrait> {
    /// Index of the committing party; bound into the hash so an opening
    /// cannot be replayed as someone else's.
    pub(crate) sender_index: usize,
    /// This party's contribution to the combined session nonce.
    pub(crate) rid_share: [u8; 32],
    /// Commitment to the party's secret-sharing polynomial.
    pub(crate) vss_commitment: VssCommitment<C>,
    /// The party's Paillier encryption key.
    pub(crate) paillier_pk: EncryptionKey,
    /// The party's ring-Pedersen parameters with their proof.
    pub(crate) rped: VerifiedRingPedersen,
}

impl<C: CurveTrait> KeygenDecommit<C> {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        sender_index: usize,
        vss_commitment: VssCommitment<C>,
        paillier_pk: EncryptionKey,
        rped: VerifiedRingPedersen,
    ) -> Self {
        let mut rid_share = [0u8; 32];
        rng.fill_bytes(&mut rid_share);
        Self {
            sender_index,
            rid_share,
            vss_commitment,
            paillier_pk,
            rped,
        }
    }

    /// Hash this opening down to its round-one commitment.
    pub(crate) fn commit(&self) -> Result<KeygenCommit> {
        let mut transcript = Transcript::new(b"KeygenR1");
        transcript.append_message(b"decommit", &serialize!(&self)?);
        let mut hash = [0u8; 32];
        transcript.challenge_bytes(b"hashing r1", &mut hash);
        Ok(KeygenCommit { hash })
    }

    /// Check this opening against a previously received commitment. The
    /// hash equality is the binding property of the commit scheme; any
    /// mismatch names the sender.
    pub(crate) fn verify(
        &self,
        sender: &PartyId,
        expected_threshold: usize,
        com: &KeygenCommit,
    ) -> Result<()> {
        if &self.commit()? != com {
            error!("opening does not match original commitment");
            return Err(Error::culprit(sender, "opening does not match commitment"));
        }
        if self.sender_index != sender.index() {
            error!("opening claims the wrong sender");
            return Err(Error::culprit(sender, "opening claims wrong sender"));
        }
        if self.vss_commitment.threshold() != expected_threshold {
            error!("VSS commitment has the wrong degree");
            return Err(Error::culprit(sender, "wrong VSS threshold"));
        }
        Ok(())
    }

    pub(crate) fn validate_basic(&self) -> Result<()> {
        self.rped.scheme().validate_basic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve, paillier::DecryptionKey, protocol::testing::random_committee,
        utils::testing::init_testing, vss::Polynomial,
    };

    fn decommit(rng: &mut rand::rngs::StdRng, sender_index: usize) -> KeygenDecommit<TestCurve> {
        let polynomial = Polynomial::<TestCurve>::sample(None, 1, rng);
        let dk = DecryptionKey::generate(rng).unwrap();
        let rped = VerifiedRingPedersen::generate(rng, &()).unwrap();
        KeygenDecommit::new(
            rng,
            sender_index,
            polynomial.commitment(),
            dk.encryption_key(),
            rped,
        )
    }

    #[test]
    fn opening_matches_own_commitment() {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let sender = &committee.parties()[1];
        let decommit = decommit(&mut rng, 1);
        let com = decommit.commit().unwrap();
        assert!(decommit.verify(sender, 1, &com).is_ok());
    }

    #[test]
    fn any_mutation_breaks_the_binding() {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let sender = &committee.parties()[1];
        let original = decommit(&mut rng, 1);
        let com = original.commit().unwrap();

        // Swap in a different nonce share.
        let mut mutated = original.clone();
        mutated.rid_share[0] ^= 1;
        assert!(mutated.verify(sender, 1, &com).is_err());

        // Swap in a different polynomial commitment.
        let mut mutated = original.clone();
        mutated.vss_commitment = Polynomial::<TestCurve>::sample(None, 1, &mut rng).commitment();
        assert!(mutated.verify(sender, 1, &com).is_err());

        // Swap in somebody else's whole opening.
        let other = decommit(&mut rng, 1);
        assert!(other.verify(sender, 1, &com).is_err());
    }

    #[test]
    fn sender_index_is_bound() {
        let mut rng = init_testing();
        let committee = random_committee(3, 1, &mut rng);
        let decommit = decommit(&mut rng, 2);
        let com = decommit.commit().unwrap();
        // Verifying as party 1 must fail even though the hash matches.
        assert!(decommit.verify(&committee.parties()[1], 1, &com).is_err());
        assert!(decommit.verify(&committee.parties()[2], 1, &com).is_ok());
    }
}
