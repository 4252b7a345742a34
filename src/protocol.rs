//! Party identities, committee descriptions, and per-phase parameters.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{Error, Result},
    zkp::ProofContext,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt::Display, marker::PhantomData};

/// A protocol participant's identity.
///
/// The `key` is the unique identifier messages are routed by; the `moniker`
/// is a human-readable label for logs. The `index` is the party's position
/// in its committee's canonical (key-sorted) order and is assigned when the
/// committee is formed; every per-party array in the protocol is indexed by
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartyId {
    key: String,
    moniker: String,
    index: usize,
}

impl PartyId {
    /// Create an identity. The index is assigned later by [`Committee::new`].
    pub fn new(key: impl Into<String>, moniker: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            moniker: moniker.into(),
            index: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn moniker(&self) -> &str {
        &self.moniker
    }

    /// Position in the committee's canonical order.
    pub fn index(&self) -> usize {
        self.index
    }
}

// Identity is the key alone; moniker and index are derived presentation.
impl PartialEq for PartyId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PartyId {}

impl std::hash::Hash for PartyId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for PartyId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartyId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl Display for PartyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.moniker)
    }
}

/// A set of parties and the reconstruction threshold they share under.
///
/// Holds the parties in canonical order; `t + 1` of them can reconstruct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committee {
    parties: Vec<PartyId>,
    threshold: usize,
}

impl Committee {
    /// Form a committee. Sorts the parties into canonical order, assigns
    /// indices, and checks `0 < t + 1 <= n`.
    pub fn new(mut parties: Vec<PartyId>, threshold: usize) -> Result<Self> {
        let unique: HashSet<&str> = parties.iter().map(|p| p.key.as_str()).collect();
        if unique.len() != parties.len() {
            return Err(Error::BadInput("duplicate party keys"));
        }
        if threshold + 1 > parties.len() {
            return Err(Error::BadInput("threshold too large for party count"));
        }
        parties.sort();
        for (index, party) in parties.iter_mut().enumerate() {
            party.index = index;
        }
        Ok(Self { parties, threshold })
    }

    /// Number of parties.
    pub fn size(&self) -> usize {
        self.parties.len()
    }

    /// The threshold `t`: any `t + 1` parties can reconstruct.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    pub fn party(&self, index: usize) -> Result<&PartyId> {
        self.parties
            .get(index)
            .ok_or(Error::BadInput("party index out of range"))
    }

    pub fn index_of(&self, id: &PartyId) -> Option<usize> {
        self.parties.iter().position(|p| p == id)
    }

    pub fn contains(&self, id: &PartyId) -> bool {
        self.index_of(id).is_some()
    }

    /// The Lagrange evaluation point assigned to a party. Offset by one so
    /// that no party sits at zero, where the secret lives.
    pub(crate) fn share_id<C: CurveTrait>(&self, index: usize) -> C::Scalar {
        C::Scalar::from_u128(index as u128 + 1)
    }

    /// All parties' evaluation points, in canonical order.
    pub(crate) fn share_ids<C: CurveTrait>(&self) -> Vec<C::Scalar> {
        (0..self.parties.len())
            .map(|i| self.share_id::<C>(i))
            .collect()
    }
}

/// Parameters for one party's run of a protocol phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters<C> {
    committee: Committee,
    self_index: usize,
    curve: PhantomData<C>,
}

impl<C: CurveTrait> Parameters<C> {
    /// Bind a committee to the local party.
    pub fn new(committee: Committee, self_id: &PartyId) -> Result<Self> {
        let self_index = committee
            .index_of(self_id)
            .ok_or(Error::BadInput("local party not in committee"))?;
        Ok(Self {
            committee,
            self_index,
            curve: PhantomData,
        })
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    pub fn n(&self) -> usize {
        self.committee.size()
    }

    pub fn t(&self) -> usize {
        self.committee.threshold()
    }

    pub fn self_index(&self) -> usize {
        self.self_index
    }

    pub fn self_id(&self) -> &PartyId {
        &self.committee.parties[self.self_index]
    }

    pub fn party(&self, index: usize) -> Result<&PartyId> {
        self.committee.party(index)
    }

    /// Indices of all parties other than ourselves.
    pub(crate) fn other_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n()).filter(move |&i| i != self.self_index)
    }

    pub(crate) fn share_id(&self, index: usize) -> C::Scalar {
        self.committee.share_id::<C>(index)
    }

    pub(crate) fn own_share_id(&self) -> C::Scalar {
        self.share_id(self.self_index)
    }
}

/// Session identifier: binds every message of a protocol run to the run's
/// key material, preventing cross-session replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ssid([u8; 32]);

impl Ssid {
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for Ssid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Proof context shared by every proof in one phase of one session: the
/// phase tag, the session binder, the committee roster, and the curve order.
#[derive(Debug, Clone)]
pub(crate) struct SharedContext {
    bytes: Vec<u8>,
}

impl SharedContext {
    pub(crate) fn new<C: CurveTrait>(
        phase_tag: &'static [u8],
        session_binder: &[u8],
        committee: &Committee,
    ) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(phase_tag);
        bytes.extend_from_slice(session_binder);
        for party in committee.parties() {
            bytes.extend_from_slice(party.key().as_bytes());
            bytes.push(0);
        }
        bytes.extend_from_slice(&C::order().to_bytes());
        Self { bytes }
    }
}

impl ProofContext for SharedContext {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use rand::{CryptoRng, Rng, RngCore};

    /// A committee of `n` random parties with threshold `t`.
    pub(crate) fn random_committee<R: RngCore + CryptoRng>(
        n: usize,
        t: usize,
        rng: &mut R,
    ) -> Committee {
        let parties = (0..n)
            .map(|i| {
                let key: u128 = rng.gen();
                PartyId::new(format!("{key:032x}"), format!("party-{i}"))
            })
            .collect();
        Committee::new(parties, t).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    #[test]
    fn committee_sorts_and_indexes_parties() {
        let parties = vec![
            PartyId::new("charlie", "c"),
            PartyId::new("alice", "a"),
            PartyId::new("bob", "b"),
        ];
        let committee = Committee::new(parties, 1).unwrap();
        let keys: Vec<&str> = committee.parties().iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["alice", "bob", "charlie"]);
        for (i, party) in committee.parties().iter().enumerate() {
            assert_eq!(party.index(), i);
        }
    }

    #[test]
    fn degenerate_committees_are_rejected() {
        let parties = vec![PartyId::new("a", "a"), PartyId::new("b", "b")];
        assert!(Committee::new(parties.clone(), 2).is_err());

        let duplicates = vec![PartyId::new("a", "a"), PartyId::new("a", "b")];
        assert!(Committee::new(duplicates, 0).is_err());
    }

    #[test]
    fn parameters_require_membership() {
        let rng = &mut init_testing();
        let committee = testing::random_committee(3, 1, rng);
        let outsider = PartyId::new("outsider", "x");
        assert!(Parameters::<TestCurve>::new(committee.clone(), &outsider).is_err());

        let member = committee.parties()[1].clone();
        let params = Parameters::<TestCurve>::new(committee, &member).unwrap();
        assert_eq!(params.self_index(), 1);
        assert_eq!(params.other_indices().collect::<Vec<_>>(), vec![0, 2]);
    }
}
