//! Balance deltas
//!
//! [`EventDelta`] is what an on-chain event window does to one contract's
//! holders. [`DeltaMap`] is the signed per-account change over a window,
//! keyed by the off-chain account id so both sides of a dual-source
//! comparison line up.

use crate::ledger::Ledger;
use crate::types::{AccountKey, Address};
use num_bigint::BigInt;
use num_traits::Zero;
use std::collections::{BTreeMap, BTreeSet};

/// Increases and decreases produced by one event window on one contract
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventDelta {
    /// Amounts credited per account
    pub increased: Ledger,

    /// Amounts debited per account (stored as positive magnitudes)
    pub decreased: Ledger,
}

impl EventDelta {
    /// Empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `account`
    pub fn record_increase(&mut self, account: Address, amount: &BigInt) {
        self.increased.add(account, amount);
    }

    /// Debit `account`
    pub fn record_decrease(&mut self, account: Address, amount: &BigInt) {
        self.decreased.add(account, amount);
    }

    /// Whether no account was touched
    pub fn is_empty(&self) -> bool {
        self.increased.is_empty() && self.decreased.is_empty()
    }

    /// Every account credited or debited
    pub fn accounts(&self) -> BTreeSet<Address> {
        self.increased
            .iter()
            .chain(self.decreased.iter())
            .map(|(account, _)| account.clone())
            .collect()
    }

    /// Net signed change per touched account
    pub fn net(&self) -> Ledger {
        let mut net = Ledger::new();
        for (account, amount) in self.increased.iter() {
            net.add(account.clone(), amount);
        }
        for (account, amount) in self.decreased.iter() {
            net.add(account.clone(), &-amount);
        }
        net
    }

    /// Merge into `ledger`, returning the new balance of every touched account
    pub fn apply_to(&self, ledger: &mut Ledger) -> BTreeMap<Address, BigInt> {
        ledger.merge(&self.net())
    }

    /// Fold another window's delta into this one
    pub fn absorb(&mut self, other: &EventDelta) {
        self.increased.merge(&other.increased);
        self.decreased.merge(&other.decreased);
    }
}

/// Signed per-account change over an epoch window, in token base units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaMap {
    entries: BTreeMap<AccountKey, BigInt>,
}

impl DeltaMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signed amount to `key`
    pub fn add(&mut self, key: AccountKey, amount: &BigInt) {
        *self.entries.entry(key).or_default() += amount;
    }

    /// Change recorded for `key`
    pub fn get(&self, key: AccountKey) -> Option<&BigInt> {
        self.entries.get(&key)
    }

    /// Remove entries whose net change is zero
    pub fn drop_zero(&mut self) {
        self.entries.retain(|_, v| !v.is_zero());
    }

    /// Fold `other` into this map
    pub fn extend(&mut self, other: DeltaMap) {
        for (key, amount) in other.entries {
            self.add(key, &amount);
        }
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in account-key order
    pub fn iter(&self) -> impl Iterator<Item = (&AccountKey, &BigInt)> {
        self.entries.iter()
    }

    /// Account keys in order
    pub fn keys(&self) -> impl Iterator<Item = &AccountKey> {
        self.entries.keys()
    }
}

impl FromIterator<(AccountKey, BigInt)> for DeltaMap {
    fn from_iter<T: IntoIterator<Item = (AccountKey, BigInt)>>(iter: T) -> Self {
        let mut map = DeltaMap::new();
        for (key, amount) in iter {
            map.add(key, &amount);
        }
        map
    }
}
