//! Address-keyed balance ledger
//!
//! A [`Ledger`] is plain data: it is mutated in place and is not
//! synchronised. Each asset's baseline ledger has exactly one writer.

use crate::types::Address;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use std::collections::{BTreeMap, HashMap};

/// Mapping from account to arbitrary-precision balance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    balances: HashMap<Address, BigInt>,
}

impl Ledger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of `account`, zero if it was never written
    pub fn get(&self, account: &Address) -> BigInt {
        self.balances.get(account).cloned().unwrap_or_default()
    }

    /// Whether `account` has been written
    pub fn contains(&self, account: &Address) -> bool {
        self.balances.contains_key(account)
    }

    /// Add a signed amount to `account`, returning the new balance
    pub fn add(&mut self, account: Address, amount: &BigInt) -> BigInt {
        let entry = self.balances.entry(account).or_default();
        *entry += amount;
        entry.clone()
    }

    /// Overwrite the balance of `account`
    pub fn set(&mut self, account: Address, amount: BigInt) {
        self.balances.insert(account, amount);
    }

    /// Sum of all balances
    pub fn sum(&self) -> BigInt {
        self.balances.values().fold(BigInt::zero(), |acc, v| acc + v)
    }

    /// Merge `other` additively and return the resulting balance of every
    /// account the merge touched.
    pub fn merge(&mut self, other: &Ledger) -> BTreeMap<Address, BigInt> {
        other
            .balances
            .iter()
            .map(|(account, amount)| {
                let balance = self.add(account.clone(), amount);
                (account.clone(), balance)
            })
            .collect()
    }

    /// Accounts holding a negative balance
    pub fn negative_accounts(&self) -> Vec<(Address, BigInt)> {
        let mut negatives: Vec<_> = self
            .balances
            .iter()
            .filter(|(_, v)| v.is_negative())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        negatives.sort();
        negatives
    }

    /// Number of written accounts
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// Whether no account was written
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Iterate over `(account, balance)` pairs in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &BigInt)> {
        self.balances.iter()
    }
}

impl FromIterator<(Address, BigInt)> for Ledger {
    fn from_iter<T: IntoIterator<Item = (Address, BigInt)>>(iter: T) -> Self {
        let mut ledger = Ledger::new();
        for (account, amount) in iter {
            ledger.add(account, &amount);
        }
        ledger
    }
}
