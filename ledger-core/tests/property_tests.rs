//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify:
//! - Conservation: transfers between holders never change the ledger sum
//! - Merge is additive: the touched balances equal old balance plus delta
//! - Case-insensitivity: any casing of an address hits the same balance
//! - Fixed-point parsing agrees with integer arithmetic

use ledger_core::{Address, BigInt, DeltaMap, EventDelta, FixedAmount, Ledger};
use proptest::prelude::*;
use std::collections::HashMap;

/// Strategy for generating addresses from a small pool, so transfers collide
fn address_strategy() -> impl Strategy<Value = Address> {
    (0u8..16).prop_map(|i| Address::parse(&format!("0x{:040x}", i as u64 + 1)).unwrap())
}

/// Strategy for generating positive base-unit amounts
fn amount_strategy() -> impl Strategy<Value = u64> {
    1u64..1_000_000_000_000u64
}

/// Strategy for generating transfers (sender, recipient, amount)
fn transfer_strategy() -> impl Strategy<Value = (Address, Address, u64)> {
    (address_strategy(), address_strategy(), amount_strategy())
}

proptest! {
    /// Transfers between holders conserve the ledger sum
    #[test]
    fn prop_transfers_conserve_sum(
        initial in prop::collection::vec((address_strategy(), amount_strategy()), 1..20),
        transfers in prop::collection::vec(transfer_strategy(), 0..50),
    ) {
        let mut ledger: Ledger = initial
            .iter()
            .map(|(a, v)| (a.clone(), BigInt::from(*v)))
            .collect();
        let supply = ledger.sum();

        for (from, to, amount) in transfers {
            let mut delta = EventDelta::new();
            delta.record_decrease(from, &BigInt::from(amount));
            delta.record_increase(to, &BigInt::from(amount));
            delta.apply_to(&mut ledger);
        }

        prop_assert_eq!(ledger.sum(), supply);
    }

    /// Every touched balance equals the prior balance plus the net delta
    #[test]
    fn prop_merge_is_additive(
        initial in prop::collection::vec((address_strategy(), amount_strategy()), 0..20),
        increases in prop::collection::vec((address_strategy(), amount_strategy()), 0..20),
        decreases in prop::collection::vec((address_strategy(), amount_strategy()), 0..20),
    ) {
        let mut ledger: Ledger = initial
            .iter()
            .map(|(a, v)| (a.clone(), BigInt::from(*v)))
            .collect();
        let before = ledger.clone();

        let mut delta = EventDelta::new();
        let mut expected_net: HashMap<Address, BigInt> = HashMap::new();
        for (a, v) in &increases {
            delta.record_increase(a.clone(), &BigInt::from(*v));
            *expected_net.entry(a.clone()).or_default() += BigInt::from(*v);
        }
        for (a, v) in &decreases {
            delta.record_decrease(a.clone(), &BigInt::from(*v));
            *expected_net.entry(a.clone()).or_default() -= BigInt::from(*v);
        }

        let touched = delta.apply_to(&mut ledger);

        prop_assert_eq!(touched.len(), expected_net.len());
        for (account, net) in expected_net {
            prop_assert_eq!(&touched[&account], &(before.get(&account) + net));
        }
    }

    /// Upper-case and lower-case spellings resolve to one balance
    #[test]
    fn prop_address_case_insensitive(bytes in prop::array::uniform20(any::<u8>()), amount in amount_strategy()) {
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let lower = Address::parse(&format!("0x{}", hex)).unwrap();
        let upper = Address::parse(&format!("0x{}", hex.to_uppercase())).unwrap();

        let mut ledger = Ledger::new();
        ledger.add(upper, &BigInt::from(amount));
        prop_assert_eq!(ledger.get(&lower), BigInt::from(amount));
    }

    /// Whole and fractional parts parse to the exact scaled integer
    #[test]
    fn prop_fixed_amount_parse(int_part in 0u64..1_000_000_000, frac in 0u64..1_000_000) {
        let parsed = FixedAmount::parse(&format!("{}.{:06}", int_part, frac)).unwrap();
        let expected = BigInt::from(int_part) * BigInt::from(10u64).pow(18)
            + BigInt::from(frac) * BigInt::from(10u64).pow(12);
        prop_assert_eq!(parsed.scaled(), &expected);
    }

    /// Dropping zero entries keeps every non-zero account
    #[test]
    fn prop_delta_map_drop_zero(entries in prop::collection::vec((0u64..32, -100i64..100), 0..64)) {
        let mut map = DeltaMap::new();
        let mut expected: HashMap<u64, i64> = HashMap::new();
        for (key, amount) in &entries {
            map.add(*key, &BigInt::from(*amount));
            *expected.entry(*key).or_default() += amount;
        }
        map.drop_zero();
        expected.retain(|_, v| *v != 0);

        prop_assert_eq!(map.len(), expected.len());
        for (key, amount) in expected {
            prop_assert_eq!(map.get(key), Some(&BigInt::from(amount)));
        }
    }
}
