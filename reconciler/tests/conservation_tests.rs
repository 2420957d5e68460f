//! Conservation audit scenarios against an in-memory chain

use chain_source::mock::MockChain;
use chain_source::{ContractCall, EpochGate, OnChainSource};
use ledger_core::{Address, Asset, BatchExecutor, BigInt, Epoch};
use reconciler::conservation::MODULE;
use reconciler::{CheckpointReconciler, Error, Metrics, Phase, RecordingSink, ViolationKind};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn addr(i: u64) -> Address {
    Address::parse(&format!("0x{:040x}", i)).unwrap()
}

fn usdt() -> Asset {
    Asset {
        name: "USDT".to_string(),
        custody_contract: addr(0xc0),
        token_contract: addr(0x70),
        cross_chain: false,
        decimals: 18,
    }
}

struct Harness {
    chain: Arc<MockChain>,
    sink: Arc<RecordingSink>,
    metrics: Arc<Metrics>,
    reconciler: CheckpointReconciler,
}

fn harness() -> Harness {
    let chain = Arc::new(MockChain::new());
    let source = OnChainSource::new(chain.clone(), BatchExecutor::new(4));
    let gate = EpochGate::new(chain.clone(), 0, Duration::from_millis(100));
    let sink = Arc::new(RecordingSink::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let reconciler = CheckpointReconciler::new(source, gate, sink.clone(), metrics.clone())
        .with_asset(usdt(), BigInt::from(0));
    Harness {
        chain,
        sink,
        metrics,
        reconciler,
    }
}

/// Custody supply fully backed by the token balance
fn set_supply(chain: &MockChain, epoch: Epoch, supply: u64) {
    let asset = usdt();
    chain.set_total_supply(&asset.custody_contract, epoch, supply);
    chain.set_balance(&asset.token_contract, &asset.custody_contract, epoch, supply);
}

fn set_holder(chain: &MockChain, account: &Address, epoch: Epoch, balance: u64) {
    chain.set_balance(&usdt().custody_contract, account, epoch, balance);
}

fn transfer(chain: &MockChain, from: &Address, to: &Address, amount: u64, epoch: Epoch) {
    chain.push_log(MockChain::transfer_log(&usdt().custody_contract, from, to, amount, epoch));
}

/// Baseline at 100 with X = 300 and Y = 200
fn two_holders(chain: &MockChain) -> (Address, Address) {
    let (x, y) = (addr(1), addr(2));
    set_supply(chain, 100, 500);
    for (account, balance) in [(&x, 300), (&y, 200)] {
        chain.register_account(&usdt().custody_contract, account);
        set_holder(chain, account, 100, balance);
    }
    (x, y)
}

fn violation(err: Error) -> ViolationKind {
    match err {
        Error::Conservation(v) => v.kind,
        other => panic!("expected conservation violation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_baseline_detects_supply_mismatch() {
    let mut h = harness();
    set_supply(&h.chain, 100, 1000);
    for (i, balance) in [(1u64, 600u64), (2, 399)] {
        h.chain.register_account(&usdt().custody_contract, &addr(i));
        set_holder(&h.chain, &addr(i), 100, balance);
    }

    let err = h.reconciler.establish_baseline("USDT", 100).await.unwrap_err();
    assert_eq!(
        violation(err),
        ViolationKind::SupplyMismatch {
            total_supply: BigInt::from(1000),
            sum: BigInt::from(999),
            diff: BigInt::from(1),
        }
    );
    assert_eq!(h.reconciler.checkpoint("USDT").unwrap().phase(), Phase::Failed);

    let exported = h.metrics.export().unwrap();
    assert!(exported.contains("supply_mismatch"));
}

#[tokio::test]
async fn test_transfer_epoch_is_verified() {
    let mut h = harness();
    let (x, y) = two_holders(&h.chain);

    let baseline = h.reconciler.establish_baseline("USDT", 100).await.unwrap();
    assert_eq!(baseline.ledger.sum(), BigInt::from(500));

    set_supply(&h.chain, 101, 500);
    set_holder(&h.chain, &x, 101, 250);
    set_holder(&h.chain, &y, 101, 250);
    transfer(&h.chain, &x, &y, 50, 101);

    let outcome = h.reconciler.advance_epoch("USDT").await.unwrap();
    assert_eq!(outcome.epoch, 101);
    assert_eq!(outcome.touched.get(&x), Some(&BigInt::from(250)));
    assert_eq!(outcome.touched.get(&y), Some(&BigInt::from(250)));
    assert!(outcome.privileged_withdrawals.is_empty());

    let checkpoint = h.reconciler.checkpoint("USDT").unwrap();
    assert_eq!(checkpoint.phase(), Phase::Advancing);
    assert_eq!(checkpoint.epoch(), Some(101));
    assert_eq!(
        h.metrics.last_verified_epoch.with_label_values(&["USDT"]).get(),
        101
    );
}

#[tokio::test]
async fn test_quiet_epoch_reads_no_holder_balances() {
    let mut h = harness();
    two_holders(&h.chain);
    h.reconciler.establish_baseline("USDT", 100).await.unwrap();

    h.chain.clear_calls();
    let outcome = h.reconciler.advance_epoch("USDT").await.unwrap();
    assert_eq!(outcome.epoch, 101);
    assert!(outcome.touched.is_empty());

    // Only the custody check touches the chain
    let custody = usdt().custody_contract;
    let holder_reads = h
        .chain
        .calls()
        .iter()
        .filter(|c| c.contract == custody && matches!(c.call, ContractCall::BalanceOf(_)))
        .count();
    assert_eq!(holder_reads, 0);
}

#[tokio::test]
async fn test_overdrawn_account_fails_before_balance_reads() {
    let mut h = harness();
    let r = addr(7);
    set_supply(&h.chain, 100, 10);
    h.chain.register_account(&usdt().custody_contract, &r);
    set_holder(&h.chain, &r, 100, 10);
    h.reconciler.establish_baseline("USDT", 100).await.unwrap();

    // Burn of 15 against a tracked balance of 10
    set_supply(&h.chain, 101, 0);
    transfer(&h.chain, &r, &Address::zero(), 15, 101);

    h.chain.clear_calls();
    let err = h.reconciler.advance_epoch("USDT").await.unwrap_err();
    assert_eq!(
        violation(err),
        ViolationKind::NegativeBalance {
            account: r.clone(),
            balance: BigInt::from(-5),
        }
    );
    assert_eq!(
        h.chain
            .count_calls(|c| matches!(c, ContractCall::BalanceOf(account) if account == &r)),
        0
    );
}

#[tokio::test]
async fn test_balance_mismatch_requires_new_baseline() {
    let mut h = harness();
    let (x, y) = two_holders(&h.chain);
    h.reconciler.establish_baseline("USDT", 100).await.unwrap();

    // Y is credited 49 on chain while the log says 50; the supply still sums
    set_supply(&h.chain, 101, 500);
    set_holder(&h.chain, &x, 101, 250);
    set_holder(&h.chain, &y, 101, 249);
    transfer(&h.chain, &x, &y, 50, 101);

    let err = h.reconciler.advance_epoch("USDT").await.unwrap_err();
    assert_eq!(
        violation(err),
        ViolationKind::BalanceMismatch {
            account: y.clone(),
            expected: BigInt::from(250),
            actual: BigInt::from(249),
            diff: BigInt::from(1),
        }
    );

    let checkpoint = h.reconciler.checkpoint("USDT").unwrap();
    assert_eq!(checkpoint.phase(), Phase::Failed);
    assert!(checkpoint.baseline().is_none());

    let err = h.reconciler.advance_epoch("USDT").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // A fresh baseline recovers
    set_holder(&h.chain, &y, 101, 250);
    h.reconciler.establish_baseline("USDT", 101).await.unwrap();
    assert_eq!(h.reconciler.checkpoint("USDT").unwrap().phase(), Phase::Baselined);
}

#[tokio::test]
async fn test_privileged_withdrawal_is_reported() {
    let h = harness();
    let (x, _) = two_holders(&h.chain);
    let mut reconciler = h.reconciler.with_privileged(HashSet::from([x.clone()]));
    reconciler.establish_baseline("USDT", 100).await.unwrap();

    set_supply(&h.chain, 101, 400);
    set_holder(&h.chain, &x, 101, 200);
    transfer(&h.chain, &x, &Address::zero(), 100, 101);

    let outcome = reconciler.advance_epoch("USDT").await.unwrap();
    assert_eq!(outcome.privileged_withdrawals.len(), 1);
    assert_eq!(outcome.privileged_withdrawals[0].amount, BigInt::from(100));

    let alerts = h.sink.alerts_from(MODULE);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].message.contains(&x.to_string()));
}

#[tokio::test]
async fn test_short_holder_enumeration_is_rejected() {
    let mut h = harness();
    set_supply(&h.chain, 100, 10);
    h.chain.register_account(&usdt().custody_contract, &addr(1));
    set_holder(&h.chain, &addr(1), 100, 10);
    // Declared count exceeds the enumerable holders
    h.chain.set_account_total(&usdt().custody_contract, 3);

    let err = h.reconciler.establish_baseline("USDT", 100).await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_unknown_asset() {
    let mut h = harness();
    let err = h.reconciler.establish_baseline("DOGE", 100).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test(start_paused = true)]
async fn test_continuous_audit_escalates_and_stops() {
    let h = harness();
    two_holders(&h.chain);
    // Supply grows at 101 with no matching event
    set_supply(&h.chain, 101, 501);
    h.chain.set_head(105);

    let (_tx, rx) = watch::channel(false);
    let handles = h.reconciler.start_continuous(100, 10, rx).unwrap();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.unwrap();
    }

    let alerts = h.sink.alerts_from(MODULE);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].message.contains("verified epoch 100"));
    assert!(alerts[0].message.contains("501"));
    assert_eq!(h.sink.halt_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_audit_shuts_down_while_waiting() {
    let h = harness();
    two_holders(&h.chain);
    h.chain.set_head(100);

    let (tx, rx) = watch::channel(false);
    let handles = h.reconciler.start_continuous(100, 10, rx).unwrap();

    // Baseline at 100 runs, then the loop waits for 101
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        h.metrics.last_verified_epoch.with_label_values(&["USDT"]).get(),
        100
    );

    tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(h.sink.alerts().is_empty());
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let h = harness();
    let (_tx, rx) = watch::channel(false);
    let err = h.reconciler.start_continuous(100, 0, rx).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
