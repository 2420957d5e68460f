//! Dual-source reconciliation scenarios with in-memory chain and ledger

use chain_source::mock::MockChain;
use chain_source::{EpochGate, OnChainSource};
use ledger_core::{Address, Asset, BatchExecutor, BigInt, Epoch};
use reconciler::dual_source::MODULE;
use reconciler::{
    AuditMode, BalanceMismatch, Divergence, DualSourceMonitor, DualSourceReconciler, EpochSpec,
    Error, Metrics, RecordingSink,
};
use replay::mock::MockLedgerStore;
use replay::store::{DepositRecord, TransferRecord};
use replay::{AccountResolver, ReplayAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn addr(i: u64) -> Address {
    Address::parse(&format!("0x{:040x}", i)).unwrap()
}

fn operator() -> Address {
    addr(0xad)
}

fn usdt() -> Asset {
    Asset {
        name: "USDT".to_string(),
        custody_contract: addr(0xc0),
        token_contract: addr(0x70),
        cross_chain: false,
        decimals: 0,
    }
}

struct Fixture {
    chain: Arc<MockChain>,
    store: Arc<MockLedgerStore>,
    sink: Arc<RecordingSink>,
    metrics: Arc<Metrics>,
    reconciler: DualSourceReconciler,
}

/// Users 1 and 2 with USDT accounts 11 and 21, both enumerable on chain
/// with balances 100 and 0 at epoch 100
fn fixture(pausable: bool) -> Fixture {
    let chain = Arc::new(MockChain::new());
    let store = Arc::new(MockLedgerStore::new());
    for user in 1..=2u64 {
        store.add_user(&addr(user), user);
        store.add_account(user, "USDT", user * 10 + 1);
    }

    let custody = usdt().custody_contract;
    chain.register_account(&custody, &addr(1));
    chain.register_account(&custody, &addr(2));
    chain.set_balance(&custody, &addr(1), 100, 100u64);
    chain.set_balance(&custody, &addr(2), 100, 0u64);
    chain.set_next_nonce(&operator(), 100, 5);

    let executor = BatchExecutor::new(4);
    let resolver = Arc::new(AccountResolver::new(store.clone(), 1_000));
    let replay = ReplayAdapter::new(resolver, chain.clone(), executor, operator(), 10)
        .with_decimals(HashMap::from([("USDT".to_string(), 0)]));
    let source = OnChainSource::new(chain.clone(), executor);

    let sink = Arc::new(RecordingSink::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let reconciler = DualSourceReconciler::new(source, replay, sink.clone(), metrics.clone(), pausable);
    Fixture {
        chain,
        store,
        sink,
        metrics,
        reconciler,
    }
}

/// User 1 sends `credited` to user 2 on chain at `epoch`, recorded off chain
/// as a transfer of `recorded` with operator nonce 5
fn seed_transfer(f: &Fixture, epoch: Epoch, credited: u64, recorded: u64) {
    let custody = usdt().custody_contract;
    f.chain.set_balance(&custody, &addr(1), epoch, 100 - credited);
    f.chain.set_balance(&custody, &addr(2), epoch, credited);
    f.chain
        .push_log(MockChain::transfer_log(&custody, &addr(1), &addr(2), credited, epoch));
    f.chain.set_next_nonce(&operator(), epoch, 6);

    f.store.push_transfer(
        5,
        TransferRecord {
            user_address: addr(1).to_string(),
            currency: "USDT".to_string(),
            recipients: format!(r#"{{"{}":{}}}"#, addr(2), recorded),
        },
    );
}

#[tokio::test]
async fn test_matching_window_is_clean() {
    let f = fixture(true);
    seed_transfer(&f, 101, 5, 5);

    let report = f
        .reconciler
        .reconcile_window(&[usdt()], 101, 101, AuditMode::Partial)
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.violations);
    assert_eq!(report.onchain_accounts, 2);
    assert_eq!(report.offchain_accounts, 2);
    assert!(f.sink.alerts().is_empty());
    assert_eq!(f.sink.halt_requests(), 0);
    assert_eq!(f.metrics.windows.with_label_values(&["partial"]).get(), 1);
}

#[tokio::test]
async fn test_deposit_is_matched_by_mint() {
    let f = fixture(false);
    seed_transfer(&f, 101, 5, 5);

    // Mint of 20 to user 1 in the same epoch, credited off chain as a deposit
    let custody = usdt().custody_contract;
    f.chain.set_balance(&custody, &addr(1), 101, 115u64);
    f.chain
        .push_log(MockChain::transfer_log(&custody, &Address::zero(), &addr(1), 20u64, 101));
    f.chain.set_transaction_epoch("0xd1", 101);
    f.store.push_deposit(DepositRecord {
        user_address: addr(1).to_string(),
        currency: "USDT".to_string(),
        amount: "20".to_string(),
        tx_hash: "0xd1".to_string(),
    });

    let report = f
        .reconciler
        .reconcile_window(&[usdt()], 101, 101, AuditMode::Partial)
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.violations);
}

#[tokio::test]
async fn test_full_mode_skips_unchanged_holders() {
    let f = fixture(false);
    seed_transfer(&f, 101, 5, 5);

    // Unknown to the ledger, but its balance never moves
    let custody = usdt().custody_contract;
    f.chain.register_account(&custody, &addr(9));
    f.chain.set_balance(&custody, &addr(9), 0, 7u64);

    let report = f
        .reconciler
        .reconcile_window(&[usdt()], 101, 101, AuditMode::Full)
        .await
        .unwrap();
    assert!(report.is_clean(), "{:?}", report.violations);
    assert_eq!(report.window.mode, AuditMode::Full);
    assert_eq!(f.metrics.windows.with_label_values(&["full"]).get(), 1);
}

#[tokio::test]
async fn test_amount_mismatch_is_escalated_with_halt() {
    let f = fixture(true);
    seed_transfer(&f, 101, 4, 5);

    let report = f
        .reconciler
        .reconcile_window(&[usdt()], 101, 101, AuditMode::Partial)
        .await
        .unwrap();
    assert_eq!(
        report.violations,
        vec![
            Divergence::AmountMismatch {
                account: 11,
                onchain: BigInt::from(-4),
                offchain: BigInt::from(-5),
                diff: BigInt::from(1),
            },
            Divergence::AmountMismatch {
                account: 21,
                onchain: BigInt::from(4),
                offchain: BigInt::from(5),
                diff: BigInt::from(-1),
            },
        ]
    );

    let alerts = f.sink.alerts_from(MODULE);
    assert_eq!(alerts.len(), 2);
    assert!(alerts[0].message.contains(&report.run_id.to_string()));
    assert_eq!(f.sink.halt_requests(), 2);
    assert_eq!(
        f.metrics
            .divergences
            .with_label_values(&["amount_mismatch"])
            .get(),
        2
    );

    match report.into_result() {
        Err(Error::Divergence { from, to, violations }) => {
            assert_eq!((from, to), (101, 101));
            assert_eq!(violations.len(), 2);
        }
        other => panic!("expected divergence, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unrecorded_burn_is_missing_offchain() {
    let f = fixture(false);
    let custody = usdt().custody_contract;
    f.chain.set_balance(&custody, &addr(1), 102, 90u64);
    f.chain
        .push_log(MockChain::transfer_log(&custody, &addr(1), &Address::zero(), 10u64, 102));

    let report = f
        .reconciler
        .reconcile_window(&[usdt()], 102, 102, AuditMode::Partial)
        .await
        .unwrap();
    assert_eq!(
        report.violations,
        vec![
            Divergence::CountMismatch {
                onchain: 1,
                offchain: 0,
            },
            Divergence::MissingOffchain {
                account: 11,
                onchain: BigInt::from(-10),
            },
        ]
    );
    assert_eq!(f.sink.alerts_from(MODULE).len(), 2);
    assert_eq!(f.sink.halt_requests(), 0);
}

#[tokio::test]
async fn test_inverted_window_is_rejected() {
    let f = fixture(false);
    let err = f
        .reconciler
        .reconcile_window(&[usdt()], 102, 101, AuditMode::Partial)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_initial_audit_reports_mismatched_holder() {
    let f = fixture(false);
    f.store.set_balance(&addr(1), "USDT", "100");
    // Ledger says 3 while the chain holds nothing
    f.store.set_balance(&addr(2), "USDT", "3");
    // Currencies without a custody contract are ignored
    f.store.set_balance(&addr(2), "EOS", "8");

    let report = f.reconciler.initial_audit(&[usdt()], 100).await.unwrap();
    assert_eq!(report.holders, 2);
    assert_eq!(
        report.mismatches,
        vec![BalanceMismatch {
            address: addr(2),
            asset: "USDT".to_string(),
            offchain: BigInt::from(3),
            onchain: BigInt::from(0),
            diff: BigInt::from(-3),
        }]
    );

    let alerts = f.sink.alerts_from(MODULE);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].message.contains(&addr(2).to_string()));
    assert_eq!(f.sink.halt_requests(), 0);
    assert_eq!(
        f.metrics
            .divergences
            .with_label_values(&["balance_mismatch"])
            .get(),
        1
    );

    match report.into_result() {
        Err(Error::BalanceMismatch { epoch, mismatches }) => {
            assert_eq!(epoch, 100);
            assert_eq!(mismatches.len(), 1);
        }
        other => panic!("expected balance mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_initial_audit_passes_when_balances_agree() {
    let f = fixture(false);
    f.store.set_balance(&addr(1), "USDT", "100");

    let report = f.reconciler.initial_audit(&[usdt()], 100).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.mismatches);
    assert!(report.into_result().is_ok());
    assert!(f.sink.alerts().is_empty());
}

fn monitor(f: Fixture, full_interval: u64, from: Epoch) -> (DualSourceMonitor, Arc<RecordingSink>) {
    let gate = EpochGate::new(f.chain.clone(), 0, Duration::from_millis(100));
    let monitor = DualSourceMonitor::new(
        f.reconciler,
        gate,
        f.sink.clone(),
        vec![usdt()],
        full_interval,
        Duration::from_secs(1),
        EpochSpec::Absolute(from),
        EpochSpec::Absolute(from),
    );
    (monitor, f.sink)
}

#[tokio::test]
async fn test_monitor_alternates_partial_and_full_windows() {
    let f = fixture(false);
    seed_transfer(&f, 101, 5, 5);
    let (monitor, sink) = monitor(f, 5, 101);

    let mut state = monitor.initial_state(102);
    let reports = monitor.run_round(&mut state, 102).await.unwrap();
    let windows: Vec<_> = reports.iter().map(|r| (r.window.from, r.window.to, r.window.mode)).collect();
    assert_eq!(
        windows,
        vec![(101, 101, AuditMode::Partial), (102, 102, AuditMode::Partial)]
    );
    assert_eq!(state.partial_from, 103);
    assert_eq!(state.full_from, 101);

    // Nothing new confirmed
    assert!(monitor.run_round(&mut state, 102).await.unwrap().is_empty());

    let reports = monitor.run_round(&mut state, 105).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].window.mode, AuditMode::Full);
    assert_eq!((reports[0].window.from, reports[0].window.to), (101, 105));
    assert!(reports[0].is_clean(), "{:?}", reports[0].violations);
    assert_eq!(state.full_from, 106);
    assert_eq!(state.partial_from, 106);

    assert!(sink.alerts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_stops_on_unresolvable_account() {
    let f = fixture(true);
    f.chain.set_head(101);
    // Recipient has no ledger account
    f.chain.set_next_nonce(&operator(), 101, 6);
    f.store.push_transfer(
        5,
        TransferRecord {
            user_address: addr(1).to_string(),
            currency: "USDT".to_string(),
            recipients: format!(r#"{{"{}":5}}"#, addr(5)),
        },
    );
    let (monitor, sink) = monitor(f, 1_000, 101);

    let (_tx, rx) = watch::channel(false);
    let err = monitor.run(rx).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {:?}", err);

    let alerts = sink.alerts_from(MODULE);
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].message.contains("monitor stopped at partial epoch 101"));
    // Only divergences pause the upstream system
    assert_eq!(sink.halt_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_shuts_down() {
    let f = fixture(false);
    f.chain.set_head(100);
    let (monitor, sink) = monitor(f, 1_000, 101);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(rx));
    tokio::time::sleep(Duration::from_secs(3)).await;
    tx.send(true).unwrap();

    handle.await.unwrap().unwrap();
    assert!(sink.alerts().is_empty());
}
