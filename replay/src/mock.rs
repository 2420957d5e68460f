//! In-memory ledger store
//!
//! Stands in for the MySQL store in tests and dry runs. Records are kept in
//! insertion order, which plays the role of the primary key ordering.

use crate::store::{
    BalanceRecord, DepositRecord, LedgerStore, NonceRange, OrderRecord, ProductRecord, TradeRecord,
    TransferRecord, WithdrawalRecord,
};
use crate::Result;
use async_trait::async_trait;
use ledger_core::{AccountKey, Address};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct MockState {
    users: HashMap<Address, u64>,
    accounts: HashMap<(u64, String), AccountKey>,
    currencies: HashMap<u64, String>,
    products: HashMap<u64, ProductRecord>,
    orders: HashMap<u64, OrderRecord>,
    trades: Vec<(u64, TradeRecord)>,
    withdrawals: Vec<(u64, WithdrawalRecord)>,
    transfers: Vec<(u64, TransferRecord)>,
    deposits: Vec<DepositRecord>,
    balances: HashMap<Address, Vec<BalanceRecord>>,
    lookups: usize,
}

/// In-memory [`LedgerStore`]
#[derive(Debug, Default)]
pub struct MockLedgerStore {
    state: Mutex<MockState>,
}

fn page<T: Clone>(rows: impl Iterator<Item = T>, offset: u64, limit: u64) -> Vec<T> {
    rows.skip(offset as usize).take(limit as usize).collect()
}

fn settled<T: Clone>(rows: &[(u64, T)], range: NonceRange, offset: u64, limit: u64) -> Vec<T> {
    page(
        rows.iter()
            .filter(|(nonce, _)| (range.from..=range.to).contains(nonce))
            .map(|(_, row)| row.clone()),
        offset,
        limit,
    )
}

impl MockLedgerStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user address
    pub fn add_user(&self, address: &Address, user_id: u64) {
        self.state.lock().users.insert(address.clone(), user_id);
    }

    /// Register a user's currency account
    pub fn add_account(&self, user_id: u64, currency: &str, account: AccountKey) {
        self.state
            .lock()
            .accounts
            .insert((user_id, currency.to_string()), account);
    }

    /// Register a currency
    pub fn add_currency(&self, currency_id: u64, name: &str) {
        self.state.lock().currencies.insert(currency_id, name.to_string());
    }

    /// Register a trading pair
    pub fn add_product(&self, product_id: u64, base_currency_id: u64, quote_currency_id: u64) {
        self.state.lock().products.insert(
            product_id,
            ProductRecord {
                base_currency_id,
                quote_currency_id,
            },
        );
    }

    /// Register an order
    pub fn add_order(&self, order_id: u64, user_id: u64, fee_address: &Address) {
        self.state.lock().orders.insert(
            order_id,
            OrderRecord {
                user_id,
                fee_address: fee_address.to_string(),
            },
        );
    }

    /// Settled trade sent with operator nonce `nonce`
    pub fn push_trade(&self, nonce: u64, trade: TradeRecord) {
        self.state.lock().trades.push((nonce, trade));
    }

    /// Settled withdrawal sent with operator nonce `nonce`
    pub fn push_withdrawal(&self, nonce: u64, withdrawal: WithdrawalRecord) {
        self.state.lock().withdrawals.push((nonce, withdrawal));
    }

    /// Settled transfer sent with operator nonce `nonce`
    pub fn push_transfer(&self, nonce: u64, transfer: TransferRecord) {
        self.state.lock().transfers.push((nonce, transfer));
    }

    /// Append a deposit row
    pub fn push_deposit(&self, deposit: DepositRecord) {
        self.state.lock().deposits.push(deposit);
    }

    /// Set the current balance of `address` in `currency`
    pub fn set_balance(&self, address: &Address, currency: &str, balance: &str) {
        let mut state = self.state.lock();
        let rows = state.balances.entry(address.clone()).or_default();
        rows.retain(|r| r.currency != currency);
        rows.push(BalanceRecord {
            currency: currency.to_string(),
            balance: balance.to_string(),
        });
    }

    /// Number of user and account lookups served
    pub fn lookup_count(&self) -> usize {
        self.state.lock().lookups
    }
}

#[async_trait]
impl LedgerStore for MockLedgerStore {
    async fn user_id(&self, address: &Address) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        state.lookups += 1;
        Ok(state.users.get(address).copied())
    }

    async fn account_id(&self, user_id: u64, currency: &str) -> Result<Option<AccountKey>> {
        let mut state = self.state.lock();
        state.lookups += 1;
        Ok(state.accounts.get(&(user_id, currency.to_string())).copied())
    }

    async fn currency_name(&self, currency_id: u64) -> Result<Option<String>> {
        Ok(self.state.lock().currencies.get(&currency_id).cloned())
    }

    async fn product(&self, product_id: u64) -> Result<Option<ProductRecord>> {
        Ok(self.state.lock().products.get(&product_id).copied())
    }

    async fn order(&self, order_id: u64) -> Result<Option<OrderRecord>> {
        Ok(self.state.lock().orders.get(&order_id).cloned())
    }

    async fn trades(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<TradeRecord>> {
        Ok(settled(&self.state.lock().trades, range, offset, limit))
    }

    async fn withdrawals(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<WithdrawalRecord>> {
        Ok(settled(&self.state.lock().withdrawals, range, offset, limit))
    }

    async fn transfers(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<TransferRecord>> {
        Ok(settled(&self.state.lock().transfers, range, offset, limit))
    }

    async fn deposit_count(&self) -> Result<u64> {
        Ok(self.state.lock().deposits.len() as u64)
    }

    async fn deposits(&self, offset: u64, limit: u64) -> Result<Vec<DepositRecord>> {
        Ok(page(self.state.lock().deposits.iter().cloned(), offset, limit))
    }

    async fn balances(&self, address: &Address) -> Result<Vec<BalanceRecord>> {
        Ok(self
            .state
            .lock()
            .balances
            .get(address)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settled_rows_filtered_by_nonce() {
        let store = MockLedgerStore::new();
        for nonce in 0..10u64 {
            store.push_withdrawal(
                nonce,
                WithdrawalRecord {
                    user_address: format!("0x{:040x}", nonce),
                    currency: "USDT".to_string(),
                    amount: nonce.to_string(),
                },
            );
        }

        let range = NonceRange { from: 3, to: 7 };
        let first = store.withdrawals(range, 0, 3).await.unwrap();
        let second = store.withdrawals(range, 3, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 2);
        assert_eq!(first[0].amount, "3");
        assert_eq!(second[1].amount, "7");
    }
}
