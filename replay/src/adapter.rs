//! Off-chain replay adapter
//!
//! Turns settled records into signed per-account legs and folds them into a
//! [`DeltaMap`] in token base units.
//!
//! Trade legs, with `funds = amount * price` computed exactly and truncated
//! to 18 decimals:
//!
//! | taker side | taker                                   | maker                                  |
//! |------------|-----------------------------------------|----------------------------------------|
//! | Buy        | base `+(amount - fee)`, quote `-funds`  | base `-amount`, quote `+(funds - fee)` |
//! | Sell       | base `-amount`, quote `+(funds - fee)`  | base `+(amount - fee)`, quote `-funds` |
//!
//! Each fee is credited to the fee address of the paying order, in the
//! currency the payer received.

use crate::deposits::DepositLocator;
use crate::resolver::AccountResolver;
use crate::store::{
    DepositRecord, NonceRange, TradeRecord, TradeSide, TransferRecord, WithdrawalRecord,
};
use crate::{Error, Result};
use chain_source::ChainClient;
use ledger_core::{AccountKey, Address, BatchExecutor, BigInt, DeltaMap, Epoch, FixedAmount};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_DECIMALS: u32 = 18;

/// One signed balance movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leg {
    /// Ledger account
    pub account: AccountKey,
    /// Currency name
    pub currency: String,
    /// Signed amount
    pub amount: FixedAmount,
}

impl Leg {
    fn new(account: AccountKey, currency: &str, amount: FixedAmount) -> Self {
        Self {
            account,
            currency: currency.to_string(),
            amount,
        }
    }
}

/// Replays settled off-chain records for an epoch window
#[derive(Clone)]
pub struct ReplayAdapter {
    resolver: Arc<AccountResolver>,
    chain: Arc<dyn ChainClient>,
    deposits: DepositLocator,
    executor: BatchExecutor,
    operator: Address,
    page_size: u64,
    decimals: HashMap<String, u32>,
}

impl fmt::Debug for ReplayAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayAdapter")
            .field("operator", &self.operator)
            .field("page_size", &self.page_size)
            .field("decimals", &self.decimals)
            .finish()
    }
}

fn parse_amount(raw: &str, what: &str) -> Result<FixedAmount> {
    FixedAmount::parse(raw).map_err(|_| Error::Decode(format!("{} '{}'", what, raw)))
}

/// Parse transfer recipients, e.g. `{"0xabc…":1.5,"0xdef…":"2"}`.
///
/// Amounts are kept as text so no precision is lost.
pub fn parse_recipients(raw: &str) -> Result<Vec<(Address, FixedAmount)>> {
    let body = raw
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| Error::Decode(format!("recipients '{}' is not an object", raw)))?;
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    body.split(',')
        .map(|pair| {
            let (key, value) = pair
                .split_once(':')
                .ok_or_else(|| Error::Decode(format!("recipient entry '{}'", pair.trim())))?;
            let address = Address::parse(key.trim().trim_matches('"'))?;
            let amount = parse_amount(value.trim().trim_matches('"'), "recipient amount")?;
            Ok((address, amount))
        })
        .collect()
}

impl ReplayAdapter {
    /// Create an adapter replaying operator transactions of `operator`
    pub fn new(
        resolver: Arc<AccountResolver>,
        chain: Arc<dyn ChainClient>,
        executor: BatchExecutor,
        operator: Address,
        page_size: u64,
    ) -> Self {
        let deposits = DepositLocator::new(resolver.store().clone(), chain.clone(), executor, page_size);
        Self {
            resolver,
            chain,
            deposits,
            executor,
            operator,
            page_size: page_size.max(1),
            decimals: HashMap::new(),
        }
    }

    /// Token decimals per currency name; unlisted currencies use 18
    pub fn with_decimals(mut self, decimals: HashMap<String, u32>) -> Self {
        self.decimals = decimals;
        self
    }

    /// Shared resolver
    pub fn resolver(&self) -> &Arc<AccountResolver> {
        &self.resolver
    }

    /// Operator nonces consumed in `[from, to]`
    pub async fn nonce_range(&self, from: Epoch, to: Epoch) -> Result<Option<NonceRange>> {
        let next_before = match from.checked_sub(1) {
            Some(before) => self.chain.next_nonce(&self.operator, before).await?,
            None => 0,
        };
        let next_after = self.chain.next_nonce(&self.operator, to).await?;
        Ok(NonceRange::between(next_before, next_after))
    }

    async fn fetch_all<R, F, Fut>(&self, mut page: F) -> Result<Vec<R>>
    where
        F: FnMut(u64, u64) -> Fut,
        Fut: Future<Output = Result<Vec<R>>>,
    {
        let mut rows = Vec::new();
        let mut offset = 0u64;
        loop {
            let batch = page(offset, self.page_size).await?;
            let fetched = batch.len() as u64;
            rows.extend(batch);
            if fetched < self.page_size {
                return Ok(rows);
            }
            offset += fetched;
        }
    }

    /// Legs of one settled trade
    pub async fn trade_legs(&self, trade: &TradeRecord) -> Result<Vec<Leg>> {
        let side: TradeSide = trade.side.parse()?;
        let product = self.resolver.product(trade.product_id).await?;
        let base = self.resolver.currency_name(product.base_currency_id).await?;
        let quote = self.resolver.currency_name(product.quote_currency_id).await?;

        let taker = self.resolver.order(trade.taker_order_id).await?;
        let maker = self.resolver.order(trade.maker_order_id).await?;

        let taker_base = self.resolver.account_of_user(taker.user_id, &base).await?;
        let taker_quote = self.resolver.account_of_user(taker.user_id, &quote).await?;
        let maker_base = self.resolver.account_of_user(maker.user_id, &base).await?;
        let maker_quote = self.resolver.account_of_user(maker.user_id, &quote).await?;

        let amount = parse_amount(&trade.amount, "trade amount")?;
        let funds = FixedAmount::product(&trade.amount, &trade.price).map_err(|_| {
            Error::Decode(format!("trade funds '{}' * '{}'", trade.amount, trade.price))
        })?;
        let taker_fee = parse_amount(&trade.taker_fee, "taker fee")?;
        let maker_fee = parse_amount(&trade.maker_fee, "maker fee")?;

        let legs = match side {
            TradeSide::Buy => {
                let taker_fee_account = self.resolver.account_key_str(&taker.fee_address, &base).await?;
                let maker_fee_account = self.resolver.account_key_str(&maker.fee_address, &quote).await?;
                vec![
                    Leg::new(taker_base, &base, &amount - &taker_fee),
                    Leg::new(taker_fee_account, &base, taker_fee),
                    Leg::new(taker_quote, &quote, -&funds),
                    Leg::new(maker_base, &base, -&amount),
                    Leg::new(maker_quote, &quote, &funds - &maker_fee),
                    Leg::new(maker_fee_account, &quote, maker_fee),
                ]
            }
            TradeSide::Sell => {
                let taker_fee_account = self.resolver.account_key_str(&taker.fee_address, &quote).await?;
                let maker_fee_account = self.resolver.account_key_str(&maker.fee_address, &base).await?;
                vec![
                    Leg::new(taker_base, &base, -&amount),
                    Leg::new(taker_quote, &quote, &funds - &taker_fee),
                    Leg::new(taker_fee_account, &quote, taker_fee),
                    Leg::new(maker_base, &base, &amount - &maker_fee),
                    Leg::new(maker_fee_account, &base, maker_fee),
                    Leg::new(maker_quote, &quote, -&funds),
                ]
            }
        };
        Ok(legs)
    }

    /// Debit of one settled withdrawal
    pub async fn withdrawal_legs(&self, withdrawal: &WithdrawalRecord) -> Result<Vec<Leg>> {
        let account = self
            .resolver
            .account_key_str(&withdrawal.user_address, &withdrawal.currency)
            .await?;
        let amount = parse_amount(&withdrawal.amount, "withdrawal amount")?;
        Ok(vec![Leg::new(account, &withdrawal.currency, -amount)])
    }

    /// Credit of one deposit
    pub async fn deposit_legs(&self, deposit: &DepositRecord) -> Result<Vec<Leg>> {
        let account = self
            .resolver
            .account_key_str(&deposit.user_address, &deposit.currency)
            .await?;
        let amount = parse_amount(&deposit.amount, "deposit amount")?;
        Ok(vec![Leg::new(account, &deposit.currency, amount)])
    }

    /// Sender debits and recipient credits of one transfer
    pub async fn transfer_legs(&self, transfer: &TransferRecord) -> Result<Vec<Leg>> {
        let sender = self
            .resolver
            .account_key_str(&transfer.user_address, &transfer.currency)
            .await?;
        let mut legs = Vec::new();
        for (recipient, amount) in parse_recipients(&transfer.recipients)? {
            let recipient = self.resolver.account_key(&recipient, &transfer.currency).await?;
            legs.push(Leg::new(sender, &transfer.currency, -&amount));
            legs.push(Leg::new(recipient, &transfer.currency, amount));
        }
        Ok(legs)
    }

    fn decimals_of(&self, currency: &str) -> u32 {
        self.decimals.get(currency).copied().unwrap_or(DEFAULT_DECIMALS)
    }

    /// Sum legs per account in token base units
    pub fn aggregate(&self, legs: impl IntoIterator<Item = Leg>) -> DeltaMap {
        let mut deltas = DeltaMap::new();
        for leg in legs {
            let decimals = self.decimals_of(&leg.currency);
            deltas.add(leg.account, &leg.amount.to_base_units(decimals));
        }
        deltas
    }

    /// Current off-chain balances of `address` per currency, in token base
    /// units. Currencies without a row are absent.
    pub async fn balances(&self, address: &Address) -> Result<HashMap<String, BigInt>> {
        let rows = self.resolver.store().balances(address).await?;
        let mut balances = HashMap::with_capacity(rows.len());
        for row in rows {
            let amount = parse_amount(&row.balance, "account balance")?;
            let units = amount.to_base_units(self.decimals_of(&row.currency));
            balances.insert(row.currency, units);
        }
        Ok(balances)
    }

    /// Per-account deltas implied by the off-chain records of `[from, to]`
    pub async fn replay_window(&self, from: Epoch, to: Epoch) -> Result<DeltaMap> {
        let store = self.resolver.store().clone();
        let mut legs: Vec<Leg> = Vec::new();

        if let Some(range) = self.nonce_range(from, to).await? {
            let trades = self
                .fetch_all(|offset, limit| {
                    let store = store.clone();
                    async move { store.trades(range, offset, limit).await }
                })
                .await?;
            let withdrawals = self
                .fetch_all(|offset, limit| {
                    let store = store.clone();
                    async move { store.withdrawals(range, offset, limit).await }
                })
                .await?;
            let transfers = self
                .fetch_all(|offset, limit| {
                    let store = store.clone();
                    async move { store.transfers(range, offset, limit).await }
                })
                .await?;
            info!(
                from,
                to,
                nonces = %range,
                trades = trades.len(),
                withdrawals = withdrawals.len(),
                transfers = transfers.len(),
                "Replaying settled records"
            );

            for batch in self.executor.run(trades.iter(), |t| self.trade_legs(t)).await? {
                legs.extend(batch);
            }
            for batch in self.executor.run(withdrawals.iter(), |w| self.withdrawal_legs(w)).await? {
                legs.extend(batch);
            }
            for batch in self.executor.run(transfers.iter(), |t| self.transfer_legs(t)).await? {
                legs.extend(batch);
            }
        } else {
            debug!(from, to, "No operator transactions in window");
        }

        let deposits = self.deposits.deposits_in_window(from, to).await?;
        for batch in self.executor.run(deposits.iter(), |d| self.deposit_legs(d)).await? {
            legs.extend(batch);
        }

        Ok(self.aggregate(legs))
    }
}
