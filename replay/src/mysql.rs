//! MySQL ledger store
//!
//! Id columns are cast to `SIGNED` and amount columns to `CHAR` in every
//! query, so decoding does not depend on the exact column definitions.

use crate::config::StoreConfig;
use crate::store::{
    BalanceRecord, DepositRecord, LedgerStore, NonceRange, OrderRecord, ProductRecord, TradeRecord,
    TransferRecord, WithdrawalRecord,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use ledger_core::{AccountKey, Address};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::FromRow;
use tracing::info;

#[derive(Debug, FromRow)]
struct TradeRow {
    product_id: i64,
    taker_order_id: i64,
    maker_order_id: i64,
    price: String,
    amount: String,
    side: String,
    taker_fee: String,
    maker_fee: String,
}

#[derive(Debug, FromRow)]
struct ProductRow {
    base_currency_id: i64,
    quote_currency_id: i64,
}

#[derive(Debug, FromRow)]
struct OrderRow {
    user_id: i64,
    fee_address: String,
}

#[derive(Debug, FromRow)]
struct WithdrawalRow {
    user_address: String,
    currency: String,
    amount: String,
}

#[derive(Debug, FromRow)]
struct DepositRow {
    user_address: String,
    currency: String,
    amount: String,
    tx_hash: String,
}

#[derive(Debug, FromRow)]
struct BalanceRow {
    currency: String,
    balance: String,
}

#[derive(Debug, FromRow)]
struct TransferRow {
    user_address: String,
    currency: String,
    recipients: String,
}

fn id(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Decode(format!("negative {} {}", what, value)))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// [`LedgerStore`] over a MySQL connection pool
#[derive(Debug, Clone)]
pub struct MySqlLedgerStore {
    pool: MySqlPool,
    settled_statuses: Vec<String>,
    start_time: NaiveDateTime,
}

impl MySqlLedgerStore {
    /// Wrap an existing pool
    pub fn new(pool: MySqlPool, settled_statuses: Vec<String>, start_time: NaiveDateTime) -> Self {
        Self {
            pool,
            settled_statuses,
            start_time,
        }
    }

    /// Connect using the store configuration
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;

        info!("Ledger database connection pool established");
        Ok(Self::new(
            pool,
            config.settled_statuses.clone(),
            config.start_time()?,
        ))
    }

    fn settled_query(&self, columns: &str, table: &str) -> String {
        format!(
            "SELECT {} FROM {} \
             WHERE status IN ({}) AND tx_nonce BETWEEN ? AND ? AND create_time >= ? \
             ORDER BY id LIMIT ?, ?",
            columns,
            table,
            placeholders(self.settled_statuses.len())
        )
    }

    async fn settled_rows<R>(
        &self,
        columns: &str,
        table: &str,
        range: NonceRange,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<R>>
    where
        R: for<'r> FromRow<'r, sqlx::mysql::MySqlRow> + Send + Unpin,
    {
        let sql = self.settled_query(columns, table);
        let mut query = sqlx::query_as::<_, R>(&sql);
        for status in &self.settled_statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(range.from)
            .bind(range.to)
            .bind(self.start_time)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl LedgerStore for MySqlLedgerStore {
    async fn user_id(&self, address: &Address) -> Result<Option<u64>> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT CAST(id AS SIGNED) FROM t_user WHERE name = ?")
                .bind(address.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|v| id(v, "user id")).transpose()
    }

    async fn account_id(&self, user_id: u64, currency: &str) -> Result<Option<AccountKey>> {
        let row: Option<i64> = sqlx::query_scalar(
            "SELECT CAST(id AS SIGNED) FROM t_account WHERE user_id = ? AND currency = ?",
        )
        .bind(user_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|v| id(v, "account id")).transpose()
    }

    async fn currency_name(&self, currency_id: u64) -> Result<Option<String>> {
        let row: Option<String> = sqlx::query_scalar("SELECT name FROM t_currency WHERE id = ?")
            .bind(currency_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn product(&self, product_id: u64) -> Result<Option<ProductRecord>> {
        let row: Option<ProductRow> = sqlx::query_as(
            r#"
            SELECT
                CAST(base_currency_id AS SIGNED) AS base_currency_id,
                CAST(quote_currency_id AS SIGNED) AS quote_currency_id
            FROM t_product
            WHERE id = ?
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(ProductRecord {
                base_currency_id: id(r.base_currency_id, "currency id")?,
                quote_currency_id: id(r.quote_currency_id, "currency id")?,
            })
        })
        .transpose()
    }

    async fn order(&self, order_id: u64) -> Result<Option<OrderRecord>> {
        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT CAST(user_id AS SIGNED) AS user_id, fee_address FROM t_order WHERE id = ?",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(OrderRecord {
                user_id: id(r.user_id, "user id")?,
                fee_address: r.fee_address,
            })
        })
        .transpose()
    }

    async fn trades(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<TradeRecord>> {
        let rows: Vec<TradeRow> = self
            .settled_rows(
                "CAST(product_id AS SIGNED) AS product_id, \
                 CAST(taker_order_id AS SIGNED) AS taker_order_id, \
                 CAST(maker_order_id AS SIGNED) AS maker_order_id, \
                 CAST(price AS CHAR) AS price, \
                 CAST(amount AS CHAR) AS amount, \
                 side, \
                 CAST(taker_fee AS CHAR) AS taker_fee, \
                 CAST(maker_fee AS CHAR) AS maker_fee",
                "t_trade",
                range,
                offset,
                limit,
            )
            .await?;

        rows.into_iter()
            .map(|r| {
                Ok(TradeRecord {
                    product_id: id(r.product_id, "product id")?,
                    taker_order_id: id(r.taker_order_id, "order id")?,
                    maker_order_id: id(r.maker_order_id, "order id")?,
                    price: r.price,
                    amount: r.amount,
                    side: r.side,
                    taker_fee: r.taker_fee,
                    maker_fee: r.maker_fee,
                })
            })
            .collect()
    }

    async fn withdrawals(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<WithdrawalRecord>> {
        let rows: Vec<WithdrawalRow> = self
            .settled_rows(
                "user_address, currency, CAST(amount AS CHAR) AS amount",
                "t_withdraw",
                range,
                offset,
                limit,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| WithdrawalRecord {
                user_address: r.user_address,
                currency: r.currency,
                amount: r.amount,
            })
            .collect())
    }

    async fn transfers(&self, range: NonceRange, offset: u64, limit: u64) -> Result<Vec<TransferRecord>> {
        let rows: Vec<TransferRow> = self
            .settled_rows(
                "user_address, currency, recipients",
                "t_transfer",
                range,
                offset,
                limit,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| TransferRecord {
                user_address: r.user_address,
                currency: r.currency,
                recipients: r.recipients,
            })
            .collect())
    }

    async fn deposit_count(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t_deposit WHERE create_time >= ?")
            .bind(self.start_time)
            .fetch_one(&self.pool)
            .await?;
        id(total, "deposit count")
    }

    async fn deposits(&self, offset: u64, limit: u64) -> Result<Vec<DepositRecord>> {
        let rows: Vec<DepositRow> = sqlx::query_as(
            r#"
            SELECT
                user_address,
                currency,
                CAST(amount AS CHAR) AS amount,
                tx_hash
            FROM t_deposit
            WHERE create_time >= ?
            ORDER BY id
            LIMIT ?, ?
            "#,
        )
        .bind(self.start_time)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DepositRecord {
                user_address: r.user_address,
                currency: r.currency,
                amount: r.amount,
                tx_hash: r.tx_hash,
            })
            .collect())
    }

    async fn balances(&self, address: &Address) -> Result<Vec<BalanceRecord>> {
        let rows: Vec<BalanceRow> = sqlx::query_as(
            r#"
            SELECT
                a.currency AS currency,
                CAST(a.available + a.hold AS CHAR) AS balance
            FROM t_account a
            JOIN t_user u ON u.id = a.user_id
            WHERE u.name = ?
            ORDER BY a.id
            "#,
        )
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| BalanceRecord {
                currency: r.currency,
                balance: r.balance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_negative_id_rejected() {
        assert_eq!(id(7, "user id").unwrap(), 7);
        assert!(matches!(id(-1, "user id"), Err(Error::Decode(_))));
    }
}
