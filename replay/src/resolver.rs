//! Cached account resolution
//!
//! Maps chain addresses to the ledger's internal account ids and caches the
//! small reference tables (currencies, products, orders) that trade replay
//! consults for every record. Replay tasks resolve concurrently, so the
//! caches are concurrent maps.

use crate::store::{LedgerStore, OrderRecord, ProductRecord};
use crate::{Error, Result};
use dashmap::DashMap;
use ledger_core::{AccountKey, Address};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Default cache size before a cache is cleared
pub const DEFAULT_CACHE_LIMIT: usize = 1_000_000;

/// Address and reference-data resolver over a [`LedgerStore`]
pub struct AccountResolver {
    store: Arc<dyn LedgerStore>,
    users: DashMap<Address, u64>,
    accounts: DashMap<(u64, String), AccountKey>,
    currencies: DashMap<u64, String>,
    products: DashMap<u64, ProductRecord>,
    orders: DashMap<u64, OrderRecord>,
    cache_limit: usize,
}

impl fmt::Debug for AccountResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountResolver")
            .field("users", &self.users.len())
            .field("accounts", &self.accounts.len())
            .field("orders", &self.orders.len())
            .field("cache_limit", &self.cache_limit)
            .finish()
    }
}

impl AccountResolver {
    /// Resolver clearing each cache once it exceeds `cache_limit` entries
    pub fn new(store: Arc<dyn LedgerStore>, cache_limit: usize) -> Self {
        Self {
            store,
            users: DashMap::new(),
            accounts: DashMap::new(),
            currencies: DashMap::new(),
            products: DashMap::new(),
            orders: DashMap::new(),
            cache_limit,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// User id registered for `address`
    pub async fn user_id(&self, address: &Address) -> Result<u64> {
        if let Some(id) = self.users.get(address) {
            return Ok(*id);
        }
        let id = self
            .store
            .user_id(address)
            .await?
            .ok_or_else(|| Error::MissingRecord(format!("user {}", address)))?;
        self.users.insert(address.clone(), id);
        Ok(id)
    }

    /// Account id of `user_id` for `currency`
    pub async fn account_of_user(&self, user_id: u64, currency: &str) -> Result<AccountKey> {
        let key = (user_id, currency.to_string());
        if let Some(id) = self.accounts.get(&key) {
            return Ok(*id);
        }
        let id = self
            .store
            .account_id(user_id, currency)
            .await?
            .ok_or_else(|| {
                Error::MissingRecord(format!("{} account of user {}", currency, user_id))
            })?;
        self.accounts.insert(key, id);
        Ok(id)
    }

    /// Account id of `address` for `currency`
    pub async fn account_key(&self, address: &Address, currency: &str) -> Result<AccountKey> {
        let user_id = self.user_id(address).await?;
        self.account_of_user(user_id, currency).await
    }

    /// Account id of a textual address for `currency`
    pub async fn account_key_str(&self, address: &str, currency: &str) -> Result<AccountKey> {
        let address = Address::parse(address)?;
        self.account_key(&address, currency).await
    }

    /// Currency name by id
    pub async fn currency_name(&self, currency_id: u64) -> Result<String> {
        if let Some(name) = self.currencies.get(&currency_id) {
            return Ok(name.clone());
        }
        let name = self
            .store
            .currency_name(currency_id)
            .await?
            .ok_or_else(|| Error::MissingRecord(format!("currency {}", currency_id)))?;
        self.currencies.insert(currency_id, name.clone());
        Ok(name)
    }

    /// Trading pair by id
    pub async fn product(&self, product_id: u64) -> Result<ProductRecord> {
        if let Some(product) = self.products.get(&product_id) {
            return Ok(*product);
        }
        let product = self
            .store
            .product(product_id)
            .await?
            .ok_or_else(|| Error::MissingRecord(format!("product {}", product_id)))?;
        self.products.insert(product_id, product);
        Ok(product)
    }

    /// Order by id
    pub async fn order(&self, order_id: u64) -> Result<OrderRecord> {
        if let Some(order) = self.orders.get(&order_id) {
            return Ok(order.clone());
        }
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| Error::MissingRecord(format!("order {}", order_id)))?;
        self.orders.insert(order_id, order.clone());
        Ok(order)
    }

    /// Clear every cache that grew past the limit; returns whether any was
    /// cleared
    pub fn trim_caches(&self) -> bool {
        let limit = self.cache_limit;
        let mut trimmed = false;
        if self.users.len() > limit {
            self.users.clear();
            trimmed = true;
        }
        if self.accounts.len() > limit {
            self.accounts.clear();
            trimmed = true;
        }
        if self.orders.len() > limit {
            self.orders.clear();
            trimmed = true;
        }
        if trimmed {
            info!(limit, "Cleared resolver caches");
        }
        trimmed
    }

    /// Entries currently cached across all maps
    pub fn cached_entries(&self) -> usize {
        self.users.len()
            + self.accounts.len()
            + self.currencies.len()
            + self.products.len()
            + self.orders.len()
    }
}
