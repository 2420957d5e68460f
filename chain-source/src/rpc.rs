//! JSON-RPC chain client
//!
//! Speaks either the `cfx_*` or the `eth_*` method family over HTTP. Every
//! epoch argument is a hex quantity; addresses are sent in lower-case hex.

use crate::abi::{decode_hex, to_hex};
use crate::client::{ChainClient, ChainHead, LogFilter, RawLog};
use crate::config::{ChainConfig, RpcDialect};
use crate::{ContractCall, Error, Result};
use async_trait::async_trait;
use ledger_core::{Address, Epoch};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    #[serde(default)]
    epoch_number: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
}

fn quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn parse_quantity(value: &Value, what: &str) -> Result<u64> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::Decode(format!("{}: expected hex quantity, got {}", what, value)))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::Decode(format!("{}: bad quantity '{}': {}", what, text, e)))
}

/// HTTP JSON-RPC client
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: String,
    dialect: RpcDialect,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Build a client from configuration
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.rpc_url.clone(),
            dialect: config.dialect,
            next_id: AtomicU64::new(1),
        })
    }

    /// Method family in use
    pub fn dialect(&self) -> RpcDialect {
        self.dialect
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, "JSON-RPC request");

        let response = self.http.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("{} returned HTTP {}", method, status)));
        }

        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    fn method(&self, conflux: &'static str, ethereum: &'static str) -> &'static str {
        match self.dialect {
            RpcDialect::Conflux => conflux,
            RpcDialect::Ethereum => ethereum,
        }
    }

    fn log_filter(&self, filter: &LogFilter) -> Value {
        let addresses: Vec<&str> = filter.addresses.iter().map(Address::as_str).collect();
        let mut object = match self.dialect {
            RpcDialect::Conflux => json!({
                "fromEpoch": quantity(filter.from_epoch),
                "toEpoch": quantity(filter.to_epoch),
                "address": addresses,
            }),
            RpcDialect::Ethereum => json!({
                "fromBlock": quantity(filter.from_epoch),
                "toBlock": quantity(filter.to_epoch),
                "address": addresses,
            }),
        };
        if let Some(topics) = &filter.topics {
            object["topics"] = json!([topics]);
        }
        object
    }
}

#[async_trait]
impl ChainHead for JsonRpcClient {
    async fn current_epoch(&self) -> Result<Epoch> {
        let result = match self.dialect {
            RpcDialect::Conflux => self.request("cfx_epochNumber", json!(["latest_state"])).await?,
            RpcDialect::Ethereum => self.request("eth_blockNumber", json!([])).await?,
        };
        parse_quantity(&result, "current epoch")
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn call(&self, contract: &Address, call: &ContractCall, epoch: Epoch) -> Result<Vec<u8>> {
        let request = json!({
            "to": contract.as_str(),
            "data": to_hex(&call.encode()),
        });
        let method = self.method("cfx_call", "eth_call");
        let result = self.request(method, json!([request, quantity(epoch)])).await?;
        let data = result
            .as_str()
            .ok_or_else(|| Error::Decode(format!("{}: expected hex data, got {}", call.name(), result)))?;
        decode_hex(data)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let method = self.method("cfx_getLogs", "eth_getLogs");
        let result = self.request(method, json!([self.log_filter(filter)])).await?;
        let logs: Vec<RpcLog> = serde_json::from_value(result)?;

        logs.into_iter()
            .map(|log| {
                let epoch = match log.epoch_number.or(log.block_number) {
                    Some(raw) => Some(parse_quantity(&Value::String(raw), "log epoch")?),
                    None => None,
                };
                Ok(RawLog {
                    address: Address::parse(&log.address)?,
                    topics: log.topics,
                    data: log.data,
                    epoch,
                    transaction_hash: log.transaction_hash,
                })
            })
            .collect()
    }

    async fn next_nonce(&self, account: &Address, epoch: Epoch) -> Result<u64> {
        let method = self.method("cfx_getNextNonce", "eth_getTransactionCount");
        let result = self
            .request(method, json!([account.as_str(), quantity(epoch)]))
            .await?;
        parse_quantity(&result, "next nonce")
    }

    async fn transaction_epoch(&self, tx_hash: &str) -> Result<Epoch> {
        let method = self.method("cfx_getTransactionByHash", "eth_getTransactionByHash");
        let tx = self.request(method, json!([tx_hash])).await?;
        if tx.is_null() {
            return Err(Error::Decode(format!("transaction {} not found", tx_hash)));
        }

        match self.dialect {
            RpcDialect::Ethereum => {
                let block = tx
                    .get("blockNumber")
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| Error::Decode(format!("transaction {} is pending", tx_hash)))?;
                parse_quantity(block, "transaction block")
            }
            RpcDialect::Conflux => {
                let block_hash = tx
                    .get("blockHash")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Decode(format!("transaction {} is not packed", tx_hash)))?;
                let block = self
                    .request("cfx_getBlockByHash", json!([block_hash, false]))
                    .await?;
                let epoch = block
                    .get("epochNumber")
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| {
                        Error::Decode(format!("block {} has no epoch yet", block_hash))
                    })?;
                parse_quantity(epoch, "block epoch")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::encode_u64;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, dialect: RpcDialect) -> JsonRpcClient {
        JsonRpcClient::new(&ChainConfig {
            rpc_url: server.uri(),
            dialect,
            ..Default::default()
        })
        .unwrap()
    }

    fn reply(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
    }

    #[tokio::test]
    async fn test_conflux_epoch_number() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "cfx_epochNumber", "params": ["latest_state"]})))
            .respond_with(reply(json!("0x1f4")))
            .mount(&server)
            .await;

        let epoch = client(&server, RpcDialect::Conflux).current_epoch().await.unwrap();
        assert_eq!(epoch, 500);
    }

    #[tokio::test]
    async fn test_eth_call_pins_epoch() {
        let server = MockServer::start().await;
        let contract = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_call",
                "params": [{"to": contract.as_str(), "data": "0x18160ddd"}, "0x65"]
            })))
            .respond_with(reply(json!(to_hex(&encode_u64(42)))))
            .mount(&server)
            .await;

        let data = client(&server, RpcDialect::Ethereum)
            .call(&contract, &ContractCall::TotalSupply, 101)
            .await
            .unwrap();
        assert_eq!(crate::abi::decode_u64(&data).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_get_logs_parses_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "cfx_getLogs",
                "params": [{"fromEpoch": "0xa", "toEpoch": "0xb"}]
            })))
            .respond_with(reply(json!([{
                "address": "0x1111111111111111111111111111111111111111",
                "topics": [crate::events::TRANSFER_TOPIC],
                "data": "0x",
                "epochNumber": "0xa",
                "transactionHash": "0xfeed"
            }])))
            .mount(&server)
            .await;

        let contract = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
        let logs = client(&server, RpcDialect::Conflux)
            .get_logs(&LogFilter::new(10, 11, vec![contract.clone()]))
            .await
            .unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, contract);
        assert_eq!(logs[0].epoch, Some(10));
        assert_eq!(logs[0].transaction_hash.as_deref(), Some("0xfeed"));
    }

    #[tokio::test]
    async fn test_rpc_error_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {"code": -32016, "message": "epoch not executed"}
            })))
            .mount(&server)
            .await;

        let err = client(&server, RpcDialect::Conflux).current_epoch().await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32016, .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_http_failure_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server, RpcDialect::Ethereum).current_epoch().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_conflux_transaction_epoch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "cfx_getTransactionByHash"})))
            .respond_with(reply(json!({"hash": "0xabc", "blockHash": "0xb10c"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "cfx_getBlockByHash", "params": ["0xb10c", false]})))
            .respond_with(reply(json!({"hash": "0xb10c", "epochNumber": "0x2a"})))
            .mount(&server)
            .await;

        let epoch = client(&server, RpcDialect::Conflux)
            .transaction_epoch("0xabc")
            .await
            .unwrap();
        assert_eq!(epoch, 42);
    }
}
