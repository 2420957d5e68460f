//! Custody contract event decoding
//!
//! Every log in an audited window must be one of the known custody events.
//! Anything else means contract state moved in a way the ledger model cannot
//! follow, so the whole window is rejected.

use crate::abi::decode_hex;
use crate::client::RawLog;
use crate::{Error, Result};
use ledger_core::{Address, BigInt, Epoch, EventDelta};
use num_bigint::BigUint;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

/// `Transfer(address,address,uint256)`
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
/// `Deposit(address,uint256)`
pub const DEPOSIT_TOPIC: &str =
    "0x5548c837ab068cf56a2c2479df0882a4922fd203edb7517321831d95078c5f62";
/// `Withdraw(address,address,uint256)`
pub const WITHDRAW_TOPIC: &str =
    "0x9b1bfa7fa9ee420a16e124f794c35ac9f90472acc99140eb2f6447c714cad8eb";
/// Privileged balance write
pub const WRITE_TOPIC: &str =
    "0x3802ba8117dc6bf5de2a857e440679e83bb0f9b68094ede7167234a5f97319ed";

/// A decoded custody log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustodyEvent {
    /// Balance movement; zero sender mints, zero recipient burns
    Transfer {
        /// Debited holder
        sender: Address,
        /// Credited holder
        recipient: Address,
        /// Amount in base units
        amount: BigInt,
    },
    /// Cross-chain deposit notice, paired with a mint transfer
    Deposit,
    /// Withdrawal notice, paired with a burn transfer
    Withdraw,
}

/// Decode one log
pub fn decode_log(log: &RawLog) -> Result<CustodyEvent> {
    let topic0 = log
        .topics
        .first()
        .map(|t| t.to_ascii_lowercase())
        .ok_or_else(|| Error::Decode(format!("log on {} has no topics", log.address)))?;

    match topic0.as_str() {
        TRANSFER_TOPIC => {
            if log.topics.len() < 3 {
                return Err(Error::Decode(format!(
                    "Transfer on {} has {} topics",
                    log.address,
                    log.topics.len()
                )));
            }
            let sender = Address::from_topic(&log.topics[1])?;
            let recipient = Address::from_topic(&log.topics[2])?;
            let data = decode_hex(&log.data)?;
            let word = data.get(..32).ok_or_else(|| {
                Error::Decode(format!("Transfer on {} has {} data bytes", log.address, data.len()))
            })?;
            Ok(CustodyEvent::Transfer {
                sender,
                recipient,
                amount: BigInt::from(BigUint::from_bytes_be(word)),
            })
        }
        DEPOSIT_TOPIC => Ok(CustodyEvent::Deposit),
        WITHDRAW_TOPIC => Ok(CustodyEvent::Withdraw),
        WRITE_TOPIC => Err(Error::PrivilegedWrite {
            contract: log.address.clone(),
            epoch: log.epoch,
        }),
        _ => Err(Error::UnknownEvent {
            contract: log.address.clone(),
            topic: topic0,
        }),
    }
}

/// Burn by a privileged (market-maker) account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedWithdrawal {
    /// Custody contract
    pub contract: Address,
    /// Privileged sender
    pub account: Address,
    /// Burned amount
    pub amount: BigInt,
    /// Epoch of the log, when reported
    pub epoch: Option<Epoch>,
    /// Transaction hash, when reported
    pub transaction_hash: Option<String>,
}

/// All custody events of one epoch window, folded per contract
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventWindow {
    /// Per-contract deltas
    pub deltas: BTreeMap<Address, EventDelta>,
    /// Burns by privileged accounts, surfaced for operators
    pub privileged_withdrawals: Vec<PrivilegedWithdrawal>,
    /// Logs seen
    pub log_count: usize,
}

impl EventWindow {
    /// Fold `logs` into per-contract deltas
    pub fn from_logs(logs: &[RawLog], privileged: &HashSet<Address>) -> Result<Self> {
        let mut window = EventWindow {
            log_count: logs.len(),
            ..Default::default()
        };

        for log in logs {
            let event = decode_log(log)?;
            let CustodyEvent::Transfer {
                sender,
                recipient,
                amount,
            } = event
            else {
                continue;
            };

            let delta = window.deltas.entry(log.address.clone()).or_default();
            if sender.is_zero() {
                if !recipient.is_zero() {
                    delta.record_increase(recipient, &amount);
                }
            } else if recipient.is_zero() {
                if privileged.contains(&sender) {
                    warn!(
                        contract = %log.address,
                        account = %sender,
                        amount = %amount,
                        "Withdrawal by privileged account"
                    );
                    window.privileged_withdrawals.push(PrivilegedWithdrawal {
                        contract: log.address.clone(),
                        account: sender.clone(),
                        amount: amount.clone(),
                        epoch: log.epoch,
                        transaction_hash: log.transaction_hash.clone(),
                    });
                }
                delta.record_decrease(sender, &amount);
            } else {
                delta.record_decrease(sender, &amount);
                delta.record_increase(recipient, &amount);
            }
        }

        debug!(
            logs = window.log_count,
            contracts = window.deltas.len(),
            "Decoded event window"
        );
        Ok(window)
    }

    /// Delta of `contract`, empty if it emitted nothing
    pub fn delta_for(&self, contract: &Address) -> EventDelta {
        self.deltas.get(contract).cloned().unwrap_or_default()
    }

    /// Every non-zero holder touched on any contract
    pub fn touched_accounts(&self) -> BTreeSet<Address> {
        self.deltas
            .values()
            .flat_map(|delta| delta.accounts())
            .filter(|account| !account.is_zero())
            .collect()
    }
}
