//! Simulated payment monitor.
//!
//! Issues fixture deposit addresses and answers payment checks from a
//! scripted queue. The default script reproduces the classic partial-payment
//! walk: 15.00 first, then whatever is still owed, then silence.

use std::collections::VecDeque;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use rand::Rng;
use tokio::sync::Mutex;

use crate::core::checkout::provider::PaymentMonitor;
use crate::core::checkout::transfer::PaymentDetection;
use crate::model::{Chain, DepositAddress, Usdt};

/// Fixture deposit address for TRON (base58 short form).
pub const TRON_DEPOSIT_ADDRESS: &str = "T9yD14Nj9...j29s";
/// Fixture deposit address for the EVM chains (hex short form).
pub const EVM_DEPOSIT_ADDRESS: &str = "0x71C...9A23";

/// Hashes the default script detects under.
pub const FIRST_PAYMENT_HASH: &str = "0x8a...9f21";
pub const SECOND_PAYMENT_HASH: &str = "0x3c...2b9a";

// ============================================================================
// Scripted Checks
// ============================================================================

/// One scripted answer to a payment check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedCheck {
    /// Detect a fixed amount.
    Amount { amount: Usdt, hash: String },
    /// Detect exactly what is still owed at check time. Nothing owed,
    /// nothing detected.
    Remainder { hash: String },
    /// Detect nothing.
    Nothing,
}

impl ScriptedCheck {
    /// Fixed detection under a synthetic short-form hash.
    pub fn amount(amount: Usdt) -> Self {
        Self::Amount {
            amount,
            hash: synthetic_hash(),
        }
    }

    /// Remainder detection under a synthetic short-form hash.
    pub fn remainder() -> Self {
        Self::Remainder {
            hash: synthetic_hash(),
        }
    }
}

/// Short display form of a synthetic transaction hash, "0x1a2b...c3d4".
fn synthetic_hash() -> String {
    let mut rng = rand::thread_rng();
    let head: [u8; 2] = rng.gen();
    let tail: [u8; 2] = rng.gen();
    format!("0x{}...{}", hex::encode(head), hex::encode(tail))
}

// ============================================================================
// Simulated Monitor
// ============================================================================

/// In-memory [`PaymentMonitor`] answering from a scripted queue.
#[derive(Debug)]
pub struct SimulatedMonitor {
    script: Mutex<VecDeque<ScriptedCheck>>,
}

impl SimulatedMonitor {
    /// Monitor answering the given checks in order, then nothing.
    pub fn with_script<I>(script: I) -> Self
    where
        I: IntoIterator<Item = ScriptedCheck>,
    {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    /// Monitor that never detects a payment.
    pub fn empty() -> Self {
        Self::with_script([])
    }
}

impl Default for SimulatedMonitor {
    /// The two-payment fixture: 15.00, then the outstanding remainder.
    fn default() -> Self {
        Self::with_script([
            ScriptedCheck::Amount {
                amount: Usdt::from_whole(15),
                hash: FIRST_PAYMENT_HASH.to_string(),
            },
            ScriptedCheck::Remainder {
                hash: SECOND_PAYMENT_HASH.to_string(),
            },
        ])
    }
}

#[async_trait]
impl PaymentMonitor for SimulatedMonitor {
    async fn deposit_address(&self, chain: Chain) -> Result<DepositAddress> {
        let address = if chain.is_tron() {
            TRON_DEPOSIT_ADDRESS
        } else {
            EVM_DEPOSIT_ADDRESS
        };
        debug!("simulated deposit address on {}: {}", chain, address);
        Ok(DepositAddress {
            chain,
            address: address.to_string(),
            protocol: chain.transfer_protocol().to_string(),
        })
    }

    async fn check_payment(
        &self,
        chain: Chain,
        received: Usdt,
        required: Usdt,
    ) -> Result<Option<PaymentDetection>> {
        let next = self.script.lock().await.pop_front();
        let detection = match next {
            Some(ScriptedCheck::Amount { amount, hash }) => {
                Some(PaymentDetection { amount, hash })
            }
            Some(ScriptedCheck::Remainder { hash }) => {
                let owed = required.saturating_sub(received);
                if owed.is_zero() {
                    None
                } else {
                    Some(PaymentDetection { amount: owed, hash })
                }
            }
            Some(ScriptedCheck::Nothing) | None => None,
        };
        match &detection {
            Some(d) => debug!("simulated check on {}: found {} ({})", chain, d.amount, d.hash),
            None => debug!("simulated check on {}: nothing new", chain),
        }
        Ok(detection)
    }
}

// ============================================================================
// Tests
// ============================================================================
