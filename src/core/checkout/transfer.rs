//! Address-Transfer Sub-Flow State Machine
//!
//! Models the manual on-chain transfer path: a deposit address is issued for
//! a chosen chain, the payer sends funds on their own, and repeated result
//! checks classify the accumulated amount as partial, exact or over payment.
//! Like the outer checkout machine this is pure (no I/O, no timers); the
//! controller owns the scan delay and the monitor poll and feeds results
//! back in.

use crate::model::{Chain, DepositAddress, Transaction, Usdt};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Status
// ============================================================================

/// Where the sub-flow stands between result checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// No payment seen yet (also the pre-address state).
    Waiting,
    /// A result check is in flight.
    Scanning,
    /// Something arrived but less than the required total.
    PartialPaid,
    /// More than the required total arrived. Tolerated, settled.
    OverPaid,
    /// Exactly the required total arrived.
    Success,
}

impl TransferStatus {
    /// Settled statuses accept no further result checks.
    pub fn is_settled(&self) -> bool {
        matches!(self, TransferStatus::Success | TransferStatus::OverPaid)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Waiting => write!(f, "waiting"),
            TransferStatus::Scanning => write!(f, "scanning"),
            TransferStatus::PartialPaid => write!(f, "partial_paid"),
            TransferStatus::OverPaid => write!(f, "over_paid"),
            TransferStatus::Success => write!(f, "success"),
        }
    }
}

// ============================================================================
// Scan Types
// ============================================================================

/// One incoming payment seen by the monitor during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetection {
    pub amount: Usdt,
    pub hash: String,
}

/// Everything the controller needs to run a scheduled scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTicket {
    /// Sequence number guarding against orphaned scans.
    pub seq: u32,
    pub chain: Chain,
    pub received: Usdt,
    pub required: Usdt,
}

/// How a settled scan changed the sub-session.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    /// The ledger entry appended for this scan, if anything was detected.
    pub appended: Option<Transaction>,
    pub from: TransferStatus,
    pub to: TransferStatus,
}

/// Where a back navigation landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferBack {
    /// A partial payment is at stake; the leave prompt is now open and
    /// nothing else changed.
    Intercepted,
    /// Back from the address screen to network selection.
    ToNetworkSelect,
    /// Back out of the sub-flow entirely.
    Exit,
}

/// A transfer operation that is not valid for the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransferOp {
    pub op: &'static str,
    pub status: TransferStatus,
}

impl InvalidTransferOp {
    fn new(op: &'static str, status: TransferStatus) -> Self {
        Self { op, status }
    }
}

impl fmt::Display for InvalidTransferOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transfer operation {} is not valid with status {}",
            self.op, self.status
        )
    }
}

impl std::error::Error for InvalidTransferOp {}

// ============================================================================
// Sub-Session
// ============================================================================

/// State for one address-transfer attempt.
///
/// The ledger and the received total survive back navigation to the network
/// screen; only a full checkout reset discards them.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSession {
    required: Usdt,
    received: Usdt,
    status: TransferStatus,
    chain: Option<Chain>,
    address: Option<DepositAddress>,
    /// Bumped on every result check; settles carrying an older number are
    /// orphans and get dropped.
    scan_seq: u32,
    transactions: Vec<Transaction>,
    /// True while the leave-confirmation prompt is open. Transfer operations
    /// other than answering the prompt are rejected until it closes.
    leave_prompt: bool,
}

impl TransferSession {
    pub fn new(required: Usdt) -> Self {
        Self {
            required,
            received: Usdt::from_cents(0),
            status: TransferStatus::Waiting,
            chain: None,
            address: None,
            scan_seq: 0,
            transactions: Vec::new(),
            leave_prompt: false,
        }
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn chain(&self) -> Option<Chain> {
        self.chain
    }

    pub fn address(&self) -> Option<&DepositAddress> {
        self.address.as_ref()
    }

    pub fn received(&self) -> Usdt {
        self.received
    }

    pub fn required(&self) -> Usdt {
        self.required
    }

    pub fn remaining(&self) -> Usdt {
        self.required.saturating_sub(self.received)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn leave_prompt(&self) -> bool {
        self.leave_prompt
    }

    /// Picks the network to pay on. Only possible before an address exists.
    pub fn select_chain(&mut self, chain: Chain) -> Result<(), InvalidTransferOp> {
        if self.leave_prompt || self.address.is_some() || self.status != TransferStatus::Waiting {
            return Err(InvalidTransferOp::new("transfer_select_chain", self.status));
        }
        self.chain = Some(chain);
        Ok(())
    }

    /// Returns the chain an address should be issued for, without changing
    /// state. The address itself arrives later via [`set_address`].
    ///
    /// [`set_address`]: TransferSession::set_address
    pub fn address_request(&self) -> Result<Chain, InvalidTransferOp> {
        if self.leave_prompt || self.address.is_some() || self.status != TransferStatus::Waiting {
            return Err(InvalidTransferOp::new("generate_address", self.status));
        }
        self.chain
            .ok_or_else(|| InvalidTransferOp::new("generate_address", self.status))
    }

    /// Stores the issued deposit address. Rejected when it does not match
    /// the selected chain or an address already exists.
    pub fn set_address(&mut self, address: DepositAddress) -> Result<(), InvalidTransferOp> {
        let expected = self.address_request()?;
        if address.chain != expected {
            return Err(InvalidTransferOp::new("deposit_address_ready", self.status));
        }
        self.address = Some(address);
        Ok(())
    }

    /// Starts a result check. Valid with an issued address while WAITING or
    /// PARTIAL_PAID; settled sub-sessions accept no further checks.
    pub fn begin_scan(&mut self) -> Result<ScanTicket, InvalidTransferOp> {
        if self.leave_prompt {
            return Err(InvalidTransferOp::new("check_result", self.status));
        }
        let Some(chain) = self.chain else {
            return Err(InvalidTransferOp::new("check_result", self.status));
        };
        if self.address.is_none()
            || !matches!(
                self.status,
                TransferStatus::Waiting | TransferStatus::PartialPaid
            )
        {
            return Err(InvalidTransferOp::new("check_result", self.status));
        }
        self.scan_seq += 1;
        self.status = TransferStatus::Scanning;
        Ok(ScanTicket {
            seq: self.scan_seq,
            chain,
            received: self.received,
            required: self.required,
        })
    }

    /// Lands a scan result. Orphaned settles (stale `seq`, or the scan was
    /// cancelled via [`return_to_address`]) are rejected so the controller
    /// can drop them.
    ///
    /// [`return_to_address`]: TransferSession::return_to_address
    pub fn settle_scan(
        &mut self,
        seq: u32,
        detected: Option<PaymentDetection>,
        at: NaiveTime,
    ) -> Result<ScanOutcome, InvalidTransferOp> {
        if self.status != TransferStatus::Scanning || seq != self.scan_seq {
            return Err(InvalidTransferOp::new("scan_settled", self.status));
        }
        let from = TransferStatus::Scanning;
        let Some(detection) = detected else {
            self.status = self.resting_status();
            return Ok(ScanOutcome {
                appended: None,
                from,
                to: self.status,
            });
        };

        let total = self
            .received
            .checked_add(detection.amount)
            .unwrap_or(Usdt::from_cents(u64::MAX));
        let tx = Transaction {
            id: format!("tx{}", self.transactions.len() + 1),
            amount: detection.amount,
            time: at.format("%H:%M:%S").to_string(),
            hash: detection.hash,
        };
        self.transactions.push(tx.clone());
        self.received = total;
        self.status = if total < self.required {
            TransferStatus::PartialPaid
        } else if total == self.required {
            TransferStatus::Success
        } else {
            TransferStatus::OverPaid
        };
        Ok(ScanOutcome {
            appended: Some(tx),
            from,
            to: self.status,
        })
    }

    /// Cancels a scan from the scanning screen. The in-flight settle becomes
    /// an orphan and will be rejected when it lands.
    pub fn return_to_address(&mut self) -> Result<(), InvalidTransferOp> {
        if self.status != TransferStatus::Scanning {
            return Err(InvalidTransferOp::new("return_to_address", self.status));
        }
        self.status = self.resting_status();
        Ok(())
    }

    /// Navigates back one screen. An unconfirmed back while PARTIAL_PAID
    /// opens the leave prompt instead of moving; nothing is abandoned
    /// silently.
    pub fn go_back(&mut self, confirmed: bool) -> Result<TransferBack, InvalidTransferOp> {
        if self.status == TransferStatus::Scanning {
            return Err(InvalidTransferOp::new("go_back", self.status));
        }
        if self.status == TransferStatus::PartialPaid && !confirmed {
            self.leave_prompt = true;
            return Ok(TransferBack::Intercepted);
        }
        self.leave_prompt = false;
        if self.address.is_some() {
            self.address = None;
            self.status = TransferStatus::Waiting;
            Ok(TransferBack::ToNetworkSelect)
        } else {
            Ok(TransferBack::Exit)
        }
    }

    /// Answers the leave prompt with "keep paying".
    pub fn continue_payment(&mut self) -> Result<(), InvalidTransferOp> {
        if !self.leave_prompt {
            return Err(InvalidTransferOp::new("continue_payment", self.status));
        }
        self.leave_prompt = false;
        Ok(())
    }

    /// Guard for outer navigation away from the panel (the fallback console
    /// switching to the DApp hand-off, a tab change). Same rule as
    /// [`go_back`]: an unconfirmed leave while PARTIAL_PAID opens the prompt
    /// and returns false; otherwise the prompt closes and leaving may
    /// proceed.
    ///
    /// [`go_back`]: TransferSession::go_back
    pub fn request_leave(&mut self, confirmed: bool) -> bool {
        if self.status == TransferStatus::PartialPaid && !confirmed {
            self.leave_prompt = true;
            false
        } else {
            self.leave_prompt = false;
            true
        }
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            status: self.status,
            chain: self.chain,
            address: self.address.clone(),
            received: self.received,
            required: self.required,
            remaining: self.remaining(),
            transactions: self.transactions.clone(),
            leave_prompt: self.leave_prompt,
        }
    }

    /// The status a non-scanning sub-session rests in for the current total.
    fn resting_status(&self) -> TransferStatus {
        if self.received.is_zero() {
            TransferStatus::Waiting
        } else if self.received < self.required {
            TransferStatus::PartialPaid
        } else if self.received == self.required {
            TransferStatus::Success
        } else {
            TransferStatus::OverPaid
        }
    }
}

/// Read-only projection of the sub-session for snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSnapshot {
    pub status: TransferStatus,
    pub chain: Option<Chain>,
    pub address: Option<DepositAddress>,
    pub received: Usdt,
    pub required: Usdt,
    pub remaining: Usdt,
    pub transactions: Vec<Transaction>,
    pub leave_prompt: bool,
}

// ============================================================================
// Tests
// ============================================================================
