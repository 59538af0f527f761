use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveTime;
use std::fmt;
use tokio::sync::watch;

use crate::core::checkout::session::SessionEvent;
use crate::core::checkout::transfer::PaymentDetection;
use crate::model::{Chain, DepositAddress, OrderInfo, Usdt, WalletId};

// ============================================================================
// Wallet Connector
// ============================================================================

/// Connection status reported by a wallet connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorStatus::Disconnected => write!(f, "disconnected"),
            ConnectorStatus::Connecting => write!(f, "connecting"),
            ConnectorStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Error type for connector operations.
#[derive(Debug, Clone)]
pub enum ConnectorError {
    /// A session is already active; disconnect before connecting again.
    AlreadyConnected,
    /// The wallet refused the request.
    Rejected(String),
    /// The wallet or its transport could not be reached.
    Unreachable(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "a wallet session is already active"),
            Self::Rejected(e) => write!(f, "wallet rejected the request: {}", e),
            Self::Unreachable(e) => write!(f, "wallet unreachable: {}", e),
        }
    }
}

impl std::error::Error for ConnectorError {}

/// A signature request sent to the connected wallet after order submission.
/// The flow does not wait on the outcome; it only exists for the wallet UI.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    pub wallet: WalletId,
    pub chain: Chain,
    pub order: OrderInfo,
}

/// Trait for the wallet connection transport.
///
/// The controller owns the timing around these calls (pre-connect delay,
/// connect timeout); implementations only talk to the wallet. `connect` may
/// resolve late or never; the controller also watches `watch_status` so a
/// connection that is established out of band (deep link, QR scan) settles
/// the attempt without the call returning.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Whether this connector can reach the given wallet at all. Unsupported
    /// wallets skip the handshake and are treated as trivially connected.
    async fn supports(&self, wallet: &WalletId) -> bool;

    /// Current connection status.
    async fn status(&self) -> ConnectorStatus;

    /// Subscribes to status changes.
    fn watch_status(&self) -> watch::Receiver<ConnectorStatus>;

    /// Opens a session with the wallet. Resolves once the wallet accepts.
    async fn connect(&self, wallet: &WalletId) -> Result<(), ConnectorError>;

    /// Tears down the active session, if any. Best effort.
    async fn disconnect(&self);

    /// Asks the wallet to sign the order. The flow ignores the outcome.
    async fn request_signature(&self, request: SignatureRequest) -> Result<(), ConnectorError>;
}

// ============================================================================
// Payment Monitor
// ============================================================================

/// Trait for the address-transfer backend: address issuance and payment
/// detection on the chosen chain.
#[async_trait]
pub trait PaymentMonitor: Send + Sync {
    /// Issues a deposit address for the chain.
    async fn deposit_address(&self, chain: Chain) -> Result<DepositAddress>;

    /// Looks for a payment that arrived since the last check. `received` and
    /// `required` let implementations size synthetic or real lookups.
    async fn check_payment(
        &self,
        chain: Chain,
        received: Usdt,
        required: Usdt,
    ) -> Result<Option<PaymentDetection>>;
}

// ============================================================================
// Event Emitter
// ============================================================================

/// Trait for handling session events (telemetry, logging, metrics).
///
/// Implementations can log to files, send to metrics services,
/// store for debugging, etc. Implementations should be fast and non-blocking.
#[async_trait]
pub trait SessionEventEmitter: Send + Sync {
    /// Emit a session event.
    async fn emit(&self, event: SessionEvent);

    /// Emit multiple events in order.
    async fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}

/// No-op event emitter that discards all events.
///
/// Useful for testing when events don't need to be captured.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventEmitter;

#[async_trait]
impl SessionEventEmitter for NoOpEventEmitter {
    async fn emit(&self, _event: SessionEvent) {
        // Intentionally empty - discard all events
    }
}

/// Event emitter that writes every event to the log facade at debug level.
#[derive(Debug, Clone, Default)]
pub struct LogEventEmitter;

#[async_trait]
impl SessionEventEmitter for LogEventEmitter {
    async fn emit(&self, event: SessionEvent) {
        log::debug!("checkout event: {:?}", event);
    }
}

// ============================================================================
// Wall Clock
// ============================================================================

/// Source of the wall-clock stamps written into the transfer ledger.
/// Abstracted so tests can pin detection times.
pub trait WallClock: Send + Sync {
    fn now(&self) -> NaiveTime;
}

/// Local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_display() {
        assert_eq!(
            ConnectorError::AlreadyConnected.to_string(),
            "a wallet session is already active"
        );
        assert_eq!(
            ConnectorError::Rejected("user closed the popup".to_string()).to_string(),
            "wallet rejected the request: user closed the popup"
        );
    }

    #[test]
    fn test_connector_status_display() {
        assert_eq!(ConnectorStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectorStatus::Connected.to_string(), "connected");
    }

    #[test]
    fn test_system_clock_returns_a_time() {
        // Smoke test: formatting must yield HH:MM:SS.
        let stamp = SystemClock.now().format("%H:%M:%S").to_string();
        assert_eq!(stamp.len(), 8);
    }
}
