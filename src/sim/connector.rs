//! Simulated wallet connector.
//!
//! Stands in for a real wallet transport in demos and tests. The behavior
//! table covers the interesting shapes a connect attempt can take: resolving
//! normally, never resolving, failing, failing once with a stale session,
//! and connecting out of band so only the status watch sees it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::watch;

use crate::core::checkout::provider::{
    ConnectorError, ConnectorStatus, SignatureRequest, WalletConnector,
};
use crate::model::WalletId;

// ============================================================================
// Behavior Tables
// ============================================================================

/// How a connect attempt plays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// The wallet accepts after `latency`.
    Succeed { latency: Duration },
    /// The call never resolves and the status never leaves connecting.
    Stall,
    /// The wallet refuses immediately.
    Reject,
    /// The first attempt fails with a stale session; attempts after a
    /// disconnect accept after `latency`.
    AlreadyConnectedThenSucceed { latency: Duration },
    /// The call never resolves; the status flips to connected on its own
    /// after `latency`, the way a deep link or QR scan lands.
    OutOfBandOnly { latency: Duration },
}

/// How the wallet answers a signature request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureBehavior {
    Approve,
    Reject,
}

// ============================================================================
// Simulated Connector
// ============================================================================

/// In-memory [`WalletConnector`] driven by the behavior tables above.
#[derive(Debug)]
pub struct SimulatedConnector {
    behavior: ConnectBehavior,
    signature: SignatureBehavior,
    status_tx: Arc<watch::Sender<ConnectorStatus>>,
    /// Wallets reported as unsupported; the flow skips their handshake.
    unsupported: Vec<WalletId>,
    attempts: AtomicU32,
}

impl SimulatedConnector {
    pub fn new(behavior: ConnectBehavior, signature: SignatureBehavior) -> Self {
        let (status_tx, _) = watch::channel(ConnectorStatus::Disconnected);
        Self {
            behavior,
            signature,
            status_tx: Arc::new(status_tx),
            unsupported: Vec::new(),
            attempts: AtomicU32::new(0),
        }
    }

    /// Marks a wallet as out of reach for this connector.
    pub fn without_support_for(mut self, wallet: WalletId) -> Self {
        self.unsupported.push(wallet);
        self
    }

    /// How many connect calls were made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: ConnectorStatus) {
        self.status_tx.send_replace(status);
    }
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new(
            ConnectBehavior::Succeed {
                latency: Duration::from_millis(800),
            },
            SignatureBehavior::Approve,
        )
    }
}

#[async_trait]
impl WalletConnector for SimulatedConnector {
    async fn supports(&self, wallet: &WalletId) -> bool {
        !self.unsupported.contains(wallet)
    }

    async fn status(&self) -> ConnectorStatus {
        *self.status_tx.borrow()
    }

    fn watch_status(&self) -> watch::Receiver<ConnectorStatus> {
        self.status_tx.subscribe()
    }

    async fn connect(&self, wallet: &WalletId) -> Result<(), ConnectorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("simulated connect attempt {} for {}", attempt, wallet);
        match self.behavior {
            ConnectBehavior::Succeed { latency } => {
                self.set_status(ConnectorStatus::Connecting);
                tokio::time::sleep(latency).await;
                self.set_status(ConnectorStatus::Connected);
                Ok(())
            }
            ConnectBehavior::Stall => {
                self.set_status(ConnectorStatus::Connecting);
                std::future::pending().await
            }
            ConnectBehavior::Reject => {
                self.set_status(ConnectorStatus::Disconnected);
                Err(ConnectorError::Rejected(
                    "request dismissed in the wallet".into(),
                ))
            }
            ConnectBehavior::AlreadyConnectedThenSucceed { latency } => {
                if attempt == 1 {
                    Err(ConnectorError::AlreadyConnected)
                } else {
                    self.set_status(ConnectorStatus::Connecting);
                    tokio::time::sleep(latency).await;
                    self.set_status(ConnectorStatus::Connected);
                    Ok(())
                }
            }
            ConnectBehavior::OutOfBandOnly { latency } => {
                self.set_status(ConnectorStatus::Connecting);
                let status_tx = Arc::clone(&self.status_tx);
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    status_tx.send_replace(ConnectorStatus::Connected);
                });
                std::future::pending().await
            }
        }
    }

    async fn disconnect(&self) {
        debug!("simulated disconnect");
        self.set_status(ConnectorStatus::Disconnected);
    }

    async fn request_signature(&self, request: SignatureRequest) -> Result<(), ConnectorError> {
        debug!(
            "simulated signature request from {} on {} for order {}",
            request.wallet, request.chain, request.order.order_id
        );
        match self.signature {
            SignatureBehavior::Approve => Ok(()),
            SignatureBehavior::Reject => Err(ConnectorError::Rejected(
                "signature dismissed in the wallet".into(),
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Chain, OrderInfo};

    fn wallet(id: &str) -> WalletId {
        WalletId::from(id)
    }

    #[tokio::test]
    async fn test_succeed_flips_status_and_resolves() {
        let connector = SimulatedConnector::new(
            ConnectBehavior::Succeed {
                latency: Duration::from_millis(5),
            },
            SignatureBehavior::Approve,
        );
        let mut rx = connector.watch_status();

        connector.connect(&wallet("metamask")).await.unwrap();
        assert_eq!(connector.status().await, ConnectorStatus::Connected);
        rx.wait_for(|s| *s == ConnectorStatus::Connected)
            .await
            .unwrap();

        connector.disconnect().await;
        assert_eq!(connector.status().await, ConnectorStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_reject_returns_error() {
        let connector =
            SimulatedConnector::new(ConnectBehavior::Reject, SignatureBehavior::Approve);
        let err = connector.connect(&wallet("metamask")).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Rejected(_)));
        assert_eq!(connector.status().await, ConnectorStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_session_clears_after_disconnect() {
        let connector = SimulatedConnector::new(
            ConnectBehavior::AlreadyConnectedThenSucceed {
                latency: Duration::from_millis(5),
            },
            SignatureBehavior::Approve,
        );

        let err = connector.connect(&wallet("metamask")).await.unwrap_err();
        assert!(matches!(err, ConnectorError::AlreadyConnected));

        connector.disconnect().await;
        connector.connect(&wallet("metamask")).await.unwrap();
        assert_eq!(connector.status().await, ConnectorStatus::Connected);
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_wallet() {
        let connector = SimulatedConnector::default().without_support_for(wallet("imtoken"));
        assert!(!connector.supports(&wallet("imtoken")).await);
        assert!(connector.supports(&wallet("metamask")).await);
    }

    #[tokio::test]
    async fn test_signature_behavior() {
        let request = SignatureRequest {
            wallet: wallet("metamask"),
            chain: Chain::Ethereum,
            order: OrderInfo::default(),
        };

        let approving = SimulatedConnector::default();
        approving
            .request_signature(request.clone())
            .await
            .unwrap();

        let rejecting = SimulatedConnector::new(
            ConnectBehavior::Succeed {
                latency: Duration::from_millis(5),
            },
            SignatureBehavior::Reject,
        );
        let err = rejecting.request_signature(request).await.unwrap_err();
        assert!(matches!(err, ConnectorError::Rejected(_)));
    }
}
