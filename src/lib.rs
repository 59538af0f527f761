//! Headless checkout flow for the BonusPay hosted widget.
//!
//! Sequences a crypto checkout from wallet selection through connection,
//! chain choice and confirmation to a terminal success or failure, including
//! the recovery paths: the fallback console after a failed connection, the
//! DApp-browser hand-off and the address-transfer flow with its
//! partial-payment ledger.
//!
//! The flow is split in two layers. [`core::checkout::session`] is the pure
//! state machine: applying an input returns events and effect descriptions,
//! no I/O and no clocks. [`core::checkout::controller`] is the async shell
//! that owns the delays, talks to the collaborators behind the
//! [`core::checkout::provider`] traits and feeds completions back into the
//! machine. Hosts render from the snapshot channel; nothing here draws UI.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bonuspay_checkout::core::checkout::provider::LogEventEmitter;
//! use bonuspay_checkout::model::{OrderInfo, WalletId};
//! use bonuspay_checkout::sim::{SimulatedConnector, SimulatedMonitor};
//! use bonuspay_checkout::{CheckoutController, CheckoutPhase, Timings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let controller = CheckoutController::new(
//!         OrderInfo::default(),
//!         Arc::new(SimulatedConnector::default()),
//!         Arc::new(SimulatedMonitor::default()),
//!         Arc::new(LogEventEmitter),
//!         Timings::default(),
//!     );
//!
//!     let mut snapshots = controller.subscribe();
//!     controller.select_wallet(WalletId::from("metamask")).await?;
//!     snapshots
//!         .wait_for(|s| s.phase == CheckoutPhase::DebugIntercept)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod model;
pub mod sim;

pub use crate::core::checkout::controller::{CheckoutController, CheckoutError, Timings};
pub use crate::core::checkout::session::{
    CheckoutPhase, CheckoutSnapshot, DebugAction, HybridChoice, PathChoice, SessionEvent,
    SessionId,
};
pub use crate::core::checkout::transfer::TransferStatus;
pub use crate::model::{Chain, OrderInfo, Usdt, WalletId};
