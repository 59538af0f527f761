//! Simulated collaborators.
//!
//! In-memory stand-ins for the wallet transport and the payment backend,
//! scriptable enough to walk every path the flow has. Demos and integration
//! tests run against these; a real deployment supplies its own
//! [`WalletConnector`] and [`PaymentMonitor`] implementations.
//!
//! [`WalletConnector`]: crate::core::checkout::provider::WalletConnector
//! [`PaymentMonitor`]: crate::core::checkout::provider::PaymentMonitor

pub mod connector;
pub mod monitor;

pub use connector::{ConnectBehavior, SignatureBehavior, SimulatedConnector};
pub use monitor::{
    ScriptedCheck, SimulatedMonitor, EVM_DEPOSIT_ADDRESS, FIRST_PAYMENT_HASH, SECOND_PAYMENT_HASH,
    TRON_DEPOSIT_ADDRESS,
};
