//! Integration tests for the main checkout flow
//!
//! These tests drive the public controller API against the simulated
//! collaborators and verify the integration between:
//! - CheckoutController
//! - Session state machine
//! - Connect orchestration (races, timeout, out-of-band settles)
//! - Event emission
//! - Snapshot publication

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use bonuspay_checkout::core::checkout::provider::SessionEventEmitter;
use bonuspay_checkout::sim::{ConnectBehavior, SignatureBehavior, SimulatedConnector, SimulatedMonitor};
use bonuspay_checkout::{
    Chain, CheckoutController, CheckoutPhase, CheckoutSnapshot, DebugAction, HybridChoice,
    OrderInfo, PathChoice, SessionEvent, SessionId, Timings, WalletId,
};

// ============================================================================
// Capturing Event Emitter
// ============================================================================

/// Event emitter that captures all events for test inspection.
#[derive(Debug, Default)]
pub struct CapturingEventEmitter {
    events: Mutex<Vec<SessionEvent>>,
}

impl CapturingEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of all captured events.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Returns true if any event matches the predicate.
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SessionEvent) -> bool,
    {
        self.events.lock().unwrap().iter().any(predicate)
    }

    /// Count events matching the predicate.
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SessionEvent) -> bool,
    {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl SessionEventEmitter for CapturingEventEmitter {
    async fn emit(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

type TestController = CheckoutController<SimulatedConnector, SimulatedMonitor, CapturingEventEmitter>;

/// Millisecond-scale timing table so scenarios complete quickly.
fn test_timings() -> Timings {
    Timings {
        focus_reveal: Duration::from_millis(10),
        preconnect_delay: Duration::from_millis(10),
        connect_timeout: Duration::from_millis(150),
        forced_fallback: Duration::from_millis(10),
        hybrid_settle: Duration::from_millis(10),
        signature_grace: Duration::from_millis(10),
        scan_delay: Duration::from_millis(10),
        dapp_authorize: Duration::from_millis(10),
        dapp_success_sync: Duration::from_millis(10),
        dapp_reject_reset: Duration::from_millis(20),
    }
}

/// Create a controller wired to a simulated connector and the capturing
/// event emitter.
fn create_controller(
    connector: SimulatedConnector,
) -> (TestController, Arc<CapturingEventEmitter>) {
    let emitter = Arc::new(CapturingEventEmitter::new());
    let controller = CheckoutController::new(
        OrderInfo::default(),
        Arc::new(connector),
        Arc::new(SimulatedMonitor::default()),
        emitter.clone(),
        test_timings(),
    );
    (controller, emitter)
}

fn quick_connector() -> SimulatedConnector {
    SimulatedConnector::new(
        ConnectBehavior::Succeed {
            latency: Duration::from_millis(5),
        },
        SignatureBehavior::Approve,
    )
}

/// Wait until the snapshot channel publishes the given phase.
async fn wait_for_phase(
    rx: &mut watch::Receiver<CheckoutSnapshot>,
    phase: CheckoutPhase,
) -> CheckoutSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.phase == phase))
        .await
        .expect("timed out waiting for phase")
        .expect("snapshot channel closed")
        .clone()
}

/// Drive a fresh non-custodial wallet to the sandbox intercept.
async fn drive_to_intercept(
    controller: &TestController,
) -> watch::Receiver<CheckoutSnapshot> {
    let mut rx = controller.subscribe();
    controller
        .select_wallet(WalletId::from("metamask"))
        .await
        .unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::DebugIntercept).await;
    rx
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Test the complete happy path:
/// Selection → Focus → DebugIntercept → Processing → ConnectedChainSelect →
/// ConfirmationPhase → Processing → Success
#[tokio::test]
async fn test_checkout_happy_path() {
    let (controller, events) = create_controller(quick_connector());
    let mut rx = controller.subscribe();

    // Step 1: Pick a wallet; the focus reveal runs on a timer.
    let phase = controller
        .select_wallet(WalletId::from("metamask"))
        .await
        .unwrap();
    assert_eq!(phase, CheckoutPhase::Focus);
    assert!(events.has_event(|e| matches!(e, SessionEvent::WalletSelected { .. })));

    let snap = wait_for_phase(&mut rx, CheckoutPhase::DebugIntercept).await;
    assert_eq!(snap.selected_wallet, Some(WalletId::from("metamask")));

    // Step 2: Take the success path; the connect orchestration runs.
    let phase = controller.select_path(PathChoice::Success).await.unwrap();
    assert_eq!(phase, CheckoutPhase::Processing);
    assert!(events.has_event(|e| matches!(e, SessionEvent::ConnectRequested { .. })));

    wait_for_phase(&mut rx, CheckoutPhase::ConnectedChainSelect).await;
    assert!(events.has_event(|e| matches!(e, SessionEvent::ConnectionEstablished { .. })));

    // Step 3: Pick a chain, change the pick, keep the connection.
    let phase = controller.select_chain(Chain::Ethereum).await.unwrap();
    assert_eq!(phase, CheckoutPhase::ConfirmationPhase);
    assert_eq!(controller.snapshot().await.selected_chain, Some(Chain::Ethereum));

    let phase = controller.reselect_chain().await.unwrap();
    assert_eq!(phase, CheckoutPhase::ConnectedChainSelect);
    // No second connect attempt happened.
    assert_eq!(
        events.count_events(|e| matches!(e, SessionEvent::ConnectRequested { .. })),
        1
    );

    controller.select_chain(Chain::Bsc).await.unwrap();

    // Step 4: Submit; success is forced after the signature grace period.
    let phase = controller.submit_order().await.unwrap();
    assert_eq!(phase, CheckoutPhase::Processing);
    assert!(events.has_event(|e| matches!(
        e,
        SessionEvent::OrderSubmitted { chain: Chain::Bsc }
    )));

    let snap = wait_for_phase(&mut rx, CheckoutPhase::Success).await;
    assert!(events.has_event(|e| matches!(e, SessionEvent::CheckoutSucceeded)));
    assert_eq!(snap.session_id, SessionId(1));
}

/// Test that a rejected connection lands in the fallback console and a
/// reset recovers to the wallet grid under a fresh session id.
#[tokio::test]
async fn test_rejected_connection_falls_back_and_resets() {
    let (controller, events) = create_controller(SimulatedConnector::new(
        ConnectBehavior::Reject,
        SignatureBehavior::Approve,
    ));
    let mut rx = drive_to_intercept(&controller).await;

    controller.select_path(PathChoice::Success).await.unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::Fallback).await;

    assert!(events.has_event(|e| matches!(
        e,
        SessionEvent::ConnectionFailed {
            timed_out: false,
            ..
        }
    )));
    assert!(events.has_event(|e| matches!(e, SessionEvent::FallbackEntered { .. })));

    // Recover.
    let phase = controller.reset().await.unwrap();
    assert_eq!(phase, CheckoutPhase::Selection);
    let snap = controller.snapshot().await;
    assert_eq!(snap.session_id, SessionId(2));
    assert!(snap.selected_wallet.is_none());
}

/// Test that a connect attempt that never resolves is settled by the
/// timeout arm.
#[tokio::test]
async fn test_stalled_connection_times_out() {
    let (controller, events) = create_controller(SimulatedConnector::new(
        ConnectBehavior::Stall,
        SignatureBehavior::Approve,
    ));
    let mut rx = drive_to_intercept(&controller).await;

    controller.select_path(PathChoice::Success).await.unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::Fallback).await;

    assert!(events.has_event(|e| matches!(
        e,
        SessionEvent::ConnectionFailed { timed_out: true, .. }
    )));
}

/// Test that a connection established out of band (deep link, QR scan)
/// settles the attempt even though the connect call never returns.
#[tokio::test]
async fn test_out_of_band_connection_wins_the_race() {
    let (controller, events) = create_controller(SimulatedConnector::new(
        ConnectBehavior::OutOfBandOnly {
            latency: Duration::from_millis(20),
        },
        SignatureBehavior::Approve,
    ));
    let mut rx = drive_to_intercept(&controller).await;

    controller.select_path(PathChoice::Success).await.unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::ConnectedChainSelect).await;
    assert!(events.has_event(|e| matches!(e, SessionEvent::ConnectionEstablished { .. })));
}

/// Test that a wallet the connector cannot reach skips the handshake
/// entirely and still gets to the chain list.
#[tokio::test]
async fn test_unsupported_wallet_skips_handshake() {
    // Stall would hang any real handshake; unsupported wallets never start
    // one.
    let connector = SimulatedConnector::new(ConnectBehavior::Stall, SignatureBehavior::Approve)
        .without_support_for(WalletId::from("imtoken"));
    let (controller, _) = create_controller(connector);

    let mut rx = controller.subscribe();
    controller
        .select_wallet(WalletId::from("imtoken"))
        .await
        .unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::DebugIntercept).await;

    controller.select_path(PathChoice::Success).await.unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::ConnectedChainSelect).await;
}

/// Test the forced fail path into the fallback console and the full DApp
/// browser walk to success.
#[tokio::test]
async fn test_forced_fail_path_and_dapp_browser_success() {
    let (controller, events) = create_controller(quick_connector());
    let mut rx = drive_to_intercept(&controller).await;

    // The fail path never touches the connector.
    controller.select_path(PathChoice::Fail).await.unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::Fallback).await;
    assert!(!events.has_event(|e| matches!(e, SessionEvent::ConnectRequested { .. })));

    // DApp browser: network select → confirm → sign → authorize → sync.
    let phase = controller.start_dapp_pay(false).await.unwrap();
    assert_eq!(phase, CheckoutPhase::DappPay);

    controller.dapp_choose_network(Chain::Polygon).await.unwrap();
    controller.dapp_submit_payment().await.unwrap();
    controller.dapp_confirm_sign().await.unwrap();

    wait_for_phase(&mut rx, CheckoutPhase::Success).await;
    assert!(events.count_events(|e| matches!(e, SessionEvent::DappStageChanged { .. })) >= 5);
    assert!(events.has_event(|e| matches!(e, SessionEvent::CheckoutSucceeded)));
}

/// Test that rejecting the DApp signature shows the banner, returns to the
/// confirm screen and clears on its own.
#[tokio::test]
async fn test_dapp_signature_rejection_recovers() {
    let (controller, _) = create_controller(quick_connector());
    let mut rx = drive_to_intercept(&controller).await;

    controller.select_path(PathChoice::Fail).await.unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::Fallback).await;
    controller.start_dapp_pay(false).await.unwrap();
    controller.dapp_choose_network(Chain::Avalanche).await.unwrap();
    controller.dapp_submit_payment().await.unwrap();

    // Reject: stays inside the DApp flow, banner up.
    let phase = controller.dapp_reject_sign().await.unwrap();
    assert_eq!(phase, CheckoutPhase::DappPay);

    // Banner clears on its own, then the retry goes through.
    tokio::time::sleep(Duration::from_millis(60)).await;
    controller.dapp_submit_payment().await.unwrap();
    controller.dapp_confirm_sign().await.unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::Success).await;
}

/// Test the custodial wallet branch: hybrid action instead of the sandbox
/// intercept, then unconditional success.
#[tokio::test]
async fn test_custodial_wallet_hybrid_path() {
    let (controller, events) = create_controller(quick_connector());
    let mut rx = controller.subscribe();

    controller
        .select_wallet(WalletId::from("binance"))
        .await
        .unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::HybridAction).await;

    controller
        .confirm_hybrid_action(HybridChoice::Custodial)
        .await
        .unwrap();
    wait_for_phase(&mut rx, CheckoutPhase::Success).await;
    assert!(events.has_event(|e| matches!(
        e,
        SessionEvent::HybridConfirmed {
            choice: HybridChoice::Custodial
        }
    )));
}

/// Test the sandbox shortcuts: straight to success, straight to fail, and
/// retry back to the grid.
#[tokio::test]
async fn test_debug_shortcuts() {
    let (controller, _) = create_controller(quick_connector());
    drive_to_intercept(&controller).await;

    let phase = controller.debug_action(DebugAction::Fail).await.unwrap();
    assert_eq!(phase, CheckoutPhase::Fail);

    let phase = controller.debug_action(DebugAction::Retry).await.unwrap();
    assert_eq!(phase, CheckoutPhase::Selection);
    assert_eq!(controller.snapshot().await.session_id, SessionId(2));

    let phase = controller.debug_action(DebugAction::Success).await.unwrap();
    assert_eq!(phase, CheckoutPhase::Success);
}

/// Test that re-picking a wallet during the focus reveal re-arms the timer
/// for the new wallet and the old timer's input is dropped.
#[tokio::test]
async fn test_wallet_repick_rearms_the_reveal() {
    let (controller, _) = create_controller(quick_connector());
    let mut rx = controller.subscribe();

    controller
        .select_wallet(WalletId::from("metamask"))
        .await
        .unwrap();
    controller
        .select_wallet(WalletId::from("trust"))
        .await
        .unwrap();

    let snap = wait_for_phase(&mut rx, CheckoutPhase::DebugIntercept).await;
    assert_eq!(snap.selected_wallet, Some(WalletId::from("trust")));
}

/// Test that a reset during an in-flight connect drops the settle: the old
/// run's outcome must not leak into the fresh session.
#[tokio::test]
async fn test_reset_discards_inflight_connect() {
    let (controller, events) = create_controller(quick_connector());
    drive_to_intercept(&controller).await;

    controller.select_path(PathChoice::Success).await.unwrap();
    controller.reset().await.unwrap();

    // Let the orchestration finish into the void.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(controller.phase().await, CheckoutPhase::Selection);
    assert!(!events.has_event(|e| matches!(e, SessionEvent::ConnectionEstablished { .. })));
    assert!(!events.has_event(|e| matches!(
        e,
        SessionEvent::PhaseChanged {
            to: CheckoutPhase::ConnectedChainSelect,
            ..
        }
    )));
}

/// Test that invalid operations surface an error and move nothing.
#[tokio::test]
async fn test_invalid_operations_leave_session_untouched() {
    let (controller, events) = create_controller(quick_connector());

    assert!(controller.submit_order().await.is_err());
    assert!(controller.select_chain(Chain::Tron).await.is_err());
    assert!(controller.start_dapp_pay(false).await.is_err());
    assert!(controller.dapp_confirm_sign().await.is_err());
    assert!(controller.approve_auth().await.is_err());
    assert!(controller.confirm_sign().await.is_err());

    let err = controller.select_path(PathChoice::Success).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "operation select_path is not valid in phase selection"
    );

    assert_eq!(controller.phase().await, CheckoutPhase::Selection);
    assert!(!events.has_event(|e| matches!(e, SessionEvent::PhaseChanged { .. })));
}

/// Test that two resets in a row produce identical fresh sessions apart
/// from the run id.
#[tokio::test]
async fn test_double_reset_is_stable() {
    let (controller, _) = create_controller(quick_connector());
    drive_to_intercept(&controller).await;

    controller.reset().await.unwrap();
    let first = controller.snapshot().await;
    controller.reset().await.unwrap();
    let second = controller.snapshot().await;

    assert_eq!(first.phase, CheckoutPhase::Selection);
    assert_eq!(second.phase, CheckoutPhase::Selection);
    assert_eq!(first.selected_wallet, second.selected_wallet);
    assert_eq!(first.transfer, second.transfer);
    assert_ne!(first.session_id, second.session_id);
}
