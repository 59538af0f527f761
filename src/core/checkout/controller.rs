//! Checkout Controller
//!
//! The async shell around the pure session machine. Operations lock the
//! session, apply one input, publish a snapshot to the watch channel and
//! release the lock before any I/O; events are then emitted and effects run
//! as spawned tasks whose completions come back in as inputs.
//!
//! # Concurrency
//!
//! The session is mutated only under a single async mutex, and the lock is
//! never held across a collaborator call or a timer. Every spawned
//! continuation captures the [`SessionId`] current at spawn time; delivery
//! drops the input when the id no longer matches (a reset happened in
//! between) or when the machine rejects it (the continuation was superseded
//! within the same run). Dropped completions are logged, never errors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{watch, Mutex};

use crate::core::checkout::provider::{
    ConnectorError, ConnectorStatus, PaymentMonitor, SessionEventEmitter, SignatureRequest,
    SystemClock, WallClock, WalletConnector,
};
use crate::core::checkout::session::{
    CheckoutPhase, CheckoutSnapshot, ConnectOutcome, DebugAction, Effect, HybridChoice,
    InvalidTransition, PathChoice, Session, SessionEvent, SessionId, SessionInput,
};
use crate::model::{Chain, OrderInfo, WalletId};

// ============================================================================
// Timings
// ============================================================================

/// Every delay the flow uses. Defaults are the production beats; tests build
/// millisecond-scale tables so scenarios run in real async time without
/// real waits.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Focus reveal after a wallet is picked.
    pub focus_reveal: Duration,
    /// Settle-down beat before the connector is touched at all.
    pub preconnect_delay: Duration,
    /// Cap on one connect attempt; exceeding it settles the attempt as
    /// timed out.
    pub connect_timeout: Duration,
    /// Processing beat on the forced fail path.
    pub forced_fallback: Duration,
    /// Processing beat after a hybrid custody confirmation.
    pub hybrid_settle: Duration,
    /// Grace period after the signature request before success is forced.
    pub signature_grace: Duration,
    /// Delay before a transfer result check polls the monitor.
    pub scan_delay: Duration,
    /// DApp authorization beat.
    pub dapp_authorize: Duration,
    /// DApp success-sync beat before control returns to the main flow.
    pub dapp_success_sync: Duration,
    /// How long the DApp rejection banner stays up.
    pub dapp_reject_reset: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            focus_reveal: Duration::from_millis(600),
            preconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(5000),
            forced_fallback: Duration::from_millis(1000),
            hybrid_settle: Duration::from_millis(1500),
            signature_grace: Duration::from_millis(1000),
            scan_delay: Duration::from_millis(3000),
            dapp_authorize: Duration::from_millis(1500),
            dapp_success_sync: Duration::from_millis(800),
            dapp_reject_reset: Duration::from_millis(2000),
        }
    }
}

impl Timings {
    /// Create a timing table for testing with millisecond-scale delays.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            focus_reveal: Duration::from_millis(10),
            preconnect_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(200),
            forced_fallback: Duration::from_millis(10),
            hybrid_settle: Duration::from_millis(10),
            signature_grace: Duration::from_millis(10),
            scan_delay: Duration::from_millis(10),
            dapp_authorize: Duration::from_millis(10),
            dapp_success_sync: Duration::from_millis(10),
            dapp_reject_reset: Duration::from_millis(20),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by controller operations.
#[derive(Debug, Clone)]
pub enum CheckoutError {
    /// The operation is not available in the current phase.
    InvalidTransition {
        op: &'static str,
        phase: CheckoutPhase,
    },
}

impl fmt::Display for CheckoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { op, phase } => {
                write!(f, "operation {} is not valid in phase {}", op, phase)
            }
        }
    }
}

impl std::error::Error for CheckoutError {}

impl From<InvalidTransition> for CheckoutError {
    fn from(e: InvalidTransition) -> Self {
        CheckoutError::InvalidTransition {
            op: e.op,
            phase: e.phase,
        }
    }
}

// ============================================================================
// Checkout Controller
// ============================================================================

/// Drives one checkout session.
///
/// Generic over the connector, monitor and event emitter traits for
/// testability. Cheap to clone; clones share the session, the snapshot
/// channel and the collaborators.
pub struct CheckoutController<C, M, E>
where
    C: WalletConnector + 'static,
    M: PaymentMonitor + 'static,
    E: SessionEventEmitter + 'static,
{
    session: Arc<Mutex<Session>>,
    /// Publishes a fresh snapshot after every accepted input.
    snapshot_tx: Arc<watch::Sender<CheckoutSnapshot>>,
    connector: Arc<C>,
    monitor: Arc<M>,
    emitter: Arc<E>,
    clock: Arc<dyn WallClock>,
    timings: Timings,
}

impl<C, M, E> CheckoutController<C, M, E>
where
    C: WalletConnector + 'static,
    M: PaymentMonitor + 'static,
    E: SessionEventEmitter + 'static,
{
    /// Creates a controller for a fresh session on the given order, stamping
    /// ledger entries with local system time.
    pub fn new(
        order: OrderInfo,
        connector: Arc<C>,
        monitor: Arc<M>,
        emitter: Arc<E>,
        timings: Timings,
    ) -> Self {
        Self::with_clock(order, connector, monitor, emitter, Arc::new(SystemClock), timings)
    }

    /// Like [`new`] but with an explicit wall clock (tests pin it).
    ///
    /// [`new`]: CheckoutController::new
    pub fn with_clock(
        order: OrderInfo,
        connector: Arc<C>,
        monitor: Arc<M>,
        emitter: Arc<E>,
        clock: Arc<dyn WallClock>,
        timings: Timings,
    ) -> Self {
        let session = Session::new(SessionId(1), order);
        info!("checkout started: {}", session.id());
        let (snapshot_tx, _) = watch::channel(session.snapshot());
        Self {
            session: Arc::new(Mutex::new(session)),
            snapshot_tx: Arc::new(snapshot_tx),
            connector,
            monitor,
            emitter,
            clock,
            timings,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current snapshot of the session.
    pub async fn snapshot(&self) -> CheckoutSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Current phase of the session.
    pub async fn phase(&self) -> CheckoutPhase {
        self.session.lock().await.phase()
    }

    /// Subscribes to snapshot updates. The receiver starts out holding the
    /// snapshot current at subscription time.
    pub fn subscribe(&self) -> watch::Receiver<CheckoutSnapshot> {
        self.snapshot_tx.subscribe()
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Picks a wallet from the grid. The Transfer Pay entry jumps straight
    /// into the address-transfer sub-flow; every other wallet starts the
    /// focus reveal. Picking again during the reveal re-arms it.
    pub async fn select_wallet(&self, wallet: WalletId) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::SelectWallet { wallet }).await
    }

    /// Chooses the success or fail path in the sandbox intercept.
    pub async fn select_path(&self, path: PathChoice) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::SelectPath { path }).await
    }

    /// Picks the settlement chain after a successful connection.
    pub async fn select_chain(&self, chain: Chain) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::SelectChain { chain }).await
    }

    /// Reopens the chain list from the order summary. The connection is kept.
    pub async fn reselect_chain(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::ReselectChain).await
    }

    /// Submits the order. Fires the signature request and forces success
    /// after the grace period regardless of the signature outcome.
    pub async fn submit_order(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::SubmitOrder).await
    }

    /// Approves the legacy authorization step.
    pub async fn approve_auth(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::ApproveAuth).await
    }

    /// Confirms the legacy signature step.
    pub async fn confirm_sign(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::ConfirmSign).await
    }

    /// Confirms the custody choice for a custodial wallet.
    pub async fn confirm_hybrid_action(
        &self,
        choice: HybridChoice,
    ) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::ConfirmHybrid { choice }).await
    }

    /// Opens the DApp browser hand-off from the fallback console. With a
    /// partial payment on the books an unconfirmed call opens the leave
    /// prompt (visible in the snapshot) instead of moving.
    pub async fn start_dapp_pay(&self, confirmed: bool) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::StartDappPay { confirmed }).await
    }

    /// Picks the network inside the DApp browser.
    pub async fn dapp_choose_network(&self, chain: Chain) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::DappChooseNetwork { chain }).await
    }

    /// Submits the payment inside the DApp browser.
    pub async fn dapp_submit_payment(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::DappSubmitPayment).await
    }

    /// Confirms the DApp signature dialog.
    pub async fn dapp_confirm_sign(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::DappConfirmSign).await
    }

    /// Rejects the DApp signature dialog. A banner shows and clears on its
    /// own; the flow stays on the confirm screen.
    pub async fn dapp_reject_sign(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::DappRejectSign).await
    }

    /// Picks the network to pay on in the transfer sub-flow.
    pub async fn transfer_select_chain(&self, chain: Chain) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::TransferSelectChain { chain }).await
    }

    /// Asks the monitor for a deposit address. The address lands in the
    /// snapshot once issued.
    pub async fn transfer_generate_address(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::TransferGenerateAddress).await
    }

    /// Starts a payment result check (scan delay, then one monitor poll).
    pub async fn transfer_check_result(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::TransferCheckResult).await
    }

    /// Cancels the running scan and returns to the address screen.
    pub async fn transfer_return_to_address(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::TransferReturnToAddress).await
    }

    /// Navigates back in the transfer sub-flow. With a partial payment on
    /// the books an unconfirmed back opens the leave prompt (visible in the
    /// snapshot) instead of moving.
    pub async fn transfer_go_back(&self, confirmed: bool) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::TransferGoBack { confirmed }).await
    }

    /// Answers the leave prompt with "keep paying".
    pub async fn transfer_continue_payment(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::TransferContinuePayment).await
    }

    /// Sandbox shortcut: jump to success or fail, or retry from scratch.
    pub async fn debug_action(&self, action: DebugAction) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::Debug { action }).await
    }

    /// Returns to the wallet grid under a fresh session id. Continuations
    /// spawned under the old id are dead from this point on.
    pub async fn reset(&self) -> Result<CheckoutPhase, CheckoutError> {
        self.dispatch(SessionInput::Reset).await
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Applies a user input: lock, apply, publish, release, then emit events
    /// and launch effects. Returns the phase right after the input.
    async fn dispatch(&self, input: SessionInput) -> Result<CheckoutPhase, CheckoutError> {
        let (id, phase, result) = {
            let mut session = self.session.lock().await;
            let result = session.apply(input)?;
            self.snapshot_tx.send_replace(session.snapshot());
            (session.id(), session.phase(), result)
        }; // Lock released

        self.emitter.emit_all(result.events).await;
        self.launch_effects(id, result.effects);
        Ok(phase)
    }

    /// Delivers a completion input spawned under `tag`. Inputs from a dead
    /// run (reset in between) or superseded within the live run are dropped.
    async fn apply_tagged(&self, tag: SessionId, input: SessionInput) {
        let name = input.description();
        let mut session = self.session.lock().await;
        if session.id() != tag {
            debug!(
                "dropping {} spawned under {}, live run is {}",
                name,
                tag,
                session.id()
            );
            return;
        }
        match session.apply(input) {
            Ok(result) => {
                self.snapshot_tx.send_replace(session.snapshot());
                let id = session.id();
                drop(session); // Lock released before I/O
                self.emitter.emit_all(result.events).await;
                self.launch_effects(id, result.effects);
            }
            Err(err) => {
                let phase = session.phase();
                drop(session);
                debug!("discarding superseded completion: {}", err);
                self.emitter
                    .emit(SessionEvent::InputIgnored { input: name, phase })
                    .await;
            }
        }
    }

    /// Starts one task per effect, each tagged with the run it belongs to.
    fn launch_effects(&self, id: SessionId, effects: Vec<Effect>) {
        for effect in effects {
            self.launch_effect(id, effect);
        }
    }

    fn launch_effect(&self, id: SessionId, effect: Effect) {
        match effect {
            Effect::ScheduleFocusReveal { wallet } => {
                self.schedule(
                    id,
                    self.timings.focus_reveal,
                    SessionInput::FocusRevealElapsed { wallet },
                );
            }
            Effect::BeginConnect { wallet } => {
                let this = self.clone();
                tokio::spawn(async move {
                    let outcome = this.run_connect(&wallet).await;
                    this.apply_tagged(id, SessionInput::ConnectSettled { outcome })
                        .await;
                });
            }
            Effect::ScheduleForcedFallback => {
                self.schedule(
                    id,
                    self.timings.forced_fallback,
                    SessionInput::ForcedFallbackElapsed,
                );
            }
            Effect::ScheduleHybridSettle => {
                self.schedule(
                    id,
                    self.timings.hybrid_settle,
                    SessionInput::HybridSettleElapsed,
                );
            }
            Effect::RequestSignature { wallet, chain } => {
                // Fire and forget; the grace timer decides the outcome.
                let this = self.clone();
                tokio::spawn(async move {
                    let order = this.session.lock().await.order().clone();
                    let request = SignatureRequest { wallet, chain, order };
                    if let Err(err) = this.connector.request_signature(request).await {
                        warn!("signature request failed, success is forced anyway: {}", err);
                    }
                });
                self.schedule(
                    id,
                    self.timings.signature_grace,
                    SessionInput::SignatureGraceElapsed,
                );
            }
            Effect::ProvideDepositAddress { chain } => {
                let this = self.clone();
                tokio::spawn(async move {
                    match this.monitor.deposit_address(chain).await {
                        Ok(address) => {
                            this.apply_tagged(id, SessionInput::DepositAddressReady { address })
                                .await;
                        }
                        Err(err) => {
                            // The user can simply request another address.
                            warn!("deposit address for {} failed: {}", chain, err);
                        }
                    }
                });
            }
            Effect::BeginTransferScan {
                chain,
                seq,
                received,
                required,
            } => {
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(this.timings.scan_delay).await;
                    let detected = match this.monitor.check_payment(chain, received, required).await
                    {
                        Ok(detected) => detected,
                        Err(err) => {
                            warn!("payment check on {} failed, treating as empty: {}", chain, err);
                            None
                        }
                    };
                    let at = this.clock.now();
                    this.apply_tagged(id, SessionInput::ScanSettled { seq, detected, at })
                        .await;
                });
            }
            Effect::ScheduleDappAuthorize => {
                self.schedule(
                    id,
                    self.timings.dapp_authorize,
                    SessionInput::DappAuthorizeElapsed,
                );
            }
            Effect::ScheduleDappSuccessSync => {
                self.schedule(
                    id,
                    self.timings.dapp_success_sync,
                    SessionInput::DappSyncElapsed,
                );
            }
            Effect::ScheduleDappReject => {
                self.schedule(
                    id,
                    self.timings.dapp_reject_reset,
                    SessionInput::DappRejectElapsed,
                );
            }
        }
    }

    /// Arms one timer: sleep, then deliver the input through the tag check.
    fn schedule(&self, id: SessionId, delay: Duration, input: SessionInput) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.apply_tagged(id, input).await;
        });
    }

    // ========================================================================
    // Connect Orchestration
    // ========================================================================

    /// One connect attempt, one outcome. Races the connect call against the
    /// status watch (wallets that connect out of band never resolve the
    /// call) and the timeout; the losing futures are dropped.
    async fn run_connect(&self, wallet: &WalletId) -> ConnectOutcome {
        tokio::time::sleep(self.timings.preconnect_delay).await;

        if !self.connector.supports(wallet).await {
            // Nothing to handshake with; continue to the chain list as if
            // connected.
            info!("connector does not support {}, skipping handshake", wallet);
            return ConnectOutcome::Connected;
        }

        if self.connector.status().await == ConnectorStatus::Connected {
            // Lingering session from an earlier attempt.
            self.connector.disconnect().await;
        }

        let mut status_rx = self.connector.watch_status();
        let connect_call = async {
            match self.connector.connect(wallet).await {
                Ok(()) => ConnectOutcome::Connected,
                Err(ConnectorError::AlreadyConnected) => {
                    // Raced with a session we did not see; drop it and retry
                    // once.
                    self.connector.disconnect().await;
                    match self.connector.connect(wallet).await {
                        Ok(()) => ConnectOutcome::Connected,
                        Err(err) => {
                            warn!("connect retry for {} failed: {}", wallet, err);
                            ConnectOutcome::Failed
                        }
                    }
                }
                Err(err) => {
                    warn!("connect for {} failed: {}", wallet, err);
                    ConnectOutcome::Failed
                }
            }
        };
        let out_of_band = async move {
            if status_rx
                .wait_for(|status| *status == ConnectorStatus::Connected)
                .await
                .is_ok()
            {
                ConnectOutcome::Connected
            } else {
                // Status channel gone; let the other arms decide.
                std::future::pending().await
            }
        };

        tokio::select! {
            outcome = connect_call => outcome,
            outcome = out_of_band => outcome,
            _ = tokio::time::sleep(self.timings.connect_timeout) => ConnectOutcome::TimedOut,
        }
    }
}

// Allow cloning the controller (shares the session and the collaborators)
impl<C, M, E> Clone for CheckoutController<C, M, E>
where
    C: WalletConnector + 'static,
    M: PaymentMonitor + 'static,
    E: SessionEventEmitter + 'static,
{
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            snapshot_tx: Arc::clone(&self.snapshot_tx),
            connector: Arc::clone(&self.connector),
            monitor: Arc::clone(&self.monitor),
            emitter: Arc::clone(&self.emitter),
            clock: Arc::clone(&self.clock),
            timings: self.timings.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
