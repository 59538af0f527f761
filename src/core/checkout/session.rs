//! Checkout Session State Machine
//!
//! This module defines the core types for the checkout-flow state machine:
//! wallet selection, connection, chain confirmation and the recovery paths
//! (fallback console, DApp hand-off, address transfer). The state machine is
//! pure (no I/O, no timers) and testable in isolation; the controller owns
//! delays, collaborator calls and the delivery of completion inputs.

use crate::core::checkout::transfer::{
    PaymentDetection, TransferBack, TransferSession, TransferSnapshot, TransferStatus,
};
use crate::model::{Chain, DepositAddress, OrderInfo, Usdt, WalletId};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Core Types
// ============================================================================

/// Identifies one run of the checkout flow. Every reset starts a fresh run
/// with a bumped id; continuations spawned under an older id are dropped on
/// delivery, which is what makes stale timers harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn next(&self) -> SessionId {
        SessionId(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// The two buttons of the sandbox intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathChoice {
    Success,
    Fail,
}

impl fmt::Display for PathChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathChoice::Success => write!(f, "success"),
            PathChoice::Fail => write!(f, "fail"),
        }
    }
}

/// How a custodial-wallet user wants to pay in the hybrid step. The flow
/// treats both the same; the choice is recorded for observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridChoice {
    Custodial,
    Web3,
}

impl fmt::Display for HybridChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HybridChoice::Custodial => write!(f, "custodial"),
            HybridChoice::Web3 => write!(f, "web3"),
        }
    }
}

/// Sandbox shortcuts available from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugAction {
    Success,
    Fail,
    Retry,
}

impl fmt::Display for DebugAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugAction::Success => write!(f, "success"),
            DebugAction::Fail => write!(f, "fail"),
            DebugAction::Retry => write!(f, "retry"),
        }
    }
}

/// Why the flow dropped into the fallback console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackCause {
    /// The fail path was chosen in the sandbox intercept.
    ForcedPath,
    /// The connector reported an error.
    ConnectError,
    /// The connect attempt outlived its timeout.
    ConnectTimeout,
}

impl fmt::Display for FallbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackCause::ForcedPath => write!(f, "forced_path"),
            FallbackCause::ConnectError => write!(f, "connect_error"),
            FallbackCause::ConnectTimeout => write!(f, "connect_timeout"),
        }
    }
}

/// The single canonical completion of a connect attempt. Call return,
/// out-of-band status change and timeout all collapse into one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Failed,
    TimedOut,
}

// ============================================================================
// Session State
// ============================================================================

/// Which phase the session is in (for snapshots, logging and events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutPhase {
    Selection,
    Focus,
    Processing,
    HybridAction,
    Fallback,
    ConnectedChainSelect,
    ConfirmationPhase,
    AuthRequest,
    SignRequest,
    Success,
    Fail,
    DappPay,
    DebugIntercept,
    TransferFlow,
}

impl fmt::Display for CheckoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckoutPhase::Selection => write!(f, "selection"),
            CheckoutPhase::Focus => write!(f, "focus"),
            CheckoutPhase::Processing => write!(f, "processing"),
            CheckoutPhase::HybridAction => write!(f, "hybrid_action"),
            CheckoutPhase::Fallback => write!(f, "fallback"),
            CheckoutPhase::ConnectedChainSelect => write!(f, "connected_chain_select"),
            CheckoutPhase::ConfirmationPhase => write!(f, "confirmation_phase"),
            CheckoutPhase::AuthRequest => write!(f, "auth_request"),
            CheckoutPhase::SignRequest => write!(f, "sign_request"),
            CheckoutPhase::Success => write!(f, "success"),
            CheckoutPhase::Fail => write!(f, "fail"),
            CheckoutPhase::DappPay => write!(f, "dapp_pay"),
            CheckoutPhase::DebugIntercept => write!(f, "debug_intercept"),
            CheckoutPhase::TransferFlow => write!(f, "transfer_flow"),
        }
    }
}

/// What the busy overlay is actually waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingJob {
    /// Connecting the selected wallet (raced against a timeout).
    Connect,
    /// The chosen fail path, heading for the fallback console.
    ForcedFallback,
    /// Settling a hybrid custody confirmation.
    Hybrid,
    /// Submitting the order; the signature request is fire-and-forget.
    Submit { chain: Chain },
}

/// Screen sequence inside the DApp browser hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DappStage {
    NetworkSelect,
    Confirm { chain: Chain, rejected: bool },
    Signing { chain: Chain },
    Authorizing { chain: Chain },
    SuccessSync { chain: Chain },
}

impl DappStage {
    pub fn name(&self) -> &'static str {
        match self {
            DappStage::NetworkSelect => "network_select",
            DappStage::Confirm { .. } => "confirm",
            DappStage::Signing { .. } => "signing",
            DappStage::Authorizing { .. } => "authorizing",
            DappStage::SuccessSync { .. } => "success_sync",
        }
    }
}

impl fmt::Display for DappStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The core state machine for a checkout session.
///
/// Variants carry the data that only exists in that phase; everything with a
/// longer lifetime (selected wallet, transfer sub-session) lives on
/// [`Session`] itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Wallet grid is open, nothing picked yet.
    Selection,
    /// A wallet was picked; the reveal timer runs before the next step.
    Focus,
    /// Busy overlay while a job settles.
    Processing { job: ProcessingJob },
    /// Custodial wallets offer the custody/web3 choice.
    HybridAction,
    /// Recovery console with the DApp and address-transfer options.
    Fallback,
    /// Wallet connected, picking the settlement chain.
    ConnectedChainSelect,
    /// Order summary for the picked chain.
    ConfirmationPhase { chain: Chain },
    /// Legacy authorization step. No edge enters it in the current flow;
    /// hosts embedding a real auth step drive it directly.
    AuthRequest,
    /// Legacy signature step following authorization.
    SignRequest,
    /// Terminal: payment done.
    Success,
    /// Terminal: the debug-only failure screen.
    Fail,
    /// DApp browser hand-off with its own screen sequence.
    DappPay { stage: DappStage },
    /// Sandbox intercept offering the success/fail paths.
    DebugIntercept,
    /// Address-transfer sub-flow owns the screen.
    TransferFlow,
}

impl SessionState {
    /// Returns the phase of this state.
    pub fn phase(&self) -> CheckoutPhase {
        match self {
            SessionState::Selection => CheckoutPhase::Selection,
            SessionState::Focus => CheckoutPhase::Focus,
            SessionState::Processing { .. } => CheckoutPhase::Processing,
            SessionState::HybridAction => CheckoutPhase::HybridAction,
            SessionState::Fallback => CheckoutPhase::Fallback,
            SessionState::ConnectedChainSelect => CheckoutPhase::ConnectedChainSelect,
            SessionState::ConfirmationPhase { .. } => CheckoutPhase::ConfirmationPhase,
            SessionState::AuthRequest => CheckoutPhase::AuthRequest,
            SessionState::SignRequest => CheckoutPhase::SignRequest,
            SessionState::Success => CheckoutPhase::Success,
            SessionState::Fail => CheckoutPhase::Fail,
            SessionState::DappPay { .. } => CheckoutPhase::DappPay,
            SessionState::DebugIntercept => CheckoutPhase::DebugIntercept,
            SessionState::TransferFlow => CheckoutPhase::TransferFlow,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Success | SessionState::Fail)
    }
}

// ============================================================================
// Session Input
// ============================================================================

/// All possible inputs that can trigger state transitions.
///
/// User inputs in the wrong phase are rejected with [`InvalidTransition`];
/// completion inputs in the wrong phase are stale continuations and the
/// controller drops them quietly.
#[derive(Debug, Clone)]
pub enum SessionInput {
    // ---- Wallet grid ----
    SelectWallet { wallet: WalletId },

    // ---- Sandbox intercept ----
    SelectPath { path: PathChoice },

    // ---- Chain selection / confirmation ----
    SelectChain { chain: Chain },
    ReselectChain,
    SubmitOrder,

    // ---- Legacy auth/sign path ----
    ApproveAuth,
    ConfirmSign,

    // ---- Hybrid custody ----
    ConfirmHybrid { choice: HybridChoice },

    // ---- Fallback console / DApp browser ----
    StartDappPay { confirmed: bool },
    DappChooseNetwork { chain: Chain },
    DappSubmitPayment,
    DappConfirmSign,
    DappRejectSign,

    // ---- Address transfer ----
    TransferSelectChain { chain: Chain },
    TransferGenerateAddress,
    TransferCheckResult,
    TransferReturnToAddress,
    TransferGoBack { confirmed: bool },
    TransferContinuePayment,

    // ---- Sandbox controls ----
    Debug { action: DebugAction },
    Reset,

    // ---- Timer and collaborator completions ----
    /// The focus reveal timer fired for the wallet it was armed for.
    FocusRevealElapsed { wallet: WalletId },
    /// The one canonical end of a connect attempt.
    ConnectSettled { outcome: ConnectOutcome },
    /// The forced fail path finished its processing beat.
    ForcedFallbackElapsed,
    /// The hybrid confirmation finished its processing beat.
    HybridSettleElapsed,
    /// The grace period after a signature request ended; success is forced
    /// regardless of what the signature did.
    SignatureGraceElapsed,
    /// A deposit address came back for the transfer sub-flow.
    DepositAddressReady { address: DepositAddress },
    /// A transfer scan finished. `at` stamps the detection time.
    ScanSettled {
        seq: u32,
        detected: Option<PaymentDetection>,
        at: NaiveTime,
    },
    /// DApp authorization beat ended.
    DappAuthorizeElapsed,
    /// DApp success-sync beat ended; control returns to the main flow.
    DappSyncElapsed,
    /// The rejection banner in the DApp confirm screen timed out.
    DappRejectElapsed,
}

impl SessionInput {
    /// Short name for errors and logs.
    pub fn description(&self) -> &'static str {
        match self {
            SessionInput::SelectWallet { .. } => "select_wallet",
            SessionInput::SelectPath { .. } => "select_path",
            SessionInput::SelectChain { .. } => "select_chain",
            SessionInput::ReselectChain => "reselect_chain",
            SessionInput::SubmitOrder => "submit_order",
            SessionInput::ApproveAuth => "approve_auth",
            SessionInput::ConfirmSign => "confirm_sign",
            SessionInput::ConfirmHybrid { .. } => "confirm_hybrid",
            SessionInput::StartDappPay { .. } => "start_dapp_pay",
            SessionInput::DappChooseNetwork { .. } => "dapp_choose_network",
            SessionInput::DappSubmitPayment => "dapp_submit_payment",
            SessionInput::DappConfirmSign => "dapp_confirm_sign",
            SessionInput::DappRejectSign => "dapp_reject_sign",
            SessionInput::TransferSelectChain { .. } => "transfer_select_chain",
            SessionInput::TransferGenerateAddress => "generate_address",
            SessionInput::TransferCheckResult => "check_result",
            SessionInput::TransferReturnToAddress => "return_to_address",
            SessionInput::TransferGoBack { .. } => "go_back",
            SessionInput::TransferContinuePayment => "continue_payment",
            SessionInput::Debug { .. } => "debug_action",
            SessionInput::Reset => "reset",
            SessionInput::FocusRevealElapsed { .. } => "focus_reveal_elapsed",
            SessionInput::ConnectSettled { .. } => "connect_settled",
            SessionInput::ForcedFallbackElapsed => "forced_fallback_elapsed",
            SessionInput::HybridSettleElapsed => "hybrid_settle_elapsed",
            SessionInput::SignatureGraceElapsed => "signature_grace_elapsed",
            SessionInput::DepositAddressReady { .. } => "deposit_address_ready",
            SessionInput::ScanSettled { .. } => "scan_settled",
            SessionInput::DappAuthorizeElapsed => "dapp_authorize_elapsed",
            SessionInput::DappSyncElapsed => "dapp_sync_elapsed",
            SessionInput::DappRejectElapsed => "dapp_reject_elapsed",
        }
    }
}

// ============================================================================
// Session Event
// ============================================================================

/// Events emitted by the state machine for observability.
///
/// Consumed by an event sink trait for logging or other telemetry.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    // ---- Session lifecycle ----
    SessionReset { session_id: SessionId },
    PhaseChanged { from: CheckoutPhase, to: CheckoutPhase },

    // ---- Wallet and path ----
    WalletSelected { wallet: WalletId },
    PathChosen { path: PathChoice },

    // ---- Connection ----
    ConnectRequested { wallet: WalletId },
    ConnectionEstablished { wallet: WalletId },
    ConnectionFailed { wallet: WalletId, timed_out: bool },

    // ---- Chain and order ----
    ChainSelected { chain: Chain },
    OrderSubmitted { chain: Chain },
    HybridConfirmed { choice: HybridChoice },
    CheckoutSucceeded,
    FallbackEntered { cause: FallbackCause },

    // ---- DApp browser ----
    DappStageChanged { stage: DappStage },

    // ---- Address transfer ----
    TransferChainSelected { chain: Chain },
    DepositAddressIssued { address: DepositAddress },
    ScanStarted { seq: u32 },
    PaymentDetected { amount: Usdt, total_received: Usdt, hash: String },
    NothingDetected { seq: u32 },
    TransferStatusChanged { from: TransferStatus, to: TransferStatus },
    TransferCompleted { received: Usdt, overpaid: bool },
    TransferBackIntercepted { received: Usdt },
    TransferExited { received: Usdt },

    // ---- Guards ----
    InputIgnored { input: &'static str, phase: CheckoutPhase },
}

// ============================================================================
// Effects
// ============================================================================

/// Commands for the controller: timers to arm, collaborator calls to make.
/// The pure machine only describes them; the controller executes and feeds
/// the completion inputs back in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Arm the focus reveal timer for this wallet.
    ScheduleFocusReveal { wallet: WalletId },
    /// Run the connect orchestration (pre-delay, disconnect-first, the
    /// connect race) and deliver one `ConnectSettled`.
    BeginConnect { wallet: WalletId },
    /// Arm the forced fail-path timer.
    ScheduleForcedFallback,
    /// Arm the hybrid settle timer.
    ScheduleHybridSettle,
    /// Fire the signature request (outcome ignored) and arm the grace timer.
    RequestSignature { wallet: WalletId, chain: Chain },
    /// Ask the monitor for a deposit address and feed it back.
    ProvideDepositAddress { chain: Chain },
    /// Wait out the scan delay, poll the monitor once, deliver `ScanSettled`.
    BeginTransferScan {
        chain: Chain,
        seq: u32,
        received: Usdt,
        required: Usdt,
    },
    /// Arm the DApp authorization timer.
    ScheduleDappAuthorize,
    /// Arm the DApp success-sync timer.
    ScheduleDappSuccessSync,
    /// Arm the DApp rejection-banner timer.
    ScheduleDappReject,
}

/// Result of applying an input: events to emit and effects to execute.
#[derive(Debug, Default)]
pub struct ApplyResult {
    pub events: Vec<SessionEvent>,
    pub effects: Vec<Effect>,
}

/// A user input arrived in a phase that does not accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub op: &'static str,
    pub phase: CheckoutPhase,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input {} is not valid in phase {}", self.op, self.phase)
    }
}

impl std::error::Error for InvalidTransition {}

// ============================================================================
// Session Struct
// ============================================================================

/// A checkout session: the current state plus everything that outlives
/// individual phases.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    order: OrderInfo,
    state: SessionState,
    selected_wallet: Option<WalletId>,
    transfer: TransferSession,
}

impl Session {
    /// Creates a new session at the wallet grid.
    pub fn new(id: SessionId, order: OrderInfo) -> Self {
        let transfer = TransferSession::new(order.total);
        Self {
            id,
            order,
            state: SessionState::Selection,
            selected_wallet: None,
            transfer,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn order(&self) -> &OrderInfo {
        &self.order
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> CheckoutPhase {
        self.state.phase()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn selected_wallet(&self) -> Option<&WalletId> {
        self.selected_wallet.as_ref()
    }

    /// The chain being confirmed or submitted, if the flow has one.
    pub fn selected_chain(&self) -> Option<Chain> {
        match self.state {
            SessionState::ConfirmationPhase { chain } => Some(chain),
            SessionState::Processing {
                job: ProcessingJob::Submit { chain },
            } => Some(chain),
            _ => None,
        }
    }

    pub fn dapp_stage(&self) -> Option<DappStage> {
        match self.state {
            SessionState::DappPay { stage } => Some(stage),
            _ => None,
        }
    }

    pub fn transfer(&self) -> &TransferSession {
        &self.transfer
    }

    /// Read-only projection for the watch channel and hosts.
    pub fn snapshot(&self) -> CheckoutSnapshot {
        CheckoutSnapshot {
            session_id: self.id,
            phase: self.phase(),
            selected_wallet: self.selected_wallet.clone(),
            selected_chain: self.selected_chain(),
            dapp_stage: self.dapp_stage(),
            transfer: self.transfer.snapshot(),
        }
    }

    /// Applies an input, returning the events and effects it produced.
    ///
    /// This is the only place state changes. Pure: no I/O, no clocks, no
    /// timers. Invalid inputs leave the session untouched.
    pub fn apply(&mut self, input: SessionInput) -> Result<ApplyResult, InvalidTransition> {
        let mut res = ApplyResult::default();
        match input {
            SessionInput::SelectWallet { wallet } => {
                if !matches!(self.state, SessionState::Selection | SessionState::Focus) {
                    return Err(self.invalid("select_wallet"));
                }
                self.selected_wallet = Some(wallet.clone());
                res.events.push(SessionEvent::WalletSelected {
                    wallet: wallet.clone(),
                });
                if wallet.is_transfer() {
                    self.transfer = TransferSession::new(self.order.total);
                    self.goto(SessionState::TransferFlow, &mut res);
                } else {
                    self.goto(SessionState::Focus, &mut res);
                    res.effects.push(Effect::ScheduleFocusReveal { wallet });
                }
            }

            SessionInput::FocusRevealElapsed { wallet } => {
                // A re-selection during focus re-arms the timer for the new
                // wallet; the old timer's input no longer matches and drops.
                if self.state != SessionState::Focus
                    || self.selected_wallet.as_ref() != Some(&wallet)
                {
                    return Err(self.invalid("focus_reveal_elapsed"));
                }
                if wallet.is_custodial() {
                    self.goto(SessionState::HybridAction, &mut res);
                } else {
                    self.goto(SessionState::DebugIntercept, &mut res);
                }
            }

            SessionInput::SelectPath { path } => {
                if self.state != SessionState::DebugIntercept {
                    return Err(self.invalid("select_path"));
                }
                let wallet = self.require_wallet("select_path")?;
                res.events.push(SessionEvent::PathChosen { path });
                match path {
                    PathChoice::Success => {
                        self.goto(
                            SessionState::Processing {
                                job: ProcessingJob::Connect,
                            },
                            &mut res,
                        );
                        res.events.push(SessionEvent::ConnectRequested {
                            wallet: wallet.clone(),
                        });
                        res.effects.push(Effect::BeginConnect { wallet });
                    }
                    PathChoice::Fail => {
                        self.goto(
                            SessionState::Processing {
                                job: ProcessingJob::ForcedFallback,
                            },
                            &mut res,
                        );
                        res.effects.push(Effect::ScheduleForcedFallback);
                    }
                }
            }

            SessionInput::ConnectSettled { outcome } => {
                if self.state
                    != (SessionState::Processing {
                        job: ProcessingJob::Connect,
                    })
                {
                    return Err(self.invalid("connect_settled"));
                }
                let wallet = self.require_wallet("connect_settled")?;
                match outcome {
                    ConnectOutcome::Connected => {
                        res.events
                            .push(SessionEvent::ConnectionEstablished { wallet });
                        self.goto(SessionState::ConnectedChainSelect, &mut res);
                    }
                    ConnectOutcome::Failed | ConnectOutcome::TimedOut => {
                        let timed_out = outcome == ConnectOutcome::TimedOut;
                        res.events
                            .push(SessionEvent::ConnectionFailed { wallet, timed_out });
                        res.events.push(SessionEvent::FallbackEntered {
                            cause: if timed_out {
                                FallbackCause::ConnectTimeout
                            } else {
                                FallbackCause::ConnectError
                            },
                        });
                        self.goto(SessionState::Fallback, &mut res);
                    }
                }
            }

            SessionInput::ForcedFallbackElapsed => {
                if self.state
                    != (SessionState::Processing {
                        job: ProcessingJob::ForcedFallback,
                    })
                {
                    return Err(self.invalid("forced_fallback_elapsed"));
                }
                res.events.push(SessionEvent::FallbackEntered {
                    cause: FallbackCause::ForcedPath,
                });
                self.goto(SessionState::Fallback, &mut res);
            }

            SessionInput::SelectChain { chain } => {
                if self.state != SessionState::ConnectedChainSelect {
                    return Err(self.invalid("select_chain"));
                }
                res.events.push(SessionEvent::ChainSelected { chain });
                self.goto(SessionState::ConfirmationPhase { chain }, &mut res);
            }

            SessionInput::ReselectChain => {
                if !matches!(self.state, SessionState::ConfirmationPhase { .. }) {
                    return Err(self.invalid("reselect_chain"));
                }
                // The connection survives; only the chain pick reopens.
                self.goto(SessionState::ConnectedChainSelect, &mut res);
            }

            SessionInput::SubmitOrder => {
                let SessionState::ConfirmationPhase { chain } = self.state else {
                    return Err(self.invalid("submit_order"));
                };
                let wallet = self.require_wallet("submit_order")?;
                res.events.push(SessionEvent::OrderSubmitted { chain });
                self.goto(
                    SessionState::Processing {
                        job: ProcessingJob::Submit { chain },
                    },
                    &mut res,
                );
                res.effects.push(Effect::RequestSignature { wallet, chain });
            }

            SessionInput::SignatureGraceElapsed => {
                if !matches!(
                    self.state,
                    SessionState::Processing {
                        job: ProcessingJob::Submit { .. }
                    }
                ) {
                    return Err(self.invalid("signature_grace_elapsed"));
                }
                res.events.push(SessionEvent::CheckoutSucceeded);
                self.goto(SessionState::Success, &mut res);
            }

            SessionInput::ApproveAuth => {
                if self.state != SessionState::AuthRequest {
                    return Err(self.invalid("approve_auth"));
                }
                self.goto(SessionState::SignRequest, &mut res);
            }

            SessionInput::ConfirmSign => {
                if self.state != SessionState::SignRequest {
                    return Err(self.invalid("confirm_sign"));
                }
                res.events.push(SessionEvent::CheckoutSucceeded);
                self.goto(SessionState::Success, &mut res);
            }

            SessionInput::ConfirmHybrid { choice } => {
                if self.state != SessionState::HybridAction {
                    return Err(self.invalid("confirm_hybrid"));
                }
                res.events.push(SessionEvent::HybridConfirmed { choice });
                self.goto(
                    SessionState::Processing {
                        job: ProcessingJob::Hybrid,
                    },
                    &mut res,
                );
                res.effects.push(Effect::ScheduleHybridSettle);
            }

            SessionInput::HybridSettleElapsed => {
                if self.state
                    != (SessionState::Processing {
                        job: ProcessingJob::Hybrid,
                    })
                {
                    return Err(self.invalid("hybrid_settle_elapsed"));
                }
                res.events.push(SessionEvent::CheckoutSucceeded);
                self.goto(SessionState::Success, &mut res);
            }

            SessionInput::StartDappPay { confirmed } => {
                if self.state != SessionState::Fallback {
                    return Err(self.invalid("start_dapp_pay"));
                }
                // Leaving the transfer panel for the DApp browser is guarded
                // like any other navigation while a partial payment is on
                // the books.
                if !self.transfer.request_leave(confirmed) {
                    res.events.push(SessionEvent::TransferBackIntercepted {
                        received: self.transfer.received(),
                    });
                } else {
                    let stage = DappStage::NetworkSelect;
                    self.goto(SessionState::DappPay { stage }, &mut res);
                    res.events.push(SessionEvent::DappStageChanged { stage });
                }
            }

            SessionInput::DappChooseNetwork { chain } => {
                if self.state
                    != (SessionState::DappPay {
                        stage: DappStage::NetworkSelect,
                    })
                {
                    return Err(self.invalid("dapp_choose_network"));
                }
                let stage = DappStage::Confirm {
                    chain,
                    rejected: false,
                };
                self.goto(SessionState::DappPay { stage }, &mut res);
                res.events.push(SessionEvent::DappStageChanged { stage });
            }

            SessionInput::DappSubmitPayment => {
                let SessionState::DappPay {
                    stage: DappStage::Confirm { chain, .. },
                } = self.state
                else {
                    return Err(self.invalid("dapp_submit_payment"));
                };
                let stage = DappStage::Signing { chain };
                self.goto(SessionState::DappPay { stage }, &mut res);
                res.events.push(SessionEvent::DappStageChanged { stage });
            }

            SessionInput::DappConfirmSign => {
                let SessionState::DappPay {
                    stage: DappStage::Signing { chain },
                } = self.state
                else {
                    return Err(self.invalid("dapp_confirm_sign"));
                };
                let stage = DappStage::Authorizing { chain };
                self.goto(SessionState::DappPay { stage }, &mut res);
                res.events.push(SessionEvent::DappStageChanged { stage });
                res.effects.push(Effect::ScheduleDappAuthorize);
            }

            SessionInput::DappAuthorizeElapsed => {
                let SessionState::DappPay {
                    stage: DappStage::Authorizing { chain },
                } = self.state
                else {
                    return Err(self.invalid("dapp_authorize_elapsed"));
                };
                let stage = DappStage::SuccessSync { chain };
                self.goto(SessionState::DappPay { stage }, &mut res);
                res.events.push(SessionEvent::DappStageChanged { stage });
                res.effects.push(Effect::ScheduleDappSuccessSync);
            }

            SessionInput::DappSyncElapsed => {
                if !matches!(
                    self.state,
                    SessionState::DappPay {
                        stage: DappStage::SuccessSync { .. }
                    }
                ) {
                    return Err(self.invalid("dapp_sync_elapsed"));
                }
                res.events.push(SessionEvent::CheckoutSucceeded);
                self.goto(SessionState::Success, &mut res);
            }

            SessionInput::DappRejectSign => {
                let SessionState::DappPay {
                    stage: DappStage::Signing { chain },
                } = self.state
                else {
                    return Err(self.invalid("dapp_reject_sign"));
                };
                let stage = DappStage::Confirm {
                    chain,
                    rejected: true,
                };
                self.goto(SessionState::DappPay { stage }, &mut res);
                res.events.push(SessionEvent::DappStageChanged { stage });
                res.effects.push(Effect::ScheduleDappReject);
            }

            SessionInput::DappRejectElapsed => {
                let SessionState::DappPay {
                    stage:
                        DappStage::Confirm {
                            chain,
                            rejected: true,
                        },
                } = self.state
                else {
                    return Err(self.invalid("dapp_reject_elapsed"));
                };
                let stage = DappStage::Confirm {
                    chain,
                    rejected: false,
                };
                self.goto(SessionState::DappPay { stage }, &mut res);
                res.events.push(SessionEvent::DappStageChanged { stage });
            }

            SessionInput::TransferSelectChain { chain } => {
                self.ensure_transfer_context("transfer_select_chain")?;
                self.transfer
                    .select_chain(chain)
                    .map_err(|e| self.invalid(e.op))?;
                res.events.push(SessionEvent::TransferChainSelected { chain });
            }

            SessionInput::TransferGenerateAddress => {
                self.ensure_transfer_context("generate_address")?;
                let chain = self
                    .transfer
                    .address_request()
                    .map_err(|e| self.invalid(e.op))?;
                res.effects.push(Effect::ProvideDepositAddress { chain });
            }

            SessionInput::DepositAddressReady { address } => {
                self.ensure_transfer_context("deposit_address_ready")?;
                self.transfer
                    .set_address(address.clone())
                    .map_err(|e| self.invalid(e.op))?;
                res.events
                    .push(SessionEvent::DepositAddressIssued { address });
            }

            SessionInput::TransferCheckResult => {
                self.ensure_transfer_context("check_result")?;
                let from = self.transfer.status();
                let ticket = self.transfer.begin_scan().map_err(|e| self.invalid(e.op))?;
                res.events.push(SessionEvent::ScanStarted { seq: ticket.seq });
                res.events.push(SessionEvent::TransferStatusChanged {
                    from,
                    to: TransferStatus::Scanning,
                });
                res.effects.push(Effect::BeginTransferScan {
                    chain: ticket.chain,
                    seq: ticket.seq,
                    received: ticket.received,
                    required: ticket.required,
                });
            }

            SessionInput::ScanSettled { seq, detected, at } => {
                self.ensure_transfer_context("scan_settled")?;
                let outcome = self
                    .transfer
                    .settle_scan(seq, detected, at)
                    .map_err(|e| self.invalid(e.op))?;
                match &outcome.appended {
                    Some(tx) => res.events.push(SessionEvent::PaymentDetected {
                        amount: tx.amount,
                        total_received: self.transfer.received(),
                        hash: tx.hash.clone(),
                    }),
                    None => res.events.push(SessionEvent::NothingDetected { seq }),
                }
                res.events.push(SessionEvent::TransferStatusChanged {
                    from: outcome.from,
                    to: outcome.to,
                });
                if outcome.to.is_settled() {
                    res.events.push(SessionEvent::TransferCompleted {
                        received: self.transfer.received(),
                        overpaid: outcome.to == TransferStatus::OverPaid,
                    });
                }
            }

            SessionInput::TransferReturnToAddress => {
                self.ensure_transfer_context("return_to_address")?;
                let from = self.transfer.status();
                self.transfer
                    .return_to_address()
                    .map_err(|e| self.invalid(e.op))?;
                res.events.push(SessionEvent::TransferStatusChanged {
                    from,
                    to: self.transfer.status(),
                });
            }

            SessionInput::TransferGoBack { confirmed } => {
                self.ensure_transfer_context("go_back")?;
                let from = self.transfer.status();
                let back = self
                    .transfer
                    .go_back(confirmed)
                    .map_err(|e| self.invalid(e.op))?;
                match back {
                    TransferBack::Intercepted => {
                        res.events.push(SessionEvent::TransferBackIntercepted {
                            received: self.transfer.received(),
                        });
                    }
                    TransferBack::ToNetworkSelect => {
                        if from != self.transfer.status() {
                            res.events.push(SessionEvent::TransferStatusChanged {
                                from,
                                to: self.transfer.status(),
                            });
                        }
                    }
                    TransferBack::Exit => {
                        res.events.push(SessionEvent::TransferExited {
                            received: self.transfer.received(),
                        });
                        self.transfer = TransferSession::new(self.order.total);
                        if self.state == SessionState::TransferFlow {
                            self.selected_wallet = None;
                            self.goto(SessionState::Selection, &mut res);
                        }
                        // Inside the fallback console the exit only closes
                        // the panel; the console itself stays up.
                    }
                }
            }

            SessionInput::TransferContinuePayment => {
                self.ensure_transfer_context("continue_payment")?;
                self.transfer
                    .continue_payment()
                    .map_err(|e| self.invalid(e.op))?;
            }

            SessionInput::Debug { action } => match action {
                DebugAction::Success => {
                    res.events.push(SessionEvent::CheckoutSucceeded);
                    self.goto(SessionState::Success, &mut res);
                }
                DebugAction::Fail => {
                    self.goto(SessionState::Fail, &mut res);
                }
                DebugAction::Retry => {
                    self.reset_in_place(&mut res);
                }
            },

            SessionInput::Reset => {
                self.reset_in_place(&mut res);
            }
        }
        Ok(res)
    }

    /// Replaces the state, recording the phase change if the flat phase
    /// moved.
    fn goto(&mut self, next: SessionState, res: &mut ApplyResult) {
        let from = self.state.phase();
        let to = next.phase();
        self.state = next;
        if from != to {
            res.events.push(SessionEvent::PhaseChanged { from, to });
        }
    }

    /// Unconditional return to the wallet grid under a fresh session id.
    fn reset_in_place(&mut self, res: &mut ApplyResult) {
        let from = self.phase();
        let next = self.id.next();
        let order = self.order.clone();
        *self = Session::new(next, order);
        if from != CheckoutPhase::Selection {
            res.events.push(SessionEvent::PhaseChanged {
                from,
                to: CheckoutPhase::Selection,
            });
        }
        res.events
            .push(SessionEvent::SessionReset { session_id: next });
    }

    fn invalid(&self, op: &'static str) -> InvalidTransition {
        InvalidTransition {
            op,
            phase: self.phase(),
        }
    }

    fn require_wallet(&self, op: &'static str) -> Result<WalletId, InvalidTransition> {
        self.selected_wallet.clone().ok_or_else(|| self.invalid(op))
    }

    /// Transfer inputs are only meaningful while the transfer panel can be
    /// on screen: the dedicated flow or the fallback console.
    fn ensure_transfer_context(&self, op: &'static str) -> Result<(), InvalidTransition> {
        if matches!(
            self.state,
            SessionState::TransferFlow | SessionState::Fallback
        ) {
            Ok(())
        } else {
            Err(self.invalid(op))
        }
    }
}

/// Read-only projection of a session for the watch channel and hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSnapshot {
    pub session_id: SessionId,
    pub phase: CheckoutPhase,
    pub selected_wallet: Option<WalletId>,
    pub selected_chain: Option<Chain>,
    pub dapp_stage: Option<DappStage>,
    pub transfer: TransferSnapshot,
}

// ============================================================================
// Tests
// ============================================================================
