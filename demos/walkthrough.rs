//! Walks the two main journeys end to end against the simulated
//! collaborators: the wallet-connect happy path and the address-transfer
//! flow with a partial payment.
//!
//! Run with `cargo run --example walkthrough`; set `RUST_LOG=debug` to see
//! every session event and the simulated collaborator chatter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use bonuspay_checkout::core::checkout::provider::LogEventEmitter;
use bonuspay_checkout::sim::{
    ConnectBehavior, SignatureBehavior, SimulatedConnector, SimulatedMonitor,
};
use bonuspay_checkout::{
    Chain, CheckoutController, CheckoutPhase, OrderInfo, PathChoice, Timings, TransferStatus,
    WalletId,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let order = OrderInfo::default();
    println!(
        "{} order {}: {} USDT\n",
        order.merchant, order.order_id, order.total
    );

    wallet_connect_journey(&order).await?;
    address_transfer_journey(&order).await?;
    Ok(())
}

/// Selection → focus → connect → chain pick → submit → success.
async fn wallet_connect_journey(order: &OrderInfo) -> anyhow::Result<()> {
    println!("== wallet connect ==");
    let controller = CheckoutController::new(
        order.clone(),
        Arc::new(SimulatedConnector::new(
            ConnectBehavior::Succeed {
                latency: Duration::from_millis(400),
            },
            SignatureBehavior::Approve,
        )),
        Arc::new(SimulatedMonitor::default()),
        Arc::new(LogEventEmitter),
        Timings::default(),
    );
    let mut snapshots = controller.subscribe();

    controller.select_wallet(WalletId::from("metamask")).await?;
    snapshots
        .wait_for(|s| s.phase == CheckoutPhase::DebugIntercept)
        .await?;
    println!("wallet focused, taking the success path");

    controller.select_path(PathChoice::Success).await?;
    snapshots
        .wait_for(|s| s.phase == CheckoutPhase::ConnectedChainSelect)
        .await?;
    println!("connected, picking a settlement chain");

    controller.select_chain(Chain::Ethereum).await?;
    controller.submit_order().await?;
    snapshots
        .wait_for(|s| s.phase == CheckoutPhase::Success)
        .await?;
    println!("checkout succeeded\n");
    Ok(())
}

/// The transfer panel: address issuance, a partial payment, completion.
async fn address_transfer_journey(order: &OrderInfo) -> anyhow::Result<()> {
    println!("== address transfer ==");
    let controller = CheckoutController::new(
        order.clone(),
        Arc::new(SimulatedConnector::default()),
        Arc::new(SimulatedMonitor::default()),
        Arc::new(LogEventEmitter),
        Timings::default(),
    );
    let mut snapshots = controller.subscribe();

    controller.select_wallet(WalletId::from("transfer")).await?;
    controller.transfer_select_chain(Chain::Tron).await?;
    controller.transfer_generate_address().await?;
    let snap = snapshots
        .wait_for(|s| s.transfer.address.is_some())
        .await?
        .clone();
    let address = snap.transfer.address.context("no address issued")?;
    println!(
        "pay {} USDT to {} ({})",
        snap.transfer.required, address.address, address.protocol
    );

    controller.transfer_check_result().await?;
    let snap = snapshots
        .wait_for(|s| s.transfer.status == TransferStatus::PartialPaid)
        .await?
        .clone();
    println!(
        "partial payment: {} received, {} remaining",
        snap.transfer.received, snap.transfer.remaining
    );
    for tx in &snap.transfer.transactions {
        println!("  {} {} USDT at {} ({})", tx.id, tx.amount, tx.time, tx.hash);
    }

    controller.transfer_check_result().await?;
    let snap = snapshots
        .wait_for(|s| s.transfer.status == TransferStatus::Success)
        .await?
        .clone();
    println!(
        "transfer settled: {} USDT over {} transactions",
        snap.transfer.received,
        snap.transfer.transactions.len()
    );
    Ok(())
}
