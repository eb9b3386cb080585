//! Loopback demo
//!
//! Wires the full stack against an in-process engine stub: initializes
//! the dispatcher, sends a few control messages (including a scheduled
//! bundle), echoes a reply and prints statistics.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use osc_link::codec::{encode_message, encode_packet, Argument, Bundle, Message, TimeTag};
use osc_link::config::LinkConfig;
use osc_link::dispatch::{Dispatcher, OriginId};
use osc_link::region::SharedRegion;
use osc_link::sync::{ClockState, SystemClock, TimeSync};
use osc_link::transport::LoopbackEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting loopback demo");

    let config = LinkConfig::load_default()?;
    let engine = LoopbackEngine::new();
    let region = SharedRegion::allocate(config.region);

    let dispatcher = Arc::new(Dispatcher::new(config.dispatch.clone()));
    let mut received = dispatcher.subscribe_received();

    dispatcher
        .initialize(engine.transports(), region)
        .await?;

    let bridge = TimeSync::new(
        dispatcher.clone(),
        Arc::new(SystemClock::new()),
        config.sync.clone(),
    );
    bridge.clock_state_changed(ClockState::Running);

    // Plain message, dispatched immediately
    dispatcher.send(
        "/s_new",
        vec![
            Argument::Str("default".into()),
            Argument::Int(1000),
            Argument::Int(0),
            Argument::Int(0),
        ],
    )?;

    // Bundle due a quarter second from now, held by the outbound unit
    let due = chrono::Utc::now().timestamp() as f64 + 0.25;
    let bundle = Bundle::new(
        TimeTag::from_unix(due),
        vec![Message::new("/n_set")?.arg(1000i32).arg("freq").arg(660.0f32).into()],
    );
    bridge
        .schedule_send(encode_packet(&bundle.into())?, OriginId(1), Some("demo".into()))
        .await?;

    tokio::time::sleep(Duration::from_millis(400)).await;

    for packet in engine.drain_control() {
        tracing::info!("engine received {} bytes", packet.len());
    }

    // Echo a reply back through the inbound unit
    let reply = encode_message(&Message::new("/done")?.arg("/s_new"))?;
    engine.inject_reply(reply);
    let event = received.recv().await?;
    tracing::info!("reply delivered: {:?}", event.packet);

    if let Some(stats) = dispatcher.stats().await {
        tracing::info!("stats: {:?}", stats);
    }

    dispatcher.shutdown().await;
    tracing::info!("done");
    Ok(())
}
