mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::Parser;
use peer_link::{ManagerConfig, Outbound, PeerManager, ReceiveHandlers, WebRtcNegotiator};
use signal_bus::{LocalBus, SignalingTransport};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "peer-link-demo",
    about = "Negotiate two in-process endpoints over a local signaling bus and exchange messages",
    version
)]
struct Cli {
    /// Messages alice queues for bob before the data path opens
    #[arg(long, default_value_t = 3)]
    messages: usize,

    #[arg(long, default_value = "hello from alice")]
    payload: String,

    #[arg(long = "timeout-secs", default_value_t = 20)]
    timeout_secs: u64,

    /// Only gather host candidates
    #[arg(long, env = "PEER_LINK_LOCALHOST_ONLY")]
    localhost_only: bool,

    #[arg(long = "log-filter", env = "PEER_LINK_LOG")]
    log_filter: Option<String>,
}

fn endpoint(
    base: &ManagerConfig,
    id: &str,
    bus: &Arc<LocalBus>,
    localhost: bool,
) -> Result<PeerManager> {
    let mut config = base.clone();
    config.local_id = id.to_string();
    if localhost {
        config = config.localhost();
    }
    let negotiator =
        WebRtcNegotiator::new(&config).with_context(|| format!("create webrtc api for {id}"))?;
    let transport: Arc<dyn SignalingTransport> = bus.clone();
    PeerManager::start(config, transport, Arc::new(negotiator))
        .with_context(|| format!("start peer manager {id}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_filter.as_deref());

    let base = ManagerConfig::from_env();
    let bus = Arc::new(LocalBus::new());
    let alice = endpoint(&base, "alice", &bus, cli.localhost_only)?;
    let bob = endpoint(&base, "bob", &bus, cli.localhost_only)?;
    info!(
        messages = cli.messages,
        localhost_only = cli.localhost_only,
        ice_servers = base.ice_servers.len(),
        channel_prefix = %base.channel_prefix,
        "starting peer-link demo"
    );

    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<Bytes>();
    bob.on_receive(
        alice.local_id(),
        ReceiveHandlers::new().on_data(move |payload| {
            let _ = received_tx.send(payload);
        }),
    )
    .await?;

    for n in 0..cli.messages {
        let text = format!("{} #{}", cli.payload, n + 1);
        alice.send(bob.local_id(), Outbound::message(text)).await?;
    }
    let outcome = alice.connect(bob.local_id(), true).await?;
    info!(?outcome, "connect issued");

    let mut diagnostics = alice.diagnostics();
    let deadline = tokio::time::sleep(Duration::from_secs(cli.timeout_secs));
    tokio::pin!(deadline);
    let mut received = 0usize;
    while received < cli.messages {
        tokio::select! {
            Some(payload) = received_rx.recv() => {
                received += 1;
                info!(n = received, text = %String::from_utf8_lossy(&payload), "bob received");
            }
            Ok(diagnostic) = diagnostics.recv() => {
                info!(peer_id = ?diagnostic.peer_id, kind = ?diagnostic.kind, "alice diagnostic");
            }
            _ = &mut deadline => {
                let snapshot = alice.snapshot(bob.local_id()).await?;
                warn!(?snapshot, received, "timed out waiting for messages");
                bail!(
                    "only {received} of {} messages arrived within {}s",
                    cli.messages,
                    cli.timeout_secs
                );
            }
        }
    }

    if let Some(snapshot) = alice.snapshot(bob.local_id()).await? {
        info!(state = %snapshot.state, history = snapshot.history_len, "alice view of bob");
    }
    info!(received, "all messages delivered");
    Ok(())
}
