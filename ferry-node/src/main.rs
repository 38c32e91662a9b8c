//! # Ferry
//!
//! Command-line node for Ferry.
//!
//! - `ferry watch` announces finished files in a directory and, unless told
//!   otherwise, serves them to consumers
//! - `ferry serve` runs only the file server
//! - `ferry consume` pulls announced files into a local directory

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ferry_config::{Config, ConfigLoad, ConfigLoader, ConfigSource};
use ferry_core::broker::{RedisStreamSource, RedisStreamTransport};
use ferry_core::consume::NotificationConsumer;
use ferry_core::publish::{NotificationPublisher, NotificationQueue};
use ferry_core::transfer::{TransferClient, TransferServer};
use ferry_core::watch::{DirectoryWatcher, EventClassifier, resolve_node_address};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "ferry", version)]
#[command(about = "Propagate finished files from a watched directory to other hosts")]
struct Cli {
    /// Path to a ferry.toml (default: $FERRY_CONFIG_PATH, ./ferry.toml, ./config/ferry.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch a directory, announce finished files and serve them
    Watch(WatchArgs),
    /// Serve files to consumers without watching or publishing
    Serve(ServeArgs),
    /// Pull announced files into a destination directory
    Consume(ConsumeArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Directory to watch (not recursive)
    directory: PathBuf,

    /// Broker host, or a full redis:// URL
    broker_host: String,

    /// File suffix to announce; repeat for several (overrides watch.extensions)
    #[arg(long = "extension", value_name = "SUFFIX")]
    extensions: Vec<String>,

    /// Address to announce instead of the discovered one
    #[arg(long)]
    advertise: Option<String>,

    /// Do not start the file server in this process
    #[arg(long, default_value_t = false)]
    no_serve: bool,
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    /// Address to bind (overrides transfer.bind)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port to listen on (overrides transfer.port)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct ConsumeArgs {
    /// Broker host, or a full redis:// URL
    broker_host: String,

    /// Directory received files are written to
    destination: PathBuf,

    /// Name of this consumer within its group (default: random)
    #[arg(long)]
    consumer: Option<String>,

    /// Consumer group (overrides consumer.group)
    #[arg(long)]
    group: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ConfigLoad {
        config,
        source,
        env_file_loaded,
    } = load_config(cli.config.as_deref())?;
    if env_file_loaded {
        info!("loaded .env file");
    }
    match &source {
        ConfigSource::File(path) => info!(path = %path.display(), "config file loaded"),
        ConfigSource::Defaults => info!("no config file found; using defaults"),
    }

    let token = CancellationToken::new();
    cancel_on_interrupt(token.clone());

    match cli.command {
        Command::Watch(args) => run_watch(config, args, token).await,
        Command::Serve(args) => run_serve(config, args, token).await,
        Command::Consume(args) => run_consume(config, args, token).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,ferry_core::publish=info,ferry_core::transfer=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConfigLoad> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_config_path(path);
    }
    loader.load().context("failed to load configuration")
}

fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                token.cancel();
            }
            Err(err) => warn!("cannot listen for interrupts: {err}"),
        }
    });
}

async fn run_watch(
    mut config: Config,
    args: WatchArgs,
    token: CancellationToken,
) -> anyhow::Result<()> {
    if !args.extensions.is_empty() {
        config.watch.extensions = args.extensions.clone();
    }
    if let Some(advertise) = args.advertise.clone() {
        config.watch.advertise_address = Some(advertise);
    }
    config.validate().context("invalid settings")?;
    let url = config.broker.url_for(&args.broker_host);

    // Without a routable address every notification would be useless.
    let address = resolve_node_address(config.watch.advertise_address.as_deref())
        .context("cannot determine the address to announce")?;
    info!(%address, extensions = ?config.watch.extensions, "node address resolved");

    let server = if args.no_serve {
        None
    } else {
        let server = TransferServer::bind(config.transfer.clone())
            .await
            .with_context(|| format!("failed to bind {}", config.transfer.bind_addr()))?;
        Some(server)
    };

    let (queue, outbound) = NotificationQueue::channel();
    let classifier = EventClassifier::new(address, config.watch.clone(), queue);
    let watcher = DirectoryWatcher::start(&args.directory, classifier)
        .with_context(|| format!("failed to watch {}", args.directory.display()))?;

    let serving: Option<JoinHandle<_>> =
        server.map(|server| tokio::spawn(server.run(token.clone())));

    let transport = RedisStreamTransport::new(&url, config.consumer.group.clone())
        .context("invalid broker URL")?;
    let publisher = NotificationPublisher::new(transport, config.publisher.clone(), outbound);
    let report = publisher.run(token.clone()).await;

    token.cancel();
    watcher.stop();
    if let Some(serving) = serving {
        serving.await.context("file server task failed")??;
    }

    let report = report.context("publisher failed")?;
    info!(
        epochs = report.epochs,
        published = report.totals.published,
        acked = report.totals.acked,
        nacked = report.totals.nacked,
        unconfirmed = report.unconfirmed.len(),
        queued = report.queued,
        "watch stopped"
    );
    Ok(())
}

async fn run_serve(
    mut config: Config,
    args: ServeArgs,
    token: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.transfer.bind = bind;
    }
    if let Some(port) = args.port {
        config.transfer.port = port;
    }

    let server = TransferServer::bind(config.transfer.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.transfer.bind_addr()))?;
    server.run(token).await?;
    Ok(())
}

async fn run_consume(
    mut config: Config,
    args: ConsumeArgs,
    token: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(group) = args.group.clone() {
        config.consumer.group = group;
    }
    config.validate().context("invalid settings")?;
    let url = config.broker.url_for(&args.broker_host);
    let destination = args.destination.clone();

    tokio::fs::create_dir_all(&destination)
        .await
        .with_context(|| format!("failed to create {}", destination.display()))?;

    let name = args
        .consumer
        .clone()
        .or_else(|| config.consumer.consumer_name.clone())
        .unwrap_or_else(|| format!("ferry-{}", Uuid::new_v4()));
    info!(consumer = %name, group = %config.consumer.group, "joining consumer group");

    let source = RedisStreamSource::connect(
        &url,
        config.publisher.queue.clone(),
        config.consumer.group.clone(),
        name,
        config.consumer.block(),
        config.consumer.claim_idle(),
    )
    .await
    .context("failed to subscribe to the notification queue")?;
    let client = TransferClient::new(&config.transfer);

    let stats = NotificationConsumer::new(source, client, destination)
        .run(token)
        .await?;
    info!(
        received = stats.received,
        transferred = stats.transferred,
        failed = stats.failed,
        skipped = stats.skipped,
        malformed = stats.malformed,
        "consume stopped"
    );
    Ok(())
}
