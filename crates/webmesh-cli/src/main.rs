#![deny(unsafe_code)]

//! webmesh app entry point: privileged helper daemon or headless client.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webmesh_config::ProfileConfig;
use webmesh_core::daemon::DaemonError;
use webmesh_core::ipc::DEFAULT_SOCKET_PATH;
use webmesh_core::mesh::node::DEFAULT_NODE_BINARY;
use webmesh_core::{
    ClientMode, ConnectPreferences, Daemon, DaemonOptions, MeshClient, NodeProcessProvider,
    build_info, controller, preferences,
};

static LONG_VERSION: LazyLock<String> = LazyLock::new(build_info::long_version);

/// Join a webmesh network, or serve as the privileged helper daemon.
#[derive(Parser, Debug)]
#[command(
    name = "webmesh-app",
    version = build_info::VERSION,
    long_version = LONG_VERSION.as_str(),
    about,
    long_about = None
)]
struct Cli {
    /// Run as the privileged helper daemon.
    #[arg(long)]
    daemon: bool,

    /// Leave the daemon socket accessible to every local user.
    #[arg(long, requires = "daemon")]
    insecure: bool,

    /// Profile configuration file. Defaults to ~/.webmesh/config.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Daemon socket path.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Mesh node executable used to run connections.
    #[arg(long, default_value = DEFAULT_NODE_BINARY)]
    node_binary: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to a mesh profile.
    Connect(ConnectArgs),

    /// Disconnect the active connection.
    Disconnect,

    /// Show interface counters of the active connection.
    Metrics,

    /// List the profiles in the configuration file.
    Profiles,
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Profile to connect with. Empty selects the file's current profile.
    #[arg(default_value = "")]
    profile: String,

    /// Connection preferences file.
    #[arg(long)]
    preferences: Option<PathBuf>,

    /// WireGuard interface name.
    #[arg(long)]
    interface_name: Option<String>,

    /// Connect timeout, e.g. "30s" or "1m30s".
    #[arg(long)]
    timeout: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if cli.daemon {
        return cmd_daemon(&cli).await;
    }

    let Some(command) = &cli.command else {
        bail!("no command given; pass --daemon or one of: connect, disconnect, metrics, profiles");
    };
    let config_path = cli.config.clone().unwrap_or_else(preferences::default_config_path);

    match command {
        Commands::Connect(args) => cmd_connect(&cli, &config_path, args).await,
        Commands::Disconnect => cmd_disconnect(&cli).await,
        Commands::Metrics => cmd_metrics(&cli).await,
        Commands::Profiles => cmd_profiles(&config_path).await,
    }
}

async fn cmd_daemon(cli: &Cli) -> Result<()> {
    if cli.command.is_some() {
        bail!("--daemon does not take a command");
    }
    let provider = Arc::new(NodeProcessProvider::new(&cli.node_binary));
    let daemon = Daemon::new(
        DaemonOptions {
            socket_path: cli.socket.clone(),
            insecure: cli.insecure,
            ..Default::default()
        },
        provider,
    );

    match daemon.run().await {
        Ok(()) => Ok(()),
        Err(DaemonError::ShutdownTimeout(grace)) => {
            bail!("daemon did not drain within {grace:?}, exiting")
        }
        Err(e) => Err(e).context("daemon failed"),
    }
}

fn mesh_client(cli: &Cli) -> MeshClient {
    let provider = Arc::new(NodeProcessProvider::new(&cli.node_binary));
    MeshClient::new(provider, &cli.socket)
}

async fn cmd_connect(cli: &Cli, config_path: &Path, args: &ConnectArgs) -> Result<()> {
    let prefs = load_preferences(args.preferences.as_deref()).await?;
    let prefs = ConnectPreferences {
        config_file: config_path.to_path_buf(),
        interface_name: args.interface_name.clone().unwrap_or(prefs.interface_name),
        connect_timeout: args.timeout.clone().unwrap_or(prefs.connect_timeout),
        ..prefs
    };
    prefs.validate().await?;
    let opts = prefs.to_connect_options(&args.profile)?;

    let client = mesh_client(cli);
    client
        .load_config(config_path)
        .await
        .with_context(|| format!("load {}", config_path.display()))?;

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received, cancelling connect");
                cancel.cancel();
            }
        }
    });
    let result = client.connect(&opts, &cancel).await;
    interrupt.abort();
    result?;
    println!("Connected to {}", profile_label(&opts.profile));

    if client.mode() == ClientMode::InProcess {
        // The connection lives only as long as this process.
        info!("running in-process; press Ctrl-C to disconnect");
        tokio::signal::ctrl_c().await?;
        client.shutdown().await;
        println!("Disconnected");
    }
    Ok(())
}

async fn cmd_disconnect(cli: &Cli) -> Result<()> {
    let client = mesh_client(cli);
    match client.disconnect().await {
        Ok(()) => println!("Disconnected"),
        Err(e) if e.is_not_connected() => println!("Not connected"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_metrics(cli: &Cli) -> Result<()> {
    let client = mesh_client(cli);
    match client.interface_metrics().await {
        Ok(metrics) => {
            println!("Interface: {}", metrics.device_name);
            println!(
                "Sent:      {}",
                controller::format_bytes(metrics.total_transmit_bytes)
            );
            println!(
                "Received:  {}",
                controller::format_bytes(metrics.total_receive_bytes)
            );
        }
        Err(e) if e.is_not_connected() => println!("Not connected"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_profiles(config_path: &Path) -> Result<()> {
    let config = ProfileConfig::load(config_path)
        .await
        .with_context(|| format!("load {}", config_path.display()))?;
    for name in config.profile_names() {
        let marker = if name == config.current_context { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

async fn load_preferences(path: Option<&Path>) -> Result<ConnectPreferences> {
    match path {
        Some(path) => ConnectPreferences::load(path)
            .await
            .with_context(|| format!("load preferences {}", path.display())),
        None => Ok(ConnectPreferences::default()),
    }
}

fn profile_label(profile: &str) -> &str {
    if profile.is_empty() { "current profile" } else { profile }
}
