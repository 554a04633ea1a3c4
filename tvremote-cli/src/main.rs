//! tvremote: command-line remote for smart TVs.
//!
//! ```text
//! tvremote discover [--target ID]     List TVs on the network
//! tvremote pair                       Pair and store the issued token
//! tvremote key home down enter        Send keys
//! tvremote text "search terms"        Type into the focused field
//! tvremote wake [MAC]                 Wake-on-LAN
//! tvremote --gen-config               Dump default config and exit
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tvremote_cli::config::RemoteConfig;
use tvremote_cli::session::{self, ForwardingObserver, SearchUpdate};
use tvremote_core::{
    AppClient, ConnectionManager, DeviceInfoFetcher, DiscoveryEngine, KeyAction, RemoteCommand,
    RemoteError, RemoteKey, WakeOnLan,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tvremote", about = "Discover, pair with and control smart TVs")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tvremote.toml")]
    config: PathBuf,

    /// TV address (overrides config). Example: 192.168.1.40
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the local network.
    Discover {
        /// Stop at the device with this id.
        #[arg(long)]
        target: Option<String>,
        /// Give up after this many seconds (0 = until Ctrl-C).
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Open a session so the TV shows its pairing prompt; save the token.
    Pair,
    /// Send keys by code (KEY_HOME) or short name (home).
    Key {
        #[arg(required = true)]
        keys: Vec<String>,
        /// Hold the key instead of clicking it.
        #[arg(long, conflicts_with = "release")]
        press: bool,
        /// Release a held key.
        #[arg(long)]
        release: bool,
    },
    /// Type text into the focused input field.
    Text { text: String },
    /// Send a Wake-on-LAN packet.
    Wake {
        /// Defaults to `[device].mac`.
        mac: Option<String>,
    },
    /// Show the device's identity and hardware details.
    Info,
    /// Query, launch or close an installed app.
    App {
        #[command(subcommand)]
        action: AppAction,
    },
}

#[derive(Subcommand, Debug)]
enum AppAction {
    Status { app_id: String },
    Launch { app_id: String },
    Close { app_id: String },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&RemoteConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = RemoteConfig::load(&cli.config);
    if let Some(addr) = cli.address {
        config.device.address = addr;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tvremote v{}", env!("CARGO_PKG_VERSION"));

    let Some(command) = cli.command else {
        warn!("no command given; see --help");
        return Ok(());
    };

    match command {
        Command::Discover { target, timeout } => discover(&config, target, timeout).await?,
        Command::Pair => {
            let token = remote(&config, &cli.config, Vec::new()).await?;
            match token {
                Some(token) => println!("paired; token {token} saved to {}", cli.config.display()),
                None => println!("paired"),
            }
        }
        Command::Key { keys, press, release } => {
            let action = if press {
                KeyAction::Press
            } else if release {
                KeyAction::Release
            } else {
                KeyAction::Click
            };
            let commands = keys
                .iter()
                .map(|k| {
                    k.parse::<RemoteKey>()
                        .map(|key| RemoteCommand::Key { key, action })
                })
                .collect::<Result<Vec<_>, _>>()?;
            remote(&config, &cli.config, commands).await?;
        }
        Command::Text { text } => {
            remote(&config, &cli.config, vec![RemoteCommand::text(text)]).await?;
        }
        Command::Wake { mac } => {
            let mac = match mac {
                Some(mac) => mac.parse()?,
                None => config.mac().ok_or_else(|| {
                    RemoteError::InvalidConfiguration("no MAC address; set [device].mac".into())
                })??,
            };
            WakeOnLan::default().send(&mac).await?;
            println!("magic packet sent to {mac}");
        }
        Command::Info => {
            let device = DeviceInfoFetcher::new()?.fetch(&config.device()?).await?;
            println!("{device}");
            if let Some(meta) = device.metadata {
                let fields = [
                    ("model", meta.model_name),
                    ("mac", meta.mac_address),
                    ("os", meta.os),
                    ("firmware", meta.firmware_version),
                    ("resolution", meta.resolution),
                    ("power", meta.power_state),
                ];
                for (label, value) in fields {
                    if let Some(value) = value {
                        println!("  {label:<10} {value}");
                    }
                }
            }
        }
        Command::App { action } => {
            let apps = AppClient::new()?;
            let device = config.device()?;
            match action {
                AppAction::Status { app_id } => {
                    println!("{app_id}: {}", apps.status(&device, &app_id).await?);
                }
                AppAction::Launch { app_id } => apps.launch(&device, &app_id).await?,
                AppAction::Close { app_id } => apps.close(&device, &app_id).await?,
            }
        }
    }

    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────

async fn discover(
    config: &RemoteConfig,
    target: Option<String>,
    timeout: Option<u64>,
) -> Result<(), RemoteError> {
    let mut discovery = config.discovery_config();
    match timeout {
        Some(0) => discovery.timeout = None,
        Some(secs) => discovery.timeout = Some(Duration::from_secs(secs)),
        None => {}
    }

    let engine = DiscoveryEngine::new(discovery);
    let (observer, mut updates) = ForwardingObserver::new();
    engine.add_observer(Arc::new(observer));
    engine.start_search(target)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                engine.stop_search();
                return Ok(());
            }
            update = updates.recv() => match update {
                Some(SearchUpdate::Found(device)) => println!("{device}"),
                Some(SearchUpdate::Finished) | None => return Ok(()),
                Some(SearchUpdate::Failed(err)) => return Err(err),
            },
        }
    }
}

/// Connect, wait for authorization, send `commands`, disconnect. Returns
/// the token if the TV issued a new one.
async fn remote(
    config: &RemoteConfig,
    config_path: &Path,
    commands: Vec<RemoteCommand>,
) -> Result<Option<String>, RemoteError> {
    let session_config = config.session_config()?;
    let known = session_config.token.clone();
    let (manager, mut events) = ConnectionManager::new(session_config)?;
    manager.connect()?;

    let mut issued = None;
    let work = async {
        session::wait_ready(&mut events, |token| {
            if known.as_ref() != Some(token) {
                if let Err(e) = RemoteConfig::save_token(config_path, token) {
                    warn!("could not save token to {}: {e}", config_path.display());
                }
                issued = Some(token.to_string());
            }
        })
        .await?;
        session::send_all(&manager, &mut events, commands).await
    };

    let result = tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    session::close(&manager, &mut events).await?;
    result.map(|()| issued)
}
