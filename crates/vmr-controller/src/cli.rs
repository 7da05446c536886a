//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use vmr_core::{
    Command, CommandChannel, CredentialStore, Credentials, NotificationSink, OperatorSession,
    SessionError, StateStore,
};
use vmr_crypto::keys::normalize_public_key;
use vmr_crypto::{Identity, SystemClock};
use vmr_transport::RelaySet;

use crate::config::Config;
use crate::credentials::FileCredentialStore;
use crate::output::{ConsoleNotifier, ConsoleState, KeysInfo, OutputFormat, OutputFormatter};
use crate::ExitCode;

/// VMR Controller CLI - remote vending machine control over Nostr relays
#[derive(Parser, Debug)]
#[command(name = "vmr-controller")]
#[command(version, about = "VMR Controller CLI - remote vending machine control")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet (overrides config)
    #[arg(long, global = true)]
    pub output: Option<OutputFormat>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Relay URL (can be specified multiple times, overrides config)
    #[arg(long = "relay-url", global = true)]
    pub relay_urls: Vec<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store operator and device keys
    Login {
        /// Operator private key (nsec1... or 64 hex chars)
        #[arg(long, env = "VMR_OPERATOR_KEY", hide_env_values = true)]
        key: String,
        /// Device public key (npub1... or 64 hex chars)
        #[arg(long)]
        device: String,
    },
    /// Forget stored keys
    Logout,
    /// Key utilities
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Ask the device for its status
    Status,
    /// Add stock for an item, creating it if needed
    AddItem {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        name: String,
        /// Price in minor currency units
        #[arg(long)]
        price: u64,
        #[arg(long)]
        count: u64,
    },
    /// Remove an item
    RemoveItem {
        #[arg(long)]
        id: u64,
    },
    /// Change an item's price
    ChangePrice {
        #[arg(long)]
        id: u64,
        /// New price in minor currency units
        #[arg(long)]
        price: u64,
    },
    /// Reboot the device
    Reboot,
    /// Shut the device down
    Shutdown,
    /// Enter or leave the device's admin state
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// Print inventory snapshots as the device pushes them
    Watch {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysAction {
    /// Generate a new operator key pair
    Generate,
    /// Show the stored operator and device keys
    Show,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    /// Request the admin state
    Enter,
    /// End the admin state
    End,
}

impl Commands {
    /// The device command this subcommand sends, if any.
    pub fn device_command(&self) -> Option<Command> {
        let command = match self {
            Commands::Status => Command::Status,
            Commands::AddItem {
                id,
                name,
                price,
                count,
            } => Command::AddItem {
                id: *id,
                name: name.clone(),
                price: *price,
                count: *count,
            },
            Commands::RemoveItem { id } => Command::RemoveItem(*id),
            Commands::ChangePrice { id, price } => Command::ChangePrice {
                id: *id,
                price: *price,
            },
            Commands::Reboot => Command::Reboot,
            Commands::Shutdown => Command::Shutdown,
            Commands::Admin {
                action: AdminAction::Enter,
            } => Command::RequestAdminState,
            Commands::Admin {
                action: AdminAction::End,
            } => Command::EndAdminState,
            Commands::Login { .. }
            | Commands::Logout
            | Commands::Keys { .. }
            | Commands::Watch { .. } => return None,
        };
        Some(command)
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> anyhow::Result<ExitCode> {
        let config = Config::load_default().unwrap_or_default();
        self.execute_with_config(config).await
    }

    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let format = match self.output {
            Some(format) => format,
            None => config.output.format.parse().unwrap_or_default(),
        };
        let formatter = OutputFormatter::new(format, self.verbose || config.output.verbose);

        let credentials_path = config
            .credentials
            .resolved_path()
            .context("no credentials path available on this platform")?;
        let store = Arc::new(FileCredentialStore::new(credentials_path));

        if let Commands::Keys { action } = self.command {
            return keys(action, store.as_ref(), formatter).await;
        }

        let relays = match RelaySet::from_urls(&config.relays.urls) {
            Ok(relays) => Arc::new(relays),
            Err(e) => {
                report(formatter, &e.to_string(), ExitCode::InvalidInput);
                return Ok(ExitCode::InvalidInput);
            }
        };
        debug!(relays = ?relays.urls(), "relay set configured");

        let watching = matches!(self.command, Commands::Watch { .. });
        let channel = Arc::new(CommandChannel::new(
            Arc::clone(&relays),
            Arc::new(SystemClock),
            config.relays.publish_timeout(),
        ));
        let session = OperatorSession::new(
            channel,
            store as Arc<dyn CredentialStore>,
            Arc::new(ConsoleNotifier::new(formatter)) as Arc<dyn NotificationSink>,
            Arc::new(ConsoleState::new(formatter, watching)) as Arc<dyn StateStore>,
        );

        let result = run(self.command, &session, formatter).await;
        session.stop_watching();
        relays.shutdown().await;
        result
    }
}

async fn run(
    command: Commands,
    session: &OperatorSession,
    formatter: OutputFormatter,
) -> anyhow::Result<ExitCode> {
    if let Some(device_command) = command.device_command() {
        return send(session, &device_command, formatter).await;
    }

    match command {
        Commands::Login { key, device } => {
            let credentials = Credentials {
                private_key: key,
                target_public_key: device,
            };
            Ok(settle(session.login(credentials).await, formatter))
        }
        Commands::Logout => {
            let result = session.logout().await;
            if result.is_ok() {
                formatter.success("Logged out");
            }
            Ok(settle(result, formatter))
        }
        Commands::Watch { seconds } => {
            if let Err(e) = restore(session).await {
                return Ok(settle::<()>(Err(e), formatter));
            }
            if let Err(e) = session.watch() {
                return Ok(settle::<()>(Err(e), formatter));
            }
            formatter.info("Watching for device updates, press Ctrl-C to stop");
            match seconds {
                Some(seconds) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                        signal = tokio::signal::ctrl_c() => signal?,
                    }
                }
                None => tokio::signal::ctrl_c().await?,
            }
            info!("watch finished");
            Ok(ExitCode::Success)
        }
        // Device commands are handled above and keys before a session exists.
        _ => Ok(ExitCode::GeneralError),
    }
}

async fn send(
    session: &OperatorSession,
    command: &Command,
    formatter: OutputFormatter,
) -> anyhow::Result<ExitCode> {
    if let Err(e) = restore(session).await {
        return Ok(settle::<()>(Err(e), formatter));
    }
    match session.send_command(command).await {
        Ok(ack) => {
            if !formatter.is_quiet() {
                println!("{}", formatter.format_ack(&ack, command));
            }
            Ok(ExitCode::Success)
        }
        Err(e) => Ok(settle::<()>(Err(e), formatter)),
    }
}

async fn restore(session: &OperatorSession) -> Result<(), SessionError> {
    if session.restore().await? {
        Ok(())
    } else {
        Err(SessionError::NotLoggedIn)
    }
}

/// Turn a session result into an exit code, reporting errors the session
/// itself did not already show.
fn settle<T>(result: Result<T, SessionError>, formatter: OutputFormatter) -> ExitCode {
    match result {
        Ok(_) => ExitCode::Success,
        Err(e) => {
            let code = ExitCode::for_session_error(&e);
            let already_notified = matches!(
                e,
                SessionError::Send(_) | SessionError::InvalidCredentials(_)
            );
            if formatter.format() == OutputFormat::Json || !already_notified {
                report(formatter, &e.to_string(), code);
            }
            code
        }
    }
}

fn report(formatter: OutputFormatter, message: &str, code: ExitCode) {
    match formatter.format() {
        OutputFormat::Table => formatter.error(message),
        OutputFormat::Json => println!("{}", formatter.format_error_with_code(message, code)),
        OutputFormat::Quiet => {}
    }
}

async fn keys(
    action: KeysAction,
    store: &FileCredentialStore,
    formatter: OutputFormatter,
) -> anyhow::Result<ExitCode> {
    match action {
        KeysAction::Generate => {
            let identity = Identity::generate()?;
            let info = KeysInfo {
                operator_npub: identity.public_key().to_bech32()?,
                operator_hex: identity.public_key().to_hex(),
                operator_nsec: Some(identity.secret_key().to_bech32()?),
                device_npub: None,
            };
            println!("{}", formatter.format_keys(&info, "keys generate"));
            Ok(ExitCode::Success)
        }
        KeysAction::Show => {
            let Some(credentials) = store.load().await? else {
                report(formatter, "not logged in", ExitCode::NotLoggedIn);
                return Ok(ExitCode::NotLoggedIn);
            };
            let identity = match Identity::from_text(&credentials.private_key) {
                Ok(identity) => identity,
                Err(e) => {
                    report(
                        formatter,
                        &format!("stored private key is invalid: {e}"),
                        ExitCode::InvalidInput,
                    );
                    return Ok(ExitCode::InvalidInput);
                }
            };
            let device_npub = normalize_public_key(&credentials.target_public_key)
                .and_then(|device| device.to_bech32())
                .ok();
            let info = KeysInfo {
                operator_npub: identity.public_key().to_bech32()?,
                operator_hex: identity.public_key().to_hex(),
                operator_nsec: None,
                device_npub,
            };
            println!("{}", formatter.format_keys(&info, "keys show"));
            Ok(ExitCode::Success)
        }
    }
}
