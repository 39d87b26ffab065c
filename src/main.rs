use std::{path::PathBuf, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
    time::Instant,
};
use url::Url;

use ongaku::{
    bridge::{Bridge, Session},
    config::Config,
    error::Result,
    events,
    fetch::HttpFetcher,
    http::Client as HttpClient,
    output::Output,
    pipeline::Pipeline,
    player::Manager,
    protocol::{self, Command},
    settings::Settings,
    store::{Database, RemoteStore},
    user::Credentials,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// Holds the signed-in user and the database token. Ensure that this
    /// file is kept secure and not shared publicly. Without it, the UI runs
    /// signed out.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Settings file
    ///
    /// Persists UI settings, like repeat and shuffle, between runs.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from(Config::DEFAULT_SETTINGS_FILE))]
    settings_file: String,

    /// Remote database URL
    ///
    /// Root of the database that stores the sources and tracks of the
    /// signed-in user.
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, env = "ONGAKU_DATABASE_URL")]
    database_url: Option<Url>,

    /// Grace period in milliseconds
    ///
    /// How long a track that is no longer active keeps its audio output
    /// before it is released.
    #[arg(long, value_name = "MS", default_value_t = 500)]
    grace_period: u64,

    /// Tag request timeout in milliseconds
    ///
    /// Gives up on a tag request that takes longer. By default, requests
    /// are waited on indefinitely.
    #[arg(long, value_name = "MS")]
    fetch_timeout: Option<u64>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// Logs go to standard error: standard output carries the events for the UI.
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    logger.target(env_logger::Target::Stderr);

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the signed-in user, if any.
///
/// # Errors
///
/// Returns error if the secrets file exists but cannot be read or parsed.
fn load_credentials(secrets_file: &str) -> Result<Option<Credentials>> {
    let credentials = Credentials::from_file(secrets_file)?;
    if credentials.is_none() {
        info!("no secrets in {secrets_file}; read the documentation on how to sign in");
    }

    Ok(credentials)
}

/// Writes every event as one JSON line to standard output.
async fn write_events(mut events: events::Receiver) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Main application loop.
///
/// Reads commands from standard input until it is closed or the process is
/// interrupted, then releases all audio output and waits for pending writes
/// to the database.
///
/// # Errors
///
/// Returns error when bootstrap fails or standard input cannot be read.
async fn run(args: Args) -> Result<()> {
    let mut config = Config::new();
    config.grace_period = Duration::from_millis(args.grace_period);
    config.fetch_timeout = args.fetch_timeout.map(Duration::from_millis);
    config.settings_file = PathBuf::from(&args.settings_file);
    config.database_url = args.database_url;

    let credentials = load_credentials(&args.secrets_file)?;
    let session = match credentials {
        Some(credentials) => {
            let store = match config.database_url.clone() {
                Some(url) => {
                    let database = Database::new(&config, url, credentials.database_token)?;
                    Some(Arc::new(database) as Arc<dyn RemoteStore>)
                }
                None => None,
            };
            Some(Session {
                user: credentials.user,
                store,
            })
        }
        None => None,
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_events(events_rx));

    let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();
    let player = Manager::new(
        Output::new(HttpClient::new(&config)?),
        config.grace_period,
        events_tx.clone(),
        signals_tx,
    );
    let pipeline = Pipeline::new(HttpFetcher::new(HttpClient::new(&config)?))
        .with_timeout(config.fetch_timeout);
    let settings = Settings::open(&config.settings_file)?;

    let mut bridge = Bridge::start(player, pipeline, settings, session, events_tx).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result = loop {
        let next_release = bridge.next_release();

        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down gracefully");
                break Ok(());
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match protocol::json::<Command>(&line, "command") {
                        Ok(command) => {
                            let interrupt = async {
                                let _ = tokio::signal::ctrl_c().await;
                            };
                            if !bridge.handle_or(command, Instant::now(), interrupt).await {
                                info!("shutting down gracefully");
                                break Ok(());
                            }
                        }
                        Err(e) => warn!("ignoring command: {e}"),
                    }
                }
                Ok(None) => {
                    info!("input closed, shutting down");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            },

            Some(signal) = signals_rx.recv() => bridge.relay(signal),

            () = tokio::time::sleep_until(next_release.unwrap_or_else(Instant::now)), if next_release.is_some() => {
                let released = bridge.release_due(Instant::now());
                debug!("released {released} sessions");
            }
        }
    };

    bridge.shutdown().await;
    if let Err(e) = writer.await? {
        error!("failed writing events: {e}");
    }

    result
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
