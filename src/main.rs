//! withings -- command line helper for the Withings OAuth flow.
//!
//! Prints the consent URL, exchanges an authorization code and refreshes
//! a credential, using the settings from the configuration file and
//! `WITHINGS_*` environment variables. Credentials are printed as JSON.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use withings::config::Config;
use withings::oauth::AuthUrlParam;
use withings::{CallContext, Credential};

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Command {
    AuthUrl { demo: bool, state: String },
    Exchange { code: String },
    Refresh { refresh_token: String },
    Help,
    Version,
}

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    config_path: PathBuf,
    command: Command,
}

fn parse_args<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config_path = PathBuf::from("withings.toml");
    let mut command = None;
    let mut demo = false;
    let mut state = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config requires a path argument")?;
                config_path = PathBuf::from(path);
            }
            "--demo" => demo = true,
            "--state" => {
                state = Some(args.next().ok_or("--state requires a value")?);
            }
            "--help" | "-h" => return Ok(CliArgs { config_path, command: Command::Help }),
            "--version" | "-V" => return Ok(CliArgs { config_path, command: Command::Version }),
            "auth-url" | "exchange" | "refresh" if command.is_none() => {
                command = Some(arg.clone());
            }
            other if other.starts_with('-') => return Err(format!("Unknown argument: {other}")),
            other => match command.as_deref() {
                Some("exchange") => {
                    return finish(args, config_path, Command::Exchange { code: other.to_string() });
                }
                Some("refresh") => {
                    return finish(
                        args,
                        config_path,
                        Command::Refresh { refresh_token: other.to_string() },
                    );
                }
                _ => return Err(format!("Unexpected argument: {other}")),
            },
        }
    }

    match command.as_deref() {
        Some("auth-url") => Ok(CliArgs {
            config_path,
            command: Command::AuthUrl {
                demo,
                state: state.unwrap_or_else(default_state),
            },
        }),
        Some("exchange") => Err("exchange requires an authorization code".into()),
        Some("refresh") => Err("refresh requires a refresh token".into()),
        _ => Err("missing command".into()),
    }
}

/// Accept trailing `--config` after a positional argument.
fn finish<I>(mut args: I, mut config_path: PathBuf, command: Command) -> Result<CliArgs, String>
where
    I: Iterator<Item = String>,
{
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config requires a path argument")?;
                config_path = PathBuf::from(path);
            }
            other => return Err(format!("Unexpected argument: {other}")),
        }
    }
    Ok(CliArgs { config_path, command })
}

fn default_state() -> String {
    format!("withings-{}", chrono::Utc::now().timestamp_millis())
}

fn print_usage() {
    println!(
        "\
withings {version} -- Withings OAuth helper

USAGE:
    withings [OPTIONS] auth-url [--demo] [--state <STATE>]
    withings [OPTIONS] exchange <CODE>
    withings [OPTIONS] refresh <REFRESH_TOKEN>

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: withings.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    WITHINGS_CONFIG        Alternative to --config flag
    WITHINGS_CLIENT_ID     OAuth client id
    WITHINGS_CLIENT_SECRET OAuth client secret
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run with --help for usage information.");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Help => {
            print_usage();
            return Ok(());
        }
        Command::Version => {
            println!("withings {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let config_path = std::env::var("WITHINGS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);
    let config = Config::load(&config_path)?;
    init_tracing(&config);

    let oauth = config.oauth_config()?;
    tracing::debug!(config = %config_path.display(), region = %config.oauth.region, "Loaded configuration");

    let ctx = CallContext::new();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT (Ctrl+C)");
            cancel.cancel();
        }
    });

    match cli.command {
        Command::AuthUrl { demo, state } => {
            let params = if demo { vec![AuthUrlParam::mode_demo()] } else { Vec::new() };
            println!("{}", oauth.auth_code_url(&state, &params)?);
        }
        Command::Exchange { code } => {
            let credential = oauth.exchange(&ctx, &code).await?;
            print_credential(&credential)?;
        }
        Command::Refresh { refresh_token } => {
            let stale = Credential::new("").with_refresh_token(refresh_token);
            let credential = oauth.refresh(&ctx, &stale).await?;
            print_credential(&credential)?;
        }
        Command::Help | Command::Version => {}
    }
    Ok(())
}

fn print_credential(credential: &Credential) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(credential)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
///
/// Logs go to stderr so stdout stays machine readable.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("withings={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
