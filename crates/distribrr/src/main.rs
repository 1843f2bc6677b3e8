use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use libdistribrr::agent::{self, config::AgentConfig};
use libdistribrr::server::{self, config::ServerConfig};
use libdistribrr::tracing_config::{InitLoggingOptions, init_logging};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "distribrr", version, author, about)]
struct Opts {
    /// Write log output as JSON.
    #[arg(long = "log-json", env = "DISTRIBRR_LOG_JSON")]
    log_json: bool,

    /// A log file to also write to in addition to the console.
    #[arg(long = "log-file", env = "DISTRIBRR_LOG_FILE")]
    log_file: Option<String>,

    #[command(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Coordinator subcommands.
    Server(ServerOpts),
    /// Agent subcommands.
    Agent(AgentOpts),
    /// Print version info.
    Version(VersionOpts),
}

#[derive(Parser)]
struct ServerOpts {
    #[clap(subcommand)]
    subcommand: ServerSubcommand,
}

#[derive(Parser)]
enum ServerSubcommand {
    /// Run the coordinator.
    Run(RunOptions),
}

#[derive(Parser)]
struct AgentOpts {
    #[clap(subcommand)]
    subcommand: AgentSubcommand,
}

#[derive(Parser)]
enum AgentSubcommand {
    /// Run the agent.
    Run(RunOptions),
}

#[derive(Parser)]
struct RunOptions {
    /// Path to config file.
    #[arg(long = "config-file")]
    config_file: Option<PathBuf>,

    /// HTTP host to listen on.
    #[arg(long = "http-host")]
    http_host: Option<String>,

    /// HTTP port to listen on.
    #[arg(long = "http-port")]
    http_port: Option<u16>,

    /// API token.
    #[arg(long = "http-api-token")]
    http_api_token: Option<String>,
}

#[derive(Parser)]
struct VersionOpts {
    /// Print as [text, json].
    #[arg(long, default_value = "text")]
    output: String,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    if let SubCommand::Version(version_opts) = &opts.subcommand {
        print_version(&version_opts.output);
        return Ok(());
    }

    let default_log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_logging(InitLoggingOptions {
        default_rust_log_value: Some(&default_log_level),
        log_file: opts.log_file.as_deref(),
        log_json: opts.log_json,
    })?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .enable_io()
        .build()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        use signal_hook::{consts::SIGINT, consts::SIGTERM, iterator::Signals};
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        thread::spawn(move || {
            let mut cancel_triggered = false;
            while let Some(sig) = signals.forever().next() {
                if cancel_triggered {
                    warn!("received signal {:?}, forcing shutdown", sig);
                    std::process::exit(1)
                }
                warn!("received signal {:?}, shutting down", sig);
                cancel.cancel();
                cancel_triggered = true;
            }
        });
    }

    let result = rt.block_on(async_main(opts, cancel));
    if let Err(e) = result.as_ref() {
        error!("error running distribrr: {e:?}");
    }
    rt.shutdown_timeout(Duration::from_secs(1));
    match result {
        Ok(_) => std::process::exit(0),
        Err(_) => std::process::exit(1),
    }
}

async fn async_main(opts: Opts, cancel: CancellationToken) -> anyhow::Result<()> {
    match opts.subcommand {
        SubCommand::Server(server_opts) => match server_opts.subcommand {
            ServerSubcommand::Run(run_opts) => {
                let mut cfg = match &run_opts.config_file {
                    Some(path) => ServerConfig::load_from_file(path)
                        .with_context(|| format!("could not load config from {path:?}"))?,
                    None => ServerConfig::default(),
                };
                if let Some(host) = run_opts.http_host {
                    cfg.http.host = host;
                }
                if let Some(port) = run_opts.http_port {
                    cfg.http.port = port;
                }
                if let Some(token) = run_opts.http_api_token {
                    cfg.http.token = token;
                }
                server::run(cfg, run_opts.config_file, cancel).await
            }
        },
        SubCommand::Agent(agent_opts) => match agent_opts.subcommand {
            AgentSubcommand::Run(run_opts) => {
                let mut cfg = match &run_opts.config_file {
                    Some(path) => AgentConfig::load_from_file(path)
                        .with_context(|| format!("could not load config from {path:?}"))?,
                    None => AgentConfig::default(),
                };
                if let Some(host) = run_opts.http_host {
                    cfg.http.host = host;
                }
                if let Some(port) = run_opts.http_port {
                    cfg.http.port = port;
                }
                if let Some(token) = run_opts.http_api_token {
                    cfg.http.token = token;
                }
                agent::run(cfg, cancel).await
            }
        },
        SubCommand::Version(_) => unreachable!(),
    }
}

fn print_version(output: &str) {
    match output {
        "json" => println!(
            "{}",
            serde_json::json!({
                "name": "distribrr",
                "version": libdistribrr::version(),
            })
        ),
        _ => println!("distribrr {}", libdistribrr::version()),
    }
}
