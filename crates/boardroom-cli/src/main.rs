use anyhow::{Context, Result};
use boardroom_core::{
    AdapterMode, Boardroom, BoardroomEvent, ConcurrencyPolicy, GatewayClient, Round, Source, Step,
    StreamChunk, TurnLog,
};
use boardroom_gateway::GatewayServer;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::BoardroomConfig;

#[derive(Parser)]
#[command(name = "boardroom")]
#[command(version)]
#[command(about = "AI Boardroom: three models answer, then refine each other's answers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Address to listen on, overrides [server] in the config
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Run one boardroom discussion and print it
    Ask {
        /// The question for the board
        prompt: String,

        /// Call a running gateway instead of the vendors directly
        #[arg(long)]
        remote: bool,

        /// Adapter mode: stream, single or mock
        #[arg(long)]
        mode: Option<AdapterMode>,

        /// Run round 1 one provider at a time
        #[arg(long)]
        sequential: bool,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Serve { bind } => cmd_serve(&cli.config, bind).await,
        Commands::Ask {
            prompt,
            remote,
            mode,
            sequential,
        } => cmd_ask(&cli.config, &prompt, remote, mode, sequential).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        info!("Created default config at {}", config_path.display());
    }

    println!("Boardroom initialized at {}", config_dir.display());
    println!(
        "Set OPENAI_API_KEY, ANTHROPIC_API_KEY and GEMINI_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = BoardroomConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

async fn cmd_serve(config_path: &Option<PathBuf>, bind: Option<SocketAddr>) -> Result<()> {
    let cfg = BoardroomConfig::load(config_path)?;
    let bind = match bind {
        Some(addr) => addr,
        None => cfg.server.socket_addr()?,
    };

    let boardroom = Boardroom::new(cfg.local_providers(), cfg.boardroom.concurrency);
    info!(
        "Starting boardroom gateway: mode={}, concurrency={}",
        cfg.boardroom.mode, cfg.boardroom.concurrency
    );

    let cancel = CancellationToken::new();
    let mut server = GatewayServer::new(bind, boardroom).spawn(cancel.clone());

    tokio::select! {
        result = &mut server => return result.context("Gateway task failed")?,
        result = signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    server.await.context("Gateway task failed")??;
    println!("Boardroom gateway stopped.");
    Ok(())
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    prompt: &str,
    remote: bool,
    mode: Option<AdapterMode>,
    sequential: bool,
) -> Result<()> {
    let mut cfg = BoardroomConfig::load(config_path)?;
    if let Some(mode) = mode {
        cfg.boardroom.mode = mode;
    }
    if sequential {
        cfg.boardroom.concurrency = ConcurrencyPolicy::Sequential;
    }

    let providers = if remote {
        let client = GatewayClient::new(cfg.client.api_base.clone(), cfg.boardroom.adapter_options().timeout);
        let health = client.health().await?;
        debug!("Gateway health: {}", health);
        cfg.remote_providers()
    } else {
        cfg.local_providers()
    };
    let boardroom = Boardroom::new(providers, cfg.boardroom.concurrency);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(
        prompt.to_string(),
        boardroom.policy(),
        rx,
        std::io::stdout(),
    ));

    let result = boardroom.run(prompt, &cancel, &tx).await;
    drop(tx);
    ctrl_c.abort();
    let mut log = printer.await.context("Printer task failed")?;

    match result {
        Ok(transcript) => {
            let fallbacks = transcript.fallback_count();
            if fallbacks > 0 {
                println!(
                    "\n({} of {} answers used simulated fallback text)",
                    fallbacks,
                    transcript.results.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            let pending: Vec<String> = log.pending().map(|t| t.id.clone()).collect();
            for id in pending {
                if let Err(err) = log.close_with_error(&id, &e.to_string()) {
                    debug!("Could not close turn {}: {}", id, err);
                }
            }
            Err(e.into())
        }
    }
}

/// Print events as they arrive and mirror them into a [`TurnLog`].
///
/// Parallel round-1 steps are printed whole on completion; every other step
/// is streamed. Printing stops at the first write error, the log keeps
/// filling until the channel closes.
async fn print_events<W: Write>(
    prompt: String,
    policy: ConcurrencyPolicy,
    mut rx: mpsc::UnboundedReceiver<BoardroomEvent>,
    out: W,
) -> TurnLog {
    let mut log = TurnLog::new();
    log.push_user(prompt);
    let mut turns: [Option<String>; 6] = Default::default();
    let mut printed: [usize; 6] = [0; 6];

    let streamed = |step: &Step| policy == ConcurrencyPolicy::Sequential || step.round == Round::Refinement;
    let mut console = Console::new(out);

    while let Some(event) = rx.recv().await {
        match event {
            BoardroomEvent::StepStarted { step } => {
                turns[step.index()] = Some(log.open_assistant(step.provider, step.round));
                if streamed(&step) {
                    console.print(format_args!("{}", heading(&step)));
                }
            }
            BoardroomEvent::Increment { step, increment } => {
                if let Some(id) = &turns[step.index()] {
                    let chunk = if increment.is_final {
                        StreamChunk::terminal(increment.content.clone(), increment.source)
                    } else {
                        StreamChunk::partial(increment.content.clone(), increment.source)
                    };
                    if let Err(e) = log.apply(id, &chunk) {
                        warn!("Dropped increment for {}: {}", step, e);
                        continue;
                    }
                }
                if streamed(&step) && !increment.is_final {
                    let seen = printed[step.index()];
                    if let Some(delta) = increment.content.get(seen..) {
                        console.print(format_args!("{}", delta));
                    }
                    printed[step.index()] = increment.content.len();
                }
            }
            BoardroomEvent::StepCompleted { step, generation } => {
                if streamed(&step) {
                    let rest = generation.text.get(printed[step.index()]..).unwrap_or("");
                    console.print(format_args!("{}", rest));
                } else {
                    console.print(format_args!("{}{}", heading(&step), generation.text));
                }
                if generation.source == Source::Fallback {
                    console.print(format_args!("\n[fallback]"));
                }
                console.print(format_args!("\n"));
            }
            BoardroomEvent::Complete { transcript } => {
                debug!(
                    "Boardroom finished in {} ms",
                    (transcript.finished_at - transcript.started_at).num_milliseconds()
                );
            }
        }
    }

    log
}

/// Output that goes quiet after its first failed write
struct Console<W> {
    out: Option<W>,
}

impl<W: Write> Console<W> {
    fn new(out: W) -> Self {
        Self { out: Some(out) }
    }

    fn print(&mut self, args: std::fmt::Arguments<'_>) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        if let Err(e) = out.write_fmt(args).and_then(|()| out.flush()) {
            debug!("Stopped printing: {}", e);
            self.out = None;
        }
    }
}

fn heading(step: &Step) -> String {
    format!(
        "\n── {} · Round {} ──\n",
        step.provider.display_name(),
        step.round.number()
    )
}
