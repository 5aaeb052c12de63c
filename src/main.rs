use anyhow::{Context, Result};
use background_service::{
    IndexLookup, PollingLoop, ReferenceSidecar, Services, SidecarOptions, SidecarState,
};
use clap::{Parser, Subcommand};
use forum_client::{CommentSink, DryRunSink, ForumApiClient, LengthRetrySink};
use knowledge_index::server::{self, ServerState};
use knowledge_index::{KnowledgeIndex, ReferenceService};
use llm_interface::{AnthropicClient, OrchestratorSettings, ReferenceLookup, ReplyOrchestrator};
use responder_core::AppConfig;
use state_store::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "forum_responder=info,background_service=info,forum_client=info,\
llm_interface=info,knowledge_index=info,state_store=info,responder_core=info";

#[derive(Parser)]
#[command(name = "forum-responder")]
#[command(about = "Answers new forum posts and their follow-up comments", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./responder.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the board and answer new posts
    Run {
        /// Generate replies but never post them
        #[arg(long)]
        dry_run: bool,

        /// Move the scan cursor before the first cycle
        #[arg(long)]
        start_id: Option<u64>,
    },

    /// Answer specific posts even if they were processed before
    Reprocess {
        #[arg(required = true)]
        ids: Vec<u64>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Serve the reference folder over MCP JSON-RPC
    ServeKnowledge {
        #[arg(long)]
        root: Option<PathBuf>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        server_name: Option<String>,

        #[arg(long)]
        instruction_file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        start_id: None,
    }) {
        Commands::Run { dry_run, start_id } => {
            let mut responder = Responder::assemble(config, dry_run).await?;
            let start_id = start_id.or(if responder.fresh {
                responder.seed_start_id
            } else {
                None
            });
            if let Some(id) = start_id {
                responder.polling.apply_start_id(id, responder.fresh).await;
            }
            responder.polling.run(&cancel).await;
            responder.shutdown().await;
        }
        Commands::Reprocess { ids, dry_run } => {
            let mut responder = Responder::assemble(config, dry_run).await?;
            let handled = responder.polling.reprocess(&ids, &cancel).await;
            for (id, outcome) in handled {
                info!("#{}: {:?}", id, outcome);
            }
            responder.shutdown().await;
        }
        Commands::ServeKnowledge {
            root,
            host,
            port,
            path,
            server_name,
            instruction_file,
        } => {
            let root = root.unwrap_or_else(|| config.knowledge.path.clone());
            let host = host.unwrap_or_else(|| config.sidecar.host.clone());
            let port = port.unwrap_or(config.sidecar.port);
            let path = path.unwrap_or_else(|| config.sidecar.path.clone());
            let server_name = server_name.unwrap_or_else(|| config.llm.mcp.server_name.clone());
            let instruction_file =
                instruction_file.unwrap_or_else(|| config.knowledge.instruction_file.clone());

            let addr = tokio::net::lookup_host((host.as_str(), port))
                .await
                .with_context(|| format!("cannot resolve {host}:{port}"))?
                .next()
                .with_context(|| format!("no address for {host}:{port}"))?;

            let service = ReferenceService::new(root, &instruction_file);
            info!("Serving references from {}", service.root().display());
            server::serve(ServerState::new(service, server_name), addr, &path, cancel)
                .await
                .context("reference server failed")?;
        }
    }

    Ok(())
}

/// Everything a `run` or `reprocess` invocation needs.
struct Responder {
    polling: PollingLoop,
    sidecar: Option<ReferenceSidecar>,
    fresh: bool,
    seed_start_id: Option<u64>,
}

impl Responder {
    async fn assemble(mut config: AppConfig, dry_run: bool) -> Result<Self> {
        config
            .validate(dry_run)
            .context("invalid configuration")?;
        info!("Mode: {}", if dry_run { "DRY-RUN" } else { "LIVE" });

        let forum = Arc::new(ForumApiClient::new(&config.forum)?);
        if let Some(id) = config.forum.connection_test_id {
            forum
                .test_connection(id)
                .await
                .context("forum connection test failed; refresh the session cookie")?;
        }

        let mut index = KnowledgeIndex::new(&config.knowledge.path, config.knowledge.instruction_file.clone());
        match index.load() {
            Ok(summary) => info!(
                "Reference index: {} files, {} chunks",
                summary.files, summary.chunks
            ),
            Err(e) => warn!("Reference index unavailable: {}", e),
        }

        let sidecar = start_sidecar(&mut config).await;

        let system_prompt = system_prompt(&config, index.instruction());
        let settings =
            OrchestratorSettings::from_config(&config.llm, &system_prompt, &config.mcp_server_url());
        let api = Arc::new(AnthropicClient::new(&config.llm)?);
        let lookup: Arc<dyn ReferenceLookup> =
            Arc::new(IndexLookup::new(index, config.knowledge.top_k));
        let orchestrator = ReplyOrchestrator::new(api, Some(lookup), settings);

        let sink: Arc<dyn CommentSink> = if dry_run {
            Arc::new(DryRunSink)
        } else {
            Arc::new(LengthRetrySink::new(forum.clone()))
        };
        let services = Services {
            source: forum,
            sink,
            drafter: Arc::new(orchestrator),
        };

        let store = StateStore::new(&config.polling.state_file);
        let loaded = store.load().await;
        let polling = PollingLoop::new(services, store, loaded.state, &config, dry_run);

        Ok(Self {
            polling,
            sidecar,
            fresh: loaded.fresh,
            seed_start_id: config.forum.start_id,
        })
    }

    async fn shutdown(mut self) {
        if let Some(sidecar) = self.sidecar.as_mut() {
            sidecar.stop().await;
        }
        info!("Shut down cleanly");
    }
}

/// Launches the local reference server when MCP is on and no remote URL is
/// configured. Disables MCP if the server cannot be reached.
async fn start_sidecar(config: &mut AppConfig) -> Option<ReferenceSidecar> {
    if !config.llm.mcp.enabled
        || !config.sidecar.auto_start
        || !config.llm.mcp.server_url.trim().is_empty()
    {
        return None;
    }

    let program = match std::env::current_exe() {
        Ok(program) => program,
        Err(e) => {
            warn!("Cannot locate own executable for the reference server: {}", e);
            config.llm.mcp.enabled = false;
            return None;
        }
    };
    let mut sidecar = ReferenceSidecar::new(SidecarOptions::serve_knowledge(program, config));
    if !sidecar.start().await {
        warn!("Local reference server unavailable; continuing without MCP");
        config.llm.mcp.enabled = false;
    } else if sidecar.state() == SidecarState::External {
        info!("Using reference server at {}", config.sidecar.url());
    }
    Some(sidecar)
}

/// Index instruction first, then the configured prompt file. Empty means the
/// built-in default.
fn system_prompt(config: &AppConfig, instruction: &str) -> String {
    if !instruction.trim().is_empty() {
        info!("Using reference instruction as system prompt");
        return instruction.to_string();
    }
    if let Some(path) = &config.llm.system_prompt_file {
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => warn!("System prompt file {} is empty", path.display()),
            Err(e) => error!("Cannot read system prompt file {}: {}", path.display(), e),
        }
    }
    String::new()
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown requested");
    cancel.cancel();
}
