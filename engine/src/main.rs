use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use govrail_executor::{ExecutorRegistry, Orchestrator};
use govrail_executor::preflight::PreflightConfig;
use govrail_rbac::{Role, User};
use govrail_runtime::GovrailRuntime;
use govrail_server::{serve, AppState};
use govrail_types::{ActivationGateConfig, AttemptId, Manifest, RuntimeConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "govrail-engine")]
#[command(about = "Governed execution runtime for multi-agent AI missions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Starts the HTTP surface hosting the SSE fabric and the JSON API over C1-C9.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 3900)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Submits a new mission and prints its allocated id.
    SubmitMission {
        title: String,
        goal: String,
    },
    /// Reconstructs and prints the trace chain for an attempt id.
    GetTrace {
        attempt_id: String,
    },
    /// Loads a manifest from a JSON file and registers it.
    CreateManifest {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value_t = true)]
        validate_chain: bool,
    },
    /// Activates a previously-created manifest version.
    ActivateManifest {
        version: u64,
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Evaluates an RBAC decision for a role against required permissions.
    Authorize {
        user_id: String,
        #[arg(long, value_parser = parse_role)]
        role: Role,
        #[arg(long = "require", value_delimiter = ',')]
        required: Vec<String>,
        #[arg(long, default_value_t = false)]
        require_all: bool,
    },
}

fn parse_role(raw: &str) -> Result<Role, String> {
    match raw {
        "viewer" => Ok(Role::Viewer),
        "operator" => Ok(Role::Operator),
        "admin" => Ok(Role::Admin),
        other => Err(format!("unknown role '{other}', expected viewer|operator|admin")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { hostname, port, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let runtime = build_runtime(&state_dir);
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            info!(%addr, state_dir = %state_dir.display(), "starting govrail-engine");
            serve(addr, AppState::new(runtime)).await?;
        }
        Command::SubmitMission { title, goal } => {
            let runtime = build_runtime(&resolve_state_dir(None));
            let mission = runtime.submit_mission(&title, &goal, HashMap::new()).await;
            println!("{}", serde_json::to_string_pretty(&mission)?);
        }
        Command::GetTrace { attempt_id } => {
            let runtime = build_runtime(&resolve_state_dir(None));
            let chain = runtime.get_trace(&AttemptId::from(attempt_id)).await?;
            println!("{}", serde_json::to_string_pretty(&chain)?);
        }
        Command::CreateManifest { file, validate_chain } => {
            let runtime = build_runtime(&resolve_state_dir(None));
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading manifest file {}", file.display()))?;
            let manifest: Manifest = serde_json::from_str(&raw)
                .with_context(|| format!("parsing manifest file {}", file.display()))?;
            let created = runtime.create_manifest(manifest, validate_chain).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Command::ActivateManifest { version, force } => {
            let runtime = build_runtime(&resolve_state_dir(None));
            let activated = runtime
                .activate_manifest(version, &ActivationGateConfig::default(), force)
                .await?;
            println!("{}", serde_json::to_string_pretty(&activated)?);
        }
        Command::Authorize { user_id, role, required, require_all } => {
            let runtime = build_runtime(&resolve_state_dir(None));
            let user = User::new(user_id, role);
            let decision = runtime.authorize(&user, &required, require_all);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("GOVRAIL_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".govrail")
}

fn build_runtime(state_dir: &PathBuf) -> GovrailRuntime {
    let config = RuntimeConfig::from_env();
    let preflight_config = PreflightConfig {
        state_dir: state_dir.join("preflight"),
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(ExecutorRegistry::new(), preflight_config);
    GovrailRuntime::new(config, orchestrator)
}
