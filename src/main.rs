//! agentmesh CLI - make sure a model is ready before running sessions
//!
//! ```text
//! agentmesh <MODEL> [--base-url URL] [--max-wait SECS] [--validate]
//! ```
//!
//! Exit codes: 0 ready, 1 model unavailable, 2 protocol validation failed,
//! 3 configuration error.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use agentmesh::backend::BackendError;
use agentmesh::tracing::{init_tracing, shutdown_tracing};
use agentmesh::{ModelAvailabilityManager, Settings};

const EXIT_UNAVAILABLE: u8 = 1;
const EXIT_VALIDATION: u8 = 2;
const EXIT_CONFIG: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "agentmesh", version, about = "Ensure an LLM backend model is available")]
struct Cli {
    /// Model to ensure, e.g. qwen2.5:7b
    model: String,

    /// OpenAI-compatible base URL (overrides OLLAMA_BASE_URL)
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Seconds to wait for a pull to finish
    #[arg(long, value_name = "SECS", default_value_t = 600)]
    max_wait: u64,

    /// Also send a minimal chat request and check the reply's shape
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(base_url) = cli.base_url.clone() {
        settings.base_url = base_url;
    }

    if let Err(e) = init_tracing("agentmesh", settings.otlp_endpoint.as_deref()) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    let code = run(&cli, &settings).await;
    shutdown_tracing();
    code
}

async fn run(cli: &Cli, settings: &Settings) -> ExitCode {
    let backend = match settings.backend("local", cli.model.as_str()) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "Invalid backend configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    info!(
        backend = %backend.base_url(),
        model = %backend.model_name(),
        max_wait_secs = cli.max_wait,
        "Ensuring model availability"
    );

    let manager = ModelAvailabilityManager::new();
    let status = match manager
        .ensure_available(&backend, backend.model_name(), Duration::from_secs(cli.max_wait))
        .await
    {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Model unavailable");
            log_checklist(settings, &cli.model);
            return ExitCode::from(EXIT_UNAVAILABLE);
        }
    };

    info!(
        model = %status.model_name,
        present = status.present,
        pull_state = ?status.pull_state,
        checked_at = %status.last_checked_at,
        "Model ready"
    );

    if cli.validate {
        match manager.validate_protocol(&backend).await {
            Ok(()) => info!(model = %backend.model_name(), "Chat completions endpoint answered correctly"),
            Err(e) => {
                error!(error = %e, category = %e.category(), "Protocol validation failed");
                if matches!(e, BackendError::Connectivity { .. } | BackendError::ModelMissing { .. }) {
                    log_checklist(settings, &cli.model);
                }
                return ExitCode::from(EXIT_VALIDATION);
            }
        }
    }

    ExitCode::SUCCESS
}

fn log_checklist(settings: &Settings, model: &str) {
    error!("Troubleshooting:");
    error!("  1. Is the backend running? Try: ollama serve");
    error!("  2. Is {} reachable from this machine?", settings.base_url);
    error!("  3. Is the model pulled? Try: ollama pull {}", model);
    error!("  4. Check OLLAMA_BASE_URL and OLLAMA_API_KEY");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["agentmesh", "qwen2.5:7b", "--max-wait", "30", "--validate"]);
        assert_eq!(cli.model, "qwen2.5:7b");
        assert_eq!(cli.max_wait, 30);
        assert!(cli.validate);
        assert_eq!(cli.base_url, None);

        let cli = Cli::parse_from(["agentmesh", "llama3", "--base-url", "http://gpu:11434/v1"]);
        assert_eq!(cli.max_wait, 600);
        assert_eq!(cli.base_url.as_deref(), Some("http://gpu:11434/v1"));
    }
}
