use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use guideline_check::config::ValidatorConfig;
use guideline_check::models::{ValidationRequest, ValidationResponse};
use guideline_check::pipeline::rag::retrieval::GuidelineRetriever;
use guideline_check::pipeline::reasoning::gateway;
use guideline_check::pipeline::storage::embedder::HashingEmbedder;
use guideline_check::pipeline::storage::index::GuidelineIndex;
use guideline_check::pipeline::validator::{GuidelineValidator, ValidatorSettings};

/// Exit status when validation ran but was rejected.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser)]
#[command(name = "guideline-check", version)]
#[command(about = "Check active clinical orders against indexed guidelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one request and print the report (or the rejection) as JSON
    Validate {
        /// Path to a validation request JSON file
        #[arg(long)]
        request: PathBuf,
        /// Guidelines directory to index before validating
        #[arg(long, env = "GUIDELINES_DIR")]
        guidelines: Option<PathBuf>,
        /// Specialty filter, overriding the request's
        #[arg(long)]
        specialty: Option<String>,
    },
    /// Index a guidelines directory and print statistics
    IndexStats {
        /// Guidelines directory
        #[arg(long, env = "GUIDELINES_DIR")]
        guidelines: PathBuf,
    },
}

fn main() -> ExitCode {
    guideline_check::init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate {
            request,
            guidelines,
            specialty,
        } => validate(&request, guidelines, specialty),
        Commands::IndexStats { guidelines } => index_stats(&guidelines),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn new_index() -> Arc<GuidelineIndex> {
    Arc::new(GuidelineIndex::new(Arc::new(HashingEmbedder::new())))
}

fn index_stats(dir: &Path) -> Result<ExitCode, Box<dyn Error>> {
    let index = new_index();
    let report = index.rebuild_from_dir(dir)?;
    let output = json!({
        "statistics": index.statistics()?,
        "indexed": report.indexed,
        "failures": report.failures,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}

fn validate(
    request_path: &Path,
    guidelines: Option<PathBuf>,
    specialty: Option<String>,
) -> Result<ExitCode, Box<dyn Error>> {
    let config = ValidatorConfig::from_env()?;

    let raw = std::fs::read_to_string(request_path)
        .map_err(|e| format!("cannot read {}: {e}", request_path.display()))?;
    let mut request: ValidationRequest = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid request {}: {e}", request_path.display()))?;
    if specialty.is_some() {
        request.specialty = specialty;
    }

    let index = new_index();
    match guidelines.or_else(|| config.guidelines_dir.clone()) {
        Some(dir) => match index.rebuild_from_dir(&dir) {
            Ok(report) => {
                for failure in &report.failures {
                    tracing::warn!(
                        source = %failure.source_document,
                        reason = %failure.reason,
                        "Guideline not indexed"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Guidelines unavailable; validating without them"),
        },
        None => tracing::warn!("No guidelines directory configured; validating without guidelines"),
    }

    // The gateway owns a blocking HTTP client, which must be created and
    // dropped outside the async runtime.
    let gateway = gateway::connect(&config.provider)?;
    let validator = GuidelineValidator::new(
        GuidelineRetriever::new(index),
        gateway,
        ValidatorSettings::from(&config),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let response = runtime.block_on(validator.respond(&request));
    drop(runtime);

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(match response {
        ValidationResponse::Completed(_) => ExitCode::SUCCESS,
        ValidationResponse::Rejected(_) => ExitCode::from(EXIT_REJECTED),
    })
}
