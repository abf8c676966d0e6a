//! asmlens CLI
//!
//! # Usage
//!
//! ```bash
//! # Run every analysis step on a module
//! asmlens analyze path/to/Library.dll --config asmlens.yaml
//!
//! # Render one entity (metadata token, hex or decimal)
//! asmlens decompile path/to/Library.dll 0x06000001
//!
//! # Analyze and bundle the artifacts into a zip
//! asmlens export path/to/Library.dll
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use asmlens_metadata::{CachingDecompiler, Decompiler, DecompilerCacheConfig};
use asmlens_orchestration::telemetry::init_tracing;
use asmlens_orchestration::{ArtifactPayload, Engine, EngineConfig};
use asmlens_storage::{StepName, StepRecord, StepStatus};
use clap::{Parser, Subcommand};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "asmlens")]
#[command(about = "Structural analysis of .NET modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis pipeline on a module
    Analyze {
        file: PathBuf,

        /// Engine configuration (YAML, version 1)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Data directory used when no config is given
        #[arg(long, default_value = ".asmlens")]
        data_dir: PathBuf,
    },

    /// Print declaration source and disassembly for one entity
    Decompile {
        file: PathBuf,

        /// Metadata token, e.g. 0x06000001
        handle: String,
    },

    /// Run the pipeline plus the export step
    Export {
        file: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = ".asmlens")]
        data_dir: PathBuf,

        /// Where to copy the archive (defaults to the analysis directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            file,
            config,
            data_dir,
        } => {
            let config = load_config(config.as_deref(), &data_dir)?;
            run_pipeline(&file, config, false, None).await?;
        }
        Commands::Decompile { file, handle } => {
            decompile(&file, parse_handle(&handle)?)?;
        }
        Commands::Export {
            file,
            config,
            data_dir,
            output,
        } => {
            let config = load_config(config.as_deref(), &data_dir)?;
            run_pipeline(&file, config, true, output).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, data_dir: &Path) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_yaml(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::rooted_at(data_dir)),
    }
}

async fn run_pipeline(
    file: &Path,
    config: EngineConfig,
    export: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("module.dll")
        .to_string();

    let engine = Engine::open(config)?;
    let workers = engine.start_workers().await?;
    let service = engine.service();

    let analysis_id = uuid::Uuid::new_v4().to_string();
    service.create_analysis(&analysis_id, &file_name, bytes).await?;
    service.enqueue(&analysis_id)?;
    let mut steps = service.wait_until_settled(&analysis_id, POLL_INTERVAL).await?;

    let required_done = steps
        .iter()
        .all(|s| !s.step.is_required() || s.status == StepStatus::Completed);
    if export && required_done {
        service.request_export(&analysis_id).await?;
        steps = service.wait_until_settled(&analysis_id, POLL_INTERVAL).await?;
    }

    let overall = service.overall_status(&analysis_id).await?;
    println!("Analysis {} ({}): {}", analysis_id, file_name, overall);
    print_steps(&steps, &engine, &analysis_id);

    let mut result = Ok(());
    if export {
        match service.read_artifact(&analysis_id, StepName::Export).await {
            Ok(ArtifactPayload::Archive {
                bytes,
                download_name,
            }) => {
                if let Some(dir) = output {
                    std::fs::create_dir_all(&dir)?;
                    let target = dir.join(&download_name);
                    std::fs::write(&target, bytes)?;
                    println!("Archive: {}", target.display());
                }
            }
            Ok(ArtifactPayload::Json(_)) => {}
            Err(e) => result = Err(anyhow::Error::new(e).context("export did not complete")),
        }
    }

    engine.shutdown(workers).await;
    result
}

fn print_steps(steps: &[StepRecord], engine: &Engine, analysis_id: &str) {
    println!("{:<18} {:<12} {:>7}  {}", "STEP", "STATUS", "RETRIES", "ARTIFACT / ERROR");
    for step in steps {
        let detail = match step.status {
            StepStatus::Completed => engine
                .artifacts()
                .artifact_path(analysis_id, step.step.artifact_file_name())
                .display()
                .to_string(),
            StepStatus::Failed => step.error_message.clone().unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "{:<18} {:<12} {:>7}  {}",
            step.step.as_str(),
            step.status.as_str(),
            step.retry_count,
            detail
        );
    }
}

fn decompile(file: &Path, handle: u32) -> anyhow::Result<()> {
    let decompiler = CachingDecompiler::new(DecompilerCacheConfig::default());
    let entity = decompiler
        .decompile(file, handle)
        .with_context(|| format!("failed to decompile {:#010x}", handle))?;

    println!("// {} ({:?}, {:#010x})", entity.name, entity.kind, entity.handle);
    println!("{}", entity.source);
    println!("{}", entity.disassembly);
    decompiler.dispose();
    Ok(())
}

fn parse_handle(raw: &str) -> anyhow::Result<u32> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    match parsed {
        Ok(handle) => Ok(handle),
        Err(e) => bail!("invalid handle '{}': {}", raw, e),
    }
}
