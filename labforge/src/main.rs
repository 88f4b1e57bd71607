use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use labforge::{LabOrchestrator, LabforgeConfig, LabforgeError, LabforgeResult, Operation};
use labforge_core::spec::EnvironmentSpec;

#[derive(Parser)]
#[command(name = "labforge")]
#[command(about = "Builds training environments on a hypervisor from a YAML specification", long_about = None)]
struct Cli {
    /// Environment specification (YAML)
    #[arg(short, long)]
    spec: PathBuf,

    /// Configuration file (TOML); defaults and LABFORGE_* variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `infrastructure.backend`
    #[arg(long)]
    backend: Option<String>,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Parse and check the specification without touching the hypervisor
    Validate,
    /// Create the Master folder tree, networks and Master VMs
    Masters,
    /// Convert Masters to templates and clone the deployment tree
    Deploy,
    /// Destroy the Master folder tree
    CleanupMasters {
        /// Also delete every declared network
        #[arg(long)]
        networks: bool,
    },
    /// Destroy the deployed environment, leaving the Masters in place
    CleanupEnvironment {
        /// Also delete the generic network instances
        #[arg(long)]
        networks: bool,
    },
}

impl Commands {
    fn operation(&self) -> Option<Operation> {
        match self {
            Commands::Validate => None,
            Commands::Masters => Some(Operation::Masters),
            Commands::Deploy => Some(Operation::Deploy),
            Commands::CleanupMasters { networks } => Some(Operation::CleanupMasters {
                networks: *networks,
            }),
            Commands::CleanupEnvironment { networks } => Some(Operation::CleanupEnvironment {
                networks: *networks,
            }),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("labforge={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!("labforge failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> LabforgeResult<()> {
    let mut config = match &cli.config {
        Some(path) => LabforgeConfig::load(path)?,
        None => LabforgeConfig::from_env()?,
    };
    if let Some(backend) = cli.backend {
        config.infrastructure.backend = backend;
        config.validate()?;
    }

    let spec = EnvironmentSpec::load(&cli.spec)?;

    let Some(operation) = cli.command.operation() else {
        let backends = labforge_vm::registry();
        if !backends
            .list_available_backends()
            .contains(&config.infrastructure.backend.as_str())
        {
            return Err(LabforgeError::configuration(
                "infrastructure.backend",
                format!(
                    "Unknown hypervisor backend '{}'. Available backends: {:?}",
                    config.infrastructure.backend,
                    backends.list_available_backends()
                ),
            ));
        }
        println!("{}", spec.summary());
        return Ok(());
    };

    let orchestrator = LabOrchestrator::new(config, spec).await?;
    let outcome = orchestrator.run(operation).await?;

    if cli.json {
        let rendered = serde_json::to_string_pretty(&outcome)?;
        println!("{}", rendered);
    } else {
        println!("{}", outcome);
    }
    Ok(())
}
