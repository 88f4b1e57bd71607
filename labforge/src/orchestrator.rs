use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use labforge_core::{
    config::LabforgeConfig,
    error::LabforgeResult,
    groups::UnresolvedDirectory,
    report::{CleanupReport, ProvisionReport},
    spec::EnvironmentSpec,
    Environment,
};

/// One provisioning step requested from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Masters,
    Deploy,
    CleanupMasters { networks: bool },
    CleanupEnvironment { networks: bool },
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Masters => write!(f, "masters"),
            Operation::Deploy => write!(f, "deploy"),
            Operation::CleanupMasters { .. } => write!(f, "cleanup-masters"),
            Operation::CleanupEnvironment { .. } => write!(f, "cleanup-environment"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Provision(ProvisionReport),
    Cleanup(CleanupReport),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Provision(report) => {
                write!(f, "{}", report)?;
                for skipped in &report.skipped {
                    write!(f, "\n  skipped {}: {}", skipped.path, skipped.reason)?;
                }
                Ok(())
            }
            RunOutcome::Cleanup(report) => {
                write!(f, "{}", report)?;
                for failure in &report.failures {
                    write!(f, "\n  failed {}: {}", failure.path, failure.reason)?;
                }
                Ok(())
            }
        }
    }
}

/// Wires configuration, specification and hypervisor driver together
///
/// The driver is picked from the backend registry by
/// `infrastructure.backend`; both the built-in `"memory"` backend and the
/// file-backed `"simulated"` backend are available.
pub struct LabOrchestrator {
    environment: Environment,
    run_timeout: Option<Duration>,
}

impl LabOrchestrator {
    pub async fn new(config: LabforgeConfig, spec: EnvironmentSpec) -> LabforgeResult<Self> {
        tracing::info!(
            "Creating Labforge orchestrator with hypervisor backend: {}",
            config.infrastructure.backend
        );
        let registry = labforge_vm::registry();
        let driver = registry.create_driver(&config.infrastructure)?;
        let run_timeout = config.engine.run_timeout;
        let environment =
            Environment::connect(config, spec, driver, &UnresolvedDirectory).await?;
        Ok(Self {
            environment,
            run_timeout,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub async fn run(&self, operation: Operation) -> LabforgeResult<RunOutcome> {
        tracing::info!("Running '{}'", operation);
        let env = &self.environment;
        match operation {
            Operation::Masters => self
                .bounded(env.create_masters())
                .await
                .map(RunOutcome::Provision),
            Operation::Deploy => self
                .bounded(env.deploy_environment())
                .await
                .map(RunOutcome::Provision),
            Operation::CleanupMasters { networks } => self
                .bounded(env.cleanup_masters(networks))
                .await
                .map(RunOutcome::Cleanup),
            Operation::CleanupEnvironment { networks } => self
                .bounded(env.cleanup_environment(networks))
                .await
                .map(RunOutcome::Cleanup),
        }
    }

    async fn bounded<T>(&self, run: impl Future<Output = LabforgeResult<T>>) -> LabforgeResult<T> {
        match self.run_timeout {
            Some(limit) => tokio::time::timeout(limit, run).await?,
            None => run.await,
        }
    }
}
