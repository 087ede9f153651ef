//! # Bench Runtime
//!
//! Builds a kernel populated by benchmark clients, runs the server over it
//! and hands back the run summary.
//!
//! In multiplexed mode the clients are played by a driver on the simulated
//! kernel. In threaded mode each client is a real thread calling into the
//! worker-thread server.

use crate::workload::{Workload, WorkloadDriver};
use kernel_api::KernelError;
use serde::{Deserialize, Serialize};
use services_sync::{
    MulticastTrigger, RunSummary, ServerConfig, ServerError, SyncServer, ThreadedServer,
};
use sim_kernel::{SimulatedKernel, ThreadedKernel};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::info;

/// Bench runtime error types
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client error: {0}")]
    Client(String),
}

/// How the server runs its clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One dispatch thread multiplexing every client
    #[default]
    Multiplexed,
    /// One worker thread per client
    Threaded,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multiplexed" => Ok(ExecutionMode::Multiplexed),
            "threaded" => Ok(ExecutionMode::Threaded),
            other => Err(format!("Invalid mode: {}", other)),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Multiplexed => f.write_str("multiplexed"),
            ExecutionMode::Threaded => f.write_str("threaded"),
        }
    }
}

/// Benchmark configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Server settings
    pub server: ServerConfig,
    /// What the clients do
    pub workload: Workload,
    /// Requests per client, excluding `INIT` and `TMNT`
    pub iterations: usize,
    pub mode: ExecutionMode,
    /// Keep the simulated kernel's per-delivery audit trail
    pub audit: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            workload: Workload::default(),
            iterations: 100,
            mode: ExecutionMode::default(),
            audit: false,
        }
    }
}

impl BenchConfig {
    /// Parses a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, BenchError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BenchError::Config(e.to_string()))?;
        config.server.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BenchError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

enum Backend {
    Multiplexed(SyncServer<SimulatedKernel>),
    Threaded {
        kernel: Arc<ThreadedKernel>,
        server: ThreadedServer<Arc<ThreadedKernel>>,
    },
}

/// Host runtime for one benchmark run
pub struct BenchRuntime {
    config: BenchConfig,
    backend: Backend,
}

impl BenchRuntime {
    /// Creates the kernel, the clients and the server
    pub fn new(config: BenchConfig) -> Result<Self, BenchError> {
        config.server.validate()?;

        let backend = match config.mode {
            ExecutionMode::Multiplexed => {
                let mut driver = WorkloadDriver::new(
                    config.workload,
                    config.server.population,
                    config.iterations,
                );
                if config.server.multicast == MulticastTrigger::InitiatorWait {
                    driver = driver.with_initiator_wait();
                }
                let mut kernel = SimulatedKernel::new();
                if !config.audit {
                    kernel = kernel.without_audit();
                }
                let kernel = kernel.with_driver(Box::new(driver))?;
                Backend::Multiplexed(SyncServer::new(kernel, config.server.clone())?)
            }
            ExecutionMode::Threaded => {
                let kernel = Arc::new(ThreadedKernel::new());
                let server = ThreadedServer::new(Arc::clone(&kernel), config.server.clone())?;
                Backend::Threaded { kernel, server }
            }
        };

        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Returns the multiplexed server, if that is the mode in use
    pub fn server(&self) -> Option<&SyncServer<SimulatedKernel>> {
        match &self.backend {
            Backend::Multiplexed(server) => Some(server),
            Backend::Threaded { .. } => None,
        }
    }

    /// Runs the benchmark to completion
    pub fn run(&mut self) -> Result<RunSummary, BenchError> {
        info!(
            mode = %self.config.mode,
            workload = %self.config.workload,
            iterations = self.config.iterations,
            "starting benchmark"
        );
        let summary = match &mut self.backend {
            Backend::Multiplexed(server) => {
                let summary = server.run()?;
                info!(
                    run_id = %summary.run_id,
                    deliveries = server.kernel().deliveries().total(),
                    abandoned = server.kernel().abandoned_count(),
                    "benchmark finished"
                );
                summary
            }
            Backend::Threaded { kernel, server } => {
                let summary = Self::run_client_threads(&self.config, kernel, server)?;
                info!(
                    run_id = %summary.run_id,
                    deliveries = kernel.delivered(),
                    "benchmark finished"
                );
                summary
            }
        };
        Ok(summary)
    }

    /// Runs one thread per client against the worker-thread server
    fn run_client_threads(
        config: &BenchConfig,
        kernel: &ThreadedKernel,
        server: &ThreadedServer<Arc<ThreadedKernel>>,
    ) -> Result<RunSummary, BenchError> {
        let population = config.server.population;
        let initiator_waits = config.server.multicast == MulticastTrigger::InitiatorWait;
        let (workload, iterations) = (config.workload, config.iterations);
        let callers = (0..population)
            .map(|_| kernel.new_caller())
            .collect::<Result<Vec<_>, _>>()?;

        thread::scope(|scope| -> Result<RunSummary, BenchError> {
            let clients: Vec<_> = callers
                .iter()
                .map(|&caller| {
                    scope.spawn(move || {
                        kernel.play_client(caller, |client| {
                            workload.plan(client, population, iterations, initiator_waits)
                        })
                    })
                })
                .collect();

            let summary = server.run();
            let mut failure = None;
            for client in clients {
                match client.join() {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        failure.get_or_insert(BenchError::Kernel(e));
                    }
                    Err(_) => {
                        failure.get_or_insert(BenchError::Client(
                            "client thread panicked".to_string(),
                        ));
                    }
                }
            }
            let summary = summary?;
            match failure {
                Some(e) => Err(e),
                None => Ok(summary),
            }
        })
    }
}
