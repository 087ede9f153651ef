//! Sync Server Test Utilities
//!
//! This crate provides shared utilities for the server's integration tests.
//!
//! ## Test Philosophy
//!
//! - **Scripted first**: every interleaving is spelled out as queued requests,
//!   so each run is reproducible. Worker-thread runs check outcomes that hold
//!   under any schedule
//! - **Observe the wire**: assertions look at what reached each caller and in
//!   which order, via the kernel's delivery audit log
//! - **Same policy, every variant**: scenarios run against all primitives and
//!   reply strategies

use core_types::ClientId;
use ipc::Request;
use services_sync::{
    PrimitiveKind, ReplyStrategy, RunSummary, ServerConfig, ServerError, Step, SyncServer,
    ThreadedServer,
};
use sim_kernel::test_utils::ScriptedClients;
use sim_kernel::{SimulatedKernel, ThreadedKernel};
use std::sync::Arc;
use std::thread;

pub type TestServer = SyncServer<SimulatedKernel>;

pub const ALL_PRIMITIVES: [PrimitiveKind; 3] = [
    PrimitiveKind::Mutex,
    PrimitiveKind::Semaphore,
    PrimitiveKind::CondVar,
];

pub const ALL_STRATEGIES: [ReplyStrategy; 3] = [
    ReplyStrategy::Fast,
    ReplyStrategy::Slow,
    ReplyStrategy::Saved,
];

/// Creates a server for `config` with one scripted caller per client
pub fn test_server(config: ServerConfig) -> (TestServer, ScriptedClients) {
    let mut kernel = SimulatedKernel::new();
    let clients = ScriptedClients::new(&mut kernel, config.population);
    let server = SyncServer::new(kernel, config).unwrap_or_else(|e| panic!("bad config: {}", e));
    (server, clients)
}

/// Creates a server and takes every client through the start barrier
pub fn released_server(config: ServerConfig) -> (TestServer, ScriptedClients) {
    let (mut server, clients) = test_server(config);
    clients.init_all(server.kernel_mut());
    drain(&mut server).unwrap_or_else(|e| panic!("barrier failed: {}", e));
    (server, clients)
}

/// Steps the server until nothing is queued
///
/// Returns the summary if the run finished along the way.
pub fn drain(server: &mut TestServer) -> Result<Option<RunSummary>, ServerError> {
    while server.kernel().pending() > 0 {
        if let Step::Finished(summary) = server.step()? {
            return Ok(Some(summary));
        }
    }
    Ok(None)
}

/// Builds a configuration for the given variant pair
pub fn variant_config(
    population: usize,
    primitive: PrimitiveKind,
    reply_strategy: ReplyStrategy,
) -> ServerConfig {
    ServerConfig {
        population,
        primitive,
        reply_strategy,
        ..ServerConfig::default()
    }
}

/// Runs `config` on worker threads with one client thread per client
///
/// Each client follows `plan(its id)` after its release. Panics if a client
/// fails while the server reports success.
pub fn run_threaded<F>(config: ServerConfig, plan: F) -> Result<RunSummary, ServerError>
where
    F: Fn(ClientId) -> Vec<Request> + Sync,
{
    let kernel = Arc::new(ThreadedKernel::new());
    let server = ThreadedServer::new(Arc::clone(&kernel), config.clone())?;
    let callers = (0..config.population)
        .map(|_| kernel.new_caller())
        .collect::<Result<Vec<_>, _>>()
        .map_err(ServerError::Channel)?;

    thread::scope(|scope| {
        let clients: Vec<_> = callers
            .iter()
            .map(|&caller| {
                let kernel = &kernel;
                let plan = &plan;
                scope.spawn(move || kernel.play_client(caller, plan))
            })
            .collect();

        let summary = server.run();
        for client in clients {
            let played = client
                .join()
                .unwrap_or_else(|_| panic!("client thread panicked"));
            if summary.is_ok() {
                played.unwrap_or_else(|e| panic!("client failed: {}", e));
            }
        }
        summary
    })
}
