use std::sync::Arc;

use sqlx::SqlitePool;

use crate::catalog::{AnalysisSource, SqliteCatalog};
use crate::initiator::TaskInitiator;
use crate::invoker::{HttpInvoker, JobInvoker, SpawnInvoker};
use crate::push::{GatewayTransport, LocalConnections, PushTransport, Pusher};
use crate::store::{ConnectionRegistry, SqliteConnectionRegistry, SqliteTaskStore, TaskStore};
use crate::worker::{Worker, WorkerSettings};

/// How the pieces of one process are wired together.
#[derive(Debug, Clone, Default)]
pub struct Wiring {
    pub worker: WorkerSettings,
    /// Push through this gateway instead of the local socket table.
    pub websocket_endpoint: Option<String>,
    /// Trigger this remote worker instead of spawning runs locally.
    pub worker_url: Option<String>,
}

pub struct AppState {
    pub tasks: Arc<dyn TaskStore>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub catalog: Arc<dyn AnalysisSource>,
    /// Sockets accepted on `/ws` by this process.
    pub sockets: Arc<LocalConnections>,
    pub worker: Arc<Worker>,
    pub initiator: TaskInitiator,
}

impl AppState {
    pub fn new(db: SqlitePool, wiring: Wiring) -> Result<Self, reqwest::Error> {
        let tasks: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db.clone()));
        let registry: Arc<dyn ConnectionRegistry> =
            Arc::new(SqliteConnectionRegistry::new(db.clone()));
        let catalog: Arc<dyn AnalysisSource> = Arc::new(SqliteCatalog::new(db));
        let sockets = Arc::new(LocalConnections::new());

        let transport: Arc<dyn PushTransport> = match &wiring.websocket_endpoint {
            Some(endpoint) => {
                let gateway = GatewayTransport::new(endpoint)?;
                tracing::info!(endpoint = %gateway.endpoint(), "pushing through websocket gateway");
                Arc::new(gateway)
            }
            None => sockets.clone(),
        };

        let worker = Arc::new(Worker::new(
            tasks.clone(),
            registry.clone(),
            catalog.clone(),
            Pusher::new(transport),
            wiring.worker,
        ));

        let invoker: Arc<dyn JobInvoker> = match &wiring.worker_url {
            Some(url) => {
                let remote = HttpInvoker::new(url)?;
                tracing::info!(endpoint = %remote.endpoint(), "triggering remote worker");
                Arc::new(remote)
            }
            None => Arc::new(SpawnInvoker::new(worker.clone())),
        };

        Ok(Self {
            initiator: TaskInitiator::new(tasks.clone(), invoker),
            tasks,
            registry,
            catalog,
            sockets,
            worker,
        })
    }
}
