use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, SnapshotSink, StarterSource};
use crate::exercise_store::ExerciseStore;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub exercises: Arc<ExerciseStore>,
    pub config: Arc<ServerConfig>,
    /// Live WebSocket connections, for the connection cap and health.
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let exercises = Arc::new(ExerciseStore::from_seeds(&config.exercises));
        let snapshots = config
            .rooms
            .persist_snapshots
            .then(|| Arc::clone(&exercises) as Arc<dyn SnapshotSink>);
        let coordinator = Coordinator::new(
            Arc::clone(&exercises) as Arc<dyn StarterSource>,
            snapshots,
            config.limits.max_code_bytes,
        );
        tracing::info!(
            exercises = exercises.len(),
            persist_snapshots = config.rooms.persist_snapshots,
            "Application state initialized"
        );
        Self {
            coordinator: Arc::new(coordinator),
            exercises,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts a connection for as long as it is held.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
