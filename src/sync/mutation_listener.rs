use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::ai_chat::cache::ContextCache;
use crate::ai_chat::storage::{DataMutation, MutationObserver};

/// Background tasks that drop the cached AI context whenever a journal
/// mutation is published on a broadcast channel.
#[derive(Clone)]
pub struct MutationListener {
    cache: Arc<ContextCache>,
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl MutationListener {
    pub fn new(cache: Arc<ContextCache>) -> Self {
        Self {
            cache,
            tasks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Consume `events` until the sending side is dropped or `stop` is called.
    pub async fn listen(&self, mut events: broadcast::Receiver<DataMutation>) {
        let cache = Arc::clone(&self.cache);

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(mutation) => cache.on_mutation(&mutation),
                    Err(RecvError::Lagged(missed)) => {
                        // Some events were dropped; whatever they were, the context is stale
                        log::warn!("Mutation listener lagged by {} events", missed);
                        cache.invalidate();
                    }
                    Err(RecvError::Closed) => {
                        log::debug!("Mutation channel closed; listener exiting");
                        break;
                    }
                }
            }
        });

        let mut tasks = self.tasks.write().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        log::info!("Mutation listener started ({} active)", tasks.len());
    }

    pub async fn active_tasks(&self) -> usize {
        self.tasks
            .read()
            .await
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Stop all running tasks
    pub async fn stop(&self) {
        let mut tasks = self.tasks.write().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        log::info!("Mutation listeners stopped");
    }
}
