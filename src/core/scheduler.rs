// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tourguard

//! Task scheduler for the background loops

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::Result;

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;
type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync + 'static>;

struct ScheduledTask {
    name: String,
    interval: Duration,
    backoff: Duration,
    task: TaskFn,
    enabled: Arc<AtomicBool>,
}

/// Owns the periodic loops and long-running workers of the engine.
/// A failing run is logged and followed by `backoff` before the next tick;
/// loops only stop on shutdown.
pub struct Scheduler {
    tasks: Arc<RwLock<HashMap<String, ScheduledTask>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub async fn add_task<F, Fut>(&self, name: &str, interval: Duration, backoff: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task: TaskFn = Arc::new(move || Box::pin(task()) as TaskFuture);
        let mut tasks = self.tasks.write().await;
        tasks.insert(
            name.to_string(),
            ScheduledTask {
                name: name.to_string(),
                interval,
                backoff,
                task,
                enabled: Arc::new(AtomicBool::new(true)),
            },
        );
        debug!("Scheduled task '{}' with interval {:?}", name, interval);
    }

    pub async fn remove_task(&self, name: &str) {
        let mut tasks = self.tasks.write().await;
        tasks.remove(name);
    }

    /// Pause or resume a task; a paused task keeps ticking but skips its body.
    pub async fn enable_task(&self, name: &str, enabled: bool) {
        let tasks = self.tasks.read().await;
        if let Some(task) = tasks.get(name) {
            task.enabled.store(enabled, Ordering::Relaxed);
        }
    }

    pub async fn task_names(&self) -> Vec<String> {
        let tasks = self.tasks.read().await;
        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Spawn one loop per registered task.
    pub async fn start(&self) {
        let tasks = self.tasks.read().await;
        let mut handles = self.handles.lock().await;

        for task in tasks.values() {
            let name = task.name.clone();
            let interval = task.interval;
            let backoff = task.backoff;
            let body = task.task.clone();
            let enabled = task.enabled.clone();
            let mut shutdown = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if !enabled.load(Ordering::Relaxed) {
                                continue;
                            }
                            if let Err(e) = body().await {
                                error!("Task '{}' failed: {}", name, e);
                                tokio::select! {
                                    _ = tokio::time::sleep(backoff) => {}
                                    _ = shutdown.recv() => break,
                                }
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
                debug!("Task '{}' stopped", name);
            }));
        }

        info!("Scheduler started {} tasks", tasks.len());
    }

    /// Spawn a long-running worker that receives the shutdown signal.
    pub async fn spawn_worker<F, Fut>(&self, name: &str, worker: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(worker(self.shutdown_tx.subscribe()));
        self.handles.lock().await.push(handle);
        debug!("Spawned worker '{}'", name);
    }

    /// Signal every loop and worker, then wait for them to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let count = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        info!("Scheduler stopped {} tasks", count);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
