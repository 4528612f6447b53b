//! Fixed-interval task runner.
//!
//! Every task runs once at start, then on a start-to-start interval. A tick
//! that finds the previous run still going is dropped (skip-if-busy).
//! Stopping a task ends its ticker; a run already in flight completes.

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub type TaskAction = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct TaskSpec {
    pub name: String,
    pub interval: Duration,
    pub action: TaskAction,
}

impl TaskSpec {
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            action: Arc::new(move || action().boxed()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub runs: u64,
    pub failures: u64,
    pub skipped: u64,
}

struct TaskState {
    name: String,
    busy: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

impl TaskState {
    fn stats(&self) -> TaskStats {
        TaskStats {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Clears the busy flag when a run ends, including by panic.
struct BusyGuard(Arc<TaskState>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

struct TaskHandle {
    state: Arc<TaskState>,
    stop: broadcast::Sender<()>,
}

pub struct Scheduler {
    tasks: Vec<TaskHandle>,
    tickers: JoinSet<()>,
    runs: Arc<Mutex<JoinSet<()>>>,
}

impl Scheduler {
    /// Spawns one ticker per task. Must be called inside a Tokio runtime.
    pub fn start(specs: Vec<TaskSpec>) -> Self {
        let runs = Arc::new(Mutex::new(JoinSet::new()));
        let mut tickers = JoinSet::new();
        let mut tasks = Vec::with_capacity(specs.len());

        for spec in specs {
            let state = Arc::new(TaskState {
                name: spec.name.clone(),
                busy: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            });
            let (stop, rx) = broadcast::channel(1);
            info!(task = %spec.name, every_secs = spec.interval.as_secs(), "task scheduled");
            tickers.spawn(drive(state.clone(), spec, rx, runs.clone()));
            tasks.push(TaskHandle { state, stop });
        }

        Self {
            tasks,
            tickers,
            runs,
        }
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.state.name.as_str()).collect()
    }

    pub fn stats(&self, name: &str) -> Option<TaskStats> {
        self.find(name).map(|t| t.state.stats())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.find(name)
            .map(|t| t.state.busy.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Cancels future ticks for one task. Returns false for an unknown name.
    pub fn stop(&self, name: &str) -> bool {
        match self.find(name) {
            Some(t) => {
                let _ = t.stop.send(());
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for t in &self.tasks {
            let _ = t.stop.send(());
        }
    }

    /// Waits for stopped tickers, then up to `grace` for in-flight runs.
    /// Returns false when runs were still going at the deadline.
    pub async fn wait_idle(&mut self, grace: Duration) -> bool {
        while self.tickers.join_next().await.is_some() {}

        let runs = self.runs.clone();
        let drained = tokio::time::timeout(grace, async move {
            let mut set = runs.lock().await;
            while set.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            let busy: Vec<&str> = self
                .tasks
                .iter()
                .filter(|t| t.state.busy.load(Ordering::Acquire))
                .map(|t| t.state.name.as_str())
                .collect();
            warn!(?busy, grace_secs = grace.as_secs(), "runs still in flight after grace period");
        }
        drained
    }

    fn find(&self, name: &str) -> Option<&TaskHandle> {
        self.tasks.iter().find(|t| t.state.name == name)
    }
}

async fn drive(
    state: Arc<TaskState>,
    spec: TaskSpec,
    mut stop: broadcast::Receiver<()>,
    runs: Arc<Mutex<JoinSet<()>>>,
) {
    // first tick completes immediately
    let mut ticker = interval(spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => {
                info!(task = %state.name, "task stopped");
                break;
            }
            _ = ticker.tick() => trigger(&state, &spec.action, &runs).await,
        }
    }
}

async fn trigger(state: &Arc<TaskState>, action: &TaskAction, runs: &Mutex<JoinSet<()>>) {
    if state.busy.swap(true, Ordering::AcqRel) {
        state.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(task = %state.name, "previous run still in progress; tick skipped");
        return;
    }
    let guard = BusyGuard(state.clone());
    let fut = action();
    let state = state.clone();

    let mut set = runs.lock().await;
    while set.try_join_next().is_some() {}
    set.spawn(async move {
        let _guard = guard;
        let started = Instant::now();
        state.runs.fetch_add(1, Ordering::Relaxed);
        debug!(task = %state.name, "run started");
        match fut.await {
            Ok(()) => info!(
                task = %state.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "run complete"
            ),
            Err(e) => {
                state.failures.fetch_add(1, Ordering::Relaxed);
                error!(task = %state.name, error = %e, "run failed");
            }
        }
    });
}
