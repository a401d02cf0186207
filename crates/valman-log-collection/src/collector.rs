//! Server log collector implementation.
//!
//! Two delivery paths with different guarantees:
//!
//! - every chunk is appended to the log file synchronously, before `append`
//!   returns, so nothing is lost if the server crashes between flushes;
//! - subscribers receive the accumulated chunks as one concatenated batch on
//!   a low-frequency timer, and never receive an empty batch.

use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use valman_common::{ProcessError, ProcessResult};

/// Default interval between batched deliveries to subscribers.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// A registered delivery target for batched log output.
pub type LogSubscriber = Box<dyn Fn(&str) + Send + Sync>;

/// Collects the supervised server's output.
pub struct ServerLogCollector {
    log_path: PathBuf,
    file: Mutex<File>,
    pending: Arc<Mutex<Vec<String>>>,
    subscribers: Arc<RwLock<Vec<LogSubscriber>>>,
    flush_interval: Duration,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
}

impl ServerLogCollector {
    /// Create a collector writing to `log_path`, creating the file (and its
    /// parent directory) if needed.
    pub fn new<P: AsRef<Path>>(log_path: P) -> ProcessResult<Self> {
        Self::with_flush_interval(log_path, DEFAULT_FLUSH_INTERVAL)
    }

    /// Like [`ServerLogCollector::new`] with a custom batch interval.
    pub fn with_flush_interval<P: AsRef<Path>>(
        log_path: P,
        flush_interval: Duration,
    ) -> ProcessResult<Self> {
        let log_path = log_path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProcessError::logging(format!(
                    "failed to create log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| {
                ProcessError::logging(format!(
                    "failed to open log file {}: {}",
                    log_path.display(),
                    e
                ))
            })?;

        Ok(Self {
            log_path,
            file: Mutex::new(file),
            pending: Arc::new(Mutex::new(Vec::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            flush_interval,
            flush_task: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Path of the log file this collector appends to.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append one output chunk.
    ///
    /// The chunk is on disk when this returns; it is also queued for the
    /// next batched delivery.
    pub fn append(&self, chunk: &str) -> ProcessResult<()> {
        {
            let mut file = self.file.lock();
            file.write_all(chunk.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| {
                    ProcessError::logging(format!(
                        "failed to append to {}: {}",
                        self.log_path.display(),
                        e
                    ))
                })?;
        }

        self.pending.lock().push(chunk.to_string());
        Ok(())
    }

    /// Register a delivery target for batched output.
    ///
    /// Subscribers live as long as the collector; there is no unsubscribe.
    pub fn subscribe(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(callback));
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Arm the periodic flush task.
    ///
    /// Idempotent: arming an armed collector does nothing.
    pub fn arm(&self) {
        let mut task = self.flush_task.lock();
        if let Some(existing) = task.as_ref() {
            if !existing.is_finished() {
                return;
            }
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let interval = self.flush_interval;
        let pending = Arc::clone(&self.pending);
        let subscribers = Arc::clone(&self.subscribers);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("log flush task cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        flush_pending(&pending, &subscribers);
                    }
                }
            }
        }));
    }

    /// Disarm the periodic flush task. Chunks keep accumulating (and keep
    /// being written to disk) until the task is re-armed.
    pub fn disarm(&self) {
        self.cancel.lock().cancel();
        if let Some(task) = self.flush_task.lock().take() {
            task.abort();
        }
    }
}

/// Deliver all pending chunks as one batch. No-op when nothing is pending:
/// subscribers never see an empty batch.
fn flush_pending(pending: &Mutex<Vec<String>>, subscribers: &RwLock<Vec<LogSubscriber>>) {
    let pending = std::mem::take(&mut *pending.lock());
    if pending.is_empty() {
        return;
    }

    let batch = pending.concat();
    let subscribers = subscribers.read();
    for (index, subscriber) in subscribers.iter().enumerate() {
        // One failing subscriber must not cost the others their batch.
        let delivery = catch_unwind(AssertUnwindSafe(|| subscriber(&batch)));
        if delivery.is_err() {
            warn!(subscriber = index, "log subscriber panicked during delivery");
        }
    }
}

impl Drop for ServerLogCollector {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
        if let Some(task) = self.flush_task.lock().take() {
            task.abort();
        }
    }
}
