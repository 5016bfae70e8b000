//! Background transfers with progress reporting and cancellation.
//!
//! Each transfer runs in its own task and reports byte counts through an
//! unbounded channel to a second task that invokes the caller's callbacks,
//! so a slow callback never stalls the network side. Callbacks of one
//! transfer run sequentially: every `progress` call, then `completion` once.
//!
//! Stopping a transfer is silent: once [`TransferRegistry::cancel`] returns,
//! no further progress is delivered and completion is never invoked. A
//! callback that is already running when the cancel happens finishes before
//! `cancel` returns. A callback may cancel its own transfer; cancelling a
//! different transfer from inside a callback waits for that transfer's
//! running callback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::SftpError;

/// Identifies one transfer of one client. Never reused by that client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(u64);

impl TransferId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

/// Snapshot of an in-flight transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub id: TransferId,
    pub kind: TransferKind,
    pub remote_path: String,
    /// Payload size, once known
    pub total: Option<u64>,
    pub transferred: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Running,
    Cancelled,
    SessionClosed,
}

/// Byte counters shared between a running transfer and the registry
#[derive(Debug, Default)]
struct Counters {
    transferred: AtomicU64,
    /// `u64::MAX` while unknown
    total: AtomicU64,
}

struct Entry {
    kind: TransferKind,
    remote_path: String,
    started_at: DateTime<Utc>,
    counters: Arc<Counters>,
    signal: watch::Sender<Signal>,
    /// Held while a callback runs, and by `cancel` after signalling
    gate: Arc<ReentrantMutex<()>>,
}

/// The client's table of in-flight transfers
#[derive(Default)]
pub struct TransferRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<TransferId, Entry>>,
}

impl std::fmt::Debug for TransferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRegistry")
            .field("in_flight", &self.entries.lock().len())
            .finish()
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transfer.
    ///
    /// `work` receives a [`ProgressReporter`] and performs the transfer.
    /// Returns as soon as the transfer is registered; callbacks are invoked
    /// from a tokio task.
    pub fn spawn<T, W, Fut, P, C>(
        self: &Arc<Self>,
        kind: TransferKind,
        remote_path: &str,
        total: Option<u64>,
        work: W,
        progress: P,
        completion: C,
    ) -> TransferId
    where
        T: Send + 'static,
        W: FnOnce(ProgressReporter) -> Fut,
        Fut: Future<Output = Result<T, SftpError>> + Send + 'static,
        P: FnMut(u64) + Send + 'static,
        C: FnOnce(Result<T, SftpError>) + Send + 'static,
    {
        let id = TransferId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let counters = Arc::new(Counters {
            transferred: AtomicU64::new(0),
            total: AtomicU64::new(total.unwrap_or(u64::MAX)),
        });
        let (signal_tx, signal_rx) = watch::channel(Signal::Running);
        let gate = Arc::new(ReentrantMutex::new(()));

        self.entries.lock().insert(
            id,
            Entry {
                kind,
                remote_path: remote_path.to_string(),
                started_at: Utc::now(),
                counters: counters.clone(),
                signal: signal_tx,
                gate: gate.clone(),
            },
        );

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let reporter = ProgressReporter {
            tx: progress_tx,
            counters,
        };

        tokio::spawn(deliver(
            id,
            signal_rx.clone(),
            gate,
            progress_rx,
            done_rx,
            progress,
            completion,
        ));

        let fut = work(reporter);
        let finish = FinishGuard {
            registry: self.clone(),
            id,
        };
        let mut stop_rx = signal_rx;
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                signal = stopped(&mut stop_rx) => match signal {
                    Signal::SessionClosed => Err(SftpError::SessionClosed),
                    // Cancelled: nothing is delivered
                    _ => return,
                },
                result = fut => result,
            };
            drop(finish);
            let _ = done_tx.send(result);
        });

        tracing::debug!("Started {} ({:?} {})", id, kind, remote_path);
        id
    }

    /// Stop a transfer. Returns false for unknown or finished ids.
    ///
    /// Blocks while a callback of that transfer is running.
    pub fn cancel(&self, id: TransferId) -> bool {
        let entry = self.entries.lock().remove(&id);
        match entry {
            Some(entry) => {
                entry.signal.send_replace(Signal::Cancelled);
                // Wait out a callback that passed its check before the signal
                drop(entry.gate.lock());
                tracing::debug!("Cancelled {} ({})", id, entry.remote_path);
                true
            }
            None => false,
        }
    }

    /// Fail every in-flight transfer with [`SftpError::SessionClosed`]
    pub fn close_all(&self) -> usize {
        let entries: Vec<_> = self.entries.lock().drain().collect();
        for (_, entry) in &entries {
            entry.signal.send_replace(Signal::SessionClosed);
        }
        if !entries.is_empty() {
            tracing::info!("Session closed with {} transfers in flight", entries.len());
        }
        entries.len()
    }

    /// In-flight transfers, oldest first
    pub fn snapshot(&self) -> Vec<TransferInfo> {
        let mut infos: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| {
                let total = entry.counters.total.load(Ordering::Relaxed);
                TransferInfo {
                    id: *id,
                    kind: entry.kind,
                    remote_path: entry.remote_path.clone(),
                    total: (total != u64::MAX).then_some(total),
                    transferred: entry.counters.transferred.load(Ordering::Relaxed),
                    started_at: entry.started_at,
                }
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn is_active(&self, id: TransferId) -> bool {
        self.entries.lock().contains_key(&id)
    }
}

/// Removes the registry entry when the transfer task ends, even by panic
struct FinishGuard {
    registry: Arc<TransferRegistry>,
    id: TransferId,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.registry.entries.lock().remove(&self.id);
    }
}

async fn stopped(rx: &mut watch::Receiver<Signal>) -> Signal {
    loop {
        let signal = *rx.borrow_and_update();
        if signal != Signal::Running {
            return signal;
        }
        if rx.changed().await.is_err() {
            let signal = *rx.borrow();
            if signal != Signal::Running {
                return signal;
            }
            // Sender gone while running: the transfer finished on its own
            std::future::pending::<()>().await;
        }
    }
}

async fn deliver<T, P, C>(
    id: TransferId,
    signal: watch::Receiver<Signal>,
    gate: Arc<ReentrantMutex<()>>,
    mut progress_rx: mpsc::UnboundedReceiver<u64>,
    mut done_rx: oneshot::Receiver<Result<T, SftpError>>,
    mut progress: P,
    completion: C,
) where
    P: FnMut(u64),
    C: FnOnce(Result<T, SftpError>),
{
    let cancelled = || *signal.borrow() == Signal::Cancelled;
    let running = || *signal.borrow() == Signal::Running;

    let outcome = loop {
        tokio::select! {
            biased;
            Some(bytes) = progress_rx.recv() => {
                let _gate = gate.lock();
                if cancelled() {
                    return;
                }
                if running() {
                    progress(bytes);
                }
            }
            outcome = &mut done_rx => break outcome,
        }
    };

    // Progress sent before the result still goes first
    let _gate = gate.lock();
    while let Ok(bytes) = progress_rx.try_recv() {
        if !running() {
            break;
        }
        progress(bytes);
    }

    if cancelled() {
        return;
    }

    let result = outcome.unwrap_or_else(|_| {
        Err(SftpError::Transfer(format!("{} ended unexpectedly", id)))
    });
    if let Err(e) = &result {
        tracing::debug!("{} failed: {}", id, e);
    }
    completion(result);
}

/// Handed to transfer work to publish byte counts
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<u64>,
    counters: Arc<Counters>,
}

impl ProgressReporter {
    /// Record the cumulative number of bytes moved so far
    pub fn report(&self, bytes: u64) {
        self.counters.transferred.store(bytes, Ordering::Relaxed);
        let _ = self.tx.send(bytes);
    }

    /// Record the payload size once it is known
    pub fn set_total(&self, total: u64) {
        self.counters.total.store(total, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                counters: Arc::new(Counters::default()),
            },
            rx,
        )
    }
}

/// Write `data` in `chunk_size` pieces, reporting after each one, then close.
/// An empty payload reports 0 once.
pub async fn pump_upload<W>(
    writer: &mut W,
    data: &[u8],
    chunk_size: usize,
    reporter: &ProgressReporter,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        reporter.report(0);
    }

    let mut written = 0u64;
    for chunk in data.chunks(chunk_size.max(1)) {
        writer.write_all(chunk).await?;
        written += chunk.len() as u64;
        reporter.report(written);
    }

    writer.flush().await?;
    writer.shutdown().await
}

/// Read everything in `chunk_size` pieces, reporting after each one.
/// An empty payload reports 0 once.
pub async fn pump_download<R>(
    reader: &mut R,
    chunk_size: usize,
    size_hint: Option<u64>,
    reporter: &ProgressReporter,
) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let capacity = size_hint
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(0)
        .min(64 * 1024 * 1024);
    let mut data = Vec::with_capacity(capacity);
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        reporter.report(data.len() as u64);
    }

    if data.is_empty() {
        reporter.report(0);
    }
    Ok(data)
}
