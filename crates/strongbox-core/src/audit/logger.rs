use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::{AuditCursor, AuditFilter, AuditLogEntry, AuditRecord, AuditSink};
use crate::config::AuditSettings;
use crate::error::Result;

/// How long a non-empty retry buffer waits for new traffic before retrying the sink.
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

enum Command {
    Append(AuditRecord),
    Flush(oneshot::Sender<()>),
}

#[derive(Default)]
struct Counters {
    recorded: AtomicU64,
    dropped: AtomicU64,
    sink_failures: AtomicU64,
    buffered: AtomicU64,
}

/// Snapshot of the logger's monitoring counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Entries accepted into the queue.
    pub recorded: u64,
    /// Entries lost because the queue or the retry buffer was full.
    pub dropped: u64,
    /// Failed or timed-out sink writes.
    pub sink_failures: u64,
    /// Entries waiting in the retry buffer for the sink to recover.
    pub buffered: u64,
}

/// Stamps monotone (timestamp, seq) positions.
struct Sequencer {
    seq: u64,
    last: Option<DateTime<Utc>>,
}

/// Append-only audit trail with a background writer.
///
/// `record` never blocks and never fails: entries go through a bounded
/// queue to a writer task that appends them to the sink under a write
/// timeout. While the sink is unavailable entries wait in a bounded retry
/// buffer; overflow is dropped and counted.
pub struct AuditLogger {
    tx: mpsc::Sender<Command>,
    sink: Arc<dyn AuditSink>,
    counters: Arc<Counters>,
    sequencer: Mutex<Sequencer>,
    page_size: usize,
}

impl AuditLogger {
    /// Start the writer task. Sequence numbers continue after the newest
    /// record already in the sink.
    pub async fn start(sink: Arc<dyn AuditSink>, settings: &AuditSettings) -> Result<Self> {
        let last = sink.last_cursor().await?;
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        tokio::spawn(run_writer(
            rx,
            sink.clone(),
            counters.clone(),
            settings.write_timeout(),
            settings.retry_buffer,
        ));

        Ok(Self {
            tx,
            sink,
            counters,
            sequencer: Mutex::new(Sequencer {
                seq: last.map(|c| c.seq).unwrap_or(0),
                last: last.map(|c| c.timestamp),
            }),
            page_size: settings.page_size.max(1),
        })
    }

    /// Queue an entry for the sink.
    ///
    /// Positions are stamped and queued under one lock, so the writer sees
    /// records in (timestamp, seq) order and a cursor taken mid-stream never
    /// skips an entry that is still on its way.
    pub fn record(&self, mut entry: AuditLogEntry) {
        let mut sequencer = self.sequencer.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = sequencer.seq + 1;
        // Clock steps backwards must not reorder the trail.
        if let Some(last) = sequencer.last {
            entry.timestamp = entry.timestamp.max(last);
        }
        let timestamp = entry.timestamp;

        match self.tx.try_send(Command::Append(AuditRecord { seq, entry })) {
            Ok(()) => {
                sequencer.seq = seq;
                sequencer.last = Some(timestamp);
                self.counters.recorded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                drop(sequencer);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let record = match e {
                    mpsc::error::TrySendError::Full(Command::Append(r))
                    | mpsc::error::TrySendError::Closed(Command::Append(r)) => Some(r),
                    _ => None,
                };
                if let Some(r) = record {
                    warn!(
                        seq = r.seq,
                        entry_type = %r.entry.entry_type,
                        resource = %r.entry.resource,
                        "audit queue unavailable; entry dropped"
                    );
                }
            }
        }
    }

    /// Wait until every entry recorded before this call has been offered to the sink.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            sink_failures: self.counters.sink_failures.load(Ordering::Relaxed),
            buffered: self.counters.buffered.load(Ordering::Relaxed),
        }
    }

    /// Lazy, ordered enumeration of stored entries matching `filter`.
    pub fn entries(
        &self,
        filter: AuditFilter,
    ) -> impl Stream<Item = Result<AuditRecord>> + Send + use<> {
        self.entries_after(filter, None)
    }

    /// Resume an enumeration strictly after `after`.
    pub fn entries_after(
        &self,
        filter: AuditFilter,
        after: Option<AuditCursor>,
    ) -> impl Stream<Item = Result<AuditRecord>> + Send + use<> {
        let pager = Pager {
            sink: self.sink.clone(),
            filter,
            after,
            page: VecDeque::new(),
            page_size: self.page_size,
            exhausted: false,
        };

        futures::stream::unfold(pager, |mut pager| async move {
            if pager.page.is_empty() && !pager.exhausted {
                match pager
                    .sink
                    .query(&pager.filter, pager.after.as_ref(), pager.page_size)
                    .await
                {
                    Ok(batch) => {
                        pager.exhausted = batch.len() < pager.page_size;
                        pager.page.extend(batch);
                    }
                    Err(e) => {
                        pager.exhausted = true;
                        return Some((Err(e), pager));
                    }
                }
            }
            let record = pager.page.pop_front()?;
            pager.after = Some(record.cursor());
            Some((Ok(record), pager))
        })
    }
}

struct Pager {
    sink: Arc<dyn AuditSink>,
    filter: AuditFilter,
    after: Option<AuditCursor>,
    page: VecDeque<AuditRecord>,
    page_size: usize,
    exhausted: bool,
}

async fn run_writer(
    mut rx: mpsc::Receiver<Command>,
    sink: Arc<dyn AuditSink>,
    counters: Arc<Counters>,
    write_timeout: Duration,
    retry_capacity: usize,
) {
    let mut pending: VecDeque<AuditRecord> = VecDeque::new();

    loop {
        let command = if pending.is_empty() {
            rx.recv().await
        } else {
            match tokio::time::timeout(RETRY_INTERVAL, rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    drain(&mut pending, sink.as_ref(), &counters, write_timeout).await;
                    continue;
                }
            }
        };

        match command {
            Some(Command::Append(record)) => {
                pending.push_back(record);
                drain(&mut pending, sink.as_ref(), &counters, write_timeout).await;
                shed_overflow(&mut pending, &counters, retry_capacity);
            }
            Some(Command::Flush(done)) => {
                drain(&mut pending, sink.as_ref(), &counters, write_timeout).await;
                let _ = done.send(());
            }
            None => break,
        }
    }

    drain(&mut pending, sink.as_ref(), &counters, write_timeout).await;
    if !pending.is_empty() {
        error!(lost = pending.len(), "audit writer stopped with undelivered entries");
    }
    debug!("audit writer stopped");
}

/// Append buffered records in order until the sink refuses one.
async fn drain(
    pending: &mut VecDeque<AuditRecord>,
    sink: &dyn AuditSink,
    counters: &Counters,
    write_timeout: Duration,
) {
    while let Some(record) = pending.front() {
        let seq = record.seq;
        let result = tokio::time::timeout(write_timeout, sink.append(record)).await;
        match result {
            Ok(Ok(())) => {
                pending.pop_front();
            }
            Ok(Err(e)) => {
                counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                error!(seq, error = %e, "audit sink write failed");
                break;
            }
            Err(_) => {
                counters.sink_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    seq,
                    timeout_ms = write_timeout.as_millis() as u64,
                    "audit sink write timed out"
                );
                break;
            }
        }
    }
    counters.buffered.store(pending.len() as u64, Ordering::Relaxed);
}

fn shed_overflow(pending: &mut VecDeque<AuditRecord>, counters: &Counters, capacity: usize) {
    let excess = pending.len().saturating_sub(capacity);
    if excess == 0 {
        return;
    }
    pending.drain(..excess);
    counters.dropped.fetch_add(excess as u64, Ordering::Relaxed);
    counters.buffered.store(pending.len() as u64, Ordering::Relaxed);
    warn!(dropped = excess, "audit retry buffer full; oldest entries dropped");
}
