//! Pipeline executor: the serializing core of the block execution pipeline.
//!
//! The executor owns all mutable pipeline state (pending buffer, request
//! queue, live converter session) behind a single mutex, and one drain
//! worker task per converter session that moves records from the session
//! stream into the buffer.
//!
//! ```text
//! Converter ──channel──▶ drain worker ──▶ RecordBuffer ──▶ finalize ──▶ TransactionLog
//!                            │                 ▲
//!                            ▼                 │ lookback window
//!                      RequestQueue ──callbacks──▶ consumers
//! ```
//!
//! Consumer callbacks always run outside the critical section; every path
//! that completes a request first removes its entry under the lock, which
//! is what makes the exactly-once callback guarantee hold.
//!
//! A rebase (initial start or `sync_transactions`) supersedes the current
//! session: the old worker is canceled through a oneshot and additionally
//! guarded by a generation counter, so a superseded worker can never touch
//! state again. Dropping the old stream receiver closes the channel toward
//! the converter.

use crate::buffer::RecordBuffer;
use crate::config::PipelineConfig;
use crate::converter::{BlockConverter, ConverterError, ConverterStream, OPEN_STREAM};
use crate::error::PipelineError;
use crate::metrics;
use crate::requests::{RequestEntry, RequestQueue, TransactionCallback};
use blockflow_storage::TransactionLog;
use blockflow_types::BlockTransaction;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, info, trace, warn};

/// A request completion ready to be delivered outside the lock.
type Completion = (
    TransactionCallback,
    Result<Vec<BlockTransaction>, PipelineError>,
);

/// Executor lifecycle. Transitions are one-way.
enum Lifecycle {
    Initial,
    Running,
    Terminated,
}

/// Handle to the live converter session.
struct SessionHandle {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

/// Mutable pipeline state, guarded by the executor mutex.
struct State {
    lifecycle: Lifecycle,
    /// Highest height persisted to the durable log, `-1` when none.
    last_finalized: i64,
    buffer: RecordBuffer,
    /// Recently finalized records still servable to `get_transactions`,
    /// oldest first. Bounded by the configured lookback.
    retained: VecDeque<BlockTransaction>,
    requests: RequestQueue,
    session: Option<SessionHandle>,
    /// Monotonic session counter; workers from superseded generations
    /// must not touch state.
    generation: u64,
    next_request_id: u64,
}

impl State {
    fn ensure_running(&self) -> Result<(), PipelineError> {
        match self.lifecycle {
            Lifecycle::Running => Ok(()),
            Lifecycle::Initial => Err(PipelineError::NotRunning),
            Lifecycle::Terminated => Err(PipelineError::Terminated),
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        matches!(self.lifecycle, Lifecycle::Running)
            && self
                .session
                .as_ref()
                .is_some_and(|session| session.generation == generation)
    }

    /// Lowest height still servable from memory.
    fn retained_floor(&self) -> i64 {
        self.last_finalized + 1 - self.retained.len() as i64
    }

    /// Whether `[from, to]` is fully covered by the retained window plus
    /// the pending buffer.
    fn range_available(&self, from: i64, to: i64) -> bool {
        from <= to && from >= self.retained_floor() && to < self.buffer.next_height()
    }

    /// Clone the records for `[from, to]`. Requires
    /// [`range_available`](Self::range_available).
    fn collect_range(&self, from: i64, to: i64) -> Vec<BlockTransaction> {
        let mut out = Vec::with_capacity((to - from + 1) as usize);
        let floor = self.retained_floor();
        let retained_end = to.min(self.last_finalized);
        for height in from..=retained_end {
            out.push(self.retained[(height - floor) as usize].clone());
        }
        if to > self.last_finalized {
            let start = from.max(self.last_finalized + 1);
            out.extend(self.buffer.slice(start, to));
        }
        out
    }

    /// Remove every request whose range is now fully covered and pair it
    /// with its slice.
    fn take_fulfillable(&mut self) -> Vec<Completion> {
        if self.requests.is_empty() {
            return Vec::new();
        }
        let floor = self.retained_floor();
        let next = self.buffer.next_height();
        let ready = self
            .requests
            .take_where(|entry| entry.from >= floor && entry.to < next);
        ready
            .into_iter()
            .map(|entry| {
                let slice = self.collect_range(entry.from, entry.to);
                (entry.callback, Ok(slice))
            })
            .collect()
    }
}

/// Shared pipeline internals.
struct Inner {
    config: PipelineConfig,
    converter: Arc<dyn BlockConverter>,
    log: Arc<dyn TransactionLog>,
    /// Signaled by finalization when buffer space is freed.
    space_freed: Notify,
    /// Set when the executor handle is dropped, so a drain worker parked
    /// on backpressure does not keep the internals alive forever.
    orphaned: AtomicBool,
    state: Mutex<State>,
}

/// The pipeline executor.
///
/// Cheap to share: the public operations take `&self` and serialize on the
/// internal mutex. See the module docs for the concurrency model.
pub struct Executor {
    inner: Arc<Inner>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // `term` is the orderly shutdown; this releases a drain worker
        // parked on backpressure when the handle is dropped without it.
        self.inner.orphaned.store(true, Ordering::Release);
        self.inner.space_freed.notify_waiters();
    }
}

impl Executor {
    /// Create an executor over the given converter and durable log.
    ///
    /// The executor is inert until [`start`](Self::start).
    pub fn new(
        converter: Arc<dyn BlockConverter>,
        log: Arc<dyn TransactionLog>,
        config: PipelineConfig,
    ) -> Self {
        let state = State {
            lifecycle: Lifecycle::Initial,
            last_finalized: -1,
            buffer: RecordBuffer::new(0, config.buffer_capacity),
            retained: VecDeque::new(),
            requests: RequestQueue::new(),
            session: None,
            generation: 0,
            next_request_id: 0,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                converter,
                log,
                space_freed: Notify::new(),
                orphaned: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
        }
    }

    /// Start the pipeline: recover the finalized watermark from the log,
    /// open the initial converter session at `last_finalized + 1`, and
    /// spawn the drain worker.
    pub async fn start(&self) -> Result<(), PipelineError> {
        let mut state = self.inner.state.lock().await;
        match state.lifecycle {
            Lifecycle::Initial => {}
            Lifecycle::Running => return Err(PipelineError::AlreadyRunning),
            Lifecycle::Terminated => return Err(PipelineError::Terminated),
        }

        let last_finalized = self.inner.log.last_contiguous()?;
        let base = last_finalized + 1;
        let stream = self.inner.converter.rebase(base, OPEN_STREAM, Vec::new())?;

        state.last_finalized = last_finalized;
        state.buffer = RecordBuffer::new(base, self.inner.config.buffer_capacity);
        state.lifecycle = Lifecycle::Running;
        self.install_session(&mut state, stream);

        info!(last_finalized, "pipeline executor started");
        Ok(())
    }

    /// Request the records for heights `[from, to]`.
    ///
    /// Resolves immediately when the range is already covered; otherwise the
    /// callback fires once the drain worker covers it, or with an error on
    /// cancellation, termination, a prefix change, or a session failure.
    /// The callback is invoked exactly once, never under the executor lock.
    ///
    /// Registering a request fails any older pending request whose range
    /// overlaps this one and extends past its `to` with
    /// [`PipelineError::PrefixChanged`]: the consumer has moved on to a
    /// shorter continuation.
    pub async fn get_transactions<F>(
        &self,
        from: i64,
        to: i64,
        callback: F,
    ) -> Result<Canceler, PipelineError>
    where
        F: FnOnce(Result<Vec<BlockTransaction>, PipelineError>) + Send + 'static,
    {
        let mut completions: Vec<Completion> = Vec::new();
        let id;
        {
            let mut state = self.inner.state.lock().await;
            state.ensure_running()?;
            if from < 0 || from > to.saturating_add(1) {
                return Err(PipelineError::InvalidRange { from, to });
            }
            if from < state.retained_floor() {
                // Below the lookback window: finalized history we no
                // longer serve.
                return Err(PipelineError::InvalidRange { from, to });
            }

            id = state.next_request_id;
            state.next_request_id += 1;

            let superseded = state
                .requests
                .take_where(|entry| entry.from <= to && from <= entry.to && entry.to > to);
            if !superseded.is_empty() {
                debug!(
                    count = superseded.len(),
                    from, to, "superseding older overlapping requests"
                );
                completions.extend(fail_entries(superseded, &PipelineError::PrefixChanged));
            }

            if to.checked_add(1) == Some(from) {
                completions.push((Box::new(callback), Ok(Vec::new())));
            } else if state.range_available(from, to) {
                trace!(from, to, "request served immediately");
                let slice = state.collect_range(from, to);
                completions.push((Box::new(callback), Ok(slice)));
            } else {
                trace!(from, to, id, "request queued");
                state.requests.push(RequestEntry {
                    id,
                    from,
                    to,
                    callback: Box::new(callback),
                });
            }
            metrics::set_pending_requests(state.requests.len());
        }
        deliver(completions);
        Ok(Canceler {
            inner: Arc::downgrade(&self.inner),
            id,
        })
    }

    /// Return the buffer prefix starting at `last_finalized + 1`, up to
    /// `propose_max` records. Never blocks; empty when nothing is ready.
    pub async fn propose_transactions(&self) -> Result<Vec<BlockTransaction>, PipelineError> {
        let state = self.inner.state.lock().await;
        state.ensure_running()?;
        let proposal = state.buffer.prefix(self.inner.config.propose_max);
        debug!(
            count = proposal.len(),
            base = state.buffer.base(),
            "proposal assembled"
        );
        Ok(proposal)
    }

    /// Persist the buffered records up to and including `to_height` and
    /// advance the finalized watermark.
    ///
    /// On a log failure the operation aborts with no in-memory mutation.
    pub async fn finalize_transactions(&self, to_height: i64) -> Result<(), PipelineError> {
        let mut completions = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            state.ensure_running()?;
            if to_height <= state.last_finalized
                || !state.buffer.covers(state.buffer.base(), to_height)
            {
                return Err(PipelineError::InvalidRange {
                    from: state.last_finalized + 1,
                    to: to_height,
                });
            }

            // Persist first; memory is untouched if any append fails.
            for record in state.buffer.iter_through(to_height) {
                self.inner.log.append(record)?;
            }

            let finalized = state.buffer.drain_through(to_height);
            let count = finalized.len();
            state.last_finalized = to_height;

            state.retained.extend(finalized);
            let lookback = self.inner.config.lookback.max(0) as usize;
            while state.retained.len() > lookback {
                state.retained.pop_front();
            }

            if let Some(retention) = self.inner.config.log_retention {
                let keep = retention.max(self.inner.config.lookback).max(0);
                let floor = to_height + 1 - keep;
                if floor > 0 {
                    // Best effort: the finalized records are already durable.
                    if let Err(error) = self.inner.log.prune_below(floor) {
                        warn!(%error, floor, "durable log prune failed");
                    }
                }
            }

            // A pending request below the new floor can never be served;
            // complete it rather than letting it hang.
            let floor = state.retained_floor();
            let stale = state.requests.take_where(|entry| entry.from < floor);
            completions.extend(fail_entries(stale, &PipelineError::PrefixChanged));

            metrics::record_finalized(count, to_height, state.buffer.len());
            metrics::set_pending_requests(state.requests.len());
            self.inner.space_freed.notify_waiters();
            info!(height = to_height, count, "finalized transactions");
        }
        deliver(completions);
        Ok(())
    }

    /// Adopt `prefix` as the authoritative continuation at
    /// `last_finalized + 1`.
    ///
    /// A byte-equal prefix is a no-op. Otherwise the live session is
    /// canceled, the buffer is replaced with the prefix, the converter is
    /// rebased onto it, and every pending request that overlapped the
    /// replaced range fails with [`PipelineError::PrefixChanged`]. Does not
    /// return before the new drain worker is installed.
    pub async fn sync_transactions(
        &self,
        prefix: &[BlockTransaction],
    ) -> Result<(), PipelineError> {
        let mut completions = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            state.ensure_running()?;

            let base = state.last_finalized + 1;
            for (i, record) in prefix.iter().enumerate() {
                if record.height != base + i as i64 {
                    return Err(PipelineError::InvalidRange {
                        from: base,
                        to: record.height,
                    });
                }
            }

            if state.buffer.starts_with(prefix) {
                debug!(len = prefix.len(), "sync prefix already matches buffer");
                return Ok(());
            }

            info!(base, len = prefix.len(), "rebasing onto new prefix");

            if let Some(session) = state.session.take() {
                let _ = session.cancel.send(());
            }

            let invalidated_below = state.buffer.next_height();
            state.buffer.reset(base, prefix.to_vec());

            let stream = self
                .inner
                .converter
                .rebase(base, OPEN_STREAM, prefix.to_vec())?;
            self.install_session(&mut state, stream);

            let stale = state
                .requests
                .take_where(|entry| entry.from < invalidated_below);
            completions.extend(fail_entries(stale, &PipelineError::PrefixChanged));

            // Forward-looking requests may already be answerable from the
            // adopted prefix.
            completions.extend(state.take_fulfillable());

            metrics::set_pending_requests(state.requests.len());
            self.inner.space_freed.notify_waiters();
        }
        deliver(completions);
        Ok(())
    }

    /// Terminate the pipeline: cancel the session and fail every
    /// outstanding request with [`PipelineError::Terminated`]. Idempotent;
    /// all later operations fail.
    pub async fn term(&self) {
        let completions;
        {
            let mut state = self.inner.state.lock().await;
            if matches!(state.lifecycle, Lifecycle::Terminated) {
                return;
            }
            let was_running = matches!(state.lifecycle, Lifecycle::Running);
            state.lifecycle = Lifecycle::Terminated;
            if let Some(session) = state.session.take() {
                let _ = session.cancel.send(());
            }
            let outstanding = state.requests.drain();
            completions = fail_entries(outstanding, &PipelineError::Terminated);
            metrics::set_pending_requests(0);
            self.inner.space_freed.notify_waiters();
            if was_running {
                info!("pipeline executor terminated");
            }
        }
        deliver(completions);
    }

    fn install_session(&self, state: &mut State, stream: ConverterStream) {
        state.generation += 1;
        let generation = state.generation;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.session = Some(SessionHandle {
            generation,
            cancel: cancel_tx,
        });
        metrics::record_rebase();
        tokio::spawn(drain_loop(
            Arc::downgrade(&self.inner),
            generation,
            stream,
            cancel_rx,
        ));
    }
}

/// Cancels one `get_transactions` request.
///
/// Idempotent: if the request's callback already fired (with data or any
/// error), canceling is a no-op. Otherwise the callback fires with
/// [`PipelineError::Canceled`].
pub struct Canceler {
    inner: Weak<Inner>,
    id: u64,
}

impl fmt::Debug for Canceler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceler").field("id", &self.id).finish()
    }
}

impl Canceler {
    /// Cancel the request.
    pub async fn cancel(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let entry = {
            let mut state = inner.state.lock().await;
            let entry = state.requests.take_by_id(self.id);
            metrics::set_pending_requests(state.requests.len());
            entry
        };
        if let Some(entry) = entry {
            debug!(id = entry.id, from = entry.from, to = entry.to, "request canceled");
            deliver(vec![(entry.callback, Err(PipelineError::Canceled))]);
        }
    }
}

/// Drain worker: sole reader of one converter session stream and sole
/// forward-extender of the buffer.
///
/// Backpressure is applied by not reading: while the buffer is full the
/// worker leaves the stream untouched, so the converter blocks on send
/// until finalization frees space.
async fn drain_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut stream: ConverterStream,
    mut cancel: oneshot::Receiver<()>,
) {
    trace!(generation, "drain worker started");
    loop {
        {
            let Some(executor) = inner.upgrade() else {
                return;
            };
            if !wait_for_space(&executor, generation, &mut cancel).await {
                return;
            }
        }

        let item = tokio::select! {
            biased;
            _ = &mut cancel => {
                trace!(generation, "converter session canceled");
                return;
            }
            item = stream.recv() => item,
        };
        let Some(executor) = inner.upgrade() else {
            return;
        };
        match item {
            Some(Ok(record)) => {
                if !append_record(&executor, generation, record).await {
                    return;
                }
            }
            Some(Err(error)) => {
                fail_session(&executor, generation, error).await;
                return;
            }
            None => {
                // Closed without an error before the stream was complete.
                fail_session(&executor, generation, ConverterError::Closed).await;
                return;
            }
        }
    }
}

/// Wait until the buffer has room for the next record. Returns `false`
/// when the worker must exit instead.
async fn wait_for_space(
    inner: &Arc<Inner>,
    generation: u64,
    cancel: &mut oneshot::Receiver<()>,
) -> bool {
    loop {
        let space = inner.space_freed.notified();
        tokio::pin!(space);
        space.as_mut().enable();

        {
            let state = inner.state.lock().await;
            if !state.is_live(generation) || inner.orphaned.load(Ordering::Acquire) {
                return false;
            }
            if !state.buffer.is_full() {
                return true;
            }
        }

        tokio::select! {
            biased;
            _ = &mut *cancel => return false,
            _ = &mut space => {}
        }
    }
}

/// Append one drained record and resolve newly covered requests. Returns
/// `false` when the worker must exit.
///
/// Only this worker extends the buffer, so the room checked by
/// [`wait_for_space`] is still there; a rebase in between changes the
/// generation and is caught by the liveness check.
async fn append_record(inner: &Arc<Inner>, generation: u64, record: BlockTransaction) -> bool {
    let mut state = inner.state.lock().await;
    if !state.is_live(generation) {
        return false;
    }

    let expected = state.buffer.next_height();
    if record.height != expected {
        let outstanding = state.requests.drain();
        state.session = None;
        metrics::set_pending_requests(0);
        drop(state);
        warn!(
            expected,
            actual = record.height,
            "converter protocol violation; session failed"
        );
        metrics::record_converter_failure();
        let error = PipelineError::ConverterProtocol {
            expected,
            actual: record.height,
        };
        deliver(fail_entries(outstanding, &error));
        return false;
    }

    trace!(height = record.height, "record drained");
    state.buffer.push(record);
    metrics::record_drained(state.buffer.len());
    let completions = state.take_fulfillable();
    metrics::set_pending_requests(state.requests.len());
    drop(state);
    deliver(completions);
    true
}

/// Fail the session of `generation`: drop the session handle and complete
/// every outstanding request with the converter failure.
async fn fail_session(inner: &Arc<Inner>, generation: u64, error: ConverterError) {
    let outstanding = {
        let mut state = inner.state.lock().await;
        if !state.is_live(generation) {
            return;
        }
        state.session = None;
        metrics::set_pending_requests(0);
        state.requests.drain()
    };
    warn!(%error, failed = outstanding.len(), "converter session ended");
    metrics::record_converter_failure();
    deliver(fail_entries(outstanding, &PipelineError::Converter(error)));
}

fn fail_entries(entries: Vec<RequestEntry>, error: &PipelineError) -> Vec<Completion> {
    entries
        .into_iter()
        .map(|entry| (entry.callback, Err(error.clone())))
        .collect()
}

/// Invoke completions outside the critical section.
fn deliver(completions: Vec<Completion>) {
    let mut completed = 0usize;
    let mut failed = 0usize;
    for (callback, result) in completions {
        match &result {
            Ok(_) => completed += 1,
            Err(_) => failed += 1,
        }
        callback(result);
    }
    if completed > 0 {
        metrics::record_requests_completed(completed);
    }
    if failed > 0 {
        metrics::record_requests_failed(failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_storage::MemoryLog;
    use tokio::sync::mpsc;

    /// Converter stub that opens sessions nobody ever feeds.
    #[derive(Default)]
    struct IdleConverter {
        senders: std::sync::Mutex<Vec<mpsc::Sender<crate::converter::ConverterItem>>>,
    }

    impl BlockConverter for IdleConverter {
        fn rebase(
            &self,
            _from: i64,
            _to: i64,
            _prefix: Vec<BlockTransaction>,
        ) -> Result<ConverterStream, ConverterError> {
            let (tx, rx) = mpsc::channel(1);
            // Keep the sender alive so the stream stays open.
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    fn idle_executor() -> Executor {
        Executor::new(
            Arc::new(IdleConverter::default()),
            Arc::new(MemoryLog::new()),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn operations_require_start() {
        let executor = idle_executor();
        assert!(matches!(
            executor.propose_transactions().await,
            Err(PipelineError::NotRunning)
        ));
        assert!(matches!(
            executor.finalize_transactions(0).await,
            Err(PipelineError::NotRunning)
        ));
        assert!(matches!(
            executor.get_transactions(0, 4, |_| {}).await,
            Err(PipelineError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn start_is_not_reentrant() {
        let executor = idle_executor();
        executor.start().await.unwrap();
        assert!(matches!(
            executor.start().await,
            Err(PipelineError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn term_is_one_way_and_idempotent() {
        let executor = idle_executor();
        executor.start().await.unwrap();
        executor.term().await;
        executor.term().await;
        assert!(matches!(
            executor.start().await,
            Err(PipelineError::Terminated)
        ));
        assert!(matches!(
            executor.propose_transactions().await,
            Err(PipelineError::Terminated)
        ));
    }

    #[tokio::test]
    async fn rejects_malformed_ranges() {
        let executor = idle_executor();
        executor.start().await.unwrap();
        assert!(matches!(
            executor.get_transactions(5, 3, |_| {}).await,
            Err(PipelineError::InvalidRange { .. })
        ));
        assert!(matches!(
            executor.get_transactions(-1, 3, |_| {}).await,
            Err(PipelineError::InvalidRange { .. })
        ));
    }

    #[tokio::test]
    async fn empty_range_resolves_immediately() {
        let executor = idle_executor();
        executor.start().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        executor
            .get_transactions(5, 4, move |result| {
                tx.send(result).ok();
            })
            .await
            .unwrap();
        let result = rx.recv().await.unwrap();
        assert_eq!(result.unwrap(), Vec::<BlockTransaction>::new());
    }
}
