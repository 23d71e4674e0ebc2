//! Analysis session - the Consumer in our Producer-Consumer architecture.
//!
//! Producers on any thread hand pair records to [`RunningSession::collect`].
//! A single named worker thread drains the bounded queue in FIFO order,
//! scores each pair and passes the resulting upsert directive to the
//! analyzed callback. [`RunningSession::close`] drains the queue, joins the
//! worker and fires the closed callback exactly once.
//!
//! ```text
//! ┌────────────┐  collect   ┌─────────────┐  BulkChanges  ┌──────────┐
//! │ producers  │──────────> │   worker    │─────────────> │   sink   │
//! │ (threads)  │  bounded   │ (1 thread)  │   analyzed    │          │
//! └────────────┘   mpsc     └─────────────┘               └──────────┘
//! ```
//!
//! `collect` uses `blocking_send`, so it must not be called from inside an
//! async runtime; wrap it in `spawn_blocking` there.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::analyzer::{score_timestamps, TimeWindow};
use crate::error::SessionError;
use crate::input::PairInput;
use crate::metrics::{Metrics, SharedMetrics};
use crate::persist::{single_change, BulkChange, BulkChanges, DEFAULT_BEACON_PROXY_TABLE};

type AnalyzedCallback = Box<dyn FnMut(BulkChanges) + Send>;
type ClosedCallback = Box<dyn FnOnce() + Send>;

/// Configuration for one analysis session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bounds of the whole dataset, used for the connection rate term.
    pub window: TimeWindow,
    /// Chunk id stamped on every result (0 if not a rolling analysis).
    pub chunk: i32,
    /// Destination table for the upsert directives.
    pub table: String,
    /// Queue slots between producers and the worker.
    pub channel_capacity: usize,
}

impl SessionSettings {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            window,
            chunk: 0,
            table: DEFAULT_BEACON_PROXY_TABLE.to_string(),
            channel_capacity: 1,
        }
    }

    pub fn with_chunk(mut self, chunk: i32) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// A session that has not been started yet.
pub struct AnalysisSession {
    settings: SessionSettings,
    analyzed: AnalyzedCallback,
    closed: ClosedCallback,
    metrics: SharedMetrics,
}

impl AnalysisSession {
    pub fn new<A, C>(settings: SessionSettings, analyzed: A, closed: C) -> Self
    where
        A: FnMut(BulkChanges) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self {
            settings,
            analyzed: Box::new(analyzed),
            closed: Box::new(closed),
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Replaces the session's metrics with a shared handle.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Spawns the worker thread and returns the handle producers feed.
    pub fn start(self) -> Result<RunningSession, SessionError> {
        if self.settings.channel_capacity == 0 {
            return Err(SessionError::ZeroCapacity);
        }

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity);
        let worker = Worker {
            window: self.settings.window,
            chunk: self.settings.chunk,
            table: self.settings.table,
            analyzed: self.analyzed,
            metrics: Arc::clone(&self.metrics),
        };

        let handle = thread::Builder::new()
            .name("beacon-proxy-analyzer".into())
            .spawn(move || worker.run(rx))?;

        info!(
            "Analysis session started, chunk: {}, capacity: {}",
            self.settings.chunk, self.settings.channel_capacity
        );

        Ok(RunningSession {
            tx,
            handle,
            // Mutex only makes the session shareable across producer threads;
            // close() consumes self and is the single reader.
            closed: Mutex::new(self.closed),
            metrics: self.metrics,
        })
    }
}

/// Summary returned by [`RunningSession::close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub pairs_analyzed: u64,
}

/// A started session. Share it by reference between producer threads.
pub struct RunningSession {
    tx: mpsc::Sender<PairInput>,
    handle: JoinHandle<u64>,
    closed: Mutex<ClosedCallback>,
    metrics: SharedMetrics,
}

impl RunningSession {
    /// Queues one pair, blocking while the queue is full.
    pub fn collect(&self, input: PairInput) -> Result<(), SessionError> {
        trace!("Collecting pair {}", input.hosts);
        self.tx
            .blocking_send(input)
            .map(|()| self.metrics.inc_collected())
            .map_err(|_| SessionError::WorkerGone)
    }

    pub fn metrics(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    /// Stops accepting input, waits for every queued pair to be delivered,
    /// then invokes the closed callback.
    pub fn close(self) -> Result<SessionReport, SessionError> {
        let Self {
            tx, handle, closed, ..
        } = self;

        drop(tx);
        let pairs_analyzed = handle.join().map_err(|_| SessionError::WorkerPanicked)?;

        let closed = closed.into_inner().unwrap_or_else(PoisonError::into_inner);
        closed();

        info!("Analysis session closed, {} pairs analyzed", pairs_analyzed);
        Ok(SessionReport { pairs_analyzed })
    }
}

/// State owned by the worker thread.
struct Worker {
    window: TimeWindow,
    chunk: i32,
    table: String,
    analyzed: AnalyzedCallback,
    metrics: SharedMetrics,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::Receiver<PairInput>) -> u64 {
        let mut processed = 0;

        while let Some(input) = rx.blocking_recv() {
            let changes = self.analyze(input);
            (self.analyzed)(changes);
            processed += 1;
        }

        debug!("Analysis queue drained after {} pairs", processed);
        processed
    }

    fn analyze(&self, input: PairInput) -> BulkChanges {
        let score = score_timestamps(&input.ts_list, input.connection_count, self.window);
        self.metrics.record_score(score.score);

        trace!("Scored {}: {:.3}", input.hosts, score.score);

        let change = BulkChange::for_pair(input, score, self.chunk);
        single_change(&self.table, change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::tests::pair;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn window() -> TimeWindow {
        TimeWindow::new(0, 3600)
    }

    /// Session whose sink records every directive and the count seen at close.
    fn recording_session(
        settings: SessionSettings,
    ) -> (AnalysisSession, Arc<Mutex<Vec<BulkChanges>>>, Arc<Mutex<Vec<usize>>>) {
        let results = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&results);
        let seen = Arc::clone(&results);
        let closed = Arc::clone(&closes);

        let session = AnalysisSession::new(
            settings,
            move |changes| sink.lock().unwrap().push(changes),
            move || {
                let delivered = seen.lock().unwrap().len();
                closed.lock().unwrap().push(delivered);
            },
        );

        (session, results, closes)
    }

    fn only_change(changes: &BulkChanges, table: &str) -> BulkChange {
        assert_eq!(changes.len(), 1);
        let list = &changes[table];
        assert_eq!(list.len(), 1);
        list[0].clone()
    }

    #[test]
    fn test_empty_session_closes_once() {
        let analyzed = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&analyzed);
        let c = Arc::clone(&closed);

        let session = AnalysisSession::new(
            SessionSettings::new(window()),
            move |_| {
                a.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );

        let report = session.start().unwrap().close().unwrap();

        assert_eq!(report.pairs_analyzed, 0);
        assert_eq!(analyzed.load(Ordering::SeqCst), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_pair_end_to_end() {
        let settings = SessionSettings::new(window()).with_chunk(7).with_table("proxyBeacons");
        let (session, results, closes) = recording_session(settings);

        let running = session.start().unwrap();
        running
            .collect(pair("192.168.1.5", "c2.example", vec![0, 10, 20, 30], 4))
            .unwrap();
        let report = running.close().unwrap();

        assert_eq!(report.pairs_analyzed, 1);
        assert_eq!(*closes.lock().unwrap(), vec![1]);

        let results = results.lock().unwrap();
        let change = only_change(&results[0], "proxyBeacons");
        assert!(change.upsert);
        assert_eq!(change.selector.fqdn, "c2.example");
        assert_eq!(change.update.set.cid, 7);
        assert_eq!(change.update.set.score, 1.0);
        assert_eq!(change.update.set.ts_score, 1.0);
        assert_eq!(change.update.set.ts_mode, 10);
        assert_eq!(change.update.set.ts_mode_count, 3);
    }

    #[test]
    fn test_results_follow_enqueue_order() {
        let (session, results, _) = recording_session(SessionSettings::new(window()));
        let running = session.start().unwrap();

        for i in 0..20 {
            let fqdn = format!("host{}.example", i);
            running
                .collect(pair("10.1.1.1", &fqdn, vec![0, 60, 120, 180], i + 3))
                .unwrap();
        }
        running.close().unwrap();

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 20);
        for (i, changes) in results.iter().enumerate() {
            let change = only_change(changes, DEFAULT_BEACON_PROXY_TABLE);
            assert_eq!(change.selector.fqdn, format!("host{}.example", i));
            assert_eq!(change.update.set.connection_count, i as i64 + 3);
        }
    }

    #[test]
    fn test_concurrent_producers() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 50;

        let settings = SessionSettings::new(window()).with_channel_capacity(2);
        let (session, results, closes) = recording_session(settings);
        let running = session.start().unwrap();

        thread::scope(|scope| {
            for p in 0..PRODUCERS {
                let running = &running;
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let src = format!("10.0.{}.{}", p, i);
                        let count = (p * 1000 + i) as i64;
                        running
                            .collect(pair(&src, "proxy.example", vec![0, 30, 60, 90], count))
                            .unwrap();
                    }
                });
            }
        });

        let metrics = running.metrics();
        let report = running.close().unwrap();
        let total = PRODUCERS * PER_PRODUCER;

        assert_eq!(report.pairs_analyzed, total as u64);
        assert_eq!(*closes.lock().unwrap(), vec![total]);
        assert_eq!(metrics.pairs_collected.load(Ordering::Relaxed), total as u64);
        assert_eq!(metrics.pairs_analyzed.load(Ordering::Relaxed), total as u64);

        // Each producer's items arrive exactly once and in its own send order
        let results = results.lock().unwrap();
        let mut next = [0usize; PRODUCERS];
        for changes in results.iter() {
            let change = only_change(changes, DEFAULT_BEACON_PROXY_TABLE);
            let count = change.update.set.connection_count as usize;
            let (p, i) = (count / 1000, count % 1000);

            assert_eq!(i, next[p]);
            assert_eq!(change.selector.src.to_string(), format!("10.0.{}.{}", p, i));
            next[p] += 1;
        }
        assert_eq!(next, [PER_PRODUCER; PRODUCERS]);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let settings = SessionSettings::new(window()).with_channel_capacity(0);
        let session = AnalysisSession::new(settings, |_| {}, || {});

        assert!(matches!(session.start(), Err(SessionError::ZeroCapacity)));
    }

    #[test]
    fn test_shared_metrics_handle() {
        let metrics = Arc::new(Metrics::new(0.9));
        let session = AnalysisSession::new(SessionSettings::new(window()), |_| {}, || {})
            .with_metrics(Arc::clone(&metrics));

        let running = session.start().unwrap();
        running
            .collect(pair("10.0.0.1", "a.example", vec![0, 10, 20, 30], 4))
            .unwrap();
        running
            .collect(pair("10.0.0.2", "b.example", vec![0, 1, 3, 6, 15, 25], 1))
            .unwrap();
        running.close().unwrap();

        assert_eq!(metrics.pairs_collected.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.pairs_analyzed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.pairs_flagged.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_worker_panic_reported() {
        let closed = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&closed);

        let session = AnalysisSession::new(
            SessionSettings::new(window()),
            |_| panic!("sink failure"),
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );

        let running = session.start().unwrap();
        running
            .collect(pair("10.0.0.1", "a.example", vec![0, 10, 20], 3))
            .unwrap();

        assert!(matches!(running.close(), Err(SessionError::WorkerPanicked)));
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_collect_after_worker_died_is_not_counted() {
        let session = AnalysisSession::new(
            SessionSettings::new(window()),
            |_| panic!("sink failure"),
            || {},
        );
        let running = session.start().unwrap();
        let metrics = running.metrics();

        // Keep feeding until the dead worker's receiver is dropped
        let mut queued = 0u64;
        loop {
            match running.collect(pair("10.0.0.1", "a.example", vec![0, 10, 20], 3)) {
                Ok(()) => queued += 1,
                Err(SessionError::WorkerGone) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert!(queued >= 1);
        assert_eq!(metrics.pairs_collected.load(Ordering::Relaxed), queued);
        assert!(matches!(running.close(), Err(SessionError::WorkerPanicked)));
    }
}
