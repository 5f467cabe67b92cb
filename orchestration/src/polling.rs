//! Polling Engine: client-side job tracking with adaptive backoff
//!
//! One spawned task per polled job:
//!
//! ```text
//! loop {
//!     wait current_interval      (restarted from zero after resume)
//!     query job status
//!       ├─ completed  → on_complete, stop
//!       ├─ error      → on_error, stop      (never retried here)
//!       └─ processing → on_progress, interval = min(interval × factor, max)
//! }
//! global deadline (max_total_time) → on_error("polling timeout exceeded"), stop
//! stop()                          → no callback, stop
//! update_strategy()               → new schedule, wait restarts at its initial interval
//! ```
//!
//! Stopping or pausing only prevents future polls; a status query already in
//! flight is dropped, and chunks running on the server are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::error::{ProcessingError, ProcessingResult};
use crate::jobs::JobSnapshot;
use crate::resilience::ExponentialBackoff;

/// Anything that can answer a job status query
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn job_status(&self, job_id: &str) -> ProcessingResult<JobSnapshot>;
}

/// Named polling schedules, chosen by expected job size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStrategy {
    Immediate,
    #[default]
    Normal,
    Background,
}

impl PollStrategy {
    /// 1–2 chunks poll eagerly, up to 5 normally, larger jobs in the background.
    pub fn for_chunk_count(total_chunks: usize) -> Self {
        match total_chunks {
            0..=2 => Self::Immediate,
            3..=5 => Self::Normal,
            _ => Self::Background,
        }
    }

    pub fn schedule(&self, config: &PollingConfig) -> ExponentialBackoff {
        match self {
            Self::Immediate => config.immediate,
            Self::Normal => config.normal,
            Self::Background => config.background,
        }
    }
}

impl std::fmt::Display for PollStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Normal => write!(f, "normal"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// Summary passed with terminal callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub job_id: String,
    pub poll_count: u32,
    pub elapsed: Duration,
}

/// Receives polling events. Terminal callbacks fire at most once per poll
/// session, and never after `stop`.
pub trait PollObserver: Send + Sync {
    fn on_progress(&self, _snapshot: &JobSnapshot, _poll_count: u32) {}

    fn on_complete(&self, snapshot: JobSnapshot, report: PollReport);

    fn on_error(&self, error: ProcessingError, report: PollReport);
}

/// Options for [`PollingEngine::start_polling`]
#[derive(Clone)]
pub struct PollOptions {
    pub strategy: PollStrategy,
    pub observer: Arc<dyn PollObserver>,
    /// Overrides the configured global wait budget
    pub max_total_time: Option<Duration>,
}

impl PollOptions {
    pub fn new(strategy: PollStrategy, observer: Arc<dyn PollObserver>) -> Self {
        Self {
            strategy,
            observer,
            max_total_time: None,
        }
    }

    pub fn with_max_total_time(mut self, max_total_time: Duration) -> Self {
        self.max_total_time = Some(max_total_time);
        self
    }
}

/// Client-side state of one polled job
#[derive(Debug, Clone, PartialEq)]
pub struct PollState {
    pub job_id: String,
    pub strategy: PollStrategy,
    pub current_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    pub poll_count: u32,
    pub started_at: Instant,
    pub max_total_time: Duration,
    pub paused: bool,
    pub last_update: Option<Instant>,
}

impl PollState {
    fn new(job_id: &str, strategy: PollStrategy, schedule: ExponentialBackoff, max: Duration) -> Self {
        Self {
            job_id: job_id.to_string(),
            strategy,
            current_interval: schedule.initial,
            max_interval: schedule.max,
            backoff_factor: schedule.factor,
            poll_count: 0,
            started_at: Instant::now(),
            max_total_time: max,
            paused: false,
            last_update: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.current_interval, self.backoff_factor, self.max_interval)
    }

    fn report(&self) -> PollReport {
        PollReport {
            job_id: self.job_id.clone(),
            poll_count: self.poll_count,
            elapsed: self.elapsed(),
        }
    }
}

struct Poller {
    generation: u64,
    state: Arc<Mutex<PollState>>,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    reschedule: Arc<Notify>,
}

type PollerMap = Arc<Mutex<HashMap<String, Poller>>>;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum PollEnd {
    Complete(JobSnapshot),
    Failed(ProcessingError),
    Stopped,
}

/// Tracks any number of jobs, at most one poller per job id
pub struct PollingEngine {
    source: Arc<dyn JobStatusSource>,
    config: PollingConfig,
    pollers: PollerMap,
    next_generation: AtomicU64,
}

impl PollingEngine {
    pub fn new(source: Arc<dyn JobStatusSource>, config: PollingConfig) -> Self {
        Self {
            source,
            config,
            pollers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Create a shared reference to this engine
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Begin polling `job_id`. Returns `false` (and does nothing) when the
    /// job is already being polled.
    pub fn start_polling(&self, job_id: &str, options: PollOptions) -> bool {
        let mut pollers = lock(&self.pollers);
        if pollers.contains_key(job_id) {
            warn!(job_id, "Already polling job, ignoring duplicate start");
            return false;
        }

        let schedule = options.strategy.schedule(&self.config);
        let max_total_time = options
            .max_total_time
            .unwrap_or(self.config.max_total_time);
        let state = Arc::new(Mutex::new(PollState::new(
            job_id,
            options.strategy,
            schedule,
            max_total_time,
        )));
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let reschedule = Arc::new(Notify::new());
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        pollers.insert(
            job_id.to_string(),
            Poller {
                generation,
                state: Arc::clone(&state),
                cancel: cancel.clone(),
                pause: pause_tx,
                reschedule: Arc::clone(&reschedule),
            },
        );
        drop(pollers);

        info!(
            job_id,
            strategy = %options.strategy,
            initial_ms = schedule.initial.as_millis() as u64,
            "Starting polling"
        );

        tokio::spawn(run_poller(
            job_id.to_string(),
            generation,
            Arc::clone(&self.source),
            Arc::clone(&self.pollers),
            state,
            cancel,
            pause_rx,
            reschedule,
            options.observer,
        ));
        true
    }

    /// Poll until the job finishes, returning the final snapshot or the
    /// polling failure. `progress` receives intermediate snapshots.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        strategy: PollStrategy,
        progress: Option<Arc<dyn PollObserver>>,
    ) -> ProcessingResult<JobSnapshot> {
        let (tx, rx) = oneshot::channel();
        let observer = Arc::new(CompletionObserver {
            inner: progress,
            tx: Mutex::new(Some(tx)),
        });
        if !self.start_polling(job_id, PollOptions::new(strategy, observer)) {
            return Err(ProcessingError::invalid_input(format!(
                "job {job_id} is already being polled"
            )));
        }
        rx.await.unwrap_or_else(|_| {
            Err(ProcessingError::Cancelled {
                job_id: job_id.to_string(),
            })
        })
    }

    /// Stop polling a job. Idempotent; returns whether a poller was active.
    pub fn stop(&self, job_id: &str) -> bool {
        match lock(&self.pollers).remove(job_id) {
            Some(poller) => {
                poller.cancel.cancel();
                info!(job_id, "Stopped polling");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<(String, Poller)> = lock(&self.pollers).drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Stopping all polling");
        }
        for (_, poller) in drained {
            poller.cancel.cancel();
        }
    }

    /// Suspend scheduled polls, keeping the current interval.
    pub fn pause(&self, job_id: &str) -> bool {
        self.set_paused(job_id, true)
    }

    /// Resume a paused poller; the next poll fires one full interval later.
    pub fn resume(&self, job_id: &str) -> bool {
        self.set_paused(job_id, false)
    }

    fn set_paused(&self, job_id: &str, paused: bool) -> bool {
        let pollers = lock(&self.pollers);
        let Some(poller) = pollers.get(job_id) else {
            return false;
        };
        let mut state = lock(&poller.state);
        if state.paused == paused {
            return false;
        }
        state.paused = paused;
        poller.pause.send_replace(paused);
        debug!(job_id, paused, "Polling pause state changed");
        true
    }

    /// Switch an active poller to another schedule. The interval resets to
    /// the new schedule's initial value and the pending wait restarts.
    pub fn update_strategy(&self, job_id: &str, strategy: PollStrategy) -> bool {
        let pollers = lock(&self.pollers);
        let Some(poller) = pollers.get(job_id) else {
            return false;
        };
        let schedule = strategy.schedule(&self.config);
        let previous = {
            let mut state = lock(&poller.state);
            let previous = state.strategy;
            state.strategy = strategy;
            state.current_interval = schedule.initial;
            state.max_interval = schedule.max;
            state.backoff_factor = schedule.factor;
            previous
        };
        poller.reschedule.notify_one();
        info!(job_id, from = %previous, to = %strategy, "Updated polling strategy");
        true
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        lock(&self.pollers).contains_key(job_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.pollers).len()
    }

    pub fn stats(&self, job_id: &str) -> Option<PollState> {
        lock(&self.pollers)
            .get(job_id)
            .map(|poller| lock(&poller.state).clone())
    }

    pub fn active_stats(&self) -> Vec<PollState> {
        lock(&self.pollers)
            .values()
            .map(|poller| lock(&poller.state).clone())
            .collect()
    }
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Sleep for `interval`, holding while paused and restarting after resume.
async fn wait_interval(interval: Duration, pause: &mut watch::Receiver<bool>) {
    loop {
        while *pause.borrow_and_update() {
            if pause.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => return,
            changed = pause.changed() => {
                if changed.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_poller(
    job_id: String,
    generation: u64,
    source: Arc<dyn JobStatusSource>,
    pollers: PollerMap,
    state: Arc<Mutex<PollState>>,
    cancel: CancellationToken,
    mut pause: watch::Receiver<bool>,
    reschedule: Arc<Notify>,
    observer: Arc<dyn PollObserver>,
) {
    let (deadline, max_total_time) = {
        let s = lock(&state);
        (s.started_at + s.max_total_time, s.max_total_time)
    };
    let global_timeout = tokio::time::sleep_until(deadline);
    tokio::pin!(global_timeout);

    let end = loop {
        let interval = lock(&state).current_interval;

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break PollEnd::Stopped,
            _ = &mut global_timeout => break PollEnd::Failed(ProcessingError::PollingTimeout {
                job_id: job_id.clone(),
                elapsed: max_total_time,
            }),
            _ = reschedule.notified() => continue,
            polled = async {
                wait_interval(interval, &mut pause).await;
                source.job_status(&job_id).await
            } => polled,
        };

        let poll_count = {
            let mut s = lock(&state);
            s.poll_count += 1;
            s.last_update = Some(Instant::now());
            s.poll_count
        };

        match polled {
            Ok(snapshot) if snapshot.completed => break PollEnd::Complete(snapshot),
            Ok(snapshot) => {
                observer.on_progress(&snapshot, poll_count);
                let next = {
                    let mut s = lock(&state);
                    s.current_interval = s.schedule().next(s.current_interval);
                    s.current_interval
                };
                debug!(
                    job_id = %job_id,
                    poll_count,
                    percentage = snapshot.progress.percentage,
                    next_interval_ms = next.as_millis() as u64,
                    "Job still processing, backing off"
                );
            }
            Err(err) => break PollEnd::Failed(err),
        }
    };

    if matches!(end, PollEnd::Stopped) {
        return;
    }

    {
        // stop() cancels under this lock; a stop that lands after the final
        // query still wins
        let mut map = lock(&pollers);
        if cancel.is_cancelled() {
            return;
        }
        if map.get(&job_id).map(|p| p.generation) == Some(generation) {
            map.remove(&job_id);
        }
    }

    let report = lock(&state).report();
    match end {
        PollEnd::Complete(snapshot) => {
            info!(
                job_id = %job_id,
                polls = report.poll_count,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Job completed"
            );
            observer.on_complete(snapshot, report);
        }
        PollEnd::Failed(err) => {
            warn!(job_id = %job_id, polls = report.poll_count, error = %err, "Polling failed");
            observer.on_error(err, report);
        }
        PollEnd::Stopped => {}
    }
}

/// Bridges observer callbacks into a single awaited result
struct CompletionObserver {
    inner: Option<Arc<dyn PollObserver>>,
    tx: Mutex<Option<oneshot::Sender<ProcessingResult<JobSnapshot>>>>,
}

impl CompletionObserver {
    fn finish(&self, result: ProcessingResult<JobSnapshot>) {
        if let Some(tx) = lock(&self.tx).take() {
            let _ = tx.send(result);
        }
    }
}

impl PollObserver for CompletionObserver {
    fn on_progress(&self, snapshot: &JobSnapshot, poll_count: u32) {
        if let Some(inner) = &self.inner {
            inner.on_progress(snapshot, poll_count);
        }
    }

    fn on_complete(&self, snapshot: JobSnapshot, report: PollReport) {
        if let Some(inner) = &self.inner {
            inner.on_complete(snapshot.clone(), report);
        }
        self.finish(Ok(snapshot));
    }

    fn on_error(&self, error: ProcessingError, report: PollReport) {
        if let Some(inner) = &self.inner {
            inner.on_error(error.clone(), report);
        }
        self.finish(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Job, JobStatus, Progress};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    /// Reports `Processing` until the n-th query, then `Completed`.
    struct ScriptedSource {
        complete_after: usize,
        fail: bool,
        queries: AtomicUsize,
        query_times: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn completing_after(n: usize) -> Arc<Self> {
            Arc::new(Self {
                complete_after: n,
                fail: false,
                queries: AtomicUsize::new(0),
                query_times: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                complete_after: usize::MAX,
                fail: true,
                queries: AtomicUsize::new(0),
                query_times: Mutex::new(Vec::new()),
            })
        }

        fn gaps(&self) -> Vec<Duration> {
            let times = lock(&self.query_times);
            times.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl JobStatusSource for ScriptedSource {
        async fn job_status(&self, job_id: &str) -> ProcessingResult<JobSnapshot> {
            lock(&self.query_times).push(Instant::now());
            let n = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(ProcessingError::not_found(job_id));
            }
            let mut snapshot = Job::new(4, chrono::Duration::hours(1)).snapshot(Utc::now());
            snapshot.job_id = job_id.to_string();
            if n >= self.complete_after {
                snapshot.status = JobStatus::Completed;
                snapshot.completed = true;
                snapshot.progress = Progress::new(4, 4);
            } else {
                snapshot.progress = Progress::new(n.min(3), 4);
            }
            Ok(snapshot)
        }
    }

    #[derive(Default)]
    struct Recorder {
        progress: AtomicUsize,
        complete: AtomicUsize,
        errors: Mutex<Vec<String>>,
    }

    impl PollObserver for Recorder {
        fn on_progress(&self, _snapshot: &JobSnapshot, _poll_count: u32) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }

        fn on_complete(&self, _snapshot: JobSnapshot, _report: PollReport) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, error: ProcessingError, _report: PollReport) {
            lock(&self.errors).push(error.to_string());
        }
    }

    fn engine(source: Arc<ScriptedSource>) -> PollingEngine {
        PollingEngine::new(source, PollingConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_complete() {
        let source = ScriptedSource::completing_after(4);
        let engine = engine(source.clone());
        let recorder = Arc::new(Recorder::default());

        assert!(engine.start_polling(
            "job_a",
            PollOptions::new(PollStrategy::Normal, recorder.clone())
        ));
        assert!(engine.is_polling("job_a"));

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(recorder.complete.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.progress.load(Ordering::SeqCst), 3);
        assert!(lock(&recorder.errors).is_empty());
        assert!(!engine.is_polling("job_a"));
        assert_eq!(source.queries.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_monotone_and_capped() {
        let source = ScriptedSource::completing_after(12);
        let engine = engine(source.clone());
        engine.start_polling(
            "job_b",
            PollOptions::new(PollStrategy::Normal, Arc::new(Recorder::default())),
        );

        tokio::time::sleep(Duration::from_secs(120)).await;

        let gaps = source.gaps();
        assert_eq!(gaps.len(), 11);
        for pair in gaps.windows(2) {
            assert!(pair[1] >= pair[0], "gaps must not shrink: {gaps:?}");
        }
        let max = PollingConfig::default().normal.max;
        assert!(gaps.iter().all(|g| *g <= max + Duration::from_millis(5)));
        assert!(*gaps.last().unwrap() >= max - Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_is_terminal() {
        let source = ScriptedSource::failing();
        let engine = engine(source.clone());
        let recorder = Arc::new(Recorder::default());
        engine.start_polling("job_c", PollOptions::new(PollStrategy::Immediate, recorder.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(lock(&recorder.errors).len(), 1);
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);
        assert!(!engine.is_polling("job_c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_timeout() {
        let source = ScriptedSource::completing_after(usize::MAX);
        let engine = engine(source);
        let recorder = Arc::new(Recorder::default());
        engine.start_polling(
            "job_d",
            PollOptions::new(PollStrategy::Immediate, recorder.clone())
                .with_max_total_time(Duration::from_secs(10)),
        );

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(
            lock(&recorder.errors).as_slice(),
            ["polling timeout exceeded".to_string()]
        );
        assert_eq!(recorder.complete.load(Ordering::SeqCst), 0);
        assert!(!engine.is_polling("job_d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_is_noop() {
        let engine = engine(ScriptedSource::completing_after(100));
        let first = Arc::new(Recorder::default());
        assert!(engine.start_polling("job_e", PollOptions::new(PollStrategy::Normal, first)));
        assert!(!engine.start_polling(
            "job_e",
            PollOptions::new(PollStrategy::Background, Arc::new(Recorder::default()))
        ));
        assert_eq!(engine.active_count(), 1);
        assert_eq!(engine.stats("job_e").unwrap().strategy, PollStrategy::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_silent() {
        let source = ScriptedSource::completing_after(100);
        let engine = engine(source.clone());
        let recorder = Arc::new(Recorder::default());
        engine.start_polling("job_f", PollOptions::new(PollStrategy::Normal, recorder.clone()));

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert!(engine.stop("job_f"));
        assert!(!engine.stop("job_f"));

        let queries = source.queries.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.queries.load(Ordering::SeqCst), queries);
        assert!(lock(&recorder.errors).is_empty());
        assert_eq!(recorder.complete.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_keeps_backoff_state() {
        let source = ScriptedSource::completing_after(100);
        let engine = engine(source.clone());
        engine.start_polling(
            "job_g",
            PollOptions::new(PollStrategy::Normal, Arc::new(Recorder::default())),
        );

        // Two polls: at 2s and 4.4s
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(source.queries.load(Ordering::SeqCst), 2);
        let interval = engine.stats("job_g").unwrap().current_interval;

        assert!(engine.pause("job_g"));
        assert!(!engine.pause("job_g"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.queries.load(Ordering::SeqCst), 2);
        let stats = engine.stats("job_g").unwrap();
        assert!(stats.paused);
        assert_eq!(stats.current_interval, interval);

        assert!(engine.resume("job_g"));
        tokio::time::sleep(interval + Duration::from_millis(10)).await;
        assert_eq!(source.queries.load(Ordering::SeqCst), 3);
    }

    /// Stops its own poller from inside the final status query.
    struct StoppingSource {
        engine: std::sync::OnceLock<std::sync::Weak<PollingEngine>>,
    }

    #[async_trait]
    impl JobStatusSource for StoppingSource {
        async fn job_status(&self, job_id: &str) -> ProcessingResult<JobSnapshot> {
            if let Some(engine) = self.engine.get().and_then(std::sync::Weak::upgrade) {
                assert!(engine.stop(job_id));
            }
            let mut snapshot = Job::new(1, chrono::Duration::hours(1)).snapshot(Utc::now());
            snapshot.job_id = job_id.to_string();
            snapshot.status = JobStatus::Completed;
            snapshot.completed = true;
            snapshot.progress = Progress::new(1, 1);
            Ok(snapshot)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_final_query_suppresses_completion() {
        let source = Arc::new(StoppingSource {
            engine: std::sync::OnceLock::new(),
        });
        let engine = PollingEngine::new(source.clone(), PollingConfig::default()).shared();
        assert!(source.engine.set(Arc::downgrade(&engine)).is_ok());
        let recorder = Arc::new(Recorder::default());
        engine.start_polling("job_j", PollOptions::new(PollStrategy::Immediate, recorder.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(recorder.complete.load(Ordering::SeqCst), 0);
        assert!(lock(&recorder.errors).is_empty());
        assert!(!engine.is_polling("job_j"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_strategy_resets_schedule() {
        let source = ScriptedSource::completing_after(100);
        let engine = engine(source.clone());
        engine.start_polling(
            "job_k",
            PollOptions::new(PollStrategy::Background, Arc::new(Recorder::default())),
        );

        // First background poll at 5s, next wait is 6.5s
        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(source.queries.load(Ordering::SeqCst), 1);

        assert!(engine.update_strategy("job_k", PollStrategy::Immediate));
        let config = PollingConfig::default();
        let stats = engine.stats("job_k").unwrap();
        assert_eq!(stats.strategy, PollStrategy::Immediate);
        assert_eq!(stats.current_interval, config.immediate.initial);
        assert_eq!(stats.max_interval, config.immediate.max);
        assert_eq!(stats.backoff_factor, config.immediate.factor);

        tokio::time::sleep(config.immediate.initial + Duration::from_millis(10)).await;
        assert_eq!(source.queries.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(20)).await;
        let gaps = source.gaps();
        assert!(gaps[1..]
            .iter()
            .all(|g| *g <= config.immediate.max + Duration::from_millis(5)));

        assert!(!engine.update_strategy("job_unknown", PollStrategy::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion() {
        let engine = engine(ScriptedSource::completing_after(2));
        let snapshot = engine
            .wait_for_completion("job_h", PollStrategy::Immediate, None)
            .await
            .unwrap();
        assert!(snapshot.completed);
        assert_eq!(engine.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_surfaces_failure() {
        let engine = engine(ScriptedSource::failing());
        let err = engine
            .wait_for_completion("job_i", PollStrategy::Immediate, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let engine = engine(ScriptedSource::completing_after(100));
        for id in ["a", "b", "c"] {
            engine.start_polling(
                id,
                PollOptions::new(PollStrategy::Background, Arc::new(Recorder::default())),
            );
        }
        assert_eq!(engine.active_stats().len(), 3);
        engine.stop_all();
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn test_strategy_for_chunk_count() {
        assert_eq!(PollStrategy::for_chunk_count(1), PollStrategy::Immediate);
        assert_eq!(PollStrategy::for_chunk_count(2), PollStrategy::Immediate);
        assert_eq!(PollStrategy::for_chunk_count(5), PollStrategy::Normal);
        assert_eq!(PollStrategy::for_chunk_count(6), PollStrategy::Background);
    }
}
