//! Per-transfer byte counters and the background reporter that renders them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use console::style;
use indicatif::{BinaryBytes, HumanBytes, HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TICK_INTERVAL: Duration = Duration::from_millis(300);
pub const INLINE_LOG_INTERVAL: Duration = Duration::from_millis(500);
const BAR_WIDTH: usize = 40;
const NEVER_LOGGED: u64 = u64::MAX;
const BAR_TEMPLATE: &str =
    "{msg} {bar:40.green/dim} {percent:>3}% {bytes}/{total_bytes} [{elapsed_precise}<{eta_precise}, {bytes_per_sec}]";
const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {msg} {bytes} [{elapsed_precise}, {bytes_per_sec}]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Send => "Sending",
            Direction::Receive => "Receiving",
        }
    }
}

/// Bytes moved by one transfer. One writer, any number of readers.
pub struct TransferCounter {
    direction: Direction,
    label: Mutex<String>,
    total: Option<u64>,
    transferred: AtomicU64,
    started: Instant,
    last_inline_ms: AtomicU64,
}

impl TransferCounter {
    pub fn new(direction: Direction, label: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            direction,
            label: Mutex::new(label.into()),
            total,
            transferred: AtomicU64::new(0),
            started: Instant::now(),
            last_inline_ms: AtomicU64::new(NEVER_LOGGED),
        }
    }

    pub fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
        let elapsed = self.started.elapsed();
        if self.inline_due(elapsed) {
            tracing::debug!("{}", render_plain(&self.snapshot()));
        }
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Receive sessions relabel the counter as each part starts.
    pub fn set_label(&self, label: impl Into<String>) {
        *lock(&self.label) = label.into();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            direction: self.direction,
            label: lock(&self.label).clone(),
            transferred: self.transferred(),
            total: self.total,
            elapsed: self.started.elapsed(),
        }
    }

    /// At most one inline line per `INLINE_LOG_INTERVAL`, measured from start.
    fn inline_due(&self, elapsed: Duration) -> bool {
        let now = elapsed.as_millis() as u64;
        let last = self.last_inline_ms.load(Ordering::Relaxed);
        let interval = INLINE_LOG_INTERVAL.as_millis() as u64;
        if last != NEVER_LOGGED && now.saturating_sub(last) < interval {
            return false;
        }
        self.last_inline_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Point-in-time view of a counter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub direction: Direction,
    pub label: String,
    pub transferred: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        match self.total {
            Some(0) => 100.0,
            Some(total) => (self.transferred as f64 * 100.0 / total as f64).min(100.0),
            None => 0.0,
        }
    }

    /// Bytes per second since the transfer began.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.transferred as f64 / secs
    }

    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        let rate = self.rate();
        if rate <= 0.0 {
            return Some(Duration::ZERO);
        }
        let remaining = total.saturating_sub(self.transferred) as f64;
        Some(Duration::from_secs((remaining / rate) as u64))
    }

    fn filled(&self) -> usize {
        match self.total {
            Some(_) => ((self.percent() / 100.0) * BAR_WIDTH as f64) as usize,
            // Unknown total: let the bar wander
            None => (self.transferred % (BAR_WIDTH as u64 + 1)) as usize,
        }
        .min(BAR_WIDTH)
    }

    fn sizes(&self) -> String {
        match self.total {
            Some(total) => format!("{} / {}", HumanBytes(self.transferred), HumanBytes(total)),
            None => format!("{} / ?", HumanBytes(self.transferred)),
        }
    }

    fn timing(&self) -> String {
        let rate = BinaryBytes(self.rate() as u64);
        match self.eta() {
            Some(eta) => format!("[{:#}<{:#}, {rate}/s]", HumanDuration(self.elapsed), HumanDuration(eta)),
            None => format!("[{:#}, {rate}/s]", HumanDuration(self.elapsed)),
        }
    }

    fn headline(&self) -> String {
        format!(
            "{} {}",
            style(self.direction.verb()).cyan(),
            style(&self.label).yellow().bold()
        )
    }

    fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.transferred >= total)
    }
}

//============
// Formatting
//============

/// Escape-free progress line, safe for logs and dumb terminals.
pub fn render_plain(snapshot: &ProgressSnapshot) -> String {
    let filled = snapshot.filled();
    format!(
        "{} {} [{}{}] {:.1}% {} {}",
        snapshot.direction.verb(),
        snapshot.label,
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        snapshot.percent(),
        snapshot.sizes(),
        snapshot.timing()
    )
}

//===========
// Renderers
//===========

/// Output target for reporter frames.
pub trait ProgressRenderer: Send + Sync {
    fn render(&self, snapshot: &ProgressSnapshot) -> Result<()>;

    /// Last frame of a transfer.
    fn finish(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.render(snapshot)
    }
}

/// Drives an indicatif bar on stderr, one bar per transfer.
pub struct TerminalRenderer {
    target: fn() -> ProgressDrawTarget,
    bar: Mutex<Option<ProgressBar>>,
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::with_target(ProgressDrawTarget::stderr)
    }
}

impl TerminalRenderer {
    pub fn with_target(target: fn() -> ProgressDrawTarget) -> Self {
        Self {
            target,
            bar: Mutex::new(None),
        }
    }

    fn new_bar(&self, total: Option<u64>) -> Result<ProgressBar> {
        let style = match total {
            Some(_) => ProgressStyle::with_template(BAR_TEMPLATE)?.progress_chars("█▉▊▋▌▍▎▏ "),
            None => ProgressStyle::with_template(SPINNER_TEMPLATE)?,
        };
        Ok(ProgressBar::with_draw_target(total, (self.target)()).with_style(style))
    }
}

fn update(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    if let Some(total) = snapshot.total {
        bar.set_length(total);
    }
    bar.set_position(snapshot.transferred);
    bar.set_message(snapshot.headline());
}

impl ProgressRenderer for TerminalRenderer {
    fn render(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let mut slot = lock(&self.bar);
        let bar = match slot.take() {
            Some(bar) => bar,
            None => self.new_bar(snapshot.total)?,
        };
        update(&bar, snapshot);
        *slot = Some(bar);
        Ok(())
    }

    fn finish(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let taken = lock(&self.bar).take();
        let bar = match taken {
            Some(bar) => bar,
            None => self.new_bar(snapshot.total)?,
        };
        update(&bar, snapshot);
        if snapshot.is_complete() {
            bar.finish();
        } else {
            bar.abandon();
        }
        Ok(())
    }
}

/// Emits plain lines through `tracing`, for non-interactive output.
pub struct LogRenderer;

impl ProgressRenderer for LogRenderer {
    fn render(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        tracing::info!("{}", render_plain(snapshot));
        Ok(())
    }
}

/// Run the renderer, degrading to a plain log line on error or panic.
fn render_isolated(renderer: &dyn ProgressRenderer, snapshot: &ProgressSnapshot, last: bool) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if last {
            renderer.finish(snapshot)
        } else {
            renderer.render(snapshot)
        }
    }));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::debug!("Progress renderer failed: {err:#}");
            tracing::info!("{}", render_plain(snapshot));
        }
        Err(_) => {
            tracing::warn!("Progress renderer panicked");
            tracing::info!("{}", render_plain(snapshot));
        }
    }
}

//==========
// Tracking
//==========

/// Shared by the handlers of a session; hands out counters and reporters.
#[derive(Clone)]
pub struct ProgressTracker {
    renderer: Arc<dyn ProgressRenderer>,
    current: Arc<Mutex<Option<Arc<TransferCounter>>>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Arc::new(TerminalRenderer::default()))
    }
}

impl ProgressTracker {
    pub fn new(renderer: Arc<dyn ProgressRenderer>) -> Self {
        Self {
            renderer,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Start accounting for a new transfer.
    pub fn begin(
        &self,
        direction: Direction,
        label: impl Into<String>,
        total: Option<u64>,
    ) -> Arc<TransferCounter> {
        let counter = Arc::new(TransferCounter::new(direction, label, total));
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current = Some(counter.clone());
        counter
    }

    /// Snapshot of the most recently started transfer.
    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        let current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        current.as_ref().map(|counter| counter.snapshot())
    }

    /// Render `counter` every tick until the returned reporter is stopped or dropped.
    pub fn spawn_reporter(&self, counter: Arc<TransferCounter>) -> ProgressReporter {
        let token = CancellationToken::new();
        let stop = token.clone();
        let renderer = self.renderer.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        render_isolated(renderer.as_ref(), &counter.snapshot(), false);
                    }
                    _ = stop.cancelled() => {
                        render_isolated(renderer.as_ref(), &counter.snapshot(), true);
                        break;
                    }
                }
            }
        });

        ProgressReporter {
            token,
            handle: Some(handle),
        }
    }
}

/// Handle to a running reporter task.
pub struct ProgressReporter {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Stop and wait for the final frame.
    pub async fn finish(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::debug!("Progress reporter ended abnormally: {err}");
            }
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
