use once_cell::sync::OnceCell;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "wolfpack.log";

static INIT: OnceCell<()> = OnceCell::new();
// must live for the rest of the process or buffered lines are dropped
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Install the global subscriber with the default `logs/` directory.
pub fn init_logging() {
    init_logging_to(Path::new("logs"));
}

/// Console logging plus a daily rolling file under `dir`. If `dir` cannot be
/// created the file layer is skipped and output stays console-only. Later
/// calls are no-ops, so hosts and tests can both call this freely.
pub fn init_logging_to(dir: &Path) {
    let _ = INIT.get_or_init(|| {
        let file_layer = fs::create_dir_all(dir).ok().map(|_| {
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE));
            let _ = FILE_GUARD.set(guard);
            fmt::layer().with_writer(writer).with_ansi(false).with_target(false)
        });
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .with(file_layer)
            .init();
    });
}

/// Suppresses bursts of progress messages that share a prefix (e.g.
/// "Downloading:") so a fast transfer loop does not flood the event channel.
/// A message with a new prefix always passes; repeats pass once per interval.
pub struct ProgressThrottle {
    min_interval: Duration,
    last: Option<(String, Instant)>,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self { min_interval: Duration::from_millis(min_interval_ms), last: None }
    }

    /// Returns whether the message was forwarded to `sink`.
    pub fn emit(
        &mut self,
        prefix: &str,
        msg: String,
        pct: u8,
        mut sink: impl FnMut(&str, u8),
    ) -> bool {
        let now = Instant::now();
        if let Some((prev, at)) = &self.last {
            let repeat = prev.starts_with(prefix) && msg.starts_with(prefix);
            if repeat && now.duration_since(*at) < self.min_interval {
                return false;
            }
        }
        sink(&msg, pct);
        tracing::trace!(target: "progress", "{msg}");
        self.last = Some((msg, now));
        true
    }
}
