//! Stderr logging for the answer-sheet tools.
//!
//! [`init_with_level`] installs a `log` backend that writes one line per
//! record, tagged with the seconds since start-up and the emitting crate.
//! Records from other crates are kept only at `warn` and above.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, fmt::format::FmtSpan, util::SubscriberInitExt, EnvFilter};

const OWN_PREFIX: &str = "answer_sheet";

struct SheetLogger {
    level: LevelFilter,
    started: Instant,
}

impl SheetLogger {
    fn admits(&self, level: Level, target: &str) -> bool {
        if target.starts_with(OWN_PREFIX) {
            level <= self.level
        } else {
            level <= Level::Warn && level <= self.level
        }
    }
}

/// `answer_sheet_marks::detect` -> `marks`.
fn short_target(target: &str) -> &str {
    let krate = target.split("::").next().unwrap_or(target);
    krate
        .strip_prefix("answer_sheet_")
        .or_else(|| krate.strip_prefix(OWN_PREFIX).map(|_| "cli"))
        .unwrap_or(krate)
}

impl Log for SheetLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.admits(metadata.level(), metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{:>8.3}s {:<5} [{}] {}\n",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            short_target(record.target()),
            record.args()
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<SheetLogger> = OnceLock::new();

/// Install the stderr logger at `level`.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| SheetLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Default filter directive: the answer-sheet crates at `level`, everything
/// else at `level` but never above `warn`.
#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
fn default_directive(level: LevelFilter) -> String {
    let foreign = level.min(LevelFilter::Warn);
    format!(
        "{},{OWN_PREFIX}={}",
        foreign.as_str().to_ascii_lowercase(),
        level.as_str().to_ascii_lowercase()
    )
}

/// Install a `tracing` subscriber with the answer-sheet crates at `info`.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    init_tracing_with_level(json, LevelFilter::Info);
}

/// Install a `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the answer-sheet crates log at `level`
/// and everything else at `level` capped at `warn`. Span close events carry
/// stage timings.
#[cfg(feature = "tracing")]
pub fn init_tracing_with_level(json: bool, level: LevelFilter) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_shortened_to_the_crate() {
        assert_eq!(short_target("answer_sheet_marks::detect"), "marks");
        assert_eq!(short_target("answer_sheet_calib"), "calib");
        assert_eq!(short_target("answer_sheet"), "cli");
        assert_eq!(short_target("image::codecs::png"), "image");
    }

    #[test]
    fn foreign_crates_are_capped_at_warn() {
        let logger = SheetLogger {
            level: LevelFilter::Debug,
            started: Instant::now(),
        };
        assert!(logger.admits(Level::Debug, "answer_sheet_layout::generate"));
        assert!(!logger.admits(Level::Trace, "answer_sheet_layout::generate"));
        assert!(!logger.admits(Level::Info, "rayon_core"));
        assert!(logger.admits(Level::Warn, "rayon_core"));
    }

    #[test]
    fn default_directive_follows_the_requested_level() {
        assert_eq!(default_directive(LevelFilter::Info), "warn,answer_sheet=info");
        assert_eq!(default_directive(LevelFilter::Trace), "warn,answer_sheet=trace");
        assert_eq!(default_directive(LevelFilter::Error), "error,answer_sheet=error");
    }
}
