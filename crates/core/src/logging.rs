//! Category/level logging shared by both pipeline cores.
//!
//! # Architecture
//!
//! - **LogConfig**: process-wide configuration held in atomics, so the
//!   emulation core and the audio core can both check levels without locking
//! - **LogLevel**: Off < Error < Warn < Info < Debug < Trace
//! - **LogCategory**: one per pipeline concern (scheduler, frame skip,
//!   handoff, mixer, DMA, profiling)
//! - **log()**: lazily formats the message, applies the per-category rate
//!   limit and writes to stderr or a background file writer
//!
//! Nothing is formatted unless the category/level pair is enabled, so calls
//! can sit on the per-frame path.
//!
//! ```rust
//! use emu_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Dma, LogLevel::Warn, || {
//!     format!("underrun on slot {}", 2)
//! });
//! ```

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LogLevel::Off => "OFF",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

/// Pipeline component a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// Scanline loop, interrupts, video mode changes
    Scheduler,
    /// Render/skip decisions and backlog accounting
    FrameSkip,
    /// Cross-core frame publication and acknowledgement
    Handoff,
    /// Sample mixing, fades, count sanitising
    Mixer,
    /// Simulated DMA, buffer strategies, underruns
    Dma,
    /// Periodic timing reports
    Profile,
}

impl LogCategory {
    pub const ALL: [LogCategory; 6] = [
        LogCategory::Scheduler,
        LogCategory::FrameSkip,
        LogCategory::Handoff,
        LogCategory::Mixer,
        LogCategory::Dma,
        LogCategory::Profile,
    ];

    const COUNT: usize = Self::ALL.len();

    fn index(self) -> usize {
        self as usize
    }

    /// Parse a category name as accepted on the command line
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduler" | "sched" => Some(LogCategory::Scheduler),
            "frameskip" | "skip" => Some(LogCategory::FrameSkip),
            "handoff" => Some(LogCategory::Handoff),
            "mixer" | "audio" => Some(LogCategory::Mixer),
            "dma" => Some(LogCategory::Dma),
            "profile" | "prof" => Some(LogCategory::Profile),
            _ => None,
        }
    }
}

/// Per-category sliding window state
#[derive(Default)]
struct Window {
    stamps: VecDeque<Instant>,
    dropped: usize,
    last_drop_report: Option<Instant>,
}

/// Sliding-window limiter, one window per category.
struct RateLimiter {
    max_per_window: AtomicUsize,
    window: Duration,
    windows: Mutex<[Window; LogCategory::COUNT]>,
}

impl RateLimiter {
    fn new(max_per_second: usize) -> Self {
        Self {
            max_per_window: AtomicUsize::new(max_per_second),
            window: Duration::from_secs(1),
            windows: Mutex::new(Default::default()),
        }
    }

    /// Returns whether this message may be written, plus the number of
    /// suppressed messages to report (if a report is due).
    fn admit(&self, category: LogCategory) -> (bool, Option<usize>) {
        let now = Instant::now();
        let max = self.max_per_window.load(Ordering::Relaxed);
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let w = &mut windows[category.index()];

        while let Some(&front) = w.stamps.front() {
            if now.duration_since(front) > self.window {
                w.stamps.pop_front();
            } else {
                break;
            }
        }

        if w.stamps.len() < max {
            w.stamps.push_back(now);
            if w.dropped > 0 {
                let dropped = std::mem::take(&mut w.dropped);
                w.last_drop_report = Some(now);
                return (true, Some(dropped));
            }
            return (true, None);
        }

        w.dropped += 1;
        let report_due = w
            .last_drop_report
            .map_or(true, |last| now.duration_since(last) >= self.window);
        if report_due {
            w.last_drop_report = Some(now);
            (false, Some(std::mem::take(&mut w.dropped)))
        } else {
            (false, None)
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    category_levels: [AtomicU8; LogCategory::COUNT],
    file_sink: Mutex<Option<Sender<String>>>,
    file_enabled: AtomicBool,
    limiter: RateLimiter,
}

impl LogConfig {
    fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            file_sink: Mutex::new(None),
            file_enabled: AtomicBool::new(false),
            limiter: RateLimiter::new(60),
        }
    }

    /// Process-wide instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    /// Override the level of one category. `Off` means "use the global level".
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category override wins over the global level when set.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let effective = match self.get_level(category) {
            LogLevel::Off => self.get_global_level(),
            specific => specific,
        };
        level <= effective
    }

    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    /// Maximum messages per second per category
    pub fn set_rate_limit(&self, max_per_second: usize) {
        self.limiter
            .max_per_window
            .store(max_per_second, Ordering::Relaxed);
    }

    pub fn get_rate_limit(&self) -> usize {
        self.limiter.max_per_window.load(Ordering::Relaxed)
    }

    /// Route output to `path` (appending). Writes happen on a background
    /// thread so neither core blocks on file I/O.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = channel::<String>();

        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                while let Ok(line) = receiver.recv() {
                    let _ = writeln!(file, "{}", line);
                    let _ = file.flush();
                }
            })?;

        if let Ok(mut sink) = self.file_sink.lock() {
            *sink = Some(sender);
        }
        self.file_enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop file output; the writer thread exits once the sender drops.
    pub fn clear_log_file(&self) {
        if let Ok(mut sink) = self.file_sink.lock() {
            *sink = None;
        }
        self.file_enabled.store(false, Ordering::Relaxed);
    }

    fn write_line(&self, line: String) {
        if self.file_enabled.load(Ordering::Relaxed) {
            if let Ok(sink) = self.file_sink.lock() {
                if let Some(sender) = sink.as_ref() {
                    if let Err(failed) = sender.send(line) {
                        eprintln!("{}", failed.0);
                    }
                    return;
                }
            }
        }
        eprintln!("{}", line);
    }
}

/// Log a message for `category` at `level`.
///
/// `message_fn` only runs when the pair is enabled and the category's rate
/// limit admits the message. Suppressed messages are summarised once per
/// second.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if !config.should_log(category, level) {
        return;
    }

    let (admitted, dropped) = config.limiter.admit(category);
    if let Some(count) = dropped.filter(|&n| n > 0) {
        config.write_line(format!(
            "[{:?}] WARN: rate limit exceeded, {} message(s) dropped",
            category, count
        ));
    }
    if admitted {
        config.write_line(format!("[{:?}] {}: {}", category, level.tag(), message_fn()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from_str("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("NONE"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("ERR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str(" Info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("4"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("loud"), None);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(LogCategory::from_str("dma"), Some(LogCategory::Dma));
        assert_eq!(LogCategory::from_str("Skip"), Some(LogCategory::FrameSkip));
        assert_eq!(LogCategory::from_str("audio"), Some(LogCategory::Mixer));
        assert_eq!(LogCategory::from_str("gpu"), None);
    }

    #[test]
    fn test_category_indices_are_dense() {
        for (i, category) in LogCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn test_category_level_overrides_global() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Error);
        config.set_level(LogCategory::Dma, LogLevel::Debug);

        assert!(config.should_log(LogCategory::Dma, LogLevel::Debug));
        assert!(!config.should_log(LogCategory::Dma, LogLevel::Trace));
        assert!(config.should_log(LogCategory::Mixer, LogLevel::Error));
        assert!(!config.should_log(LogCategory::Mixer, LogLevel::Warn));
    }

    #[test]
    fn test_off_is_never_logged() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        assert!(!config.should_log(LogCategory::Scheduler, LogLevel::Off));
    }

    #[test]
    fn test_reset() {
        let config = LogConfig::new();
        config.set_global_level(LogLevel::Trace);
        config.set_level(LogCategory::Handoff, LogLevel::Info);
        config.reset();

        assert_eq!(config.get_global_level(), LogLevel::Off);
        for category in LogCategory::ALL {
            assert_eq!(config.get_level(category), LogLevel::Off);
        }
    }

    #[test]
    fn test_rate_limiter_blocks_over_limit_per_category() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            assert!(limiter.admit(LogCategory::Dma).0);
        }
        assert!(!limiter.admit(LogCategory::Dma).0);
        assert!(limiter.admit(LogCategory::Profile).0);
    }

    #[test]
    fn test_rate_limiter_reports_dropped_count() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            limiter.admit(LogCategory::Mixer);
        }
        // First drop reports immediately, the rest accumulate.
        let (allowed, dropped) = limiter.admit(LogCategory::Mixer);
        assert!(!allowed);
        assert_eq!(dropped, Some(1));
        for _ in 0..4 {
            assert_eq!(limiter.admit(LogCategory::Mixer), (false, None));
        }

        std::thread::sleep(Duration::from_millis(1100));
        let (allowed, dropped) = limiter.admit(LogCategory::Mixer);
        assert!(allowed);
        assert_eq!(dropped, Some(4));
    }
}
