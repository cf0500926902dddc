//! In-memory capture of recent log lines.
//!
//! [`LogCaptureLayer`] is a `tracing_subscriber::Layer` that formats every
//! event it sees into a single line and keeps the newest lines in a bounded
//! ring buffer. The admin `show log` command pages through the buffer.

use std::{
    collections::VecDeque,
    fmt::{self, Write as _},
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    tracing::field::{Field, Visit},
    tracing_subscriber::{Layer, layer::Context},
};

pub const DEFAULT_CAPACITY: usize = 500;
pub const DEFAULT_PAGE_LINES: usize = 20;

// ── LogCapture ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LogCapture {
    buf: Arc<RwLock<VecDeque<String>>>,
    capacity: usize,
    page_lines: Arc<AtomicUsize>,
}

impl Default for LogCapture {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LogCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            page_lines: Arc::new(AtomicUsize::new(DEFAULT_PAGE_LINES)),
        }
    }

    pub fn layer(&self) -> LogCaptureLayer {
        LogCaptureLayer {
            capture: self.clone(),
        }
    }

    pub fn push(&self, line: String) {
        if let Ok(mut buf) = self.buf.write() {
            if buf.len() >= self.capacity {
                buf.pop_front();
            }
            buf.push_back(line);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn page_lines(&self) -> usize {
        self.page_lines.load(Ordering::Relaxed)
    }

    /// Values below 1 are raised to 1. Returns the setting applied.
    pub fn set_page_lines(&self, lines: usize) -> usize {
        let lines = lines.max(1);
        self.page_lines.store(lines, Ordering::Relaxed);
        lines
    }

    /// Page 0 holds the newest lines. Lines within a page are oldest first.
    pub fn page(&self, page: usize) -> Vec<String> {
        let Ok(buf) = self.buf.read() else {
            return Vec::new();
        };
        let per_page = self.page_lines();
        let end = buf.len().saturating_sub(page.saturating_mul(per_page));
        let start = end.saturating_sub(per_page);
        buf.range(start..end).cloned().collect()
    }
}

// ── Layer ───────────────────────────────────────────────────────────────────

pub struct LogCaptureLayer {
    capture: LogCapture,
}

impl<S: tracing::Subscriber> Layer<S> for LogCaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let ts = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        self.capture.push(format!(
            "{ts} {} {}: {}{}",
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields
        ));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tracing_subscriber::layer::SubscriberExt};

    #[test]
    fn pages_count_back_from_newest() {
        let capture = LogCapture::new(10);
        for i in 0..12 {
            capture.push(format!("line {i}"));
        }
        assert_eq!(capture.len(), 10);
        capture.set_page_lines(4);
        assert_eq!(capture.page(0), vec!["line 8", "line 9", "line 10", "line 11"]);
        assert_eq!(capture.page(1), vec!["line 4", "line 5", "line 6", "line 7"]);
        assert_eq!(capture.page(2), vec!["line 2", "line 3"]);
        assert!(capture.page(3).is_empty());
    }

    #[test]
    fn page_size_has_a_floor() {
        let capture = LogCapture::default();
        assert_eq!(capture.set_page_lines(0), 1);
        assert_eq!(capture.page_lines(), 1);
    }

    #[test]
    fn layer_formats_events() {
        let capture = LogCapture::new(5);
        let subscriber = tracing_subscriber::registry().with(capture.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(task = "ping", "task returned");
        });
        let lines = capture.page(0);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("INFO"));
        assert!(lines[0].ends_with("task returned task=ping"));
    }
}
