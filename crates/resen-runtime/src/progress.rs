//! Image pull progress events and their aggregation.
//!
//! The runtime reports per-layer byte counts while it pulls an image.
//! [`PullTracker`] folds them into one overall figure and rate-limits how
//! often it asks to be reported, so pulls log at most once per second.

use std::fmt;
use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Progress of one layer during an image pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullProgress {
    /// Layer identifier as reported by the runtime.
    pub layer_id: String,
    /// Bytes downloaded so far.
    pub current: u64,
    /// Total bytes of the layer.
    pub total: u64,
}

/// Aggregates [`PullProgress`] events across layers.
#[derive(Debug)]
pub struct PullTracker {
    layers: Vec<(String, u64)>,
    total: u64,
    started: Instant,
    last_report: Option<Instant>,
}

impl PullTracker {
    /// Creates an empty tracker starting its clock now.
    #[must_use]
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Creates an empty tracker with an explicit start time.
    #[must_use]
    pub const fn started_at(started: Instant) -> Self {
        Self {
            layers: Vec::new(),
            total: 0,
            started,
            last_report: None,
        }
    }

    /// Records an event, returning whether a report is due.
    pub fn record(&mut self, event: &PullProgress) -> bool {
        self.record_at(event, Instant::now())
    }

    /// Records an event observed at `now`, returning whether a report is due.
    ///
    /// A layer's total is counted once, the first time the layer is seen;
    /// later events only update its current byte count.
    pub fn record_at(&mut self, event: &PullProgress, now: Instant) -> bool {
        if let Some((_, current)) = self.layers.iter_mut().find(|(id, _)| *id == event.layer_id) {
            *current = event.current;
        } else {
            self.layers.push((event.layer_id.clone(), event.current));
            self.total += event.total;
        }

        let due = self
            .last_report
            .is_none_or(|last| now.duration_since(last) >= REPORT_INTERVAL);
        if due {
            self.last_report = Some(now);
        }
        due
    }

    /// Bytes downloaded across all layers.
    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.layers.iter().map(|(_, current)| current).sum()
    }

    /// Total bytes across all layers seen so far.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Completion in percent, zero while nothing is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.downloaded() as f64 / self.total as f64 * 100.0
        }
    }
}

impl Default for PullTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PullTracker {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.started.elapsed().as_secs();
        write!(
            f,
            "{:5.1} %, {:5.3}/{:4.2}GB, elapsed {}:{:02}:{:02}",
            self.percent(),
            self.downloaded() as f64 / GIB,
            self.total as f64 / GIB,
            elapsed / 3600,
            (elapsed / 60) % 60,
            elapsed % 60
        )
    }
}

/// Parses one line of `docker pull` output into a progress event.
///
/// Recognises `<layer>: Downloading [==>   ]  12.5MB/45.3MB` and the bare
/// `<layer>: Downloading  12.5MB/45.3MB` form. Other lines yield `None`.
#[must_use]
pub fn parse_pull_line(line: &str) -> Option<PullProgress> {
    let (layer_id, rest) = line.trim().split_once(": ")?;
    let rest = rest.strip_prefix("Downloading")?;
    let sizes = rest.rsplit(|c: char| c == ']' || c.is_whitespace()).find(|s| !s.is_empty())?;
    let (current, total) = sizes.split_once('/')?;
    Some(PullProgress {
        layer_id: layer_id.to_string(),
        current: parse_size(current)?,
        total: parse_size(total)?,
    })
}

/// Parses a decimal size such as `12.5MB`, `512B`, or `1.2GB` into bytes.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = text.split_at(split);
    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "b" => 1,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        "tb" => 1_000_000_000_000,
        _ => return None,
    };
    let value: f64 = number.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as u64)
}
