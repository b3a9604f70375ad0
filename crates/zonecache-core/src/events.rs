//! Structured allocator lifecycle records.
//!
//! Every notable allocator decision (cache creation, growth, slab release,
//! retry, contract violation) is recorded as an [`EventRecord`] in a bounded
//! in-memory ring. Records below the configured threshold are discarded at
//! the call site. The ring can be exported as JSONL for tooling.
//!
//! The threshold is read once from `ZONECACHE_LOG_LEVEL` (default `info`).

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default ring capacity of the global log.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Severity level.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl EventLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Info`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Self::Trace,
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" | "err" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// One structured lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    /// Monotonic record id.
    pub seq: u64,
    /// Correlation id, `zonecache::<event>::<seq>`.
    pub trace_id: String,
    pub level: EventLevel,
    /// Event kind (`cache_grow`, `double_free`, ...).
    pub event: &'static str,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
}

/// Optional context attached to a record.
#[derive(Debug, Default, Clone)]
pub struct EventFields<'a> {
    pub cache: Option<&'a str>,
    pub addr: Option<usize>,
    pub order: Option<u32>,
    pub details: String,
}

impl<'a> EventFields<'a> {
    #[must_use]
    pub fn cache(name: &'a str) -> Self {
        Self {
            cache: Some(name),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn addr(mut self, addr: usize) -> Self {
        self.addr = Some(addr);
        self
    }

    #[must_use]
    pub fn order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

struct Ring {
    records: VecDeque<EventRecord>,
    dropped: u64,
}

/// Bounded ring of lifecycle records.
pub struct EventLog {
    threshold: EventLevel,
    capacity: usize,
    next_seq: AtomicU64,
    ring: Mutex<Ring>,
}

impl EventLog {
    #[must_use]
    pub fn new(capacity: usize, threshold: EventLevel) -> Self {
        Self {
            threshold,
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(1),
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity.clamp(1, DEFAULT_CAPACITY)),
                dropped: 0,
            }),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> EventLevel {
        self.threshold
    }

    /// True if a record at `level` would be kept.
    #[must_use]
    pub fn enabled(&self, level: EventLevel) -> bool {
        level >= self.threshold
    }

    /// Append a record. Returns its sequence number, or `None` if filtered.
    pub fn record(
        &self,
        level: EventLevel,
        event: &'static str,
        outcome: &'static str,
        fields: EventFields<'_>,
    ) -> Option<u64> {
        if !self.enabled(level) {
            return None;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let record = EventRecord {
            seq,
            trace_id: format!("zonecache::{event}::{seq:016x}"),
            level,
            event,
            outcome,
            cache: fields.cache.map(str::to_owned),
            addr: fields.addr,
            order: fields.order,
            details: fields.details,
        };
        let mut ring = self.ring.lock();
        if ring.records.len() == self.capacity {
            ring.records.pop_front();
            ring.dropped += 1;
        }
        ring.records.push_back(record);
        Some(seq)
    }

    /// Copy of all retained records, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.ring.lock().records.iter().cloned().collect()
    }

    /// Retained records matching `pred`.
    #[must_use]
    pub fn find(&self, pred: impl Fn(&EventRecord) -> bool) -> Vec<EventRecord> {
        self.ring
            .lock()
            .records
            .iter()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }

    /// Records evicted because the ring was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.ring.lock().dropped
    }

    /// Remove and return every retained record.
    pub fn drain(&self) -> Vec<EventRecord> {
        self.ring.lock().records.drain(..).collect()
    }

    /// Export retained records as JSON lines.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        let ring = self.ring.lock();
        let mut out = String::new();
        for record in &ring.records {
            if let Ok(line) = serde_json::to_string(record) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

static GLOBAL_LOG: OnceLock<EventLog> = OnceLock::new();

/// Global log, threshold from `ZONECACHE_LOG_LEVEL` on first use.
#[must_use]
pub fn global_log() -> &'static EventLog {
    GLOBAL_LOG.get_or_init(|| {
        let threshold = std::env::var("ZONECACHE_LOG_LEVEL")
            .map(|v| EventLevel::from_str_loose(&v))
            .unwrap_or_default();
        EventLog::new(DEFAULT_CAPACITY, threshold)
    })
}

/// Record into the global log.
pub fn emit(
    level: EventLevel,
    event: &'static str,
    outcome: &'static str,
    fields: EventFields<'_>,
) -> Option<u64> {
    global_log().record(level, event, outcome, fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels() {
        assert_eq!(EventLevel::from_str_loose("TRACE"), EventLevel::Trace);
        assert_eq!(EventLevel::from_str_loose("warning"), EventLevel::Warn);
        assert_eq!(EventLevel::from_str_loose(" error "), EventLevel::Error);
        assert_eq!(EventLevel::from_str_loose("bogus"), EventLevel::Info);
    }

    #[test]
    fn threshold_filters() {
        let log = EventLog::new(8, EventLevel::Warn);
        assert!(
            log.record(EventLevel::Info, "cache_grow", "ok", EventFields::default())
                .is_none()
        );
        assert!(
            log.record(EventLevel::Error, "double_free", "rejected", EventFields::default())
                .is_some()
        );
        assert_eq!(log.snapshot().len(), 1);
    }

    #[test]
    fn ring_evicts_oldest() {
        let log = EventLog::new(2, EventLevel::Trace);
        for _ in 0..3 {
            log.record(EventLevel::Info, "tick", "ok", EventFields::default());
        }
        let records = log.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 2);
        assert_eq!(log.dropped(), 1);
    }

    #[test]
    fn jsonl_skips_empty_fields() {
        let log = EventLog::new(4, EventLevel::Trace);
        log.record(
            EventLevel::Error,
            "double_free",
            "rejected",
            EventFields::cache("objs").addr(0x2000),
        );
        let out = log.to_jsonl();
        let line = out.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["level"], "error");
        assert_eq!(value["event"], "double_free");
        assert_eq!(value["cache"], "objs");
        assert_eq!(value["addr"], 0x2000);
        assert!(value.get("order").is_none());
        assert!(value.get("details").is_none());
        assert!(
            value["trace_id"]
                .as_str()
                .unwrap()
                .starts_with("zonecache::double_free::")
        );
    }

    #[test]
    fn find_and_drain() {
        let log = EventLog::new(4, EventLevel::Trace);
        log.record(EventLevel::Info, "a", "ok", EventFields::cache("x"));
        log.record(EventLevel::Info, "b", "ok", EventFields::cache("y"));
        assert_eq!(log.find(|r| r.cache.as_deref() == Some("y")).len(), 1);
        assert_eq!(log.drain().len(), 2);
        assert!(log.snapshot().is_empty());
    }
}
