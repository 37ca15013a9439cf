//! Structured security and audit event log.
//!
//! # Responsibilities
//! - Route events to the general, security or audit channel
//! - Redact every record before it reaches a sink
//! - Count suspicious activity per IP and alert past a threshold
//!
//! # Design Decisions
//! - Records carry structured `serde_json::Value` fields only, so there is
//!   no code path that logs an unredacted string blob
//! - Sinks are injected; the default writes through `tracing`, tests capture

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};

use crate::observability::redact::redact;

/// Logical log channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Request log and general errors.
    General,
    /// Guard rejections, sanitization and pattern hits.
    Security,
    /// Security-relevant user actions.
    Audit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// A single redacted event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub channel: Channel,
    pub level: Level,
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub fields: Value,
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Emits records as `tracing` events with target `nextstep::<channel>`.
#[derive(Debug, Default)]
pub struct TracingSink;

macro_rules! emit_at {
    ($target:literal, $record:expr) => {{
        let record = $record;
        match record.level {
            Level::Info => tracing::info!(
                target: $target,
                event = %record.event,
                fields = %record.fields,
                "{}", record.event
            ),
            Level::Warn => tracing::warn!(
                target: $target,
                event = %record.event,
                fields = %record.fields,
                "{}", record.event
            ),
            Level::Error => tracing::error!(
                target: $target,
                event = %record.event,
                fields = %record.fields,
                "{}", record.event
            ),
        }
    }};
}

impl AuditSink for TracingSink {
    fn emit(&self, record: &AuditRecord) {
        match record.channel {
            Channel::General => emit_at!("nextstep::general", record),
            Channel::Security => emit_at!("nextstep::security", record),
            Channel::Audit => emit_at!("nextstep::audit", record),
        }
    }
}

/// Captures records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    /// A capturing sink and a log writing into it.
    pub fn log() -> (Arc<MemorySink>, AuditLog) {
        let sink = Arc::new(MemorySink::default());
        let log = AuditLog::new(sink.clone());
        (sink, log)
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, record: &AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Handle for recording events. Cheap to clone.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Log writing through `tracing`.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    /// Redact `fields` and emit the event.
    pub fn record(&self, channel: Channel, level: Level, event: &str, fields: Value) {
        let record = AuditRecord {
            channel,
            level,
            event: event.to_string(),
            timestamp: Utc::now(),
            fields: redact(&fields),
        };
        self.sink.emit(&record);
    }

    pub fn general(&self, level: Level, event: &str, fields: Value) {
        self.record(Channel::General, level, event, fields);
    }

    pub fn security(&self, level: Level, event: &str, fields: Value) {
        self.record(Channel::Security, level, event, fields);
    }

    pub fn audit(&self, level: Level, event: &str, fields: Value) {
        self.record(Channel::Audit, level, event, fields);
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
struct ActivityRecord {
    count: u32,
    last_seen: Instant,
}

/// Per-IP counter of suspicious events.
pub struct SuspiciousActivityTracker {
    entries: DashMap<IpAddr, ActivityRecord>,
    threshold: u32,
    retention: Duration,
    audit: AuditLog,
}

impl SuspiciousActivityTracker {
    pub fn new(threshold: u32, retention: Duration, audit: AuditLog) -> Self {
        Self {
            entries: DashMap::new(),
            threshold,
            retention,
            audit,
        }
    }

    /// Count one suspicious event for `ip` and return the new total.
    ///
    /// Emits `POSSIBLE_ATTACK` once the total exceeds the threshold. Entries
    /// idle for longer than the retention window are dropped on every call.
    pub fn track(&self, ip: IpAddr, activity: &str, now: Instant) -> u32 {
        let count = {
            let mut entry = self.entries.entry(ip).or_insert(ActivityRecord {
                count: 0,
                last_seen: now,
            });
            entry.count = entry.count.saturating_add(1);
            entry.last_seen = now;
            entry.count
        };

        if count > self.threshold {
            self.audit.security(
                Level::Error,
                "POSSIBLE_ATTACK",
                json!({ "ip": ip.to_string(), "activity": activity, "count": count }),
            );
        }

        let retention = self.retention;
        self.entries
            .retain(|_, record| now.saturating_duration_since(record.last_seen) <= retention);

        count
    }

    pub fn count(&self, ip: &IpAddr) -> u32 {
        self.entries.get(ip).map(|r| r.count).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_redacted_before_sink() {
        let (sink, log) = MemorySink::log();
        log.audit(
            Level::Info,
            "LOGIN_FAILED",
            json!({ "email": "a@b.c", "password": "hunter2" }),
        );

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel, Channel::Audit);
        assert_eq!(records[0].fields["password"], "[REDACTED]");
        assert!(!serde_json::to_string(&records[0]).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_tracker_alerts_past_threshold() {
        let (sink, log) = MemorySink::log();
        let tracker = SuspiciousActivityTracker::new(3, Duration::from_secs(3600), log);
        let ip: IpAddr = "198.51.100.4".parse().unwrap();
        let now = Instant::now();

        for expected in 1..=3 {
            assert_eq!(tracker.track(ip, "LOGIN_FAILED", now), expected);
        }
        assert!(sink.records().is_empty());

        assert_eq!(tracker.track(ip, "LOGIN_FAILED", now), 4);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, "POSSIBLE_ATTACK");
        assert_eq!(records[0].level, Level::Error);
        assert_eq!(records[0].fields["count"], 4);
    }

    #[test]
    fn test_tracker_purges_idle_entries() {
        let (_, log) = MemorySink::log();
        let tracker = SuspiciousActivityTracker::new(10, Duration::from_secs(3600), log);
        let stale: IpAddr = "203.0.113.1".parse().unwrap();
        let active: IpAddr = "203.0.113.2".parse().unwrap();
        let start = Instant::now();

        tracker.track(stale, "LOGIN_FAILED", start);
        tracker.track(active, "LOGIN_FAILED", start + Duration::from_secs(3601));

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.count(&stale), 0);
        assert_eq!(tracker.count(&active), 1);
    }
}
