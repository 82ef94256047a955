//! Audit records for messages crossing the broker boundary.
//!
//! Every published message and every consumed message (unless the
//! registration opts out) produces one flat JSON record. Business fields are
//! lifted from the body when it is a JSON object with string members.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::net;

/// Target used for audit lines so they can be filtered or routed separately.
pub const AUDIT_TARGET: &str = "mq_audit";

/// Which way the message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    /// Wire value of `msg_mode`.
    pub fn mode(&self) -> i32 {
        match self {
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        }
    }
}

/// One audit line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub qid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub uid: String,
    pub csuid: String,
    pub acc: String,
    pub ptid: String,
    pub queue: String,
    pub msg_mode: i32,
    pub t: String,
    pub key: String,
    pub ori_ip: String,
    pub dest_ip: String,
    pub msg: String,
    pub error_id: i32,
}

impl AuditRecord {
    /// Build a record for `msg` seen on `queue`.
    ///
    /// `local_ip` lands in `ori_ip` for outbound messages and in `dest_ip`
    /// for inbound ones.
    pub fn build(
        direction: Direction,
        msg: &str,
        queue: &str,
        key: &str,
        local_ip: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let (fields, error_id) = match serde_json::from_str::<Map<String, Value>>(msg) {
            Ok(map) => (map, 0),
            Err(_) => (Map::new(), -1),
        };
        let field = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let (ori_ip, dest_ip) = match direction {
            Direction::Outbound => (local_ip.to_string(), String::new()),
            Direction::Inbound => (String::new(), local_ip.to_string()),
        };

        Self {
            qid: field("qid"),
            kind: field("type"),
            role: field("role"),
            uid: field("uid"),
            csuid: field("csuid"),
            acc: field("acc"),
            ptid: field("ptid"),
            queue: queue.to_string(),
            msg_mode: direction.mode(),
            t: format_timestamp(now),
            key: key.to_string(),
            ori_ip,
            dest_ip,
            msg: msg.to_string(),
            error_id,
        }
    }
}

/// Render `now` in the fixed `+08:00` zone, e.g. `2024-03-01T20:15:00+08:00`.
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    (now.naive_utc() + chrono::Duration::hours(8))
        .format("%Y-%m-%dT%H:%M:%S+08:00")
        .to_string()
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Writes each record as one JSON line through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(line) => info!(target: AUDIT_TARGET, "{}", line),
            Err(e) => warn!(error = %e, queue = %record.queue, "Failed to serialize audit record"),
        }
    }
}

/// Builds audit records and hands them to a sink.
#[derive(Clone)]
pub struct AuditLogger {
    key: String,
    host_ip: Option<String>,
    sink: Arc<dyn AuditSink>,
}

impl AuditLogger {
    /// Logger tagging records with `key`, writing through `tracing`.
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            host_ip: None,
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the sink.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use a fixed host address instead of probing interfaces per record.
    pub fn with_host_ip(mut self, ip: &str) -> Self {
        self.host_ip = Some(ip.to_string());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build and emit a record.
    pub fn record(&self, direction: Direction, msg: &str, queue: &str) {
        let ip = match &self.host_ip {
            Some(ip) => ip.clone(),
            None => net::local_ipv4().map(|ip| ip.to_string()).unwrap_or_default(),
        };
        let record = AuditRecord::build(direction, msg, queue, &self.key, &ip, Utc::now());
        self.sink.emit(&record);
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(crate::DEFAULT_AUDIT_KEY)
    }
}

/// Sink that keeps records in memory.
#[cfg(test)]
#[derive(Default)]
pub struct CaptureSink {
    pub records: std::sync::Mutex<Vec<AuditRecord>>,
}

#[cfg(test)]
impl CaptureSink {
    pub fn take(&self) -> Vec<AuditRecord> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }
}

#[cfg(test)]
impl AuditSink for CaptureSink {
    fn emit(&self, record: &AuditRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}
