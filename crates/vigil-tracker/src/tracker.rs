//! The request tracker.
//!
//! Entries live in a `DashMap` keyed by request id.  A signal for one id
//! takes only that id's shard lock, so unrelated requests update in
//! parallel.  The completed-id window has its own mutex; whenever both are
//! needed it is taken first, then the map.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use vigil_contracts::{
    error::{VigilError, VigilResult},
    payload::{RecordPayload, Submission},
    request::{
        domain_of, CompletionInfo, CompletionStatus, ConnectInfo, DnsInfo, RequestRecord,
        RequestStart, ResponseInfo, TlsInfo,
    },
    stream::StreamId,
};
use vigil_core::traits::AuditSink;

/// Sealed-field name for the request's `Cookie` header.
pub const REQUEST_COOKIE_FIELD: &str = "request.cookie";
/// Sealed-field name for the response's `Set-Cookie` header(s).
pub const RESPONSE_SET_COOKIE_FIELD: &str = "response.set-cookie";

// ── Configuration ─────────────────────────────────────────────────────────────

/// What the sweep does with a request that never completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonPolicy {
    /// Commit what is known, marked `Incomplete`.
    #[default]
    RecordIncomplete,
    /// Drop the entry.  Nothing is logged to the ledger.
    Discard,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Age after which an uncompleted entry is swept.
    pub abandon_after: Duration,
    pub policy: AbandonPolicy,
    /// How many completed ids to remember for duplicate detection.
    pub completed_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            abandon_after: Duration::from_secs(120),
            policy: AbandonPolicy::RecordIncomplete,
            completed_window: 4096,
        }
    }
}

/// Result of one `sweep_abandoned` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sequences of the incomplete records committed.
    pub recorded: Vec<u64>,
    pub discarded: usize,
    /// Entries whose incomplete record could not be appended.  They stay
    /// tracked and are retried by the next sweep.
    pub failed: usize,
}

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    start: RequestStart,
    dns: Option<DnsInfo>,
    connection: Option<ConnectInfo>,
    tls: Option<TlsInfo>,
    response: Option<ResponseInfo>,
    opened: Instant,
}

/// Bounded FIFO set of recently completed request ids.
#[derive(Debug)]
struct CompletedWindow {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl CompletedWindow {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn remove(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|existing| existing != id);
        }
    }
}

// ── RequestTracker ────────────────────────────────────────────────────────────

/// Assembles per-request signals into one network-stream record.
///
/// `start` must come first and `complete` last; the DNS, connect, TLS and
/// response signals may arrive in any order in between and each fills its
/// own slot, so the final record does not depend on their order.
pub struct RequestTracker {
    sink: Arc<dyn AuditSink>,
    config: TrackerConfig,
    entries: DashMap<String, Entry>,
    completed: Mutex<CompletedWindow>,
}

impl RequestTracker {
    pub fn new(sink: Arc<dyn AuditSink>, config: TrackerConfig) -> Self {
        let completed = Mutex::new(CompletedWindow::new(config.completed_window));
        Self {
            sink,
            config,
            entries: DashMap::new(),
            completed,
        }
    }

    /// Timeout, abandon policy and completed-id window in force.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Number of requests started but not yet completed or swept.
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    fn completed(&self) -> VigilResult<MutexGuard<'_, CompletedWindow>> {
        self.completed.lock().map_err(|e| VigilError::StorageUnavailable {
            reason: format!("tracker completed-id lock poisoned: {}", e),
        })
    }

    /// Begin tracking a request.
    ///
    /// A duplicate id (still in flight, or recently completed) is rejected
    /// with `DuplicateRequest` and logged; the existing entry is untouched.
    pub fn start(&self, start: RequestStart) -> VigilResult<()> {
        let completed = self.completed()?;
        let request_id = start.request_id.clone();
        if completed.contains(&request_id) {
            warn!(request_id = %request_id, "start for an already completed request ignored");
            return Err(VigilError::DuplicateRequest { request_id });
        }
        match self.entries.entry(request_id.clone()) {
            MapEntry::Occupied(_) => {
                warn!(request_id = %request_id, "duplicate start ignored");
                Err(VigilError::DuplicateRequest { request_id })
            }
            MapEntry::Vacant(slot) => {
                debug!(request_id = %request_id, target = %start.target, "request started");
                slot.insert(Entry {
                    start,
                    dns: None,
                    connection: None,
                    tls: None,
                    response: None,
                    opened: Instant::now(),
                });
                Ok(())
            }
        }
    }

    fn merge(&self, request_id: &str, signal: &'static str, apply: impl FnOnce(&mut Entry)) -> bool {
        match self.entries.get_mut(request_id) {
            Some(mut entry) => {
                apply(entry.value_mut());
                debug!(request_id, signal, "signal merged");
                true
            }
            None => {
                warn!(request_id, signal, "signal for unknown request ignored");
                false
            }
        }
    }

    /// Returns `false` (and logs) if the id is not in flight.
    pub fn on_dns(&self, request_id: &str, info: DnsInfo) -> bool {
        self.merge(request_id, "dns", |e| e.dns = Some(info))
    }

    /// Record the connection details; `false` if the id is not in flight.
    pub fn on_connect(&self, request_id: &str, info: ConnectInfo) -> bool {
        self.merge(request_id, "connect", |e| e.connection = Some(info))
    }

    /// Record the TLS handshake details; `false` if the id is not in flight.
    pub fn on_tls(&self, request_id: &str, info: TlsInfo) -> bool {
        self.merge(request_id, "tls", |e| e.tls = Some(info))
    }

    /// Record the response status and headers; `false` if the id is not in flight.
    pub fn on_response(&self, request_id: &str, info: ResponseInfo) -> bool {
        self.merge(request_id, "response", |e| e.response = Some(info))
    }

    /// Finish a request and commit its record to the network stream.
    ///
    /// Errors:
    /// - `UnknownRequest` if `start` was never seen
    /// - `AlreadyCompleted` if this id was completed (or swept) recently
    /// - any ledger error from the append; the entry is then restored so
    ///   the caller can retry the whole completion
    pub fn complete(&self, request_id: &str, info: CompletionInfo) -> VigilResult<u64> {
        let entry = self.take(request_id)?;
        let submission = build_submission(&entry, Some(info), CompletionStatus::Complete);

        match self.sink.append(StreamId::Network, submission) {
            Ok(sequence) => {
                info!(request_id, sequence, "request committed");
                Ok(sequence)
            }
            Err(e) => {
                error!(request_id, error = %e, "request append failed; entry restored");
                self.restore(request_id, entry)?;
                Err(e)
            }
        }
    }

    /// Remove an in-flight entry and mark its id completed, atomically with
    /// respect to other `complete` / `start` calls.
    fn take(&self, request_id: &str) -> VigilResult<Entry> {
        let mut completed = self.completed()?;
        match self.entries.remove(request_id) {
            Some((id, entry)) => {
                completed.insert(id);
                Ok(entry)
            }
            None if completed.contains(request_id) => {
                warn!(request_id, "duplicate completion rejected");
                Err(VigilError::AlreadyCompleted {
                    request_id: request_id.to_string(),
                })
            }
            None => {
                warn!(request_id, "completion for unknown request rejected");
                Err(VigilError::UnknownRequest {
                    request_id: request_id.to_string(),
                })
            }
        }
    }

    fn restore(&self, request_id: &str, entry: Entry) -> VigilResult<()> {
        let mut completed = self.completed()?;
        self.entries.insert(request_id.to_string(), entry);
        completed.remove(request_id);
        Ok(())
    }

    /// Close out entries older than `abandon_after` according to the policy.
    pub fn sweep_abandoned(&self) -> SweepReport {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.opened.elapsed() >= self.config.abandon_after)
            .map(|e| e.key().clone())
            .collect();

        let mut report = SweepReport::default();
        for request_id in stale {
            // The request may have completed since the scan.
            let entry = match self.take(&request_id) {
                Ok(entry) => entry,
                Err(_) => continue,
            };

            match self.config.policy {
                AbandonPolicy::Discard => {
                    warn!(request_id = %request_id, "abandoned request discarded");
                    report.discarded += 1;
                }
                AbandonPolicy::RecordIncomplete => {
                    let status = CompletionStatus::Incomplete {
                        reason: format!(
                            "no completion signal within {}s",
                            self.config.abandon_after.as_secs()
                        ),
                    };
                    let submission = build_submission(&entry, None, status);
                    match self.sink.append(StreamId::Network, submission) {
                        Ok(sequence) => {
                            warn!(request_id = %request_id, sequence, "abandoned request recorded as incomplete");
                            report.recorded.push(sequence);
                        }
                        Err(e) => {
                            error!(request_id = %request_id, error = %e, "incomplete record append failed");
                            if let Err(restore_err) = self.restore(&request_id, entry) {
                                error!(request_id = %request_id, error = %restore_err, "entry could not be restored");
                            }
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        report
    }
}

// ── Record assembly ───────────────────────────────────────────────────────────

/// Build the network-stream submission, moving cookie headers out of the
/// plaintext maps and into sensitive fields.
fn build_submission(
    entry: &Entry,
    completion: Option<CompletionInfo>,
    status: CompletionStatus,
) -> Submission {
    let start = &entry.start;
    let mut sensitive = BTreeMap::new();

    let (request_headers, cookies) = split_headers(&start.headers, "cookie");
    if let Some(cookies) = cookies {
        sensitive.insert(REQUEST_COOKIE_FIELD.to_string(), cookies);
    }

    let response = entry.response.as_ref().map(|r| {
        let (headers, set_cookies) = split_headers(&r.headers, "set-cookie");
        if let Some(set_cookies) = set_cookies {
            sensitive.insert(RESPONSE_SET_COOKIE_FIELD.to_string(), set_cookies);
        }
        ResponseInfo {
            headers,
            ..r.clone()
        }
    });

    let record = RequestRecord {
        request_id: start.request_id.clone(),
        target: start.target.clone(),
        domain: domain_of(&start.target),
        method: start.method.clone(),
        started_at: start.started_at,
        request_headers,
        dns: entry.dns.clone(),
        connection: entry.connection.clone(),
        tls: entry.tls.clone(),
        response,
        completion,
        user_initiated: start.user_initiated,
        navigation_id: start.navigation_id.clone(),
        process_id: start.process_id,
        status,
    };

    Submission {
        payload: RecordPayload::NetworkRequest(record),
        sensitive,
    }
}

/// Split `headers` into (everything else, values of `name` joined by newline).
/// Header names compare case-insensitively.
fn split_headers(
    headers: &BTreeMap<String, String>,
    name: &str,
) -> (BTreeMap<String, String>, Option<String>) {
    let mut kept = BTreeMap::new();
    let mut matched = Vec::new();
    for (key, value) in headers {
        if key.eq_ignore_ascii_case(name) {
            matched.push(value.as_str());
        } else {
            kept.insert(key.clone(), value.clone());
        }
    }
    let joined = if matched.is_empty() {
        None
    } else {
        Some(matched.join("\n"))
    };
    (kept, joined)
}
