use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::job::{TaskRef, TaskStatus};
use crate::scheduler::store::JobStore;

/// What a client sends on every poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientReport {
    #[serde(default)]
    pub hostname: String,
    /// Empty until the coordinator has assigned one.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub max_threads: u32,
    #[serde(default)]
    pub free_threads: u32,
    #[serde(default)]
    pub tasks: Vec<TaskRef>,
}

/// The coordinator's view of a registered client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub ip_family: String,
    pub max_threads: u32,
    pub free_threads: u32,
    pub last_alive: DateTime<Utc>,
}

impl ClientRecord {
    /// Register a client seen for the first time at `peer`. The id is derived
    /// from the hostname and the observed address, never from the report.
    pub fn register(report: &ClientReport, peer: SocketAddr, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::derive_id(&report.hostname, peer),
            hostname: report.hostname.clone(),
            ip: peer.ip().to_string(),
            port: peer.port(),
            ip_family: if peer.is_ipv4() { "IPv4" } else { "IPv6" }.to_string(),
            max_threads: report.max_threads,
            free_threads: report.free_threads,
            last_alive: now,
        }
    }

    /// `<hostname>-<ip>:<port>`.
    pub fn derive_id(hostname: &str, peer: SocketAddr) -> String {
        format!("{}-{}:{}", hostname, peer.ip(), peer.port())
    }

    /// Time since the last update, zero if `now` is earlier.
    pub fn staleness(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_alive).to_std().unwrap_or_default()
    }

    pub fn is_alive(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.staleness(now) < timeout
    }
}

/// Decides how much of a client's self-report the coordinator accepts.
///
/// Scheduling only ever sees what this returns, so a verifying variant can
/// replace [`TrustClient`] without touching the assigner.
pub trait ClientTrust: Send + Sync {
    /// Status to store for a task, given the coordinator's and the client's view.
    fn accept_status(&self, current: TaskStatus, reported: TaskStatus) -> TaskStatus;

    /// Free capacity to record for the client.
    fn accept_free_threads(&self, client: &ClientRecord, reported: u32) -> u32;
}

/// Takes every report at face value: the client is the source of truth for
/// execution outcomes, including moves that look backwards (`completed` to
/// `pending`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustClient;

impl ClientTrust for TrustClient {
    fn accept_status(&self, _current: TaskStatus, reported: TaskStatus) -> TaskStatus {
        reported
    }

    fn accept_free_threads(&self, _client: &ClientRecord, reported: u32) -> u32 {
        reported
    }
}

/// Result of folding one client report into the coordinator state.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub client: ClientRecord,
    pub tasks_to_remove: Vec<TaskRef>,
}

/// Registered clients. Nothing is ever evicted; staleness is exposed via
/// [`ClientRecord::staleness`] for operators to act on.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientRecord>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ClientRecord> {
        self.clients.get(id)
    }

    /// All clients, ordered by id.
    pub fn all_clients(&self) -> Vec<&ClientRecord> {
        let mut clients: Vec<&ClientRecord> = self.clients.values().collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients whose last update is older than `timeout`.
    pub fn stale_clients(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<&ClientRecord> {
        self.all_clients()
            .into_iter()
            .filter(|c| !c.is_alive(now, timeout))
            .collect()
    }

    /// Fold a client's report into the store and the registry.
    ///
    /// Unknown clients are registered. Every reported task status that
    /// differs from the stored one overwrites it (as filtered by `trust`), and
    /// every task the client reports as `completed` or `error` is returned in
    /// `tasks_to_remove` so the client can stop tracking it.
    pub fn reconcile(
        &mut self,
        store: &mut JobStore,
        report: &ClientReport,
        peer: SocketAddr,
        trust: &dyn ClientTrust,
        now: DateTime<Utc>,
    ) -> Reconciliation {
        let client_id = if self.clients.contains_key(&report.id) {
            report.id.clone()
        } else {
            ClientRecord::derive_id(&report.hostname, peer)
        };

        let mut tasks_to_remove = Vec::new();
        for reported in &report.tasks {
            if reported.task.status.is_terminal() {
                tasks_to_remove.push(reported.clone());
            }

            let job_id = &reported.job.id;
            let index = reported.task.index;
            let Some(current) = store
                .find_by_id(job_id)
                .and_then(|job| job.tasks.get(index))
                .map(|task| task.status)
            else {
                tracing::warn!(
                    client_id = %client_id,
                    job_id = %job_id,
                    task_index = index,
                    "Client reported an unknown task"
                );
                continue;
            };

            let accepted = trust.accept_status(current, reported.task.status);
            if store.set_task_status(job_id, index, accepted) == Some(true) {
                tracing::debug!(
                    client_id = %client_id,
                    job_id = %job_id,
                    task_index = index,
                    from = %current,
                    to = %accepted,
                    "Task status updated"
                );
            }
        }

        let client = self.clients.entry(client_id).or_insert_with(|| {
            let record = ClientRecord::register(report, peer, now);
            tracing::info!(
                client_id = %record.id,
                max_threads = record.max_threads,
                "Client registered"
            );
            record
        });
        let free_threads = trust.accept_free_threads(client, report.free_threads);
        client.free_threads = free_threads;
        client.last_alive = now;
        let client = client.clone();

        Reconciliation {
            client,
            tasks_to_remove,
        }
    }
}
