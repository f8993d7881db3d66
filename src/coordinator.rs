use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::overview::Overview;
use crate::persistence::PersistQueue;
use crate::protocol::{Request, Response, UpdateReply};
use crate::scheduler::assigner::assign;
use crate::scheduler::{
    ClientRegistry, ClientReport, ClientTrust, Job, JobStore, SubmissionAck, TrustClient,
};

/// Everything scheduling reads or mutates. Only reachable through the
/// coordinator's lock.
#[derive(Debug)]
struct FarmState {
    store: JobStore,
    registry: ClientRegistry,
}

/// The scheduling core behind a single lock.
///
/// Each operation runs start to finish while holding the lock, so two polls
/// can never pick the same pending task. Nothing awaits I/O while the lock is
/// held: persistence is handed to a [`PersistQueue`], whose send never waits.
pub struct Coordinator {
    state: Mutex<FarmState>,
    trust: Arc<dyn ClientTrust>,
    persist: Option<PersistQueue>,
}

impl Coordinator {
    pub fn new(store: JobStore) -> Self {
        Self {
            state: Mutex::new(FarmState {
                store,
                registry: ClientRegistry::new(),
            }),
            trust: Arc::new(TrustClient),
            persist: None,
        }
    }

    pub fn with_trust(mut self, trust: Arc<dyn ClientTrust>) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_persistence(mut self, queue: PersistQueue) -> Self {
        self.persist = Some(queue);
        self
    }

    /// Parse and serve one request body from `peer`. `Ok(None)` is the
    /// empty reply to a no-op request.
    pub async fn dispatch(&self, body: &str, peer: SocketAddr) -> Result<Option<Response>> {
        match Request::parse(body)? {
            Request::Noop => Ok(None),
            Request::ClientUpdate(report) => {
                let reply = self.handle_update(&report, peer).await;
                Ok(Some(Response::Update(reply)))
            }
            Request::AddJobs(jobs) => {
                let acks = self.handle_submission(jobs).await;
                Ok(Some(Response::Ok(acks)))
            }
        }
    }

    /// One client poll: reconcile its report, then fill its free capacity.
    pub async fn handle_update(&self, report: &ClientReport, peer: SocketAddr) -> UpdateReply {
        self.handle_update_at(report, peer, Utc::now()).await
    }

    pub async fn handle_update_at(
        &self,
        report: &ClientReport,
        peer: SocketAddr,
        now: DateTime<Utc>,
    ) -> UpdateReply {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let reconciliation =
            state
                .registry
                .reconcile(&mut state.store, report, peer, self.trust.as_ref(), now);

        let new_tasks = assign(&mut state.store, &reconciliation.client);
        if !new_tasks.is_empty() {
            state.store.mark_dirty();
        }

        tracing::debug!(
            client_id = %reconciliation.client.id,
            new_tasks = new_tasks.len(),
            tasks_to_remove = reconciliation.tasks_to_remove.len(),
            "Client update served"
        );

        UpdateReply {
            client: reconciliation.client,
            new_tasks,
            tasks_to_remove: reconciliation.tasks_to_remove,
        }
    }

    /// Insert submitted jobs. No scheduling happens here; the next poll from
    /// any client picks the new tasks up.
    ///
    /// The new records are queued before the lock is released, so a later
    /// snapshot of the same jobs always reaches the writer after them.
    pub async fn handle_submission(&self, jobs: Vec<Job>) -> Vec<SubmissionAck> {
        let mut state = self.state.lock().await;
        let (acks, added) = state.store.add(jobs);
        if let Some(queue) = &self.persist {
            queue.enqueue(added);
        }
        acks
    }

    /// A copy of all jobs if anything changed since the last call.
    pub async fn take_dirty_snapshot(&self) -> Option<Vec<Job>> {
        self.state.lock().await.store.take_dirty_snapshot()
    }

    pub async fn job(&self, id: &str) -> Option<Job> {
        self.state.lock().await.store.find_by_id(id).cloned()
    }

    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.store.jobs().to_vec()
    }

    pub async fn overview(&self, now: DateTime<Utc>, client_timeout: Duration) -> Overview {
        let state = self.state.lock().await;
        Overview::collect(&state.store, &state.registry, now, client_timeout)
    }
}
