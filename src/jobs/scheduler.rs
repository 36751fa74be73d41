//! Traversal job scheduling.
//!
//! `submit` registers a `Pending` job and returns its id at once. A small pool
//! of dispatch workers picks submitted jobs off a queue and re-marshals each
//! one onto the home context, which is the only place the graph is queried.
//! The pool exists to get work off the request path; traversals themselves
//! still run one at a time on the home thread.
//!
//! While any job is queued or running, the auto route skips its inline check:
//! that check runs on the same home thread and would wait behind the queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::Result;
use crate::graph::{build_reference_chain, build_within_limit, clamp_depth, Direction, GraphDataSource, NodeRef, ReferenceChain};
use crate::jobs::chunk::Payload;
use crate::jobs::home::{panic_message, HomeHandle};
use crate::jobs::store::JobStore;

/// Parameters of one reference-chain traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalRequest {
    pub start: NodeRef,
    pub direction: Direction,
    pub max_depth: u32,
}

impl TraversalRequest {
    /// Build a request, clamping `depth` into the supported range.
    pub fn new(start: impl Into<NodeRef>, direction: Direction, depth: i64) -> Self {
        Self {
            start: start.into(),
            direction,
            max_depth: clamp_depth(depth),
        }
    }
}

/// What happened to a job once it reached the home context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Done { total_chars: usize },
    Failed(String),
    /// The job was evicted or already terminal before it could start
    Skipped,
}

struct Dispatch {
    id: Uuid,
    request: TraversalRequest,
    submitted_at: Instant,
    _ticket: InFlightTicket,
}

/// Counts a submitted job until its dispatch is dropped.
struct InFlightTicket(Arc<AtomicUsize>);

impl InFlightTicket {
    fn issue(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type DispatchQueue = Arc<Mutex<mpsc::UnboundedReceiver<Dispatch>>>;

/// Front door for traversal jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobScheduler {
    store: JobStore,
    home: HomeHandle,
    tx: mpsc::UnboundedSender<Dispatch>,
    in_flight: Arc<AtomicUsize>,
}

/// The dispatch workers behind a [`JobScheduler`].
pub struct DispatchPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    queue: DispatchQueue,
    store: JobStore,
}

impl JobScheduler {
    /// Start `workers` dispatch workers on the current tokio runtime.
    pub fn start(store: JobStore, home: HomeHandle, workers: usize) -> (Self, DispatchPool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue: DispatchQueue = Arc::new(Mutex::new(rx));

        let joins = (0..workers.max(1))
            .map(|worker_id| {
                let queue = Arc::clone(&queue);
                let store = store.clone();
                let home = home.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    dispatch_loop(worker_id, queue, store, home, shutdown_rx).await;
                })
            })
            .collect();

        let scheduler = Self {
            store: store.clone(),
            home,
            tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        };
        let pool = DispatchPool {
            shutdown_tx,
            joins,
            queue,
            store,
        };
        (scheduler, pool)
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn home(&self) -> &HomeHandle {
        &self.home
    }

    /// Jobs submitted through this scheduler that are queued or running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Register a traversal job and queue it. Never waits for the traversal.
    ///
    /// If the dispatch pool is already shut down the job is created in the
    /// `Error` state, so the caller still gets an id it can query.
    pub fn submit(&self, request: TraversalRequest) -> Uuid {
        let id = self.store.create();
        log::info!(
            "Job {} submitted: {} ({}, depth {})",
            id,
            request.start,
            request.direction,
            request.max_depth
        );

        let dispatch = Dispatch {
            id,
            request,
            submitted_at: Instant::now(),
            _ticket: InFlightTicket::issue(&self.in_flight),
        };
        if self.tx.send(dispatch).is_err() {
            log::warn!("Job {} rejected: dispatch pool is shut down", id);
            self.store.fail(&id, "scheduler is shut down");
        }
        id
    }

    /// Run the traversal on the home context only if it yields fewer than
    /// `node_limit` nodes. `None` means the caller should submit a job instead.
    pub async fn try_inline(
        &self,
        request: &TraversalRequest,
        node_limit: usize,
    ) -> Result<Option<ReferenceChain>> {
        let request = request.clone();
        self.home
            .call(move |source| {
                build_within_limit(
                    &request.start,
                    request.max_depth,
                    request.direction,
                    source,
                    node_limit,
                )
            })
            .await?
    }
}

impl DispatchPool {
    /// Stop taking new dispatches, wait for the workers, and fail whatever
    /// was still queued.
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        for join in self.joins {
            let _ = join.await;
        }

        let mut queue = self.queue.lock().await;
        queue.close();
        while let Ok(dispatch) = queue.try_recv() {
            self.store
                .fail(&dispatch.id, "scheduler shut down before the job started");
        }
        log::info!("Dispatch pool stopped");
    }
}

async fn dispatch_loop(
    worker_id: usize,
    queue: DispatchQueue,
    store: JobStore,
    home: HomeHandle,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = shutdown_rx.changed() => None,
                dispatch = rx.recv() => dispatch,
            }
        };
        let Some(dispatch) = next else {
            break;
        };

        let Dispatch { id, request, submitted_at, _ticket } = dispatch;
        let job_store = store.clone();
        let outcome = home
            .call(move |source| run_traversal(&job_store, &id, &request, source))
            .await;

        match outcome {
            Ok(JobOutcome::Done { total_chars }) => log::info!(
                "[dispatch-{}] job {} done: {} chars in {:?}",
                worker_id,
                id,
                total_chars,
                submitted_at.elapsed()
            ),
            Ok(JobOutcome::Failed(e)) => {
                log::warn!("[dispatch-{}] job {} failed: {}", worker_id, id, e)
            }
            Ok(JobOutcome::Skipped) => {
                log::debug!("[dispatch-{}] job {} skipped", worker_id, id)
            }
            Err(e) => {
                log::error!("[dispatch-{}] job {} lost: {}", worker_id, id, e);
                store.fail(&id, e.to_string());
            }
        }
    }
    log::debug!("[dispatch-{}] stopped", worker_id);
}

/// Execute one job. Must run on the home context.
fn run_traversal(
    store: &JobStore,
    id: &Uuid,
    request: &TraversalRequest,
    source: &dyn GraphDataSource,
) -> JobOutcome {
    if !store.mark_running(id) {
        return JobOutcome::Skipped;
    }
    log::debug!("Job {} running", id);

    let built = catch_unwind(AssertUnwindSafe(|| -> Result<String> {
        let chain = build_reference_chain(&request.start, request.max_depth, request.direction, source)?;
        Ok(serde_json::to_string(&chain)?)
    }));

    let message = match built {
        Ok(Ok(json)) => {
            let payload = Payload::new(json);
            let total_chars = payload.char_len();
            if store.complete(id, payload) {
                return JobOutcome::Done { total_chars };
            }
            return JobOutcome::Skipped;
        }
        Ok(Err(e)) => e.to_string(),
        Err(panic) => format!("traversal panicked: {}", panic_message(&*panic)),
    };

    store.fail(id, message.clone());
    JobOutcome::Failed(message)
}
