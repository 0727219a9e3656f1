//! Threaded execution runtime.
//!
//! The [`crate::engine::ResolutionEngine`] runs a job synchronously on the
//! calling thread. This module provides a small, bounded, thread-based
//! runtime on top of it: whole jobs run on one worker pool, and each hop's
//! per-collection queries fan out across a second pool, so a slow collection
//! does not serialize its hop and a heavy job does not block admission of
//! the next one. Queues are bounded; a full queue refuses new work instead
//! of letting it pile up.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendError, Sender, TrySendError};

use crate::engine::{ResolutionEngine, SearchDispatcher};
use crate::error::{EntwineError, ExecutionError};
use crate::model::EntityModel;
use crate::report::ResolutionResult;
use crate::request::ResolutionRequest;
use crate::search::{SearchBackend, SearchFailure, SearchOutcome, SearchRequest};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of workers running whole resolution jobs.
    pub resolution_workers: usize,
    /// Number of workers running individual hop queries.
    pub search_workers: usize,
    /// Maximum queued jobs per pool.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resolution_workers: 2,
            search_workers: 4,
            queue_capacity: 1024,
        }
    }
}

enum Job {
    Resolve {
        model: EntityModel,
        request: ResolutionRequest,
        reply: Sender<Result<ResolutionResult, EntwineError>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

/// One hop query delegated to the search pool.
struct SearchJob {
    slot: usize,
    request: SearchRequest,
    backend: Arc<dyn SearchBackend>,
    reply: Sender<(usize, SearchOutcome)>,
}

struct WorkerPool<J: Send + 'static> {
    name: &'static str,
    tx: Sender<J>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl<J: Send + 'static> WorkerPool<J> {
    fn start<F>(name: &'static str, workers: usize, queue_capacity: usize, run: F) -> Self
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<J>(queue_capacity);
        let run = Arc::new(run);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<J> = rx.clone();
            let run = Arc::clone(&run);
            let thread_name = format!("entwine-{name}-{idx}");
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        run(job);
                    }
                })
                .expect("failed to spawn entwine worker");
            handles.push(handle);
        }

        Self {
            name,
            tx,
            workers: handles,
            queue_capacity,
        }
    }

    fn try_submit(&self, job: J) -> Result<(), EntwineError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(EntwineError::Execution(ExecutionError::QueueFull {
                    pool: self.name.to_string(),
                    capacity: self.queue_capacity,
                }))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(EntwineError::Execution(ExecutionError::Disconnected {
                    pool: self.name.to_string(),
                }))
            }
        }
    }

    fn shutdown(self) {
        // Close the channel: workers will drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }

    fn hollow(name: &'static str) -> Self {
        Self {
            name,
            tx: bounded::<J>(1).0,
            workers: Vec::new(),
            queue_capacity: 1,
        }
    }
}

/// Dispatches a hop's queries across a bounded pool of search workers.
///
/// Submission blocks when the search queue is full, applying backpressure to
/// the job rather than failing its hop. If the pool is gone, queries run
/// inline on the job's thread so the hop still completes.
pub struct PooledDispatcher {
    pool: WorkerPool<SearchJob>,
}

impl PooledDispatcher {
    /// Starts a search pool with the given worker count and queue depth.
    #[must_use]
    pub fn start(workers: usize, queue_capacity: usize) -> Self {
        Self {
            pool: WorkerPool::start("search", workers, queue_capacity, |job: SearchJob| {
                let outcome = job.backend.search(&job.request);
                let _ = job.reply.send((job.slot, outcome));
            }),
        }
    }
}

impl SearchDispatcher for PooledDispatcher {
    fn dispatch(
        &self,
        backend: &Arc<dyn SearchBackend>,
        requests: Vec<SearchRequest>,
    ) -> Vec<SearchOutcome> {
        let total = requests.len();
        let collections: Vec<String> = requests
            .iter()
            .map(|request| request.collection.clone())
            .collect();
        let (reply, replies) = bounded::<(usize, SearchOutcome)>(total.max(1));

        let mut outcomes: Vec<Option<SearchOutcome>> = (0..total).map(|_| None).collect();
        let mut pending = 0_usize;
        for (slot, request) in requests.into_iter().enumerate() {
            let job = SearchJob {
                slot,
                request,
                backend: Arc::clone(backend),
                reply: reply.clone(),
            };
            match self.pool.tx.send(job) {
                Ok(()) => pending += 1,
                Err(SendError(job)) => {
                    outcomes[job.slot] = Some(job.backend.search(&job.request));
                }
            }
        }
        drop(reply);

        for _ in 0..pending {
            match replies.recv() {
                Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
                Err(_) => break,
            }
        }

        outcomes
            .into_iter()
            .enumerate()
            .map(|(slot, outcome)| {
                outcome.unwrap_or_else(|| {
                    SearchOutcome::Fatal(SearchFailure {
                        collection: collections[slot].clone(),
                        message: "search worker exited before answering".to_string(),
                        trace: None,
                    })
                })
            })
            .collect()
    }
}

impl Drop for PooledDispatcher {
    fn drop(&mut self) {
        let pool = std::mem::replace(&mut self.pool, WorkerPool::hollow("search"));
        pool.shutdown();
    }
}

/// Handle returned by [`ResolutionRuntime::submit`].
pub struct ResolutionHandle {
    rx: Receiver<Result<ResolutionResult, EntwineError>>,
}

impl ResolutionHandle {
    /// Waits for the job to complete.
    pub fn join(self) -> Result<ResolutionResult, EntwineError> {
        self.rx
            .recv()
            .map_err(|_| {
                EntwineError::Execution(ExecutionError::Disconnected {
                    pool: "resolve".to_string(),
                })
            })?
    }

    /// Waits for the job to complete with a timeout.
    pub fn join_timeout(self, timeout: Duration) -> Result<ResolutionResult, EntwineError> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|err| match err {
                crossbeam_channel::RecvTimeoutError::Timeout => {
                    EntwineError::Execution(ExecutionError::Timeout {
                        duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                    })
                }
                crossbeam_channel::RecvTimeoutError::Disconnected => {
                    EntwineError::Execution(ExecutionError::Disconnected {
                        pool: "resolve".to_string(),
                    })
                }
            })?
    }
}

/// A bounded, threaded runtime for resolution jobs.
pub struct ResolutionRuntime {
    engine: Arc<ResolutionEngine>,
    jobs: WorkerPool<Job>,
}

impl ResolutionRuntime {
    /// Starts the runtime's worker pools over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn SearchBackend>, config: RuntimeConfig) -> Self {
        let dispatcher = Arc::new(PooledDispatcher::start(
            config.search_workers,
            config.queue_capacity,
        ));
        let engine = Arc::new(ResolutionEngine::with_dispatcher(backend, dispatcher));
        let worker_engine = Arc::clone(&engine);
        let jobs = WorkerPool::start(
            "resolve",
            config.resolution_workers,
            config.queue_capacity,
            move |job: Job| match job {
                Job::Resolve {
                    model,
                    request,
                    reply,
                } => {
                    let _ = reply.send(worker_engine.resolve(&model, &request));
                }

                #[cfg(test)]
                Job::Sleep { duration, reply } => {
                    thread::sleep(duration);
                    let _ = reply.send(());
                }
            },
        );
        Self { engine, jobs }
    }

    /// Queues one resolution job, returning a handle to collect its result.
    pub fn submit(
        &self,
        model: EntityModel,
        request: ResolutionRequest,
    ) -> Result<ResolutionHandle, EntwineError> {
        let (tx, rx) = bounded::<Result<ResolutionResult, EntwineError>>(1);
        self.jobs.try_submit(Job::Resolve {
            model,
            request,
            reply: tx,
        })?;
        Ok(ResolutionHandle { rx })
    }

    /// Runs one resolution job on a pool worker, blocking until it finishes.
    pub fn resolve(
        &self,
        model: EntityModel,
        request: ResolutionRequest,
    ) -> Result<ResolutionResult, EntwineError> {
        self.submit(model, request)?.join()
    }

    /// Returns the engine backing this runtime, for callers that want to run
    /// a job inline on their own thread.
    #[must_use]
    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> Result<Receiver<()>, EntwineError> {
        let (tx, rx) = bounded::<()>(1);
        self.jobs.try_submit(Job::Sleep {
            duration,
            reply: tx,
        })?;
        Ok(rx)
    }
}

impl Drop for ResolutionRuntime {
    fn drop(&mut self) {
        // Deterministic shutdown: stop workers and join threads. This is
        // fast because idle workers block on recv().
        let jobs = std::mem::replace(&mut self.jobs, WorkerPool::hollow("resolve"));
        jobs.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::config::SearchTuning;
    use crate::request::ResolutionRequestBuilder;
    use crate::search::MemorySearchBackend;

    fn model() -> EntityModel {
        EntityModel::from_json(
            r#"{
                "attributes": {
                    "name": {"type": "string"},
                    "phone": {"type": "string"}
                },
                "matchers": {
                    "exact": {"clause": {"term": {"{{ field }}": "{{ value }}"}}}
                },
                "resolvers": {
                    "by_name": {"attributes": ["name"]},
                    "by_phone": {"attributes": ["phone"]}
                },
                "indices": {
                    "contacts": {
                        "fields": {
                            "contact_name": {"attribute": "name", "matcher": "exact"},
                            "contact_tel": {"attribute": "phone", "matcher": "exact"}
                        }
                    },
                    "people": {
                        "fields": {
                            "full_name": {"attribute": "name", "matcher": "exact"},
                            "tel": {"attribute": "phone", "matcher": "exact"}
                        }
                    }
                }
            }"#,
        )
        .expect("fixture model parses")
    }

    fn backend() -> Arc<MemorySearchBackend> {
        let backend = MemorySearchBackend::new();
        backend.insert(
            "people",
            "d1",
            json!({"full_name": "alice", "tel": "555-0100"}),
        );
        backend.insert(
            "people",
            "d2",
            json!({"full_name": "bob", "tel": "555-0199"}),
        );
        backend.insert(
            "contacts",
            "c1",
            json!({"contact_name": "alice", "contact_tel": "555-0199"}),
        );
        Arc::new(backend)
    }

    fn request_for(collection: &str) -> SearchRequest {
        SearchRequest {
            collection: collection.to_string(),
            body: json!({"query": {"match_all": {}}, "size": 10, "_source": true}),
            timeout: Duration::from_secs(1),
            tuning: SearchTuning::default(),
        }
    }

    #[test]
    fn resolves_through_the_worker_pools() {
        let runtime = ResolutionRuntime::new(backend(), RuntimeConfig::default());
        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .build()
            .unwrap();
        let result = runtime.resolve(model(), request).unwrap();

        assert!(result.is_success());
        let found: Vec<(&str, &str, u32)> = result
            .hits
            .iter()
            .map(|hit| (hit.collection.as_str(), hit.id.as_str(), hit.hop))
            .collect();
        assert_eq!(
            found,
            vec![("contacts", "c1", 0), ("people", "d1", 0), ("people", "d2", 1)]
        );
    }

    #[test]
    fn full_queue_refuses_new_jobs() {
        let runtime = ResolutionRuntime::new(
            backend(),
            RuntimeConfig {
                resolution_workers: 1,
                search_workers: 1,
                queue_capacity: 1,
            },
        );

        // Occupy the single worker, then fill the single queue slot.
        let busy = runtime.submit_sleep(Duration::from_millis(200)).unwrap();
        thread::sleep(Duration::from_millis(50));
        let queued = runtime.submit_sleep(Duration::from_millis(10)).unwrap();

        let request = ResolutionRequestBuilder::new()
            .attribute("name", vec![json!("alice")])
            .build()
            .unwrap();
        let Err(err) = runtime.submit(model(), request) else {
            panic!("expected QueueFull");
        };
        let EntwineError::Execution(ExecutionError::QueueFull { pool, capacity }) = err else {
            panic!("expected QueueFull, got {err:?}");
        };
        assert_eq!(pool, "resolve");
        assert_eq!(capacity, 1);

        busy.recv_timeout(Duration::from_secs(1)).unwrap();
        queued.recv_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn join_reports_disconnected_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<Result<ResolutionResult, EntwineError>>(1);
        // Drop sender without sending, so recv() must see Disconnected.
        drop(tx);

        let handle = ResolutionHandle { rx };
        let err = handle.join().unwrap_err();
        let EntwineError::Execution(ExecutionError::Disconnected { pool }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(pool, "resolve");
    }

    #[test]
    fn join_timeout_reports_disconnected_not_timeout_when_reply_sender_dropped() {
        let (tx, rx) = bounded::<Result<ResolutionResult, EntwineError>>(1);
        drop(tx);

        let handle = ResolutionHandle { rx };
        let err = handle.join_timeout(Duration::from_millis(10)).unwrap_err();
        let EntwineError::Execution(ExecutionError::Disconnected { pool }) = err else {
            panic!("expected Disconnected, got {err:?}");
        };
        assert_eq!(pool, "resolve");
    }

    #[test]
    fn outcomes_line_up_with_requests_by_position() {
        let search_backend = MemorySearchBackend::new();
        search_backend.insert("people", "d1", json!({"full_name": "alice"}));
        search_backend.insert("contacts", "c1", json!({"contact_name": "alice"}));
        let search_backend: Arc<dyn SearchBackend> = Arc::new(search_backend);

        for workers in [1, 4] {
            let dispatcher = PooledDispatcher::start(workers, 16);
            for _ in 0..8 {
                let requests = vec![
                    request_for("contacts"),
                    request_for("people"),
                    request_for("contacts"),
                ];
                let outcomes = dispatcher.dispatch(&search_backend, requests);
                let ids: Vec<&str> = outcomes
                    .iter()
                    .map(|outcome| match outcome {
                        SearchOutcome::Ok(response) => response.hits[0].id.as_str(),
                        other => panic!("unexpected outcome {other:?}"),
                    })
                    .collect();
                assert_eq!(ids, ["c1", "d1", "c1"]);
            }
        }
    }

    #[test]
    fn dispatch_falls_back_inline_when_the_pool_is_gone() {
        let search_backend = MemorySearchBackend::new();
        search_backend.insert("people", "d1", json!({"full_name": "alice"}));
        let search_backend: Arc<dyn SearchBackend> = Arc::new(search_backend);

        let dead = PooledDispatcher {
            pool: WorkerPool {
                name: "search",
                tx: {
                    let (tx, rx) = bounded::<SearchJob>(1);
                    drop(rx);
                    tx
                },
                workers: Vec::new(),
                queue_capacity: 1,
            },
        };
        let outcomes = dead.dispatch(&search_backend, vec![request_for("people")]);
        assert_eq!(outcomes.len(), 1);
        let SearchOutcome::Ok(response) = &outcomes[0] else {
            panic!("expected a successful outcome");
        };
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].id, "d1");
    }
}
