//! The single entry point for running a script

use std::sync::Arc;

use async_trait::async_trait;
use scriptbox_config::ExecutionConfig;
use scriptbox_ipc::{JobRequest, JobResponse};
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{ExecutionError, ExecutionResult};
use crate::worker::WorkerProcess;

/// Where the dispatcher gets workers from
#[async_trait]
pub trait WorkerSource: Send + Sync {
    async fn get(&self) -> ExecutionResult<WorkerProcess>;

    fn enqueue(&self, worker: WorkerProcess);
}

/// Who a job runs on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub service: String,
    pub user_id: String,
    pub user_name: String,
}

impl Identity {
    pub fn new(
        service: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        for (field, value) in [
            ("service", &self.service),
            ("user id", &self.user_id),
            ("user name", &self.user_name),
        ] {
            if value.trim().is_empty() {
                return Err(ExecutionError::InvalidIdentity(format!("{} is empty", field)));
            }
        }
        Ok(())
    }
}

/// One request to execute source code
#[derive(Debug, Clone)]
pub struct Job {
    /// Correlation id for logs
    pub id: Uuid,
    pub identity: Identity,
    pub source: String,
}

impl Job {
    pub fn new(identity: Identity, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            source: source.into(),
        }
    }

    pub fn to_request(&self) -> JobRequest {
        JobRequest {
            service: self.identity.service.clone(),
            user_id: self.identity.user_id.clone(),
            user_name: self.identity.user_name.clone(),
            source: self.source.clone(),
        }
    }
}

/// What a run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub output: String,
    pub image: Option<Vec<u8>>,
}

impl RunOutcome {
    pub fn message(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            image: None,
        }
    }
}

impl From<JobResponse> for RunOutcome {
    fn from(response: JobResponse) -> Self {
        Self {
            output: response.output,
            image: response.image,
        }
    }
}

pub struct ExecutionDispatcher {
    workers: Arc<dyn WorkerSource>,
    config: ExecutionConfig,
}

impl ExecutionDispatcher {
    pub fn new(workers: Arc<dyn WorkerSource>, config: ExecutionConfig) -> Self {
        Self { workers, config }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Run `source` and render every failure as output text
    ///
    /// Returns `None` for blank source: there is nothing to send back.
    pub async fn run(&self, identity: &Identity, source: &str) -> Option<RunOutcome> {
        match self.try_run(identity, source).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_classified() => {
                warn!(error = %e, "Run failed");
                Some(RunOutcome::message(e.user_message()))
            }
            Err(e) => {
                error!(error = ?e, "Unexpected error while running job");
                Some(RunOutcome::message(e.user_message()))
            }
        }
    }

    /// Run `source`, returning failures as errors
    pub async fn try_run(
        &self,
        identity: &Identity,
        source: &str,
    ) -> ExecutionResult<Option<RunOutcome>> {
        if source.trim().is_empty() {
            return Ok(None);
        }

        let length = source.chars().count();
        if length >= self.config.max_source_length {
            return Err(ExecutionError::ProgramTooLong {
                length,
                limit: self.config.max_source_length,
            });
        }

        identity.validate()?;

        let job = Job::new(identity.clone(), source);
        let span = info_span!("job", id = %job.id, service = %identity.service, user = %identity.user_id);
        self.dispatch(&job).instrument(span).await.map(Some)
    }

    async fn dispatch(&self, job: &Job) -> ExecutionResult<RunOutcome> {
        let mut worker = self.workers.get().await?;
        let timeout = self.config.job_timeout(worker.is_new());
        debug!(pid = worker.pid(), is_new = worker.is_new(), ?timeout, "Dispatching job");

        match worker.exchange(&job.to_request(), timeout).await {
            Ok(response) => {
                self.workers.enqueue(worker);
                Ok(response.into())
            }
            Err(e) => {
                worker.kill();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ProcessPool;
    use crate::testing::{fast_config, InProcessLauncher};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkerSource for CountingSource {
        async fn get(&self) -> ExecutionResult<WorkerProcess> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecutionError::PoolDisposed)
        }

        fn enqueue(&self, _worker: WorkerProcess) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn identity() -> Identity {
        Identity::new("test", "1", "tester")
    }

    fn counting_dispatcher() -> (Arc<CountingSource>, ExecutionDispatcher) {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = ExecutionDispatcher::new(source.clone(), ExecutionConfig::default());
        (source, dispatcher)
    }

    async fn pool_dispatcher(
        execution: ExecutionConfig,
    ) -> (Arc<InProcessLauncher>, Arc<ProcessPool>, ExecutionDispatcher) {
        let launcher = InProcessLauncher::new();
        let pool = ProcessPool::start(fast_config(1, 2), launcher.clone())
            .await
            .unwrap();
        let dispatcher = ExecutionDispatcher::new(pool.clone(), execution);
        (launcher, pool, dispatcher)
    }

    #[tokio::test]
    async fn test_long_source_never_touches_pool() {
        let (source, dispatcher) = counting_dispatcher();

        for length in [5000, 5001, 12_000] {
            let program = "x".repeat(length);
            let outcome = dispatcher.run(&identity(), &program).await.unwrap();
            assert_eq!(outcome.output, "ERROR: Program Too Long");
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_source_is_a_no_op() {
        let (source, dispatcher) = counting_dispatcher();

        assert!(dispatcher.run(&identity(), "").await.is_none());
        assert!(dispatcher.run(&identity(), "  \n\t").await.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pool_error_is_classified() {
        let (source, dispatcher) = counting_dispatcher();

        let outcome = dispatcher.run(&identity(), "1+1").await.unwrap();
        assert_eq!(outcome.output, "ERROR: Disposed");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_identity_is_an_exception() {
        let (source, dispatcher) = counting_dispatcher();

        let outcome = dispatcher
            .run(&Identity::new("test", " ", "tester"), "1+1")
            .await
            .unwrap();
        assert_eq!(
            outcome.output,
            "EXCEPTION: Invalid caller identity: user id is empty"
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_success_reuses_worker() {
        let (launcher, pool, dispatcher) = pool_dispatcher(ExecutionConfig::default()).await;

        let first = dispatcher.run(&identity(), "hello").await.unwrap();
        assert_eq!(first.output, "echo: hello");
        assert_eq!(first.image, None);

        let second = dispatcher.run(&identity(), "again").await.unwrap();
        assert_eq!(second.output, "echo: again");
        assert_eq!(launcher.killed_count(), 0);
        pool.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timeout_kills_worker() {
        let execution = ExecutionConfig {
            new_worker_timeout: Duration::from_millis(200),
            warm_worker_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (launcher, pool, dispatcher) = pool_dispatcher(execution).await;

        let outcome = dispatcher.run(&identity(), "sleep:2000").await.unwrap();
        assert_eq!(outcome.output, "ERROR: Timed Out");
        assert_eq!(launcher.killed_count(), 1);

        // Both slots of the pool are live workers again
        let first = pool.get().await.unwrap();
        let second = pool.get().await.unwrap();
        assert!(!first.is_dead() && !second.is_dead());
        assert_eq!(launcher.killed_count(), 1);
        pool.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_dying_mid_job() {
        let (launcher, pool, dispatcher) = pool_dispatcher(ExecutionConfig::default()).await;

        let outcome = dispatcher.run(&identity(), "die").await.unwrap();
        assert_eq!(outcome.output, "ERROR: Host Process Died");
        assert_eq!(launcher.killed_count(), 1);

        let after = dispatcher.run(&identity(), "still here").await.unwrap();
        assert_eq!(after.output, "echo: still here");
        pool.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_external_kill_mid_job() {
        let (launcher, pool, dispatcher) = pool_dispatcher(ExecutionConfig::default()).await;
        let dispatcher = Arc::new(dispatcher);

        let running = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(&identity(), "sleep:3000").await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        launcher.kill_all();

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.output, "ERROR: Host Process Died");
        pool.shutdown();
    }
}
