//! Pool tests against real `scriptbox --worker` processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use scriptbox_config::{ExecutionConfig, PoolConfig};
use scriptbox_execution::{CommandLauncher, ExecutionDispatcher, Identity, ProcessPool};
use tempfile::{tempdir, TempDir};

fn pool_config(dir: &TempDir) -> PoolConfig {
    let mut config = PoolConfig {
        min_workers: 1,
        max_workers: 2,
        port: 0,
        spawn_cooldown: Duration::from_millis(100),
        worker_program: Some(PathBuf::from(env!("CARGO_BIN_EXE_scriptbox"))),
        limiters_enabled: false,
        ..PoolConfig::default()
    };
    config.worker_env.insert(
        "SCRIPTBOX_DATABASE_URL".to_string(),
        format!("sqlite://{}?mode=rwc", dir.path().join("vars.db").display()),
    );
    config
        .worker_env
        .insert("SCRIPTBOX_LOG_LEVEL".to_string(), "error".to_string());
    config
}

fn execution_config(timeout: Duration) -> ExecutionConfig {
    ExecutionConfig {
        new_worker_timeout: timeout,
        warm_worker_timeout: timeout,
        ..ExecutionConfig::default()
    }
}

async fn start(dir: &TempDir, timeout: Duration) -> (Arc<ProcessPool>, Arc<ExecutionDispatcher>) {
    let config = pool_config(dir);
    let launcher = CommandLauncher::from_config(&config).unwrap();
    let pool = ProcessPool::start(config, Arc::new(launcher)).await.unwrap();
    let dispatcher = Arc::new(ExecutionDispatcher::new(
        pool.clone(),
        execution_config(timeout),
    ));
    (pool, dispatcher)
}

fn identity() -> Identity {
    Identity::new("pool-test", "1", "tester")
}

async fn output(dispatcher: &ExecutionDispatcher, source: &str) -> String {
    dispatcher.run(&identity(), source).await.unwrap().output
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runaway_script_times_out_and_pool_recovers() {
    let dir = tempdir().unwrap();
    let (pool, dispatcher) = start(&dir, Duration::from_secs(5)).await;

    assert_eq!(output(&dispatcher, "1+1").await, "2");
    assert_eq!(output(&dispatcher, "while (true) {}").await, "ERROR: Timed Out");
    assert_eq!(output(&dispatcher, "6 * 7").await, "42");

    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_killed_worker_is_reported() {
    let dir = tempdir().unwrap();
    let (pool, dispatcher) = start(&dir, Duration::from_secs(60)).await;

    let job = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { output(&dispatcher, "while (true) {}").await })
    };

    tokio::time::timeout(Duration::from_secs(30), async {
        while pool.stats().live == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    for pid in pool.worker_pids() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }

    let outcome = tokio::time::timeout(Duration::from_secs(30), job)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, "ERROR: Host Process Died");

    pool.shutdown();
}
