//! Lifecycle scenarios against real child processes

#![cfg(unix)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tether_config::EngineConfig;
use tether_engine::{
    EngineError, EngineState, HealthProbe, HttpHealthProber, LaunchSpec, ProbeError, ServerEvent,
    Supervisor,
};
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Probe answering from a script, then from a switchable fallback
struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    healthy: AtomicBool,
    calls: AtomicU32,
}

impl ScriptedProbe {
    fn new(script: &[bool], healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.iter().copied().collect()),
            healthy: AtomicBool::new(healthy),
            calls: AtomicU32::new(0),
        })
    }

    fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        if scripted.unwrap_or_else(|| self.healthy.load(Ordering::SeqCst)) {
            Ok(())
        } else {
            Err(ProbeError("connection refused".into()))
        }
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        health_check_interval: Duration::from_millis(50),
        initial_probe_delay: Duration::from_millis(10),
        startup_timeout: Some(Duration::from_secs(5)),
        shutdown_grace_period: Duration::from_secs(2),
        max_startup_retries: 2,
        polls_per_retry: 3,
        ..EngineConfig::default()
    }
}

fn shell(script: &str) -> LaunchSpec {
    LaunchSpec::new("sh").arg("-c").arg(script)
}

fn supervisor(config: EngineConfig, launch: LaunchSpec, probe: Arc<dyn HealthProbe>) -> Supervisor {
    Supervisor::builder(config)
        .launch(launch)
        .probe(probe)
        .build()
        .unwrap()
}

fn drain(rx: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn wait_for_state(supervisor: &Supervisor, state: EngineState, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if supervisor.state() == state {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    supervisor.state() == state
}

#[tokio::test]
async fn test_ready_on_second_health_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(2)
        .mount(&server)
        .await;

    let probe = HttpHealthProber::new(&server.uri(), Duration::from_secs(1)).unwrap();
    let supervisor = supervisor(fast_config(), shell("exec sleep 30"), Arc::new(probe));
    let mut events = supervisor.subscribe();

    assert_eq!(supervisor.state(), EngineState::NotStarted);
    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), EngineState::Ready);
    assert!(supervisor.is_ready());

    let status = supervisor.status();
    assert!(status.has_process);
    assert!(status.pid.is_some());

    supervisor.stop().await;
    assert_eq!(supervisor.state(), EngineState::Stopped);
    assert!(!supervisor.status().has_process);

    let events = drain(&mut events);
    assert_eq!(events, vec![ServerEvent::Starting, ServerEvent::Ready]);
}

#[tokio::test]
async fn test_exhausted_polls_reject_with_startup_timeout() {
    let probe = ScriptedProbe::new(&[], false);
    let supervisor = supervisor(fast_config(), shell("exec sleep 30"), probe.clone());
    let mut events = supervisor.subscribe();

    let err = supervisor.start().await.unwrap_err();
    match &err {
        EngineError::StartupTimeout { attempts, .. } => assert_eq!(*attempts, 6),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_fatal());
    assert_eq!(probe.calls(), 6);

    let status = supervisor.status();
    assert_eq!(status.state, EngineState::Stopped);
    assert!(!status.has_process);
    assert!(status.last_error.is_some());

    let events = drain(&mut events);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ServerEvent::Starting);
    assert_eq!(events[1].channel(), "server:error");

    // A fresh start spawns again once the worker becomes healthy
    probe.set_healthy(true);
    supervisor.start().await.unwrap();
    assert!(supervisor.is_ready());
    supervisor.stop().await;
}

#[tokio::test]
async fn test_startup_deadline_bounds_polling() {
    let config = EngineConfig {
        startup_timeout: Some(Duration::from_millis(300)),
        max_startup_retries: 100,
        ..fast_config()
    };
    let probe = ScriptedProbe::new(&[], false);
    let supervisor = supervisor(config, shell("exec sleep 30"), probe.clone());

    let started = Instant::now();
    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, EngineError::StartupTimeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(supervisor.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_health_failure_degrades_then_recovers() {
    let probe = ScriptedProbe::new(&[], true);
    let supervisor = supervisor(fast_config(), shell("exec sleep 30"), probe.clone());
    let mut events = supervisor.subscribe();

    supervisor.start().await.unwrap();
    probe.set_healthy(false);

    assert!(wait_for_state(&supervisor, EngineState::Degraded, Duration::from_secs(2)).await);
    assert!(!supervisor.is_ready());
    assert!(supervisor.status().has_process);

    // Several failing ticks while degraded
    sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.state(), EngineState::Degraded);

    probe.set_healthy(true);
    assert!(wait_for_state(&supervisor, EngineState::Ready, Duration::from_secs(2)).await);
    assert!(supervisor.is_ready());

    supervisor.stop().await;

    let events = drain(&mut events);
    let channels: Vec<_> = events.iter().map(ServerEvent::channel).collect();
    assert_eq!(
        channels,
        vec!["server:starting", "server:ready", "server:error", "server:ready"]
    );
}

#[tokio::test]
async fn test_concurrent_starts_spawn_once() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("spawns");
    let script = format!("echo spawned >> '{}'; exec sleep 30", marker.display());

    let probe = ScriptedProbe::new(&[false], true);
    let supervisor = supervisor(fast_config(), shell(&script), probe);

    let (a, b, c) = tokio::join!(supervisor.start(), supervisor.start(), supervisor.start());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    // Once ready, further starts are no-ops too
    supervisor.start().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    let spawns = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(spawns.lines().count(), 1);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_no_probes_after_stop() {
    let probe = ScriptedProbe::new(&[], true);
    let supervisor = supervisor(fast_config(), shell("exec sleep 30"), probe.clone());

    supervisor.start().await.unwrap();
    sleep(Duration::from_millis(120)).await;
    supervisor.stop().await;

    let calls = probe.calls();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(probe.calls(), calls);
    assert_eq!(supervisor.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_crash_after_ready_reports_exit_once() {
    let probe = ScriptedProbe::new(&[], true);
    let supervisor = supervisor(
        fast_config(),
        shell("echo boom >&2; sleep 0.3; exit 1"),
        probe,
    );
    let mut events = supervisor.subscribe();

    supervisor.start().await.unwrap();
    assert!(wait_for_state(&supervisor, EngineState::Stopped, Duration::from_secs(3)).await);

    let status = supervisor.status();
    assert!(!status.has_process);
    assert!(!status.is_ready);
    assert_eq!(
        status.last_error.as_deref(),
        Some("Worker process exited with code 1")
    );

    sleep(Duration::from_millis(100)).await;
    let events = drain(&mut events);
    let errors: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::Error { message } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("code 1"));
    assert!(errors[0].contains("boom"));
}

#[tokio::test]
async fn test_exit_during_startup_rejects_start() {
    let config = EngineConfig {
        initial_probe_delay: Duration::from_millis(500),
        ..fast_config()
    };
    let probe = ScriptedProbe::new(&[], false);
    let supervisor = supervisor(config, shell("echo missing module >&2; exit 3"), probe.clone());

    match supervisor.start().await.unwrap_err() {
        EngineError::ProcessExit { code, output } => {
            assert_eq!(code, Some(3));
            assert!(output.contains("missing module"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(probe.calls(), 0);
    assert_eq!(supervisor.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_stop_during_startup_cancels_start() {
    let probe = ScriptedProbe::new(&[], false);
    let supervisor = supervisor(fast_config(), shell("exec sleep 30"), probe);

    let starter = supervisor.clone();
    let start = tokio::spawn(async move { starter.start().await });

    sleep(Duration::from_millis(100)).await;
    supervisor.stop().await;

    let result = start.await.unwrap();
    assert_eq!(result.unwrap_err(), EngineError::StartupCancelled);
    assert_eq!(supervisor.state(), EngineState::Stopped);
    assert!(!supervisor.status().has_process);
}

#[tokio::test]
async fn test_stop_escalates_for_stubborn_worker() {
    let config = EngineConfig {
        shutdown_grace_period: Duration::from_millis(200),
        ..fast_config()
    };
    let probe = ScriptedProbe::new(&[], true);
    let supervisor = supervisor(
        config,
        shell("trap '' TERM; while true; do sleep 0.05; done"),
        probe,
    );
    let mut events = supervisor.subscribe();

    supervisor.start().await.unwrap();
    let started = Instant::now();
    supervisor.stop().await;

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(supervisor.state(), EngineState::Stopped);

    let events = drain(&mut events);
    assert!(events.iter().all(|e| e.channel() != "server:error"));
}

#[tokio::test]
async fn test_abandoned_start_call_still_reaches_ready() {
    let config = EngineConfig {
        initial_probe_delay: Duration::from_millis(300),
        ..fast_config()
    };
    let probe = ScriptedProbe::new(&[], true);
    let supervisor = supervisor(config, shell("exec sleep 30"), probe);
    let mut events = supervisor.subscribe();

    let first = tokio::time::timeout(Duration::from_millis(50), supervisor.start()).await;
    assert!(first.is_err());
    assert_eq!(supervisor.state(), EngineState::Starting);

    // Startup already underway
    supervisor.start().await.unwrap();

    assert!(wait_for_state(&supervisor, EngineState::Ready, Duration::from_secs(2)).await);
    assert!(supervisor.is_ready());
    assert!(supervisor.status().has_process);

    supervisor.stop().await;
    assert_eq!(drain(&mut events), vec![ServerEvent::Starting, ServerEvent::Ready]);
}

#[tokio::test]
async fn test_abandoned_start_call_still_cleans_up_on_timeout() {
    let probe = ScriptedProbe::new(&[], false);
    let supervisor = supervisor(fast_config(), shell("exec sleep 30"), probe.clone());
    let mut events = supervisor.subscribe();

    let first = tokio::time::timeout(Duration::from_millis(20), supervisor.start()).await;
    assert!(first.is_err());

    assert!(wait_for_state(&supervisor, EngineState::Stopped, Duration::from_secs(3)).await);
    let status = supervisor.status();
    assert!(!status.has_process);
    assert!(status.last_error.is_some());
    assert_eq!(probe.calls(), 6);

    let channels: Vec<_> = drain(&mut events).iter().map(ServerEvent::channel).collect();
    assert_eq!(channels, vec!["server:starting", "server:error"]);

    // The supervisor is free to start again
    probe.set_healthy(true);
    supervisor.start().await.unwrap();
    assert!(supervisor.is_ready());
    supervisor.stop().await;
}

#[tokio::test]
async fn test_clean_exit_during_startup_reports_error() {
    let config = EngineConfig {
        initial_probe_delay: Duration::from_millis(500),
        ..fast_config()
    };
    let probe = ScriptedProbe::new(&[], false);
    let supervisor = supervisor(config, shell("echo nothing to serve; exit 0"), probe);
    let mut events = supervisor.subscribe();

    match supervisor.start().await.unwrap_err() {
        EngineError::ProcessExit { code, output } => {
            assert_eq!(code, Some(0));
            assert!(output.contains("nothing to serve"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(supervisor.state(), EngineState::Stopped);

    let events = drain(&mut events);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ServerEvent::Starting);
    match &events[1] {
        ServerEvent::Error { message } => assert!(message.contains("code 0")),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_signal_exit_during_startup_reports_error() {
    let config = EngineConfig {
        initial_probe_delay: Duration::from_millis(500),
        ..fast_config()
    };
    let probe = ScriptedProbe::new(&[], false);
    let supervisor = supervisor(config, shell("kill -9 $$"), probe);
    let mut events = supervisor.subscribe();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, EngineError::ProcessExit { code: None, .. }));

    let errors: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::Error { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("a signal"));
}
