use super::*;
use crate::camera::FrameSource;
use crate::config::OfficecamConfig;
use crate::error::{CameraError, ReportError, Result, TrackerError};
use crate::frame::Frame;
use crate::preview::{OutputStage, PreviewClient, PreviewHub};
use crate::report::{ReportPayload, ReportSink};
use crate::tracker::{DetectionResult, Tracker};
use crate::watchdog::RestartPolicy;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

enum Step {
    Timeout,
    Frame,
    /// Waits for a permit on the gate, then yields a frame
    GatedFrame,
}

/// Frame source replaying a script, then producing frames forever
struct ScriptedSource {
    script: VecDeque<Step>,
    gate: Arc<Semaphore>,
    attempts: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    next_id: u64,
}

impl ScriptedSource {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            gate: Arc::new(Semaphore::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            next_id: 0,
        }
    }

    fn frame(&mut self) -> Frame {
        self.next_id += 1;
        Frame::new(self.next_id, SystemTime::now(), 24, 32, 3, vec![50u8; 24 * 32 * 3]).unwrap()
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn capture_frame(&mut self, timeout: Duration) -> std::result::Result<Frame, CameraError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.front() {
            Some(Step::Timeout) => {
                self.script.pop_front();
                tokio::time::sleep(timeout).await;
                Err(CameraError::Timeout { timeout })
            }
            Some(Step::GatedFrame) => {
                // Not consumed until the permit arrives, so a cancelled wait retries the gate
                let permit = self.gate.acquire().await.map_err(|_| CameraError::NotOpen)?;
                permit.forget();
                self.script.pop_front();
                Ok(self.frame())
            }
            Some(Step::Frame) => {
                self.script.pop_front();
                Ok(self.frame())
            }
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(self.frame())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Source that never produces a frame
struct StalledSource;

#[async_trait]
impl FrameSource for StalledSource {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn capture_frame(&mut self, timeout: Duration) -> std::result::Result<Frame, CameraError> {
        tokio::time::sleep(timeout).await;
        Err(CameraError::Timeout { timeout })
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

/// Tracker that fails on the first `failures` calls and otherwise sees `people` ids
struct CountingTracker {
    people: u32,
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl Tracker for CountingTracker {
    fn track(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(TrackerError::Inference {
                details: "model not ready".to_string(),
            }
            .into());
        }
        let mut result = DetectionResult::empty(frame);
        result.ids.extend(1..=self.people);
        Ok(result)
    }

    fn name(&self) -> &str {
        "counting"
    }
}

#[derive(Default)]
struct RecordingSink {
    payloads: Mutex<Vec<ReportPayload>>,
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn send(&self, payload: ReportPayload) -> std::result::Result<(), ReportError> {
        self.payloads.lock().push(payload);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPolicy {
    fired: Mutex<Vec<Duration>>,
}

impl RestartPolicy for RecordingPolicy {
    fn trigger(&self, stale_for: Duration) {
        self.fired.lock().push(stale_for);
    }
}

fn create_test_config() -> OfficecamConfig {
    let mut config = OfficecamConfig::default();
    config.camera.resolution = (32, 24);
    config.camera.capture_timeout_ms = 20;
    config.pipeline.downscaled_resolution = (16, 12);
    config.pipeline.pop_timeout_ms = 20;
    config.pipeline.join_timeout_ms = 2000;
    config.report.interval_seconds = 60;
    config.preview.command_port = 0;
    config.preview.stream_port = 0;
    config.preview.send_timeout_ms = 500;
    config.preview.queue_pop_timeout_ms = 20;
    config
}

async fn create_test_preview() -> Arc<PreviewHub> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    PreviewHub::with_listener(listener, Duration::from_millis(500), Duration::from_millis(20))
}

struct Harness {
    orchestrator: OfficecamOrchestrator,
    attempts: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
    tracker_calls: Arc<AtomicUsize>,
    sink: Arc<RecordingSink>,
    policy: Arc<RecordingPolicy>,
}

async fn create_harness(config: OfficecamConfig, script: Vec<Step>, people: u32, failures: usize) -> Harness {
    let source = ScriptedSource::new(script);
    let attempts = Arc::clone(&source.attempts);
    let closes = Arc::clone(&source.closes);
    let gate = Arc::clone(&source.gate);
    let tracker_calls = Arc::new(AtomicUsize::new(0));
    let sink = Arc::new(RecordingSink::default());
    let policy = Arc::new(RecordingPolicy::default());

    let orchestrator = OfficecamOrchestrator::builder()
        .config(config)
        .source(Box::new(source))
        .tracker(Box::new(CountingTracker {
            people,
            failures,
            calls: Arc::clone(&tracker_calls),
        }))
        .report_sink(Some(sink.clone()))
        .restart_policy(policy.clone())
        .preview(create_test_preview().await)
        .build()
        .unwrap();

    Harness {
        orchestrator,
        attempts,
        closes,
        gate,
        tracker_calls,
        sink,
        policy,
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_builder_requires_dependencies() {
    let result = OfficecamOrchestrator::builder()
        .config(create_test_config())
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_start_stop_lifecycle() {
    let mut harness = create_harness(create_test_config(), vec![], 1, 0).await;
    let orchestrator = &mut harness.orchestrator;
    assert_eq!(orchestrator.state(), PipelineState::Stopped);

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.state(), PipelineState::Running);
    assert!(orchestrator.start().await.is_err());

    let calls = Arc::clone(&harness.tracker_calls);
    wait_until("first tracked frame", || calls.load(Ordering::SeqCst) > 0).await;

    assert_eq!(orchestrator.stop().await.unwrap(), 0);
    assert_eq!(orchestrator.state(), PipelineState::Stopped);
    assert_eq!(harness.closes.load(Ordering::SeqCst), 1);

    // Stopping again is a no-op
    assert_eq!(orchestrator.stop().await.unwrap(), 0);
    assert_eq!(harness.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_capture_timeouts_do_not_count_as_activity() {
    let script = vec![Step::Timeout, Step::Timeout, Step::Timeout, Step::GatedFrame];
    let mut harness = create_harness(create_test_config(), script, 2, 0).await;

    harness.orchestrator.start().await.unwrap();
    let started_at = harness.orchestrator.activity().last_activity();

    let attempts = Arc::clone(&harness.attempts);
    wait_until("three timeouts and a gated attempt", || {
        attempts.load(Ordering::SeqCst) >= 4
    })
    .await;

    assert_eq!(harness.orchestrator.state(), PipelineState::Running);
    assert_eq!(harness.tracker_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.orchestrator.activity().last_activity(), started_at);

    harness.gate.add_permits(1);
    let calls = Arc::clone(&harness.tracker_calls);
    wait_until("tracked frame after timeouts", || calls.load(Ordering::SeqCst) > 0).await;
    assert!(harness.orchestrator.activity().last_activity() > started_at);

    harness.orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_counts_flow_to_report_sink() {
    let mut harness = create_harness(create_test_config(), vec![Step::Frame], 3, 0).await;
    harness.orchestrator.start().await.unwrap();

    let sink = Arc::clone(&harness.sink);
    wait_until("first report", || !sink.payloads.lock().is_empty()).await;
    harness.orchestrator.stop().await.unwrap();

    let payloads = harness.sink.payloads.lock();
    // The first eligible report carries the first frame's count; the interval blocks the rest
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].count, 3);
    assert!(payloads[0].snapshot.is_some());
}

#[tokio::test]
async fn test_tracker_failure_skips_frame() {
    let mut harness = create_harness(create_test_config(), vec![], 1, 2).await;
    harness.orchestrator.start().await.unwrap();

    let sink = Arc::clone(&harness.sink);
    wait_until("report after tracker recovers", || {
        !sink.payloads.lock().is_empty()
    })
    .await;
    harness.orchestrator.stop().await.unwrap();

    assert!(harness.tracker_calls.load(Ordering::SeqCst) >= 3);
    assert_eq!(harness.sink.payloads.lock()[0].count, 1);
}

#[tokio::test]
async fn test_watchdog_fires_when_no_frames_arrive() {
    let mut config = create_test_config();
    config.watchdog.poll_interval_seconds = 1;
    config.watchdog.stale_threshold_seconds = 2;

    let policy = Arc::new(RecordingPolicy::default());
    let mut orchestrator = OfficecamOrchestrator::builder()
        .config(config)
        .source(Box::new(StalledSource))
        .tracker(Box::new(CountingTracker {
            people: 0,
            failures: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }))
        .restart_policy(policy.clone())
        .preview(create_test_preview().await)
        .build()
        .unwrap();

    orchestrator.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    {
        let fired = policy.fired.lock();
        assert_eq!(fired.len(), 1);
        assert!(fired[0] > Duration::from_secs(2));
    }

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_preview_mirrors_running_pipeline() {
    let mut harness = create_harness(create_test_config(), vec![], 1, 0).await;
    let preview = harness.orchestrator.preview();
    let stream_addr = preview.local_addr().unwrap();

    harness.orchestrator.start().await.unwrap();
    preview.set_stage(OutputStage::Downscaled).await;

    let mut client = PreviewClient::connect(stream_addr).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(3), client.next_frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame.shape(), (12, 16, 3));

    harness.orchestrator.stop().await.unwrap();
    assert_eq!(preview.stage(), OutputStage::Off);
    assert!(!preview.worker_running().await);
}

#[tokio::test]
async fn test_run_returns_after_shutdown_request() {
    let mut harness = create_harness(create_test_config(), vec![], 1, 0).await;
    let trigger = harness.orchestrator.shutdown_trigger();

    let requester = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.fire(ShutdownReason::UserRequest).await
    });

    let exit_code = tokio::time::timeout(Duration::from_secs(5), harness.orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit_code, 0);
    assert!(requester.await.unwrap());
    assert_eq!(harness.orchestrator.state(), PipelineState::Stopped);
    assert!(harness.policy.fired.lock().is_empty());
}

#[tokio::test]
async fn test_unusable_core_url_disables_reporting() {
    let mut config = create_test_config();
    config.camera.source = "test".to_string();
    config.report.core_url = Some("not a url".to_string());

    let orchestrator = OfficecamOrchestrator::from_config(config.clone())
        .await
        .unwrap();
    assert!(orchestrator.report_sink.is_none());

    config.report.core_url = Some("http://127.0.0.1:9/".to_string());
    let orchestrator = OfficecamOrchestrator::from_config(config).await.unwrap();
    assert!(orchestrator.report_sink.is_some());
}
