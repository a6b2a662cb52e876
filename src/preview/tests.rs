use super::protocol::{decode_header, encode_frame, read_frame, write_frame, FrameHeader, HEADER_LEN};
use super::*;
use crate::error::{OfficecamError, PreviewError};
use crate::frame::Frame;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn create_test_frame(height: u32, width: u32, channels: u32, seed: u8) -> Frame {
    let data = (0..(height * width * channels) as usize)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    Frame::new(u64::from(seed), SystemTime::now(), height, width, channels, data).unwrap()
}

fn create_test_artifacts() -> StageArtifacts {
    StageArtifacts {
        captured: create_test_frame(24, 32, 3, 1),
        downscaled: create_test_frame(12, 16, 3, 2),
        annotated: create_test_frame(12, 16, 3, 3),
    }
}

async fn create_test_hub() -> Arc<PreviewHub> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    PreviewHub::with_listener(
        listener,
        Duration::from_millis(500),
        Duration::from_millis(20),
    )
}

async fn wait_for_stage(hub: &PreviewHub, stage: OutputStage) {
    let mut rx = hub.subscribe();
    tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| *s == stage))
        .await
        .expect("stage not reached in time")
        .unwrap();
}

#[test]
fn test_stage_tokens() {
    assert_eq!("annotated".parse::<OutputStage>().unwrap(), OutputStage::Annotated);
    assert_eq!("  Captured\r\n".parse::<OutputStage>().unwrap(), OutputStage::Captured);
    assert_eq!("OFF".parse::<OutputStage>().unwrap(), OutputStage::Off);
    assert!(matches!(
        "bogus".parse::<OutputStage>(),
        Err(PreviewError::InvalidToken { token }) if token == "bogus"
    ));

    for stage in OutputStage::ALL {
        assert_eq!(stage.to_string().parse::<OutputStage>().unwrap(), stage);
    }
}

#[test]
fn test_stage_selects_matching_artifact() {
    let artifacts = create_test_artifacts();
    assert!(OutputStage::Off.select(&artifacts).is_none());
    assert_eq!(OutputStage::Captured.select(&artifacts).unwrap().id, 1);
    assert_eq!(OutputStage::Downscaled.select(&artifacts).unwrap().id, 2);
    assert_eq!(OutputStage::Annotated.select(&artifacts).unwrap().id, 3);
}

#[tokio::test]
async fn test_protocol_round_trip() {
    let frame = create_test_frame(240, 320, 3, 9);
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);

    let sent = frame.clone();
    let writer = tokio::spawn(async move {
        write_frame(&mut server, &sent).await.unwrap();
    });

    let received = read_frame(&mut client, 0).await.unwrap().unwrap();
    writer.await.unwrap();

    assert_eq!(received.shape(), (240, 320, 3));
    assert_eq!(received.data, frame.data);
}

#[test]
fn test_encoded_header_is_big_endian() {
    let frame = create_test_frame(2, 3, 1, 0);
    let encoded = encode_frame(&frame);
    assert_eq!(&encoded[..HEADER_LEN], &[0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 1]);
    assert_eq!(encoded.len(), HEADER_LEN + 6);
}

#[test]
fn test_decode_header_rejects_bad_shapes() {
    let mut raw = [0u8; HEADER_LEN];
    raw[3] = 4;
    raw[7] = 4;
    assert!(decode_header(&raw).is_err());

    raw[11] = 3;
    assert_eq!(
        decode_header(&raw).unwrap(),
        FrameHeader {
            height: 4,
            width: 4,
            channels: 3
        }
    );

    let huge = [0, 0, 0x40, 0, 0, 0, 0x40, 0, 0, 0, 0, 3];
    assert!(matches!(
        decode_header(&huge),
        Err(PreviewError::Protocol { .. })
    ));
}

#[tokio::test]
async fn test_read_frame_eof_handling() {
    let mut empty: &[u8] = &[];
    assert!(read_frame(&mut empty, 0).await.unwrap().is_none());

    let mut partial_header: &[u8] = &[0, 0, 0, 2, 0];
    assert!(matches!(
        read_frame(&mut partial_header, 0).await,
        Err(OfficecamError::Preview(PreviewError::Protocol { .. }))
    ));

    let encoded = encode_frame(&create_test_frame(2, 2, 3, 0));
    let mut truncated = &encoded[..encoded.len() - 1];
    assert!(matches!(
        read_frame(&mut truncated, 0).await,
        Err(OfficecamError::Preview(PreviewError::Protocol { .. }))
    ));
}

#[tokio::test]
async fn test_offer_is_noop_when_off() {
    let hub = create_test_hub().await;
    assert!(!hub.offer(&create_test_artifacts()));
    assert!(!hub.has_pending_frame());
}

#[tokio::test]
async fn test_set_stage_starts_and_joins_worker() {
    let hub = create_test_hub().await;

    hub.set_stage(OutputStage::Downscaled).await;
    assert!(hub.worker_running().await);

    // Switching between on-stages keeps the worker
    hub.set_stage(OutputStage::Annotated).await;
    assert!(hub.worker_running().await);
    assert_eq!(hub.stage(), OutputStage::Annotated);

    hub.set_stage(OutputStage::Off).await;
    assert!(!hub.worker_running().await);

    // Off again is a no-op
    hub.set_stage(OutputStage::Off).await;
    assert_eq!(hub.stage(), OutputStage::Off);
}

#[tokio::test]
async fn test_control_tokens_drive_stage() {
    let hub = create_test_hub().await;
    let control = ControlServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let control_addr = control.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(control.serve(Arc::clone(&hub), cancel.clone()));

    send_stage(control_addr, OutputStage::Annotated).await.unwrap();
    wait_for_stage(&hub, OutputStage::Annotated).await;
    assert!(hub.worker_running().await);

    send_stage(control_addr, OutputStage::Off).await.unwrap();
    wait_for_stage(&hub, OutputStage::Off).await;
    assert!(!hub.worker_running().await);

    let mut raw = TcpStream::connect(control_addr).await.unwrap();
    raw.write_all(b"bogus").await.unwrap();
    raw.shutdown().await.unwrap();
    drop(raw);

    // A valid command after the bogus one proves the bogus one was processed first
    send_stage(control_addr, OutputStage::Off).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.stage(), OutputStage::Off);
    assert!(!hub.worker_running().await);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_control_token_without_newline_waits_for_eof() {
    let hub = create_test_hub().await;
    let control = ControlServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let control_addr = control.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(control.serve(Arc::clone(&hub), cancel.clone()));

    let mut raw = TcpStream::connect(control_addr).await.unwrap();
    raw.write_all(b"capt").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    raw.write_all(b"ured").await.unwrap();
    raw.shutdown().await.unwrap();

    wait_for_stage(&hub, OutputStage::Captured).await;

    hub.shutdown().await;
    cancel.cancel();
    server.await.unwrap();
}

/// Keep offering artifacts until stopped, as the processing loop would
fn spawn_feeder(hub: Arc<PreviewHub>, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let artifacts = create_test_artifacts();
        while !stop.is_cancelled() {
            hub.offer(&artifacts);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

#[tokio::test]
async fn test_viewer_receives_selected_stage() {
    let hub = create_test_hub().await;
    let stream_addr = hub.local_addr().unwrap();
    hub.set_stage(OutputStage::Captured).await;

    let stop = CancellationToken::new();
    let feeder = spawn_feeder(Arc::clone(&hub), stop.clone());

    let mut client = PreviewClient::connect(stream_addr).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(3), client.next_frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame.shape(), (24, 32, 3));
    assert_eq!(frame.data, create_test_artifacts().captured.data);

    hub.set_stage(OutputStage::Annotated).await;
    let annotated = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let frame = client.next_frame().await.unwrap().unwrap();
            if frame.shape() == (12, 16, 3) {
                return frame;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(annotated.data, create_test_artifacts().annotated.data);

    hub.set_stage(OutputStage::Off).await;
    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match client.next_frame().await {
                Ok(Some(_)) => continue,
                _ => return,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "stream should close when preview is turned off");

    stop.cancel();
    feeder.await.unwrap();
}

#[tokio::test]
async fn test_sender_reaccepts_after_viewer_leaves() {
    let hub = create_test_hub().await;
    let stream_addr = hub.local_addr().unwrap();
    hub.set_stage(OutputStage::Downscaled).await;

    let stop = CancellationToken::new();
    let feeder = spawn_feeder(Arc::clone(&hub), stop.clone());

    let mut first = PreviewClient::connect(stream_addr).await.unwrap();
    tokio::time::timeout(Duration::from_secs(3), first.next_frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    drop(first);

    let mut second = PreviewClient::connect(stream_addr).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), second.next_frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame.shape(), (12, 16, 3));
    assert!(hub.worker_running().await);

    stop.cancel();
    feeder.await.unwrap();
    hub.shutdown().await;
    assert!(!hub.worker_running().await);
}

#[tokio::test]
async fn test_mjpeg_recorder_appends_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preview.mjpeg");

    let mut recorder = MjpegRecorder::create(&path, 80).await.unwrap();
    recorder.record(&create_test_frame(16, 16, 3, 4)).await.unwrap();
    recorder.record(&create_test_frame(16, 16, 3, 5)).await.unwrap();
    assert_eq!(recorder.finish().await.unwrap(), 2);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    assert!(bytes.len() > 4);
}

#[tokio::test]
async fn test_bogus_token_keeps_active_stage() {
    let hub = create_test_hub().await;
    let control = ControlServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let control_addr = control.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(control.serve(Arc::clone(&hub), cancel.clone()));

    send_stage(control_addr, OutputStage::Annotated).await.unwrap();
    wait_for_stage(&hub, OutputStage::Annotated).await;
    let mut changes = hub.subscribe();
    changes.borrow_and_update();

    let mut raw = TcpStream::connect(control_addr).await.unwrap();
    raw.write_all(b"bogus\n").await.unwrap();
    raw.shutdown().await.unwrap();
    drop(raw);

    // Connections are handled in order, so this one follows the bogus token
    send_stage(control_addr, OutputStage::Annotated).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!changes.has_changed().unwrap());
    assert_eq!(hub.stage(), OutputStage::Annotated);
    assert!(hub.worker_running().await);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .unwrap()
        .unwrap();
    hub.shutdown().await;
}

#[tokio::test]
async fn test_switching_active_stage_drops_queued_frame() {
    let hub = create_test_hub().await;
    hub.set_stage(OutputStage::Captured).await;

    // No viewer is connected, so the offered frame stays queued
    assert!(hub.offer(&create_test_artifacts()));
    assert!(hub.has_pending_frame());

    hub.set_stage(OutputStage::Downscaled).await;
    assert!(!hub.has_pending_frame());
    assert!(hub.worker_running().await);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_refuses_stages_until_resumed() {
    let hub = create_test_hub().await;
    hub.set_stage(OutputStage::Annotated).await;

    hub.shutdown().await;
    assert_eq!(hub.stage(), OutputStage::Off);
    assert!(!hub.worker_running().await);

    hub.set_stage(OutputStage::Captured).await;
    assert_eq!(hub.stage(), OutputStage::Off);
    assert!(!hub.worker_running().await);

    hub.resume().await;
    hub.set_stage(OutputStage::Captured).await;
    assert_eq!(hub.stage(), OutputStage::Captured);
    assert!(hub.worker_running().await);

    hub.shutdown().await;
}
