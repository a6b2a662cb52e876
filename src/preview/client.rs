use super::protocol::read_frame;
use super::stage::OutputStage;
use crate::error::Result;
use crate::frame::{Frame, FrameProcessor};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Ask a running agent to switch its preview stage
pub async fn send_stage(addr: SocketAddr, stage: OutputStage) -> Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(format!("{}\n", stage).as_bytes()).await?;
    stream.shutdown().await?;
    debug!("Sent preview stage {} to {}", stage, addr);
    Ok(())
}

/// Viewer side of the preview stream
pub struct PreviewClient {
    reader: BufReader<TcpStream>,
    received: u64,
}

impl PreviewClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to preview stream at {}", addr);
        Ok(Self {
            reader: BufReader::new(stream),
            received: 0,
        })
    }

    /// Next frame, or `None` once the agent closes the stream
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = read_frame(&mut self.reader, self.received).await?;
        if frame.is_some() {
            self.received += 1;
        }
        Ok(frame)
    }

    pub fn frames_received(&self) -> u64 {
        self.received
    }
}

/// Writes received frames as concatenated JPEGs (Motion JPEG)
pub struct MjpegRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    quality: u8,
    frames: u64,
}

impl MjpegRecorder {
    pub async fn create<P: AsRef<Path>>(path: P, quality: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        info!("Recording preview to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            quality,
            frames: 0,
        })
    }

    pub async fn record(&mut self, frame: &Frame) -> Result<()> {
        let jpeg = FrameProcessor::encode_jpeg(frame, self.quality)?;
        self.writer.write_all(&jpeg).await?;
        self.frames += 1;
        Ok(())
    }

    /// Flush and close the recording
    pub async fn finish(mut self) -> Result<u64> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        info!(
            "Recorded {} frames to {}",
            self.frames,
            self.path.display()
        );
        Ok(self.frames)
    }
}
