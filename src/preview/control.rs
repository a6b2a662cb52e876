use super::stage::OutputStage;
use super::stream::PreviewHub;
use crate::error::{PreviewError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest control token accepted
pub const MAX_TOKEN_LEN: usize = 64;

/// Time a client gets to deliver its token
pub const TOKEN_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Accepts one-token stage commands on the control port
pub struct ControlServer {
    listener: TcpListener,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PreviewError::BindFailed {
                address: addr.to_string(),
                source: e,
            })?;
        info!("Preview control listening on {}", addr);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve commands until cancelled. Connections are handled one at a time.
    pub async fn serve(self, hub: Arc<PreviewHub>, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Control connection from {}", peer);
                    if let Some(stage) = read_command(stream, peer).await {
                        hub.set_stage(stage).await;
                    }
                }
                Err(e) => {
                    warn!("Failed to accept control connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        info!("Preview control listener stopped");
    }
}

async fn read_command(mut stream: TcpStream, peer: SocketAddr) -> Option<OutputStage> {
    let token = match read_token(&mut stream).await {
        Ok(token) => token,
        Err(e) => {
            warn!("Failed to read control token from {}: {}", peer, e);
            return None;
        }
    };

    match token.parse::<OutputStage>() {
        Ok(stage) => Some(stage),
        Err(e) => {
            warn!("Ignoring control command from {}: {}", peer, e);
            None
        }
    }
}

/// Read until EOF, newline, `MAX_TOKEN_LEN` bytes or the read timeout
async fn read_token(stream: &mut TcpStream) -> std::io::Result<String> {
    let deadline = tokio::time::Instant::now() + TOKEN_READ_TIMEOUT;
    let mut buf = [0u8; MAX_TOKEN_LEN];
    let mut filled = 0;

    while filled < MAX_TOKEN_LEN {
        let read = tokio::time::timeout_at(deadline, stream.read(&mut buf[filled..])).await;
        let n = match read {
            Ok(result) => result?,
            Err(_) => {
                debug!("Control token read timed out after {} bytes", filled);
                break;
            }
        };
        if n == 0 {
            break;
        }
        filled += n;
        if buf[..filled].contains(&b'\n') {
            break;
        }
    }

    let raw = &buf[..filled];
    let line = raw.split(|b| *b == b'\n').next().unwrap_or(raw);
    Ok(String::from_utf8_lossy(line).trim().to_string())
}
