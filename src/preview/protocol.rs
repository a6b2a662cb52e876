//! Preview stream wire format.
//!
//! Each frame is a 12-byte header of three big-endian `u32` values
//! (height, width, channels) followed by exactly `height * width * channels`
//! bytes of row-major, channel-interleaved pixel data.

use crate::error::{OfficecamError, PreviewError, Result};
use crate::frame::Frame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HEADER_LEN: usize = 12;

/// Largest payload a receiver accepts
pub const MAX_PAYLOAD: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl FrameHeader {
    pub fn for_frame(frame: &Frame) -> Self {
        Self {
            height: frame.height,
            width: frame.width,
            channels: frame.channels,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

pub fn encode_header(header: &FrameHeader) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    let mut cursor = &mut buf[..];
    cursor.put_u32(header.height);
    cursor.put_u32(header.width);
    cursor.put_u32(header.channels);
    buf
}

/// Header and payload in one contiguous buffer
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + frame.len());
    buf.put_slice(&encode_header(&FrameHeader::for_frame(frame)));
    buf.put_slice(frame.data.as_slice());
    buf.freeze()
}

pub fn decode_header(raw: &[u8; HEADER_LEN]) -> std::result::Result<FrameHeader, PreviewError> {
    let mut cursor = &raw[..];
    let header = FrameHeader {
        height: cursor.get_u32(),
        width: cursor.get_u32(),
        channels: cursor.get_u32(),
    };

    if header.height == 0 || header.width == 0 || header.channels == 0 {
        return Err(PreviewError::Protocol {
            details: format!("zero dimension in header {:?}", header),
        });
    }

    let len = (header.height as u64) * (header.width as u64) * (header.channels as u64);
    if len > MAX_PAYLOAD as u64 {
        return Err(PreviewError::Protocol {
            details: format!("payload of {} bytes exceeds limit of {}", len, MAX_PAYLOAD),
        });
    }

    Ok(header)
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&encode_header(&FrameHeader::for_frame(frame)))
        .await?;
    writer.write_all(frame.data.as_slice()).await?;
    writer.flush().await
}

/// Read one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R, id: u64) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut raw[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(PreviewError::Protocol {
                details: format!("stream closed after {} header bytes", filled),
            }
            .into());
        }
        filled += n;
    }

    let header = decode_header(&raw)?;
    let mut payload = vec![0u8; header.payload_len()];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            OfficecamError::from(PreviewError::Protocol {
                details: format!("stream closed inside a {} byte payload", header.payload_len()),
            })
        } else {
            OfficecamError::from(e)
        }
    })?;

    Frame::new(
        id,
        SystemTime::now(),
        header.height,
        header.width,
        header.channels,
        payload,
    )
    .map(Some)
}
