// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for streamed payloads.
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B LE) | payload           |
//! +----------------+-------------------+
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

/// Frame header size (4 bytes for length).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload accepted from a peer (anti-OOM protection).
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Encode `payload` into a new framed buffer.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Read one frame.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary; EOF inside a frame
/// is `UnexpectedEof`.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; FRAME_HEADER_SIZE];
    let mut filled = 0;
    while filled < FRAME_HEADER_SIZE {
        let n = reader.read(&mut len[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside frame header",
            ));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one complete frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode(payload)).await?;
    writer.flush().await
}

/// A frame being written across possibly several deadline windows.
///
/// A deadline expiry leaves the cursor where it stopped so the next call
/// continues the same frame; the stream never sees a torn frame.
#[derive(Debug)]
pub struct PendingFrame {
    prefix: [u8; FRAME_HEADER_SIZE],
    payload: Arc<[u8]>,
    written: usize,
}

impl PendingFrame {
    pub fn new(payload: Arc<[u8]>) -> Self {
        Self {
            prefix: (payload.len() as u32).to_le_bytes(),
            payload,
            written: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.written == FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Bytes of this frame already on the wire.
    pub fn written(&self) -> usize {
        self.written
    }

    fn remaining(&self) -> &[u8] {
        if self.written < FRAME_HEADER_SIZE {
            &self.prefix[self.written..]
        } else {
            &self.payload[self.written - FRAME_HEADER_SIZE..]
        }
    }

    /// Write as much as possible before `deadline` elapses.
    ///
    /// `Ok(true)` once the whole frame is written, `Ok(false)` if the deadline
    /// expired first. Any I/O error is returned as is.
    pub async fn flush_with_deadline<W>(
        &mut self,
        writer: &mut W,
        deadline: Duration,
    ) -> io::Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + deadline;
        while !self.is_complete() {
            // `write` is cancel safe: on timeout nothing was consumed.
            match timeout_at(deadline, writer.write(self.remaining())).await {
                Err(_) => return Ok(false),
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer stopped accepting data",
                    ))
                }
                Ok(Ok(n)) => self.written += n,
                Ok(Err(e)) => return Err(e),
            }
        }
        match timeout_at(deadline, writer.flush()).await {
            Err(_) | Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e),
        }
    }
}
