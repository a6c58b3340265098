//! Camera TCP/TLS JPEG stream client (§4.1): a fixed 16-byte auth frame,
//! then a continuous stream of SOI/EOI-delimited JPEG frames. No
//! verification on the TLS layer — the auth frame (device id + access
//! code) is the real handshake.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::errors::{DomainError, DomainResult};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const STALL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_STALLS_BEFORE_RECONNECT: u32 = 3;

pub struct CameraWireClient {
    stream: TlsStream<TcpStream>,
    read_buf: Vec<u8>,
    stall_count: u32,
}

impl CameraWireClient {
    pub async fn connect(host: &str, access_code: &str) -> DomainResult<Self> {
        let connector = TlsConnector::from(Arc::new(super::tls::client_config()));
        let tcp = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect((host, 6000)))
            .await
            .map_err(|_| DomainError::ServiceUnavailable(format!("timed out connecting to camera at {host}:6000")))?
            .map_err(|e| DomainError::BadGateway(format!("camera TCP connect failed: {e}")))?;
        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
            .map_err(|_| DomainError::BadRequest(format!("invalid camera host: {host}")))?;
        let mut stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| DomainError::BadGateway(format!("camera TLS handshake failed: {e}")))?;

        let frame = auth_frame(access_code);
        stream.write_all(&frame).await.map_err(transport_err)?;
        let mut response = [0u8; 16];
        stream.read_exact(&mut response).await.map_err(transport_err)?;
        stream.write_all(&frame).await.map_err(transport_err)?;

        Ok(Self { stream, read_buf: Vec::new(), stall_count: 0 })
    }

    /// Read the next full JPEG frame, or `None` on a stall that hasn't yet
    /// crossed the reconnect threshold (caller should retry the read).
    pub async fn next_frame(&mut self) -> DomainResult<Option<Vec<u8>>> {
        if let Some(frame) = self.take_complete_frame() {
            self.stall_count = 0;
            return Ok(Some(frame));
        }

        let mut chunk = [0u8; 8192];
        let read = tokio::time::timeout(STALL_TIMEOUT, self.stream.read(&mut chunk)).await;
        match read {
            Ok(Ok(0)) => Err(DomainError::ServiceUnavailable("camera stream closed".into())),
            Ok(Ok(n)) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                self.stall_count = 0;
                Ok(self.take_complete_frame())
            }
            Ok(Err(e)) => Err(transport_err(e)),
            Err(_) => {
                self.stall_count += 1;
                if self.stall_count >= MAX_STALLS_BEFORE_RECONNECT {
                    Err(DomainError::ServiceUnavailable("camera stream stalled".into()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn take_complete_frame(&mut self) -> Option<Vec<u8>> {
        let start = find_subslice(&self.read_buf, &SOI)?;
        let end = find_subslice(&self.read_buf[start + 2..], &EOI).map(|i| start + 2 + i + 2)?;
        let frame = self.read_buf[start..end].to_vec();
        self.read_buf.drain(0..end);
        Some(frame)
    }
}

fn auth_frame(access_code: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(80);
    frame.extend_from_slice(&0x40u32.to_le_bytes());
    frame.extend_from_slice(&0x3000u32.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&zero_padded(b"bblp", 32));
    frame.extend_from_slice(&zero_padded(access_code.as_bytes(), 32));
    frame
}

fn zero_padded(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut padded = vec![0u8; len];
    let take = bytes.len().min(len);
    padded[..take].copy_from_slice(&bytes[..take]);
    padded
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn transport_err(e: std::io::Error) -> DomainError {
    DomainError::ServiceUnavailable(format!("camera transport error: {e}"))
}

/// Frame-rate throttle: should this frame, arriving at `now`, be kept given
/// the last kept frame's timestamp and the configured minimum interval?
pub fn should_keep_frame(last_kept: Option<Instant>, now: Instant, cam_interval: Duration) -> bool {
    match last_kept {
        None => true,
        Some(last) => now.duration_since(last) >= cam_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_is_80_bytes_with_padded_fields() {
        let frame = auth_frame("12345678");
        assert_eq!(frame.len(), 80);
        assert_eq!(&frame[0..4], &0x40u32.to_le_bytes());
        assert_eq!(&frame[16..20], b"bblp");
        assert_eq!(&frame[48..56], b"12345678");
        assert_eq!(frame[56], 0);
    }

    #[test]
    fn finds_frame_boundaries_in_a_buffer() {
        let mut buf = vec![0xAA, 0xAA];
        buf.extend_from_slice(&SOI);
        buf.extend_from_slice(&[1, 2, 3]);
        buf.extend_from_slice(&EOI);
        buf.extend_from_slice(&[0xBB]);
        let start = find_subslice(&buf, &SOI).unwrap();
        let end = find_subslice(&buf[start + 2..], &EOI).unwrap() + start + 2 + 2;
        assert_eq!(&buf[start..end], [0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
    }

    #[test]
    fn throttles_frames_within_the_interval() {
        let now = Instant::now();
        assert!(should_keep_frame(None, now, Duration::from_millis(200)));
        assert!(!should_keep_frame(Some(now), now, Duration::from_millis(200)));
    }
}
