use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use std::time::Duration;
use thermocam_common::frame::FramePublisher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const HEADER_END: &[u8] = b"\r\n\r\n";
const DEFAULT_BOUNDARY: &str = "frame";
/// A part larger than this without a closing boundary is discarded.
const MAX_PART_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Splits a `multipart/x-mixed-replace` byte stream into part bodies.
pub struct MultipartSplitter {
    marker: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    scan_from: usize,
}

impl MultipartSplitter {
    pub fn new(boundary: &str) -> Self {
        Self {
            marker: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    /// Feed the next chunk and return every part body it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.marker) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + self.marker.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > self.marker.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - self.marker.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.scan_from = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let from = self.scan_from;
                    if let Some(pos) = find_subsequence(&self.buffer[from..], &self.marker) {
                        let part_end = from + pos;
                        // Strip trailing \r\n before boundary
                        let end = if self.buffer[..part_end].ends_with(b"\r\n") {
                            part_end - 2
                        } else {
                            part_end
                        };
                        let part = self.buffer.split_to(end).freeze();
                        let _ = self.buffer.split_to(part_end - end + self.marker.len());
                        if !part.is_empty() {
                            parts.push(part);
                        }
                        // Already past boundary, go to header parsing
                        self.state = ParseState::SeekingHeaderEnd;
                    } else if self.buffer.len() > MAX_PART_BYTES {
                        warn!(bytes = self.buffer.len(), "oversized MJPEG part, resynchronising");
                        self.buffer.clear();
                        self.state = ParseState::SeekingBoundary;
                        break;
                    } else {
                        // Avoid re-scanning old data on the next chunk
                        self.scan_from = self.buffer.len().saturating_sub(self.marker.len());
                        break;
                    }
                }
            }
        }
        parts
    }
}

/// Extract the boundary token from a multipart `Content-Type` value.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').map(str::trim).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        let value = value.strip_prefix("--").unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Pull JPEG frames from an upstream MJPEG endpoint into `publisher`.
/// Reconnects with exponential backoff until `stop` is cancelled.
pub async fn run_mjpeg_ingest(url: &str, publisher: &mut FramePublisher, stop: &CancellationToken) {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    while !stop.is_cancelled() {
        info!(url, "connecting to camera MJPEG stream");
        match consume_stream(url, publisher, stop).await {
            Ok(()) if stop.is_cancelled() => break,
            Ok(()) => {
                info!("camera stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "camera stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(max_backoff);
    }
    info!("camera MJPEG ingest stopped");
}

async fn consume_stream(
    url: &str,
    publisher: &mut FramePublisher,
    stop: &CancellationToken,
) -> Result<(), IngestError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(IngestError::HttpConnect)?;
    let response = tokio::select! {
        _ = stop.cancelled() => return Ok(()),
        r = client.get(url).send() => r.map_err(IngestError::HttpConnect)?,
    };

    if !response.status().is_success() {
        return Err(IngestError::HttpStatus(response.status().as_u16()));
    }

    let boundary = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_from_content_type)
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
    info!(status = %response.status(), boundary, "connected to camera MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut splitter = MultipartSplitter::new(&boundary);

    loop {
        let chunk = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            chunk = byte_stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            return Ok(());
        };
        let chunk = chunk.map_err(IngestError::HttpStream)?;
        for jpeg in splitter.push(&chunk) {
            let bytes = jpeg.len();
            let seq = publisher.publish(jpeg);
            debug!(seq, bytes, "published camera frame");
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermocam_common::frame::frame_channel;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn splits_parts_at_boundaries() {
        let mut splitter = MultipartSplitter::new("FRAME");
        let mut stream = part(b"\xFF\xD8one\xFF\xD9");
        stream.extend(part(b"\xFF\xD8two\xFF\xD9"));
        stream.extend(part(b"\xFF\xD8three\xFF\xD9"));

        let parts = splitter.push(&stream);
        // The last part is only complete once the next boundary arrives.
        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[0][..], b"\xFF\xD8one\xFF\xD9");
        assert_eq!(&parts[1][..], b"\xFF\xD8two\xFF\xD9");

        let parts = splitter.push(b"--FRAME\r\n");
        assert_eq!(parts.len(), 1);
        assert_eq!(&parts[0][..], b"\xFF\xD8three\xFF\xD9");
    }

    #[test]
    fn handles_byte_at_a_time_delivery() {
        let mut splitter = MultipartSplitter::new("FRAME");
        let mut stream = b"preamble junk".to_vec();
        stream.extend(part(b"abc"));
        stream.extend(part(b"defg"));
        stream.extend_from_slice(b"--FRAME\r\n");

        let mut got = Vec::new();
        for b in &stream {
            got.extend(splitter.push(std::slice::from_ref(b)));
        }
        assert_eq!(got, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"defg")]);
    }

    #[test]
    fn parses_boundary_parameter() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=FRAME").as_deref(),
            Some("FRAME")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=\"--myboundary\"")
                .as_deref(),
            Some("myboundary")
        );
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
    }

    #[tokio::test]
    async fn ingest_publishes_upstream_frames() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 1024];
            let _ = sock.read(&mut req).await.unwrap();
            sock.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=FRAME\r\n\r\n",
            )
            .await
            .unwrap();
            for body in [&b"first"[..], b"second"] {
                sock.write_all(&part(body)).await.unwrap();
            }
            sock.write_all(b"--FRAME\r\n").await.unwrap();
            // Hold the connection open until the test is done with it.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (mut publisher, buffer) = frame_channel();
        let stop = CancellationToken::new();
        let ingest_stop = stop.clone();
        let url = format!("http://{addr}/stream.mjpg");
        let task = tokio::spawn(async move {
            run_mjpeg_ingest(&url, &mut publisher, &ingest_stop).await;
        });

        let mut sub = buffer.subscribe();
        let deadline = Duration::from_secs(3);
        let mut frame = sub.wait_for_next(Some(deadline)).await.unwrap();
        if frame.seq < 2 {
            frame = sub.wait_for_next(Some(deadline)).await.unwrap();
        }
        assert_eq!(&frame.jpeg[..], b"second");
        assert_eq!(frame.seq, 2);

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("ingest should stop promptly")
            .unwrap();
    }
}
