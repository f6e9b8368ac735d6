use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use thermocam_common::config::{ServerConfig, StallPolicy};
use thermocam_common::frame::{Frame, FrameSubscriber, WaitError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PART_BOUNDARY: &[u8] = b"--FRAME\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// How a session reacts to a producer that stops publishing.
#[derive(Debug, Clone, Copy)]
pub struct StallSettings {
    pub timeout: Option<Duration>,
    pub policy: StallPolicy,
}

impl From<&ServerConfig> for StallSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            timeout: config.stall_timeout(),
            policy: config.on_stall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Shutdown,
    Stalled,
    ProducerGone,
}

/// One client's multipart stream. Lives inside the response body, so it is
/// dropped when the body finishes or when the connection fails mid-write.
pub struct StreamSession {
    client: SocketAddr,
    stream: &'static str,
    subscriber: FrameSubscriber,
    stall: StallSettings,
    shutdown: CancellationToken,
    pending: VecDeque<Bytes>,
    frames_sent: u64,
    end: Option<EndReason>,
}

impl StreamSession {
    pub fn new(
        client: SocketAddr,
        stream: &'static str,
        subscriber: FrameSubscriber,
        stall: StallSettings,
        shutdown: CancellationToken,
    ) -> Self {
        info!(%client, stream, "streaming client connected");
        Self {
            client,
            stream,
            subscriber,
            stall,
            shutdown,
            pending: VecDeque::with_capacity(4),
            frames_sent: 0,
            end: None,
        }
    }

    /// Wrap the session in a `multipart/x-mixed-replace` response.
    pub fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (header::AGE, "0"),
                (header::CACHE_CONTROL, "no-cache, private"),
                (header::PRAGMA, "no-cache"),
                (header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=FRAME"),
            ],
            Body::from_stream(self.into_chunks()),
        )
            .into_response()
    }

    /// Each part goes out as four chunks: boundary, part headers, JPEG data
    /// and trailing CRLF.
    fn into_chunks(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            if session.pending.is_empty() {
                let frame = session.next_frame().await?;
                session.queue_part(frame);
            }
            let chunk = session.pending.pop_front()?;
            if session.pending.is_empty() {
                session.frames_sent += 1;
            }
            Some((Ok(chunk), session))
        })
    }

    fn queue_part(&mut self, frame: Frame) {
        let headers = format!(
            "Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        );
        self.pending.push_back(Bytes::from_static(PART_BOUNDARY));
        self.pending.push_back(Bytes::from(headers));
        self.pending.push_back(frame.jpeg);
        self.pending.push_back(Bytes::from_static(PART_TRAILER));
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.end = Some(EndReason::Shutdown);
                    return None;
                }
                r = self.subscriber.wait_for_next(self.stall.timeout) => r,
            };
            match result {
                Ok(frame) => return Some(frame),
                Err(WaitError::Stalled { waited }) => match self.stall.policy {
                    StallPolicy::Close => {
                        warn!(client = %self.client, stream = self.stream, ?waited, "producer stalled, closing stream");
                        self.end = Some(EndReason::Stalled);
                        return None;
                    }
                    StallPolicy::Wait => {
                        debug!(client = %self.client, stream = self.stream, ?waited, "producer stalled, still waiting");
                    }
                },
                Err(WaitError::Closed) => {
                    self.end = Some(EndReason::ProducerGone);
                    return None;
                }
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        let (client, stream, frames) = (self.client, self.stream, self.frames_sent);
        match self.end {
            None => warn!(%client, stream, frames, "removed streaming client: connection closed"),
            Some(EndReason::Shutdown) => info!(%client, stream, frames, "stream closed for shutdown"),
            Some(EndReason::Stalled) => info!(%client, stream, frames, "stream closed after producer stall"),
            Some(EndReason::ProducerGone) => warn!(%client, stream, frames, "stream closed: producer gone"),
        }
    }
}
