use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// An encoded JPEG frame with the metadata assigned when it was published.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Bytes,
    /// Position in the buffer's publish order, starting at 1.
    pub seq: u64,
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("no new frame published within {waited:?}")]
    Stalled { waited: Duration },
    #[error("frame buffer closed")]
    Closed,
}

/// Create a single-slot broadcast buffer for one logical stream.
///
/// The publisher is the only way to write to the slot and cannot be cloned,
/// so each stream has exactly one producer. The [`FrameBuffer`] half is a
/// cheap handle that any number of readers can share. Dropping the publisher
/// closes the buffer and every pending wait returns [`WaitError::Closed`].
pub fn frame_channel() -> (FramePublisher, FrameBuffer) {
    let (tx, rx) = watch::channel(None);
    let sessions = Arc::new(());
    let buffer = FrameBuffer {
        rx,
        sessions: Arc::downgrade(&sessions),
    };
    (
        FramePublisher {
            tx,
            sessions,
            next_seq: 1,
        },
        buffer,
    )
}

/// Write half of a frame buffer.
#[derive(Debug)]
pub struct FramePublisher {
    tx: watch::Sender<Option<Frame>>,
    sessions: Arc<()>,
    next_seq: u64,
}

impl FramePublisher {
    /// Replace the latest frame and wake every waiting reader.
    ///
    /// Never waits for readers: the slot is swapped under a short write lock
    /// and readers only ever clone the `Bytes` handle out of it.
    pub fn publish(&mut self, jpeg: impl Into<Bytes>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let frame = Frame {
            jpeg: jpeg.into(),
            seq,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.tx.send_replace(Some(frame));
        seq
    }

    /// Number of live [`FrameSubscriber`]s on this buffer. Shared
    /// [`FrameBuffer`] handles are not counted.
    pub fn subscriber_count(&self) -> usize {
        Arc::strong_count(&self.sessions) - 1
    }

    /// A read handle onto the same slot.
    pub fn buffer(&self) -> FrameBuffer {
        FrameBuffer {
            rx: self.tx.subscribe(),
            sessions: Arc::downgrade(&self.sessions),
        }
    }
}

/// Read half of a frame buffer, shared by all stream sessions.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    rx: watch::Receiver<Option<Frame>>,
    sessions: Weak<()>,
}

impl FrameBuffer {
    /// Start a new reader. Its first [`FrameSubscriber::wait_for_next`]
    /// returns the current frame straight away if one has been published.
    pub fn subscribe(&self) -> FrameSubscriber {
        FrameSubscriber {
            rx: self.rx.clone(),
            last_seq: 0,
            _session: self.sessions.upgrade(),
        }
    }

    /// Sequence number of the latest frame, 0 before the first publish.
    pub fn latest_seq(&self) -> u64 {
        self.rx.borrow().as_ref().map_or(0, |f| f.seq)
    }

    /// Whether the publisher has been dropped.
    pub fn is_closed(&self) -> bool {
        self.rx.has_changed().is_err()
    }
}

/// Per-session read state: remembers the last frame handed out so the next
/// wait blocks until something newer is published.
#[derive(Debug)]
pub struct FrameSubscriber {
    rx: watch::Receiver<Option<Frame>>,
    last_seq: u64,
    _session: Option<Arc<()>>,
}

impl FrameSubscriber {
    /// Wait for a frame newer than the last one this subscriber returned.
    ///
    /// If several publishes happened since the previous call only the latest
    /// is returned. With a timeout, `WaitError::Stalled` is returned once it
    /// elapses without a newer publish. Once the publisher is gone and the
    /// last frame has been handed out, `WaitError::Closed` is returned.
    pub async fn wait_for_next(&mut self, timeout: Option<Duration>) -> Result<Frame, WaitError> {
        match timeout {
            None => self.next_frame().await,
            Some(waited) => tokio::time::timeout(waited, self.next_frame())
                .await
                .map_err(|_| WaitError::Stalled { waited })?,
        }
    }

    async fn next_frame(&mut self) -> Result<Frame, WaitError> {
        loop {
            {
                let current = self.rx.borrow_and_update();
                if let Some(frame) = &*current {
                    if frame.seq > self.last_seq {
                        self.last_seq = frame.seq;
                        return Ok(frame.clone());
                    }
                }
            }
            self.rx.changed().await.map_err(|_| WaitError::Closed)?;
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn waiting_readers_all_receive_publish() {
        let (mut publisher, buffer) = frame_channel();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let mut sub = buffer.subscribe();
            handles.push(tokio::spawn(async move { sub.wait_for_next(None).await.unwrap() }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.publish(&b"frame1"[..]);

        for handle in handles {
            let frame = handle.await.unwrap();
            assert_eq!(&frame.jpeg[..], b"frame1");
            assert_eq!(frame.seq, 1);
        }

        publisher.publish(&b"frame2"[..]);
        let mut late = buffer.subscribe();
        let frame = tokio::time::timeout(Duration::from_secs(1), late.wait_for_next(None))
            .await
            .expect("late reader must not block when a frame is available")
            .unwrap();
        assert_eq!(&frame.jpeg[..], b"frame2", "late reader gets the latest frame, not frame1");
    }

    #[tokio::test]
    async fn busy_reader_skips_intermediate_frames() {
        let (mut publisher, buffer) = frame_channel();
        let mut sub = buffer.subscribe();
        publisher.publish(&b"a"[..]);
        assert_eq!(&sub.wait_for_next(None).await.unwrap().jpeg[..], b"a");

        publisher.publish(&b"b"[..]);
        publisher.publish(&b"c"[..]);
        publisher.publish(&b"d"[..]);

        let frame = sub.wait_for_next(None).await.unwrap();
        assert_eq!(&frame.jpeg[..], b"d");
        assert_eq!(frame.seq, 4);
        assert_eq!(sub.last_seq(), 4);
    }

    #[tokio::test]
    async fn second_wait_blocks_until_newer_publish() {
        let (mut publisher, buffer) = frame_channel();
        let mut sub = buffer.subscribe();
        publisher.publish(&b"only"[..]);
        sub.wait_for_next(None).await.unwrap();

        let result = sub.wait_for_next(Some(Duration::from_millis(50))).await;
        assert!(
            matches!(result, Err(WaitError::Stalled { .. })),
            "an already-returned frame must not be handed out again"
        );
    }

    #[tokio::test]
    async fn stalled_before_first_publish() {
        let (_publisher, buffer) = frame_channel();
        let mut sub = buffer.subscribe();
        let err = sub
            .wait_for_next(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        match err {
            WaitError::Stalled { waited } => assert_eq!(waited, Duration::from_millis(20)),
            other => panic!("expected Stalled, got {other:?}"),
        }
        assert_eq!(buffer.latest_seq(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn publish_does_not_wait_for_many_readers() {
        let (mut publisher, buffer) = frame_channel();
        let mut handles = Vec::new();
        for _ in 0..200 {
            let mut sub = buffer.subscribe();
            handles.push(tokio::spawn(async move { sub.wait_for_next(None).await.unwrap() }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(publisher.subscriber_count(), 200);

        let started = Instant::now();
        publisher.publish(vec![0u8; 64 * 1024]);
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(50), "publish took {elapsed:?}");

        for handle in handles {
            assert_eq!(handle.await.unwrap().seq, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_go_backwards() {
        let (mut publisher, buffer) = frame_channel();
        let mut readers = Vec::new();
        for _ in 0..8 {
            let mut sub = buffer.subscribe();
            readers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(frame) = sub.wait_for_next(Some(Duration::from_millis(200))).await {
                    seen.push(frame.seq);
                }
                seen
            }));
        }
        for i in 0..500u32 {
            publisher.publish(i.to_be_bytes().to_vec());
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
        }
        for reader in readers {
            let seen = reader.await.unwrap();
            assert!(seen.windows(2).all(|w| w[0] < w[1]), "sequence went backwards: {seen:?}");
            assert_eq!(seen.last().copied(), Some(500), "every reader ends on the latest frame");
        }
    }

    #[test]
    fn publish_assigns_increasing_seq() {
        let (mut publisher, buffer) = frame_channel();
        assert_eq!(publisher.publish(&b"x"[..]), 1);
        assert_eq!(publisher.publish(&b"y"[..]), 2);
        assert_eq!(buffer.latest_seq(), 2);
        assert_eq!(publisher.buffer().latest_seq(), 2);
    }

    #[tokio::test]
    async fn dropping_publisher_closes_buffer() {
        let (mut publisher, buffer) = frame_channel();
        let mut sub = buffer.subscribe();
        let waiter = tokio::spawn(async move {
            let first = sub.wait_for_next(Some(Duration::from_secs(2))).await;
            let second = sub.wait_for_next(Some(Duration::from_secs(2))).await;
            (first, second)
        });
        publisher.publish(&b"last"[..]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(publisher);

        let (first, second) = waiter.await.unwrap();
        assert_eq!(&first.unwrap().jpeg[..], b"last");
        assert!(
            matches!(second, Err(WaitError::Closed)),
            "expected Closed once the publisher is gone, got {second:?}"
        );
        assert!(buffer.is_closed());

        let mut late = buffer.subscribe();
        assert_eq!(&late.wait_for_next(None).await.unwrap().jpeg[..], b"last");
        assert!(matches!(late.wait_for_next(None).await, Err(WaitError::Closed)));
    }

    #[test]
    fn subscriber_count_ignores_buffer_handles() {
        let (publisher, buffer) = frame_channel();
        let _extra = buffer.clone();
        let _other = publisher.buffer();
        assert_eq!(publisher.subscriber_count(), 0);
        let sub = buffer.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        drop(sub);
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
