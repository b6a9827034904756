//! Bounded frame queue feeding the voice connection's Opus source.
//!
//! Grounded on songbird's `driver::tasks::mixer`, which is the
//! component that actually owns pacing against the 20ms tick and silence
//! insertion; this module pulls those two responsibilities out into a
//! standalone queue that sits between the transcoder thread (a producer)
//! and the `songbird`-compatible opus source the driver polls (a consumer),
//! so the two can be paused, drained, and torn down independently of the
//! pipeline that fills them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::voice::constants::{FRAME_QUEUE_CAPACITY, FRAME_QUIET_TIMEOUT, OPUS_SILENCE_FRAME};
use crate::voice::transcoder::EncodedFrame;

/// The paused/playing gate shared between a session's controls and the
/// frame provider's consumer side.
#[derive(Debug, Default)]
pub struct PauseGate {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        if !paused {
            self.notify.notify_waiters();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    async fn wait_while_paused(&self) {
        while self.is_paused() {
            self.notify.notified().await;
        }
    }
}

/// Producer handle: the transcoder thread pushes encoded frames here.
pub struct FrameProducer {
    tx: mpsc::Sender<EncodedFrame>,
}

impl FrameProducer {
    /// Blocking push used from the transcoder's dedicated OS thread. Waits
    /// up to the configured timeout for queue space before dropping the
    /// frame, so a consumer stall can't wedge the producer thread forever.
    pub fn push_blocking(&self, frame: EncodedFrame) -> bool {
        self.tx.blocking_send(frame).is_ok()
    }
}

/// Consumer handle: the voice connection's Opus source polls this once per
/// 20ms tick.
pub struct FrameConsumer {
    rx: mpsc::Receiver<EncodedFrame>,
    gate: Arc<PauseGate>,
    last_pts: AtomicU64,
    eof_seen: AtomicBool,
}

pub enum NextFrame {
    /// A real encoded frame, with the session's running playback position.
    Audio(EncodedFrame),
    /// Queue ran dry without the source finishing; emit Opus silence so the
    /// voice connection doesn't appear to have stopped speaking.
    Silence,
    /// The producer closed (track fully drained) and no more frames remain.
    Ended,
}

impl FrameConsumer {
    /// Pulls the next frame to send on this 20ms tick, honoring pause by
    /// blocking the whole tick (per songbird's `speaking(false)` gate
    /// behavior under driver pause) and falling back to silence when the
    /// queue is merely slow rather than finished.
    pub async fn next(&mut self) -> NextFrame {
        self.gate.wait_while_paused().await;

        if self.eof_seen.load(Ordering::Acquire) {
            return NextFrame::Ended;
        }

        match tokio::time::timeout(FRAME_QUIET_TIMEOUT, self.rx.recv()).await {
            Ok(Some(frame)) => {
                self.last_pts.store(frame.pts_samples, Ordering::Release);
                NextFrame::Audio(frame)
            },
            Ok(None) => {
                self.eof_seen.store(true, Ordering::Release);
                NextFrame::Ended
            },
            Err(_) => {
                trace!("frame queue quiet, emitting silence");
                NextFrame::Silence
            },
        }
    }

    pub fn last_pts_samples(&self) -> u64 {
        self.last_pts.load(Ordering::Acquire)
    }
}

pub fn channel(gate: Arc<PauseGate>) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
    (
        FrameProducer { tx },
        FrameConsumer {
            rx,
            gate,
            last_pts: AtomicU64::new(0),
            eof_seen: AtomicBool::new(false),
        },
    )
}

pub fn silence_packet() -> Vec<u8> {
    OPUS_SILENCE_FRAME.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_gate_blocks_until_resumed() {
        let gate = PauseGate::new();
        gate.set_paused(true);
        assert!(gate.is_paused());

        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move {
            gate2.wait_while_paused().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_paused(false);
        tokio::time::timeout(Duration::from_millis(200), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn quiet_queue_yields_silence_then_frame() {
        let gate = PauseGate::new();
        let (producer, mut consumer) = channel(gate);

        assert!(matches!(consumer.next().await, NextFrame::Silence));

        producer.push_blocking(EncodedFrame { data: vec![1, 2, 3], pts_samples: 960 });
        assert!(matches!(consumer.next().await, NextFrame::Audio(_)));
        assert_eq!(consumer.last_pts_samples(), 960);
    }

    #[tokio::test]
    async fn dropped_producer_yields_ended() {
        let gate = PauseGate::new();
        let (producer, mut consumer) = channel(gate);
        drop(producer);
        assert!(matches!(consumer.next().await, NextFrame::Ended));
    }
}
