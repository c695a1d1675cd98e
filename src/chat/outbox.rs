use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The consumer is not keeping up.
    Full,
    /// The socket writer is gone.
    Closed,
}

/// Sending half of a connection's bounded outbound queue.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Frame>,
    evicted: CancellationToken,
}

/// Receiving half, drained by the socket writer.
pub struct OutboxReceiver {
    rx: mpsc::Receiver<Frame>,
    evicted: CancellationToken,
}

pub enum Dequeued {
    Frame(Frame),
    /// The hub dropped this connection; close the socket.
    Evicted,
    Closed,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Outbox, OutboxReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let evicted = CancellationToken::new();
        (
            Outbox {
                tx,
                evicted: evicted.clone(),
            },
            OutboxReceiver { rx, evicted },
        )
    }

    /// Never waits.
    pub fn push(&self, frame: Frame) -> Delivery {
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Sticky: every holder of this outbox sees it, including a reader
    /// whose writer is stuck mid-send.
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }

    pub async fn evicted(&self) {
        self.evicted.cancelled().await
    }
}

impl OutboxReceiver {
    pub async fn next(&mut self) -> Dequeued {
        tokio::select! {
            biased;
            () = self.evicted.cancelled() => Dequeued::Evicted,
            frame = self.rx.recv() => frame.map_or(Dequeued::Closed, Dequeued::Frame),
        }
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}
