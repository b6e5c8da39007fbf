use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::pipeline::protocol::ServerMessage;
use crate::shared::constants::OUTBOUND_QUEUE_CAPACITY;

pub type OutboundReceiver = mpsc::Receiver<ServerMessage>;

/// Per-connection outbound queue.
///
/// Messages are delivered in the order they are published by a single
/// writer draining the receiver. The queue is bounded: when a client stops
/// reading, new messages are dropped rather than buffered. Publishing after
/// the writer has gone is a silent no-op.
#[derive(Clone, Debug)]
pub struct ResultPublisher {
    tx: mpsc::Sender<ServerMessage>,
}

impl ResultPublisher {
    pub fn channel() -> (Self, OutboundReceiver) {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Returns false if the message was dropped, because the connection is
    /// closed or its queue is full.
    pub fn publish(&self, message: ServerMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                log::warn!("Client is not keeping up, dropping {message:?}");
                false
            }
            Err(TrySendError::Closed(message)) => {
                log::debug!("Connection closed, dropping {message:?}");
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_arrive_in_publish_order() {
        let (publisher, mut rx) = ResultPublisher::channel();
        assert!(publisher.publish(ServerMessage::error("a")));
        assert!(publisher.publish(ServerMessage::StreamEnded));

        assert_eq!(rx.try_recv().unwrap(), ServerMessage::error("a"));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::StreamEnded);
    }

    #[test]
    fn test_publish_after_close_is_noop() {
        let (publisher, rx) = ResultPublisher::channel();
        drop(rx);

        assert!(!publisher.is_open());
        assert!(!publisher.publish(ServerMessage::StreamEnded));
    }

    #[test]
    fn test_stalled_reader_drops_new_messages() {
        let (publisher, mut rx) = ResultPublisher::with_capacity(2);
        assert!(publisher.publish(ServerMessage::error("first")));
        assert!(publisher.publish(ServerMessage::error("second")));
        for _ in 0..100 {
            assert!(!publisher.publish(ServerMessage::error("late")));
        }
        assert!(publisher.is_open());

        assert_eq!(rx.try_recv().unwrap(), ServerMessage::error("first"));
        assert!(publisher.publish(ServerMessage::StreamEnded));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::error("second"));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::StreamEnded);
        assert!(rx.try_recv().is_err());
    }
}
