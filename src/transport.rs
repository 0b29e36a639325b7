// Document sources for the runtime loop

use std::collections::VecDeque;

use tracing::warn;
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;

/// Non-blocking source of raw documents. `None` means nothing is pending right now.
pub trait Transport {
    fn receive(&mut self) -> Option<Vec<u8>>;
}

/// Documents arriving on a zenoh subscription
pub struct ZenohTransport {
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
}

impl ZenohTransport {
    pub fn new(subscriber: Subscriber<FifoChannelHandler<Sample>>) -> Self {
        Self { subscriber }
    }
}

impl Transport for ZenohTransport {
    fn receive(&mut self) -> Option<Vec<u8>> {
        match self.subscriber.try_recv() {
            Ok(Some(sample)) => Some(sample.payload().to_bytes().into_owned()),
            Ok(None) => None,
            Err(e) => {
                warn!("Subscriber error: {}", e);
                None
            }
        }
    }
}

/// Queue of pre-loaded documents, used for replay and tests
impl Transport for VecDeque<Vec<u8>> {
    fn receive(&mut self) -> Option<Vec<u8>> {
        self.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_transport_drains_in_order() {
        let mut queue: VecDeque<Vec<u8>> = VecDeque::from(vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(queue.receive(), Some(b"a".to_vec()));
        assert_eq!(queue.receive(), Some(b"b".to_vec()));
        assert_eq!(queue.receive(), None);
    }
}
