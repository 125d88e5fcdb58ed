// SPDX-License-Identifier: Apache-2.0

//! The receiver loop (§4.5): blocks on the socket for inbound datagrams,
//! discards anything that doesn't match this session's transaction id, and
//! forwards the rest to the client as an [`InboundMessage`]. Stops as soon
//! as the client reaches `OFF` or the socket reports the network is down.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::socket::{RawDhcpSocket, ReceivedDhcpMessage};
use crate::state::State;
use crate::wire::DhcpV4MessageType;
use crate::xid::Xid;

#[derive(Debug, Clone)]
pub enum InboundMessage {
    Offer(ReceivedDhcpMessage),
    Ack(ReceivedDhcpMessage),
    Nak(ReceivedDhcpMessage),
}

pub(crate) struct Receiver<S> {
    socket: Arc<S>,
    xid: watch::Receiver<Xid>,
    off_signal: watch::Receiver<State>,
    events: mpsc::UnboundedSender<InboundMessage>,
}

impl<S: RawDhcpSocket> Receiver<S> {
    pub(crate) fn new(
        socket: Arc<S>,
        xid: watch::Receiver<Xid>,
        off_signal: watch::Receiver<State>,
        events: mpsc::UnboundedSender<InboundMessage>,
    ) -> Self {
        Self {
            socket,
            xid,
            off_signal,
            events,
        }
    }

    pub(crate) async fn run(mut self) {
        if *self.off_signal.borrow() == State::Off {
            return;
        }
        loop {
            tokio::select! {
                biased;
                changed = self.off_signal.changed() => {
                    if changed.is_err() || *self.off_signal.borrow() == State::Off {
                        log::debug!("receiver: client is OFF, exiting");
                        return;
                    }
                }
                received = self.socket.get() => {
                    match received {
                        Ok(msg) => self.dispatch(msg),
                        Err(e) if e.is_network_down() => {
                            log::warn!("receiver: network is down, exiting: {e}");
                            return;
                        }
                        Err(e) => {
                            log::warn!("receiver: failed to read datagram: {e}");
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, msg: ReceivedDhcpMessage) {
        if !self.xid.borrow().matches(msg.dhcp.xid) {
            log::debug!("receiver: discarding reply with foreign xid {:08x}", msg.dhcp.xid);
            return;
        }
        let Some(issuing_state) = Xid::request_state(msg.dhcp.xid) else {
            log::debug!("receiver: discarding reply with unrecognised xid high byte");
            return;
        };
        let event = match msg.dhcp.message_type {
            Some(DhcpV4MessageType::Offer) => InboundMessage::Offer(msg),
            Some(DhcpV4MessageType::Ack) => InboundMessage::Ack(msg),
            Some(DhcpV4MessageType::Nak) => InboundMessage::Nak(msg),
            other => {
                log::debug!("receiver: ignoring unexpected message type {other:?} while in {issuing_state}");
                return;
            }
        };
        if self.events.send(event).is_err() {
            log::debug!("receiver: client dropped the event channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DhcpError;
    use crate::socket::SentDhcpMessage;
    use crate::wire::DhcpV4Message;
    use std::sync::Mutex;

    struct ScriptedSocket {
        replies: Mutex<Vec<ReceivedDhcpMessage>>,
    }

    impl RawDhcpSocket for ScriptedSocket {
        async fn get(&self) -> Result<ReceivedDhcpMessage, DhcpError> {
            let popped = {
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    None
                } else {
                    Some(replies.remove(0))
                }
            };
            match popped {
                Some(msg) => Ok(msg),
                None => std::future::pending().await,
            }
        }

        async fn put(&self, _msg: &SentDhcpMessage) -> Result<(), DhcpError> {
            Ok(())
        }
    }

    fn offer_with_xid(xid: u32) -> ReceivedDhcpMessage {
        let mut dhcp = DhcpV4Message::default();
        dhcp.xid = xid;
        dhcp.message_type = Some(DhcpV4MessageType::Offer);
        ReceivedDhcpMessage {
            dhcp,
            eth_src: [0; 6],
        }
    }

    #[tokio::test]
    async fn matching_offer_is_forwarded() {
        let xid = Xid::new();
        let good = offer_with_xid(xid.for_state(State::Selecting));
        let socket = Arc::new(ScriptedSocket {
            replies: Mutex::new(vec![good]),
        });
        let (_off_tx, off_rx) = watch::channel(State::Selecting);
        let (_xid_tx, xid_rx) = watch::channel(xid);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = Receiver::new(socket, xid_rx, off_rx, tx);
        tokio::spawn(receiver.run());

        let event = rx.recv().await.expect("event forwarded");
        assert!(matches!(event, InboundMessage::Offer(_)));
    }

    #[tokio::test]
    async fn foreign_xid_is_discarded() {
        let xid = Xid::new();
        let other = Xid::new();
        let bad = offer_with_xid(other.for_state(State::Selecting));
        let socket = Arc::new(ScriptedSocket {
            replies: Mutex::new(vec![bad]),
        });
        let (off_tx, off_rx) = watch::channel(State::Selecting);
        let (_xid_tx, xid_rx) = watch::channel(xid);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = Receiver::new(socket, xid_rx, off_rx, tx);
        tokio::spawn(receiver.run());

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        off_tx.send(State::Off).ok();
        assert!(rx.recv().await.is_none());
    }
}
