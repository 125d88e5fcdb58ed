// SPDX-License-Identifier: Apache-2.0

//! The sender loop (§4.4): a single task that owns "the currently outbound
//! message" and retransmits it on a [`RetransmissionSchedule`] cadence
//! until superseded by a new message or cleared. Supersession is expressed
//! through a `tokio::sync::watch` channel rather than a queue: publishing a
//! new value always replaces whatever was staged, matching the "at most
//! one outstanding message" contract instead of a FIFO.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::retransmit::{RetransmissionSchedule, Rfc2131RenewRebindSchedule, ScheduleFactory};
use crate::socket::{RawDhcpSocket, SentDhcpMessage};
use crate::state::State;
use crate::wire::DhcpV4MessageType;
use crate::xid::Xid;

/// Published by the client whenever a new message should go out, or
/// cleared back to `None` on a state change that makes the previous
/// message moot (e.g. an OFFER arriving while still SELECTING).
pub type Mailbox = watch::Sender<Option<SentDhcpMessage>>;

pub fn mailbox() -> (Mailbox, watch::Receiver<Option<SentDhcpMessage>>) {
    watch::channel(None)
}

pub(crate) struct Sender<S> {
    socket: Arc<S>,
    mailbox: watch::Receiver<Option<SentDhcpMessage>>,
    off_signal: watch::Receiver<State>,
    xid: watch::Receiver<Xid>,
    schedule_factory: ScheduleFactory,
}

impl<S: RawDhcpSocket> Sender<S> {
    pub(crate) fn new(
        socket: Arc<S>,
        mailbox: watch::Receiver<Option<SentDhcpMessage>>,
        off_signal: watch::Receiver<State>,
        xid: watch::Receiver<Xid>,
        schedule_factory: ScheduleFactory,
    ) -> Self {
        Self {
            socket,
            mailbox,
            off_signal,
            xid,
            schedule_factory,
        }
    }

    /// Runs until the socket reports the network is down or the mailbox
    /// channel is dropped (client shutdown complete). A `RELEASE` staged
    /// after the client has transitioned to `OFF` is still sent once;
    /// anything else staged post-`OFF` is dropped, since by that point the
    /// only legitimate work left is "say goodbye".
    pub(crate) async fn run(mut self) {
        loop {
            let Some(mut staged) = self.mailbox.borrow_and_update().clone() else {
                if self.mailbox.changed().await.is_err() {
                    log::debug!("sender: mailbox closed, exiting");
                    return;
                }
                continue;
            };

            if *self.off_signal.borrow() == State::Off && staged.message_type != DhcpV4MessageType::Release {
                log::debug!("sender: discarding stale {} after shutdown", staged.message_type);
                if self.mailbox.changed().await.is_err() {
                    return;
                }
                continue;
            }

            let mut schedule: Box<dyn RetransmissionSchedule> = match staged.retransmit_deadline {
                Some(deadline) => Box::new(Rfc2131RenewRebindSchedule::new(deadline)),
                None => (self.schedule_factory)(),
            };
            let first_sent = Instant::now();

            loop {
                staged.dhcp.xid = self.xid.borrow().for_state(staged.issuing_state);
                staged.dhcp.secs = first_sent.elapsed().as_secs().min(u16::MAX as u64) as u16;

                log::info!("sending {} (xid {:08x})", staged.message_type, staged.dhcp.xid);
                if let Err(e) = self.socket.put(&staged).await {
                    if e.is_network_down() {
                        log::warn!("sender: network is down, exiting: {e}");
                        return;
                    }
                    log::warn!("sender: failed to transmit {}: {e}", staged.message_type);
                }

                let wait = schedule.next();
                if wait.is_zero() {
                    // A deadline-bound schedule has run out: stop actively
                    // retransmitting and let whatever drives the state
                    // machine (a timer, a NAK, a watchdog) supersede this
                    // message instead.
                    if self.mailbox.changed().await.is_err() {
                        log::debug!("sender: mailbox closed, exiting");
                        return;
                    }
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(wait) => continue,
                    changed = self.mailbox.changed() => {
                        if changed.is_err() {
                            log::debug!("sender: mailbox closed, exiting");
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DhcpError;
    use crate::lease::Lease;
    use crate::retransmit::default_schedule_factory;
    use crate::socket::{discover, ReceivedDhcpMessage};
    use crate::wire::DhcpV4Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingSocket {
        sent: Mutex<Vec<SentDhcpMessage>>,
        send_count: AtomicUsize,
    }

    impl RecordingSocket {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                send_count: AtomicUsize::new(0),
            }
        }
    }

    impl RawDhcpSocket for RecordingSocket {
        async fn get(&self) -> Result<ReceivedDhcpMessage, DhcpError> {
            std::future::pending().await
        }

        async fn put(&self, msg: &SentDhcpMessage) -> Result<(), DhcpError> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retransmits_until_superseded() {
        let socket = Arc::new(RecordingSocket::new());
        let (mailbox_tx, mailbox_rx) = mailbox();
        let (_off_tx, off_rx) = watch::channel(State::Selecting);
        let (_xid_tx, xid_rx) = watch::channel(Xid::new());
        let sender = Sender::new(
            socket.clone(),
            mailbox_rx,
            off_rx,
            xid_rx,
            default_schedule_factory(),
        );
        let handle = tokio::spawn(sender.run());

        mailbox_tx.send(Some(discover(&[]))).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(socket.send_count.load(Ordering::SeqCst), 1);

        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(socket.send_count.load(Ordering::SeqCst) >= 2);

        drop(mailbox_tx);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn post_shutdown_only_release_survives() {
        let socket = Arc::new(RecordingSocket::new());
        let (mailbox_tx, mailbox_rx) = mailbox();
        let (off_tx, off_rx) = watch::channel(State::Off);
        let (_xid_tx, xid_rx) = watch::channel(Xid::new());
        let sender = Sender::new(
            socket.clone(),
            mailbox_rx,
            off_rx,
            xid_rx,
            default_schedule_factory(),
        );
        let _handle = tokio::spawn(sender.run());

        let lease = Lease {
            interface: "eth0".into(),
            yiaddr: "192.0.2.50".parse().unwrap(),
            server_id: "192.0.2.1".parse().unwrap(),
            server_mac: [0; 6],
            obtained_at: crate::lease::SerializableTime::now(),
            lease_time: 600,
            renewal_time: 300,
            rebinding_time: 525,
            options: Default::default(),
        };
        mailbox_tx
            .send(Some(crate::socket::release(&lease)))
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(socket.send_count.load(Ordering::SeqCst), 1);
        assert_eq!(
            socket.sent.lock().unwrap()[0].message_type,
            DhcpV4MessageType::Release
        );

        off_tx.send(State::Off).ok();
        mailbox_tx.send(Some(discover(&[]))).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(socket.send_count.load(Ordering::SeqCst), 1, "non-RELEASE must be dropped after OFF");
    }
}
