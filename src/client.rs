// SPDX-License-Identifier: Apache-2.0

//! The orchestrator (§4.1-§4.11): wires the state machine, the sender and
//! receiver loops, the lease timers, and the hook set together behind one
//! entry point. `Client::enter`/`exit` bracket a single DHCP session the
//! way an async context manager would; everything in between runs as
//! independent tasks sharing `ClientHandle` through an `Arc`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::DhcpError;
use crate::hooks::{HookSet, Trigger};
use crate::lease::Lease;
use crate::receiver::{InboundMessage, Receiver};
use crate::sender::{self, Sender};
use crate::socket::{RawDhcpSocket, ReceivedDhcpMessage, SentDhcpMessage};
use crate::state::{State, StateMachine};
use crate::timers::{LeaseTimers, TimerCallback};
use crate::xid::Xid;

struct Inner {
    state: StateMachine,
    lease: Option<Lease>,
    timers: LeaseTimers,
    watchdog: Option<JoinHandle<()>>,
    request_staged_at: Option<SystemTime>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: StateMachine::new(State::Off),
            lease: None,
            timers: LeaseTimers::new(),
            watchdog: None,
            request_staged_at: None,
        }
    }
}

/// The shared state every task (sender, receiver, timers, watchdog)
/// reaches back into. Never constructed directly; owned by a [`Client`].
///
/// `xid_tx` is the live transaction id, broadcast rather than copied: the
/// sender and receiver tasks each hold a `watch::Receiver<Xid>` and re-read
/// it on every send/match, so a reset (NAK, expiry, watchdog timeout,
/// `Client::reset`) that mints a fresh `Xid` here is actually observed by
/// the tasks already in flight instead of being silently ignored.
pub(crate) struct ClientHandle<S> {
    inner: AsyncMutex<Inner>,
    config: Arc<ClientConfig>,
    socket: Arc<S>,
    mailbox: sender::Mailbox,
    state_tx: watch::Sender<State>,
    xid_tx: watch::Sender<Xid>,
    hooks: HookSet,
}

impl<S: RawDhcpSocket + 'static> ClientHandle<S> {
    async fn bootstrap(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let existing = self.config.lease_store.load(&self.config.interface);
        match existing {
            Ok(Some(lease)) if !lease.expired() => {
                log::info!(
                    "found lease for {}, attempting INIT-REBOOT",
                    self.config.interface
                );
                inner.lease = Some(lease.clone());
                self.enter_reboot(&mut inner, lease);
            }
            Ok(_) => self.enter_init_then_selecting(&mut inner),
            Err(e) => {
                log::warn!("failed to load existing lease, starting fresh: {e}");
                self.enter_init_then_selecting(&mut inner);
            }
        }
    }

    fn enter_reboot(self: &Arc<Self>, inner: &mut Inner, lease: Lease) {
        if self.advance(inner, State::InitReboot, None).is_err() {
            return;
        }
        let msg = crate::socket::request_for_lease(
            &self.config.requested_parameters,
            &lease,
            State::Rebooting,
        );
        inner.request_staged_at = Some(SystemTime::now());
        let _ = self.advance(inner, State::Rebooting, Some(msg));
    }

    fn enter_init_then_selecting(self: &Arc<Self>, inner: &mut Inner) {
        if self.advance(inner, State::Init, None).is_err() {
            return;
        }
        let msg = crate::socket::discover(&self.config.requested_parameters);
        let _ = self.advance(inner, State::Selecting, Some(msg));
    }

    /// Moves to `to`, broadcasts the change, rearms the per-state watchdog
    /// and stages (or clears) the outbound message in the same
    /// non-yielding scope, matching the "no await between state change and
    /// send" invariant (§4.3).
    fn advance(
        self: &Arc<Self>,
        inner: &mut Inner,
        to: State,
        msg: Option<SentDhcpMessage>,
    ) -> Result<(), DhcpError> {
        inner.state.transition(to)?;
        self.state_tx.send(to).ok();
        self.rearm_watchdog(inner, to);
        self.mailbox.send(msg).ok();
        Ok(())
    }

    fn rearm_watchdog(self: &Arc<Self>, inner: &mut Inner, state: State) {
        if let Some(handle) = inner.watchdog.take() {
            handle.abort();
        }
        if let Some(&secs) = self.config.timeouts.get(&state) {
            let handle = self.clone();
            inner.watchdog = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs.into())).await;
                handle.on_watchdog_fired(state).await;
            }));
        }
    }

    async fn on_watchdog_fired(self: Arc<Self>, expected: State) {
        let mut inner = self.inner.lock().await;
        if inner.state.current() != expected {
            return;
        }
        log::warn!("timed out waiting in {expected}, restarting from INIT");
        inner.timers.cancel();
        inner.lease = None;
        self.xid_tx.send(Xid::new()).ok();
        self.enter_init_then_selecting(&mut inner);
    }

    async fn handle_offer(self: &Arc<Self>, offer: ReceivedDhcpMessage) {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_in(&[State::Selecting]) {
            log::debug!("ignoring OFFER while not SELECTING");
            return;
        }
        let msg =
            crate::socket::request_for_offer(&self.config.requested_parameters, &offer);
        inner.request_staged_at = Some(SystemTime::now());
        let _ = self.advance(&mut inner, State::Requesting, Some(msg));
    }

    async fn handle_ack(self: &Arc<Self>, ack: ReceivedDhcpMessage) {
        let mut inner = self.inner.lock().await;
        let from_state = inner.state.current();
        if !inner
            .state
            .is_in(&[State::Requesting, State::Rebooting, State::Renewing, State::Rebinding])
        {
            log::debug!("ignoring ACK while in {from_state}");
            return;
        }
        let sent_at = inner.request_staged_at.unwrap_or_else(SystemTime::now);
        let lease = match Lease::from_ack(&self.config.interface, &ack.dhcp, ack.eth_src, sent_at) {
            Ok(l) => l,
            Err(e) => {
                log::warn!("rejecting malformed ACK: {e}");
                return;
            }
        };

        if self.advance(&mut inner, State::Bound, None).is_err() {
            return;
        }
        if let Err(e) = self.config.lease_store.dump(&lease) {
            log::warn!("failed to persist lease: {e}");
        }
        inner.timers.arm(
            &lease,
            self.renewal_callback(),
            self.rebinding_callback(),
            self.expiration_callback(),
        );
        inner.lease = Some(lease.clone());
        drop(inner);

        // The hook trigger reflects which request actually produced this
        // ACK (decoded from the xid's high byte), not the client's current
        // state: a late ACK to a RENEWING request can arrive after T2 has
        // already moved the client on to REBINDING, and the two must not
        // be confused.
        match Xid::request_state(ack.dhcp.xid) {
            Some(State::Requesting) | Some(State::Rebooting) => {
                self.hooks.run(&lease, Trigger::Bound).await;
            }
            Some(State::Renewing) => {
                self.hooks.run(&lease, Trigger::Renewed).await;
            }
            Some(State::Rebinding) => {
                self.hooks.run(&lease, Trigger::Rebound).await;
            }
            _ => {
                log::warn!("ACK xid has an unrecognised request state, skipping hooks");
            }
        }
    }

    async fn handle_nak(self: &Arc<Self>, _nak: ReceivedDhcpMessage) {
        let mut inner = self.inner.lock().await;
        if !inner
            .state
            .is_in(&[State::Requesting, State::Rebooting, State::Renewing, State::Rebinding])
        {
            return;
        }
        log::info!("NAK received, restarting from INIT");
        inner.timers.cancel();
        inner.lease = None;
        self.xid_tx.send(Xid::new()).ok();
        self.enter_init_then_selecting(&mut inner);
    }

    fn renewal_callback(self: &Arc<Self>) -> TimerCallback {
        let handle = self.clone();
        Arc::new(move || {
            let handle = handle.clone();
            Box::pin(async move { handle.on_renewal_fired().await })
        })
    }

    fn rebinding_callback(self: &Arc<Self>) -> TimerCallback {
        let handle = self.clone();
        Arc::new(move || {
            let handle = handle.clone();
            Box::pin(async move { handle.on_rebinding_fired().await })
        })
    }

    fn expiration_callback(self: &Arc<Self>) -> TimerCallback {
        let handle = self.clone();
        Arc::new(move || {
            let handle = handle.clone();
            Box::pin(async move { handle.on_expiration_fired().await })
        })
    }

    async fn on_renewal_fired(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.state.current() != State::Bound {
            return;
        }
        let Some(lease) = inner.lease.clone() else {
            return;
        };
        inner.request_staged_at = Some(SystemTime::now());
        let deadline = tokio::time::Instant::now() + lease.seconds_to_rebinding();
        let msg = crate::socket::request_for_lease(
            &self.config.requested_parameters,
            &lease,
            State::Renewing,
        )
        .with_retransmit_deadline(deadline);
        let _ = self.advance(&mut inner, State::Renewing, Some(msg));
    }

    async fn on_rebinding_fired(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_in(&[State::Bound, State::Renewing]) {
            return;
        }
        let Some(lease) = inner.lease.clone() else {
            return;
        };
        inner.request_staged_at = Some(SystemTime::now());
        let deadline = tokio::time::Instant::now() + lease.seconds_to_expiration();
        let msg = crate::socket::request_for_lease(
            &self.config.requested_parameters,
            &lease,
            State::Rebinding,
        )
        .with_retransmit_deadline(deadline);
        let _ = self.advance(&mut inner, State::Rebinding, Some(msg));
    }

    async fn on_expiration_fired(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if !inner
            .state
            .is_in(&[State::Bound, State::Renewing, State::Rebinding])
        {
            return;
        }
        log::warn!("lease expired without renewal, restarting from INIT");
        let lease = inner.lease.take();
        inner.timers.cancel();
        self.xid_tx.send(Xid::new()).ok();
        self.enter_init_then_selecting(&mut inner);
        drop(inner);
        if let Some(lease) = lease {
            self.hooks.run(&lease, Trigger::Expired).await;
        }
    }

    async fn reset(self: &Arc<Self>, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().await;
        inner.timers.cancel();
        inner.lease = None;
        self.xid_tx.send(Xid::new()).ok();
        self.enter_init_then_selecting(&mut inner);
    }
}

struct Tasks {
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl Tasks {
    fn abort_all(&self) {
        self.sender.abort();
        self.receiver.abort();
        self.pump.abort();
    }
}

/// A single DHCPv4 client session bound to one interface. Construct with
/// [`Client::new`], then call [`Client::enter`] to start the session and
/// [`Client::exit`] to tear it down cleanly (optionally releasing the
/// lease, per `ClientConfig::release`).
pub struct Client<S: RawDhcpSocket + 'static> {
    handle: Arc<ClientHandle<S>>,
    mailbox_rx: watch::Receiver<Option<SentDhcpMessage>>,
    tasks: Option<Tasks>,
}

impl<S: RawDhcpSocket + 'static> Client<S> {
    pub fn new(config: ClientConfig, socket: S) -> Self {
        let hooks = HookSet::new(config.hooks.clone());
        let (mailbox_tx, mailbox_rx) = sender::mailbox();
        let (state_tx, _state_rx) = watch::channel(State::Off);
        let (xid_tx, _xid_rx) = watch::channel(Xid::new());
        let handle = Arc::new(ClientHandle {
            inner: AsyncMutex::new(Inner::new()),
            config: Arc::new(config),
            socket: Arc::new(socket),
            mailbox: mailbox_tx,
            state_tx,
            xid_tx,
            hooks,
        });
        Self {
            handle,
            mailbox_rx,
            tasks: None,
        }
    }

    pub fn interface(&self) -> &str {
        &self.handle.config.interface
    }

    /// Starts the session: optionally writes a pidfile, spawns the sender,
    /// receiver and event-pump tasks, and bootstraps into either
    /// `INIT_REBOOT` (a usable cached lease exists) or `INIT` (fresh
    /// start).
    pub async fn enter(&mut self) -> Result<(), DhcpError> {
        if self.tasks.is_some() {
            return Err(crate::error::bug("Client::enter called while already entered"));
        }
        self.write_pidfile()?;

        self.handle.xid_tx.send(Xid::new()).ok();

        let sender = Sender::new(
            self.handle.socket.clone(),
            self.mailbox_rx.clone(),
            self.handle.state_tx.subscribe(),
            self.handle.xid_tx.subscribe(),
            self.handle.config.retransmission.clone(),
        );
        let sender_task = tokio::spawn(sender.run());

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let receiver = Receiver::new(
            self.handle.socket.clone(),
            self.handle.xid_tx.subscribe(),
            self.handle.state_tx.subscribe(),
            events_tx,
        );
        let receiver_task = tokio::spawn(receiver.run());

        let pump_handle = self.handle.clone();
        let pump_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    InboundMessage::Offer(m) => pump_handle.handle_offer(m).await,
                    InboundMessage::Ack(m) => pump_handle.handle_ack(m).await,
                    InboundMessage::Nak(m) => pump_handle.handle_nak(m).await,
                }
            }
        });

        self.tasks = Some(Tasks {
            sender: sender_task,
            receiver: receiver_task,
            pump: pump_task,
        });

        self.handle.bootstrap().await;
        Ok(())
    }

    /// Tears the session down: stages a RELEASE if configured and a valid
    /// lease is held, transitions to `OFF`, fires `UNBOUND`, then stops the
    /// background tasks and removes the pidfile.
    pub async fn exit(&mut self) {
        let mut inner = self.handle.inner.lock().await;
        let lease = inner.lease.take();
        if let Some(lease) = &lease {
            if self.handle.config.release && !lease.expired() {
                self.handle.mailbox.send(Some(crate::socket::release(lease))).ok();
            }
        }
        inner.timers.cancel();
        if let Some(w) = inner.watchdog.take() {
            w.abort();
        }
        let _ = inner.state.transition(State::Off);
        self.handle.state_tx.send(State::Off).ok();
        drop(inner);

        if let Some(lease) = lease {
            self.handle.hooks.run(&lease, Trigger::Unbound).await;
        }

        // Give the sender a moment to flush the RELEASE before tearing the
        // tasks down; it blocks forever past that point waiting for a
        // mailbox update that will never come.
        tokio::time::sleep(Duration::from_millis(50)).await;

        if let Some(tasks) = self.tasks.take() {
            tasks.abort_all();
            let _ = tokio::time::timeout(Duration::from_secs(1), tasks.sender).await;
            let _ = tokio::time::timeout(Duration::from_secs(1), tasks.receiver).await;
            let _ = tokio::time::timeout(Duration::from_secs(1), tasks.pump).await;
        }

        self.remove_pidfile();
    }

    /// Forces a fresh DISCOVER cycle, clearing any held lease and timers.
    /// Mirrors the manual "give up and start over" escape hatch; never
    /// stages a RELEASE (there may be nothing left to release by the time
    /// this runs).
    pub async fn reset(&self, delay: Duration) {
        self.handle.reset(delay).await;
    }

    /// Blocks until the client reaches `target` or `timeout` elapses.
    pub async fn wait_for_state(&self, target: State, timeout: Duration) -> Result<(), DhcpError> {
        let mut rx = self.handle.state_tx.subscribe();
        if *rx.borrow() == target {
            return Ok(());
        }
        tokio::time::timeout(timeout, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() == target {
                    return;
                }
            }
        })
        .await?;
        Ok(())
    }

    pub fn current_state(&self) -> State {
        *self.handle.state_tx.subscribe().borrow()
    }

    fn write_pidfile(&self) -> Result<(), DhcpError> {
        if !self.handle.config.write_pidfile {
            return Ok(());
        }
        std::fs::write(
            self.handle.config.pidfile_path(),
            std::process::id().to_string(),
        )?;
        Ok(())
    }

    fn remove_pidfile(&self) {
        if self.handle.config.write_pidfile {
            let _ = std::fs::remove_file(self.handle.config.pidfile_path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lease_store::MemoryLeaseStore;
    use crate::wire::{DhcpV4Message, DhcpV4MessageType};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    /// An in-memory socket that replies to DISCOVER with an OFFER and to
    /// REQUEST with an ACK, so the full bootstrap-through-BOUND path can
    /// run without a real network.
    struct LoopbackSocket {
        inbox: Mutex<VecDeque<ReceivedDhcpMessage>>,
        notify: tokio::sync::Notify,
    }

    impl LoopbackSocket {
        fn new() -> Self {
            Self {
                inbox: Mutex::new(VecDeque::new()),
                notify: tokio::sync::Notify::new(),
            }
        }

        fn push(&self, msg: ReceivedDhcpMessage) {
            self.inbox.lock().unwrap().push_back(msg);
            self.notify.notify_one();
        }
    }

    impl RawDhcpSocket for LoopbackSocket {
        async fn get(&self) -> Result<ReceivedDhcpMessage, DhcpError> {
            loop {
                if let Some(msg) = self.inbox.lock().unwrap().pop_front() {
                    return Ok(msg);
                }
                self.notify.notified().await;
            }
        }

        async fn put(&self, msg: &SentDhcpMessage) -> Result<(), DhcpError> {
            match msg.message_type {
                DhcpV4MessageType::Discover => {
                    let mut dhcp = DhcpV4Message::default();
                    dhcp.xid = msg.dhcp.xid;
                    dhcp.message_type = Some(DhcpV4MessageType::Offer);
                    dhcp.yiaddr = Ipv4Addr::new(192, 0, 2, 50);
                    dhcp.server_id = Some(Ipv4Addr::new(192, 0, 2, 1));
                    self.push(ReceivedDhcpMessage {
                        dhcp,
                        eth_src: [0; 6],
                    });
                }
                DhcpV4MessageType::Request => {
                    let mut dhcp = DhcpV4Message::default();
                    dhcp.xid = msg.dhcp.xid;
                    dhcp.message_type = Some(DhcpV4MessageType::Ack);
                    dhcp.yiaddr = Ipv4Addr::new(192, 0, 2, 50);
                    dhcp.server_id = Some(Ipv4Addr::new(192, 0, 2, 1));
                    dhcp.lease_time = Some(600);
                    dhcp.renewal_time = Some(300);
                    dhcp.rebinding_time = Some(525);
                    self.push(ReceivedDhcpMessage {
                        dhcp,
                        eth_src: [0; 6],
                    });
                }
                DhcpV4MessageType::Release => {}
                other => panic!("unexpected outbound message {other}"),
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_session_reaches_bound() {
        let mut config = ClientConfig::new("eth0");
        config.set_lease_store(Arc::new(MemoryLeaseStore::default()));
        let mut client = Client::new(config, LoopbackSocket::new());
        client.enter().await.unwrap();
        client
            .wait_for_state(State::Bound, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(client.current_state(), State::Bound);
        client.exit().await;
        assert_eq!(client.current_state(), State::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn double_enter_is_rejected() {
        let config = ClientConfig::new("eth0");
        let mut client = Client::new(config, LoopbackSocket::new());
        client.enter().await.unwrap();
        let err = client.enter().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bug);
        client.exit().await;
    }
}
