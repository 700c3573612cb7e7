/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! The arbitration and stream session.
//!
//! A background task owns the device's StreamChannel.  On every stream it
//! opens, the task first sends an arbitration request, then tracks
//! mastership from the device's arbitration updates and hands every other
//! message to the [`Dispatcher`].  When the stream fails the task waits
//! `reconnect_interval` and opens a new one, until the session is closed or
//! `max_reconnect_attempts` consecutive attempts have failed.

use futures::{SinkExt, StreamExt};

use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, EventCategory, EventReceiver};
use crate::election::ElectionId;
use crate::error::{Error, Result, TransportError};
use crate::message::{
    ArbitrationRequest, ArbitrationUpdate, PacketOut, StreamEvent, StreamMessage, StreamRequest,
};
use crate::transport::{StreamChannel, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ArbitrationPending,
    Backup,
    Primary,
    Closed,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SessionState::*;
        let s = match self {
            Disconnected => "disconnected",
            Connecting => "connecting",
            ArbitrationPending => "arbitration pending",
            Backup => "backup",
            Primary => "primary",
            Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Stream failures since the device last answered arbitration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Health {
    pub consecutive_failures: u32,
    pub last_error: Option<TransportError>,
}

const TRANSITION_BUFFER: usize = 64;

struct Shared {
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    transitions: broadcast::Sender<SessionState>,
    health: watch::Sender<Health>,
    close_reason: Mutex<Option<Error>>,
    dispatcher: Dispatcher,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        let old = self.state.send_replace(state);
        if old == state {
            return;
        }
        match state {
            SessionState::Primary | SessionState::Backup => info!(
                device_id = self.config.device_id,
                election_id = %self.config.election_id,
                "{} -> {}",
                old,
                state
            ),
            _ => debug!(device_id = self.config.device_id, "{} -> {}", old, state),
        }
        // No receivers is fine.
        let _ = self.transitions.send(state);
    }

    fn arbitrate(&self, update: &ArbitrationUpdate) {
        self.health.send_modify(|h| h.consecutive_failures = 0);
        let primary = update.election_id == Some(self.config.election_id);
        debug!(
            device_id = self.config.device_id,
            primary_election_id = ?update.election_id.map(|id| id.to_string()),
            status = %update.status,
            "arbitration update"
        );
        self.set_state(if primary {
            SessionState::Primary
        } else {
            SessionState::Backup
        });
    }

    fn record_failure(&self, error: TransportError) -> u32 {
        let mut failures = 0;
        self.health.send_modify(|h| {
            h.consecutive_failures += 1;
            h.last_error = Some(error);
            failures = h.consecutive_failures;
        });
        failures
    }

    /// Drops requests accepted for a stream on which we are no longer
    /// primary.
    fn discard_requests(&self, requests: &mut mpsc::Receiver<StreamRequest>) {
        let mut discarded = 0usize;
        while requests.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(
                device_id = self.config.device_id,
                discarded, "discarded stream requests queued while primary"
            );
        }
    }

    fn close_reason(&self) -> Option<Error> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn finish(&self, reason: Error) {
        info!(device_id = self.config.device_id, "session closed: {}", reason);
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(reason);
        self.set_state(SessionState::Closed);
        self.dispatcher.close();
    }
}

/// A handle to a device session.  Clones share the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    requests: mpsc::Sender<StreamRequest>,
    shutdown: Arc<watch::Sender<bool>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Session {
    /// Starts the session task on the current tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let (health, _) = watch::channel(Health::default());
        let (requests, requests_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            dispatcher: Dispatcher::new(config.event_queue_capacity),
            config,
            state,
            transitions,
            health,
            close_reason: Mutex::new(None),
        });
        let task = tokio::spawn(run(shared.clone(), transport, requests_rx, shutdown_rx));
        Session {
            shared,
            requests,
            shutdown: Arc::new(shutdown),
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn device_id(&self) -> u64 {
        self.shared.config.device_id
    }

    pub fn election_id(&self) -> ElectionId {
        self.shared.config.election_id
    }

    pub fn role(&self) -> Option<&str> {
        self.shared.config.role.as_deref()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn is_primary(&self) -> bool {
        self.state() == SessionState::Primary
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Every state transition from now on.  A receiver that falls more than
    /// 64 transitions behind loses the oldest ones.
    pub fn state_changes(&self) -> broadcast::Receiver<SessionState> {
        self.shared.transitions.subscribe()
    }

    pub fn health(&self) -> Health {
        self.shared.health.borrow().clone()
    }

    pub fn watch_health(&self) -> watch::Receiver<Health> {
        self.shared.health.subscribe()
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<Error> {
        self.shared.close_reason()
    }

    pub fn subscribe(&self, category: EventCategory) -> EventReceiver {
        self.shared.dispatcher.subscribe(category)
    }

    pub fn subscribe_all(&self) -> EventReceiver {
        self.shared.dispatcher.subscribe_all()
    }

    /// Stream events dropped because nothing was subscribed to them.
    pub fn unrouted_events(&self) -> u64 {
        self.shared.dispatcher.unrouted()
    }

    pub fn ensure_primary(&self) -> Result<()> {
        match self.state() {
            SessionState::Primary => Ok(()),
            SessionState::Closed => Err(self.close_reason().unwrap_or(Error::Closed)),
            _ => Err(Error::NotPrimary {
                device_id: self.device_id(),
                election_id: self.election_id(),
            }),
        }
    }

    /// Waits until this client is primary.
    pub async fn await_primary(&self, timeout: Duration) -> Result<()> {
        let mut state = self.watch_state();
        let wait = async {
            loop {
                let current = *state.borrow_and_update();
                match current {
                    SessionState::Primary => return Ok(()),
                    SessionState::Closed => {
                        return Err(self.close_reason().unwrap_or(Error::Closed))
                    }
                    _ => (),
                }
                if state.changed().await.is_err() {
                    return Err(self.close_reason().unwrap_or(Error::Closed));
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::PrimaryTimeout(timeout)),
        }
    }

    async fn send(&self, request: StreamRequest) -> Result<()> {
        self.ensure_primary()?;
        self.requests
            .send(request)
            .await
            .map_err(|_| self.close_reason().unwrap_or(Error::Closed))
    }

    pub async fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        self.send(StreamRequest::Packet(packet)).await
    }

    pub async fn ack_digest(&self, digest_id: u32, list_id: u64) -> Result<()> {
        self.send(StreamRequest::DigestAck { digest_id, list_id }).await
    }

    /// Closes the session and waits until it is Closed, from any clone.
    /// Subscriptions end once their buffered events are consumed.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(device_id = self.device_id(), "session task failed: {}", e);
                self.shared.finish(Error::Closed);
            }
        }
        let mut state = self.watch_state();
        while *state.borrow_and_update() != SessionState::Closed {
            if state.changed().await.is_err() {
                break;
            }
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    mut requests: mpsc::Receiver<StreamRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = &shared.config;
    let reason = loop {
        shared.set_state(SessionState::Connecting);
        let error = tokio::select! {
            biased;
            _ = shutdown.changed() => break Error::Closed,
            error = run_stream(&shared, transport.as_ref(), &mut requests) => error,
        };
        shared.set_state(SessionState::Disconnected);
        shared.discard_requests(&mut requests);

        let failures = shared.record_failure(error.clone());
        warn!(
            device_id = config.device_id,
            failures,
            "stream to device lost: {}",
            error
        );
        if let Some(max) = config.max_reconnect_attempts {
            if failures >= max {
                break Error::ReconnectExhausted {
                    attempts: failures,
                    last: error,
                };
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break Error::Closed,
            _ = tokio::time::sleep(config.reconnect_interval) => (),
        }
    };
    shared.finish(reason);
}

/// Runs one stream until it fails, returning the failure.
async fn run_stream(
    shared: &Shared,
    transport: &dyn Transport,
    requests: &mut mpsc::Receiver<StreamRequest>,
) -> TransportError {
    let config = &shared.config;
    let StreamChannel {
        mut sender,
        mut receiver,
    } = match transport.stream_channel().await {
        Ok(channel) => channel,
        Err(e) => return e,
    };
    shared.set_state(SessionState::ArbitrationPending);

    let arbitration = StreamRequest::Arbitration(ArbitrationRequest {
        device_id: config.device_id,
        election_id: config.election_id,
        role: config.role.clone(),
    });
    if let Err(e) = sender.send(arbitration).await {
        return e;
    }
    debug!(
        device_id = config.device_id,
        election_id = %config.election_id,
        "sent arbitration request"
    );

    loop {
        let primary = *shared.state.borrow() == SessionState::Primary;
        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(StreamMessage::Arbitration(update))) => {
                    shared.arbitrate(&update);
                    if *shared.state.borrow() != SessionState::Primary {
                        shared.discard_requests(requests);
                    }
                }
                Some(Ok(StreamMessage::Event(event))) => {
                    if let StreamEvent::Error(e) = &event {
                        error!(device_id = config.device_id, "device reported stream error: {}", e);
                    }
                    shared.dispatcher.dispatch(event)
                }
                Some(Err(e)) => return e,
                None => return TransportError::stream_closed(),
            },
            Some(request) = requests.recv(), if primary => {
                if let Err(e) = sender.send(request).await {
                    return e;
                }
            }
        }
    }
}
