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

//! An in-process P4Runtime device for exercising the client.
//!
//! The switch arbitrates like a real target: the highest election id it has
//! seen on any stream is primary, and every arbitration request is answered
//! on every open stream.  Multicast groups are the only entities it keeps;
//! writes of other entities succeed without effect, and reads of them come
//! from `set_read_result`.

#![allow(dead_code)]

use anyhow::{anyhow, Result};

use futures::channel::mpsc as channel;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, SinkExt, StreamExt};

use p4client::entity::{
    Entity, MulticastGroupEntry, PacketReplicationEngineEntry, Update, UpdateType,
};
use p4client::error::UpdateStatus;
use p4client::message::{ArbitrationUpdate, StreamMessage, StreamRequest};
use p4client::schema::{
    Action, ActionRef, Counter, CounterUnit, Digest, MatchField, MatchType, Param, Preamble, Table,
};
use p4client::transport::{
    ForwardingPipelineConfig, GetPipelineRequest, PipelineAction, ReadRequest, RpcResult,
    SetPipelineRequest, StreamChannel, WriteRequest,
};
use p4client::{ElectionId, P4Info, Session, SessionState, StatusCode, Transport, TransportError};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use tracing::debug;

/// How long a test waits for something it expects to happen.
pub const PATIENCE: Duration = Duration::from_secs(5);

type Responder = channel::UnboundedSender<RpcResult<StreamMessage>>;
type WriteHook = Box<dyn Fn(&WriteRequest) -> Option<TransportError> + Send>;

struct State {
    version: String,
    auto_arbitrate: bool,
    primary: Option<ElectionId>,
    failing_opens: u32,
    holding_requests: bool,
    streams_opened: usize,
    responders: BTreeMap<usize, Responder>,

    pipeline: Option<ForwardingPipelineConfig>,
    set_requests: Vec<SetPipelineRequest>,
    set_error: Option<TransportError>,

    writes: Vec<WriteRequest>,
    write_hook: Option<WriteHook>,
    multicast: BTreeMap<u32, MulticastGroupEntry>,
    read_result: Option<Vec<Entity>>,
}

#[derive(Clone)]
pub struct MockSwitch {
    state: Arc<Mutex<State>>,
    observed_tx: mpsc::UnboundedSender<(usize, StreamRequest)>,
    observed_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<(usize, StreamRequest)>>>,
}

impl MockSwitch {
    pub fn new() -> Self {
        let (observed_tx, observed_rx) = mpsc::unbounded_channel();
        MockSwitch {
            state: Arc::new(Mutex::new(State {
                version: "1.3.0".into(),
                auto_arbitrate: true,
                primary: None,
                failing_opens: 0,
                holding_requests: false,
                streams_opened: 0,
                responders: BTreeMap::new(),
                pipeline: None,
                set_requests: Vec::new(),
                set_error: None,
                writes: Vec::new(),
                write_hook: None,
                multicast: BTreeMap::new(),
                read_result: None,
            })),
            observed_tx,
            observed_rx: Arc::new(tokio::sync::Mutex::new(observed_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    pub fn set_version(&self, version: &str) {
        self.lock().version = version.into();
    }

    /// With this off, the switch never answers arbitration requests.
    pub fn set_auto_arbitrate(&self, on: bool) {
        self.lock().auto_arbitrate = on;
    }

    /// Makes the next `n` attempts to open a stream fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().failing_opens = n;
    }

    /// While on, the switch stops reading stream requests, so the client's
    /// sink fills after one message.  A stream broken while held stops
    /// reading for good.
    pub fn hold_requests(&self, on: bool) {
        self.lock().holding_requests = on;
    }

    fn held(&self, stream: usize) -> Option<bool> {
        let state = self.lock();
        if !state.responders.contains_key(&stream) {
            return None;
        }
        Some(state.holding_requests)
    }

    pub fn streams_opened(&self) -> usize {
        self.lock().streams_opened
    }

    /// Sends `message` on the most recently opened stream.
    pub fn inject(&self, message: StreamMessage) {
        let state = self.lock();
        if let Some((_, responder)) = state.responders.iter().next_back() {
            let _ = responder.unbounded_send(Ok(message));
        }
    }

    /// Ends the most recently opened stream, with `error` if there is one.
    pub fn break_stream(&self, error: Option<TransportError>) {
        let mut state = self.lock();
        let last = state.responders.keys().next_back().copied();
        if let Some(responder) = last.and_then(|n| state.responders.remove(&n)) {
            if let Some(error) = error {
                let _ = responder.unbounded_send(Err(error));
            }
        }
    }

    /// Waits for the next request the client sends on any stream, returning
    /// it with the number of the stream, counting from 1.
    pub async fn next_request(&self) -> Result<(usize, StreamRequest)> {
        let mut observed = self.observed_rx.lock().await;
        tokio::time::timeout(PATIENCE, observed.recv())
            .await
            .map_err(|_| anyhow!("no stream request within {:?}", PATIENCE))?
            .ok_or_else(|| anyhow!("switch went away"))
    }

    /// The next stream request, if one arrives within `wait`.
    pub async fn request_within(&self, wait: Duration) -> Option<(usize, StreamRequest)> {
        let mut observed = self.observed_rx.lock().await;
        tokio::time::timeout(wait, observed.recv()).await.ok().flatten()
    }

    pub fn pipeline(&self) -> Option<ForwardingPipelineConfig> {
        self.lock().pipeline.clone()
    }

    pub fn set_requests(&self) -> Vec<SetPipelineRequest> {
        self.lock().set_requests.clone()
    }

    pub fn fail_set_pipeline(&self, error: Option<TransportError>) {
        self.lock().set_error = error;
    }

    pub fn writes(&self) -> Vec<WriteRequest> {
        self.lock().writes.clone()
    }

    pub fn on_write(&self, hook: impl Fn(&WriteRequest) -> Option<TransportError> + Send + 'static) {
        self.lock().write_hook = Some(Box::new(hook));
    }

    pub fn multicast_group(&self, id: u32) -> Option<MulticastGroupEntry> {
        self.lock().multicast.get(&id).cloned()
    }

    /// Makes every read return `entities`, one per response.
    pub fn set_read_result(&self, entities: Vec<Entity>) {
        self.lock().read_result = Some(entities);
    }

    fn arbitrate(&self, stream: usize, election_id: ElectionId) {
        let mut state = self.lock();
        if !state.auto_arbitrate {
            return;
        }
        let primary = state.primary.map_or(election_id, |p| p.max(election_id));
        state.primary = Some(primary);
        debug!(stream, %election_id, %primary, "arbitration");
        for responder in state.responders.values() {
            let _ = responder.unbounded_send(Ok(StreamMessage::Arbitration(ArbitrationUpdate {
                device_id: 1,
                role: None,
                election_id: Some(primary),
                status: StatusCode::Ok,
                message: String::new(),
            })));
        }
    }

    fn apply(multicast: &mut BTreeMap<u32, MulticastGroupEntry>, update: &Update) -> UpdateStatus {
        let group = match &update.entity {
            Entity::PacketReplication(PacketReplicationEngineEntry::MulticastGroup(g)) => g,
            // Accepted and forgotten.
            _ => return UpdateStatus::ok(),
        };
        let id = group.multicast_group_id;
        match (update.kind, multicast.contains_key(&id)) {
            (UpdateType::Insert, true) => {
                UpdateStatus::new(StatusCode::AlreadyExists, format!("group {} exists", id))
            }
            (UpdateType::Modify, false) | (UpdateType::Delete, false) => {
                UpdateStatus::new(StatusCode::NotFound, format!("no group {}", id))
            }
            (UpdateType::Delete, true) => {
                multicast.remove(&id);
                UpdateStatus::ok()
            }
            _ => {
                multicast.insert(id, group.clone());
                UpdateStatus::ok()
            }
        }
    }
}

impl Transport for MockSwitch {
    fn capabilities(&self) -> BoxFuture<'_, RpcResult<String>> {
        future::ready(Ok(self.lock().version.clone())).boxed()
    }

    fn set_forwarding_pipeline_config(
        &self,
        request: SetPipelineRequest,
    ) -> BoxFuture<'_, RpcResult<()>> {
        let mut state = self.lock();
        state.set_requests.push(request.clone());
        let result = match state.set_error.clone() {
            Some(error) => Err(error),
            None => {
                if request.action != PipelineAction::Verify {
                    state.pipeline = Some(request.config);
                }
                Ok(())
            }
        };
        future::ready(result).boxed()
    }

    fn get_forwarding_pipeline_config(
        &self,
        _request: GetPipelineRequest,
    ) -> BoxFuture<'_, RpcResult<Option<ForwardingPipelineConfig>>> {
        future::ready(Ok(self.lock().pipeline.clone())).boxed()
    }

    fn write(&self, request: WriteRequest) -> BoxFuture<'_, RpcResult<()>> {
        let mut state = self.lock();
        state.writes.push(request.clone());
        if let Some(error) = state.write_hook.as_ref().and_then(|hook| hook(&request)) {
            return future::ready(Err(error)).boxed();
        }
        let State { multicast, .. } = &mut *state;
        let statuses: Vec<UpdateStatus> = request
            .updates
            .iter()
            .map(|update| Self::apply(multicast, update))
            .collect();
        let result = if statuses.iter().all(UpdateStatus::is_ok) {
            Ok(())
        } else {
            Err(TransportError::new(StatusCode::Unknown, "write failed").with_details(statuses))
        };
        future::ready(result).boxed()
    }

    fn read(&self, request: ReadRequest) -> BoxStream<'static, RpcResult<Vec<Entity>>> {
        let state = self.lock();
        let entities: Vec<Entity> = match &state.read_result {
            Some(entities) => entities.clone(),
            None => request
                .entities
                .iter()
                .flat_map(|template| match template {
                    Entity::PacketReplication(PacketReplicationEngineEntry::MulticastGroup(g)) => {
                        state
                            .multicast
                            .values()
                            .filter(|group| {
                                g.multicast_group_id == 0
                                    || g.multicast_group_id == group.multicast_group_id
                            })
                            .cloned()
                            .map(Entity::from)
                            .collect::<Vec<Entity>>()
                    }
                    _ => Vec::new(),
                })
                .collect(),
        };
        stream::iter(entities.into_iter().map(|e| Ok(vec![e]))).boxed()
    }

    fn stream_channel(&self) -> BoxFuture<'_, RpcResult<StreamChannel>> {
        let mut state = self.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            let error = TransportError::new(StatusCode::Unavailable, "connection refused");
            return future::ready(Err(error)).boxed();
        }
        state.streams_opened += 1;
        let stream = state.streams_opened;

        let (responder, responses) = channel::unbounded();
        state.responders.insert(stream, responder);
        let (requests_tx, mut requests) = channel::channel::<StreamRequest>(0);

        let switch = self.clone();
        tokio::spawn(async move {
            loop {
                match switch.held(stream) {
                    Some(true) => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                    Some(false) => (),
                    None if switch.lock().holding_requests => break,
                    None => (),
                }
                let request = match requests.next().await {
                    Some(request) => request,
                    None => break,
                };
                let _ = switch.observed_tx.send((stream, request.clone()));
                if let StreamRequest::Arbitration(a) = request {
                    switch.arbitrate(stream, a.election_id);
                }
            }
        });

        let sender = requests_tx.sink_map_err(|_| TransportError::stream_closed());
        future::ready(Ok(StreamChannel {
            sender: Box::pin(sender),
            receiver: responses.boxed(),
        }))
        .boxed()
    }
}

/// Waits until `session` reaches `state`.
pub async fn wait_for_state(session: &Session, state: SessionState) -> Result<()> {
    let mut watch = session.watch_state();
    let reached = async {
        while *watch.borrow_and_update() != state {
            if watch.changed().await.is_err() {
                return Err(anyhow!("session went away"));
            }
        }
        Ok(())
    };
    tokio::time::timeout(PATIENCE, reached)
        .await
        .map_err(|_| anyhow!("session did not become {} (is {})", state, session.state()))?
}

/// A pipeline with one exact-match table, two actions, a counter and a
/// digest.
pub fn p4info() -> P4Info {
    P4Info {
        tables: vec![Table {
            preamble: Preamble::new(33554433, "ingress.mac_table"),
            match_fields: vec![MatchField::new(1, "hdr.eth.dst", 48, MatchType::Exact)],
            action_refs: vec![ActionRef::new(16777217), ActionRef::new(16777218)],
            max_entries: Some(256),
            ..Default::default()
        }],
        actions: vec![
            Action {
                preamble: Preamble::new(16777217, "ingress.forward"),
                params: vec![Param::new(1, "port", 9)],
            },
            Action {
                preamble: Preamble::new(16777218, "ingress.drop"),
                params: vec![],
            },
        ],
        counters: vec![Counter {
            preamble: Preamble::new(302000001, "ingress.port_hits"),
            unit: CounterUnit::Packets,
            size: 512,
        }],
        digests: vec![Digest {
            preamble: Preamble::new(385000001, "ingress.mac_learn"),
        }],
        ..Default::default()
    }
}
