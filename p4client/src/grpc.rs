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

//! [`Transport`] over gRPC, plus P4Info file loading.

use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, SinkExt, StreamExt};

use grpcio::{ChannelBuilder, EnvBuilder, WriteFlags};

use proto::p4data::{self, P4Data_oneof_data as D};
use proto::p4info as pi;
use proto::p4runtime as pr;
use proto::p4runtime_grpc::P4RuntimeClient;
use proto::status::Status;

use protobuf::well_known_types::Any;
use protobuf::{Message, RepeatedField};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::election::ElectionId;
use crate::entity::*;
use crate::error::{SchemaError, StatusCode, TransportError, UpdateStatus};
use crate::message::*;
use crate::schema::{
    Action as SchemaAction, ActionProfile, ActionRef, ActionScope, ControllerPacketMetadata,
    Counter, CounterUnit, Digest, DirectCounter, DirectMeter, Documentation, MatchField,
    MatchType, Meter, MeterUnit, P4Info, PacketMetadataField, Param, Preamble, Register, Table,
};
use crate::transport::*;

/// A P4Runtime server reached over an insecure gRPC channel.
#[derive(Clone)]
pub struct GrpcTransport {
    client: P4RuntimeClient,
}

impl GrpcTransport {
    /// Connects to `addr`, e.g. `localhost:50051`.  The channel is
    /// established lazily, so this does not fail if the server is down.
    pub fn connect(addr: &str) -> Self {
        let env = Arc::new(EnvBuilder::new().build());
        let ch = ChannelBuilder::new(env).connect(addr);
        GrpcTransport {
            client: P4RuntimeClient::new(ch),
        }
    }

    pub fn from_client(client: P4RuntimeClient) -> Self {
        GrpcTransport { client }
    }
}

fn transport_error(e: grpcio::Error) -> TransportError {
    match e {
        grpcio::Error::RpcFailure(status) => TransportError {
            code: i32::from(status.code()).into(),
            message: status.message().into(),
            details: update_statuses(status.details()),
        },
        grpcio::Error::RemoteStopped => TransportError::stream_closed(),
        other => TransportError::new(StatusCode::Unavailable, other.to_string()),
    }
}

/// Decodes the `p4.v1.Error` per update that a device packs into the
/// `google.rpc.Status` of a failed Write.
fn update_statuses(details: &[u8]) -> Vec<UpdateStatus> {
    if details.is_empty() {
        return Vec::new();
    }
    let status = match Status::parse_from_bytes(details) {
        Ok(status) => status,
        Err(e) => {
            warn!("could not decode error details: {}", e);
            return Vec::new();
        }
    };
    status
        .get_details()
        .iter()
        .map(|any| match pr::Error::parse_from_bytes(any.get_value()) {
            Ok(e) => UpdateStatus::new(e.get_canonical_code().into(), e.get_message()),
            Err(_) => UpdateStatus::new(
                StatusCode::Unknown,
                format!("undecodable error detail of type {}", any.get_type_url()),
            ),
        })
        .collect()
}

fn unsupported(what: &str) -> TransportError {
    TransportError::new(
        StatusCode::Unimplemented,
        format!("unsupported {} in response", what),
    )
}

impl Transport for GrpcTransport {
    fn capabilities(&self) -> BoxFuture<'_, RpcResult<String>> {
        async move {
            let response = self
                .client
                .capabilities_async(&pr::CapabilitiesRequest::new())
                .map_err(transport_error)?
                .await
                .map_err(transport_error)?;
            Ok(response.p4runtime_api_version)
        }
        .boxed()
    }

    fn set_forwarding_pipeline_config(
        &self,
        request: SetPipelineRequest,
    ) -> BoxFuture<'_, RpcResult<()>> {
        async move {
            use pr::SetForwardingPipelineConfigRequest_Action::*;
            let req = pr::SetForwardingPipelineConfigRequest {
                device_id: request.device_id,
                election_id: Some(uint128(request.election_id)).into(),
                role: request.role.unwrap_or_default(),
                action: match request.action {
                    PipelineAction::Verify => VERIFY,
                    PipelineAction::VerifyAndSave => VERIFY_AND_SAVE,
                    PipelineAction::VerifyAndCommit => VERIFY_AND_COMMIT,
                    PipelineAction::Commit => COMMIT,
                    PipelineAction::ReconcileAndCommit => RECONCILE_AND_COMMIT,
                },
                config: Some(pipeline_to_proto(&request.config)?).into(),
                ..Default::default()
            };
            self.client
                .set_forwarding_pipeline_config_async(&req)
                .map_err(transport_error)?
                .await
                .map_err(transport_error)?;
            Ok(())
        }
        .boxed()
    }

    fn get_forwarding_pipeline_config(
        &self,
        request: GetPipelineRequest,
    ) -> BoxFuture<'_, RpcResult<Option<ForwardingPipelineConfig>>> {
        async move {
            use pr::GetForwardingPipelineConfigRequest_ResponseType::*;
            let req = pr::GetForwardingPipelineConfigRequest {
                device_id: request.device_id,
                response_type: match request.scope {
                    PipelineScope::All => ALL,
                    PipelineScope::CookieOnly => COOKIE_ONLY,
                    PipelineScope::P4InfoAndCookie => P4INFO_AND_COOKIE,
                    PipelineScope::DeviceConfigAndCookie => DEVICE_CONFIG_AND_COOKIE,
                },
                ..Default::default()
            };
            let response = self
                .client
                .get_forwarding_pipeline_config_async(&req)
                .map_err(transport_error)?
                .await
                .map_err(transport_error)?;
            if !response.has_config() {
                return Ok(None);
            }
            Ok(Some(pipeline_from_proto(response.get_config())?))
        }
        .boxed()
    }

    fn write(&self, request: WriteRequest) -> BoxFuture<'_, RpcResult<()>> {
        async move {
            use pr::WriteRequest_Atomicity::*;
            let req = pr::WriteRequest {
                device_id: request.device_id,
                election_id: Some(uint128(request.election_id)).into(),
                role: request.role.unwrap_or_default(),
                updates: request.updates.iter().map(update_to_proto).collect(),
                atomicity: match request.atomicity {
                    Atomicity::ContinueOnError => CONTINUE_ON_ERROR,
                    Atomicity::RollbackOnError => ROLLBACK_ON_ERROR,
                    Atomicity::DataplaneAtomic => DATAPLANE_ATOMIC,
                },
                ..Default::default()
            };
            self.client
                .write_async(&req)
                .map_err(transport_error)?
                .await
                .map_err(transport_error)?;
            Ok(())
        }
        .boxed()
    }

    fn read(&self, request: ReadRequest) -> BoxStream<'static, RpcResult<Vec<Entity>>> {
        let req = pr::ReadRequest {
            device_id: request.device_id,
            role: request.role.unwrap_or_default(),
            entities: request.entities.iter().map(entity_to_proto).collect(),
            ..Default::default()
        };
        match self.client.read(&req) {
            Ok(responses) => responses
                .map(|response| {
                    response
                        .map_err(transport_error)?
                        .get_entities()
                        .iter()
                        .map(entity_from_proto)
                        .collect()
                })
                .boxed(),
            Err(e) => stream::once(future::ready(Err(transport_error(e)))).boxed(),
        }
    }

    fn stream_channel(&self) -> BoxFuture<'_, RpcResult<StreamChannel>> {
        async move {
            let (sink, receiver) = self.client.stream_channel().map_err(transport_error)?;
            let sender = sink.sink_map_err(transport_error).with(|request: StreamRequest| {
                future::ready(Ok::<_, TransportError>((
                    stream_request_to_proto(request),
                    WriteFlags::default(),
                )))
            });
            let receiver = receiver.map(|response| {
                response
                    .map(stream_message_from_proto)
                    .map_err(transport_error)
            });
            Ok(StreamChannel {
                sender: Box::pin(sender),
                receiver: receiver.boxed(),
            })
        }
        .boxed()
    }
}

fn uint128(id: ElectionId) -> pr::Uint128 {
    pr::Uint128 {
        high: id.high,
        low: id.low,
        ..Default::default()
    }
}

fn stream_request_to_proto(request: StreamRequest) -> pr::StreamMessageRequest {
    let mut message = pr::StreamMessageRequest::new();
    match request {
        StreamRequest::Arbitration(a) => {
            let mut update = pr::MasterArbitrationUpdate {
                device_id: a.device_id,
                election_id: Some(uint128(a.election_id)).into(),
                ..Default::default()
            };
            if let Some(name) = a.role {
                update.set_role(pr::Role {
                    name,
                    ..Default::default()
                });
            }
            message.set_arbitration(update);
        }
        StreamRequest::Packet(p) => message.set_packet(pr::PacketOut {
            payload: p.payload,
            metadata: p.metadata.iter().map(metadata_to_proto).collect(),
            ..Default::default()
        }),
        StreamRequest::DigestAck { digest_id, list_id } => {
            message.set_digest_ack(pr::DigestListAck {
                digest_id,
                list_id,
                ..Default::default()
            })
        }
    }
    message
}

fn metadata_to_proto(m: &PacketMetadata) -> pr::PacketMetadata {
    pr::PacketMetadata {
        metadata_id: m.metadata_id,
        value: m.value.clone(),
        ..Default::default()
    }
}

fn metadata_from_proto(m: &pr::PacketMetadata) -> PacketMetadata {
    PacketMetadata {
        metadata_id: m.metadata_id,
        value: m.get_value().to_vec(),
    }
}

fn stream_message_from_proto(response: pr::StreamMessageResponse) -> StreamMessage {
    use pr::StreamMessageResponse_oneof_update as U;
    let event = match response.update {
        Some(U::arbitration(a)) => {
            return StreamMessage::Arbitration(ArbitrationUpdate {
                device_id: a.device_id,
                role: a.has_role().then(|| a.get_role().get_name().to_string()),
                election_id: a.has_election_id().then(|| {
                    let id = a.get_election_id();
                    ElectionId::new(id.high, id.low)
                }),
                status: a.get_status().get_code().into(),
                message: a.get_status().get_message().into(),
            })
        }
        Some(U::packet(p)) => StreamEvent::Packet(PacketIn {
            payload: p.get_payload().to_vec(),
            metadata: p.get_metadata().iter().map(metadata_from_proto).collect(),
        }),
        Some(U::digest(d)) => StreamEvent::Digest(DigestList {
            digest_id: d.digest_id,
            list_id: d.list_id,
            data: d.get_data().iter().map(p4data_from_proto).collect(),
            timestamp: d.timestamp,
        }),
        Some(U::idle_timeout_notification(n)) => {
            StreamEvent::IdleTimeout(IdleTimeoutNotification {
                table_entries: n.get_table_entry().iter().map(table_entry_from_proto).collect(),
                timestamp: n.timestamp,
            })
        }
        Some(U::error(e)) => StreamEvent::Error(StreamError {
            code: e.canonical_code.into(),
            message: e.get_message().into(),
            space: e.get_space().into(),
            space_code: e.code,
        }),
        Some(U::other(any)) => StreamEvent::Unknown {
            type_url: any.get_type_url().into(),
            value: any.get_value().to_vec(),
        },
        None => StreamEvent::Unknown {
            type_url: String::new(),
            value: Vec::new(),
        },
    };
    StreamMessage::Event(event)
}

fn p4data_from_proto(d: &p4data::P4Data) -> P4Data {
    let members = |s: &p4data::P4StructLike| -> Vec<P4Data> {
        s.get_members().iter().map(p4data_from_proto).collect()
    };
    match &d.data {
        Some(D::bitstring(b)) => P4Data::Bitstring(b.clone()),
        Some(D::varbit(v)) => P4Data::Varbit {
            bitstring: v.get_bitstring().to_vec(),
            bit_width: v.bitwidth,
        },
        Some(D::bool(b)) => P4Data::Bool(*b),
        Some(D::tuple(t)) => P4Data::Tuple(members(t)),
        Some(D::field_struct(s)) => P4Data::Struct(members(s)),
        Some(D::header(h)) => P4Data::Header {
            is_valid: h.is_valid,
            bitstrings: h.get_bitstrings().to_vec(),
        },
        Some(D::field_enum(e)) => P4Data::Enum(e.clone()),
        Some(D::error(e)) => P4Data::Error(e.clone()),
        Some(D::enum_value(v)) => P4Data::EnumValue(v.clone()),
        None => P4Data::Unset,
    }
}

fn pipeline_to_proto(config: &ForwardingPipelineConfig) -> RpcResult<pr::ForwardingPipelineConfig> {
    let mut out = pr::ForwardingPipelineConfig::new();
    if let Some(p4info) = &config.p4info {
        out.set_p4info(p4info_to_proto(p4info).map_err(|e| {
            TransportError::new(StatusCode::InvalidArgument, e.to_string())
        })?);
    }
    out.set_p4_device_config(config.device_config.clone());
    if let Some(cookie) = config.cookie {
        out.set_cookie(pr::ForwardingPipelineConfig_Cookie {
            cookie,
            ..Default::default()
        });
    }
    Ok(out)
}

fn pipeline_from_proto(config: &pr::ForwardingPipelineConfig) -> RpcResult<ForwardingPipelineConfig> {
    let p4info = if config.has_p4info() {
        let p4info = config.get_p4info();
        let encoded = p4info
            .write_to_bytes()
            .map_err(|e| TransportError::new(StatusCode::Internal, e.to_string()))?;
        Some(p4info_from_proto(p4info, encoded))
    } else {
        None
    };
    Ok(ForwardingPipelineConfig {
        p4info,
        device_config: config.get_p4_device_config().to_vec(),
        cookie: config.has_cookie().then(|| config.get_cookie().cookie),
    })
}

fn repeated<T, U>(items: &[T], f: impl FnMut(&T) -> U) -> RepeatedField<U> {
    RepeatedField::from_vec(items.iter().map(f).collect())
}

fn update_to_proto(u: &Update) -> pr::Update {
    pr::Update {
        field_type: match u.kind {
            UpdateType::Insert => pr::Update_Type::INSERT,
            UpdateType::Modify => pr::Update_Type::MODIFY,
            UpdateType::Delete => pr::Update_Type::DELETE,
        },
        entity: Some(entity_to_proto(&u.entity)).into(),
        ..Default::default()
    }
}

fn entity_to_proto(e: &Entity) -> pr::Entity {
    let mut entity = pr::Entity::new();
    match e {
        Entity::TableEntry(t) => entity.set_table_entry(table_entry_to_proto(t)),
        Entity::ActionProfileMember(m) => entity.set_action_profile_member(pr::ActionProfileMember {
            action_profile_id: m.action_profile_id,
            member_id: m.member_id,
            action: m.action.as_ref().map(action_to_proto).into(),
            ..Default::default()
        }),
        Entity::ActionProfileGroup(g) => entity.set_action_profile_group(pr::ActionProfileGroup {
            action_profile_id: g.action_profile_id,
            group_id: g.group_id,
            members: repeated(&g.members, |m| {
                let mut member = pr::ActionProfileGroup_Member {
                    member_id: m.member_id,
                    weight: m.weight,
                    ..Default::default()
                };
                match &m.watch {
                    Some(Watch::Index(w)) => member.set_watch(*w),
                    Some(Watch::Port(p)) => member.set_watch_port(p.clone()),
                    None => (),
                }
                member
            }),
            max_size: g.max_size,
            ..Default::default()
        }),
        Entity::MeterEntry(m) => entity.set_meter_entry(pr::MeterEntry {
            meter_id: m.meter_id,
            index: m.index.map(index_to_proto).into(),
            config: m.config.as_ref().map(meter_config_to_proto).into(),
            ..Default::default()
        }),
        Entity::DirectMeterEntry(m) => entity.set_direct_meter_entry(pr::DirectMeterEntry {
            table_entry: m.table_entry.as_ref().map(table_entry_to_proto).into(),
            config: m.config.as_ref().map(meter_config_to_proto).into(),
            ..Default::default()
        }),
        Entity::CounterEntry(c) => entity.set_counter_entry(pr::CounterEntry {
            counter_id: c.counter_id,
            index: c.index.map(index_to_proto).into(),
            data: c.data.as_ref().map(counter_data_to_proto).into(),
            ..Default::default()
        }),
        Entity::DirectCounterEntry(c) => entity.set_direct_counter_entry(pr::DirectCounterEntry {
            table_entry: c.table_entry.as_ref().map(table_entry_to_proto).into(),
            data: c.data.as_ref().map(counter_data_to_proto).into(),
            ..Default::default()
        }),
        Entity::PacketReplication(p) => {
            let mut pre = pr::PacketReplicationEngineEntry::new();
            match p {
                PacketReplicationEngineEntry::MulticastGroup(g) => {
                    pre.set_multicast_group_entry(pr::MulticastGroupEntry {
                        multicast_group_id: g.multicast_group_id,
                        replicas: repeated(&g.replicas, replica_to_proto),
                        ..Default::default()
                    })
                }
                PacketReplicationEngineEntry::CloneSession(s) => {
                    pre.set_clone_session_entry(pr::CloneSessionEntry {
                        session_id: s.session_id,
                        replicas: repeated(&s.replicas, replica_to_proto),
                        class_of_service: s.class_of_service,
                        packet_length_bytes: s.packet_length_bytes,
                        ..Default::default()
                    })
                }
            }
            entity.set_packet_replication_engine_entry(pre);
        }
        Entity::DigestEntry(d) => entity.set_digest_entry(pr::DigestEntry {
            digest_id: d.digest_id,
            config: d
                .config
                .map(|c| pr::DigestEntry_Config {
                    max_timeout_ns: c.max_timeout_ns,
                    max_list_size: c.max_list_size,
                    ack_timeout_ns: c.ack_timeout_ns,
                    ..Default::default()
                })
                .into(),
            ..Default::default()
        }),
    }
    entity
}

fn index_to_proto(index: i64) -> pr::Index {
    pr::Index {
        index,
        ..Default::default()
    }
}

fn replica_to_proto(r: &Replica) -> pr::Replica {
    pr::Replica {
        egress_port: r.egress_port,
        instance: r.instance,
        ..Default::default()
    }
}

fn replica_from_proto(r: &pr::Replica) -> Replica {
    Replica {
        egress_port: r.egress_port,
        instance: r.instance,
    }
}

fn meter_config_to_proto(m: &MeterConfig) -> pr::MeterConfig {
    pr::MeterConfig {
        cir: m.cir,
        cburst: m.cburst,
        pir: m.pir,
        pburst: m.pburst,
        ..Default::default()
    }
}

fn meter_config_from_proto(m: &pr::MeterConfig) -> MeterConfig {
    MeterConfig {
        cir: m.cir,
        cburst: m.cburst,
        pir: m.pir,
        pburst: m.pburst,
    }
}

fn counter_data_to_proto(c: &CounterData) -> pr::CounterData {
    pr::CounterData {
        byte_count: c.byte_count,
        packet_count: c.packet_count,
        ..Default::default()
    }
}

fn counter_data_from_proto(c: &pr::CounterData) -> CounterData {
    CounterData {
        byte_count: c.byte_count,
        packet_count: c.packet_count,
    }
}

fn action_to_proto(a: &Action) -> pr::Action {
    pr::Action {
        action_id: a.action_id,
        params: repeated(&a.params, |p| pr::Action_Param {
            param_id: p.param_id,
            value: p.value.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn action_from_proto(a: &pr::Action) -> Action {
    Action {
        action_id: a.action_id,
        params: a
            .get_params()
            .iter()
            .map(|p| ActionParam {
                param_id: p.param_id,
                value: p.get_value().to_vec(),
            })
            .collect(),
    }
}

fn table_entry_to_proto(t: &TableEntry) -> pr::TableEntry {
    let mut entry = pr::TableEntry {
        table_id: t.table_id,
        field_match: repeated(&t.matches, field_match_to_proto),
        priority: t.priority,
        controller_metadata: t.controller_metadata,
        meter_config: t.meter_config.as_ref().map(meter_config_to_proto).into(),
        counter_data: t.counter_data.as_ref().map(counter_data_to_proto).into(),
        is_default_action: t.is_default_action,
        idle_timeout_ns: t.idle_timeout_ns,
        metadata: t.metadata.clone(),
        ..Default::default()
    };
    if let Some(elapsed_ns) = t.time_since_last_hit_ns {
        entry.set_time_since_last_hit(pr::TableEntry_IdleTimeout {
            elapsed_ns,
            ..Default::default()
        });
    }
    let action = match &t.action {
        Some(action) => action,
        None => return entry,
    };
    let mut table_action = pr::TableAction::new();
    match action {
        TableAction::Action(a) => table_action.set_action(action_to_proto(a)),
        TableAction::ActionProfileMemberId(id) => table_action.set_action_profile_member_id(*id),
        TableAction::ActionProfileGroupId(id) => table_action.set_action_profile_group_id(*id),
        TableAction::ActionProfileActionSet(actions) => {
            table_action.set_action_profile_action_set(pr::ActionProfileActionSet {
                action_profile_actions: repeated(actions, |apa| {
                    let mut out = pr::ActionProfileAction {
                        action: Some(action_to_proto(&apa.action)).into(),
                        weight: apa.weight,
                        ..Default::default()
                    };
                    match &apa.watch {
                        Some(Watch::Index(w)) => out.set_watch(*w),
                        Some(Watch::Port(p)) => out.set_watch_port(p.clone()),
                        None => (),
                    }
                    out
                }),
                ..Default::default()
            })
        }
    }
    entry.set_action(table_action);
    entry
}

fn field_match_to_proto(m: &FieldMatch) -> pr::FieldMatch {
    let mut field_match = pr::FieldMatch::new();
    field_match.set_field_id(m.field_id);
    match &m.kind {
        MatchKind::Exact { value } => field_match.set_exact(pr::FieldMatch_Exact {
            value: value.clone(),
            ..Default::default()
        }),
        MatchKind::Ternary { value, mask } => field_match.set_ternary(pr::FieldMatch_Ternary {
            value: value.clone(),
            mask: mask.clone(),
            ..Default::default()
        }),
        MatchKind::Lpm { value, prefix_len } => field_match.set_lpm(pr::FieldMatch_LPM {
            value: value.clone(),
            prefix_len: *prefix_len,
            ..Default::default()
        }),
        MatchKind::Range { low, high } => field_match.set_range(pr::FieldMatch_Range {
            low: low.clone(),
            high: high.clone(),
            ..Default::default()
        }),
        MatchKind::Optional { value } => field_match.set_optional(pr::FieldMatch_Optional {
            value: value.clone(),
            ..Default::default()
        }),
        MatchKind::Other { type_url, value } => field_match.set_other(Any {
            type_url: type_url.clone(),
            value: value.clone(),
            ..Default::default()
        }),
    }
    field_match
}

fn field_match_from_proto(m: &pr::FieldMatch) -> FieldMatch {
    let kind = if m.has_exact() {
        MatchKind::Exact {
            value: m.get_exact().get_value().to_vec(),
        }
    } else if m.has_ternary() {
        let t = m.get_ternary();
        MatchKind::Ternary {
            value: t.get_value().to_vec(),
            mask: t.get_mask().to_vec(),
        }
    } else if m.has_lpm() {
        let l = m.get_lpm();
        MatchKind::Lpm {
            value: l.get_value().to_vec(),
            prefix_len: l.prefix_len,
        }
    } else if m.has_range() {
        let r = m.get_range();
        MatchKind::Range {
            low: r.get_low().to_vec(),
            high: r.get_high().to_vec(),
        }
    } else if m.has_optional() {
        MatchKind::Optional {
            value: m.get_optional().get_value().to_vec(),
        }
    } else {
        let other = m.get_other();
        MatchKind::Other {
            type_url: other.get_type_url().into(),
            value: other.get_value().to_vec(),
        }
    };
    FieldMatch {
        field_id: m.field_id,
        kind,
    }
}

fn watch_from(has_watch: bool, watch: i32, has_port: bool, port: &[u8]) -> Option<Watch> {
    if has_watch {
        Some(Watch::Index(watch))
    } else if has_port {
        Some(Watch::Port(port.to_vec()))
    } else {
        None
    }
}

fn table_action_from_proto(a: &pr::TableAction) -> Option<TableAction> {
    if a.has_action() {
        Some(TableAction::Action(action_from_proto(a.get_action())))
    } else if a.has_action_profile_member_id() {
        Some(TableAction::ActionProfileMemberId(a.get_action_profile_member_id()))
    } else if a.has_action_profile_group_id() {
        Some(TableAction::ActionProfileGroupId(a.get_action_profile_group_id()))
    } else if a.has_action_profile_action_set() {
        let actions = a
            .get_action_profile_action_set()
            .get_action_profile_actions()
            .iter()
            .map(|apa| ActionProfileAction {
                action: action_from_proto(apa.get_action()),
                weight: apa.weight,
                watch: watch_from(
                    apa.has_watch(),
                    apa.get_watch(),
                    apa.has_watch_port(),
                    apa.get_watch_port(),
                ),
            })
            .collect();
        Some(TableAction::ActionProfileActionSet(actions))
    } else {
        None
    }
}

fn table_entry_from_proto(t: &pr::TableEntry) -> TableEntry {
    TableEntry {
        table_id: t.table_id,
        matches: t.get_field_match().iter().map(field_match_from_proto).collect(),
        action: if t.has_action() {
            table_action_from_proto(t.get_action())
        } else {
            None
        },
        priority: t.priority,
        controller_metadata: t.controller_metadata,
        meter_config: t
            .has_meter_config()
            .then(|| meter_config_from_proto(t.get_meter_config())),
        counter_data: t
            .has_counter_data()
            .then(|| counter_data_from_proto(t.get_counter_data())),
        is_default_action: t.is_default_action,
        idle_timeout_ns: t.idle_timeout_ns,
        time_since_last_hit_ns: t
            .has_time_since_last_hit()
            .then(|| t.get_time_since_last_hit().elapsed_ns),
        metadata: t.get_metadata().to_vec(),
    }
}

fn entity_from_proto(e: &pr::Entity) -> RpcResult<Entity> {
    use pr::Entity_oneof_entity as E;
    let index = |has: bool, index: &pr::Index| has.then(|| index.index);
    Ok(match &e.entity {
        Some(E::table_entry(t)) => Entity::TableEntry(table_entry_from_proto(t)),
        Some(E::action_profile_member(m)) => Entity::ActionProfileMember(ActionProfileMember {
            action_profile_id: m.action_profile_id,
            member_id: m.member_id,
            action: m.has_action().then(|| action_from_proto(m.get_action())),
        }),
        Some(E::action_profile_group(g)) => Entity::ActionProfileGroup(ActionProfileGroup {
            action_profile_id: g.action_profile_id,
            group_id: g.group_id,
            members: g
                .get_members()
                .iter()
                .map(|m| GroupMember {
                    member_id: m.member_id,
                    weight: m.weight,
                    watch: watch_from(
                        m.has_watch(),
                        m.get_watch(),
                        m.has_watch_port(),
                        m.get_watch_port(),
                    ),
                })
                .collect(),
            max_size: g.max_size,
        }),
        Some(E::meter_entry(m)) => Entity::MeterEntry(MeterEntry {
            meter_id: m.meter_id,
            index: index(m.has_index(), m.get_index()),
            config: m
                .has_config()
                .then(|| meter_config_from_proto(m.get_config())),
        }),
        Some(E::direct_meter_entry(m)) => Entity::DirectMeterEntry(DirectMeterEntry {
            table_entry: m
                .has_table_entry()
                .then(|| table_entry_from_proto(m.get_table_entry())),
            config: m
                .has_config()
                .then(|| meter_config_from_proto(m.get_config())),
        }),
        Some(E::counter_entry(c)) => Entity::CounterEntry(CounterEntry {
            counter_id: c.counter_id,
            index: index(c.has_index(), c.get_index()),
            data: c.has_data().then(|| counter_data_from_proto(c.get_data())),
        }),
        Some(E::direct_counter_entry(c)) => Entity::DirectCounterEntry(DirectCounterEntry {
            table_entry: c
                .has_table_entry()
                .then(|| table_entry_from_proto(c.get_table_entry())),
            data: c.has_data().then(|| counter_data_from_proto(c.get_data())),
        }),
        Some(E::packet_replication_engine_entry(p)) => {
            if p.has_multicast_group_entry() {
                let g = p.get_multicast_group_entry();
                MulticastGroupEntry {
                    multicast_group_id: g.multicast_group_id,
                    replicas: g.get_replicas().iter().map(replica_from_proto).collect(),
                }
                .into()
            } else if p.has_clone_session_entry() {
                let s = p.get_clone_session_entry();
                CloneSessionEntry {
                    session_id: s.session_id,
                    replicas: s.get_replicas().iter().map(replica_from_proto).collect(),
                    class_of_service: s.class_of_service,
                    packet_length_bytes: s.packet_length_bytes,
                }
                .into()
            } else {
                return Err(unsupported("packet replication engine entry"));
            }
        }
        Some(E::digest_entry(d)) => Entity::DigestEntry(DigestEntry {
            digest_id: d.digest_id,
            config: d.has_config().then(|| {
                let c = d.get_config();
                DigestConfig {
                    max_timeout_ns: c.max_timeout_ns,
                    max_list_size: c.max_list_size,
                    ack_timeout_ns: c.ack_timeout_ns,
                }
            }),
        }),
        None => return Err(unsupported("entity")),
    })
}

/// Reads a P4Info file in either binary or text protobuf format.
pub fn load_p4info(path: impl AsRef<Path>) -> Result<P4Info, SchemaError> {
    let path = path.as_ref();
    let bytes = fs::read(path)
        .map_err(|e| SchemaError::Decode(format!("{}: {}", path.display(), e)))?;
    decode_p4info(&bytes).map_err(|e| match e {
        SchemaError::Decode(msg) => SchemaError::Decode(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Decodes a P4Info in text format if `bytes` is one, otherwise in binary
/// format.
pub fn decode_p4info(bytes: &[u8]) -> Result<P4Info, SchemaError> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if let Ok(p4info) = protobuf::text_format::parse_from_str::<pi::P4Info>(text) {
            let encoded = p4info
                .write_to_bytes()
                .map_err(|e| SchemaError::Decode(e.to_string()))?;
            return Ok(p4info_from_proto(&p4info, encoded));
        }
    }
    let p4info = pi::P4Info::parse_from_bytes(bytes)
        .map_err(|e| SchemaError::Decode(format!("not a text or binary P4Info ({})", e)))?;
    Ok(p4info_from_proto(&p4info, bytes.to_vec()))
}

fn doc_from_proto(d: &pi::Documentation) -> Documentation {
    Documentation {
        brief: d.get_brief().into(),
        description: d.get_description().into(),
    }
}

fn preamble_from_proto(p: &pi::Preamble) -> Preamble {
    Preamble {
        id: p.id,
        name: p.get_name().into(),
        alias: p.get_alias().into(),
        annotations: p.get_annotations().to_vec(),
        doc: doc_from_proto(p.get_doc()),
    }
}

fn counter_unit_from_proto(spec: &pi::CounterSpec) -> CounterUnit {
    use pi::CounterSpec_Unit::*;
    match spec.unit {
        UNSPECIFIED => CounterUnit::Unspecified,
        BYTES => CounterUnit::Bytes,
        PACKETS => CounterUnit::Packets,
        BOTH => CounterUnit::Both,
    }
}

fn meter_unit_from_proto(spec: &pi::MeterSpec) -> MeterUnit {
    use pi::MeterSpec_Unit::*;
    match spec.unit {
        UNSPECIFIED => MeterUnit::Unspecified,
        BYTES => MeterUnit::Bytes,
        PACKETS => MeterUnit::Packets,
    }
}

fn match_field_from_proto(mf: &pi::MatchField) -> MatchField {
    use pi::MatchField_MatchType::*;
    MatchField {
        id: mf.id,
        name: mf.get_name().into(),
        annotations: mf.get_annotations().to_vec(),
        bit_width: mf.bitwidth,
        match_type: match mf.get_match_type() {
            EXACT => MatchType::Exact,
            LPM => MatchType::Lpm,
            TERNARY => MatchType::Ternary,
            RANGE => MatchType::Range,
            OPTIONAL => MatchType::Optional,
            UNSPECIFIED => {
                if mf.has_other_match_type() {
                    MatchType::Other(mf.get_other_match_type().into())
                } else {
                    MatchType::Unspecified
                }
            }
        },
    }
}

fn nonzero(id: u32) -> Option<u32> {
    (id != 0).then(|| id)
}

fn p4info_from_proto(p: &pi::P4Info, encoded: Vec<u8>) -> P4Info {
    P4Info {
        tables: p
            .get_tables()
            .iter()
            .map(|t| Table {
                preamble: preamble_from_proto(t.get_preamble()),
                match_fields: t.get_match_fields().iter().map(match_field_from_proto).collect(),
                action_refs: t
                    .get_action_refs()
                    .iter()
                    .map(|ar| ActionRef {
                        id: ar.id,
                        scope: match ar.scope {
                            pi::ActionRef_Scope::TABLE_AND_DEFAULT => ActionScope::TableAndDefault,
                            pi::ActionRef_Scope::TABLE_ONLY => ActionScope::TableOnly,
                            pi::ActionRef_Scope::DEFAULT_ONLY => ActionScope::DefaultOnly,
                        },
                        annotations: ar.get_annotations().to_vec(),
                    })
                    .collect(),
                const_default_action_id: nonzero(t.const_default_action_id),
                implementation_id: nonzero(t.implementation_id),
                direct_resource_ids: t.get_direct_resource_ids().to_vec(),
                max_entries: (t.size > 0).then(|| t.size as u64),
                idle_notify: t.idle_timeout_behavior
                    == pi::Table_IdleTimeoutBehavior::NOTIFY_CONTROL,
                is_const_table: t.is_const_table,
            })
            .collect(),
        actions: p
            .get_actions()
            .iter()
            .map(|a| SchemaAction {
                preamble: preamble_from_proto(a.get_preamble()),
                params: a
                    .get_params()
                    .iter()
                    .map(|ap| Param {
                        id: ap.id,
                        name: ap.get_name().into(),
                        annotations: ap.get_annotations().to_vec(),
                        bit_width: ap.bitwidth,
                    })
                    .collect(),
            })
            .collect(),
        action_profiles: p
            .get_action_profiles()
            .iter()
            .map(|ap| ActionProfile {
                preamble: preamble_from_proto(ap.get_preamble()),
                table_ids: ap.get_table_ids().to_vec(),
                with_selector: ap.with_selector,
                size: ap.size,
                max_group_size: ap.max_group_size,
            })
            .collect(),
        counters: p
            .get_counters()
            .iter()
            .map(|c| Counter {
                preamble: preamble_from_proto(c.get_preamble()),
                unit: counter_unit_from_proto(c.get_spec()),
                size: c.size,
            })
            .collect(),
        direct_counters: p
            .get_direct_counters()
            .iter()
            .map(|c| DirectCounter {
                preamble: preamble_from_proto(c.get_preamble()),
                unit: counter_unit_from_proto(c.get_spec()),
                direct_table_id: c.direct_table_id,
            })
            .collect(),
        meters: p
            .get_meters()
            .iter()
            .map(|m| Meter {
                preamble: preamble_from_proto(m.get_preamble()),
                unit: meter_unit_from_proto(m.get_spec()),
                size: m.size,
            })
            .collect(),
        direct_meters: p
            .get_direct_meters()
            .iter()
            .map(|m| DirectMeter {
                preamble: preamble_from_proto(m.get_preamble()),
                unit: meter_unit_from_proto(m.get_spec()),
                direct_table_id: m.direct_table_id,
            })
            .collect(),
        controller_packet_metadata: p
            .get_controller_packet_metadata()
            .iter()
            .map(|cpm| ControllerPacketMetadata {
                preamble: preamble_from_proto(cpm.get_preamble()),
                metadata: cpm
                    .get_metadata()
                    .iter()
                    .map(|m| PacketMetadataField {
                        id: m.id,
                        name: m.get_name().into(),
                        bit_width: m.bitwidth,
                    })
                    .collect(),
            })
            .collect(),
        digests: p
            .get_digests()
            .iter()
            .map(|d| Digest {
                preamble: preamble_from_proto(d.get_preamble()),
            })
            .collect(),
        registers: p
            .get_registers()
            .iter()
            .map(|r| Register {
                preamble: preamble_from_proto(r.get_preamble()),
                size: r.size,
            })
            .collect(),
        encoded,
    }
}

/// Encodes `p4info` for a device.  A document still matching the bytes it
/// was decoded from is sent as those bytes, so fields this crate does not
/// model survive.  An edited document is encoded from its model.
fn p4info_to_proto(p4info: &P4Info) -> Result<pi::P4Info, SchemaError> {
    if !p4info.encoded.is_empty() {
        let original = pi::P4Info::parse_from_bytes(&p4info.encoded)
            .map_err(|e| SchemaError::Decode(e.to_string()))?;
        if p4info_from_proto(&original, p4info.encoded.clone()) == *p4info {
            return Ok(original);
        }
        debug!("P4Info differs from its decoded bytes, encoding it from the model");
    }

    let preamble = |p: &Preamble| pi::Preamble {
        id: p.id,
        name: p.name.clone(),
        alias: p.alias.clone(),
        annotations: RepeatedField::from_vec(p.annotations.clone()),
        doc: Some(pi::Documentation {
            brief: p.doc.brief.clone(),
            description: p.doc.description.clone(),
            ..Default::default()
        })
        .into(),
        ..Default::default()
    };
    let counter_spec = |unit: CounterUnit| pi::CounterSpec {
        unit: match unit {
            CounterUnit::Unspecified => pi::CounterSpec_Unit::UNSPECIFIED,
            CounterUnit::Bytes => pi::CounterSpec_Unit::BYTES,
            CounterUnit::Packets => pi::CounterSpec_Unit::PACKETS,
            CounterUnit::Both => pi::CounterSpec_Unit::BOTH,
        },
        ..Default::default()
    };
    let meter_spec = |unit: MeterUnit| pi::MeterSpec {
        unit: match unit {
            MeterUnit::Unspecified => pi::MeterSpec_Unit::UNSPECIFIED,
            MeterUnit::Bytes => pi::MeterSpec_Unit::BYTES,
            MeterUnit::Packets => pi::MeterSpec_Unit::PACKETS,
        },
        ..Default::default()
    };

    Ok(pi::P4Info {
        tables: repeated(&p4info.tables, |t| pi::Table {
            preamble: Some(preamble(&t.preamble)).into(),
            match_fields: repeated(&t.match_fields, |mf| {
                use pi::MatchField_MatchType::*;
                let mut out = pi::MatchField {
                    id: mf.id,
                    name: mf.name.clone(),
                    annotations: RepeatedField::from_vec(mf.annotations.clone()),
                    bitwidth: mf.bit_width,
                    ..Default::default()
                };
                match &mf.match_type {
                    MatchType::Unspecified => out.set_match_type(UNSPECIFIED),
                    MatchType::Exact => out.set_match_type(EXACT),
                    MatchType::Lpm => out.set_match_type(LPM),
                    MatchType::Ternary => out.set_match_type(TERNARY),
                    MatchType::Range => out.set_match_type(RANGE),
                    MatchType::Optional => out.set_match_type(OPTIONAL),
                    MatchType::Other(s) => out.set_other_match_type(s.clone()),
                }
                out
            }),
            action_refs: repeated(&t.action_refs, |ar| pi::ActionRef {
                id: ar.id,
                scope: match ar.scope {
                    ActionScope::TableAndDefault => pi::ActionRef_Scope::TABLE_AND_DEFAULT,
                    ActionScope::TableOnly => pi::ActionRef_Scope::TABLE_ONLY,
                    ActionScope::DefaultOnly => pi::ActionRef_Scope::DEFAULT_ONLY,
                },
                annotations: RepeatedField::from_vec(ar.annotations.clone()),
                ..Default::default()
            }),
            const_default_action_id: t.const_default_action_id.unwrap_or(0),
            implementation_id: t.implementation_id.unwrap_or(0),
            direct_resource_ids: t.direct_resource_ids.clone(),
            size: t.max_entries.map_or(0, |n| n as i64),
            idle_timeout_behavior: if t.idle_notify {
                pi::Table_IdleTimeoutBehavior::NOTIFY_CONTROL
            } else {
                pi::Table_IdleTimeoutBehavior::NO_TIMEOUT
            },
            is_const_table: t.is_const_table,
            ..Default::default()
        }),
        actions: repeated(&p4info.actions, |a| pi::Action {
            preamble: Some(preamble(&a.preamble)).into(),
            params: repeated(&a.params, |p| pi::Action_Param {
                id: p.id,
                name: p.name.clone(),
                annotations: RepeatedField::from_vec(p.annotations.clone()),
                bitwidth: p.bit_width,
                ..Default::default()
            }),
            ..Default::default()
        }),
        action_profiles: repeated(&p4info.action_profiles, |ap| pi::ActionProfile {
            preamble: Some(preamble(&ap.preamble)).into(),
            table_ids: ap.table_ids.clone(),
            with_selector: ap.with_selector,
            size: ap.size,
            max_group_size: ap.max_group_size,
            ..Default::default()
        }),
        counters: repeated(&p4info.counters, |c| pi::Counter {
            preamble: Some(preamble(&c.preamble)).into(),
            spec: Some(counter_spec(c.unit)).into(),
            size: c.size,
            ..Default::default()
        }),
        direct_counters: repeated(&p4info.direct_counters, |c| pi::DirectCounter {
            preamble: Some(preamble(&c.preamble)).into(),
            spec: Some(counter_spec(c.unit)).into(),
            direct_table_id: c.direct_table_id,
            ..Default::default()
        }),
        meters: repeated(&p4info.meters, |m| pi::Meter {
            preamble: Some(preamble(&m.preamble)).into(),
            spec: Some(meter_spec(m.unit)).into(),
            size: m.size,
            ..Default::default()
        }),
        direct_meters: repeated(&p4info.direct_meters, |m| pi::DirectMeter {
            preamble: Some(preamble(&m.preamble)).into(),
            spec: Some(meter_spec(m.unit)).into(),
            direct_table_id: m.direct_table_id,
            ..Default::default()
        }),
        controller_packet_metadata: repeated(&p4info.controller_packet_metadata, |cpm| {
            pi::ControllerPacketMetadata {
                preamble: Some(preamble(&cpm.preamble)).into(),
                metadata: repeated(&cpm.metadata, |m| pi::ControllerPacketMetadata_Metadata {
                    id: m.id,
                    name: m.name.clone(),
                    bitwidth: m.bit_width,
                    ..Default::default()
                }),
                ..Default::default()
            }
        }),
        registers: repeated(&p4info.registers, |r| pi::Register {
            preamble: Some(preamble(&r.preamble)).into(),
            size: r.size,
            ..Default::default()
        }),
        digests: repeated(&p4info.digests, |d| pi::Digest {
            preamble: Some(preamble(&d.preamble)).into(),
            ..Default::default()
        }),
        ..Default::default()
    })
}
