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

//! Device state objects addressed by Write and Read.

/// An entity, used both as the subject of an update and as a read template.
/// In templates, zero ids and empty fields are wildcards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    TableEntry(TableEntry),
    ActionProfileMember(ActionProfileMember),
    ActionProfileGroup(ActionProfileGroup),
    MeterEntry(MeterEntry),
    DirectMeterEntry(DirectMeterEntry),
    CounterEntry(CounterEntry),
    DirectCounterEntry(DirectCounterEntry),
    PacketReplication(PacketReplicationEngineEntry),
    DigestEntry(DigestEntry),
}

impl Entity {
    /// Short description for log messages.
    pub fn describe(&self) -> String {
        use Entity::*;
        match self {
            TableEntry(e) => format!("table entry in table {}", e.table_id),
            ActionProfileMember(m) => format!(
                "member {} of action profile {}",
                m.member_id, m.action_profile_id
            ),
            ActionProfileGroup(g) => format!(
                "group {} of action profile {}",
                g.group_id, g.action_profile_id
            ),
            MeterEntry(m) => format!("meter {}", m.meter_id),
            DirectMeterEntry(_) => "direct meter entry".into(),
            CounterEntry(c) => format!("counter {}", c.counter_id),
            DirectCounterEntry(_) => "direct counter entry".into(),
            PacketReplication(PacketReplicationEngineEntry::MulticastGroup(g)) => {
                format!("multicast group {}", g.multicast_group_id)
            }
            PacketReplication(PacketReplicationEngineEntry::CloneSession(s)) => {
                format!("clone session {}", s.session_id)
            }
            DigestEntry(d) => format!("digest {}", d.digest_id),
        }
    }
}

macro_rules! entity_from {
    ($type:ident, $variant:ident) => {
        impl From<$type> for Entity {
            fn from(x: $type) -> Self {
                Entity::$variant(x)
            }
        }
    };
}

entity_from!(TableEntry, TableEntry);
entity_from!(ActionProfileMember, ActionProfileMember);
entity_from!(ActionProfileGroup, ActionProfileGroup);
entity_from!(MeterEntry, MeterEntry);
entity_from!(DirectMeterEntry, DirectMeterEntry);
entity_from!(CounterEntry, CounterEntry);
entity_from!(DirectCounterEntry, DirectCounterEntry);
entity_from!(PacketReplicationEngineEntry, PacketReplication);
entity_from!(DigestEntry, DigestEntry);

impl From<MulticastGroupEntry> for Entity {
    fn from(x: MulticastGroupEntry) -> Self {
        Entity::PacketReplication(PacketReplicationEngineEntry::MulticastGroup(x))
    }
}

impl From<CloneSessionEntry> for Entity {
    fn from(x: CloneSessionEntry) -> Self {
        Entity::PacketReplication(PacketReplicationEngineEntry::CloneSession(x))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateType {
    Insert,
    Modify,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub kind: UpdateType,
    pub entity: Entity,
}

impl Update {
    pub fn insert(entity: impl Into<Entity>) -> Self {
        Update {
            kind: UpdateType::Insert,
            entity: entity.into(),
        }
    }

    pub fn modify(entity: impl Into<Entity>) -> Self {
        Update {
            kind: UpdateType::Modify,
            entity: entity.into(),
        }
    }

    pub fn delete(entity: impl Into<Entity>) -> Self {
        Update {
            kind: UpdateType::Delete,
            entity: entity.into(),
        }
    }
}

/// How the device treats a batch when one of its updates fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Atomicity {
    ContinueOnError,
    RollbackOnError,
    DataplaneAtomic,
}

impl Default for Atomicity {
    fn default() -> Self {
        Atomicity::ContinueOnError
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableEntry {
    pub table_id: u32,
    pub matches: Vec<FieldMatch>,
    pub action: Option<TableAction>,
    pub priority: i32,
    pub controller_metadata: u64,
    pub meter_config: Option<MeterConfig>,
    pub counter_data: Option<CounterData>,
    pub is_default_action: bool,
    pub idle_timeout_ns: i64,
    pub time_since_last_hit_ns: Option<i64>,
    pub metadata: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMatch {
    pub field_id: u32,
    pub kind: MatchKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchKind {
    Exact { value: Vec<u8> },
    Ternary { value: Vec<u8>, mask: Vec<u8> },
    Lpm { value: Vec<u8>, prefix_len: i32 },
    Range { low: Vec<u8>, high: Vec<u8> },
    Optional { value: Vec<u8> },
    /// An architecture-specific match, packed as a `google.protobuf.Any`.
    Other { type_url: String, value: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableAction {
    Action(Action),
    ActionProfileMemberId(u32),
    ActionProfileGroupId(u32),
    ActionProfileActionSet(Vec<ActionProfileAction>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Action {
    pub action_id: u32,
    pub params: Vec<ActionParam>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionParam {
    pub param_id: u32,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Watch {
    Index(i32),
    Port(Vec<u8>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionProfileAction {
    pub action: Action,
    pub weight: i32,
    pub watch: Option<Watch>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionProfileMember {
    pub action_profile_id: u32,
    pub member_id: u32,
    pub action: Option<Action>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupMember {
    pub member_id: u32,
    pub weight: i32,
    pub watch: Option<Watch>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionProfileGroup {
    pub action_profile_id: u32,
    pub group_id: u32,
    pub members: Vec<GroupMember>,
    pub max_size: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeterConfig {
    pub cir: i64,
    pub cburst: i64,
    pub pir: i64,
    pub pburst: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeterEntry {
    pub meter_id: u32,
    pub index: Option<i64>,
    pub config: Option<MeterConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectMeterEntry {
    pub table_entry: Option<TableEntry>,
    pub config: Option<MeterConfig>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterData {
    pub byte_count: i64,
    pub packet_count: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterEntry {
    pub counter_id: u32,
    pub index: Option<i64>,
    pub data: Option<CounterData>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectCounterEntry {
    pub table_entry: Option<TableEntry>,
    pub data: Option<CounterData>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PacketReplicationEngineEntry {
    MulticastGroup(MulticastGroupEntry),
    CloneSession(CloneSessionEntry),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Replica {
    pub egress_port: u32,
    pub instance: u32,
}

/// Gives each port a replica, numbering instances from 1 in input order.
/// Repeated ports get one replica per occurrence.
fn replicas_for(ports: &[u32]) -> Vec<Replica> {
    ports
        .iter()
        .zip(1..)
        .map(|(&egress_port, instance)| Replica {
            egress_port,
            instance,
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MulticastGroupEntry {
    pub multicast_group_id: u32,
    pub replicas: Vec<Replica>,
}

impl MulticastGroupEntry {
    pub fn new(multicast_group_id: u32, ports: &[u32]) -> Self {
        MulticastGroupEntry {
            multicast_group_id,
            replicas: replicas_for(ports),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloneSessionEntry {
    pub session_id: u32,
    pub replicas: Vec<Replica>,
    pub class_of_service: u32,
    pub packet_length_bytes: i32,
}

impl CloneSessionEntry {
    pub fn new(session_id: u32, ports: &[u32]) -> Self {
        CloneSessionEntry {
            session_id,
            replicas: replicas_for(ports),
            ..Default::default()
        }
    }
}

/// How a device batches digest lists for one digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DigestConfig {
    pub max_timeout_ns: i64,
    pub max_list_size: i32,
    pub ack_timeout_ns: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestEntry {
    pub digest_id: u32,
    pub config: Option<DigestConfig>,
}
