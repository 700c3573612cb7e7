/*
Copyright (c) 2021 VMware, Inc.
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

//! Decoded P4Info documents and the validated, indexed [`Schema`] built
//! from them.

use byteorder::{BigEndian, ByteOrder};

use itertools::Itertools;

use std::collections::HashMap;
use std::fmt::{self, Display};

use crate::entity::{self, FieldMatch, MatchKind, TableAction, TableEntry};
use crate::error::{Error, LookupError, SchemaError};

/// The kinds of named object a P4Info lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Table,
    Action,
    ActionProfile,
    Counter,
    DirectCounter,
    Meter,
    DirectMeter,
    ControllerPacketMetadata,
    Digest,
    Register,
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ObjectKind::*;
        let s = match self {
            Table => "table",
            Action => "action",
            ActionProfile => "action profile",
            Counter => "counter",
            DirectCounter => "direct counter",
            Meter => "meter",
            DirectMeter => "direct meter",
            ControllerPacketMetadata => "controller packet metadata",
            Digest => "digest",
            Register => "register",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Documentation {
    pub brief: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preamble {
    pub id: u32,
    pub name: String,
    pub alias: String,
    pub annotations: Vec<String>,
    pub doc: Documentation,
}

impl Preamble {
    /// A preamble whose alias is the last component of `name`, the way the
    /// P4 compiler picks aliases when they do not collide.
    pub fn new(id: u32, name: &str) -> Self {
        Preamble {
            id,
            name: name.into(),
            alias: name.rsplit('.').next().unwrap_or(name).into(),
            ..Default::default()
        }
    }

    /// The part of the name after the last `.`, e.g. `t` for `ingress.t`.
    pub fn base_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchType {
    Unspecified,
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
    Other(String),
}

impl Default for MatchType {
    fn default() -> Self {
        MatchType::Unspecified
    }
}

impl Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use MatchType::*;
        let s = match self {
            Unspecified => "unspecified",
            Exact => "exact",
            Lpm => "LPM",
            Ternary => "ternary",
            Range => "range",
            Optional => "optional",
            Other(s) => s,
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchField {
    pub id: u32,
    pub name: String,
    pub annotations: Vec<String>,
    pub bit_width: i32,
    pub match_type: MatchType,
}

impl MatchField {
    pub fn new(id: u32, name: &str, bit_width: i32, match_type: MatchType) -> Self {
        MatchField {
            id,
            name: name.into(),
            bit_width,
            match_type,
            ..Default::default()
        }
    }

    /// A match on exactly `value`.  LPM matches use the full prefix, ternary
    /// matches an all-ones mask, and range matches `value..=value`.
    pub fn to_field_match(&self, value: u64) -> Result<FieldMatch, Error> {
        let v = encode_value(value, self.bit_width)?;
        let kind = match self.match_type {
            MatchType::Exact => MatchKind::Exact { value: v },
            MatchType::Lpm => MatchKind::Lpm {
                value: v,
                prefix_len: self.bit_width,
            },
            MatchType::Ternary => MatchKind::Ternary {
                value: v,
                mask: full_mask(self.bit_width),
            },
            MatchType::Range => MatchKind::Range {
                low: v.clone(),
                high: v,
            },
            MatchType::Optional => MatchKind::Optional { value: v },
            MatchType::Unspecified | MatchType::Other(_) => {
                return Err(Error::InvalidArgument(format!(
                    "match field \"{}\" has unsupported match type {}",
                    self.name, self.match_type
                )))
            }
        };
        Ok(FieldMatch {
            field_id: self.id,
            kind,
        })
    }
}

impl Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field {}: bit<{}> {}-match",
            self.name, self.bit_width, self.match_type
        )?;
        if !self.annotations.is_empty() {
            write!(f, " {}", self.annotations.iter().join(" "))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Param {
    pub id: u32,
    pub name: String,
    pub annotations: Vec<String>,
    pub bit_width: i32,
}

impl Param {
    pub fn new(id: u32, name: &str, bit_width: i32) -> Self {
        Param {
            id,
            name: name.into(),
            bit_width,
            ..Default::default()
        }
    }
}

impl Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: bit<{}>", self.name, self.bit_width)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Action {
    pub preamble: Preamble,
    pub params: Vec<Param>,
}

impl Action {
    /// Builds a runtime action from parameter values keyed by name.  Every
    /// parameter must be given.
    pub fn to_runtime(&self, values: &HashMap<String, u64>) -> Result<entity::Action, Error> {
        if let Some(unknown) = values
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(LookupError::NoMember {
                owner: format!("action \"{}\"", self.preamble.name),
                what: "parameter",
                name: unknown.clone(),
            }
            .into());
        }
        let params = self
            .params
            .iter()
            .map(|p| {
                let value = values.get(&p.name).ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "action \"{}\" requires a value for parameter \"{}\"",
                        self.preamble.name, p.name
                    ))
                })?;
                Ok(entity::ActionParam {
                    param_id: p.id,
                    value: encode_value(*value, p.bit_width)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(entity::Action {
            action_id: self.preamble.id,
            params,
        })
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "action {}({})",
            self.preamble.name,
            self.params.iter().join(", ")
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionScope {
    TableAndDefault,
    TableOnly,
    DefaultOnly,
}

impl Default for ActionScope {
    fn default() -> Self {
        ActionScope::TableAndDefault
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionRef {
    pub id: u32,
    pub scope: ActionScope,
    pub annotations: Vec<String>,
}

impl ActionRef {
    pub fn new(id: u32) -> Self {
        ActionRef {
            id,
            ..Default::default()
        }
    }

    /// Allowed as the default action?
    pub fn may_be_default(&self) -> bool {
        self.scope != ActionScope::TableOnly
    }

    /// Allowed as an entry's action?
    pub fn may_be_entry(&self) -> bool {
        self.scope != ActionScope::DefaultOnly
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    pub preamble: Preamble,
    pub match_fields: Vec<MatchField>,
    pub action_refs: Vec<ActionRef>,
    pub const_default_action_id: Option<u32>,
    pub implementation_id: Option<u32>,
    pub direct_resource_ids: Vec<u32>,
    pub max_entries: Option<u64>,
    pub idle_notify: bool,
    pub is_const_table: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionProfile {
    pub preamble: Preamble,
    pub table_ids: Vec<u32>,
    pub with_selector: bool,
    pub size: i64,
    pub max_group_size: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterUnit {
    Unspecified,
    Bytes,
    Packets,
    Both,
}

impl Default for CounterUnit {
    fn default() -> Self {
        CounterUnit::Unspecified
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counter {
    pub preamble: Preamble,
    pub unit: CounterUnit,
    pub size: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectCounter {
    pub preamble: Preamble,
    pub unit: CounterUnit,
    pub direct_table_id: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeterUnit {
    Unspecified,
    Bytes,
    Packets,
}

impl Default for MeterUnit {
    fn default() -> Self {
        MeterUnit::Unspecified
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Meter {
    pub preamble: Preamble,
    pub unit: MeterUnit,
    pub size: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectMeter {
    pub preamble: Preamble,
    pub unit: MeterUnit,
    pub direct_table_id: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketMetadataField {
    pub id: u32,
    pub name: String,
    pub bit_width: i32,
}

/// The metadata header layout of packet-in (`packet_in`) or packet-out
/// (`packet_out`) messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerPacketMetadata {
    pub preamble: Preamble,
    pub metadata: Vec<PacketMetadataField>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Digest {
    pub preamble: Preamble,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Register {
    pub preamble: Preamble,
    pub size: i32,
}

/// A decoded P4Info document.
///
/// `encoded` is the wire form the document was decoded from, including any
/// fields this crate does not model.  An unedited document is pushed back to
/// a device as those bytes; once any field above changes, it is encoded from
/// the fields instead.  It is empty for documents built in code.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct P4Info {
    pub tables: Vec<Table>,
    pub actions: Vec<Action>,
    pub action_profiles: Vec<ActionProfile>,
    pub counters: Vec<Counter>,
    pub direct_counters: Vec<DirectCounter>,
    pub meters: Vec<Meter>,
    pub direct_meters: Vec<DirectMeter>,
    pub controller_packet_metadata: Vec<ControllerPacketMetadata>,
    pub digests: Vec<Digest>,
    pub registers: Vec<Register>,
    pub encoded: Vec<u8>,
}

/// An object with a preamble, listed under one [`ObjectKind`] in a P4Info.
pub trait P4Object: Sized {
    const KIND: ObjectKind;
    fn preamble(&self) -> &Preamble;
    fn list(p4info: &P4Info) -> &[Self];
}

macro_rules! p4_object {
    ($type:ident, $kind:ident, $field:ident) => {
        impl P4Object for $type {
            const KIND: ObjectKind = ObjectKind::$kind;
            fn preamble(&self) -> &Preamble {
                &self.preamble
            }
            fn list(p4info: &P4Info) -> &[Self] {
                &p4info.$field
            }
        }
    };
}

p4_object!(Table, Table, tables);
p4_object!(Action, Action, actions);
p4_object!(ActionProfile, ActionProfile, action_profiles);
p4_object!(Counter, Counter, counters);
p4_object!(DirectCounter, DirectCounter, direct_counters);
p4_object!(Meter, Meter, meters);
p4_object!(DirectMeter, DirectMeter, direct_meters);
p4_object!(ControllerPacketMetadata, ControllerPacketMetadata, controller_packet_metadata);
p4_object!(Digest, Digest, digests);
p4_object!(Register, Register, registers);

fn tagged<T: P4Object>(items: &[T]) -> impl Iterator<Item = (ObjectKind, &Preamble)> {
    items.iter().map(|x| (T::KIND, x.preamble()))
}

impl P4Info {
    /// Every preamble in the document, tagged with its kind.
    pub fn preambles(&self) -> impl Iterator<Item = (ObjectKind, &Preamble)> {
        tagged(&self.tables)
            .chain(tagged(&self.actions))
            .chain(tagged(&self.action_profiles))
            .chain(tagged(&self.counters))
            .chain(tagged(&self.direct_counters))
            .chain(tagged(&self.meters))
            .chain(tagged(&self.direct_meters))
            .chain(tagged(&self.controller_packet_metadata))
            .chain(tagged(&self.digests))
            .chain(tagged(&self.registers))
    }

    fn find<T: P4Object>(&self, id: u32) -> Option<&T> {
        T::list(self).iter().find(|x| x.preamble().id == id)
    }
}

/// A validated P4Info with a name index.
#[derive(Debug)]
pub struct Schema {
    p4info: P4Info,
    names: HashMap<(ObjectKind, String), u32>,
}

impl Schema {
    pub fn new(p4info: P4Info) -> Result<Self, SchemaError> {
        validate(&p4info)?;

        // Full names take precedence over aliases; otherwise the first
        // object listed wins.
        let mut names = HashMap::new();
        for (kind, p) in p4info.preambles() {
            names.entry((kind, p.name.clone())).or_insert(p.id);
        }
        for (kind, p) in p4info.preambles() {
            if !p.alias.is_empty() {
                names.entry((kind, p.alias.clone())).or_insert(p.id);
            }
        }
        Ok(Schema { p4info, names })
    }

    pub fn p4info(&self) -> &P4Info {
        &self.p4info
    }

    pub fn id(&self, kind: ObjectKind, name: &str) -> Option<u32> {
        self.names.get(&(kind, name.to_string())).copied()
    }

    pub fn resolve(&self, kind: ObjectKind, name: &str) -> Result<u32, LookupError> {
        self.id(kind, name).ok_or_else(|| LookupError::NotFound {
            kind,
            name: name.into(),
        })
    }

    /// The object of type `T` named (or aliased) `name`.
    pub fn object<T: P4Object>(&self, name: &str) -> Result<&T, LookupError> {
        let id = self.resolve(T::KIND, name)?;
        self.p4info.find(id).ok_or_else(|| LookupError::NotFound {
            kind: T::KIND,
            name: name.into(),
        })
    }

    pub fn object_by_id<T: P4Object>(&self, id: u32) -> Option<&T> {
        self.p4info.find(id)
    }

    pub fn table(&self, name: &str) -> Result<&Table, LookupError> {
        self.object(name)
    }

    pub fn action(&self, name: &str) -> Result<&Action, LookupError> {
        self.object(name)
    }

    pub fn action_profile(&self, name: &str) -> Result<&ActionProfile, LookupError> {
        self.object(name)
    }

    pub fn counter(&self, name: &str) -> Result<&Counter, LookupError> {
        self.object(name)
    }

    pub fn meter(&self, name: &str) -> Result<&Meter, LookupError> {
        self.object(name)
    }

    pub fn digest(&self, name: &str) -> Result<&Digest, LookupError> {
        self.object(name)
    }

    pub fn controller_packet_metadata(
        &self,
        name: &str,
    ) -> Result<&ControllerPacketMetadata, LookupError> {
        self.object(name)
    }

    /// Builds a table entry for `table_name` that invokes `action_name`.
    ///
    /// `params` gives a value for every action parameter.  `matches` gives
    /// values for match fields by name; every exact-match field is required,
    /// other fields left out are wildcards.
    pub fn table_entry(
        &self,
        table_name: &str,
        action_name: &str,
        params: &HashMap<String, u64>,
        matches: &HashMap<String, u64>,
        priority: i32,
    ) -> Result<TableEntry, Error> {
        let table = self.table(table_name)?;
        let owner = || format!("table \"{}\"", table.preamble.name);

        let (action_ref, action) = table
            .action_refs
            .iter()
            .filter_map(|ar| Some((ar, self.object_by_id::<Action>(ar.id)?)))
            .find(|(_, a)| a.preamble.name == action_name || a.preamble.alias == action_name)
            .ok_or_else(|| LookupError::NoMember {
                owner: owner(),
                what: "action",
                name: action_name.into(),
            })?;
        if !action_ref.may_be_entry() {
            return Err(Error::InvalidArgument(format!(
                "action \"{}\" may only be the default action of {}",
                action_name,
                owner()
            )));
        }

        if let Some(unknown) = matches
            .keys()
            .find(|k| !table.match_fields.iter().any(|mf| &mf.name == *k))
        {
            return Err(LookupError::NoMember {
                owner: owner(),
                what: "match field",
                name: unknown.clone(),
            }
            .into());
        }
        let mut field_matches = Vec::new();
        for mf in &table.match_fields {
            match matches.get(&mf.name) {
                Some(value) => field_matches.push(mf.to_field_match(*value)?),
                None if mf.match_type == MatchType::Exact => {
                    return Err(Error::InvalidArgument(format!(
                        "{} requires a value for exact match field \"{}\"",
                        owner(),
                        mf.name
                    )))
                }
                None => (),
            }
        }

        Ok(TableEntry {
            table_id: table.preamble.id,
            matches: field_matches,
            action: Some(TableAction::Action(action.to_runtime(params)?)),
            priority,
            ..Default::default()
        })
    }

    /// Formats `table` with its actions resolved by name.
    pub fn display_table<'a>(&'a self, table: &'a Table) -> impl Display + 'a {
        TableDisplay {
            schema: self,
            table,
        }
    }
}

struct TableDisplay<'a> {
    schema: &'a Schema,
    table: &'a Table,
}

impl Display for TableDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table;
        write!(f, "table {}:", table.preamble.name)?;
        for mf in &table.match_fields {
            write!(f, "\t{}", mf)?;
        }
        for ar in &table.action_refs {
            if !ar.may_be_entry() {
                write!(f, "\tdefault-only ")?;
            } else if !ar.may_be_default() {
                write!(f, "\tnot-default ")?;
            } else {
                write!(f, "\t")?;
            }
            match self.schema.object_by_id::<Action>(ar.id) {
                Some(a) => write!(f, "{}", a)?,
                None => write!(f, "action #{}", ar.id)?,
            }
        }
        if let Some(max_entries) = table.max_entries {
            write!(f, "\tsize: {}", max_entries)?;
        }
        if let Some(a) = table
            .const_default_action_id
            .and_then(|id| self.schema.object_by_id::<Action>(id))
        {
            write!(f, "\tconst default action {}", a.preamble.name)?;
        }
        if table.is_const_table {
            write!(f, "\tconst table")?;
        }
        if table.idle_notify {
            write!(f, "\tidle notify")?;
        }
        Ok(())
    }
}

fn validate(p4info: &P4Info) -> Result<(), SchemaError> {
    let mut ids: HashMap<u32, ObjectKind> = HashMap::new();
    for (kind, p) in p4info.preambles() {
        if p.id == 0 {
            return Err(SchemaError::Malformed(format!(
                "{} \"{}\" has id 0",
                kind, p.name
            )));
        }
        if p.name.is_empty() {
            return Err(SchemaError::Malformed(format!("{} {} has no name", kind, p.id)));
        }
        if let Some(other) = ids.insert(p.id, kind) {
            return Err(SchemaError::Malformed(format!(
                "id {} is used by a {} and by {} \"{}\"",
                p.id, other, kind, p.name
            )));
        }
    }

    let is = |id: u32, kind: ObjectKind| ids.get(&id) == Some(&kind);
    for t in &p4info.tables {
        for ar in &t.action_refs {
            if !is(ar.id, ObjectKind::Action) {
                return Err(SchemaError::Malformed(format!(
                    "table \"{}\" refers to undefined action {}",
                    t.preamble.name, ar.id
                )));
            }
        }
        if let Some(id) = t.const_default_action_id {
            if !is(id, ObjectKind::Action) {
                return Err(SchemaError::Malformed(format!(
                    "table \"{}\" has undefined const default action {}",
                    t.preamble.name, id
                )));
            }
        }
    }
    for ap in &p4info.action_profiles {
        for id in &ap.table_ids {
            if !is(*id, ObjectKind::Table) {
                return Err(SchemaError::Malformed(format!(
                    "action profile \"{}\" refers to undefined table {}",
                    ap.preamble.name, id
                )));
            }
        }
    }
    let direct = p4info
        .direct_counters
        .iter()
        .map(|dc| (&dc.preamble, dc.direct_table_id))
        .chain(
            p4info
                .direct_meters
                .iter()
                .map(|dm| (&dm.preamble, dm.direct_table_id)),
        );
    for (p, table_id) in direct {
        if !is(table_id, ObjectKind::Table) {
            return Err(SchemaError::Malformed(format!(
                "\"{}\" is attached to undefined table {}",
                p.name, table_id
            )));
        }
    }
    Ok(())
}

fn byte_width(bit_width: i32) -> usize {
    ((bit_width.max(1) as usize) + 7) / 8
}

/// Encodes `value` big-endian in the `(bit_width + 7) / 8` bytes P4Runtime
/// expects for a field of `bit_width` bits.
pub fn encode_value(value: u64, bit_width: i32) -> Result<Vec<u8>, Error> {
    if bit_width < 64 && value >> bit_width.max(1) != 0 {
        return Err(Error::InvalidArgument(format!(
            "{} does not fit in {} bits",
            value, bit_width
        )));
    }
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, value);
    let num_bytes = byte_width(bit_width);
    Ok(if num_bytes >= buf.len() {
        let mut v = vec![0u8; num_bytes - buf.len()];
        v.extend_from_slice(&buf);
        v
    } else {
        buf[buf.len() - num_bytes..].to_vec()
    })
}

/// Decodes a big-endian byte string, or returns `None` if the value does
/// not fit in 64 bits.
pub fn decode_value(bytes: &[u8]) -> Option<u64> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - significant.len()..].copy_from_slice(significant);
    Some(BigEndian::read_u64(&buf))
}

fn full_mask(bit_width: i32) -> Vec<u8> {
    let num_bytes = byte_width(bit_width);
    let mut mask = vec![0xffu8; num_bytes];
    let extra_bits = num_bytes * 8 - bit_width.max(1) as usize;
    mask[0] = 0xff >> extra_bits;
    mask
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A small pipeline: one table with an exact and an LPM key, two actions,
    /// a digest and a counter.
    pub(crate) fn sample_p4info() -> P4Info {
        P4Info {
            tables: vec![Table {
                preamble: Preamble::new(33554433, "ingress.forward"),
                match_fields: vec![
                    MatchField::new(1, "hdr.eth.dst", 48, MatchType::Exact),
                    MatchField::new(2, "hdr.ipv4.dst", 32, MatchType::Lpm),
                ],
                action_refs: vec![ActionRef::new(16777217), ActionRef::new(16777218)],
                max_entries: Some(1024),
                ..Default::default()
            }],
            actions: vec![
                Action {
                    preamble: Preamble::new(16777217, "ingress.set_port"),
                    params: vec![Param::new(1, "port", 9)],
                },
                Action {
                    preamble: Preamble::new(16777218, "ingress.drop"),
                    params: vec![],
                },
            ],
            counters: vec![Counter {
                preamble: Preamble::new(302011111, "ingress.hits"),
                unit: CounterUnit::Packets,
                size: 64,
            }],
            digests: vec![Digest {
                preamble: Preamble::new(385000001, "learn_t"),
            }],
            ..Default::default()
        }
    }

    fn values(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn resolves_names_and_aliases() {
        let schema = Schema::new(sample_p4info()).unwrap();
        assert_eq!(schema.resolve(ObjectKind::Table, "ingress.forward"), Ok(33554433));
        assert_eq!(schema.resolve(ObjectKind::Table, "forward"), Ok(33554433));
        assert_eq!(schema.resolve(ObjectKind::Digest, "learn_t"), Ok(385000001));
        assert_eq!(
            schema.resolve(ObjectKind::Action, "ingress.forward"),
            Err(LookupError::NotFound {
                kind: ObjectKind::Action,
                name: "ingress.forward".into()
            })
        );
    }

    #[test]
    fn full_name_beats_alias() {
        let mut p4info = sample_p4info();
        let mut shadow = Preamble::new(16777219, "other.thing");
        shadow.alias = "ingress.drop".into();
        p4info.actions.push(Action {
            preamble: shadow,
            params: vec![],
        });
        let schema = Schema::new(p4info).unwrap();
        assert_eq!(schema.resolve(ObjectKind::Action, "ingress.drop"), Ok(16777218));
    }

    #[test]
    fn rejects_malformed_documents() {
        let mut zero_id = sample_p4info();
        zero_id.actions[1].preamble.id = 0;
        assert!(matches!(Schema::new(zero_id), Err(SchemaError::Malformed(_))));

        let mut no_name = sample_p4info();
        no_name.digests[0].preamble.name.clear();
        assert!(matches!(Schema::new(no_name), Err(SchemaError::Malformed(_))));

        let mut duplicate = sample_p4info();
        duplicate.counters[0].preamble.id = 16777217;
        assert!(matches!(Schema::new(duplicate), Err(SchemaError::Malformed(_))));

        let mut dangling = sample_p4info();
        dangling.tables[0].action_refs.push(ActionRef::new(16777299));
        assert!(matches!(Schema::new(dangling), Err(SchemaError::Malformed(_))));

        let mut profile = sample_p4info();
        profile.action_profiles.push(ActionProfile {
            preamble: Preamble::new(285000001, "ingress.ecmp"),
            table_ids: vec![33554499],
            ..Default::default()
        });
        assert!(matches!(Schema::new(profile), Err(SchemaError::Malformed(_))));
    }

    #[test]
    fn encode_value_uses_field_width() {
        assert_eq!(encode_value(5, 9).unwrap(), vec![0, 5]);
        assert_eq!(encode_value(0x0a000001, 32).unwrap(), vec![10, 0, 0, 1]);
        assert_eq!(encode_value(1, 1).unwrap(), vec![1]);
        assert_eq!(encode_value(1, 72).unwrap(), vec![0, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert!(encode_value(512, 9).is_err());
        assert_eq!(decode_value(&[0, 0, 1, 2]), Some(258));
        assert_eq!(decode_value(&[1, 0, 0, 0, 0, 0, 0, 0, 0]), None);
        assert_eq!(full_mask(9), vec![0x01, 0xff]);
    }

    #[test]
    fn builds_table_entry() {
        let schema = Schema::new(sample_p4info()).unwrap();
        let entry = schema
            .table_entry(
                "forward",
                "set_port",
                &values(&[("port", 3)]),
                &values(&[("hdr.eth.dst", 0x0000_0142_0000), ("hdr.ipv4.dst", 0x0a00_0001)]),
                0,
            )
            .unwrap();
        assert_eq!(entry.table_id, 33554433);
        assert_eq!(
            entry.matches,
            vec![
                FieldMatch {
                    field_id: 1,
                    kind: MatchKind::Exact {
                        value: vec![0, 0, 1, 0x42, 0, 0]
                    }
                },
                FieldMatch {
                    field_id: 2,
                    kind: MatchKind::Lpm {
                        value: vec![10, 0, 0, 1],
                        prefix_len: 32
                    }
                },
            ]
        );
        assert_eq!(
            entry.action,
            Some(TableAction::Action(entity::Action {
                action_id: 16777217,
                params: vec![entity::ActionParam {
                    param_id: 1,
                    value: vec![0, 3]
                }],
            }))
        );
    }

    #[test]
    fn table_entry_requires_exact_keys_and_params() {
        let schema = Schema::new(sample_p4info()).unwrap();
        let missing_key = schema.table_entry(
            "forward",
            "drop",
            &HashMap::new(),
            &values(&[("hdr.ipv4.dst", 1)]),
            0,
        );
        assert!(matches!(missing_key, Err(Error::InvalidArgument(_))));

        let missing_param = schema.table_entry(
            "forward",
            "set_port",
            &HashMap::new(),
            &values(&[("hdr.eth.dst", 1)]),
            0,
        );
        assert!(matches!(missing_param, Err(Error::InvalidArgument(_))));

        let unknown_field = schema.table_entry(
            "forward",
            "drop",
            &HashMap::new(),
            &values(&[("hdr.eth.dst", 1), ("hdr.eth.src", 2)]),
            0,
        );
        assert!(matches!(
            unknown_field,
            Err(Error::Lookup(LookupError::NoMember { what: "match field", .. }))
        ));
    }

    #[test]
    fn displays_table() {
        let schema = Schema::new(sample_p4info()).unwrap();
        let table = schema.table("forward").unwrap();
        assert_eq!(
            schema.display_table(table).to_string(),
            "table ingress.forward:\tfield hdr.eth.dst: bit<48> exact-match\
             \tfield hdr.ipv4.dst: bit<32> LPM-match\
             \taction ingress.set_port(port: bit<9>)\taction ingress.drop()\tsize: 1024"
        );
    }
}
