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

//! Messages carried by the StreamChannel.

use std::fmt::{self, Display};

use itertools::Itertools;

use crate::election::ElectionId;
use crate::entity::TableEntry;
use crate::error::StatusCode;

/// Structured data values, as carried in digest lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum P4Data {
    Bitstring(Vec<u8>),
    Varbit { bitstring: Vec<u8>, bit_width: i32 },
    Bool(bool),
    Tuple(Vec<P4Data>),
    Struct(Vec<P4Data>),
    Header { is_valid: bool, bitstrings: Vec<Vec<u8>> },
    Enum(String),
    Error(String),
    EnumValue(Vec<u8>),
    Unset,
}

fn hex(bytes: &[u8]) -> String {
    format!("0x{}", bytes.iter().map(|b| format!("{:02x}", b)).join(""))
}

impl Display for P4Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use P4Data::*;
        match self {
            Bitstring(b) | EnumValue(b) => write!(f, "{}", hex(b)),
            Varbit { bitstring, bit_width } => write!(f, "{}/{}", hex(bitstring), bit_width),
            Bool(b) => write!(f, "{}", b),
            Tuple(members) | Struct(members) => write!(f, "{{{}}}", members.iter().join(", ")),
            Header { is_valid: false, .. } => write!(f, "invalid"),
            Header { bitstrings, .. } => {
                write!(f, "[{}]", bitstrings.iter().map(|b| hex(b)).join(", "))
            }
            Enum(s) | Error(s) => write!(f, "{}", s),
            Unset => write!(f, "unset"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketMetadata {
    pub metadata_id: u32,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketIn {
    pub payload: Vec<u8>,
    pub metadata: Vec<PacketMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketOut {
    pub payload: Vec<u8>,
    pub metadata: Vec<PacketMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DigestList {
    pub digest_id: u32,
    pub list_id: u64,
    pub data: Vec<P4Data>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdleTimeoutNotification {
    pub table_entries: Vec<TableEntry>,
    pub timestamp: i64,
}

/// An error the device reports asynchronously on the stream, e.g. for a
/// packet-out it could not send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamError {
    pub code: StatusCode,
    pub message: String,
    pub space: String,
    pub space_code: i32,
}

impl Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if !self.space.is_empty() {
            write!(f, " ({} error {})", self.space, self.space_code)?;
        }
        Ok(())
    }
}

/// The mastership state a device announces.  `election_id` is the id of
/// the current primary, or `None` if no client is primary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArbitrationUpdate {
    pub device_id: u64,
    pub role: Option<String>,
    pub election_id: Option<ElectionId>,
    pub status: StatusCode,
    pub message: String,
}

/// Messages a device sends on the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Arbitration(ArbitrationUpdate),
    Event(StreamEvent),
}

/// Stream messages other than arbitration, as handed to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Packet(PacketIn),
    Digest(DigestList),
    IdleTimeout(IdleTimeoutNotification),
    Error(StreamError),
    /// A message this client does not understand, identified by its type
    /// URL when the device sent one.
    Unknown { type_url: String, value: Vec<u8> },
}

/// The arbitration request that opens every stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArbitrationRequest {
    pub device_id: u64,
    pub election_id: ElectionId,
    pub role: Option<String>,
}

/// Messages a client sends on the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamRequest {
    Arbitration(ArbitrationRequest),
    Packet(PacketOut),
    DigestAck { digest_id: u32, list_id: u64 },
}
