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

//! Error types.
//!
//! Errors fall into four groups.  [`TransportError`] covers anything the RPC
//! layer reports; the stream session recovers from these by reconnecting.
//! [`SchemaError`] and [`LookupError`] are semantic problems with the P4Info
//! or with a name, never retried.  [`Error::NotPrimary`] is a local
//! mastership rejection raised before anything is sent.  [`WriteFailure`]
//! carries the per-update statuses a device returns for a rejected batch.

use std::fmt::{self, Display};
use std::time::Duration;

use thiserror::Error;

use crate::election::ElectionId;
use crate::schema::ObjectKind;

/// gRPC canonical status codes, as used by P4Runtime for RPC and per-update
/// errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        use StatusCode::*;
        match code {
            0 => Ok,
            1 => Cancelled,
            3 => InvalidArgument,
            4 => DeadlineExceeded,
            5 => NotFound,
            6 => AlreadyExists,
            7 => PermissionDenied,
            8 => ResourceExhausted,
            9 => FailedPrecondition,
            10 => Aborted,
            11 => OutOfRange,
            12 => Unimplemented,
            13 => Internal,
            14 => Unavailable,
            15 => DataLoss,
            16 => Unauthenticated,
            _ => Unknown,
        }
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        use StatusCode::*;
        match code {
            Ok => 0,
            Cancelled => 1,
            Unknown => 2,
            InvalidArgument => 3,
            DeadlineExceeded => 4,
            NotFound => 5,
            AlreadyExists => 6,
            PermissionDenied => 7,
            ResourceExhausted => 8,
            FailedPrecondition => 9,
            Aborted => 10,
            OutOfRange => 11,
            Unimplemented => 12,
            Internal => 13,
            Unavailable => 14,
            DataLoss => 15,
            Unauthenticated => 16,
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use StatusCode::*;
        let s = match self {
            Ok => "OK",
            Cancelled => "CANCELLED",
            Unknown => "UNKNOWN",
            InvalidArgument => "INVALID_ARGUMENT",
            DeadlineExceeded => "DEADLINE_EXCEEDED",
            NotFound => "NOT_FOUND",
            AlreadyExists => "ALREADY_EXISTS",
            PermissionDenied => "PERMISSION_DENIED",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            FailedPrecondition => "FAILED_PRECONDITION",
            Aborted => "ABORTED",
            OutOfRange => "OUT_OF_RANGE",
            Unimplemented => "UNIMPLEMENTED",
            Internal => "INTERNAL",
            Unavailable => "UNAVAILABLE",
            DataLoss => "DATA_LOSS",
            Unauthenticated => "UNAUTHENTICATED",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one update within a Write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateStatus {
    pub code: StatusCode,
    pub message: String,
}

impl UpdateStatus {
    pub fn ok() -> Self {
        UpdateStatus {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        UpdateStatus {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.message)
        }
    }
}

/// An error reported by the RPC layer.  `details` holds per-update statuses
/// when the device attached them to a failed Write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: StatusCode,
    pub message: String,
    pub details: Vec<UpdateStatus>,
}

impl TransportError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        TransportError {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: Vec<UpdateStatus>) -> Self {
        self.details = details;
        self
    }

    pub fn stream_closed() -> Self {
        TransportError::new(StatusCode::Unavailable, "stream closed by device")
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            StatusCode::Unavailable
                | StatusCode::DeadlineExceeded
                | StatusCode::Aborted
                | StatusCode::ResourceExhausted
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("could not decode P4Info: {0}")]
    Decode(String),

    #[error("malformed P4Info: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no P4Info has been loaded")]
    NoSchema,

    #[error("no {kind} named \"{name}\"")]
    NotFound { kind: ObjectKind, name: String },

    #[error("{owner} has no {what} named \"{name}\"")]
    NoMember {
        owner: String,
        what: &'static str,
        name: String,
    },
}

/// A Write the device rejected, with one status per submitted update in
/// submission order (empty if the device sent no per-update details).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteFailure {
    pub code: StatusCode,
    pub message: String,
    pub updates: Vec<UpdateStatus>,
}

impl WriteFailure {
    /// The failed updates, with their positions in the batch.
    pub fn failed(&self) -> impl Iterator<Item = (usize, &UpdateStatus)> {
        self.updates.iter().enumerate().filter(|(_, s)| !s.is_ok())
    }
}

impl Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.message.is_empty() {
            write!(f, " ({})", self.message)?;
        }
        if !self.updates.is_empty() {
            write!(
                f,
                ", {} of {} updates failed",
                self.failed().count(),
                self.updates.len()
            )?;
            for (index, status) in self.failed() {
                write!(f, "; update {}: {}", index, status)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("not primary for device {device_id} (election id {election_id})")]
    NotPrimary { device_id: u64, election_id: ElectionId },

    #[error("could not become primary within {0:?}")]
    PrimaryTimeout(Duration),

    #[error("write rejected by device: {0}")]
    Write(WriteFailure),

    #[error("read matched no entity")]
    NotFound,

    #[error("read matched {0} entities, expected exactly one")]
    Ambiguous(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unexpected response from device: {0}")]
    Protocol(String),

    #[error("device implements P4Runtime {0}, which this client does not support")]
    Incompatible(String),

    #[error("gave up after {attempts} consecutive stream failures, last error: {last}")]
    ReconnectExhausted { attempts: u32, last: TransportError },

    #[error("session closed")]
    Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
