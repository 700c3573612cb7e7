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

//! A P4Runtime control-plane client.
//!
//! A [`Client`] owns one [`Session`] with one device.  The session keeps a
//! StreamChannel open in the background, performs mastership arbitration
//! with a fixed [`ElectionId`], reconnects when the stream fails, and fans
//! stream events (packet-ins, digests, idle timeouts, stream errors) out to
//! subscribers.  The [`Gateway`] pushes and pulls forwarding pipelines and
//! reads and writes entities, resolving names through the [`SymbolTable`]
//! that holds the active [`Schema`].
//!
//! The client drives the device through the [`Transport`] trait.  With the
//! `grpc` feature, [`grpc::GrpcTransport`] implements it over gRPC.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod election;
pub mod entity;
pub mod error;
pub mod gateway;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod message;
pub mod schema;
pub mod session;
pub mod symbols;
pub mod transport;

pub use client::Client;
pub use config::SessionConfig;
pub use dispatch::{Dispatcher, EventCategory, EventReceiver};
pub use election::ElectionId;
pub use error::{Error, LookupError, Result, SchemaError, StatusCode, TransportError};
pub use gateway::Gateway;
pub use schema::{ObjectKind, P4Info, Schema};
pub use session::{Health, Session, SessionState};
pub use symbols::SymbolTable;
pub use transport::{PipelineAction, PipelineScope, Transport};
