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

//! The RPC surface the client drives.
//!
//! [`Transport`] mirrors the six P4Runtime RPCs in terms of this crate's
//! types.  The gRPC implementation lives in [`crate::grpc`]; tests drive the
//! client through an in-process implementation.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::Sink;

use std::pin::Pin;

use crate::election::ElectionId;
use crate::entity::{Atomicity, Entity, Update};
use crate::error::TransportError;
use crate::message::{StreamMessage, StreamRequest};
use crate::schema::P4Info;

pub type RpcResult<T> = Result<T, TransportError>;

/// What a device does with a pushed pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineAction {
    Verify,
    VerifyAndSave,
    VerifyAndCommit,
    Commit,
    ReconcileAndCommit,
}

impl PipelineAction {
    /// Whether the device starts running the pushed pipeline.
    pub fn commits(&self) -> bool {
        matches!(
            self,
            PipelineAction::VerifyAndCommit
                | PipelineAction::Commit
                | PipelineAction::ReconcileAndCommit
        )
    }
}

impl Default for PipelineAction {
    fn default() -> Self {
        PipelineAction::VerifyAndCommit
    }
}

/// How much of its pipeline a device returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineScope {
    All,
    CookieOnly,
    P4InfoAndCookie,
    DeviceConfigAndCookie,
}

impl Default for PipelineScope {
    fn default() -> Self {
        PipelineScope::All
    }
}

/// A forwarding pipeline.  Parts outside the requested scope are absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForwardingPipelineConfig {
    pub p4info: Option<P4Info>,
    pub device_config: Vec<u8>,
    pub cookie: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetPipelineRequest {
    pub device_id: u64,
    pub election_id: ElectionId,
    pub role: Option<String>,
    pub action: PipelineAction,
    pub config: ForwardingPipelineConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetPipelineRequest {
    pub device_id: u64,
    pub scope: PipelineScope,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRequest {
    pub device_id: u64,
    pub election_id: ElectionId,
    pub role: Option<String>,
    pub updates: Vec<Update>,
    pub atomicity: Atomicity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub device_id: u64,
    pub role: Option<String>,
    pub entities: Vec<Entity>,
}

pub type RequestSink = Pin<Box<dyn Sink<StreamRequest, Error = TransportError> + Send>>;

/// Both halves of an open StreamChannel.  The stream ends, with or without
/// an error, when the device or the transport closes it.
pub struct StreamChannel {
    pub sender: RequestSink,
    pub receiver: BoxStream<'static, RpcResult<StreamMessage>>,
}

pub trait Transport: Send + Sync {
    /// Returns the device's P4Runtime API version.
    fn capabilities(&self) -> BoxFuture<'_, RpcResult<String>>;

    fn set_forwarding_pipeline_config(
        &self,
        request: SetPipelineRequest,
    ) -> BoxFuture<'_, RpcResult<()>>;

    /// Returns `None` if the device has no pipeline yet.
    fn get_forwarding_pipeline_config(
        &self,
        request: GetPipelineRequest,
    ) -> BoxFuture<'_, RpcResult<Option<ForwardingPipelineConfig>>>;

    /// On failure, the error's `details` hold one status per update, in
    /// request order, if the device reported them.
    fn write(&self, request: WriteRequest) -> BoxFuture<'_, RpcResult<()>>;

    /// Yields the entities matching the request's templates, one response
    /// at a time.
    fn read(&self, request: ReadRequest) -> BoxStream<'static, RpcResult<Vec<Entity>>>;

    fn stream_channel(&self) -> BoxFuture<'_, RpcResult<StreamChannel>>;
}
