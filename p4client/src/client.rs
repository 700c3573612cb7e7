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

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use tracing::info;

use crate::config::SessionConfig;
use crate::dispatch::{EventCategory, EventReceiver};
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::session::{Session, SessionState};
use crate::symbols::SymbolTable;
use crate::transport::Transport;

/// Major P4Runtime API version this client speaks.
pub const API_MAJOR_VERSION: &str = "1";

/// A session with one device plus the gateway that operates on it.
pub struct Client {
    session: Session,
    gateway: Gateway,
}

impl Client {
    /// Checks that the device speaks a compatible P4Runtime version, then
    /// starts the session.
    pub async fn connect(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Self> {
        let version = check_compatible(transport.as_ref()).await?;
        info!(device_id = config.device_id, "device implements P4Runtime {}", version);
        Ok(Self::start(transport, config))
    }

    /// Starts the session without a compatibility check.
    pub fn start(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let session = Session::start(transport.clone(), config);
        let gateway = Gateway::new(transport, session.clone(), Arc::new(SymbolTable::new()));
        Client { session, gateway }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn symbols(&self) -> &SymbolTable {
        self.gateway.symbols()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn state_changes(&self) -> broadcast::Receiver<SessionState> {
        self.session.state_changes()
    }

    pub fn subscribe(&self, category: EventCategory) -> EventReceiver {
        self.session.subscribe(category)
    }

    pub fn subscribe_all(&self) -> EventReceiver {
        self.session.subscribe_all()
    }

    pub async fn await_primary(&self, timeout: Duration) -> Result<()> {
        self.session.await_primary(timeout).await
    }

    pub async fn close(&self) {
        self.session.close().await
    }
}

/// Returns the device's P4Runtime version if its major version matches
/// this client's.
pub async fn check_compatible(transport: &dyn Transport) -> Result<String> {
    let version = transport.capabilities().await?;
    let major = version.trim_start_matches('v').split('.').next().unwrap_or("");
    if major != API_MAJOR_VERSION {
        return Err(Error::Incompatible(version));
    }
    Ok(version)
}
