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

//! Pipeline and entity operations.
//!
//! Every request is stamped with the session's device id, and writes with
//! its election id and role as well.  Operations that change device state
//! fail with [`Error::NotPrimary`] before anything is sent unless the
//! session is currently primary.  Reads work in any state.

use futures::TryStreamExt;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::entity::{
    Atomicity, CloneSessionEntry, CounterEntry, DigestConfig, DigestEntry, Entity,
    MulticastGroupEntry, PacketReplicationEngineEntry, TableEntry, Update, UpdateType,
};
use crate::error::{Error, Result, WriteFailure};
use crate::schema::{ObjectKind, P4Info, Schema};
use crate::session::Session;
use crate::symbols::SymbolTable;
use crate::transport::{
    ForwardingPipelineConfig, GetPipelineRequest, PipelineAction, PipelineScope, ReadRequest,
    SetPipelineRequest, Transport, WriteRequest,
};

#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn Transport>,
    session: Session,
    symbols: Arc<SymbolTable>,
}

impl Gateway {
    pub fn new(transport: Arc<dyn Transport>, session: Session, symbols: Arc<SymbolTable>) -> Self {
        Gateway {
            transport,
            session,
            symbols,
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn capabilities(&self) -> Result<String> {
        Ok(self.transport.capabilities().await?)
    }

    /// Pushes a pipeline to the device.
    ///
    /// `p4info` is validated first; nothing is sent if it is malformed.  If
    /// the device accepts a committing action, `p4info` becomes the active
    /// schema.  On any failure the active schema is unchanged.
    pub async fn push_pipeline_config(
        &self,
        device_config: Vec<u8>,
        p4info: P4Info,
        cookie: Option<u64>,
        action: PipelineAction,
    ) -> Result<Arc<Schema>> {
        let schema = Arc::new(Schema::new(p4info)?);
        self.session.ensure_primary()?;

        let request = SetPipelineRequest {
            device_id: self.session.device_id(),
            election_id: self.session.election_id(),
            role: self.session.config().role.clone(),
            action,
            config: ForwardingPipelineConfig {
                p4info: Some(schema.p4info().clone()),
                device_config,
                cookie,
            },
        };
        self.transport.set_forwarding_pipeline_config(request).await?;

        if action.commits() {
            self.symbols.replace(schema.clone());
        }
        info!(
            device_id = self.session.device_id(),
            ?action,
            ?cookie,
            tables = schema.p4info().tables.len(),
            "pushed forwarding pipeline"
        );
        Ok(schema)
    }

    /// Fetches the device's pipeline, or `None` if it has none.  A P4Info
    /// in the response becomes the active schema.
    pub async fn pull_pipeline_config(
        &self,
        scope: PipelineScope,
    ) -> Result<Option<ForwardingPipelineConfig>> {
        let request = GetPipelineRequest {
            device_id: self.session.device_id(),
            scope,
        };
        let config = match self.transport.get_forwarding_pipeline_config(request).await? {
            Some(config) => config,
            None => {
                debug!(device_id = self.session.device_id(), "device has no pipeline");
                return Ok(None);
            }
        };
        if let Some(p4info) = &config.p4info {
            self.symbols.replace(Arc::new(Schema::new(p4info.clone())?));
        }
        Ok(Some(config))
    }

    pub async fn write_update(&self, update: Update) -> Result<()> {
        self.write_batch(vec![update], Atomicity::default()).await
    }

    pub async fn write_updates(&self, updates: Vec<Update>) -> Result<()> {
        self.write_batch(updates, Atomicity::default()).await
    }

    /// Sends `updates` as one Write.  If the device rejects any of them the
    /// error is [`Error::Write`], with one status per update in order.
    pub async fn write_batch(&self, updates: Vec<Update>, atomicity: Atomicity) -> Result<()> {
        self.session.ensure_primary()?;
        if updates.is_empty() {
            return Ok(());
        }
        let count = updates.len();
        let request = WriteRequest {
            device_id: self.session.device_id(),
            election_id: self.session.election_id(),
            role: self.session.config().role.clone(),
            updates,
            atomicity,
        };
        match self.transport.write(request).await {
            Ok(()) => Ok(()),
            Err(e) if !e.details.is_empty() => {
                if e.details.len() != count {
                    warn!(
                        "device returned {} statuses for {} updates",
                        e.details.len(),
                        count
                    );
                }
                Err(Error::Write(WriteFailure {
                    code: e.code,
                    message: e.message,
                    updates: e.details,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns every entity matching any of `templates`.
    pub async fn read_entities(&self, templates: Vec<Entity>) -> Result<Vec<Entity>> {
        let request = ReadRequest {
            device_id: self.session.device_id(),
            role: self.session.config().role.clone(),
            entities: templates,
        };
        Ok(self.transport.read(request).try_concat().await?)
    }

    /// Returns the one entity matching `template`.
    pub async fn read_entity_single(&self, template: Entity) -> Result<Entity> {
        let mut entities = self.read_entities(vec![template]).await?;
        match entities.len() {
            0 => Err(Error::NotFound),
            1 => Ok(entities.remove(0)),
            n => Err(Error::Ambiguous(n)),
        }
    }

    /// Creates multicast group `group_id` with one replica per port.
    pub async fn insert_multicast_group(&self, group_id: u32, ports: &[u32]) -> Result<()> {
        self.insert_multicast_group_entry(MulticastGroupEntry::new(group_id, ports))
            .await
    }

    pub async fn insert_multicast_group_entry(&self, entry: MulticastGroupEntry) -> Result<()> {
        self.write_update(Update::insert(entry)).await
    }

    pub async fn modify_multicast_group(&self, group_id: u32, ports: &[u32]) -> Result<()> {
        self.write_update(Update::modify(MulticastGroupEntry::new(group_id, ports)))
            .await
    }

    pub async fn delete_multicast_group(&self, group_id: u32) -> Result<()> {
        self.write_update(Update::delete(MulticastGroupEntry::new(group_id, &[])))
            .await
    }

    pub async fn read_multicast_group(&self, group_id: u32) -> Result<MulticastGroupEntry> {
        let template = MulticastGroupEntry::new(group_id, &[]);
        match self.read_entity_single(template.into()).await? {
            Entity::PacketReplication(PacketReplicationEngineEntry::MulticastGroup(group)) => {
                Ok(group)
            }
            other => Err(Error::Protocol(format!(
                "read of multicast group {} returned {}",
                group_id,
                other.describe()
            ))),
        }
    }

    pub async fn insert_clone_session(&self, session_id: u32, ports: &[u32]) -> Result<()> {
        self.write_update(Update::insert(CloneSessionEntry::new(session_id, ports)))
            .await
    }

    pub async fn delete_clone_session(&self, session_id: u32) -> Result<()> {
        self.write_update(Update::delete(CloneSessionEntry::new(session_id, &[])))
            .await
    }

    /// Enables digest lists for the digest named `name`.
    pub async fn configure_digest(&self, name: &str, config: DigestConfig) -> Result<()> {
        let digest_id = self.symbols.resolve(ObjectKind::Digest, name)?;
        self.write_update(Update::insert(DigestEntry {
            digest_id,
            config: Some(config),
        }))
        .await
    }

    /// Builds a table entry by name, as [`Schema::table_entry`], and writes
    /// it with `kind`.
    pub async fn table_entry_update(
        &self,
        kind: UpdateType,
        table_name: &str,
        action_name: &str,
        params: &HashMap<String, u64>,
        matches: &HashMap<String, u64>,
        priority: i32,
    ) -> Result<()> {
        let schema = self.symbols.snapshot()?;
        let entry = schema.table_entry(table_name, action_name, params, matches, priority)?;
        self.write_update(Update {
            kind,
            entity: entry.into(),
        })
        .await
    }

    /// Reads every entry of the table named `name`.
    pub async fn read_table(&self, name: &str) -> Result<Vec<TableEntry>> {
        let table_id = self.symbols.resolve(ObjectKind::Table, name)?;
        let template = TableEntry {
            table_id,
            ..Default::default()
        };
        self.read_entities(vec![template.into()])
            .await?
            .into_iter()
            .map(|entity| match entity {
                Entity::TableEntry(entry) => Ok(entry),
                other => Err(Error::Protocol(format!(
                    "read of table {} returned {}",
                    name,
                    other.describe()
                ))),
            })
            .collect()
    }

    /// Reads cell `index` of the indirect counter named `name`, or every
    /// cell if `index` is `None`.
    pub async fn read_counter(&self, name: &str, index: Option<i64>) -> Result<Vec<CounterEntry>> {
        let counter_id = self.symbols.resolve(ObjectKind::Counter, name)?;
        let template = CounterEntry {
            counter_id,
            index,
            data: None,
        };
        self.read_entities(vec![template.into()])
            .await?
            .into_iter()
            .map(|entity| match entity {
                Entity::CounterEntry(entry) => Ok(entry),
                other => Err(Error::Protocol(format!(
                    "read of counter {} returned {}",
                    name,
                    other.describe()
                ))),
            })
            .collect()
    }
}
