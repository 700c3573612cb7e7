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

mod common;

use anyhow::{anyhow, Result};

use common::{p4info, MockSwitch, PATIENCE};

use p4client::entity::{
    Atomicity, CloneSessionEntry, CounterData, CounterEntry, DigestConfig, DigestEntry, Entity,
    MulticastGroupEntry, PacketReplicationEngineEntry, Replica, TableAction, TableEntry, Update,
    UpdateType,
};
use p4client::error::{UpdateStatus, WriteFailure};
use p4client::{
    Client, ElectionId, Error, LookupError, ObjectKind, PipelineAction, PipelineScope,
    SchemaError, SessionConfig, StatusCode, TransportError,
};

use std::collections::HashMap;

use tracing_test::traced_test;

async fn primary_client(switch: &MockSwitch) -> Result<Client> {
    let client = Client::start(switch.transport(), SessionConfig::new(1, ElectionId::new(0, 1)));
    client.await_primary(PATIENCE).await?;
    Ok(client)
}

fn values(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[tokio::test]
#[traced_test]
async fn push_installs_schema() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    assert_eq!(client.symbols().snapshot().err(), Some(LookupError::NoSchema));

    let gateway = client.gateway();
    gateway
        .push_pipeline_config(vec![1, 2, 3], p4info(), Some(7), PipelineAction::VerifyAndCommit)
        .await?;
    assert_eq!(
        client.symbols().resolve(ObjectKind::Table, "mac_table"),
        Ok(33554433)
    );

    let requests = switch.set_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].election_id, ElectionId::new(0, 1));
    assert_eq!(requests[0].config.device_config, vec![1, 2, 3]);
    assert_eq!(requests[0].config.cookie, Some(7));

    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn verify_only_leaves_schema_alone() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    client
        .gateway()
        .push_pipeline_config(vec![], p4info(), None, PipelineAction::Verify)
        .await?;
    assert_eq!(client.symbols().snapshot().err(), Some(LookupError::NoSchema));
    assert!(switch.pipeline().is_none());
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn failed_push_keeps_active_schema() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();
    gateway
        .push_pipeline_config(vec![], p4info(), None, PipelineAction::VerifyAndCommit)
        .await?;
    let before = client.symbols().snapshot()?;

    // Malformed: an action with id 0.  Nothing reaches the device.
    let mut malformed = p4info();
    malformed.actions[1].preamble.id = 0;
    assert!(matches!(
        gateway
            .push_pipeline_config(vec![], malformed, None, PipelineAction::VerifyAndCommit)
            .await,
        Err(Error::Schema(SchemaError::Malformed(_)))
    ));
    assert_eq!(switch.set_requests().len(), 1);

    // Rejected by the device.
    let mut renamed = p4info();
    renamed.tables[0].preamble.name = "ingress.other_table".into();
    switch.fail_set_pipeline(Some(TransportError::new(
        StatusCode::InvalidArgument,
        "bad device config",
    )));
    match gateway
        .push_pipeline_config(vec![], renamed, None, PipelineAction::VerifyAndCommit)
        .await
    {
        Err(Error::Transport(e)) => assert_eq!(e.code, StatusCode::InvalidArgument),
        other => return Err(anyhow!("expected a transport error, got {:?}", other.err())),
    }

    let after = client.symbols().snapshot()?;
    assert!(std::sync::Arc::ptr_eq(&before, &after));
    assert!(after.resolve(ObjectKind::Table, "ingress.other_table").is_err());
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn pull_reports_missing_pipeline() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    assert_eq!(client.gateway().pull_pipeline_config(PipelineScope::All).await?, None);

    client
        .gateway()
        .push_pipeline_config(vec![9], p4info(), Some(42), PipelineAction::VerifyAndCommit)
        .await?;
    client.symbols().clear();
    let config = client
        .gateway()
        .pull_pipeline_config(PipelineScope::All)
        .await?
        .ok_or_else(|| anyhow!("pipeline missing"))?;
    assert_eq!(config.cookie, Some(42));
    assert_eq!(config.device_config, vec![9]);
    assert_eq!(client.symbols().resolve(ObjectKind::Action, "drop"), Ok(16777218));
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn multicast_groups() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();

    gateway.insert_multicast_group(1, &[1, 2, 3]).await?;
    let group = gateway.read_multicast_group(1).await?;
    assert_eq!(
        group.replicas,
        vec![
            Replica { egress_port: 1, instance: 1 },
            Replica { egress_port: 2, instance: 2 },
            Replica { egress_port: 3, instance: 3 },
        ]
    );

    // A repeated port gets a replica per occurrence.
    gateway.insert_multicast_group(2, &[5, 5]).await?;
    assert_eq!(gateway.read_multicast_group(2).await?.replicas.len(), 2);

    gateway.modify_multicast_group(1, &[4]).await?;
    assert_eq!(
        switch.multicast_group(1),
        Some(MulticastGroupEntry::new(1, &[4]))
    );

    gateway.delete_multicast_group(1).await?;
    assert!(matches!(gateway.read_multicast_group(1).await, Err(Error::NotFound)));

    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn read_single_needs_exactly_one_match() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();
    let template: Entity = MulticastGroupEntry::new(3, &[]).into();

    switch.set_read_result(vec![]);
    assert!(matches!(
        gateway.read_entity_single(template.clone()).await,
        Err(Error::NotFound)
    ));

    let group: Entity = MulticastGroupEntry::new(3, &[1]).into();
    switch.set_read_result(vec![group.clone(), group.clone()]);
    assert!(matches!(
        gateway.read_entity_single(template.clone()).await,
        Err(Error::Ambiguous(2))
    ));

    switch.set_read_result(vec![group.clone()]);
    assert_eq!(gateway.read_entity_single(template).await?, group);
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn write_failure_reports_each_update() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();
    gateway.insert_multicast_group(1, &[1]).await?;

    let result = gateway
        .write_batch(
            vec![
                Update::insert(MulticastGroupEntry::new(2, &[2])),
                Update::insert(MulticastGroupEntry::new(1, &[3])),
            ],
            Atomicity::ContinueOnError,
        )
        .await;
    let failure: WriteFailure = match result {
        Err(Error::Write(failure)) => failure,
        other => return Err(anyhow!("expected a write failure, got {:?}", other)),
    };
    assert_eq!(failure.updates.len(), 2);
    assert_eq!(failure.updates[0], UpdateStatus::ok());
    assert_eq!(failure.updates[1].code, StatusCode::AlreadyExists);
    assert_eq!(
        failure.failed().map(|(i, _)| i).collect::<Vec<_>>(),
        vec![1]
    );
    assert!(switch.multicast_group(2).is_some());

    let write = switch.writes().pop().ok_or_else(|| anyhow!("no write"))?;
    assert_eq!(write.device_id, 1);
    assert_eq!(write.election_id, ElectionId::new(0, 1));
    assert_eq!(write.atomicity, Atomicity::ContinueOnError);
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn write_error_without_details_is_a_transport_error() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    switch.on_write(|_| Some(TransportError::new(StatusCode::Unavailable, "busy")));
    assert!(matches!(
        client.gateway().insert_multicast_group(1, &[1]).await,
        Err(Error::Transport(TransportError {
            code: StatusCode::Unavailable,
            ..
        }))
    ));
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn backup_cannot_write() -> Result<()> {
    let switch = MockSwitch::new();
    switch.set_auto_arbitrate(false);
    let client = Client::start(switch.transport(), SessionConfig::new(1, ElectionId::new(0, 1)));
    let gateway = client.gateway();

    assert!(matches!(
        gateway.insert_multicast_group(1, &[1]).await,
        Err(Error::NotPrimary { .. })
    ));
    assert!(matches!(
        gateway
            .push_pipeline_config(vec![], p4info(), None, PipelineAction::VerifyAndCommit)
            .await,
        Err(Error::NotPrimary { .. })
    ));
    assert!(switch.writes().is_empty());
    assert!(switch.set_requests().is_empty());

    // Reads work without mastership.
    assert!(gateway.read_entities(vec![]).await?.is_empty());
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn empty_batch_sends_nothing() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    client.gateway().write_updates(vec![]).await?;
    assert!(switch.writes().is_empty());
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn table_entries_by_name() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();
    gateway
        .push_pipeline_config(vec![], p4info(), None, PipelineAction::VerifyAndCommit)
        .await?;

    gateway
        .table_entry_update(
            UpdateType::Insert,
            "mac_table",
            "forward",
            &values(&[("port", 3)]),
            &values(&[("hdr.eth.dst", 0x0000_5e00_5301)]),
            0,
        )
        .await?;
    let write = switch.writes().pop().ok_or_else(|| anyhow!("no write"))?;
    match &write.updates[0].entity {
        Entity::TableEntry(entry) => {
            assert_eq!(entry.table_id, 33554433);
            match &entry.action {
                Some(TableAction::Action(action)) => {
                    assert_eq!(action.action_id, 16777217);
                    assert_eq!(action.params[0].value, vec![0, 3]);
                }
                other => return Err(anyhow!("unexpected action {:?}", other)),
            }
        }
        other => return Err(anyhow!("unexpected entity {:?}", other)),
    }

    assert!(matches!(
        gateway
            .table_entry_update(
                UpdateType::Insert,
                "no_such_table",
                "forward",
                &HashMap::new(),
                &HashMap::new(),
                0,
            )
            .await,
        Err(Error::Lookup(LookupError::NotFound { .. }))
    ));
    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn digest_config_by_name() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();
    gateway
        .push_pipeline_config(vec![], p4info(), None, PipelineAction::VerifyAndCommit)
        .await?;

    let config = DigestConfig {
        max_timeout_ns: 1_000_000,
        max_list_size: 16,
        ack_timeout_ns: 5_000_000,
    };
    gateway.configure_digest("mac_learn", config).await?;
    let write = switch.writes().pop().ok_or_else(|| anyhow!("no write"))?;
    assert_eq!(write.updates.len(), 1);
    assert_eq!(write.updates[0].kind, UpdateType::Insert);
    assert_eq!(
        write.updates[0].entity,
        Entity::DigestEntry(DigestEntry {
            digest_id: 385000001,
            config: Some(config),
        })
    );

    let writes = switch.writes().len();
    match gateway.configure_digest("no_such_digest", config).await {
        Err(Error::Lookup(LookupError::NotFound { kind, name })) => {
            assert_eq!(kind, ObjectKind::Digest);
            assert_eq!(name, "no_such_digest");
        }
        other => return Err(anyhow!("expected a lookup failure, got {:?}", other)),
    }
    assert_eq!(switch.writes().len(), writes);

    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn clone_sessions() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();

    gateway.insert_clone_session(100, &[7, 8]).await?;
    gateway.delete_clone_session(100).await?;

    let writes = switch.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].updates[0].kind, UpdateType::Insert);
    match &writes[0].updates[0].entity {
        Entity::PacketReplication(PacketReplicationEngineEntry::CloneSession(entry)) => {
            assert_eq!(entry.session_id, 100);
            assert_eq!(
                entry.replicas,
                vec![
                    Replica { egress_port: 7, instance: 1 },
                    Replica { egress_port: 8, instance: 2 },
                ]
            );
        }
        other => return Err(anyhow!("unexpected entity {:?}", other)),
    }
    assert_eq!(writes[1].updates[0].kind, UpdateType::Delete);
    assert_eq!(
        writes[1].updates[0].entity,
        Entity::from(CloneSessionEntry::new(100, &[]))
    );

    client.close().await;
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn table_and_counter_reads_by_name() -> Result<()> {
    let switch = MockSwitch::new();
    let client = primary_client(&switch).await?;
    let gateway = client.gateway();
    gateway
        .push_pipeline_config(vec![], p4info(), None, PipelineAction::VerifyAndCommit)
        .await?;

    let entry = TableEntry {
        table_id: 33554433,
        ..Default::default()
    };
    switch.set_read_result(vec![entry.clone().into()]);
    assert_eq!(gateway.read_table("mac_table").await?, vec![entry.clone()]);

    let cell = CounterEntry {
        counter_id: 302000001,
        index: Some(3),
        data: Some(CounterData {
            byte_count: 1500,
            packet_count: 1,
        }),
    };
    switch.set_read_result(vec![cell.clone().into()]);
    assert_eq!(gateway.read_counter("port_hits", Some(3)).await?, vec![cell.clone()]);

    // The device answering with the wrong kind of entity is a protocol error.
    switch.set_read_result(vec![cell.into()]);
    assert!(matches!(gateway.read_table("mac_table").await, Err(Error::Protocol(_))));
    switch.set_read_result(vec![entry.into()]);
    assert!(matches!(
        gateway.read_counter("port_hits", None).await,
        Err(Error::Protocol(_))
    ));

    assert!(matches!(
        gateway.read_counter("mac_table", None).await,
        Err(Error::Lookup(LookupError::NotFound { kind: ObjectKind::Counter, .. }))
    ));

    client.close().await;
    Ok(())
}
