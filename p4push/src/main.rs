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

use anyhow::{Context, Result};

use clap::Parser;

use p4client::grpc::{load_p4info, GrpcTransport};
use p4client::message::StreamEvent;
use p4client::{Client, ElectionId, PipelineAction, SessionConfig};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn, Level};

/// Pushes a forwarding pipeline to a P4Runtime device.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// P4Runtime server address.
    #[clap(long, default_value = "localhost:50051")]
    addr: String,

    #[clap(long, default_value_t = 0)]
    device_id: u64,

    /// Election id, as a decimal 128-bit number.
    #[clap(long, default_value = "1")]
    election_id: ElectionId,

    /// Target-specific device configuration, e.g. BMv2 JSON.
    #[clap(long)]
    bin: PathBuf,

    /// P4Info, in binary or text protobuf format.
    #[clap(long)]
    p4info: PathBuf,

    #[clap(long)]
    cookie: Option<u64>,

    /// Seconds to wait to become primary.
    #[clap(long, default_value_t = 10)]
    timeout: u64,

    #[clap(short, long)]
    verbose: bool,

    /// After pushing, keep running and log stream notifications until
    /// interrupted.
    #[clap(long)]
    listen: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let device_config = std::fs::read(&args.bin)
        .with_context(|| format!("could not read {}", args.bin.display()))?;
    let p4info = load_p4info(&args.p4info)?;

    let transport = Arc::new(GrpcTransport::connect(&args.addr));
    let config = SessionConfig::new(args.device_id, args.election_id);
    let client = Client::connect(transport, config)
        .await
        .with_context(|| format!("could not connect to {}", args.addr))?;

    let timeout = Duration::from_secs(args.timeout);
    client
        .await_primary(timeout)
        .await
        .with_context(|| format!("did not become primary for device {}", args.device_id))?;

    let schema = client
        .gateway()
        .push_pipeline_config(device_config, p4info, args.cookie, PipelineAction::VerifyAndCommit)
        .await
        .context("device rejected the pipeline")?;
    info!(
        "pushed {} to device {}: {} tables, {} actions",
        args.p4info.display(),
        args.device_id,
        schema.p4info().tables.len(),
        schema.p4info().actions.len()
    );
    for table in &schema.p4info().tables {
        debug!("{}", schema.display_table(table));
    }

    if args.listen {
        listen(&client).await;
    }
    client.close().await;
    Ok(())
}

/// Logs stream notifications until the session ends or the user interrupts.
async fn listen(client: &Client) {
    let mut events = client.subscribe_all();
    info!("listening for notifications; press Ctrl-C to exit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(StreamEvent::Packet(p)) => {
                    info!("packet-in: {} bytes, metadata {:?}", p.payload.len(), p.metadata)
                }
                Some(StreamEvent::Digest(d)) => {
                    info!("digest {} list {}: {} entries", d.digest_id, d.list_id, d.data.len());
                    if let Err(e) = client.session().ack_digest(d.digest_id, d.list_id).await {
                        warn!("could not acknowledge digest list {}: {}", d.list_id, e);
                    }
                }
                Some(StreamEvent::IdleTimeout(n)) => {
                    info!("idle timeout: {} entries", n.table_entries.len())
                }
                Some(StreamEvent::Error(e)) => error!("stream error: {}", e),
                Some(StreamEvent::Unknown { type_url, .. }) => {
                    info!("unknown stream message {}", type_url)
                }
                None => {
                    if let Some(reason) = client.session().close_reason() {
                        warn!("session ended: {}", reason);
                    }
                    break;
                }
            }
        }
    }
    if events.dropped() > 0 {
        warn!("{} notifications were dropped", events.dropped());
    }
}
