//! One scan worker: a single engine invocation over one port partition.

use std::sync::Arc;

use anyhow::anyhow;
use log::debug;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::engine::DiscoveryEngine;
use crate::finding::Finding;
use crate::partition::PortPartition;

use super::{PartitionFailure, ScanEvent};

/// The transport protocol in scope; everything else the engine reports
/// is discarded before normalization.
const TRANSPORT: &str = "tcp";

/// Probes one (target, partition) pair and writes findings into the sink.
///
/// The worker is the sole writer of its own findings and holds no other
/// shared state. Any failure of the probe, including an exceeded target
/// deadline, becomes a single `PartitionError` event; the worker never
/// propagates an error past the sink.
pub(super) async fn run<E: DiscoveryEngine>(
    engine: Arc<E>,
    target: String,
    partition: PortPartition,
    ports: Vec<u16>,
    deadline: Instant,
    cancel: CancellationToken,
    sink: mpsc::Sender<ScanEvent>,
) {
    debug!(
        "scanning {} port(s) (catalog slots {}..{}) on {target}",
        ports.len(),
        partition.start,
        partition.end
    );

    let result = tokio::select! {
        () = cancel.cancelled() => {
            debug!("scan of {target} cancelled");
            return;
        }
        probe = time::timeout_at(deadline, engine.probe(&target, &ports)) => match probe {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("target deadline exceeded")),
        },
    };

    match result {
        Ok(report) => {
            for record in report.records {
                if record.protocol != TRANSPORT {
                    continue;
                }
                if let Some(finding) = Finding::from_record(record) {
                    if sink.send(ScanEvent::Finding(finding)).await.is_err() {
                        // the orchestrator is gone, nothing left to deliver to
                        return;
                    }
                }
            }
        }
        Err(error) => {
            let failure = PartitionFailure {
                target,
                partition,
                error: format!("{error:#}"),
            };
            let _ = sink.send(ScanEvent::PartitionError(failure)).await;
        }
    }
}
