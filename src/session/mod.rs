//! Core functionality for orchestrating a reconnaissance run.
//!
//! A [`ScanSession`] walks its targets in order. For each target it splits
//! the top-N port space into per-worker partitions, spawns one worker per
//! non-empty partition, and drains a shared bounded channel until every
//! worker has dropped its sender. Events reach the caller through a lazy
//! [`ScanStream`] in discovery order; no event for target `k+1` is yielded
//! before target `k` has fully completed.

mod worker;

use std::fmt;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use anyhow::{ensure, Result};
use futures::Stream;
use log::{debug, info, warn};
use serde_derive::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::catalog::PortCatalog;
use crate::engine::DiscoveryEngine;
use crate::finding::Finding;
use crate::partition::{partition, PortPartition};

/// Bound on the shared finding channels. Workers block on a full sink, so
/// a target with heavy script output cannot grow memory without limit.
const SINK_CAPACITY: usize = 128;

/// Default per-target deadline; the slowest worker is cut off here.
pub const DEFAULT_TARGET_DEADLINE: Duration = Duration::from_secs(900);

/// One event delivered from the scan to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// An open service was discovered.
    Finding(Finding),
    /// One worker's partition could not be scanned.
    PartitionError(PartitionFailure),
}

/// A failed engine invocation for one (target, partition) pair.
///
/// Surfaced on the same channel as findings so the caller can decide
/// whether a partial scan is acceptable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionFailure {
    /// The target whose partition failed.
    pub target: String,
    /// The catalog index range that went unscanned.
    pub partition: PortPartition,
    /// Human-readable cause.
    pub error: String,
}

impl fmt::Display for PartitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "catalog slots {}..{} on {} went unscanned: {}",
            self.partition.start, self.partition.end, self.target, self.error
        )
    }
}

/// A reconnaissance run over an ordered list of targets.
///
/// The session owns the target list, the port catalog, the engine handle
/// and the cancellation token. Constructed once per run; `execute` may be
/// called again for a fresh scan with the same configuration.
#[derive(Debug)]
pub struct ScanSession<E> {
    targets: Vec<String>,
    top_ports: usize,
    catalog: PortCatalog,
    engine: Arc<E>,
    worker_count: Option<NonZeroUsize>,
    target_deadline: Duration,
    cancel: CancellationToken,
}

impl<E: DiscoveryEngine> ScanSession<E> {
    /// Creates a session.
    ///
    /// `worker_count` of `None` uses the host's available parallelism,
    /// queried at execute time. Invalid `top_ports` values fail here,
    /// before any worker is spawned.
    pub fn new(
        targets: Vec<String>,
        top_ports: usize,
        catalog: PortCatalog,
        engine: E,
        worker_count: Option<NonZeroUsize>,
        target_deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        ensure!(top_ports >= 1, "top_ports must be at least 1");
        ensure!(!catalog.is_empty(), "the port catalog is empty");
        ensure!(
            top_ports <= catalog.len(),
            "top_ports {top_ports} exceeds the catalog's {} ports",
            catalog.len()
        );

        Ok(Self {
            targets,
            top_ports,
            catalog,
            engine: Arc::new(engine),
            worker_count,
            target_deadline,
            cancel,
        })
    }

    /// Starts the scan and returns the event stream.
    ///
    /// The stream is finite and yields each event exactly once. Dropping
    /// it cancels the run: in-flight workers are told to stop and their
    /// engine invocations are aborted, so an abandoned scan leaves no
    /// live probes behind.
    #[must_use]
    pub fn execute(&self) -> ScanStream {
        let token = self.cancel.child_token();
        let (events_tx, events_rx) = mpsc::channel(SINK_CAPACITY);

        let worker_count = self
            .worker_count
            .or_else(|| thread::available_parallelism().ok())
            .map_or(1, NonZeroUsize::get);

        tokio::spawn(run_targets(
            self.targets.clone(),
            self.top_ports,
            self.catalog.clone(),
            Arc::clone(&self.engine),
            worker_count,
            self.target_deadline,
            token.clone(),
            events_tx,
        ));

        ScanStream {
            events: events_rx,
            _cancel_on_drop: token.drop_guard(),
        }
    }
}

/// The lazy, single-pass sequence of [`ScanEvent`]s for one execute call.
pub struct ScanStream {
    events: mpsc::Receiver<ScanEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ScanStream {
    type Item = ScanEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ScanEvent>> {
        self.events.poll_recv(cx)
    }
}

/// The orchestration loop: one target at a time, all workers per target.
#[allow(clippy::too_many_arguments)]
async fn run_targets<E: DiscoveryEngine>(
    targets: Vec<String>,
    top_ports: usize,
    catalog: PortCatalog,
    engine: Arc<E>,
    worker_count: usize,
    target_deadline: Duration,
    cancel: CancellationToken,
    events: mpsc::Sender<ScanEvent>,
) {
    let partitions = partition(top_ports, worker_count);
    info!(
        "scanning {} target(s) with {} worker(s) over the top {top_ports} ports",
        targets.len(),
        partitions.len()
    );

    for target in targets {
        if cancel.is_cancelled() {
            break;
        }

        let (sink, mut drain) = mpsc::channel(SINK_CAPACITY);
        let deadline = Instant::now() + target_deadline;
        let mut workers = JoinSet::new();

        for part in &partitions {
            workers.spawn(worker::run(
                Arc::clone(&engine),
                target.clone(),
                *part,
                catalog.slice(part).to_vec(),
                deadline,
                cancel.clone(),
                sink.clone(),
            ));
        }
        drop(sink);

        // The channel closes once every worker has dropped its sender;
        // that close is the completion signal for this target.
        let mut consumer_gone = false;
        while let Some(event) = drain.recv().await {
            if events.send(event).await.is_err() {
                consumer_gone = true;
                break;
            }
        }

        // Closing the drain first unblocks any worker still sending, so
        // the join below cannot stall on a full sink.
        drop(drain);
        if consumer_gone {
            cancel.cancel();
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                warn!("a scan worker for {target} terminated abnormally: {error}");
            }
        }

        if consumer_gone {
            break;
        }
        debug!("finished scanning {target}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineReport, PortRecord};
    use anyhow::bail;
    use futures::StreamExt;
    use std::collections::{BTreeMap, HashMap, HashSet};

    /// Scripted engine: per-target open ports, optional per-target faults.
    /// Honors the requested port list the way the real engine does.
    #[derive(Default, Clone)]
    struct ScriptedEngine {
        open: HashMap<String, Vec<u16>>,
        failing: HashSet<String>,
    }

    impl DiscoveryEngine for ScriptedEngine {
        async fn probe(&self, target: &str, ports: &[u16]) -> Result<EngineReport> {
            if self.failing.contains(target) {
                bail!("host unreachable");
            }

            let open = self.open.get(target).cloned().unwrap_or_default();
            let records = ports
                .iter()
                .filter(|port| open.contains(*port))
                .map(|&port| PortRecord {
                    host: target.to_owned(),
                    protocol: "tcp".to_owned(),
                    port,
                    state: "open".to_owned(),
                    service_name: Some("ssh".to_owned()),
                    product: None,
                    version: None,
                    scripts: BTreeMap::new(),
                })
                .collect();
            Ok(EngineReport { records })
        }
    }

    fn session(
        targets: &[&str],
        top_ports: usize,
        catalog: PortCatalog,
        engine: ScriptedEngine,
        workers: usize,
    ) -> ScanSession<ScriptedEngine> {
        ScanSession::new(
            targets.iter().map(ToString::to_string).collect(),
            top_ports,
            catalog,
            engine,
            NonZeroUsize::new(workers),
            Duration::from_secs(30),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn all_of_one_target_before_any_of_the_next() {
        let catalog = PortCatalog::from_ports(vec![80, 23, 443, 21, 22, 25]);
        let engine = ScriptedEngine {
            open: HashMap::from([
                ("10.0.0.1".to_owned(), vec![80, 21, 25]),
                ("10.0.0.2".to_owned(), vec![23, 443, 22]),
            ]),
            ..ScriptedEngine::default()
        };
        let session = session(&["10.0.0.1", "10.0.0.2"], 6, catalog, engine, 2);

        let events: Vec<ScanEvent> = session.execute().collect().await;
        assert_eq!(events.len(), 6);

        let hosts: Vec<String> = events
            .iter()
            .map(|event| match event {
                ScanEvent::Finding(finding) => finding.host.clone(),
                ScanEvent::PartitionError(failure) => panic!("unexpected failure: {failure}"),
            })
            .collect();
        assert!(hosts[..3].iter().all(|host| host == "10.0.0.1"));
        assert!(hosts[3..].iter().all(|host| host == "10.0.0.2"));
    }

    #[tokio::test]
    async fn no_finding_lost_or_duplicated_under_interleaving() {
        let ports: Vec<u16> = (1..=40).collect();
        let catalog = PortCatalog::from_ports(ports.clone());
        let engine = ScriptedEngine {
            open: HashMap::from([("10.1.0.1".to_owned(), ports)]),
            ..ScriptedEngine::default()
        };
        let session = session(&["10.1.0.1"], 40, catalog, engine, 4);

        let events: Vec<ScanEvent> = session.execute().collect().await;
        assert_eq!(events.len(), 40);

        let mut seen = HashSet::new();
        for event in events {
            match event {
                ScanEvent::Finding(finding) => {
                    assert!(seen.insert(finding.port), "port {} seen twice", finding.port);
                }
                ScanEvent::PartitionError(failure) => panic!("unexpected failure: {failure}"),
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[tokio::test]
    async fn zero_open_ports_is_an_empty_stream() {
        let catalog = PortCatalog::from_ports(vec![80, 443]);
        let session = session(&["10.2.0.1"], 2, catalog, ScriptedEngine::default(), 2);

        let events: Vec<ScanEvent> = session.execute().collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn unreachable_target_does_not_abort_the_rest() {
        let catalog = PortCatalog::from_ports(vec![80, 23, 443, 21]);
        let engine = ScriptedEngine {
            open: HashMap::from([("10.3.0.2".to_owned(), vec![80])]),
            failing: HashSet::from(["10.3.0.1".to_owned()]),
        };
        let session = session(&["10.3.0.1", "10.3.0.2"], 4, catalog, engine, 2);

        let events: Vec<ScanEvent> = session.execute().collect().await;

        let failures: Vec<&PartitionFailure> = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::PartitionError(failure) => Some(failure),
                ScanEvent::Finding(_) => None,
            })
            .collect();
        // one failure per partition of the unreachable target
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|failure| failure.target == "10.3.0.1"));

        let findings: Vec<&Finding> = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Finding(finding) => Some(finding),
                ScanEvent::PartitionError(_) => None,
            })
            .collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].host, "10.3.0.2");
    }

    #[tokio::test]
    async fn execute_twice_scans_afresh() {
        let catalog = PortCatalog::from_ports(vec![80, 443]);
        let engine = ScriptedEngine {
            open: HashMap::from([("10.4.0.1".to_owned(), vec![80, 443])]),
            ..ScriptedEngine::default()
        };
        let session = session(&["10.4.0.1"], 2, catalog, engine, 2);

        let first: Vec<ScanEvent> = session.execute().collect().await;
        let second: Vec<ScanEvent> = session.execute().collect().await;
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn more_workers_than_ports_still_covers_everything() {
        let catalog = PortCatalog::from_ports(vec![80, 23, 443]);
        let engine = ScriptedEngine {
            open: HashMap::from([("10.5.0.1".to_owned(), vec![80, 23, 443])]),
            ..ScriptedEngine::default()
        };
        let session = session(&["10.5.0.1"], 3, catalog, engine, 16);

        let events: Vec<ScanEvent> = session.execute().collect().await;
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_session_yields_nothing() {
        let catalog = PortCatalog::from_ports(vec![80]);
        let engine = ScriptedEngine {
            open: HashMap::from([("10.6.0.1".to_owned(), vec![80])]),
            ..ScriptedEngine::default()
        };
        let cancel = CancellationToken::new();
        let session = ScanSession::new(
            vec!["10.6.0.1".to_owned()],
            1,
            catalog,
            engine,
            NonZeroUsize::new(1),
            Duration::from_secs(30),
            cancel.clone(),
        )
        .unwrap();

        cancel.cancel();
        let events: Vec<ScanEvent> = session.execute().collect().await;
        assert!(events.is_empty());
    }

    #[test]
    fn rejects_zero_top_ports() {
        let result = ScanSession::new(
            vec!["10.0.0.1".to_owned()],
            0,
            PortCatalog::from_ports(vec![80]),
            ScriptedEngine::default(),
            None,
            DEFAULT_TARGET_DEADLINE,
            CancellationToken::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_top_ports_beyond_catalog() {
        let result = ScanSession::new(
            vec!["10.0.0.1".to_owned()],
            5,
            PortCatalog::from_ports(vec![80, 443]),
            ScriptedEngine::default(),
            None,
            DEFAULT_TARGET_DEADLINE,
            CancellationToken::new(),
        );
        assert!(result.is_err());
    }
}
