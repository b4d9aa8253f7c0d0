//! This crate exposes the internal functionality of the reconscan
//! reconnaissance engine.
//!
//! reconscan automates the discovery half of an authorized penetration
//! test: it partitions a most-common-ports catalog across parallel
//! workers, drives one Nmap invocation per partition with service/version
//! detection and discovery scripts enabled, and streams normalized
//! findings back to the caller as they are extracted.
//!
//! ## Architecture Overview
//!
//! The scanning behaviour is managed by
//! [`ScanSession`](crate::session::ScanSession), which drives a
//! [`DiscoveryEngine`](crate::engine::DiscoveryEngine) through per-worker
//! [`PortPartition`](crate::partition::PortPartition)s. The process
//! follows this flow:
//!
//! 1. **Catalog**: the well-known-port catalog is loaded once; `top_ports`
//!    selects its most-common prefix
//! 2. **Partitioning**: the selected port space is split into contiguous,
//!    near-equal slices, one per available worker
//! 3. **Probing**: each worker runs the external engine over its slice and
//!    normalizes every open-port record into a
//!    [`Finding`](crate::finding::Finding)
//! 4. **Aggregation**: findings flow through a shared bounded channel and
//!    are yielded to the consumer in discovery order, one target at a time
//!
//! ## Basic Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! use reconscan::catalog::PortCatalog;
//! use reconscan::engine::NmapEngine;
//! use reconscan::session::{ScanEvent, ScanSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = ScanSession::new(
//!         vec!["10.0.0.0/28".to_owned()],   // targets, scanned in order
//!         100,                              // top N catalog ports
//!         PortCatalog::default(),           // embedded most-common list
//!         NmapEngine::default(),            // the system nmap binary
//!         None,                             // workers = host parallelism
//!         Duration::from_secs(900),         // per-target deadline
//!         CancellationToken::new(),
//!     )?;
//!
//!     let mut events = session.execute();
//!     while let Some(event) = events.next().await {
//!         match event {
//!             ScanEvent::Finding(finding) => {
//!                 println!("open {}:{}/{}", finding.host, finding.port, finding.protocol);
//!             }
//!             ScanEvent::PartitionError(failure) => eprintln!("{failure}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! A worker whose engine invocation fails surfaces a
//! [`PartitionFailure`](crate::session::PartitionFailure) event on the
//! same stream as findings and never aborts the remaining targets; a scan
//! with zero open ports is simply an empty stream. Dropping the stream
//! cancels all in-flight probes.
#![warn(missing_docs)]

pub mod tui;

pub mod input;

pub mod catalog;

pub mod partition;

pub mod finding;

pub mod engine;

pub mod session;
