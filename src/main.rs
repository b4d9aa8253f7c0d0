//! The reconscan binary: scans the given targets and prints findings as
//! they are discovered, optionally materializing a JSON report for
//! downstream consumers.

use std::fs::File;
use std::process::exit;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use futures::StreamExt;
use log::debug;
use serde_derive::Serialize;
use tokio_util::sync::CancellationToken;

use reconscan::catalog::PortCatalog;
use reconscan::engine::NmapEngine;
use reconscan::finding::Finding;
use reconscan::input::{Config, Opts};
use reconscan::session::{PartitionFailure, ScanEvent, ScanSession};
use reconscan::{detail, output, warning};

const BANNER: &str = r"
.----------------------------------------------------.
|  reconscan : concurrent service reconnaissance     |
|  authorized penetration testing use only           |
'----------------------------------------------------'";

/// The materialized result of one run, for downstream consumers.
#[derive(Debug, Serialize)]
struct ScanReport {
    started_at: DateTime<Utc>,
    duration_seconds: f64,
    findings: Vec<Finding>,
    failures: Vec<PartitionFailure>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone());
    opts.merge(&config);
    debug!("main() `opts` arguments are {opts:?}");

    if !opts.greppable && !opts.no_banner {
        if opts.accessible {
            println!("reconscan: concurrent service reconnaissance. Authorized use only.");
        } else {
            println!("{}", BANNER.cyan());
        }
    }

    if opts.addresses.is_empty() {
        warning!(
            "No targets were supplied. Use '-a 10.0.0.0/24' or populate the config file.",
            opts.greppable,
            opts.accessible
        );
        exit(1);
    }

    let catalog = match &opts.catalog {
        Some(path) => PortCatalog::from_file(path)?,
        None => PortCatalog::default(),
    };

    if opts.top_ports == 0 {
        warning!("--top-ports must be at least 1.", opts.greppable, opts.accessible);
        exit(1);
    }
    let mut top_ports = opts.top_ports;
    if top_ports > catalog.len() {
        warning!(
            format!(
                "Requested the top {top_ports} ports but the catalog holds {}. Scanning all of it.",
                catalog.len()
            ),
            opts.greppable,
            opts.accessible
        );
        top_ports = catalog.len();
    }

    let engine = NmapEngine::default().with_extra_args(opts.command.clone());

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c_cancel.cancel();
    });

    let session = ScanSession::new(
        opts.addresses.clone(),
        top_ports,
        catalog,
        engine,
        None,
        Duration::from_secs(opts.deadline),
        cancel,
    )?;

    detail!(
        format!(
            "Scanning the top {top_ports} ports on {} target(s).",
            opts.addresses.len()
        ),
        opts.greppable,
        opts.accessible
    );

    let started_at = Utc::now();
    let start = Instant::now();
    let mut findings: Vec<Finding> = Vec::new();
    let mut failures: Vec<PartitionFailure> = Vec::new();

    let mut events = session.execute();
    while let Some(event) = events.next().await {
        match event {
            ScanEvent::Finding(finding) => {
                if opts.greppable {
                    println!("{}", serde_json::to_string(&finding)?);
                } else if opts.accessible {
                    println!("Open {}", finding_line(&finding));
                } else {
                    println!("Open {}", finding_line(&finding).purple());
                }
                findings.push(finding);
            }
            ScanEvent::PartitionError(failure) => {
                warning!(format!("{failure}"), opts.greppable, opts.accessible);
                failures.push(failure);
            }
        }
    }

    output!(
        format!(
            "Discovered {} open service(s) across {} target(s) in {:.1}s.",
            findings.len(),
            opts.addresses.len(),
            start.elapsed().as_secs_f64()
        ),
        opts.greppable,
        opts.accessible
    );

    if let Some(path) = &opts.output {
        let report = ScanReport {
            started_at,
            duration_seconds: start.elapsed().as_secs_f64(),
            findings,
            failures,
        };
        let file = File::create(path)
            .with_context(|| format!("could not create report file {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report).context("could not write report")?;
        detail!(
            format!("Report written to {}.", path.display()),
            opts.greppable,
            opts.accessible
        );
    }

    Ok(())
}

/// One human-readable line per finding: host:port/proto plus whatever the
/// engine detected.
fn finding_line(finding: &Finding) -> String {
    let mut line = format!("{}:{}/{}", finding.host, finding.port, finding.protocol);
    for field in [&finding.service_name, &finding.product, &finding.version] {
        if let Some(value) = field {
            line.push(' ');
            line.push_str(value);
        }
    }
    line
}
