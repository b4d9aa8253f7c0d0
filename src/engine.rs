//! The external discovery engine: an Nmap child process per invocation.
//!
//! The orchestrator only ever talks to [`DiscoveryEngine`], so tests swap
//! in scripted engines without touching a network. The real implementation
//! shells out to the `nmap` binary with service/version detection and the
//! discovery script set, and reads the structured report back as XML on
//! stdout (`-oX -`).

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::{debug, warn};
use serde_derive::Deserialize;
use tokio::process::Command;

/// One raw per-port record extracted from the engine's report.
///
/// Carries everything the engine said about the port; the normalizer in
/// [`crate::finding`] decides what survives.
#[derive(Debug, Clone)]
pub struct PortRecord {
    /// Address of the host the record belongs to.
    pub host: String,
    /// Transport protocol the port was probed over.
    pub protocol: String,
    /// Probed port number.
    pub port: u16,
    /// Reported port state (`open`, `closed`, `filtered`, ...).
    pub state: String,
    /// Service name, when detected.
    pub service_name: Option<String>,
    /// Product string, when detected.
    pub product: Option<String>,
    /// Product version, when detected.
    pub version: Option<String>,
    /// Discovery-script output keyed by script identifier.
    pub scripts: BTreeMap<String, String>,
}

/// The parsed result of one engine invocation, flattened to port records.
#[derive(Debug, Clone, Default)]
pub struct EngineReport {
    /// Every host x protocol x port record the engine reported.
    pub records: Vec<PortRecord>,
}

impl EngineReport {
    /// Parses an Nmap XML document into a flat list of port records.
    ///
    /// Records without a state element are dropped with a warning rather
    /// than failing the whole report.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let run: RawRun = quick_xml::de::from_str(xml).context("unparsable scan report")?;

        let mut records = Vec::new();
        for host in &run.hosts {
            let Some(address) = host.primary_address() else {
                warn!("skipping host entry without an address");
                continue;
            };

            for port in host.ports.iter().flat_map(|ports| &ports.ports) {
                let Some(state) = &port.state else {
                    warn!("skipping port {} on {address}: no state reported", port.port);
                    continue;
                };

                let scripts = port
                    .scripts
                    .iter()
                    .map(|script| {
                        (
                            script.id.clone(),
                            script.output.clone().unwrap_or_default(),
                        )
                    })
                    .collect();

                records.push(PortRecord {
                    host: address.to_owned(),
                    protocol: port.protocol.clone(),
                    port: port.port,
                    state: state.state.clone(),
                    service_name: port.service.as_ref().and_then(|s| s.name.clone()),
                    product: port.service.as_ref().and_then(|s| s.product.clone()),
                    version: port.service.as_ref().and_then(|s| s.version.clone()),
                    scripts,
                });
            }
        }

        Ok(Self { records })
    }
}

/// A host/service discovery engine the scan workers can drive.
pub trait DiscoveryEngine: Send + Sync + 'static {
    /// Probes `target` on the given literal ports, returning the raw report.
    ///
    /// One invocation covers one (target, partition) pair. Dropping the
    /// returned future must abort the probe and release its resources.
    fn probe(
        &self,
        target: &str,
        ports: &[u16],
    ) -> impl Future<Output = Result<EngineReport>> + Send;
}

/// Drives the system `nmap` binary.
#[derive(Debug, Clone)]
pub struct NmapEngine {
    binary: PathBuf,
    extra_args: Vec<String>,
}

impl NmapEngine {
    /// Uses a specific binary instead of `nmap` from `PATH`.
    #[must_use]
    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = binary;
        self
    }

    /// Appends extra arguments to every invocation, after the built-in set.
    #[must_use]
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// The full argument vector for one invocation.
    fn build_args(&self, target: &str, selector: &str) -> Vec<String> {
        let mut args: Vec<String> = ["-sV", "-T4", "-sT", "--script=discovery", "-p"]
            .iter()
            .map(ToString::to_string)
            .collect();
        args.push(selector.to_owned());
        args.extend(["-oX".to_owned(), "-".to_owned()]);
        args.extend(self.extra_args.iter().cloned());
        args.push(target.to_owned());
        args
    }
}

impl Default for NmapEngine {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("nmap"),
            extra_args: Vec::new(),
        }
    }
}

impl DiscoveryEngine for NmapEngine {
    async fn probe(&self, target: &str, ports: &[u16]) -> Result<EngineReport> {
        let selector = ports.iter().join(",");
        let args = self.build_args(target, &selector);
        debug!("invoking {} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("could not launch {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            );
        }

        EngineReport::from_xml(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
struct RawRun {
    #[serde(rename = "host", default)]
    hosts: Vec<RawHost>,
}

#[derive(Debug, Deserialize)]
struct RawHost {
    #[serde(rename = "address", default)]
    addresses: Vec<RawAddress>,
    ports: Option<RawPorts>,
}

impl RawHost {
    /// The host's IP address; MAC-only entries fall back to the first
    /// address present.
    fn primary_address(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|address| address.addrtype.starts_with("ip"))
            .or_else(|| self.addresses.first())
            .map(|address| address.addr.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addrtype: String,
}

#[derive(Debug, Deserialize)]
struct RawPorts {
    #[serde(rename = "port", default)]
    ports: Vec<RawPort>,
}

#[derive(Debug, Deserialize)]
struct RawPort {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    port: u16,
    state: Option<RawState>,
    service: Option<RawService>,
    #[serde(rename = "script", default)]
    scripts: Vec<RawScript>,
}

#[derive(Debug, Deserialize)]
struct RawState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct RawService {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@product")]
    product: Option<String>,
    #[serde(rename = "@version")]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawScript {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@output")]
    output: Option<String>,
}
