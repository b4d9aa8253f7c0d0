//! The canonical normalized record of one open port on one host.

use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};

use crate::engine::PortRecord;

/// One open service discovered on one host.
///
/// Only ports whose reported state is exactly `open` are ever turned into
/// findings; optional fields are present only when the engine reported
/// them. The serialized form keeps the field names downstream consumers
/// have always read (`name`, `script`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Address of the scanned host as reported by the engine.
    pub host: String,
    /// Transport protocol the port was probed over.
    pub protocol: String,
    /// The open port number.
    pub port: u16,
    /// Detected service name, when the engine identified one.
    #[serde(rename = "name", skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Detected product string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Detected product version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Output of discovery scripts, keyed by script identifier.
    #[serde(rename = "script", skip_serializing_if = "Option::is_none")]
    pub script_output: Option<BTreeMap<String, String>>,
}

impl Finding {
    /// Normalizes a raw engine record into a finding.
    ///
    /// Returns `None` for anything that is not an open port: closed and
    /// filtered ports never produce findings.
    #[must_use]
    pub fn from_record(record: PortRecord) -> Option<Self> {
        if record.state != "open" {
            return None;
        }

        Some(Self {
            host: record.host,
            protocol: record.protocol,
            port: record.port,
            service_name: record.service_name,
            product: record.product,
            version: record.version,
            script_output: if record.scripts.is_empty() {
                None
            } else {
                Some(record.scripts)
            },
        })
    }
}
