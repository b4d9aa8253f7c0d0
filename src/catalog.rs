//! The port catalog: well-known ports in most-common-first order.
//!
//! `top_ports` always indexes a prefix of the catalog, so the order of
//! entries is load-bearing. Catalogs are loaded once from a JSON array of
//! port numbers (integers or numeric strings are both accepted, since
//! published lists use either), with an embedded top-100 list as the
//! fallback when no file is supplied.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde_derive::Deserialize;

use crate::partition::PortPartition;

// Nmap's 100 most frequently open TCP ports, by service frequency.
const DEFAULT_PORT_ORDER: [u16; 100] = [
    80, 23, 443, 21, 22, 25, 3389, 110, 445, 139, 143, 53, 135, 3306, 8080, 1723, 111, 995, 993,
    5900, 1025, 587, 8888, 199, 1720, 465, 548, 113, 81, 6001, 10000, 514, 5060, 179, 1026, 2000,
    8443, 8000, 32768, 554, 26, 1433, 49152, 2001, 515, 8008, 49154, 1027, 5666, 646, 5000, 5631,
    631, 49153, 8081, 2049, 88, 79, 5800, 106, 2121, 1110, 49155, 6000, 513, 990, 5357, 427,
    49156, 543, 544, 5101, 144, 7, 389, 8009, 3128, 444, 9999, 5009, 7070, 5190, 3000, 5432,
    1900, 3986, 13, 1029, 9, 5051, 6646, 49157, 1028, 873, 1755, 2717, 4899, 9100, 119, 37,
];

/// A single catalog entry as found in the JSON file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogEntry {
    Number(u16),
    Text(String),
}

/// An ordered list of well-known ports, most common first.
#[derive(Debug, Clone)]
pub struct PortCatalog {
    ports: Vec<u16>,
}

impl PortCatalog {
    /// Builds a catalog from an explicit port list.
    ///
    /// The list is used verbatim; callers are responsible for ordering.
    pub fn from_ports(ports: Vec<u16>) -> Self {
        Self { ports }
    }

    /// Loads a catalog from a JSON array of port numbers or numeric strings.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read port catalog {}", path.display()))?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&content)
            .with_context(|| format!("invalid port catalog {}", path.display()))?;

        let ports = entries
            .iter()
            .map(|entry| match entry {
                CatalogEntry::Number(port) => Ok(*port),
                CatalogEntry::Text(text) => text
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid port entry {text:?}")),
            })
            .collect::<Result<Vec<u16>>>()?;

        ensure!(!ports.is_empty(), "port catalog {} is empty", path.display());
        Ok(Self { ports })
    }

    /// Number of ports in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether the catalog holds no ports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Resolves a partition's index range into the literal ports it covers.
    #[must_use]
    pub fn slice(&self, partition: &PortPartition) -> &[u16] {
        &self.ports[partition.start..partition.end]
    }
}

impl Default for PortCatalog {
    /// The embedded most-common-first top-100 list.
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORT_ORDER.to_vec(),
        }
    }
}
