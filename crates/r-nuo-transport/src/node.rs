//! ---
//! nuo_section: "02-mesh-transport"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Node addressing, roles, and the known-node store."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_ADDRESS_DIGITS: usize = 16;

/// Raised when a textual node address cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid 64-bit node address '{0}'")]
pub struct AddressError(pub String);

/// Stable 64-bit address identifying a node in the mesh.
///
/// Accepts an optional `0x` prefix followed by one to sixteen hexadecimal
/// digits. Always displayed as sixteen upper-case digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress(u64);

impl NodeAddress {
    /// Wrap a raw 64-bit value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether `text` is a syntactically valid node address.
    pub fn is_valid(text: &str) -> bool {
        text.parse::<NodeAddress>().is_ok()
    }
}

impl FromStr for NodeAddress {
    type Err = AddressError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty()
            || digits.len() > MAX_ADDRESS_DIGITS
            || !digits.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(AddressError(text.to_owned()));
        }
        u64::from_str_radix(digits, 16)
            .map(NodeAddress)
            .map_err(|_| AddressError(text.to_owned()))
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeAddress> for String {
    fn from(value: NodeAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Coarse classification of a node's function in the mesh topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Network coordinator.
    Coordinator,
    /// Routing node.
    Router,
    /// Sleepy or leaf end device.
    EndDevice,
    /// Role not yet determined.
    #[default]
    Unknown,
}

impl NodeRole {
    /// Numeric role code used on the request wire.
    pub fn code(self) -> u8 {
        match self {
            NodeRole::Coordinator => 0,
            NodeRole::Router => 1,
            NodeRole::EndDevice => 2,
            NodeRole::Unknown => 3,
        }
    }

    /// Map a numeric role code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(NodeRole::Coordinator),
            1 => Some(NodeRole::Router),
            2 => Some(NodeRole::EndDevice),
            3 => Some(NodeRole::Unknown),
            _ => None,
        }
    }

    /// Whether the role has been determined.
    pub fn is_known(self) -> bool {
        !matches!(self, NodeRole::Unknown)
    }
}

impl FromStr for NodeRole {
    type Err = String;

    /// Accepts a role code (`"1"`) or a role name (`"router"`, `"end-device"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u64>() {
            return NodeRole::from_code(code).ok_or_else(|| format!("unknown role: {}", s));
        }
        let normalized = trimmed.to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "coordinator" => Ok(NodeRole::Coordinator),
            "router" => Ok(NodeRole::Router),
            "end_device" | "enddevice" => Ok(NodeRole::EndDevice),
            "unknown" => Ok(NodeRole::Unknown),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeRole::Coordinator => "coordinator",
            NodeRole::Router => "router",
            NodeRole::EndDevice => "end device",
            NodeRole::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Identity of a node as seen by the mesh driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    /// 64-bit node address.
    pub address: NodeAddress,
    /// Optional human readable node identifier.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Role reported by the node, `Unknown` until determined.
    #[serde(default)]
    pub role: NodeRole,
}

impl NodeInfo {
    /// Construct a labelled node record.
    pub fn new(address: NodeAddress, node_id: impl Into<String>, role: NodeRole) -> Self {
        Self {
            address,
            node_id: Some(node_id.into()),
            role,
        }
    }

    /// Construct a record for an address the driver has not classified yet.
    pub fn unlabelled(address: NodeAddress) -> Self {
        Self {
            address,
            node_id: None,
            role: NodeRole::Unknown,
        }
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => write!(f, "{} - {}", self.address, id),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Owned store of known nodes keyed by address.
///
/// Drivers are the only writers; the orchestrator reads snapshots.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: RwLock<IndexMap<NodeAddress, NodeInfo>>,
}

impl NodeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a node record. Returns `true` if the node was new.
    pub fn upsert(&self, node: NodeInfo) -> bool {
        self.nodes.write().insert(node.address, node).is_none()
    }

    /// Remove a node record.
    pub fn remove(&self, address: &NodeAddress) -> Option<NodeInfo> {
        self.nodes.write().shift_remove(address)
    }

    /// Look up a node by address.
    pub fn get(&self, address: &NodeAddress) -> Option<NodeInfo> {
        self.nodes.read().get(address).cloned()
    }

    /// Whether the address is known.
    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.read().contains_key(address)
    }

    /// Copy of all known nodes in insertion order.
    pub fn snapshot(&self) -> Vec<NodeInfo> {
        self.nodes.read().values().cloned().collect()
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parsing_accepts_prefix_and_short_forms() {
        let full: NodeAddress = "0013A20012345678".parse().unwrap();
        assert_eq!(full.as_u64(), 0x0013_A200_1234_5678);
        assert_eq!(full.to_string(), "0013A20012345678");

        let prefixed: NodeAddress = "0x0013a20012345678".parse().unwrap();
        assert_eq!(prefixed, full);

        let short: NodeAddress = "ffff".parse().unwrap();
        assert_eq!(short.to_string(), "000000000000FFFF");
    }

    #[test]
    fn address_parsing_rejects_garbage() {
        assert!(!NodeAddress::is_valid(""));
        assert!(!NodeAddress::is_valid("0x"));
        assert!(!NodeAddress::is_valid("0013A2001234567890"));
        assert!(!NodeAddress::is_valid("not-an-address"));
        assert!(!NodeAddress::is_valid("12 34"));
    }

    #[test]
    fn address_serde_uses_canonical_text() {
        let address: NodeAddress = "0x1".parse().unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"0000000000000001\"");
        let back: NodeAddress = serde_json::from_str("\"0000000000000001\"").unwrap();
        assert_eq!(back, address);
        assert!(serde_json::from_str::<NodeAddress>("\"zz\"").is_err());
    }

    #[test]
    fn role_accepts_codes_and_names() {
        assert_eq!("0".parse::<NodeRole>(), Ok(NodeRole::Coordinator));
        assert_eq!("Router".parse::<NodeRole>(), Ok(NodeRole::Router));
        assert_eq!("end-device".parse::<NodeRole>(), Ok(NodeRole::EndDevice));
        assert_eq!("end device".parse::<NodeRole>(), Ok(NodeRole::EndDevice));
        assert_eq!("3".parse::<NodeRole>(), Ok(NodeRole::Unknown));
        assert!("7".parse::<NodeRole>().is_err());
        assert!("gateway".parse::<NodeRole>().is_err());
    }

    #[test]
    fn node_display_includes_label_when_present() {
        let address: NodeAddress = "0013A20012345678".parse().unwrap();
        let labelled = NodeInfo::new(address, "pump-3", NodeRole::Router);
        assert_eq!(labelled.to_string(), "0013A20012345678 - pump-3");
        assert_eq!(
            NodeInfo::unlabelled(address).to_string(),
            "0013A20012345678"
        );
    }

    #[test]
    fn store_keeps_insertion_order() {
        let store = NodeStore::new();
        let a = NodeInfo::unlabelled(NodeAddress::new(2));
        let b = NodeInfo::unlabelled(NodeAddress::new(1));
        assert!(store.upsert(a.clone()));
        assert!(store.upsert(b.clone()));
        assert!(!store.upsert(a.clone()));
        assert_eq!(store.snapshot(), vec![a, b]);
        assert_eq!(store.len(), 2);
    }
}
