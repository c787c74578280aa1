//! ---
//! nuo_section: "02-mesh-transport"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Mesh driver abstraction and node model."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
//! Mesh transport layer for R-NUO.
//!
//! The orchestrator never speaks the radio protocol itself. It talks to a
//! [`MeshDriver`], which owns the connection to the local radio, the set of
//! known remote nodes, discovery, and the "apply profile" operation. The
//! [`SimulatedMesh`] driver backs the daemon's simulation mode and the test
//! suites.
#![warn(missing_docs)]

pub mod driver;
pub mod node;
pub mod simulated;
pub mod status;

pub use driver::{ApplyError, ApplyTask, BatchOutcome, DriverError, MeshDriver};
pub use node::{AddressError, NodeAddress, NodeInfo, NodeRole, NodeStore};
pub use simulated::{SimulatedMesh, SimulatedMeshBuilder};
pub use status::{StatusNotification, TransportStatusCode, UpdateProgress};
