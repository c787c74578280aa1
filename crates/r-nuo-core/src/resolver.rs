//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Expansion of abstract targets into per-node update tasks."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use r_nuo_common::{UnknownRolePolicy, UpdaterConfig};
use r_nuo_transport::{ApplyTask, NodeAddress, NodeInfo, NodeRole};
use tracing::{info, warn};

use crate::request::{TargetType, TaskKey, TaskSpec, UpdateRequest};

/// A profile application bound to one concrete node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTask {
    /// Node to update.
    pub node: NodeInfo,
    /// Absolute path of the profile package.
    pub profile_path: PathBuf,
    /// Explicit timeout, `None` for the driver default.
    pub timeout: Option<Duration>,
}

impl ResolvedTask {
    fn new(node: NodeInfo, spec: &TaskSpec) -> Self {
        Self {
            node,
            profile_path: spec.profile_path.clone(),
            timeout: spec.timeout,
        }
    }

    /// Driver instruction for this task.
    pub fn to_apply_task(&self) -> ApplyTask {
        ApplyTask {
            node: self.node.clone(),
            profile_path: self.profile_path.clone(),
            timeout: self.timeout,
        }
    }
}

/// A node claimed by more than one task; the first claim won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConflict {
    /// Contested node.
    pub node: NodeAddress,
    /// Task whose claim was kept.
    pub kept: TaskKey,
    /// Task whose claim was dropped.
    pub dropped: TaskKey,
}

/// A target value that could not be turned into a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTarget {
    /// Task the value belonged to.
    pub key: TaskKey,
    /// Offending value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

/// Per-node tasks in resolution order, plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTaskSet {
    tasks: IndexMap<NodeAddress, ResolvedTask>,
    owners: IndexMap<NodeAddress, TaskKey>,
    conflicts: Vec<TaskConflict>,
    rejected: Vec<RejectedTarget>,
}

impl ResolvedTaskSet {
    /// Tasks keyed by node address.
    pub fn tasks(&self) -> &IndexMap<NodeAddress, ResolvedTask> {
        &self.tasks
    }

    /// Task for one node.
    pub fn get(&self, address: &NodeAddress) -> Option<&ResolvedTask> {
        self.tasks.get(address)
    }

    /// Iterate tasks in resolution order.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedTask> {
        self.tasks.values()
    }

    /// Number of nodes to update.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Duplicate claims that were dropped.
    pub fn conflicts(&self) -> &[TaskConflict] {
        &self.conflicts
    }

    /// Target values that did not resolve.
    pub fn rejected(&self) -> &[RejectedTarget] {
        &self.rejected
    }

    /// Driver instructions in resolution order.
    pub fn to_apply_tasks(&self) -> Vec<ApplyTask> {
        self.tasks.values().map(ResolvedTask::to_apply_task).collect()
    }

    fn add(&mut self, key: &TaskKey, task: ResolvedTask) {
        let address = task.node.address;
        if let Some(owner) = self.owners.get(&address) {
            warn!(node = %task.node, kept = %owner, dropped = %key, "task for node already provided");
            self.conflicts.push(TaskConflict {
                node: address,
                kept: owner.clone(),
                dropped: key.clone(),
            });
            return;
        }
        self.owners.insert(address, key.clone());
        self.tasks.insert(address, task);
    }

    fn reject(&mut self, key: &TaskKey, value: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(key = %key, value = %value, reason = %reason, "dropping update target");
        self.rejected.push(RejectedTarget {
            key: key.clone(),
            value: value.to_owned(),
            reason,
        });
    }
}

/// Expands request targets against a node snapshot. Pure: identical inputs
/// give equal sets.
#[derive(Debug, Clone, Copy)]
pub struct TaskResolver {
    unknown_role_policy: UnknownRolePolicy,
    include_undiscovered_nodes: bool,
}

impl Default for TaskResolver {
    fn default() -> Self {
        Self {
            unknown_role_policy: UnknownRolePolicy::Include,
            include_undiscovered_nodes: true,
        }
    }
}

impl TaskResolver {
    /// Resolver with explicit policies.
    pub fn new(unknown_role_policy: UnknownRolePolicy, include_undiscovered_nodes: bool) -> Self {
        Self {
            unknown_role_policy,
            include_undiscovered_nodes,
        }
    }

    /// Resolver matching the updater configuration.
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self::new(config.unknown_role_policy, config.include_undiscovered_nodes)
    }

    /// Resolve every task of `request`.
    pub fn resolve(
        &self,
        request: &UpdateRequest,
        known_nodes: &[NodeInfo],
        local_node: &NodeInfo,
    ) -> ResolvedTaskSet {
        let mut set = ResolvedTaskSet::default();
        for (key, spec) in request.tasks() {
            match &spec.target {
                TargetType::Node(value) => {
                    self.resolve_address(key, value, spec, known_nodes, local_node, &mut set)
                }
                TargetType::Role(role) => {
                    self.resolve_role(key, *role, spec, known_nodes, local_node, &mut set)
                }
                TargetType::Group(members) => {
                    for member in members {
                        self.resolve_address(key, member, spec, known_nodes, local_node, &mut set);
                    }
                }
            }
        }
        set
    }

    fn resolve_address(
        &self,
        key: &TaskKey,
        value: &str,
        spec: &TaskSpec,
        known_nodes: &[NodeInfo],
        local_node: &NodeInfo,
        set: &mut ResolvedTaskSet,
    ) {
        let address = match value.parse::<NodeAddress>() {
            Ok(address) => address,
            Err(_) => {
                set.reject(key, value, "invalid 64-bit node address");
                return;
            }
        };

        let node = if address == local_node.address {
            Some(local_node.clone())
        } else {
            known_nodes
                .iter()
                .find(|node| node.address == address)
                .cloned()
        };

        match node {
            Some(node) => set.add(key, ResolvedTask::new(node, spec)),
            None if self.include_undiscovered_nodes => {
                info!(node = %address, "node not in discovered network");
                set.add(key, ResolvedTask::new(NodeInfo::unlabelled(address), spec));
            }
            None => set.reject(key, value, "node not in discovered network"),
        }
    }

    fn resolve_role(
        &self,
        key: &TaskKey,
        role: NodeRole,
        spec: &TaskSpec,
        known_nodes: &[NodeInfo],
        local_node: &NodeInfo,
        set: &mut ResolvedTaskSet,
    ) {
        let candidates = known_nodes
            .iter()
            .filter(|node| node.address != local_node.address)
            .chain(std::iter::once(local_node));
        for node in candidates {
            if self.role_matches(node.role, role) {
                set.add(key, ResolvedTask::new(node.clone(), spec));
            }
        }
    }

    fn role_matches(&self, node_role: NodeRole, wanted: NodeRole) -> bool {
        if node_role.is_known() {
            return node_role == wanted;
        }
        matches!(self.unknown_role_policy, UnknownRolePolicy::Include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestParser;
    use std::fs;

    fn node(raw: u64, id: &str, role: NodeRole) -> NodeInfo {
        NodeInfo::new(NodeAddress::new(raw), id, role)
    }

    fn local() -> NodeInfo {
        node(0x01, "gateway", NodeRole::Coordinator)
    }

    fn known() -> Vec<NodeInfo> {
        vec![
            node(0x10, "router-a", NodeRole::Router),
            node(0x11, "router-b", NodeRole::Router),
            node(0x20, "sensor", NodeRole::EndDevice),
            NodeInfo::unlabelled(NodeAddress::new(0x30)),
        ]
    }

    fn request(tasks: &str) -> (tempfile::TempDir, UpdateRequest) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("demo.xpro"), b"profile").unwrap();
        fs::write(dir.path().join("other.xpro"), b"profile").unwrap();
        let parser = RequestParser::new(dir.path()).ignore_invalid_tasks(true);
        let request = parser
            .parse_str(&format!(r#"{{"tasks":[{tasks}]}}"#))
            .unwrap();
        (dir, request)
    }

    fn addresses(set: &ResolvedTaskSet) -> Vec<u64> {
        set.tasks().keys().map(NodeAddress::as_u64).collect()
    }

    #[test]
    fn distinct_node_targets_resolve_one_each() {
        let (_dir, req) = request(
            r#"{"target":{"type":0,"value":"10"},"profile":"demo"},
               {"target":{"type":0,"value":"11"},"profile":"demo"},
               {"target":{"type":0,"value":"20"},"profile":"demo"}"#,
        );
        let set = TaskResolver::default().resolve(&req, &known(), &local());
        assert_eq!(addresses(&set), vec![0x10, 0x11, 0x20]);
        assert!(set.conflicts().is_empty());
        assert_eq!(set.get(&NodeAddress::new(0x11)).unwrap().node.node_id.as_deref(), Some("router-b"));
    }

    #[test]
    fn local_address_resolves_to_local_record() {
        let (_dir, req) = request(r#"{"target":{"type":0,"value":"1"},"profile":"demo"}"#);
        let set = TaskResolver::default().resolve(&req, &known(), &local());
        assert_eq!(set.iter().next().unwrap().node, local());
    }

    #[test]
    fn undiscovered_addresses_follow_policy() {
        let (_dir, req) = request(r#"{"target":{"type":0,"value":"99"},"profile":"demo"}"#);
        let included = TaskResolver::default().resolve(&req, &known(), &local());
        assert_eq!(
            included.iter().next().unwrap().node,
            NodeInfo::unlabelled(NodeAddress::new(0x99))
        );

        let excluded = TaskResolver::new(UnknownRolePolicy::Include, false).resolve(&req, &known(), &local());
        assert!(excluded.is_empty());
        assert_eq!(excluded.rejected()[0].reason, "node not in discovered network");
    }

    #[test]
    fn invalid_addresses_are_rejected_and_recorded() {
        let (_dir, req) = request(r#"{"target":{"type":0,"value":"not-an-address"},"profile":"demo"}"#);
        let set = TaskResolver::default().resolve(&req, &known(), &local());
        assert!(set.is_empty());
        assert_eq!(set.rejected().len(), 1);
        assert_eq!(set.rejected()[0].value, "not-an-address");
    }

    #[test]
    fn role_expansion_includes_matching_and_unknown_roles() {
        let (_dir, req) = request(r#"{"target":{"type":1,"value":"router"},"profile":"demo"}"#);
        let set = TaskResolver::default().resolve(&req, &known(), &local());
        assert_eq!(addresses(&set), vec![0x10, 0x11, 0x30]);

        let strict = TaskResolver::new(UnknownRolePolicy::Exclude, true).resolve(&req, &known(), &local());
        assert_eq!(addresses(&strict), vec![0x10, 0x11]);
    }

    #[test]
    fn role_expansion_adds_local_node_once() {
        let (_dir, req) = request(r#"{"target":{"type":1,"value":"coordinator"},"profile":"demo"}"#);
        let mut nodes = known();
        nodes.push(local());
        let set = TaskResolver::new(UnknownRolePolicy::Exclude, true).resolve(&req, &nodes, &local());
        assert_eq!(addresses(&set), vec![0x01]);
        assert!(set.conflicts().is_empty());
    }

    #[test]
    fn group_with_repeated_member_records_one_conflict() {
        let (_dir, req) = request(r#"{"target":{"type":2,"value":"10,20,10,"},"profile":"demo"}"#);
        let set = TaskResolver::default().resolve(&req, &known(), &local());
        assert_eq!(addresses(&set), vec![0x10, 0x20]);
        assert_eq!(set.conflicts().len(), 1);
        assert_eq!(set.conflicts()[0].node, NodeAddress::new(0x10));
    }

    #[test]
    fn first_task_wins_across_targets() {
        let (_dir, req) = request(
            r#"{"target":{"type":0,"value":"10"},"profile":"demo"},
               {"target":{"type":1,"value":"router"},"profile":"other"}"#,
        );
        let set = TaskResolver::new(UnknownRolePolicy::Exclude, true).resolve(&req, &known(), &local());
        assert_eq!(addresses(&set), vec![0x10, 0x11]);
        assert!(set
            .get(&NodeAddress::new(0x10))
            .unwrap()
            .profile_path
            .ends_with("demo.xpro"));
        assert_eq!(set.conflicts().len(), 1);
        assert_eq!(set.conflicts()[0].dropped, TaskKey::Role(NodeRole::Router));
    }

    #[test]
    fn resolution_is_deterministic() {
        let (_dir, req) = request(
            r#"{"target":{"type":1,"value":"end_device"},"profile":"demo"},
               {"target":{"type":2,"value":"10,99"},"profile":"other"}"#,
        );
        let resolver = TaskResolver::default();
        let first = resolver.resolve(&req, &known(), &local());
        let second = resolver.resolve(&req, &known(), &local());
        assert_eq!(first, second);
        assert_eq!(first.to_apply_tasks().len(), first.len());
    }
}
