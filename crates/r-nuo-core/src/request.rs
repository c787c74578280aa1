//! ---
//! nuo_section: "05-update-orchestration"
//! nuo_subsection: "module"
//! nuo_type: "source"
//! nuo_scope: "code"
//! nuo_description: "Inbound update request parsing and task validation."
//! nuo_version: "v0.0.0-prealpha"
//! nuo_owner: "tbd"
//! ---
//! Update request parsing.
//!
//! Payload shape:
//!
//! ```json
//! { "tasks": [ { "target": {"type": 0, "value": "0013A20012345678"},
//!                "profile": "demo", "timeout": 30 } ] }
//! ```
//!
//! Target types: `0` a single node address, `1` a role, `2` a comma-separated
//! group of node addresses.
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use r_nuo_common::UpdaterConfig;
use r_nuo_transport::{NodeAddress, NodeRole};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::UpdateError;

const GROUP_SEPARATOR: char = ',';

/// Abstract target of an update task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetType {
    /// A single node address, as received.
    Node(String),
    /// Every node with this role.
    Role(NodeRole),
    /// An explicit list of node addresses, as received.
    Group(Vec<String>),
}

impl TargetType {
    /// Wire code of the target type.
    pub fn code(&self) -> u8 {
        match self {
            TargetType::Node(_) => 0,
            TargetType::Role(_) => 1,
            TargetType::Group(_) => 2,
        }
    }
}

/// Canonical identity of a task inside one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Canonical node address text.
    Node(String),
    /// Role class.
    Role(NodeRole),
    /// Normalized, comma-joined member list.
    Group(String),
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKey::Node(address) => write!(f, "node {address}"),
            TaskKey::Role(role) => write!(f, "role {role}"),
            TaskKey::Group(members) => write!(f, "group [{members}]"),
        }
    }
}

/// One validated task of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// What to update.
    pub target: TargetType,
    /// Absolute path of an existing profile package.
    pub profile_path: PathBuf,
    /// Explicit per-node timeout, if one was supplied.
    pub timeout: Option<Duration>,
}

/// A validated request: at least one task, at most one task per key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    raw: String,
    tasks: IndexMap<TaskKey, TaskSpec>,
}

impl UpdateRequest {
    /// Payload the request was parsed from, trimmed.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Tasks in payload order.
    pub fn tasks(&self) -> &IndexMap<TaskKey, TaskSpec> {
        &self.tasks
    }

    /// Look up the task for a key.
    pub fn get(&self, key: &TaskKey) -> Option<&TaskSpec> {
        self.tasks.get(key)
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Always `false` for a parsed request.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Turns inbound payloads into [`UpdateRequest`]s.
#[derive(Debug, Clone)]
pub struct RequestParser {
    profile_directory: PathBuf,
    extension: String,
    ignore_invalid_tasks: bool,
}

impl RequestParser {
    /// Strict parser resolving profiles under `profile_directory` with the
    /// `xpro` extension.
    pub fn new(profile_directory: impl Into<PathBuf>) -> Self {
        Self {
            profile_directory: profile_directory.into(),
            extension: "xpro".to_owned(),
            ignore_invalid_tasks: false,
        }
    }

    /// Parser matching the updater configuration.
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self::new(config.profile_directory.clone())
            .with_extension(&config.profile_extension)
            .ignore_invalid_tasks(config.ignore_invalid_tasks)
    }

    /// Extension appended to profile names lacking it. A leading dot is ignored.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_owned();
        self
    }

    /// Skip invalid tasks instead of rejecting the request.
    pub fn ignore_invalid_tasks(mut self, ignore: bool) -> Self {
        self.ignore_invalid_tasks = ignore;
        self
    }

    /// Directory profile names are resolved against.
    pub fn profile_directory(&self) -> &Path {
        &self.profile_directory
    }

    /// Parse a raw payload.
    pub fn parse(&self, payload: &[u8]) -> Result<UpdateRequest, UpdateError> {
        let text = std::str::from_utf8(payload).map_err(|err| UpdateError::MalformedRequest {
            payload: String::from_utf8_lossy(payload).trim().to_owned(),
            reason: format!("payload is not valid UTF-8 ({err})"),
        })?;
        self.parse_str(text)
    }

    /// Parse a textual payload.
    pub fn parse_str(&self, payload: &str) -> Result<UpdateRequest, UpdateError> {
        let raw = payload.trim();
        let malformed = |reason: String| UpdateError::MalformedRequest {
            payload: raw.to_owned(),
            reason,
        };
        let empty = || UpdateError::EmptyRequest {
            payload: raw.to_owned(),
        };

        let document: Value =
            serde_json::from_str(raw).map_err(|err| malformed(err.to_string()))?;
        let Value::Object(root) = document else {
            return Err(malformed("payload is not a JSON object".to_owned()));
        };
        let entries = match root.get("tasks") {
            None | Some(Value::Null) => return Err(empty()),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(malformed("'tasks' is not a list".to_owned())),
        };

        let mut tasks: IndexMap<TaskKey, TaskSpec> = IndexMap::new();
        for (index, entry) in entries.iter().enumerate() {
            let (key, spec) = match self.parse_task(entry) {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(reason) => {
                    if !self.ignore_invalid_tasks {
                        return Err(UpdateError::InvalidTask(reason));
                    }
                    warn!(task = index, reason = %reason, "skipping invalid update task");
                    continue;
                }
            };
            if tasks.contains_key(&key) {
                warn!(task = index, key = %key, "duplicate update task ignored");
                continue;
            }
            debug!(task = index, key = %key, profile = %spec.profile_path.display(), timeout = ?spec.timeout, "update task accepted");
            tasks.insert(key, spec);
        }

        if tasks.is_empty() {
            return Err(empty());
        }
        Ok(UpdateRequest {
            raw: raw.to_owned(),
            tasks,
        })
    }

    /// `Ok(None)` means the task named no valid node address and is dropped.
    fn parse_task(&self, entry: &Value) -> Result<Option<(TaskKey, TaskSpec)>, String> {
        let target = match entry.get("target") {
            Some(Value::Object(target)) if !target.is_empty() => target,
            _ => return Err("missing target".to_owned()),
        };
        let type_code = target_type_code(target)?;
        let value = target_value(target)?;
        let profile_path = self.profile_path(entry.get("profile"))?;

        let (key, target) = match type_code {
            0 => {
                let Some(address) = valid_address(&value) else {
                    return Ok(None);
                };
                (TaskKey::Node(address), TargetType::Node(value))
            }
            1 => {
                let role = value
                    .parse::<NodeRole>()
                    .ok()
                    .filter(|role| role.is_known())
                    .ok_or_else(|| format!("invalid role '{value}'"))?;
                (TaskKey::Role(role), TargetType::Role(role))
            }
            _ => {
                let list = value.strip_suffix(GROUP_SEPARATOR).unwrap_or(&value);
                if list.trim().is_empty() {
                    return Err(format!("empty group '{value}'"));
                }
                let (members, addresses): (Vec<String>, Vec<String>) = list
                    .split(GROUP_SEPARATOR)
                    .map(str::trim)
                    .filter_map(|member| {
                        valid_address(member).map(|address| (member.to_owned(), address))
                    })
                    .unzip();
                if members.is_empty() {
                    warn!(group = %value, "group has no valid node address, task dropped");
                    return Ok(None);
                }
                let normalized = addresses.join(",");
                (TaskKey::Group(normalized), TargetType::Group(members))
            }
        };

        let timeout = parse_timeout(entry.get("timeout"));
        Ok(Some((
            key,
            TaskSpec {
                target,
                profile_path,
                timeout,
            },
        )))
    }

    fn profile_path(&self, profile: Option<&Value>) -> Result<PathBuf, String> {
        let name = match profile {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim(),
            _ => return Err("missing profile".to_owned()),
        };
        let suffix = format!(".{}", self.extension);
        let file_name = if name.ends_with(&suffix) {
            name.to_owned()
        } else {
            format!("{name}{suffix}")
        };
        let relative = Path::new(&file_name);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(format!("invalid profile '{name}'"));
        }
        let path = self.profile_directory.join(relative);
        if !path.is_file() {
            return Err(format!("profile '{}' does not exist", path.display()));
        }
        Ok(path)
    }
}

fn target_type_code(target: &Map<String, Value>) -> Result<u8, String> {
    let raw = match target.get("type") {
        None | Some(Value::Null) => return Err("missing target type".to_owned()),
        Some(raw) => raw,
    };
    match raw.as_u64() {
        Some(code @ 0..=2) => Ok(code as u8),
        _ => Err(format!("unknown target type '{raw}'")),
    }
}

fn target_value(target: &Map<String, Value>) -> Result<String, String> {
    let value = match target.get("value") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_owned()),
        Some(other) => Some(other.to_string()),
    };
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "missing target value".to_owned())
}

/// Canonical text of a node address, or `None` (with a warning) if invalid.
fn valid_address(value: &str) -> Option<String> {
    match value.parse::<NodeAddress>() {
        Ok(address) => Some(address.to_string()),
        Err(_) => {
            warn!(address = %value, "invalid node address in update task");
            None
        }
    }
}

fn parse_timeout(raw: Option<&Value>) -> Option<Duration> {
    let seconds = match raw {
        None | Some(Value::Null) => {
            info!("no timeout specified for update task, using driver default");
            return None;
        }
        Some(Value::Number(number)) => number.as_u64(),
        Some(_) => None,
    };
    match seconds {
        Some(seconds) if seconds > 0 => Some(Duration::from_secs(seconds)),
        _ => {
            info!(timeout = ?raw, "invalid timeout for update task, using driver default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn profiles(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"profile").unwrap();
        }
        dir
    }

    #[test]
    fn example_payload_yields_one_node_task() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = br#" {"tasks":[{"target":{"type":0,"value":"0013A20012345678"},"profile":"demo","timeout":30}]} "#;

        let request = parser.parse(payload).unwrap();
        assert_eq!(request.len(), 1);
        let task = request
            .get(&TaskKey::Node("0013A20012345678".into()))
            .unwrap();
        assert_eq!(task.target, TargetType::Node("0013A20012345678".into()));
        assert_eq!(task.profile_path, dir.path().join("demo.xpro"));
        assert_eq!(task.timeout, Some(Duration::from_secs(30)));
        assert!(request.raw().starts_with('{'));
    }

    #[test]
    fn empty_task_lists_are_rejected() {
        let parser = RequestParser::new("/nonexistent");
        for payload in [r#"{"tasks":[]}"#, "{}", r#"{"tasks":null}"#] {
            assert!(matches!(
                parser.parse_str(payload),
                Err(UpdateError::EmptyRequest { .. })
            ));
        }
    }

    #[test]
    fn non_json_and_non_objects_are_malformed() {
        let parser = RequestParser::new("/nonexistent");
        let err = parser.parse_str("hello").unwrap_err();
        assert_eq!(err.kind(), "malformed");
        assert!(err.to_string().starts_with("invalid request 'hello': "));
        assert_eq!(parser.parse_str("[1,2]").unwrap_err().kind(), "malformed");
        assert_eq!(parser.parse(&[0xff, 0xfe]).unwrap_err().kind(), "malformed");
        assert_eq!(
            parser.parse_str(r#"{"tasks":"all"}"#).unwrap_err().kind(),
            "malformed"
        );
    }

    #[test]
    fn strict_mode_rejects_first_invalid_task() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = r#"{"tasks":[
            {"target":{"type":0,"value":"0013A20012345678"},"profile":"demo"},
            {"target":{"type":0,"value":"0013A20012345679"},"profile":"missing"}
        ]}"#;
        let err = parser.parse_str(payload).unwrap_err();
        assert_eq!(
            err,
            UpdateError::InvalidTask(format!(
                "profile '{}' does not exist",
                dir.path().join("missing.xpro").display()
            ))
        );
    }

    #[test]
    fn lenient_mode_skips_invalid_tasks() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path()).ignore_invalid_tasks(true);
        let payload = r#"{"tasks":[
            {"target":{"type":7,"value":"x"},"profile":"demo"},
            {"target":{},"profile":"demo"},
            {"target":{"type":1,"value":"router"},"profile":"demo.xpro"}
        ]}"#;
        let request = parser.parse_str(payload).unwrap();
        assert_eq!(request.len(), 1);
        assert!(request.get(&TaskKey::Role(NodeRole::Router)).is_some());
    }

    #[test]
    fn lenient_mode_with_no_valid_task_is_empty() {
        let parser = RequestParser::new("/nonexistent").ignore_invalid_tasks(true);
        let payload = r#"{"tasks":[{"target":{"type":0,"value":"1"},"profile":"demo"}]}"#;
        assert!(matches!(
            parser.parse_str(payload),
            Err(UpdateError::EmptyRequest { .. })
        ));
    }

    #[test]
    fn validation_reports_each_missing_field() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let cases = [
            (r#"{"tasks":[{"profile":"demo"}]}"#, "missing target"),
            (r#"{"tasks":[{"target":{"value":"1"},"profile":"demo"}]}"#, "missing target type"),
            (r#"{"tasks":[{"target":{"type":0},"profile":"demo"}]}"#, "missing target value"),
            (r#"{"tasks":[{"target":{"type":0,"value":""},"profile":"demo"}]}"#, "missing target value"),
            (r#"{"tasks":[{"target":{"type":0,"value":"1"}}]}"#, "missing profile"),
            (r#"{"tasks":[{"target":{"type":0,"value":"1"},"profile":""}]}"#, "missing profile"),
            (r#"{"tasks":[{"target":{"type":2,"value":","},"profile":"demo"}]}"#, "empty group ','"),
            (r#"{"tasks":[{"target":{"type":1,"value":"3"},"profile":"demo"}]}"#, "invalid role '3'"),
            (r#"{"tasks":[{"target":{"type":1,"value":"gateway"},"profile":"demo"}]}"#, "invalid role 'gateway'"),
        ];
        for (payload, reason) in cases {
            assert_eq!(
                parser.parse_str(payload).unwrap_err(),
                UpdateError::InvalidTask(reason.to_owned()),
                "payload: {payload}"
            );
        }
    }

    #[test]
    fn profile_names_cannot_escape_the_directory() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = r#"{"tasks":[{"target":{"type":0,"value":"1"},"profile":"../demo"}]}"#;
        assert_eq!(
            parser.parse_str(payload).unwrap_err(),
            UpdateError::InvalidTask("invalid profile '../demo'".to_owned())
        );
    }

    #[test]
    fn numeric_values_are_rendered_as_text() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = r#"{"tasks":[{"target":{"type":1,"value":2},"profile":"demo"}]}"#;
        let request = parser.parse_str(payload).unwrap();
        assert!(request.get(&TaskKey::Role(NodeRole::EndDevice)).is_some());
    }

    #[test]
    fn invalid_timeouts_fall_back_to_driver_default() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        for timeout in ["0", "-5", "1.5", "\"soon\"", "\"30\"", "true"] {
            let payload = format!(
                r#"{{"tasks":[{{"target":{{"type":0,"value":"1"}},"profile":"demo","timeout":{timeout}}}]}}"#
            );
            let request = parser.parse_str(&payload).unwrap();
            let task = request.tasks().values().next().unwrap();
            assert_eq!(task.timeout, None, "timeout: {timeout}");
        }
    }

    #[test]
    fn duplicate_keys_keep_the_first_task() {
        let dir = profiles(&["a.xpro", "b.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = r#"{"tasks":[
            {"target":{"type":0,"value":"0x0013a20012345678"},"profile":"a"},
            {"target":{"type":0,"value":"0013A20012345678"},"profile":"b"}
        ]}"#;
        let request = parser.parse_str(payload).unwrap();
        assert_eq!(request.len(), 1);
        let task = request.tasks().values().next().unwrap();
        assert_eq!(task.profile_path, dir.path().join("a.xpro"));
    }

    #[test]
    fn group_members_are_split_and_keyed_by_normalized_list() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = r#"{"tasks":[{"target":{"type":2,"value":"a, b,a,"},"profile":"demo"}]}"#;
        let request = parser.parse_str(payload).unwrap();
        let (key, task) = request.tasks().iter().next().unwrap();
        assert_eq!(
            key,
            &TaskKey::Group(
                "000000000000000A,000000000000000B,000000000000000A".to_owned()
            )
        );
        assert_eq!(
            task.target,
            TargetType::Group(vec!["a".into(), "b".into(), "a".into()])
        );
    }

    #[test]
    fn target_type_must_be_a_json_integer() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = r#"{"tasks":[{"target":{"type":"0","value":"1"},"profile":"demo"}]}"#;
        assert_eq!(
            parser.parse_str(payload).unwrap_err(),
            UpdateError::InvalidTask("unknown target type '\"0\"'".to_owned())
        );
    }

    #[test]
    fn invalid_node_addresses_leave_no_task() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        for value in ["not-an-address", "0013A2001234567890"] {
            let payload = format!(
                r#"{{"tasks":[{{"target":{{"type":0,"value":"{value}"}},"profile":"demo"}}]}}"#
            );
            assert!(
                matches!(parser.parse_str(&payload), Err(UpdateError::EmptyRequest { .. })),
                "value: {value}"
            );
        }
        let payload = r#"{"tasks":[{"target":{"type":2,"value":"zz,yy,"},"profile":"demo"}]}"#;
        assert!(matches!(
            parser.parse_str(payload),
            Err(UpdateError::EmptyRequest { .. })
        ));
    }

    #[test]
    fn invalid_group_members_are_skipped() {
        let dir = profiles(&["demo.xpro"]);
        let parser = RequestParser::new(dir.path());
        let payload = r#"{"tasks":[
            {"target":{"type":0,"value":"bogus"},"profile":"demo"},
            {"target":{"type":2,"value":"0013A20012345678,zz,1"},"profile":"demo"}
        ]}"#;
        let request = parser.parse_str(payload).unwrap();
        assert_eq!(request.len(), 1);
        let (key, task) = request.tasks().iter().next().unwrap();
        assert_eq!(
            key,
            &TaskKey::Group("0013A20012345678,0000000000000001".to_owned())
        );
        assert_eq!(
            task.target,
            TargetType::Group(vec!["0013A20012345678".into(), "1".into()])
        );
    }

    #[test]
    fn custom_extension_is_appended() {
        let dir = profiles(&["demo.zip"]);
        let parser = RequestParser::new(dir.path()).with_extension(".zip");
        let payload = r#"{"tasks":[{"target":{"type":0,"value":"1"},"profile":"demo"}]}"#;
        let request = parser.parse_str(payload).unwrap();
        assert_eq!(
            request.tasks().values().next().unwrap().profile_path,
            dir.path().join("demo.zip")
        );
    }
}
