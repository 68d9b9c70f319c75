use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::plan::Action;

pub const DEFAULT_MAX_FILE_BYTES: u64 = 500_000;
pub const RESTRICTED_MAX_FILE_BYTES: u64 = 100_000;

/// The set of permissions active at a given point of execution. Read
/// through the current context; mutated only by `with policy` blocks,
/// which save and restore on exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Policy {
    pub allow_tools: BTreeSet<String>,
    pub allow_commands: BTreeSet<String>,
    pub require_approval: bool,
    pub max_file_bytes: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_tools: Action::all_names().iter().map(ToString::to_string).collect(),
            allow_commands: BTreeSet::new(),
            require_approval: false,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl Policy {
    /// The restrictive baseline a sub-workflow starts from when it does not
    /// inherit the parent policy: read-only tools, no commands, small files.
    pub fn restricted() -> Self {
        Self {
            allow_tools: ["READ_FILE", "SEARCH"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            allow_commands: BTreeSet::new(),
            require_approval: false,
            max_file_bytes: RESTRICTED_MAX_FILE_BYTES,
        }
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.allow_tools.contains(name)
    }

    pub fn allows_command(&self, cmd: &str) -> bool {
        self.allow_commands.contains(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_all_tools_no_commands() {
        let policy = Policy::default();
        for name in Action::all_names() {
            assert!(policy.allows_tool(name), "{name} should be allowed");
        }
        assert!(!policy.allows_command("rm"));
        assert!(!policy.require_approval);
        assert_eq!(policy.max_file_bytes, DEFAULT_MAX_FILE_BYTES);
    }

    #[test]
    fn test_restricted_baseline() {
        let policy = Policy::restricted();
        assert!(policy.allows_tool("READ_FILE"));
        assert!(policy.allows_tool("SEARCH"));
        assert!(!policy.allows_tool("WRITE_FILE"));
        assert!(!policy.allows_tool("RUN_CMD"));
        assert_eq!(policy.max_file_bytes, RESTRICTED_MAX_FILE_BYTES);
    }

    #[test]
    fn test_policy_wire_names_camel_case() {
        let encoded = serde_json::to_value(Policy::default()).unwrap();
        assert!(encoded.get("allowTools").is_some());
        assert!(encoded.get("allowCommands").is_some());
        assert!(encoded.get("requireApproval").is_some());
        assert!(encoded.get("maxFileBytes").is_some());
    }
}
