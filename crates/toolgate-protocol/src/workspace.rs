//! Workspace identity and capability flags.

use crate::ids::WorkspaceId;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Capability flags set when a workspace is created.
///
/// The policy engine treats these as read-only input. Changing them means
/// building a new engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspacePermissions {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
    pub network: bool,
    pub shell: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_paths: Option<Vec<PathBuf>>,
    pub unrestricted_file_access: bool,
}

impl Default for WorkspacePermissions {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            delete: false,
            network: true,
            shell: false,
            allowed_domains: None,
            allowed_paths: None,
            unrestricted_file_access: false,
        }
    }
}

impl WorkspacePermissions {
    /// Every capability enabled, no allow-lists.
    pub fn full() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
            network: true,
            shell: true,
            allowed_domains: None,
            allowed_paths: None,
            unrestricted_file_access: false,
        }
    }

    /// Every capability disabled.
    pub fn none() -> Self {
        Self {
            read: false,
            write: false,
            delete: false,
            network: false,
            shell: false,
            allowed_domains: None,
            allowed_paths: None,
            unrestricted_file_access: false,
        }
    }

    /// Whether `path` falls under `allowed_paths`.
    ///
    /// Without an allow-list (or with `unrestricted_file_access`) every path
    /// is allowed. Paths containing `..` are never matched against the list.
    pub fn is_path_allowed(&self, path: &Path) -> bool {
        if self.unrestricted_file_access {
            return true;
        }
        let Some(allowed) = self.allowed_paths.as_ref() else {
            return true;
        };
        if path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return false;
        }
        allowed.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// A permissioned execution scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    #[serde(default)]
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub is_temp: bool,
    #[serde(default)]
    pub permissions: WorkspacePermissions,
}

impl Workspace {
    pub fn new(id: impl Into<WorkspaceId>, path: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            path: path.into(),
            is_temp: false,
            permissions: WorkspacePermissions::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: WorkspacePermissions) -> Self {
        self.permissions = permissions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_permissions_fill_from_defaults() {
        let permissions: WorkspacePermissions =
            serde_json::from_str(r#"{"shell": true, "delete": true}"#).unwrap();
        assert!(permissions.shell);
        assert!(permissions.delete);
        assert!(permissions.read);
        assert!(!permissions.unrestricted_file_access);
    }

    #[test]
    fn path_allow_list() {
        let permissions = WorkspacePermissions {
            allowed_paths: Some(vec![PathBuf::from("/work/project")]),
            ..WorkspacePermissions::default()
        };
        assert!(permissions.is_path_allowed(Path::new("/work/project/src/main.rs")));
        assert!(!permissions.is_path_allowed(Path::new("/etc/passwd")));
        assert!(!permissions.is_path_allowed(Path::new("/work/project/../secrets")));

        let unrestricted = WorkspacePermissions {
            unrestricted_file_access: true,
            ..permissions
        };
        assert!(unrestricted.is_path_allowed(Path::new("/etc/passwd")));
    }

    #[test]
    fn workspace_builder() {
        let workspace = Workspace::new("ws", "/tmp/ws").with_permissions(WorkspacePermissions::none());
        assert_eq!(workspace.name, "ws");
        assert!(!workspace.permissions.read);
    }
}
