//! Keying and workspace-name model (C1).
//!
//! The canonical wire form of a key is `workspace|name` for cluster-scoped
//! resources and `workspace|namespace/name` for namespaced ones. `|` and `/`
//! are reserved separators and may not appear inside a workspace, namespace
//! or name component.

use crate::error::{Error, ErrorKind};
use std::fmt;

/// An opaque workspace identifier. The empty value is invalid wherever a
/// controller requires one, but `WorkspaceName` itself does not enforce
/// that — callers validate at the point they need a non-empty workspace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct WorkspaceName(pub String);

impl WorkspaceName {
    /// Returns true if this is the empty workspace name.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceName {
    fn from(s: &str) -> Self {
        WorkspaceName(s.to_string())
    }
}

impl From<String> for WorkspaceName {
    fn from(s: String) -> Self {
        WorkspaceName(s)
    }
}

/// The parsed form of a canonical key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    /// Logical workspace the key is scoped to.
    pub workspace: String,
    /// Namespace, empty for cluster-scoped resources.
    pub namespace: String,
    /// Resource name.
    pub name: String,
}

/// Builds the canonical key form `workspace|name` or `workspace|namespace/name`.
pub fn make_key(workspace: &str, namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("{workspace}|{name}")
    } else {
        format!("{workspace}|{namespace}/{name}")
    }
}

/// Inverts [`make_key`]. Fails with [`ErrorKind::InvalidInput`] if the `|`
/// separator is missing, or if the workspace or name half is empty.
pub fn parse_key(key: &str) -> Result<ParsedKey, Error> {
    let Some((workspace, rest)) = key.split_once('|') else {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("invalid key {key:?}: missing '|' separator"),
        ));
    };
    if workspace.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("invalid key {key:?}: empty workspace"),
        ));
    }
    if rest.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("invalid key {key:?}: empty name"),
        ));
    }
    let (namespace, name) = match rest.split_once('/') {
        Some((ns, n)) => (ns, n),
        None => ("", rest),
    };
    if name.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("invalid key {key:?}: empty name"),
        ));
    }
    Ok(ParsedKey {
        workspace: workspace.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

/// Prefix glued onto every physical-cluster-safe name produced by
/// [`qualify_name`], immediately before the original resource name.
const QUALIFIED_SEPARATOR: &str = "--";

/// Produces a physical-cluster-safe name: lowercase the workspace, replace
/// any character outside `[a-z0-9-]` with `-`, and concatenate
/// `{sanitized}--{name}`.
pub fn qualify_name(workspace: &str, name: &str) -> String {
    let sanitized: String = workspace
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' })
        .collect();
    format!("{sanitized}{QUALIFIED_SEPARATOR}{name}")
}

/// Inverts [`qualify_name`]: strips the sanitized-workspace prefix and
/// `--` separator, returning the original resource name. Returns `None`
/// if `qualified` does not contain the separator.
pub fn extract_original_name(qualified: &str) -> Option<&str> {
    qualified.split_once(QUALIFIED_SEPARATOR).map(|(_, name)| name)
}

/// True if `candidate` looks like the output of [`qualify_name`], i.e.
/// contains the `--` workspace/name separator.
pub fn is_workspace_resource(candidate: &str) -> bool {
    candidate.contains(QUALIFIED_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_and_parse_cluster_scoped() {
        let key = make_key("root:org:ws", "", "res");
        assert_eq!(key, "root:org:ws|res");
        let parsed = parse_key(&key).unwrap();
        assert_eq!(parsed.workspace, "root:org:ws");
        assert_eq!(parsed.namespace, "");
        assert_eq!(parsed.name, "res");
    }

    #[test]
    fn make_and_parse_namespaced() {
        let key = make_key("root:org:ws", "ns", "res");
        assert_eq!(key, "root:org:ws|ns/res");
        let parsed = parse_key(&key).unwrap();
        assert_eq!(parsed.workspace, "root:org:ws");
        assert_eq!(parsed.namespace, "ns");
        assert_eq!(parsed.name, "res");
    }

    #[test]
    fn s5_scenario_literal() {
        let parsed = parse_key("root:org:ws|ns/res").unwrap();
        assert_eq!(parsed, ParsedKey {
            workspace: "root:org:ws".into(),
            namespace: "ns".into(),
            name: "res".into(),
        });
        let parsed = parse_key("root:org:ws|res").unwrap();
        assert_eq!(parsed, ParsedKey {
            workspace: "root:org:ws".into(),
            namespace: "".into(),
            name: "res".into(),
        });
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(parse_key("no-separator").is_err());
    }

    #[test]
    fn parse_rejects_empty_halves() {
        assert!(parse_key("|name").is_err());
        assert!(parse_key("workspace|").is_err());
        assert!(parse_key("workspace|ns/").is_err());
    }

    #[test]
    fn qualify_roundtrip() {
        let qualified = qualify_name("Root:Org Ws!", "my-deploy");
        assert!(is_workspace_resource(&qualified));
        assert_eq!(extract_original_name(&qualified), Some("my-deploy"));
        assert_eq!(qualified, "root-org-ws---my-deploy");
    }

    #[test]
    fn prop_parse_make_roundtrip() {
        for (workspace, namespace, name) in [
            ("root", "", "foo"),
            ("root:org:ws", "default", "bar"),
            ("a", "b", "c"),
        ] {
            let key = make_key(workspace, namespace, name);
            let parsed = parse_key(&key).unwrap();
            assert_eq!(parsed.workspace, workspace);
            assert_eq!(parsed.namespace, namespace);
            assert_eq!(parsed.name, name);
        }
    }

    #[test]
    fn prop_qualify_extract_roundtrip() {
        for (workspace, name) in [("root:org", "foo"), ("UPPER_CASE", "bar-baz"), ("a.b.c", "name123")] {
            let out = qualify_name(workspace, name);
            assert!(is_workspace_resource(&out));
            assert_eq!(extract_original_name(&out), Some(name));
        }
    }
}
