//! GVR/namespace mapping between logical workspaces and physical clusters
//! (C5, §4.5 NamespaceMapper).

use tmc_core::error::{Error, ErrorKind};

const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

/// Validates a namespace name: non-empty, at most 253 chars, DNS-label
/// characters only (`[a-z0-9-]`), and no leading/trailing `-`.
pub fn validate_namespace(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::new(ErrorKind::InvalidInput, "namespace must not be empty"));
    }
    if name.len() > 253 {
        return Err(Error::new(ErrorKind::InvalidInput, "namespace exceeds 253 characters"));
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err(Error::new(ErrorKind::InvalidInput, format!("namespace {name:?} has invalid characters")));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::new(ErrorKind::InvalidInput, format!("namespace {name:?} has leading/trailing '-'")));
    }
    Ok(())
}

/// Maps physical-cluster namespaces to/from logical-workspace namespace
/// names (§4.5). `InvalidNamespace` (surfaced as [`ErrorKind::InvalidInput`])
/// is returned when a logical name doesn't match any of the generated
/// patterns.
pub struct NamespaceMapper;

impl NamespaceMapper {
    /// `kcp-{target}-{phys}`, except the three `kube-*` system namespaces
    /// (which become `kcp-{target}-system-{suffix}`) and `default` (which
    /// becomes `kcp-{target}-default`).
    pub fn to_logical(phys: &str, target: &str) -> String {
        if let Some(suffix) = SYSTEM_NAMESPACES.iter().find_map(|ns| {
            (*ns == phys).then(|| phys.strip_prefix("kube-").unwrap())
        }) {
            return format!("kcp-{target}-system-{suffix}");
        }
        if phys == "default" {
            return format!("kcp-{target}-default");
        }
        format!("kcp-{target}-{phys}")
    }

    /// Inverts [`NamespaceMapper::to_logical`] exactly.
    pub fn to_physical(logical: &str, target: &str) -> Result<String, Error> {
        let system_prefix = format!("kcp-{target}-system-");
        if let Some(suffix) = logical.strip_prefix(&system_prefix) {
            if SYSTEM_NAMESPACES.iter().any(|ns| ns.strip_prefix("kube-").unwrap() == suffix) {
                return Ok(format!("kube-{suffix}"));
            }
        }
        let default_form = format!("kcp-{target}-default");
        if logical == default_form {
            return Ok("default".to_string());
        }
        let general_prefix = format!("kcp-{target}-");
        if let Some(phys) = logical.strip_prefix(&general_prefix) {
            if !phys.is_empty() {
                return Ok(phys.to_string());
            }
        }
        Err(Error::new(
            ErrorKind::InvalidInput,
            format!("logical namespace {logical:?} does not match target {target:?}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_namespace_roundtrip() {
        let logical = NamespaceMapper::to_logical("my-app", "cluster-1");
        assert_eq!(logical, "kcp-cluster-1-my-app");
        assert_eq!(NamespaceMapper::to_physical(&logical, "cluster-1").unwrap(), "my-app");
    }

    #[test]
    fn default_namespace_roundtrip() {
        let logical = NamespaceMapper::to_logical("default", "cluster-1");
        assert_eq!(logical, "kcp-cluster-1-default");
        assert_eq!(NamespaceMapper::to_physical(&logical, "cluster-1").unwrap(), "default");
    }

    #[test]
    fn system_namespace_roundtrip() {
        for ns in SYSTEM_NAMESPACES {
            let logical = NamespaceMapper::to_logical(ns, "cluster-1");
            assert!(logical.starts_with("kcp-cluster-1-system-"));
            assert_eq!(&NamespaceMapper::to_physical(&logical, "cluster-1").unwrap(), ns);
        }
    }

    #[test]
    fn to_physical_rejects_mismatched_target() {
        let logical = NamespaceMapper::to_logical("my-app", "cluster-1");
        assert!(NamespaceMapper::to_physical(&logical, "cluster-2").is_err());
    }

    #[test]
    fn validation_rules() {
        assert!(validate_namespace("my-ns").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("-leading").is_err());
        assert!(validate_namespace("trailing-").is_err());
        assert!(validate_namespace("Has_Upper").is_err());
        assert!(validate_namespace(&"a".repeat(254)).is_err());
    }
}
