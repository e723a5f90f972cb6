// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROS graph resource names.
//!
//! | input    | namespace `/ns`, node `/ns/node` |
//! |----------|----------------------------------|
//! | `/x`     | `/x`                             |
//! | `~x`     | `/ns/node/x`                     |
//! | `x`      | `/ns/x`                          |
//!
//! Remappings are applied after resolution; both sides of a remap are
//! resolved the same way.

use crate::error::{Error, Result};
use std::collections::HashMap;
use tracing::warn;

/// Split a node name (`name` or `ns/name`) into `(namespace, base name)`.
pub fn qualify_node_name(name: &str) -> Result<(String, String)> {
    if name.is_empty() {
        return Err(Error::InvalidName("node name is empty".into()));
    }
    if name.starts_with('~') {
        return Err(Error::InvalidName(format!(
            "node name cannot be private: {}",
            name
        )));
    }
    validate(name)?;

    let (ns, base) = match name.rsplit_once('/') {
        Some((ns, base)) => (ns, base),
        None => ("", name),
    };
    if base.is_empty() {
        return Err(Error::InvalidName(format!(
            "node name ends with '/': {}",
            name
        )));
    }
    Ok((normalize_namespace(ns), base.to_string()))
}

/// Force a leading `/` and strip trailing ones; `""` becomes `/`.
pub fn normalize_namespace(ns: &str) -> String {
    let trimmed = ns.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Join a namespace and a relative name.
pub fn join(ns: &str, name: &str) -> String {
    if ns.ends_with('/') {
        format!("{}{}", ns, name)
    } else {
        format!("{}/{}", ns, name)
    }
}

fn validate(name: &str) -> Result<()> {
    let body = name.strip_prefix('~').unwrap_or(name);
    let mut chars = body.chars();
    if let Some(first) = chars.next() {
        if !(first.is_ascii_alphabetic() || first == '/' || first == '_') {
            return Err(Error::InvalidName(format!(
                "'{}' has an invalid first character",
                name
            )));
        }
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '/')) {
        return Err(Error::InvalidName(format!(
            "'{}' contains invalid character {:?}",
            name, bad
        )));
    }
    Ok(())
}

fn canonicalize(name: &str) -> String {
    let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

/// Resolves names relative to a node and applies remappings.
#[derive(Debug, Clone)]
pub struct NameResolver {
    namespace: String,
    node_name: String,
    remapping: HashMap<String, String>,
}

impl NameResolver {
    /// `node_name` is the fully qualified node name (`/ns/node`).
    ///
    /// Remap entries whose key or value does not resolve are skipped.
    pub fn new(namespace: &str, node_name: &str, remapping: &HashMap<String, String>) -> Self {
        let mut resolver = Self {
            namespace: normalize_namespace(namespace),
            node_name: node_name.to_string(),
            remapping: HashMap::new(),
        };

        let mut resolved = HashMap::with_capacity(remapping.len());
        for (from, to) in remapping {
            match (resolver.resolve(from), resolver.resolve(to)) {
                (Ok(from), Ok(to)) => {
                    resolved.insert(from, to);
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Ignoring remap {}:={}: {}", from, to, e);
                }
            }
        }
        resolver.remapping = resolved;
        resolver
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resolve `name` to a global name without applying remappings.
    pub fn resolve(&self, name: &str) -> Result<String> {
        validate(name)?;
        let absolute = if name.is_empty() {
            self.namespace.clone()
        } else if name.starts_with('/') {
            name.to_string()
        } else if let Some(private) = name.strip_prefix('~') {
            join(&self.node_name, private)
        } else {
            join(&self.namespace, name)
        };
        Ok(canonicalize(&absolute))
    }

    /// Resolve `name`, then apply remappings.
    pub fn remap(&self, name: &str) -> Result<String> {
        let resolved = self.resolve(name)?;
        Ok(self
            .remapping
            .get(&resolved)
            .cloned()
            .unwrap_or(resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_node_name() {
        assert_eq!(
            qualify_node_name("talker").unwrap(),
            ("/".to_string(), "talker".to_string())
        );
        assert_eq!(
            qualify_node_name("/robot/arm/talker").unwrap(),
            ("/robot/arm".to_string(), "talker".to_string())
        );
        assert_eq!(
            qualify_node_name("robot/talker").unwrap(),
            ("/robot".to_string(), "talker".to_string())
        );
        assert!(qualify_node_name("").is_err());
        assert!(qualify_node_name("~talker").is_err());
        assert!(qualify_node_name("robot/").is_err());
        assert!(qualify_node_name("bad name").is_err());
    }

    #[test]
    fn test_resolution_rules() {
        let resolver = NameResolver::new("/ns", "/ns/node", &HashMap::new());
        assert_eq!(resolver.resolve("/chatter").unwrap(), "/chatter");
        assert_eq!(resolver.resolve("chatter").unwrap(), "/ns/chatter");
        assert_eq!(resolver.resolve("~rate").unwrap(), "/ns/node/rate");
        assert_eq!(resolver.resolve("").unwrap(), "/ns");
        assert_eq!(resolver.resolve("a//b/").unwrap(), "/ns/a/b");
        assert!(resolver.resolve("1abc").is_err());
        assert!(resolver.resolve("a-b").is_err());
    }

    #[test]
    fn test_root_namespace() {
        let resolver = NameResolver::new("/", "/node", &HashMap::new());
        assert_eq!(resolver.resolve("chatter").unwrap(), "/chatter");
        assert_eq!(resolver.resolve("~x").unwrap(), "/node/x");
    }

    #[test]
    fn test_remapping_resolves_both_sides() {
        let mut raw = HashMap::new();
        raw.insert("chatter".to_string(), "/talk".to_string());
        raw.insert("~in".to_string(), "camera/image".to_string());
        raw.insert("bad name".to_string(), "/x".to_string());
        let resolver = NameResolver::new("/ns", "/ns/node", &raw);

        assert_eq!(resolver.remap("chatter").unwrap(), "/talk");
        assert_eq!(resolver.remap("/ns/chatter").unwrap(), "/talk");
        assert_eq!(resolver.remap("~in").unwrap(), "/ns/camera/image");
        assert_eq!(resolver.remap("other").unwrap(), "/ns/other");
    }

    #[test]
    fn test_normalize_namespace() {
        assert_eq!(normalize_namespace(""), "/");
        assert_eq!(normalize_namespace("robot/"), "/robot");
        assert_eq!(normalize_namespace("/robot"), "/robot");
    }
}
