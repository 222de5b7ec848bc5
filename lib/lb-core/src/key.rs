//! `namespace/name` object keys

use crate::{CoreError, Result};

/// Split a key into its namespace (absent for cluster scoped objects) and name
pub fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((None, *name)),
        [ns, name] if !name.is_empty() => Ok(((!ns.is_empty()).then_some(*ns), *name)),
        _ => Err(CoreError::InvalidKey(key.to_string())),
    }
}

pub fn join_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("default/web"), Ok((Some("default"), "web")));
        assert_eq!(split_key("node-1"), Ok((None, "node-1")));
        assert!(split_key("a/b/c").is_err());
        assert!(split_key("default/").is_err());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key(Some("default"), "web"), "default/web");
        assert_eq!(join_key(None, "node-1"), "node-1");
    }
}
