//! Access control lists
//!
//! An ACL is a nested map flattened to dot notation:
//! `{admin: {pages: {edit: true}}}` becomes `admin.pages.edit = true`.
//! A lookup that has no exact rule walks up to the parent action
//! (`admin.pages.edit` → `admin.pages` → `admin`). No rule anywhere means
//! no opinion.
//!
//! Values may also be permission strings such as `"+cr-d"` when letter
//! rules are configured (`c` → `create`, ...).

use flexdb_core::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Default permission letters for CRUD-style ACL strings
pub const CRUD_RULES: &[(char, &str)] = &[
    ('c', "create"),
    ('r', "read"),
    ('u', "update"),
    ('d', "delete"),
    ('l', "list"),
];

/// Flattened access control list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    acl: BTreeMap<String, bool>,
}

impl Access {
    /// Empty ACL: every lookup is `None`
    pub fn new() -> Self {
        Self::default()
    }

    /// ACL from a nested value; non-map values give an empty ACL
    pub fn from_value(value: &Value) -> Self {
        Self::with_rules(value, &[])
    }

    /// ACL from a nested value with permission letter rules
    pub fn with_rules(value: &Value, rules: &[(char, &str)]) -> Self {
        let rules: HashMap<char, &str> = rules.iter().copied().collect();
        let mut acl = BTreeMap::new();
        if let Some(map) = value.as_object() {
            flatten(map, "", &rules, &mut acl);
        }
        Access { acl }
    }

    /// Decision for `scope.action` (or `action` without a scope)
    pub fn authorize(&self, action: &str, scope: Option<&str>) -> Option<bool> {
        match scope {
            Some(scope) if !scope.is_empty() => self.get(&format!("{}.{}", scope, action)),
            _ => self.get(action),
        }
    }

    /// Exact rule, else the nearest parent rule
    pub fn get(&self, action: &str) -> Option<bool> {
        let mut current = action;
        loop {
            if let Some(value) = self.acl.get(current) {
                return Some(*value);
            }
            match current.rfind('.') {
                Some(pos) if pos > 0 => current = &current[..pos],
                _ => return None,
            }
        }
    }

    /// Number of explicit rules
    pub fn len(&self) -> usize {
        self.acl.len()
    }

    /// True when there are no rules
    pub fn is_empty(&self) -> bool {
        self.acl.is_empty()
    }

    /// Explicit rules in dot notation
    pub fn rules(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        self.acl.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn flatten(map: &Map, prefix: &str, rules: &HashMap<char, &str>, out: &mut BTreeMap<String, bool>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten(inner, &path, rules, out),
            Value::String(s) if !rules.is_empty() && parse_flag_str(s).is_none() => {
                for (action, allowed) in resolve_permissions(s, rules) {
                    out.insert(format!("{}.{}", path, action), allowed);
                }
            }
            other => {
                if let Some(flag) = parse_flag(other) {
                    out.insert(path, flag);
                }
            }
        }
    }
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(1) => Some(true),
        Value::Int(0) => Some(false),
        Value::String(s) => parse_flag_str(s),
        _ => None,
    }
}

fn parse_flag_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "yes" | "true" => Some(true),
        "0" | "off" | "no" | "false" => Some(false),
        _ => None,
    }
}

/// `"+cr-d"` → create/read allowed, delete denied
fn resolve_permissions(access: &str, rules: &HashMap<char, &str>) -> Vec<(String, bool)> {
    let mut allowed = true;
    let mut out = Vec::new();
    for letter in access.chars() {
        match letter {
            '+' => allowed = true,
            '-' => allowed = false,
            other => {
                if let Some(action) = rules.get(&other) {
                    out.push((action.to_string(), allowed));
                    allowed = true;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn test_exact_and_parent_lookup() {
        let acl = Access::from_value(&map(&[(
            "admin",
            map(&[("login", Value::Bool(true)), ("pages", map(&[("delete", Value::Bool(false))]))]),
        )]));

        assert_eq!(acl.get("admin.login"), Some(true));
        assert_eq!(acl.get("admin.pages.delete"), Some(false));
        assert_eq!(acl.get("admin.login.extra"), Some(true));
        assert_eq!(acl.get("admin.pages.edit"), None);
        assert_eq!(acl.get("site.login"), None);
    }

    #[test]
    fn test_parent_rule_covers_children() {
        let acl = Access::from_value(&map(&[("admin", map(&[("super", Value::Bool(true))]))]));
        assert_eq!(acl.authorize("super", Some("admin")), Some(true));
        assert_eq!(acl.authorize("admin.super.anything", None), Some(true));
    }

    #[test]
    fn test_flag_coercion() {
        let acl = Access::from_value(&map(&[(
            "site",
            map(&[
                ("a", Value::Int(1)),
                ("b", Value::Int(0)),
                ("c", Value::from("yes")),
                ("d", Value::from("off")),
                ("e", Value::Null),
                ("f", Value::from("maybe")),
            ]),
        )]));
        assert_eq!(acl.get("site.a"), Some(true));
        assert_eq!(acl.get("site.b"), Some(false));
        assert_eq!(acl.get("site.c"), Some(true));
        assert_eq!(acl.get("site.d"), Some(false));
        assert_eq!(acl.get("site.e"), None);
        assert_eq!(acl.get("site.f"), None);
        assert_eq!(acl.len(), 4);
    }

    #[test]
    fn test_permission_strings() {
        let acl = Access::with_rules(&map(&[("pages", Value::from("cr-d"))]), CRUD_RULES);
        assert_eq!(acl.get("pages.create"), Some(true));
        assert_eq!(acl.get("pages.read"), Some(true));
        assert_eq!(acl.get("pages.delete"), Some(false));
        assert_eq!(acl.get("pages.update"), None);
    }

    #[test]
    fn test_non_map_is_empty() {
        assert!(Access::from_value(&Value::Bool(true)).is_empty());
        assert_eq!(Access::new().authorize("login", Some("admin")), None);
    }
}
