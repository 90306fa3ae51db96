//! Declarations scraped from generated Java sources
//!
//! Feeds the import index and class signature registry without keeping
//! whole files in session memory.

use lazy_static::lazy_static;
use regex::Regex;

use crate::dependency::TaskLayer;

/// Public member lines kept in a signature
const MAX_MEMBER_LINES: usize = 20;

lazy_static! {
    static ref PACKAGE: Regex =
        Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;").expect("package pattern");
    static ref TYPE_DECL: Regex = Regex::new(
        r"(?m)^\s*(?:@\w+(?:\([^)]*\))?\s+)*public\s+(?:abstract\s+|final\s+)*(class|interface|enum|record)\s+(\w+)[^{]*"
    )
    .expect("type declaration pattern");
    static ref MEMBER: Regex = Regex::new(
        r"(?m)^\s*public\s+(?:static\s+|final\s+|abstract\s+|default\s+)*[\w<>\[\],.? ]+\s+\w+\s*\([^)]*\)[^{;]*"
    )
    .expect("member pattern");
}

/// The public top-level type declared by one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredType {
    pub package: Option<String>,
    pub name: String,
    /// Declaration line followed by public member signatures
    pub signature: String,
}

impl DeclaredType {
    /// Import path, e.g. `com.acme.entity.UserEntity`
    pub fn qualified_name(&self) -> String {
        match &self.package {
            Some(package) => format!("{}.{}", package, self.name),
            None => self.name.clone(),
        }
    }
}

/// Extract the public top-level type from `source`, if any
pub fn declared_type(source: &str) -> Option<DeclaredType> {
    let decl = TYPE_DECL.captures(source)?;
    let name = decl.get(2)?.as_str().to_string();
    let header = decl.get(0)?.as_str().trim();
    let header = header
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('@'))
        .collect::<Vec<_>>()
        .join(" ");

    let body_start = decl.get(0)?.end();
    let members: Vec<String> = MEMBER
        .find_iter(&source[body_start..])
        .take(MAX_MEMBER_LINES)
        .map(|m| format!("    {};", m.as_str().trim()))
        .collect();

    let mut signature = header;
    if !members.is_empty() {
        signature.push_str(" {\n");
        signature.push_str(&members.join("\n"));
        signature.push_str("\n}");
    }

    Some(DeclaredType {
        package: PACKAGE
            .captures(source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string()),
        name,
        signature,
    })
}

/// Task type for a generated file: the layer named by its directory or
/// class suffix, `other` when neither matches.
pub fn task_type_for(path: &str, class_name: &str) -> String {
    let lowered = path.to_ascii_lowercase();
    TaskLayer::ALL
        .iter()
        .find(|layer| {
            lowered.contains(&format!("/{}/", layer.as_str()))
                || class_name.ends_with(layer.class_suffix())
        })
        .map(|layer| layer.as_str().to_string())
        .unwrap_or_else(|| "other".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = r#"
package com.acme.service;

import com.acme.entity.UserEntity;

@Service
public class UserService implements BaseService<UserEntity> {
    private final UserMapper mapper;

    public UserEntity findById(Long id) {
        return mapper.selectById(id);
    }

    public List<UserEntity> list() { return mapper.selectList(null); }

    private void helper() {}
}
"#;

    #[test]
    fn test_declared_type() {
        let decl = declared_type(SERVICE).unwrap();
        assert_eq!(decl.name, "UserService");
        assert_eq!(decl.qualified_name(), "com.acme.service.UserService");
        assert!(decl
            .signature
            .starts_with("public class UserService implements BaseService<UserEntity>"));
        assert!(decl.signature.contains("public UserEntity findById(Long id);"));
        assert!(decl.signature.contains("public List<UserEntity> list();"));
        assert!(!decl.signature.contains("helper"));
    }

    #[test]
    fn test_interface_without_package() {
        let decl = declared_type("public interface UserMapper extends BaseMapper<User> {}").unwrap();
        assert_eq!(decl.qualified_name(), "UserMapper");
        assert_eq!(decl.signature, "public interface UserMapper extends BaseMapper<User>");
        assert!(declared_type("class Hidden {}").is_none());
    }

    #[test]
    fn test_task_type_for() {
        assert_eq!(task_type_for("src/main/java/com/acme/entity/User.java", "User"), "entity");
        assert_eq!(task_type_for("src/App.java", "UserController"), "controller");
        assert_eq!(task_type_for("pom.xml", "pom"), "other");
    }
}
