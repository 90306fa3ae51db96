//! DDL scanning for table definitions and foreign-key references
//!
//! This is not a SQL parser. It covers the `CREATE TABLE` shapes produced by
//! the architect: optional `IF NOT EXISTS`, quoted or back-ticked names,
//! schema prefixes and inline or table-level `REFERENCES` clauses.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CREATE_TABLE: Regex = Regex::new(
        r#"(?i)CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?([A-Za-z0-9_."`\[\]]+)\s*\("#
    )
    .expect("create table pattern");
    static ref REFERENCES: Regex =
        Regex::new(r"(?i)REFERENCES\s+([^\s(]+)").expect("references pattern");
}

/// A table found in the schema, in discovery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    /// Referenced tables, deduplicated, in textual order. Self references are dropped.
    pub references: Vec<String>,
}

/// Scan `schema` for table definitions.
///
/// Duplicate definitions of the same table merge their references into the
/// first occurrence.
pub fn parse_tables(schema: &str) -> Vec<TableDef> {
    let mut tables: Vec<TableDef> = Vec::new();

    for caps in CREATE_TABLE.captures_iter(schema) {
        let (Some(whole), Some(raw_name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = normalize_table_name(raw_name.as_str());
        if name.is_empty() {
            continue;
        }

        // The match ends right after the opening parenthesis.
        let body = balanced_body(&schema[whole.end()..]);
        let mut references = Vec::new();
        for r in REFERENCES.captures_iter(body) {
            let Some(raw) = r.get(1) else { continue };
            let referenced = normalize_table_name(raw.as_str());
            if referenced.is_empty() || referenced == name || references.contains(&referenced) {
                continue;
            }
            references.push(referenced);
        }

        match tables.iter_mut().find(|t| t.name == name) {
            Some(existing) => {
                for r in references {
                    if !existing.references.contains(&r) {
                        existing.references.push(r);
                    }
                }
            }
            None => tables.push(TableDef { name, references }),
        }
    }

    tables
}

/// Text up to the parenthesis that closes the table body.
/// Unbalanced input yields the rest of the text.
fn balanced_body(rest: &str) -> &str {
    let mut depth = 1usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return &rest[..idx];
                }
            }
            _ => {}
        }
    }
    rest
}

/// `public."Order_Items",` -> `order_items`
pub fn normalize_table_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches(|c: char| c == ',' || c == ';');
    let last = trimmed.rsplit('.').next().unwrap_or(trimmed);
    last.chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect::<String>()
        .to_ascii_lowercase()
}

/// `order_items` -> `OrderItems`
pub fn to_pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tables_with_nested_parens() {
        let schema = r#"
            CREATE TABLE IF NOT EXISTS "users" (
                id BIGINT PRIMARY KEY,
                name VARCHAR(64) NOT NULL
            );
            CREATE TABLE orders (
                id BIGINT PRIMARY KEY,
                total DECIMAL(10, 2),
                user_id BIGINT REFERENCES public.users(id)
            );
        "#;
        let tables = parse_tables(schema);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "users");
        assert!(tables[0].references.is_empty());
        assert_eq!(tables[1].name, "orders");
        assert_eq!(tables[1].references, vec!["users".to_string()]);
    }

    #[test]
    fn test_table_level_foreign_key_and_self_reference() {
        let schema = "create table `Category` (id int, parent_id int, \
                      FOREIGN KEY (parent_id) REFERENCES `Category`(id));\n\
                      create table item (id int, category_id int, \
                      constraint fk foreign key (category_id) references category (id));";
        let tables = parse_tables(schema);
        assert_eq!(tables[0].name, "category");
        assert!(tables[0].references.is_empty());
        assert_eq!(tables[1].references, vec!["category".to_string()]);
    }

    #[test]
    fn test_normalize_and_pascal_case() {
        assert_eq!(normalize_table_name("public.\"Order_Items\","), "order_items");
        assert_eq!(to_pascal_case("order_items"), "OrderItems");
        assert_eq!(to_pascal_case("users"), "Users");
    }

    #[test]
    fn test_blank_schema() {
        assert!(parse_tables("").is_empty());
        assert!(parse_tables("   \n").is_empty());
    }
}
