use regex::Regex;
use std::sync::LazyLock;

use crate::vulcan::types::{HttpMethod, ParamLocation, ParamType, SqlEndpoint, SqlParam};

static FROM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bfrom\s+(\w+)").unwrap());
static INTO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*insert\s+into\s+(\w+)").unwrap());
static UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^\s*update\s+(\w+)").unwrap());
static WHERE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bwhere\s+(.*?)(?:\s+(?:order|group|limit)\b|\s*;|$)").unwrap()
});
static AND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\s+and\s+").unwrap());
static OPERATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(>=|<=|!=|<>|=|>|<|\blike\b)\s*").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());
static BOOL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(true|false)$").unwrap());

/// Turns a raw SQL string into an endpoint description. Implementations
/// never fail: unrecognized SQL still yields some endpoint.
pub trait HeuristicSqlAnalyzer: Send + Sync {
    fn analyze(&self, sql: &str) -> SqlEndpoint;
}

/// String and regex heuristics only; no tokenizer or grammar.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexSqlAnalyzer;

impl HeuristicSqlAnalyzer for RegexSqlAnalyzer {
    fn analyze(&self, sql: &str) -> SqlEndpoint {
        parse_sql(sql)
    }
}

pub fn parse_sql(sql: &str) -> SqlEndpoint {
    SqlEndpoint {
        path: generate_path(sql),
        method: infer_method(sql),
        sql: sql.to_string(),
        params: extract_params(sql),
    }
}

pub fn infer_method(sql: &str) -> HttpMethod {
    let lowered = sql.trim().to_lowercase();
    if lowered.starts_with("select") {
        HttpMethod::Get
    } else if lowered.starts_with("insert") {
        HttpMethod::Post
    } else if lowered.starts_with("update") {
        HttpMethod::Put
    } else if lowered.starts_with("delete") {
        HttpMethod::Delete
    } else {
        HttpMethod::Get
    }
}

/// `/api/<table>` from the FROM clause; INSERT INTO and UPDATE targets are
/// used when there is none. Bare `/api` otherwise.
pub fn generate_path(sql: &str) -> String {
    let table = FROM_RE
        .captures(sql)
        .or_else(|| INTO_RE.captures(sql))
        .or_else(|| UPDATE_RE.captures(sql))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());

    match table {
        Some(table) => format!("/api/{}", table),
        None => "/api".to_string(),
    }
}

pub fn extract_params(sql: &str) -> Vec<SqlParam> {
    let mut params: Vec<SqlParam> = Vec::new();
    let Some(clause) = WHERE_RE.captures(sql).and_then(|caps| caps.get(1)) else {
        return params;
    };

    for condition in AND_RE.split(clause.as_str()) {
        let Some(op) = OPERATOR_RE.find(condition) else {
            continue;
        };
        let name = condition[..op.start()].trim();
        let value = condition[op.end()..].trim();
        if name.is_empty() || params.iter().any(|p| p.name == name) {
            continue;
        }
        params.push(SqlParam {
            name: name.to_string(),
            param_type: infer_type(value),
            required: true,
            location: ParamLocation::Query,
        });
    }

    params
}

pub fn infer_type(value: &str) -> ParamType {
    if NUMBER_RE.is_match(value) {
        ParamType::Number
    } else if BOOL_RE.is_match(value) {
        ParamType::Boolean
    } else {
        ParamType::String
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, param_type: ParamType) -> SqlParam {
        SqlParam {
            name: name.to_string(),
            param_type,
            required: true,
            location: ParamLocation::Query,
        }
    }

    #[test]
    fn test_select_with_numeric_filter() {
        let endpoint = parse_sql("SELECT * FROM users WHERE id = 5");
        assert_eq!(endpoint.method, HttpMethod::Get);
        assert_eq!(endpoint.path, "/api/users");
        assert_eq!(endpoint.params, vec![param("id", ParamType::Number)]);
        assert_eq!(endpoint.sql, "SELECT * FROM users WHERE id = 5");
    }

    #[test]
    fn test_insert_without_where() {
        let endpoint = parse_sql("INSERT INTO orders (id, total) VALUES (1, 20)");
        assert_eq!(endpoint.method, HttpMethod::Post);
        assert_eq!(endpoint.path, "/api/orders");
        assert!(endpoint.params.is_empty());
    }

    #[test]
    fn test_method_inference() {
        assert_eq!(infer_method("  update t set a = 1"), HttpMethod::Put);
        assert_eq!(infer_method("DELETE FROM t"), HttpMethod::Delete);
        assert_eq!(infer_method("with x as (select 1) select * from x"), HttpMethod::Get);
        assert_eq!(infer_method(""), HttpMethod::Get);
    }

    #[test]
    fn test_update_targets_table() {
        let endpoint = parse_sql("UPDATE accounts SET active = false WHERE id = 3");
        assert_eq!(endpoint.path, "/api/accounts");
        assert_eq!(endpoint.params, vec![param("id", ParamType::Number)]);
    }

    #[test]
    fn test_multiple_conditions_and_types() {
        let endpoint = parse_sql(
            "select name from users where age >= 18 AND active = true and name like 'a%' order by name",
        );
        assert_eq!(
            endpoint.params,
            vec![
                param("age", ParamType::Number),
                param("active", ParamType::Boolean),
                param("name", ParamType::String),
            ]
        );
    }

    #[test]
    fn test_where_stops_at_limit_and_semicolon() {
        let endpoint = parse_sql("SELECT * FROM logs WHERE level = 'warn' LIMIT 10");
        assert_eq!(endpoint.params, vec![param("level", ParamType::String)]);

        let endpoint = parse_sql("SELECT * FROM logs WHERE code != 500;");
        assert_eq!(endpoint.params, vec![param("code", ParamType::Number)]);
    }

    #[test]
    fn test_duplicate_names_kept_once() {
        let endpoint = parse_sql("SELECT * FROM t WHERE a > 1 AND a < 9");
        assert_eq!(endpoint.params, vec![param("a", ParamType::Number)]);
    }

    #[test]
    fn test_unrecognized_sql_degrades_to_bare_get() {
        let endpoint = parse_sql("SHOW TABLES");
        assert_eq!(endpoint.method, HttpMethod::Get);
        assert_eq!(endpoint.path, "/api");
        assert!(endpoint.params.is_empty());
    }

    #[test]
    fn test_condition_without_operator_is_skipped() {
        let endpoint = parse_sql("SELECT * FROM t WHERE flag AND id = 1");
        assert_eq!(endpoint.params, vec![param("id", ParamType::Number)]);
    }

    #[test]
    fn test_analyzer_trait_object() {
        let analyzer: Box<dyn HeuristicSqlAnalyzer> = Box::new(RegexSqlAnalyzer);
        assert_eq!(analyzer.analyze("SELECT 1").path, "/api");
    }
}
