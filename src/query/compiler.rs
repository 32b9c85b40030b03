//! Compiles scanned filter tokens, sort keys and pagination into a
//! parameterized AQL query.
//!
//! Caller-supplied field names and values never reach the query text: each
//! field becomes a `key_i` attribute bind parameter (`doc.@key_i`), each
//! value a `val_i` bind parameter, each sort field a `sort_i` bind
//! parameter and the collection the `@@collection` collection parameter.
//! The text itself is assembled only from fixed lexemes.

use serde_json::Value;

use crate::error::{DbError, DbResult};

use super::lexer::{FilterToken, Operator, Separator};
use super::sort::SortKey;

pub type BindVars = serde_json::Map<String, Value>;

/// Key of the `@@collection` parameter inside the bind vars object.
pub const COLLECTION_PARAM: &str = "@collection";
pub const SKIP_PARAM: &str = "skip";
pub const LIMIT_PARAM: &str = "limit";

/// One `field OP value` test inside a clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    /// Bind parameter holding the attribute name (`key_i`)
    pub field_param: String,
    /// Bind parameter holding the value (`val_i`)
    pub value_param: String,
    pub negated: bool,
}

/// A filter clause in disjunctive form: the groups are OR-ed, the
/// predicates inside a group AND-ed. Clauses of a plan are AND-ed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterClause {
    pub any_of: Vec<Vec<Predicate>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminal {
    /// `RETURN doc`
    #[default]
    Return,
    /// Remove every matched document and return its system attributes.
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub collection: String,
    pub filters: Vec<FilterClause>,
    pub sort: Vec<SortKey>,
    pub skip: u64,
    pub limit: Option<u64>,
    pub full_count: bool,
    pub terminal: Terminal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub plan: QueryPlan,
    pub aql: String,
    pub bind_vars: BindVars,
}

impl CompiledQuery {
    pub fn bind_var(&self, name: &str) -> Option<&Value> {
        self.bind_vars.get(name)
    }
}

/// `skip = (page - 1) * max_results`; pages are one-indexed.
pub fn skip_for(page: Option<u32>, max_results: u32) -> u64 {
    match page {
        Some(page) if page >= 1 => u64::from(page - 1) * u64::from(max_results),
        _ => 0,
    }
}

/// Compile one `find` request against `collection`.
pub fn compile(
    tokens: &[FilterToken],
    sort: &[SortKey],
    page: Option<u32>,
    max_results: u32,
    collection: &str,
) -> DbResult<CompiledQuery> {
    QueryBuilder::new(collection)
        .filter(tokens.to_vec())
        .sort(sort.to_vec())
        .paginate(page, max_results)
        .build()
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    collection: String,
    groups: Vec<Vec<FilterToken>>,
    sort: Vec<SortKey>,
    page: Option<u32>,
    max_results: Option<u32>,
    full_count: bool,
    terminal: Terminal,
}

impl QueryBuilder {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            groups: Vec::new(),
            sort: Vec::new(),
            page: None,
            max_results: None,
            full_count: true,
            terminal: Terminal::Return,
        }
    }

    /// Add a scanned filter. Separate calls are AND-ed as distinct clauses.
    pub fn filter(mut self, tokens: Vec<FilterToken>) -> Self {
        if !tokens.is_empty() {
            self.groups.push(tokens);
        }
        self
    }

    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.sort = keys;
        self
    }

    pub fn paginate(mut self, page: Option<u32>, max_results: u32) -> Self {
        self.page = page;
        self.max_results = Some(max_results);
        self
    }

    pub fn full_count(mut self, enabled: bool) -> Self {
        self.full_count = enabled;
        self
    }

    pub fn remove(mut self) -> Self {
        self.terminal = Terminal::Remove;
        self
    }

    pub fn build(self) -> DbResult<CompiledQuery> {
        if self.max_results == Some(0) {
            return Err(DbError::ConfigError(
                "max_results must be at least 1".to_string(),
            ));
        }

        let mut bind_vars = BindVars::new();
        bind_vars.insert(
            COLLECTION_PARAM.to_string(),
            Value::String(self.collection.clone()),
        );

        let mut filters = Vec::new();
        let mut index = 0usize;
        for group in &self.groups {
            let mut clause = FilterClause::default();
            let mut conjunction: Vec<Predicate> = Vec::new();
            let mut joiner = Separator::None;

            for token in group {
                token.validate()?;

                let field_param = format!("key_{}", index);
                let value_param = format!("val_{}", index);
                index += 1;
                bind_vars.insert(field_param.clone(), Value::String(token.field.clone()));
                bind_vars.insert(value_param.clone(), token.value.to_json());

                let predicate = Predicate {
                    field: token.field.clone(),
                    operator: token.operator,
                    field_param,
                    value_param,
                    negated: joiner == Separator::Not,
                };

                match joiner {
                    Separator::And | Separator::Not => conjunction.push(predicate),
                    Separator::Or => {
                        clause.any_of.push(std::mem::take(&mut conjunction));
                        conjunction.push(predicate);
                    }
                    Separator::None | Separator::Comma => {
                        if !conjunction.is_empty() {
                            clause.any_of.push(std::mem::take(&mut conjunction));
                            filters.push(std::mem::take(&mut clause));
                        }
                        conjunction.push(predicate);
                    }
                }
                joiner = token.separator;
            }

            if !conjunction.is_empty() {
                clause.any_of.push(conjunction);
            }
            if !clause.any_of.is_empty() {
                filters.push(clause);
            }
        }

        for (i, key) in self.sort.iter().enumerate() {
            bind_vars.insert(format!("sort_{}", i), Value::String(key.field.clone()));
        }

        let limit = self.max_results.map(u64::from);
        let skip = self
            .max_results
            .map(|max| skip_for(self.page, max))
            .unwrap_or(0);
        if let Some(limit) = limit {
            bind_vars.insert(SKIP_PARAM.to_string(), Value::from(skip));
            bind_vars.insert(LIMIT_PARAM.to_string(), Value::from(limit));
        }

        let plan = QueryPlan {
            collection: self.collection,
            filters,
            sort: self.sort,
            skip,
            limit,
            full_count: self.full_count && limit.is_some(),
            terminal: self.terminal,
        };
        let aql = render_aql(&plan);

        tracing::debug!(
            "Compiled AQL ({} filter clauses, {} bind vars): {}",
            plan.filters.len(),
            bind_vars.len(),
            aql.replace('\n', " ")
        );

        Ok(CompiledQuery {
            plan,
            aql,
            bind_vars,
        })
    }
}

fn render_predicate(p: &Predicate) -> String {
    let test = format!("(doc.@{} {} @{})", p.field_param, p.operator, p.value_param);
    if p.negated {
        format!("NOT {}", test)
    } else {
        test
    }
}

fn render_clause(clause: &FilterClause) -> String {
    let several = clause.any_of.len() > 1;
    clause
        .any_of
        .iter()
        .map(|group| {
            let joined = group
                .iter()
                .map(render_predicate)
                .collect::<Vec<_>>()
                .join(" AND ");
            if several && group.len() > 1 {
                format!("({})", joined)
            } else {
                joined
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Render the AQL text. Only parameter names and fixed keywords appear.
pub fn render_aql(plan: &QueryPlan) -> String {
    let mut parts = vec!["FOR doc IN @@collection".to_string()];

    for clause in &plan.filters {
        parts.push(format!("  FILTER {}", render_clause(clause)));
    }

    if !plan.sort.is_empty() {
        let items: Vec<String> = plan
            .sort
            .iter()
            .enumerate()
            .map(|(i, key)| format!("doc.@sort_{} {}", i, key.direction()))
            .collect();
        parts.push(format!("  SORT {}", items.join(", ")));
    }

    if plan.limit.is_some() {
        parts.push(format!("  LIMIT @{}, @{}", SKIP_PARAM, LIMIT_PARAM));
    }

    match plan.terminal {
        Terminal::Return => parts.push("  RETURN doc".to_string()),
        Terminal::Remove => {
            parts.push("  REMOVE doc IN @@collection".to_string());
            parts.push("  RETURN KEEP(OLD, \"_key\", \"_id\", \"_rev\")".to_string());
        }
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::lexer::{scan, Literal};
    use crate::query::sort::parse_sort;
    use serde_json::json;

    fn compile_where(filter: &str) -> CompiledQuery {
        compile(&scan(filter).unwrap(), &[], Some(1), 25, "musicians").unwrap()
    }

    #[test]
    fn test_single_clause() {
        let query = compile_where(r#"name=="Bill Evans""#);
        assert_eq!(
            query.aql,
            "FOR doc IN @@collection\n  FILTER (doc.@key_0 == @val_0)\n  LIMIT @skip, @limit\n  RETURN doc"
        );
        assert_eq!(query.bind_var("@collection"), Some(&json!("musicians")));
        assert_eq!(query.bind_var("key_0"), Some(&json!("name")));
        assert_eq!(query.bind_var("val_0"), Some(&json!("Bill Evans")));
        assert_eq!(query.bind_var("skip"), Some(&json!(0)));
        assert_eq!(query.bind_var("limit"), Some(&json!(25)));
    }

    #[test]
    fn test_bind_vars_reproduce_source_literals() {
        let filter = r#"name=="Miles Davis" OR name=="Bill Evans", born>=1920 AND rating IN [4, 4.5], note==null"#;
        let tokens = scan(filter).unwrap();
        let query = compile(&tokens, &[], None, 10, "musicians").unwrap();

        for (i, token) in tokens.iter().enumerate() {
            assert_eq!(
                query.bind_var(&format!("key_{}", i)),
                Some(&json!(token.field))
            );
            assert_eq!(
                query.bind_var(&format!("val_{}", i)),
                Some(&token.value.to_json())
            );
        }
        assert_eq!(query.bind_var("val_0"), Some(&json!("Miles Davis")));
        assert_eq!(query.bind_var("val_3"), Some(&json!([4, 4.5])));
        assert_eq!(query.bind_var("val_4"), Some(&Value::Null));
    }

    #[test]
    fn test_clause_layout() {
        let query = compile_where(r#"a==1 OR b==2, c==3 AND d==4 NOT e==5"#);
        assert_eq!(query.plan.filters.len(), 2);
        assert_eq!(query.plan.filters[0].any_of.len(), 2);
        assert_eq!(query.plan.filters[1].any_of.len(), 1);
        assert_eq!(query.plan.filters[1].any_of[0].len(), 3);
        assert!(query.plan.filters[1].any_of[0][2].negated);

        assert!(query
            .aql
            .contains("FILTER (doc.@key_0 == @val_0) OR (doc.@key_1 == @val_1)\n"));
        assert!(query.aql.contains(
            "FILTER (doc.@key_2 == @val_2) AND (doc.@key_3 == @val_3) AND NOT (doc.@key_4 == @val_4)\n"
        ));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let query = compile_where("a==1 AND b==2 OR c==3");
        let clause = &query.plan.filters[0];
        assert_eq!(clause.any_of.len(), 2);
        assert_eq!(clause.any_of[0].len(), 2);
        assert!(query.aql.contains(
            "FILTER ((doc.@key_0 == @val_0) AND (doc.@key_1 == @val_1)) OR (doc.@key_2 == @val_2)"
        ));
    }

    #[test]
    fn test_empty_filter() {
        let query = compile(&[], &[], None, 25, "musicians").unwrap();
        assert!(query.plan.filters.is_empty());
        assert!(!query.aql.contains("FILTER"));
    }

    #[test]
    fn test_sort_is_parameterized_in_order() {
        let sort = parse_sort("name,-born").unwrap();
        let query = compile(&[], &sort, None, 25, "musicians").unwrap();
        assert!(query.aql.contains("SORT doc.@sort_0 ASC, doc.@sort_1 DESC"));
        assert_eq!(query.bind_var("sort_0"), Some(&json!("name")));
        assert_eq!(query.bind_var("sort_1"), Some(&json!("born")));
    }

    #[test]
    fn test_pagination() {
        for page in 1..=5u32 {
            for max in [1u32, 3, 25] {
                let query = compile(&[], &[], Some(page), max, "c").unwrap();
                assert_eq!(query.plan.skip, u64::from((page - 1) * max));
                assert_eq!(query.plan.limit, Some(u64::from(max)));
            }
        }
        assert_eq!(skip_for(None, 10), 0);
        assert_eq!(skip_for(Some(0), 10), 0);
        assert_eq!(skip_for(Some(1), 10), 0);
        assert_eq!(skip_for(Some(3), 10), 20);
    }

    #[test]
    fn test_zero_max_results_is_a_configuration_error() {
        assert!(matches!(
            compile(&[], &[], Some(1), 0, "c"),
            Err(DbError::ConfigError(_))
        ));
    }

    #[test]
    fn test_full_count_requested() {
        let query = compile(&[], &[], Some(2), 1, "c").unwrap();
        assert!(query.plan.full_count);
    }

    #[test]
    fn test_caller_text_never_reaches_query() {
        let hostile_field = "name) || true || (x";
        let hostile_value = "\" || 1 == 1 || \"";
        let tokens = vec![
            FilterToken::new(
                hostile_field,
                Operator::Equal,
                Literal::String(hostile_value.to_string()),
            ),
            FilterToken::new("safe", Operator::Like, Literal::String("%RETURN%".into())),
        ];
        let sort = vec![SortKey::desc("x RETURN 1")];
        let query = compile(&tokens, &sort, Some(1), 5, "users REMOVE").unwrap();

        assert!(!query.aql.contains(hostile_field));
        assert!(!query.aql.contains(hostile_value));
        assert!(!query.aql.contains("%RETURN%"));
        assert!(!query.aql.contains("x RETURN 1"));
        assert!(!query.aql.contains("users"));
        assert_eq!(query.bind_var("key_0"), Some(&json!(hostile_field)));
    }

    #[test]
    fn test_rejects_incompatible_tokens_before_rendering() {
        let tokens = vec![FilterToken::new(
            "tags",
            Operator::In,
            Literal::String("x".to_string()),
        )];
        assert!(matches!(
            compile(&tokens, &[], None, 5, "c"),
            Err(DbError::MalformedFilter(_))
        ));
    }

    #[test]
    fn test_builder_groups_are_separate_clauses() {
        let base = scan("active==1 OR legacy==1").unwrap();
        let request = scan("name==\"x\"").unwrap();
        let query = QueryBuilder::new("c")
            .filter(base)
            .filter(request)
            .paginate(None, 10)
            .build()
            .unwrap();
        assert_eq!(query.plan.filters.len(), 2);
        assert_eq!(query.bind_var("key_2"), Some(&json!("name")));
    }

    #[test]
    fn test_remove_terminal() {
        let query = QueryBuilder::new("c")
            .filter(scan("_key==\"3\"").unwrap())
            .remove()
            .build()
            .unwrap();
        assert!(query.aql.contains("REMOVE doc IN @@collection"));
        assert!(!query.aql.contains("LIMIT"));
        assert!(query.bind_var("limit").is_none());
        assert!(!query.plan.full_count);
    }
}
