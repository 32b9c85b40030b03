use crate::error::{DbError, DbResult};

use super::lexer::is_valid_field;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    pub fn direction(&self) -> &'static str {
        if self.descending {
            "DESC"
        } else {
            "ASC"
        }
    }
}

/// Parse `name,-born` into sort keys, first key primary. Empty entries
/// are skipped; a field outside the field grammar is rejected.
pub fn parse_sort(fields: &str) -> DbResult<Vec<SortKey>> {
    let mut keys = Vec::new();
    for entry in fields.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (field, descending) = match entry.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (entry, false),
        };
        if !is_valid_field(field) {
            return Err(DbError::MalformedFilter(format!(
                "invalid sort field '{}'",
                entry
            )));
        }
        keys.push(SortKey {
            field: field.to_string(),
            descending,
        });
    }
    Ok(keys)
}
