//! Filter types for tier search operations
//!
//! One filter value is shared by every tier. The hot tier applies
//! [`SearchFilter::matches`] client-side. The warm tier pushes the filter into
//! SQL and trusts the result. The cold tier pushes a Lance predicate and
//! re-checks rows with `matches`.

use sqlx::{QueryBuilder, Sqlite};

use crate::memory::MemoryEntry;

/// Filter criteria for search operations.
///
/// All fields are optional. Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Entry must carry every one of these tags
    pub tags: Vec<String>,
    /// Minimum access count (inclusive)
    pub min_access_count: Option<u64>,
    /// Exact origin label
    pub source: Option<String>,
}

impl SearchFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_min_access_count(mut self, min: u64) -> Self {
        self.min_access_count = Some(min);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.min_access_count.is_none() && self.source.is_none()
    }

    /// Client-side evaluation, used by tiers without server-side filtering
    /// and as the final check everywhere else.
    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        let meta = &entry.metadata;
        if !self.tags.iter().all(|t| meta.tags.contains(t)) {
            return false;
        }
        if let Some(min) = self.min_access_count {
            if meta.access_count < min {
                return false;
            }
        }
        if let Some(ref source) = self.source {
            if &meta.source != source {
                return false;
            }
        }
        true
    }

    /// Build a LanceDB SQL predicate. Tags are stored as `,a,b,` so a single
    /// tag matches with `LIKE '%,a,%'`. Returns `None` if no filters are set.
    pub fn to_lance_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        for tag in &self.tags {
            conditions.push(format!("tags LIKE '%,{},%'", escape_sql_literal(tag)));
        }

        if let Some(min) = self.min_access_count {
            conditions.push(format!("access_count >= {min}"));
        }

        if let Some(ref source) = self.source {
            conditions.push(format!("source = '{}'", escape_sql_literal(source)));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }

    /// Append bound `AND …` conditions to a SQLite query whose row has `tags`
    /// (JSON array), `access_count` and `source` columns.
    pub fn push_sqlite_conditions(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        for tag in &self.tags {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(tags) WHERE json_each.value = ")
                .push_bind(tag.clone())
                .push(")");
        }

        if let Some(min) = self.min_access_count {
            builder
                .push(" AND access_count >= ")
                .push_bind(i64::try_from(min).unwrap_or(i64::MAX));
        }

        if let Some(ref source) = self.source {
            builder.push(" AND source = ").push_bind(source.clone());
        }
    }
}

/// Double single quotes for embedding a value in a SQL string literal.
pub(crate) fn escape_sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Lance stores tags as one delimited string so `LIKE` can match members.
pub(crate) fn encode_tag_column<'a>(tags: impl IntoIterator<Item = &'a String>) -> String {
    let mut out = String::from(",");
    for tag in tags {
        out.push_str(tag);
        out.push(',');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let filter = SearchFilter::new();
        assert!(filter.is_empty());
        assert!(filter.to_lance_clause().is_none());
        assert!(filter.matches(&MemoryEntry::new("k", "v")));
    }

    #[test]
    fn test_tags_require_all() {
        let entry = MemoryEntry::new("k", "v").with_tags(["a", "b"]);

        assert!(SearchFilter::new().with_tag("a").matches(&entry));
        assert!(SearchFilter::new().with_tag("a").with_tag("b").matches(&entry));
        assert!(!SearchFilter::new().with_tag("a").with_tag("c").matches(&entry));
    }

    #[test]
    fn test_min_access_count_and_source() {
        let mut entry = MemoryEntry::new("k", "v").with_source("api");
        entry.mark_accessed();
        entry.mark_accessed();

        assert!(SearchFilter::new().with_min_access_count(2).matches(&entry));
        assert!(!SearchFilter::new().with_min_access_count(3).matches(&entry));
        assert!(SearchFilter::new().with_source("api").matches(&entry));
        assert!(!SearchFilter::new().with_source("chat").matches(&entry));
    }

    #[test]
    fn test_lance_clause() {
        let filter = SearchFilter::new()
            .with_tag("chat")
            .with_min_access_count(3)
            .with_source("o'brien");

        let clause = filter.to_lance_clause().unwrap();
        assert_eq!(
            clause,
            "tags LIKE '%,chat,%' AND access_count >= 3 AND source = 'o''brien'"
        );
    }

    #[test]
    fn test_sqlite_conditions() {
        let filter = SearchFilter::new().with_tag("x").with_source("api");
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT key FROM t WHERE 1 = 1");
        filter.push_sqlite_conditions(&mut builder);

        let sql = builder.sql();
        assert!(sql.contains("json_each(tags)"));
        assert!(sql.contains("AND source = ?"));
    }

    #[test]
    fn test_encode_tag_column() {
        let tags = ["a".to_string(), "b".to_string()];
        assert_eq!(encode_tag_column(tags.iter()), ",a,b,");
        assert_eq!(encode_tag_column(std::iter::empty()), ",");
    }
}
