//! Query inputs: equality conditions and select options.

use crate::value::Value;

/// Ordered column equality conditions combined with `AND`.
///
/// A [`Value::Null`] renders as `IS NULL` and is never bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    entries: Vec<(String, Value)>,
}

impl Conditions {
    /// Create an empty condition set (matches every row).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition (builder style).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    /// Add an equality condition, replacing an earlier one on the same column.
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    /// Iterate over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Mutable access to the values, keyed by column.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.entries.iter_mut().map(|(c, v)| (c.as_str(), v))
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(c, _)| c.as_str())
    }

    /// Get the value for a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Conditions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut conditions = Conditions::new();
        for (column, value) in iter {
            conditions.push(column, value);
        }
        conditions
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// How a search term is matched against each search field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Case-insensitive `ILIKE '%term%'`.
    #[default]
    Like,
    /// Exact equality.
    Exact,
    /// `to_tsvector(field) @@ to_tsquery(term)`.
    Fulltext,
}

/// A multi-field search block; fields are combined with `OR`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Search {
    pub fields: Vec<String>,
    pub term: String,
    pub mode: SearchMode,
}

impl Search {
    /// Create a `like` search over the given fields.
    pub fn new<I, S>(fields: I, term: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            term: term.into(),
            mode: SearchMode::Like,
        }
    }

    /// Set the match mode.
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    /// A search with no term or no fields adds nothing to the query.
    pub fn is_active(&self) -> bool {
        !self.term.is_empty() && !self.fields.is_empty()
    }

    /// The parameter bound for the term.
    pub fn bound_term(&self) -> Value {
        match self.mode {
            SearchMode::Like => Value::Text(format!("%{}%", self.term)),
            SearchMode::Exact | SearchMode::Fulltext => Value::Text(self.term.clone()),
        }
    }
}

/// Options shaping a select: projection, ordering, paging, search, filter and
/// relations to load eagerly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Projected columns; empty selects `*`.
    pub select: Vec<String>,
    /// Ordering terms, applied in order.
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Relations loaded on every returned record.
    pub include: Vec<String>,
    pub search: Option<Search>,
    /// Extra equality conditions combined with `AND`.
    pub filter: Conditions,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Project the given columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Append an ordering term.
    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Load a relation on every returned record.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.include.push(relation.into());
        self
    }

    pub fn search(mut self, search: Search) -> Self {
        self.search = Some(search);
        self
    }

    /// Add a filter condition.
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push(column, value);
        self
    }

    /// The same options without paging, ordering and projection; used for counts.
    pub fn for_count(&self) -> Self {
        Self {
            search: self.search.clone(),
            filter: self.filter.clone(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions_replace() {
        let conditions = Conditions::new().with("status", "active").with("status", "banned");
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions.get("status"), Some(&Value::Text("banned".into())));
    }

    #[test]
    fn test_search_binding() {
        let like = Search::new(["name"], "ali");
        assert_eq!(like.bound_term(), Value::Text("%ali%".into()));

        let exact = Search::new(["name"], "ali").with_mode(SearchMode::Exact);
        assert_eq!(exact.bound_term(), Value::Text("ali".into()));

        assert!(!Search::new(Vec::<String>::new(), "x").is_active());
        assert!(!Search::new(["name"], "").is_active());
    }

    #[test]
    fn test_for_count_drops_paging() {
        let options = QueryOptions::new()
            .limit(10)
            .offset(20)
            .order_by("name", Direction::Desc)
            .filter("status", "active");
        let count = options.for_count();

        assert_eq!(count.limit, None);
        assert_eq!(count.offset, None);
        assert!(count.order_by.is_empty());
        assert_eq!(count.filter.len(), 1);
    }
}
