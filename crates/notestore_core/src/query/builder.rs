//! SQL fragment builder with positional bind values.

use rusqlite::types::Value;

/// Boolean operator joining sibling predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// SQL text plus the values bound to its `?` placeholders, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    sql: String,
    params: Vec<Value>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Fragment whose text contains exactly one `?` bound to `value`.
    pub fn with_param(sql: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            sql: sql.into(),
            params: vec![value.into()],
        }
    }

    /// `?, ?, ?` bound to `values`.
    pub fn placeholders<V>(values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<Value>,
    {
        let params: Vec<Value> = values.into_iter().map(Into::into).collect();
        let sql = vec!["?"; params.len()].join(", ");
        Self { sql, params }
    }

    /// Joins fragments with `combinator`, parenthesizing each one.
    pub fn combine(fragments: Vec<SqlFragment>, combinator: Combinator) -> Option<Self> {
        Self::join_with(fragments, combinator.keyword())
    }

    pub fn join_with(fragments: Vec<SqlFragment>, separator: &str) -> Option<Self> {
        let mut iter = fragments.into_iter();
        let mut combined = iter.next()?.parenthesized();
        for fragment in iter {
            combined.push_sql(separator);
            combined.append(fragment.parenthesized());
        }
        Some(combined)
    }

    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Appends `?` and binds `value` to it.
    pub fn push_param(&mut self, value: impl Into<Value>) {
        self.sql.push('?');
        self.params.push(value.into());
    }

    pub fn append(&mut self, other: SqlFragment) {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
    }

    pub fn parenthesized(self) -> Self {
        Self {
            sql: format!("({})", self.sql),
            params: self.params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::{Combinator, SqlFragment};
    use rusqlite::types::Value;

    #[test]
    fn combine_parenthesizes_and_keeps_param_order() {
        let combined = SqlFragment::combine(
            vec![
                SqlFragment::with_param("a = ?", 1_i64),
                SqlFragment::with_param("b = ?", "x".to_string()),
            ],
            Combinator::Or,
        )
        .unwrap();
        assert_eq!(combined.sql(), "(a = ?) OR (b = ?)");
        assert_eq!(
            combined.params(),
            &[Value::Integer(1), Value::Text("x".to_string())]
        );
    }

    #[test]
    fn combine_of_nothing_is_none() {
        assert!(SqlFragment::combine(Vec::new(), Combinator::And).is_none());
    }

    #[test]
    fn placeholders_match_value_count() {
        let fragment = SqlFragment::placeholders(["a", "b", "c"].map(String::from));
        assert_eq!(fragment.sql(), "?, ?, ?");
        assert_eq!(fragment.params().len(), 3);
    }

    #[test]
    fn optional_values_bind_as_null() {
        let mut fragment = SqlFragment::new("x IS ");
        fragment.push_param(Option::<i64>::None);
        assert_eq!(fragment.params(), &[Value::Null]);
    }
}
