//! Note search query compiler.
//!
//! # Responsibility
//! - Resolve names (notebook, tags) to local ids.
//! - Translate every axis of a [`NoteSearchQuery`] into one clause and
//!   assemble a single statement selecting matching note local ids.
//!
//! # Invariants
//! - Axis functions are pure; only [`resolve`] touches the database.
//! - The notebook clause always scopes the result; `any:` relaxes the other
//!   axes from AND to OR.
//! - Negated boolean and text axes also match NULL.
//! - Numeric ranges pick their boundary by mode: positive terms use the
//!   maximum normally and the minimum under `any:`; negated terms use the
//!   minimum normally and the maximum under `any:`.

use super::query::{NoteSearchQuery, SearchAxis, TodoAxis};
use crate::error::{StorageError, StorageResult};
use crate::model::LocalId;
use crate::query::{Combinator, SqlFragment};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeSet;

/// Names of one axis resolved to local ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedNames {
    pub positive_ids: Vec<LocalId>,
    /// Distinct names requested; more than `positive_ids.len()` means some
    /// name did not resolve.
    pub positive_requested: usize,
    pub negated_ids: Vec<LocalId>,
    pub negated_requested: usize,
}

/// Database lookups a query depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub notebook_local_id: Option<LocalId>,
    pub tags: ResolvedNames,
}

/// Resolves and compiles `query` into `SELECT notes.local_id ...`.
pub fn compile(conn: &Connection, query: &NoteSearchQuery) -> StorageResult<SqlFragment> {
    let resolved = resolve(conn, query)?;
    compile_resolved(query, &resolved)
}

/// Looks up the notebook and tag names the query mentions.
///
/// # Errors
/// - `Compiler` when the notebook name matches no notebook.
pub fn resolve(conn: &Connection, query: &NoteSearchQuery) -> StorageResult<ResolvedQuery> {
    let notebook_local_id = match query.notebook.as_deref() {
        Some(name) => {
            let local_id: Option<LocalId> = conn
                .query_row(
                    "SELECT local_id FROM notebooks WHERE name_lower = ?1;",
                    [name.to_lowercase()],
                    |row| row.get(0),
                )
                .optional()?;
            Some(local_id.ok_or_else(|| {
                StorageError::compiler(format!("notebook `{name}` does not exist"))
            })?)
        }
        None => None,
    };

    let positive = lowercase_set(&query.tags.positive);
    let negated = lowercase_set(&query.tags.negated);
    let tags = ResolvedNames {
        positive_ids: resolve_tag_ids(conn, &positive)?,
        positive_requested: positive.len(),
        negated_ids: resolve_tag_ids(conn, &negated)?,
        negated_requested: negated.len(),
    };

    Ok(ResolvedQuery {
        notebook_local_id,
        tags,
    })
}

/// Compiles an already resolved query.
///
/// # Errors
/// - `Compiler` when no axis yields a clause.
pub fn compile_resolved(
    query: &NoteSearchQuery,
    resolved: &ResolvedQuery,
) -> StorageResult<SqlFragment> {
    let combinator = if query.any {
        Combinator::Or
    } else {
        Combinator::And
    };

    let axes: Vec<Option<SqlFragment>> = vec![
        tag_clause(&query.tags, &resolved.tags, query.any),
        mime_clause(&query.resource_mimes, query.any),
        title_clause(&query.titles, combinator),
        range_clause("notes.created_at", &query.created, query.any),
        range_clause("notes.updated_at", &query.updated, query.any),
        range_clause("notes.subject_date", &query.subject_date, query.any),
        range_clause("notes.latitude", &query.latitude, query.any),
        range_clause("notes.longitude", &query.longitude, query.any),
        range_clause("notes.altitude", &query.altitude, query.any),
        text_clause("notes.author", &query.author, combinator),
        text_clause("notes.source", &query.source, combinator),
        text_clause("notes.source_application", &query.source_application, combinator),
        text_clause("notes.content_class", &query.content_class, combinator),
        text_clause("notes.place_name", &query.place_name, combinator),
        range_clause("notes.reminder_order", &query.reminder_order, query.any),
        range_clause("notes.reminder_time", &query.reminder_time, query.any),
        range_clause("notes.reminder_done_time", &query.reminder_done_time, query.any),
        todo_clause(&query.todo, combinator),
        query.encryption.map(encryption_clause),
        content_clause(&query.content, combinator),
    ];
    let terms = SqlFragment::combine(axes.into_iter().flatten().collect(), combinator);

    let notebook = resolved
        .notebook_local_id
        .clone()
        .map(|local_id| SqlFragment::with_param("notes.notebook_local_id = ?", local_id));

    let Some(condition) = SqlFragment::combine(
        notebook.into_iter().chain(terms).collect(),
        Combinator::And,
    ) else {
        return Err(StorageError::compiler(format!(
            "query `{}` has nothing to match",
            query.raw
        )));
    };

    let mut statement = SqlFragment::new("SELECT notes.local_id FROM notes WHERE ");
    statement.append(condition);
    statement.push_sql(" ORDER BY notes.id ASC");
    Ok(statement)
}

fn lowercase_set(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| name.to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn resolve_tag_ids(conn: &Connection, lowercase_names: &[String]) -> StorageResult<Vec<LocalId>> {
    if lowercase_names.is_empty() {
        return Ok(Vec::new());
    }
    let names = SqlFragment::placeholders(lowercase_names.iter().cloned());
    let sql = format!(
        "SELECT local_id FROM tags WHERE name_lower IN ({}) ORDER BY local_id;",
        names.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(names.params()), |row| row.get(0))?
        .collect::<Result<Vec<LocalId>, _>>()?;
    Ok(ids)
}

const ALWAYS: &str = "1";
const NEVER: &str = "0";

/// Tag axis.
///
/// Positive tags require every tag normally and any of them under `any:`.
/// Negated tags exclude notes carrying any of them normally and notes
/// carrying all of them under `any:`. Untagged notes satisfy negated terms.
pub fn tag_clause(axis: &SearchAxis<String>, resolved: &ResolvedNames, any: bool) -> Option<SqlFragment> {
    let combinator = if any { Combinator::Or } else { Combinator::And };
    let mut clauses = Vec::new();

    if axis.has_any {
        clauses.push(SqlFragment::new(
            "notes.local_id IN (SELECT note_local_id FROM note_tags)",
        ));
    }
    if axis.has_none {
        clauses.push(SqlFragment::new(
            "notes.local_id NOT IN (SELECT note_local_id FROM note_tags)",
        ));
    }

    if resolved.positive_requested > 0 {
        let ids = &resolved.positive_ids;
        let clause = if ids.is_empty() || (!any && ids.len() < resolved.positive_requested) {
            SqlFragment::new(NEVER)
        } else if any {
            tag_membership("IN", ids)
        } else {
            tag_all_of("IN", ids, resolved.positive_requested)
        };
        clauses.push(clause);
    }

    if resolved.negated_requested > 0 {
        let ids = &resolved.negated_ids;
        let clause = if any {
            if ids.len() < resolved.negated_requested {
                SqlFragment::new(ALWAYS)
            } else {
                tag_all_of("NOT IN", ids, resolved.negated_requested)
            }
        } else if ids.is_empty() {
            SqlFragment::new(ALWAYS)
        } else {
            tag_membership("NOT IN", ids)
        };
        clauses.push(clause);
    }

    SqlFragment::combine(clauses, combinator)
}

fn tag_membership(operator: &str, ids: &[LocalId]) -> SqlFragment {
    let mut clause = SqlFragment::new(format!(
        "notes.local_id {operator} (SELECT note_local_id FROM note_tags WHERE tag_local_id IN ("
    ));
    clause.append(SqlFragment::placeholders(ids.iter().cloned()));
    clause.push_sql("))");
    clause
}

fn tag_all_of(operator: &str, ids: &[LocalId], requested: usize) -> SqlFragment {
    let mut clause = SqlFragment::new(format!(
        "notes.local_id {operator} (SELECT note_local_id FROM note_tags WHERE tag_local_id IN ("
    ));
    clause.append(SqlFragment::placeholders(ids.iter().cloned()));
    clause.push_sql(") GROUP BY note_local_id HAVING COUNT(*) = ");
    clause.push_param(requested as i64);
    clause.push_sql(")");
    clause
}

/// Resource mime axis. Exact mime types follow the tag rules with a
/// distinct-mime count; `image/*` style patterns are one membership check
/// each.
pub fn mime_clause(axis: &SearchAxis<String>, any: bool) -> Option<SqlFragment> {
    let combinator = if any { Combinator::Or } else { Combinator::And };
    let mut clauses = Vec::new();

    if axis.has_any {
        clauses.push(SqlFragment::new(
            "notes.local_id IN (SELECT note_local_id FROM resources)",
        ));
    }
    if axis.has_none {
        clauses.push(SqlFragment::new(
            "notes.local_id NOT IN (SELECT note_local_id FROM resources)",
        ));
    }

    for (values, negated) in [(&axis.positive, false), (&axis.negated, true)] {
        let operator = if negated { "NOT IN" } else { "IN" };
        let (patterns, exact): (Vec<String>, Vec<String>) = values
            .iter()
            .map(|mime| mime.to_lowercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .partition(|mime| mime.contains('*'));

        if !exact.is_empty() {
            // Positive + normal and negated + any need every mime type.
            let needs_all = negated == any;
            let mut clause = SqlFragment::new(format!(
                "notes.local_id {operator} (SELECT note_local_id FROM resources WHERE lower(mime) IN ("
            ));
            let count = exact.len();
            clause.append(SqlFragment::placeholders(exact));
            if needs_all {
                clause.push_sql(") GROUP BY note_local_id HAVING COUNT(DISTINCT lower(mime)) = ");
                clause.push_param(count as i64);
                clause.push_sql(")");
            } else {
                clause.push_sql("))");
            }
            clauses.push(clause);
        }

        for pattern in patterns {
            clauses.push(SqlFragment::with_param(
                format!(
                    "notes.local_id {operator} (SELECT note_local_id FROM resources WHERE lower(mime) LIKE ? ESCAPE '\\')"
                ),
                like_pattern(&pattern, false),
            ));
        }
    }

    SqlFragment::combine(clauses, combinator)
}

/// `intitle:` substring terms.
pub fn title_clause(axis: &SearchAxis<String>, combinator: Combinator) -> Option<SqlFragment> {
    let mut clauses = presence_clauses("notes.title", axis);
    for value in &axis.positive {
        clauses.push(SqlFragment::with_param(
            "notes.title LIKE ? ESCAPE '\\'",
            like_pattern(value, true),
        ));
    }
    for value in &axis.negated {
        clauses.push(SqlFragment::with_param(
            "(notes.title IS NULL OR notes.title NOT LIKE ? ESCAPE '\\')",
            like_pattern(value, true),
        ));
    }
    SqlFragment::combine(clauses, combinator)
}

/// Case-insensitive equality, or prefix match with a trailing `*`.
pub fn text_clause(column: &str, axis: &SearchAxis<String>, combinator: Combinator) -> Option<SqlFragment> {
    let mut clauses = presence_clauses(column, axis);
    for value in &axis.positive {
        clauses.push(SqlFragment::with_param(
            format!("{column} LIKE ? ESCAPE '\\'"),
            like_pattern(value, false),
        ));
    }
    for value in &axis.negated {
        clauses.push(SqlFragment::with_param(
            format!("({column} IS NULL OR {column} NOT LIKE ? ESCAPE '\\')"),
            like_pattern(value, false),
        ));
    }
    SqlFragment::combine(clauses, combinator)
}

/// Numeric lower/upper bound terms.
pub fn range_clause<T>(column: &str, axis: &SearchAxis<T>, any: bool) -> Option<SqlFragment>
where
    T: Copy + PartialOrd + Into<Value>,
{
    let combinator = if any { Combinator::Or } else { Combinator::And };
    let mut clauses = presence_clauses(column, axis);
    if let Some(lower) = boundary(&axis.positive, !any) {
        clauses.push(SqlFragment::with_param(format!("{column} >= ?"), lower));
    }
    if let Some(upper) = boundary(&axis.negated, any) {
        clauses.push(SqlFragment::with_param(format!("{column} < ?"), upper));
    }
    SqlFragment::combine(clauses, combinator)
}

fn boundary<T: Copy + PartialOrd>(values: &[T], pick_max: bool) -> Option<T> {
    values.iter().copied().reduce(|best, value| {
        let replace = if pick_max { value > best } else { value < best };
        if replace {
            value
        } else {
            best
        }
    })
}

fn presence_clauses<T: PartialEq>(column: &str, axis: &SearchAxis<T>) -> Vec<SqlFragment> {
    let mut clauses = Vec::new();
    if axis.has_any {
        clauses.push(SqlFragment::new(format!("{column} IS NOT NULL")));
    }
    if axis.has_none {
        clauses.push(SqlFragment::new(format!("{column} IS NULL")));
    }
    clauses
}

/// To-do state over the nullable `contains_*_todo` columns.
pub fn todo_clause(todo: &TodoAxis, combinator: Combinator) -> Option<SqlFragment> {
    let mut clauses: Vec<SqlFragment> = [
        todo.finished.map(|state| flag_clause("notes.contains_finished_todo", state)),
        todo.unfinished
            .map(|state| flag_clause("notes.contains_unfinished_todo", state)),
    ]
    .into_iter()
    .flatten()
    .collect();

    match todo.any_todo {
        Some(true) => clauses.push(SqlFragment::new(
            "notes.contains_finished_todo = 1 OR notes.contains_unfinished_todo = 1",
        )),
        Some(false) => clauses.push(SqlFragment::new(
            "coalesce(notes.contains_finished_todo, 0) = 0 AND coalesce(notes.contains_unfinished_todo, 0) = 0",
        )),
        None => {}
    }
    SqlFragment::combine(clauses, combinator)
}

pub fn encryption_clause(state: bool) -> SqlFragment {
    flag_clause("notes.contains_encryption", state)
}

fn flag_clause(column: &str, state: bool) -> SqlFragment {
    if state {
        SqlFragment::new(format!("{column} = 1"))
    } else {
        SqlFragment::new(format!("coalesce({column}, 0) = 0"))
    }
}

/// Free-text terms. Each term goes to full-text search unless it has
/// whitespace or a wildcard before its end, which the FTS syntax cannot
/// express; those fall back to pattern matching.
pub fn content_clause(axis: &SearchAxis<String>, combinator: Combinator) -> Option<SqlFragment> {
    let mut clauses = Vec::new();
    for (values, negated) in [(&axis.positive, false), (&axis.negated, true)] {
        for term in values {
            if let Some(clause) = content_term_clause(term, negated) {
                clauses.push(clause);
            }
        }
    }
    SqlFragment::combine(clauses, combinator)
}

fn content_term_clause(term: &str, negated: bool) -> Option<SqlFragment> {
    let stem = term.trim_end_matches('*');
    if stem.trim().is_empty() {
        return None;
    }

    if needs_pattern_match(term) {
        let pattern = like_pattern(term, true);
        let mut fragment = SqlFragment::new(if negated {
            "NOT (coalesce(notes.title, '') LIKE "
        } else {
            "(coalesce(notes.title, '') LIKE "
        });
        fragment.push_param(pattern.clone());
        fragment.push_sql(" ESCAPE '\\' OR coalesce(notes.content_text, '') LIKE ");
        fragment.push_param(pattern);
        fragment.push_sql(" ESCAPE '\\')");
        return Some(fragment);
    }

    let operator = if negated { "NOT IN" } else { "IN" };
    Some(SqlFragment::with_param(
        format!("notes.id {operator} (SELECT rowid FROM note_fts WHERE note_fts MATCH ?)"),
        fts_phrase(term),
    ))
}

/// Whitespace, or a `*` anywhere but the end.
fn needs_pattern_match(term: &str) -> bool {
    term.chars().any(char::is_whitespace) || term.trim_end_matches('*').contains('*')
}

/// `"term"` or `"term"*` for an FTS5 MATCH.
fn fts_phrase(term: &str) -> String {
    let stem = term.trim_end_matches('*');
    let quoted = format!("\"{}\"", stem.replace('"', "\"\""));
    if stem.len() < term.len() {
        format!("{quoted}*")
    } else {
        quoted
    }
}

/// LIKE pattern with `*` as wildcard; `contains` wraps it in `%`.
fn like_pattern(value: &str, contains: bool) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    if contains {
        pattern.push('%');
    }
    for ch in value.chars() {
        match ch {
            '%' | '_' | '\\' => {
                pattern.push('\\');
                pattern.push(ch);
            }
            '*' => pattern.push('%'),
            ch => pattern.push(ch),
        }
    }
    if contains {
        pattern.push('%');
    }
    pattern
}
