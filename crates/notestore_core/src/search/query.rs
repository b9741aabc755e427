//! Parsed note search query.
//!
//! # Invariants
//! - Each axis keeps positive and negated values apart.
//! - `any` only changes how clauses combine; it never drops a term.

/// Values of one search axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchAxis<T> {
    pub positive: Vec<T>,
    pub negated: Vec<T>,
    /// `key:*`: the note has some value on this axis.
    pub has_any: bool,
    /// `-key:*`: the note has no value on this axis.
    pub has_none: bool,
}

impl<T> Default for SearchAxis<T> {
    fn default() -> Self {
        Self {
            positive: Vec::new(),
            negated: Vec::new(),
            has_any: false,
            has_none: false,
        }
    }
}

impl<T: PartialEq> SearchAxis<T> {
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negated.is_empty() && !self.has_any && !self.has_none
    }

    pub(crate) fn push(&mut self, value: T, negated: bool) {
        let target = if negated {
            &mut self.negated
        } else {
            &mut self.positive
        };
        if !target.contains(&value) {
            target.push(value);
        }
    }

    pub(crate) fn mark_presence(&mut self, negated: bool) {
        if negated {
            self.has_none = true;
        } else {
            self.has_any = true;
        }
    }
}

/// To-do state terms: `todo:true`, `todo:false`, `todo:*`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TodoAxis {
    /// `Some(true)` requires a checked to-do, `Some(false)` forbids one.
    pub finished: Option<bool>,
    pub unfinished: Option<bool>,
    /// `todo:*` / `-todo:*`.
    pub any_todo: Option<bool>,
}

impl TodoAxis {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Structured note search query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteSearchQuery {
    /// Text the query was parsed from.
    pub raw: String,
    /// `any:` modifier: OR instead of AND between terms.
    pub any: bool,
    pub notebook: Option<String>,
    pub tags: SearchAxis<String>,
    pub resource_mimes: SearchAxis<String>,
    pub titles: SearchAxis<String>,
    /// Epoch milliseconds.
    pub created: SearchAxis<i64>,
    pub updated: SearchAxis<i64>,
    pub subject_date: SearchAxis<i64>,
    pub latitude: SearchAxis<f64>,
    pub longitude: SearchAxis<f64>,
    pub altitude: SearchAxis<f64>,
    pub author: SearchAxis<String>,
    pub source: SearchAxis<String>,
    pub source_application: SearchAxis<String>,
    pub content_class: SearchAxis<String>,
    pub place_name: SearchAxis<String>,
    pub reminder_order: SearchAxis<i64>,
    pub reminder_time: SearchAxis<i64>,
    pub reminder_done_time: SearchAxis<i64>,
    pub todo: TodoAxis,
    /// `Some(true)`: `encryption:`; `Some(false)`: `-encryption:`.
    pub encryption: Option<bool>,
    /// Free-text terms; `*` only as a trailing wildcard or inside fallback
    /// patterns.
    pub content: SearchAxis<String>,
}

impl NoteSearchQuery {
    /// Whether the query constrains anything at all.
    pub fn has_terms(&self) -> bool {
        self.notebook.is_some()
            || !self.tags.is_empty()
            || !self.resource_mimes.is_empty()
            || !self.titles.is_empty()
            || !self.created.is_empty()
            || !self.updated.is_empty()
            || !self.subject_date.is_empty()
            || !self.latitude.is_empty()
            || !self.longitude.is_empty()
            || !self.altitude.is_empty()
            || !self.author.is_empty()
            || !self.source.is_empty()
            || !self.source_application.is_empty()
            || !self.content_class.is_empty()
            || !self.place_name.is_empty()
            || !self.reminder_order.is_empty()
            || !self.reminder_time.is_empty()
            || !self.reminder_done_time.is_empty()
            || !self.todo.is_empty()
            || self.encryption.is_some()
            || !self.content.is_empty()
    }
}
