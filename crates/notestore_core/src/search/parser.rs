//! Search string parser.
//!
//! Grammar: whitespace separated terms, `"..."` for values with spaces, a
//! leading `-` negates a term, `key:value` selects an axis, anything else is
//! free text.

use super::query::{NoteSearchQuery, SearchAxis};
use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Datelike, Days, Local, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};

impl NoteSearchQuery {
    /// Parses `text` with relative dates anchored at the current local time.
    pub fn parse(text: &str) -> StorageResult<Self> {
        Self::parse_at(text, Local::now())
    }

    /// Parses `text` with relative dates anchored at `now`.
    pub fn parse_at(text: &str, now: DateTime<Local>) -> StorageResult<Self> {
        let mut query = NoteSearchQuery {
            raw: text.to_string(),
            ..NoteSearchQuery::default()
        };
        for token in tokenize(text)? {
            apply_token(&mut query, &token, now)?;
        }
        if !query.has_terms() {
            return Err(StorageError::compiler(format!(
                "query `{text}` has no search terms"
            )));
        }
        Ok(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    negated: bool,
    key: Option<String>,
    value: String,
}

/// Splits on whitespace outside quotes and peels off negation and key.
fn tokenize(text: &str) -> StorageResult<Vec<Token>> {
    let mut raw_tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in text.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ch if ch.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    raw_tokens.push(std::mem::take(&mut current));
                }
            }
            ch => current.push(ch),
        }
    }
    if in_quotes {
        return Err(StorageError::compiler(format!(
            "unterminated quote in `{text}`"
        )));
    }
    if !current.is_empty() {
        raw_tokens.push(current);
    }

    Ok(raw_tokens.iter().filter_map(|raw| split_token(raw)).collect())
}

fn split_token(raw: &str) -> Option<Token> {
    let (negated, rest) = match raw.strip_prefix('-') {
        Some(rest) if !rest.is_empty() => (true, rest),
        _ => (false, raw),
    };

    let (key, value) = match rest.split_once(':') {
        Some((key, value)) if !key.contains('"') && is_known_key(key) => {
            (Some(key.to_ascii_lowercase()), value)
        }
        _ => (None, rest),
    };

    let value = unquote(value);
    if key.is_none() && value.is_empty() {
        return None;
    }
    Some(Token {
        negated,
        key,
        value,
    })
}

fn unquote(value: &str) -> String {
    value.chars().filter(|ch| *ch != '"').collect()
}

const KNOWN_KEYS: &[&str] = &[
    "any",
    "notebook",
    "tag",
    "resource",
    "intitle",
    "created",
    "updated",
    "subjectdate",
    "latitude",
    "longitude",
    "altitude",
    "author",
    "source",
    "sourceapplication",
    "contentclass",
    "placename",
    "reminderorder",
    "remindertime",
    "reminderdonetime",
    "todo",
    "encryption",
];

fn is_known_key(key: &str) -> bool {
    KNOWN_KEYS.contains(&key.to_ascii_lowercase().as_str())
}

fn apply_token(query: &mut NoteSearchQuery, token: &Token, now: DateTime<Local>) -> StorageResult<()> {
    let Some(key) = token.key.as_deref() else {
        query.content.push(token.value.clone(), token.negated);
        return Ok(());
    };
    let negated = token.negated;
    let value = token.value.as_str();

    match key {
        "any" => {
            if negated {
                return Err(StorageError::compiler("`any:` cannot be negated"));
            }
            query.any = true;
        }
        "notebook" => {
            if negated {
                return Err(StorageError::compiler("`notebook:` cannot be negated"));
            }
            if query.notebook.is_some() {
                return Err(StorageError::compiler("only one `notebook:` term is allowed"));
            }
            query.notebook = Some(require_value(key, value)?.to_string());
        }
        "tag" => push_text(&mut query.tags, key, value, negated)?,
        "resource" => push_text(&mut query.resource_mimes, key, value, negated)?,
        "intitle" => push_text(&mut query.titles, key, value, negated)?,
        "author" => push_text(&mut query.author, key, value, negated)?,
        "source" => push_text(&mut query.source, key, value, negated)?,
        "sourceapplication" => push_text(&mut query.source_application, key, value, negated)?,
        "contentclass" => push_text(&mut query.content_class, key, value, negated)?,
        "placename" => push_text(&mut query.place_name, key, value, negated)?,
        "created" => push_date(&mut query.created, key, value, negated, now)?,
        "updated" => push_date(&mut query.updated, key, value, negated, now)?,
        "subjectdate" => push_date(&mut query.subject_date, key, value, negated, now)?,
        "remindertime" => push_date(&mut query.reminder_time, key, value, negated, now)?,
        "reminderdonetime" => push_date(&mut query.reminder_done_time, key, value, negated, now)?,
        "latitude" => push_coordinate(&mut query.latitude, key, value, negated)?,
        "longitude" => push_coordinate(&mut query.longitude, key, value, negated)?,
        "altitude" => push_coordinate(&mut query.altitude, key, value, negated)?,
        "reminderorder" => {
            if value == "*" {
                query.reminder_order.mark_presence(negated);
            } else {
                let order = require_value(key, value)?.parse::<i64>().map_err(|_| {
                    StorageError::compiler(format!("`{value}` is not a valid reminder order"))
                })?;
                query.reminder_order.push(order, negated);
            }
        }
        "todo" => {
            let state = Some(!negated);
            match value.to_ascii_lowercase().as_str() {
                "true" => query.todo.finished = state,
                "false" => query.todo.unfinished = state,
                "*" => query.todo.any_todo = state,
                other => {
                    return Err(StorageError::compiler(format!(
                        "`todo:{other}` expects true, false or *"
                    )))
                }
            }
        }
        "encryption" => query.encryption = Some(!negated),
        other => {
            return Err(StorageError::compiler(format!("unsupported search key `{other}`")));
        }
    }
    Ok(())
}

fn require_value<'a>(key: &str, value: &'a str) -> StorageResult<&'a str> {
    if value.trim().is_empty() {
        return Err(StorageError::compiler(format!("`{key}:` needs a value")));
    }
    Ok(value)
}

fn push_text(axis: &mut SearchAxis<String>, key: &str, value: &str, negated: bool) -> StorageResult<()> {
    if value == "*" {
        axis.mark_presence(negated);
        return Ok(());
    }
    axis.push(require_value(key, value)?.to_string(), negated);
    Ok(())
}

fn push_coordinate(axis: &mut SearchAxis<f64>, key: &str, value: &str, negated: bool) -> StorageResult<()> {
    if value == "*" {
        axis.mark_presence(negated);
        return Ok(());
    }
    let number = require_value(key, value)?
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .ok_or_else(|| StorageError::compiler(format!("`{value}` is not a valid {key}")))?;
    axis.push(number, negated);
    Ok(())
}

fn push_date(
    axis: &mut SearchAxis<i64>,
    key: &str,
    value: &str,
    negated: bool,
    now: DateTime<Local>,
) -> StorageResult<()> {
    if value == "*" {
        axis.mark_presence(negated);
        return Ok(());
    }
    let millis = parse_date(require_value(key, value)?, now)
        .ok_or_else(|| StorageError::compiler(format!("`{value}` is not a valid date for `{key}:`")))?;
    axis.push(millis, negated);
    Ok(())
}

/// Parses an absolute or relative date into epoch milliseconds.
///
/// Absolute: `YYYYMMDD`, `YYYYMMDDTHHMMSS` (local), `YYYYMMDDTHHMMSSZ` (UTC).
/// Relative: `day`, `week`, `month`, `year`, each optionally `-N`, anchored
/// at the start of the period. Weeks start on Monday.
pub fn parse_date(value: &str, now: DateTime<Local>) -> Option<i64> {
    if let Some(relative) = parse_relative_date(value, now) {
        return Some(relative);
    }

    if let Some(utc) = value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(Utc.from_utc_datetime(&naive).timestamp_millis());
    }

    let naive = match NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        Ok(naive) => naive,
        Err(_) => {
            if value.len() != 8 {
                return None;
            }
            NaiveDate::parse_from_str(value, "%Y%m%d")
                .ok()?
                .and_hms_opt(0, 0, 0)?
        }
    };
    local_millis(naive)
}

fn parse_relative_date(value: &str, now: DateTime<Local>) -> Option<i64> {
    let lower = value.to_ascii_lowercase();
    let (unit, offset) = match lower.split_once('-') {
        Some((unit, offset)) => (unit.to_string(), offset.parse::<u32>().ok()?),
        None => (lower, 0),
    };

    let today = now.date_naive();
    let start = match unit.as_str() {
        "day" => today.checked_sub_days(Days::new(u64::from(offset)))?,
        "week" => {
            let monday = today.checked_sub_days(Days::new(u64::from(
                today.weekday().num_days_from_monday(),
            )))?;
            monday.checked_sub_days(Days::new(u64::from(offset) * 7))?
        }
        "month" => NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?
            .checked_sub_months(Months::new(offset))?,
        "year" => NaiveDate::from_ymd_opt(today.year() - i32::try_from(offset).ok()?, 1, 1)?,
        _ => return None,
    };
    local_millis(start.and_hms_opt(0, 0, 0)?)
}

fn local_millis(naive: NaiveDateTime) -> Option<i64> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|datetime| datetime.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::{parse_date, tokenize};
    use crate::error::StorageError;
    use crate::search::NoteSearchQuery;
    use chrono::{Local, NaiveDate, TimeZone};

    fn now() -> chrono::DateTime<Local> {
        // Thursday.
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 3, 14)
                    .unwrap()
                    .and_hms_opt(15, 30, 0)
                    .unwrap(),
            )
            .earliest()
            .unwrap()
    }

    fn local_midnight(year: i32, month: u32, day: u32) -> i64 {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(year, month, day)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            )
            .earliest()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn quoted_values_keep_spaces() {
        let query = NoteSearchQuery::parse_at(r#"notebook:"Work Stuff" "exact phrase""#, now()).unwrap();
        assert_eq!(query.notebook.as_deref(), Some("Work Stuff"));
        assert_eq!(query.content.positive, vec!["exact phrase".to_string()]);
    }

    #[test]
    fn negation_and_wildcards_land_on_the_right_axis() {
        let query =
            NoteSearchQuery::parse_at("tag:urgent -tag:done -tag:* resource:image/* -author:*", now())
                .unwrap();
        assert_eq!(query.tags.positive, vec!["urgent".to_string()]);
        assert_eq!(query.tags.negated, vec!["done".to_string()]);
        assert!(query.tags.has_none);
        assert_eq!(query.resource_mimes.positive, vec!["image/*".to_string()]);
        assert!(query.author.has_none);
    }

    #[test]
    fn unknown_keys_are_free_text() {
        let query = NoteSearchQuery::parse_at("http://example.com", now()).unwrap();
        assert_eq!(query.content.positive, vec!["http://example.com".to_string()]);
    }

    #[test]
    fn any_alone_is_not_a_query() {
        let err = NoteSearchQuery::parse_at("any:", now()).unwrap_err();
        assert!(matches!(err, StorageError::Compiler(_)));
        assert!(NoteSearchQuery::parse_at("   ", now()).is_err());
    }

    #[test]
    fn notebook_cannot_be_negated_or_repeated() {
        assert!(NoteSearchQuery::parse_at("-notebook:Work", now()).is_err());
        assert!(NoteSearchQuery::parse_at("notebook:A notebook:B", now()).is_err());
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert!(matches!(
            tokenize(r#"tag:"open"#),
            Err(StorageError::Compiler(_))
        ));
    }

    #[test]
    fn absolute_dates_parse_in_local_and_utc() {
        assert_eq!(parse_date("20240101", now()), Some(local_midnight(2024, 1, 1)));
        assert_eq!(parse_date("20240101T000000Z", now()), Some(1_704_067_200_000));
        assert_eq!(parse_date("2024-01-01", now()), None);
        assert_eq!(parse_date("20241301", now()), None);
    }

    #[test]
    fn relative_dates_anchor_at_period_start() {
        assert_eq!(parse_date("day", now()), Some(local_midnight(2024, 3, 14)));
        assert_eq!(parse_date("day-2", now()), Some(local_midnight(2024, 3, 12)));
        assert_eq!(parse_date("week", now()), Some(local_midnight(2024, 3, 11)));
        assert_eq!(parse_date("week-1", now()), Some(local_midnight(2024, 3, 4)));
        assert_eq!(parse_date("month-3", now()), Some(local_midnight(2023, 12, 1)));
        assert_eq!(parse_date("year", now()), Some(local_midnight(2024, 1, 1)));
        assert_eq!(parse_date("fortnight", now()), None);
    }

    #[test]
    fn todo_and_encryption_terms() {
        let query = NoteSearchQuery::parse_at("todo:true -todo:false -encryption:", now()).unwrap();
        assert_eq!(query.todo.finished, Some(true));
        assert_eq!(query.todo.unfinished, Some(false));
        assert_eq!(query.encryption, Some(false));
        assert!(NoteSearchQuery::parse_at("todo:maybe", now()).is_err());
    }

    #[test]
    fn bad_numbers_are_compiler_errors() {
        assert!(NoteSearchQuery::parse_at("latitude:north", now()).is_err());
        assert!(NoteSearchQuery::parse_at("created:yesterday", now()).is_err());
        let query = NoteSearchQuery::parse_at("latitude:12.5 -altitude:100", now()).unwrap();
        assert_eq!(query.latitude.positive, vec![12.5]);
        assert_eq!(query.altitude.negated, vec![100.0]);
    }
}
