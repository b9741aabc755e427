//! Generic list/filter/order compiler.
//!
//! # Responsibility
//! - Compile "list entities of type T matching filters, ordered, paginated"
//!   into one parameterized statement.
//!
//! # Invariants
//! - Filter predicates are ANDed, then the order clause, then LIMIT/OFFSET.
//! - Identical options produce identical SQL (pagination relies on it).
//! - No order means no ORDER BY: row order is then whatever SQLite returns
//!   and callers must not paginate over it expecting stability.

use super::builder::{Combinator, SqlFragment};

/// Include / exclude / ignore switch for one boolean filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriState {
    #[default]
    Ignore,
    Include,
    Exclude,
}

/// Filters shared by every listable entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilters {
    pub locally_modified: TriState,
    /// `Include` keeps only entities that have a server guid.
    pub has_guid: TriState,
    pub local_only: TriState,
    pub favorited: TriState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    fn keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Closed set of order fields for one entity type.
pub trait ListOrder: Copy {
    /// Fully qualified column to order by.
    fn column(self) -> &'static str;
}

/// Table layout of a listable entity.
pub trait ListedEntity {
    type Order: ListOrder;

    /// Base table; also carries `local_id`, `guid`, `is_dirty`,
    /// `is_local_only` and `is_favorited` columns.
    const TABLE: &'static str;
    /// Column list selected by `compile_list`.
    const SELECT_COLUMNS: &'static str;
    /// Auxiliary `LEFT JOIN`s appended after the base table.
    const JOINS: &'static str;
}

/// Pagination and ordering for one list call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions<O> {
    pub filters: ListFilters,
    pub limit: Option<u32>,
    pub offset: u32,
    pub order: Option<O>,
    pub direction: OrderDirection,
}

impl<O> Default for ListOptions<O> {
    fn default() -> Self {
        Self {
            filters: ListFilters::default(),
            limit: None,
            offset: 0,
            order: None,
            direction: OrderDirection::Ascending,
        }
    }
}

impl<O> ListOptions<O> {
    pub fn ordered(order: O, direction: OrderDirection) -> Self {
        Self {
            order: Some(order),
            direction,
            ..Self::default()
        }
    }
}

/// Compiles the list statement for `E`.
///
/// `extra` is ANDed with the filters, e.g. "notes of one notebook".
pub fn compile_list<E: ListedEntity>(
    options: &ListOptions<E::Order>,
    extra: Option<SqlFragment>,
) -> SqlFragment {
    let mut statement = SqlFragment::new(format!(
        "SELECT {} FROM {}{}",
        E::SELECT_COLUMNS,
        E::TABLE,
        E::JOINS
    ));
    append_where::<E>(&mut statement, &options.filters, extra);

    if let Some(order) = options.order {
        let direction = options.direction.keyword();
        statement.push_sql(&format!(
            " ORDER BY {} {direction}, {}.local_id {direction}",
            order.column(),
            E::TABLE
        ));
    }

    if let Some(limit) = options.limit {
        statement.push_sql(" LIMIT ");
        statement.push_param(i64::from(limit));
        if options.offset > 0 {
            statement.push_sql(" OFFSET ");
            statement.push_param(i64::from(options.offset));
        }
    } else if options.offset > 0 {
        statement.push_sql(" LIMIT -1 OFFSET ");
        statement.push_param(i64::from(options.offset));
    }

    statement
}

/// Compiles `SELECT COUNT(*)` over the same filters.
pub fn compile_count<E: ListedEntity>(
    filters: &ListFilters,
    extra: Option<SqlFragment>,
) -> SqlFragment {
    let mut statement = SqlFragment::new(format!("SELECT COUNT(*) FROM {}", E::TABLE));
    append_where::<E>(&mut statement, filters, extra);
    statement
}

fn append_where<E: ListedEntity>(
    statement: &mut SqlFragment,
    filters: &ListFilters,
    extra: Option<SqlFragment>,
) {
    let mut predicates = filter_predicates(E::TABLE, filters);
    predicates.extend(extra);
    if let Some(condition) = SqlFragment::combine(predicates, Combinator::And) {
        statement.push_sql(" WHERE ");
        statement.append(condition);
    }
}

fn filter_predicates(table: &str, filters: &ListFilters) -> Vec<SqlFragment> {
    let flag = |column: &str, state: TriState| match state {
        TriState::Ignore => None,
        TriState::Include => Some(SqlFragment::new(format!("{table}.{column} = 1"))),
        TriState::Exclude => Some(SqlFragment::new(format!("{table}.{column} = 0"))),
    };

    let has_guid = match filters.has_guid {
        TriState::Ignore => None,
        TriState::Include => Some(SqlFragment::new(format!("{table}.guid IS NOT NULL"))),
        TriState::Exclude => Some(SqlFragment::new(format!("{table}.guid IS NULL"))),
    };

    [
        flag("is_dirty", filters.locally_modified),
        has_guid,
        flag("is_local_only", filters.local_only),
        flag("is_favorited", filters.favorited),
    ]
    .into_iter()
    .flatten()
    .collect()
}
