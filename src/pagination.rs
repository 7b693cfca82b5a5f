//! # Cursor Pagination
//!
//! Keyset pagination over permission sync jobs. A cursor is an opaque base64
//! string wrapping a JSON array with one value per ordered column; the rows
//! strictly after (or before) it are selected with a lexicographic comparison
//! built by [`keyset_condition`].
//!
//! Nullable columns sort NULL above every value: last when ascending, first
//! when descending. Cursors carry the NULL explicitly so paging can cross it.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use chrono::{DateTime, FixedOffset};
use sea_orm::sea_query::{Expr, NullOrdering, Value};
use sea_orm::{ActiveEnum, ColumnTrait, Condition, Order, QueryFilter, QueryOrder, QuerySelect, Select};
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;
use crate::models::permission_sync_job::{Column, Entity, Model};

const MAX_CURSOR_LEN: usize = 1000;
const MAX_DECODED_CURSOR_LEN: usize = 500;

/// Columns jobs can be ordered by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderField {
    Id,
    UserId,
    RepositoryId,
    Priority,
    QueuedAt,
    FinishedAt,
    ProcessAfter,
}

impl OrderField {
    pub(crate) fn column(self) -> Column {
        match self {
            Self::Id => Column::Id,
            Self::UserId => Column::UserId,
            Self::RepositoryId => Column::RepositoryId,
            Self::Priority => Column::Priority,
            Self::QueuedAt => Column::QueuedAt,
            Self::FinishedAt => Column::FinishedAt,
            Self::ProcessAfter => Column::ProcessAfter,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::UserId => "user_id",
            Self::RepositoryId => "repository_id",
            Self::Priority => "priority",
            Self::QueuedAt => "queued_at",
            Self::FinishedAt => "finished_at",
            Self::ProcessAfter => "process_after",
        }
    }

    fn is_nullable(self) -> bool {
        matches!(
            self,
            Self::UserId | Self::RepositoryId | Self::FinishedAt | Self::ProcessAfter
        )
    }

    fn is_timestamp(self) -> bool {
        matches!(self, Self::QueuedAt | Self::FinishedAt | Self::ProcessAfter)
    }

    fn value_of(self, job: &Model) -> CursorValue {
        let integer =
            |v: Option<i32>| v.map_or(CursorValue::Null, |v| CursorValue::Integer(v.into()));
        let timestamp = |v: Option<DateTime<FixedOffset>>| {
            v.map_or(CursorValue::Null, CursorValue::Timestamp)
        };
        match self {
            Self::Id => CursorValue::Integer(job.id.into()),
            Self::UserId => integer(job.user_id),
            Self::RepositoryId => integer(job.repository_id),
            Self::Priority => CursorValue::Integer(job.priority.to_value().into()),
            Self::QueuedAt => CursorValue::Timestamp(job.queued_at),
            Self::FinishedAt => timestamp(job.finished_at),
            Self::ProcessAfter => timestamp(job.process_after),
        }
    }

    /// Converts a decoded cursor value into a bind value for this column.
    /// `None` is a NULL position.
    fn bind(self, value: &CursorValue) -> Result<Option<Value>, RepositoryError> {
        match (value, self.is_timestamp()) {
            (CursorValue::Null, _) if self.is_nullable() => Ok(None),
            (CursorValue::Timestamp(ts), true) => Ok(Some(Value::from(*ts))),
            (CursorValue::Integer(v), false) => i32::try_from(*v)
                .map(|v| Some(Value::from(v)))
                .map_err(|_| RepositoryError::validation(format!("cursor value {v} is out of range"))),
            _ => Err(RepositoryError::validation(format!(
                "cursor value does not match column {}",
                self.as_str()
            ))),
        }
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(Self::Id),
            "user_id" => Ok(Self::UserId),
            "repository_id" | "repo_id" => Ok(Self::RepositoryId),
            "priority" => Ok(Self::Priority),
            "queued_at" => Ok(Self::QueuedAt),
            "finished_at" => Ok(Self::FinishedAt),
            "process_after" => Ok(Self::ProcessAfter),
            other => Err(format!("unknown order field '{other}'")),
        }
    }
}

/// One position component of a cursor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    Integer(i64),
    Timestamp(DateTime<FixedOffset>),
    Null,
}

/// Forward/backward pagination arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginationArgs {
    /// Page size when paging forward
    pub first: Option<u64>,
    /// Page size when paging backward from the end (or from `before`)
    pub last: Option<u64>,
    pub after: Option<String>,
    pub before: Option<String>,
    /// Ordering columns; `id` is appended as a tie-breaker when missing
    pub order_by: Vec<OrderField>,
    pub ascending: bool,
}

impl Default for PaginationArgs {
    fn default() -> Self {
        Self {
            first: None,
            last: None,
            after: None,
            before: None,
            order_by: Vec::new(),
            ascending: true,
        }
    }
}

impl PaginationArgs {
    pub fn first(limit: u64) -> Self {
        Self {
            first: Some(limit),
            ..Self::default()
        }
    }

    pub fn last(limit: u64) -> Self {
        Self {
            last: Some(limit),
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn order_by(mut self, fields: impl IntoIterator<Item = OrderField>) -> Self {
        self.order_by = fields.into_iter().collect();
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    pub fn validate(&self) -> Result<(), RepositoryError> {
        if self.first.is_some() && self.last.is_some() {
            return Err(RepositoryError::validation(
                "first and last are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// The full ordering used for queries and cursors.
    pub fn effective_order(&self) -> Vec<OrderField> {
        let mut fields = Vec::with_capacity(self.order_by.len() + 1);
        for field in &self.order_by {
            if !fields.contains(field) {
                fields.push(*field);
            }
        }
        if !fields.contains(&OrderField::Id) {
            fields.push(OrderField::Id);
        }
        fields
    }

    /// Cursor pointing at `job` under this ordering.
    pub fn cursor_for(&self, job: &Model) -> Result<String, RepositoryError> {
        encode_cursor(job, &self.effective_order())
    }

    /// Adds keyset predicates, ordering and limit to `query`.
    ///
    /// Returns the query and whether the fetched rows must be reversed to
    /// restore the requested order (the `last` case).
    pub(crate) fn apply(
        &self,
        mut query: Select<Entity>,
    ) -> Result<(Select<Entity>, bool), RepositoryError> {
        self.validate()?;
        let order = self.effective_order();

        if let Some(after) = &self.after {
            let bounds = bind_cursor(after, &order)?;
            query = query.filter(keyset_condition(&bounds, self.ascending));
        }
        if let Some(before) = &self.before {
            let bounds = bind_cursor(before, &order)?;
            query = query.filter(keyset_condition(&bounds, !self.ascending));
        }

        let reverse = self.last.is_some();
        let direction = if self.ascending != reverse {
            Order::Asc
        } else {
            Order::Desc
        };
        let nulls = match direction {
            Order::Asc => NullOrdering::Last,
            _ => NullOrdering::First,
        };
        for field in &order {
            query = if field.is_nullable() {
                query.order_by_with_nulls(field.column(), direction.clone(), nulls.clone())
            } else {
                query.order_by(field.column(), direction.clone())
            };
        }

        if let Some(limit) = self.first.or(self.last) {
            query = query.limit(limit);
        }

        Ok((query, reverse))
    }
}

/// Lexicographic comparison of `(c1, c2, ..)` against `(v1, v2, ..)`:
/// `c1 > v1 OR (c1 = v1 AND c2 > v2) OR ...`, using `<` when `greater` is false.
///
/// A `None` bound is NULL, which ranks above every value: nothing is greater
/// than it and every non-null value is less.
pub fn keyset_condition(bounds: &[(Column, Option<Value>)], greater: bool) -> Condition {
    let mut any = Condition::any();
    for (i, (column, value)) in bounds.iter().enumerate() {
        let step = match (value, greater) {
            (Some(v), true) => Condition::any()
                .add(column.gt(v.clone()))
                .add(column.is_null()),
            (Some(v), false) => Condition::all().add(column.lt(v.clone())),
            (None, true) => continue,
            (None, false) => Condition::all().add(column.is_not_null()),
        };
        let mut all = Condition::all();
        for (prefix_column, prefix_value) in &bounds[..i] {
            all = match prefix_value {
                Some(v) => all.add(prefix_column.eq(v.clone())),
                None => all.add(prefix_column.is_null()),
            };
        }
        any = any.add(all.add(step));
    }
    if any.is_empty() {
        return Condition::all().add(Expr::value(false));
    }
    any
}

/// Encode the position of `job` under `order` as an opaque base64 string.
pub fn encode_cursor(job: &Model, order: &[OrderField]) -> Result<String, RepositoryError> {
    let values: Vec<CursorValue> = order.iter().map(|field| field.value_of(job)).collect();
    let json = serde_json::to_string(&values)
        .map_err(|e| RepositoryError::validation(format!("failed to encode cursor: {e}")))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json.as_bytes()))
}

/// Decode cursor values from an opaque base64 string with validation.
pub fn decode_cursor(cursor: &str, order: &[OrderField]) -> Result<Vec<CursorValue>, RepositoryError> {
    // Check cursor length to prevent extremely large inputs
    if cursor.len() > MAX_CURSOR_LEN {
        return Err(RepositoryError::validation("cursor is too long"));
    }

    if cursor.is_empty() {
        return Err(RepositoryError::validation("cursor cannot be empty"));
    }

    if !cursor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        return Err(RepositoryError::validation(
            "cursor contains invalid characters",
        ));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(cursor)
        .map_err(|_| RepositoryError::validation("cursor is not valid base64"))?;

    if decoded.is_empty() {
        return Err(RepositoryError::validation(
            "cursor is empty after decoding",
        ));
    }

    if decoded.len() > MAX_DECODED_CURSOR_LEN {
        return Err(RepositoryError::validation("decoded cursor is too large"));
    }

    let json = String::from_utf8(decoded)
        .map_err(|_| RepositoryError::validation("cursor contains invalid UTF-8 data"))?;

    let values: Vec<CursorValue> = serde_json::from_str(&json)
        .map_err(|_| RepositoryError::validation("cursor contains invalid JSON structure"))?;

    if values.len() != order.len() {
        return Err(RepositoryError::validation(format!(
            "cursor has {} values but the ordering has {} columns",
            values.len(),
            order.len()
        )));
    }

    Ok(values)
}

fn bind_cursor(
    cursor: &str,
    order: &[OrderField],
) -> Result<Vec<(Column, Option<Value>)>, RepositoryError> {
    let values = decode_cursor(cursor, order)?;
    order
        .iter()
        .zip(values.iter())
        .map(|(field, value)| Ok((field.column(), field.bind(value)?)))
        .collect()
}
