use chrono::{DateTime, Days, NaiveDate, Utc};
use thiserror::Error;

/// Errors raised when a listing query is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryValidationError {
    #[error("limit must be greater than zero")]
    ZeroLimit,

    #[error("page must be 1 or greater")]
    ZeroPage,

    #[error("date range start {start} is after end {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("date range requires both a start and an end date")]
    LoneDateBound,

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("unknown sort column '{0}'")]
    UnknownSortColumn(String),

    #[error("unknown sort direction '{0}'")]
    UnknownSortDirection(String),
}

/// Order-level columns the listing may be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSortColumn {
    Id,
    UserId,
    Status,
    TotalPrice,
    CreatedAt,
    UpdatedAt,
}

impl OrderSortColumn {
    /// Returns the column name in the `orders` table.
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderSortColumn::Id => "id",
            OrderSortColumn::UserId => "user_id",
            OrderSortColumn::Status => "status",
            OrderSortColumn::TotalPrice => "total_price",
            OrderSortColumn::CreatedAt => "created_at",
            OrderSortColumn::UpdatedAt => "updated_at",
        }
    }
}

impl std::str::FromStr for OrderSortColumn {
    type Err = QueryValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(OrderSortColumn::Id),
            "user_id" => Ok(OrderSortColumn::UserId),
            "status" => Ok(OrderSortColumn::Status),
            "total_price" => Ok(OrderSortColumn::TotalPrice),
            "created_at" => Ok(OrderSortColumn::CreatedAt),
            "updated_at" => Ok(OrderSortColumn::UpdatedAt),
            other => Err(QueryValidationError::UnknownSortColumn(other.to_string())),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortDirection {
    type Err = QueryValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(QueryValidationError::UnknownSortDirection(s.to_string())),
        }
    }
}

/// One `(column, direction)` sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: OrderSortColumn,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(column: OrderSortColumn) -> Self {
        Self {
            column,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: OrderSortColumn) -> Self {
        Self {
            column,
            direction: SortDirection::Desc,
        }
    }
}

/// Page-based pagination. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub page: u32,
}

impl Pagination {
    pub fn new(limit: u32, page: u32) -> Self {
        Self { limit, page }
    }

    /// Number of rows to skip: `(page - 1) * limit`.
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }

    pub fn validate(&self) -> Result<(), QueryValidationError> {
        if self.limit == 0 {
            return Err(QueryValidationError::ZeroLimit);
        }
        if self.page == 0 {
            return Err(QueryValidationError::ZeroPage);
        }
        Ok(())
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 10, page: 1 }
    }
}

/// Inclusive range of whole days on order creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range covering `start` through `end`, both days included.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, QueryValidationError> {
        if start > end {
            return Err(QueryValidationError::InvertedDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Builds an optional range from optional bounds.
    ///
    /// Both bounds or neither must be supplied.
    pub fn from_bounds(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<Self>, QueryValidationError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            (None, None) => Ok(None),
            _ => Err(QueryValidationError::LoneDateBound),
        }
    }

    /// Parses optional `YYYY-MM-DD` bounds as supplied by an adapter.
    pub fn parse_bounds(
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Option<Self>, QueryValidationError> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|_| QueryValidationError::InvalidDate(s.to_string()))
        };
        let start = start.filter(|s| !s.trim().is_empty()).map(parse).transpose()?;
        let end = end.filter(|s| !s.trim().is_empty()).map(parse).transpose()?;
        Self::from_bounds(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// First instant inside the range.
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.start.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// First instant after the range.
    pub fn ends_before(&self) -> DateTime<Utc> {
        self.end
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.starts_at() && timestamp < self.ends_before()
    }
}

/// Query for one page of orders with their line items.
#[derive(Debug, Clone, Default)]
pub struct OrderListQuery {
    /// Sort keys applied in order. Empty means store-default order.
    pub sort: Vec<SortKey>,

    pub pagination: Pagination,

    /// Filter on order creation day.
    pub date_range: Option<DateRange>,
}

impl OrderListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sort key.
    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn page(mut self, limit: u32, page: u32) -> Self {
        self.pagination = Pagination::new(limit, page);
        self
    }

    pub fn created_between(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn validate(&self) -> Result<(), QueryValidationError> {
        self.pagination.validate()
    }
}

/// Filter for product listings.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    /// Case-insensitive substring of the product name.
    pub name: Option<String>,

    /// Products created on this day.
    pub created_on: Option<NaiveDate>,
}

impl ProductFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_contains(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn created_on(mut self, day: NaiveDate) -> Self {
        self.created_on = Some(day);
        self
    }
}
