use super::log_failure;
use crate::errors::{EngineError, Result};
use crate::models::{HistoryQuery, HistorySort, Operation, RevenueReport};
use crate::store::LedgerStore;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tracing::debug;

/// Read side of the ledger: history pages and monthly revenue
pub struct OperationService {
    store: Arc<dyn LedgerStore>,
    page_limit: i64,
}

impl OperationService {
    pub fn new(store: Arc<dyn LedgerStore>, page_limit: i64) -> Self {
        OperationService {
            store,
            page_limit: page_limit.max(1),
        }
    }

    /// Normalise paging: out-of-range limits become the page limit and a
    /// negative offset starts from the first row
    pub fn history_query(
        &self,
        user_id: i64,
        sort: HistorySort,
        offset: i64,
        limit: i64,
    ) -> HistoryQuery {
        let limit = if limit <= 0 || limit > self.page_limit {
            self.page_limit
        } else {
            limit
        };

        HistoryQuery {
            user_id,
            sort,
            offset: offset.max(0),
            limit,
        }
    }

    pub async fn get_history(
        &self,
        user_id: i64,
        sort: HistorySort,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Operation>> {
        let query = self.history_query(user_id, sort, offset, limit);

        if self
            .store
            .balance(user_id)
            .await
            .map_err(|e| log_failure("get_history", e))?
            .is_none()
        {
            return Err(EngineError::AccountNotFound(user_id));
        }

        let operations = self
            .store
            .history(&query)
            .await
            .map_err(|e| log_failure("get_history", e))?;

        debug!(
            "Loaded {} operations for user {} ({:?})",
            operations.len(),
            user_id,
            query
        );
        Ok(operations)
    }

    /// Revenue confirmed during the given calendar month (UTC), per product
    pub async fn create_report(&self, year: i32, month: u32) -> Result<RevenueReport> {
        let (from, to) = month_bounds(year, month)?;

        let lines = self
            .store
            .product_revenue(from, to)
            .await
            .map_err(|e| log_failure("create_report", e))?;

        Ok(RevenueReport { year, month, lines })
    }
}

/// `[first instant of the month, first instant of the next month)`
pub fn month_bounds(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || EngineError::Validation(format!("invalid report month {}-{:02}", year, month));

    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1).ok_or_else(invalid)?, 1)
    } else {
        (year, month + 1)
    };

    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(invalid)?;
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(invalid)?;

    Ok((Utc.from_utc_datetime(&start), Utc.from_utc_datetime(&end)))
}
