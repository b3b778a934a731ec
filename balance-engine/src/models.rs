use crate::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use validator::ValidationError;

/// Ledger entry kind, persisted as the `operation.type` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationType {
    Deposit,
    Withdraw,
    OutgoingTransfer,
    IncomingTransfer,
    Reservation,
    DeReservation,
    Revenue,
}

impl OperationType {
    pub const ALL: [OperationType; 7] = [
        OperationType::Deposit,
        OperationType::Withdraw,
        OperationType::OutgoingTransfer,
        OperationType::IncomingTransfer,
        OperationType::Reservation,
        OperationType::DeReservation,
        OperationType::Revenue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Deposit => "deposit",
            OperationType::Withdraw => "withdraw",
            OperationType::OutgoingTransfer => "outgoing-transfer",
            OperationType::IncomingTransfer => "incoming-transfer",
            OperationType::Reservation => "reservation",
            OperationType::DeReservation => "de-reservation",
            OperationType::Revenue => "revenue",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        OperationType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EngineError::Internal(format!("unknown operation type: {}", s)))
    }
}

/// Funds held against a product order until cancelled or confirmed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub order_id: i64,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub user_id: i64,
    pub product_id: i64,
    pub order_id: i64,
    pub amount: Decimal,
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub user_id: i64,
    pub product_id: Option<i64>,
    pub order_id: Option<i64>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub user_id: i64,
    pub product_id: Option<i64>,
    pub order_id: Option<i64>,
    pub amount: Decimal,
    pub kind: OperationType,
}

impl NewOperation {
    /// Plain balance movement with no product attached
    pub fn balance(user_id: i64, amount: Decimal, kind: OperationType) -> Self {
        NewOperation {
            user_id,
            product_id: None,
            order_id: None,
            amount,
            kind,
        }
    }

    pub fn reservation(
        user_id: i64,
        product_id: i64,
        order_id: i64,
        amount: Decimal,
        kind: OperationType,
    ) -> Self {
        NewOperation {
            user_id,
            product_id: Some(product_id),
            order_id: Some(order_id),
            amount,
            kind,
        }
    }
}

/// Allow-listed orderings for the operation history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistorySort {
    #[default]
    CreatedAt,
    Amount,
    Type,
}

impl HistorySort {
    /// Unknown or missing keys fall back to newest-first
    pub fn parse(key: Option<&str>) -> Self {
        match key.map(str::trim) {
            Some("amount") => HistorySort::Amount,
            Some("type") => HistorySort::Type,
            _ => HistorySort::CreatedAt,
        }
    }

    pub fn order_by(&self) -> &'static str {
        match self {
            HistorySort::CreatedAt => "created_at DESC, id DESC",
            HistorySort::Amount => "amount DESC, id DESC",
            HistorySort::Type => "type DESC, id DESC",
        }
    }
}

/// History page request after clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub user_id: i64,
    pub sort: HistorySort,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRevenue {
    pub product_id: i64,
    pub amount: Decimal,
}

/// Confirmed revenue per product for one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueReport {
    pub year: i32,
    pub month: u32,
    pub lines: Vec<ProductRevenue>,
}

impl RevenueReport {
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount).sum()
    }

    /// Renders `product_id;amount` lines for accounting export
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_writer(Vec::new());

        for line in &self.lines {
            writer
                .write_record([line.product_id.to_string(), line.amount.to_string()])
                .map_err(|e| EngineError::Internal(format!("report write failed: {}", e)))?;
        }

        writer
            .into_inner()
            .map_err(|e| EngineError::Internal(format!("report flush failed: {}", e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}

/// Message sent to the notification bus after a committed state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: i64,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
}

impl Notification {
    pub fn balance(user_id: i64, amount: Decimal) -> Self {
        Notification {
            user_id,
            amount,
            reservation_id: None,
            product_id: None,
            order_id: None,
        }
    }

    pub fn reservation(reservation: &Reservation) -> Self {
        Notification {
            user_id: reservation.user_id,
            amount: reservation.amount,
            reservation_id: Some(reservation.id),
            product_id: Some(reservation.product_id),
            order_id: Some(reservation.order_id),
        }
    }
}

/// Decimal places kept by the `NUMERIC(14, 2)` money columns
pub const MONEY_SCALE: u32 = 2;

/// Exclusive upper bound on any stored amount or balance
pub const MONEY_UPPER_BOUND: i64 = 1_000_000_000_000;

/// Reject values the money columns would round or overflow
pub fn check_storable(amount: Decimal) -> Result<()> {
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(EngineError::Validation(format!(
            "amount {} has more than {} decimal places",
            amount, MONEY_SCALE
        )));
    }
    if amount.abs() >= Decimal::from(MONEY_UPPER_BOUND) {
        return Err(EngineError::Validation(format!(
            "amount {} must be below {}",
            amount, MONEY_UPPER_BOUND
        )));
    }
    Ok(())
}

fn validate_amount(amount: &Decimal) -> std::result::Result<(), ValidationError> {
    if !amount.is_sign_positive() || amount.is_zero() {
        return Err(ValidationError::new("amount must be > 0"));
    }
    if check_storable(*amount).is_err() {
        return Err(ValidationError::new("amount must fit NUMERIC(14, 2)"));
    }
    Ok(())
}

/// Account creation request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateAccountRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BalanceQuery {
    pub user_id: i64,
}

/// Deposit or withdrawal request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct AmountRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[validate(custom = "validate_amount")]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct TransferRequest {
    #[validate(range(min = 1))]
    pub from: i64,
    #[validate(range(min = 1))]
    pub to: i64,
    #[validate(custom = "validate_amount")]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateReservationRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[validate(range(min = 1))]
    pub product_id: i64,
    #[validate(range(min = 1))]
    pub order_id: i64,
    #[validate(custom = "validate_amount")]
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct ReservationIdRequest {
    #[validate(range(min = 1))]
    pub reservation_id: i64,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct HistoryRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    pub sort: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct ReportRequest {
    #[validate(range(min = 1970, max = 9999))]
    pub year: i32,
    #[validate(range(min = 1, max = 12))]
    pub month: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub reservation_id: i64,
}
