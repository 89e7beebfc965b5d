//! The append-only transaction ledger.
//!
//! This module contains everything related to ledger records:
//! - The `TransactionRecord` model and `NewTransactionRecord` input type
//! - Database functions for appending and querying records
//! - The ledger operations: recording movements, recording reversals,
//!   marking installments paid, and computing a company's balance
//! - Route handlers for the ledger API
//!
//! Records are never updated or deleted once written. A mistaken record
//! is corrected by appending a second record of the opposite type that
//! references the original, and a company's balance is a fold over its
//! full record set rather than a stored running total.

use std::{
    ops::RangeInclusive,
    sync::{Arc, Mutex},
};

use axum::{
    Json,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use rusqlite::{Connection, Row, params_from_iter, types::Value};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{AppState, Error, database_id::DatabaseID, money::round_money};

// ============================================================================
// MODELS
// ============================================================================

/// Whether a ledger record moves money into or out of the company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money received by the company.
    Income,
    /// Money paid out by the company.
    Expense,
}

impl TransactionType {
    /// The opposite movement direction, used to build reversals.
    pub fn flipped(self) -> Self {
        match self {
            Self::Income => Self::Expense,
            Self::Expense => Self::Income,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "income" => Some(Self::Income),
            "expense" => Some(Self::Expense),
            _ => None,
        }
    }
}

/// The kind of business event a ledger record originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// The record belongs to a sale's settlement.
    Sale,
    /// The record compensates an earlier record.
    Reversal,
    /// The record sets an opening balance.
    Initial,
    /// The record was entered by hand.
    #[default]
    Manual,
}

impl ReferenceType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Reversal => "reversal",
            Self::Initial => "initial",
            Self::Manual => "manual",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "sale" => Some(Self::Sale),
            "reversal" => Some(Self::Reversal),
            "initial" => Some(Self::Initial),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// The revenue or expense stream a ledger record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Revenue from selling products.
    ProductSale,
    /// Revenue from providing services.
    ServiceSale,
    /// A movement entered by hand.
    #[default]
    Manual,
}

impl Origin {
    fn as_str(self) -> &'static str {
        match self {
            Self::ProductSale => "product_sale",
            Self::ServiceSale => "service_sale",
            Self::Manual => "manual",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "product_sale" => Some(Self::ProductSale),
            "service_sale" => Some(Self::ServiceSale),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Whether a ledger record has been realized as cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// The money has moved. Paid records count towards the balance.
    Paid,
    /// The money is expected on the record's due date. Pending records
    /// never count towards the balance.
    Pending,
}

impl TransactionStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Pending => "pending",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "paid" => Some(Self::Paid),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// An immutable monetary movement in a company's ledger.
///
/// Once written, a record's amount, type, and identity never change.
/// The one permitted transition is [mark_record_paid], which realizes a
/// pending installment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// The ID of the record. IDs are assigned at creation and never reused.
    pub id: DatabaseID,
    /// The company whose ledger this record belongs to.
    pub company_id: DatabaseID,
    /// When the record was created. This is the bookkeeping timestamp,
    /// not the business due date.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// A text description of what the movement was for.
    pub description: String,
    /// Whether the movement is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// The non-negative monetary amount of the movement.
    pub amount: Decimal,
    /// The business entity this record originated from: a sale ID, or
    /// the ID of the record this one reverses.
    pub reference_id: Option<DatabaseID>,
    /// The kind of business event this record originated from.
    pub reference_type: ReferenceType,
    /// The revenue or expense stream this record belongs to.
    pub origin: Origin,
    /// A free-form classification label used for reporting only.
    pub category: String,
    /// Whether the movement has been realized as cash.
    pub status: TransactionStatus,
    /// When a pending record is expected to be realized. Absent for
    /// immediately realized records.
    pub due_date: Option<Date>,
}

/// The input for appending a record to the ledger.
///
/// Field names match the storage schema, so this type also serves as the
/// JSON body of the create-transaction endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransactionRecord {
    /// The company whose ledger the record is appended to.
    pub company_id: DatabaseID,
    /// A text description of what the movement is for.
    pub description: String,
    /// Whether the movement is income or an expense.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// The non-negative monetary amount of the movement.
    pub amount: Decimal,
    /// The business entity the record originates from.
    #[serde(default)]
    pub reference_id: Option<DatabaseID>,
    /// The kind of business event the record originates from.
    #[serde(default)]
    pub reference_type: ReferenceType,
    /// The revenue or expense stream the record belongs to.
    #[serde(default)]
    pub origin: Origin,
    /// A free-form classification label used for reporting only.
    #[serde(default = "default_category")]
    pub category: String,
    /// Whether the movement has been realized as cash. Defaults to paid
    /// when unspecified.
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    /// When a pending record is expected to be realized.
    #[serde(default)]
    pub due_date: Option<Date>,
}

fn default_category() -> String {
    "other".to_string()
}

impl NewTransactionRecord {
    /// Create an input with the required fields. Optional fields start
    /// at their defaults: no reference, manual origin, category "other",
    /// unspecified status, no due date.
    pub fn new(
        company_id: DatabaseID,
        description: String,
        transaction_type: TransactionType,
        amount: Decimal,
    ) -> Self {
        Self {
            company_id,
            description,
            transaction_type,
            amount,
            reference_id: None,
            reference_type: ReferenceType::default(),
            origin: Origin::default(),
            category: default_category(),
            status: None,
            due_date: None,
        }
    }

    /// Set the business entity the record originates from.
    pub fn reference(mut self, reference_type: ReferenceType, reference_id: DatabaseID) -> Self {
        self.reference_type = reference_type;
        self.reference_id = Some(reference_id);
        self
    }

    /// Set the revenue or expense stream the record belongs to.
    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Set the reporting category.
    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    /// Set the record's status explicitly.
    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set when the record is expected to be realized.
    pub fn due_date(mut self, due_date: Date) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const RECORD_COLUMNS: &str = "id, company_id, created_at, description, \"type\", amount, \
     reference_id, reference_type, origin, category, status, due_date";

/// Create the transaction table and its indexes in the database.
///
/// The partial unique index on `reference_id` guarantees at most one
/// reversal per record, even when two reversal attempts race past the
/// read-then-write check in [record_reversal].
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                description TEXT NOT NULL,
                \"type\" TEXT NOT NULL,
                amount TEXT NOT NULL,
                reference_id INTEGER,
                reference_type TEXT NOT NULL,
                origin TEXT NOT NULL,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                due_date TEXT,
                FOREIGN KEY(company_id) REFERENCES company(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('transaction', 0)",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS transaction_company_id
         ON \"transaction\"(company_id)",
        (),
    )?;

    connection.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS transaction_one_reversal_per_record
         ON \"transaction\"(reference_id) WHERE reference_type = 'reversal'",
        (),
    )?;

    Ok(())
}

/// Append a record to the ledger.
///
/// The record's status defaults to paid when unspecified and its amount
/// is rounded to the monetary precision.
fn append_record(
    input: NewTransactionRecord,
    connection: &Connection,
) -> Result<TransactionRecord, Error> {
    let query = format!(
        "INSERT INTO \"transaction\" (company_id, created_at, description, \"type\", amount,
                reference_id, reference_type, origin, category, status, due_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         RETURNING {RECORD_COLUMNS}"
    );

    let record = connection.prepare(&query)?.query_row(
        (
            input.company_id,
            OffsetDateTime::now_utc(),
            input.description,
            input.transaction_type.as_str(),
            round_money(input.amount).to_string(),
            input.reference_id,
            input.reference_type.as_str(),
            input.origin.as_str(),
            input.category,
            input.status.unwrap_or(TransactionStatus::Paid).as_str(),
            input.due_date,
        ),
        map_record_row,
    )?;

    Ok(record)
}

/// Retrieve a ledger record by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid record,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_record(id: DatabaseID, connection: &Connection) -> Result<TransactionRecord, Error> {
    let query = format!("SELECT {RECORD_COLUMNS} FROM \"transaction\" WHERE id = :id");

    let record = connection
        .prepare(&query)?
        .query_row(&[(":id", &id)], map_record_row)?;

    Ok(record)
}

/// Defines how ledger records should be fetched from [query_records].
///
/// `company_id` is mandatory: every ledger query is scoped to exactly
/// one company.
#[derive(Debug, Default)]
pub struct LedgerQuery {
    /// The company whose ledger to query.
    pub company_id: DatabaseID,
    /// Include records created within `date_range` (inclusive).
    pub date_range: Option<RangeInclusive<Date>>,
    /// Include only records of this type.
    pub transaction_type: Option<TransactionType>,
    /// Include only records with this status.
    pub status: Option<TransactionStatus>,
    /// Include only records with this reference type.
    pub reference_type: Option<ReferenceType>,
    /// Include only records from this stream.
    pub origin: Option<Origin>,
    /// Selects up to the first N (`limit`) records.
    pub limit: Option<u64>,
    /// Ignore the first N records. Only has an effect if `limit` is not `None`.
    pub offset: u64,
}

/// Query a company's ledger records.
///
/// Records are returned in insertion order (increasing ID).
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn query_records(
    filter: LedgerQuery,
    connection: &Connection,
) -> Result<Vec<TransactionRecord>, Error> {
    let mut query_string_parts =
        vec![format!("SELECT {RECORD_COLUMNS} FROM \"transaction\"")];
    let mut where_clause_parts = vec!["company_id = ?1".to_string()];
    let mut query_parameters = vec![Value::Integer(filter.company_id)];

    if let Some(date_range) = filter.date_range {
        where_clause_parts.push(format!(
            "date(created_at) BETWEEN ?{} AND ?{}",
            query_parameters.len() + 1,
            query_parameters.len() + 2,
        ));
        query_parameters.push(Value::Text(date_range.start().to_string()));
        query_parameters.push(Value::Text(date_range.end().to_string()));
    }

    if let Some(transaction_type) = filter.transaction_type {
        where_clause_parts.push(format!("\"type\" = ?{}", query_parameters.len() + 1));
        query_parameters.push(Value::Text(transaction_type.as_str().to_string()));
    }

    if let Some(status) = filter.status {
        where_clause_parts.push(format!("status = ?{}", query_parameters.len() + 1));
        query_parameters.push(Value::Text(status.as_str().to_string()));
    }

    if let Some(reference_type) = filter.reference_type {
        where_clause_parts.push(format!("reference_type = ?{}", query_parameters.len() + 1));
        query_parameters.push(Value::Text(reference_type.as_str().to_string()));
    }

    if let Some(origin) = filter.origin {
        where_clause_parts.push(format!("origin = ?{}", query_parameters.len() + 1));
        query_parameters.push(Value::Text(origin.as_str().to_string()));
    }

    query_string_parts.push(String::from("WHERE ") + &where_clause_parts.join(" AND "));
    query_string_parts.push("ORDER BY id ASC".to_string());

    if let Some(limit) = filter.limit {
        query_string_parts.push(format!("LIMIT {limit} OFFSET {}", filter.offset));
    }

    let query_string = query_string_parts.join(" ");
    let params = params_from_iter(query_parameters.iter());

    connection
        .prepare(&query_string)?
        .query_map(params, map_record_row)?
        .map(|record_result| record_result.map_err(Error::SqlError))
        .collect()
}

/// Retrieve every ledger record tied to one business entity, e.g. all
/// the installments of one sale.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn query_by_reference(
    reference_id: DatabaseID,
    connection: &Connection,
) -> Result<Vec<TransactionRecord>, Error> {
    let query = format!(
        "SELECT {RECORD_COLUMNS} FROM \"transaction\"
         WHERE reference_id = :reference_id ORDER BY id ASC"
    );

    connection
        .prepare(&query)?
        .query_map(&[(":reference_id", &reference_id)], map_record_row)?
        .map(|record_result| record_result.map_err(Error::SqlError))
        .collect()
}

/// Find the reversal of a record, if one exists.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn find_reversal(
    original_id: DatabaseID,
    connection: &Connection,
) -> Result<Option<TransactionRecord>, Error> {
    let query = format!(
        "SELECT {RECORD_COLUMNS} FROM \"transaction\"
         WHERE reference_id = :reference_id AND reference_type = 'reversal'"
    );

    match connection
        .prepare(&query)?
        .query_row(&[(":reference_id", &original_id)], map_record_row)
    {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Map a database row to a [TransactionRecord].
fn map_record_row(row: &Row) -> Result<TransactionRecord, rusqlite::Error> {
    Ok(TransactionRecord {
        id: row.get(0)?,
        company_id: row.get(1)?,
        created_at: row.get(2)?,
        description: row.get(3)?,
        transaction_type: parse_column(row, 4, TransactionType::parse)?,
        amount: parse_column(row, 5, |text| text.parse::<Decimal>().ok())?,
        reference_id: row.get(6)?,
        reference_type: parse_column(row, 7, ReferenceType::parse)?,
        origin: parse_column(row, 8, Origin::parse)?,
        category: row.get(9)?,
        status: parse_column(row, 10, TransactionStatus::parse)?,
        due_date: row.get(11)?,
    })
}

/// Read a TEXT column and parse it with `parse`, reporting a conversion
/// failure in terms `rusqlite` understands.
fn parse_column<T>(
    row: &Row,
    index: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, rusqlite::Error> {
    let text: String = row.get(index)?;

    parse(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            format!("invalid value {text:?}").into(),
        )
    })
}

// ============================================================================
// LEDGER OPERATIONS
// ============================================================================

/// Append a monetary movement to the ledger.
///
/// The record's status defaults to paid when the input specifies none,
/// and its amount is rounded to the monetary precision before storage.
///
/// # Errors
/// This function will return a:
/// - [Error::NegativeAmount] if the input's amount is negative,
/// - [Error::UnknownCompany] if the input's company does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn record_movement(
    input: NewTransactionRecord,
    connection: &Connection,
) -> Result<TransactionRecord, Error> {
    if input.amount.is_sign_negative() && !input.amount.is_zero() {
        return Err(Error::NegativeAmount(input.amount));
    }

    append_record(input, connection)
}

/// Reverse a ledger record by appending a compensating record.
///
/// The reversal has the opposite type and the same amount as the
/// original, references the original record, and copies its origin,
/// category, status, and due date. The original is left untouched, the
/// two records net to zero in the balance.
///
/// A record can be reversed at most once. This is checked here before
/// writing, and enforced by a unique index in the store for the case
/// where two reversal attempts race past the check.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `original_id` does not refer to a valid record,
/// - [Error::DuplicateReversal] if the record already has a reversal,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn record_reversal(
    original_id: DatabaseID,
    connection: &Connection,
) -> Result<TransactionRecord, Error> {
    let original = get_record(original_id, connection)?;

    if find_reversal(original_id, connection)?.is_some() {
        return Err(Error::DuplicateReversal(Some(original_id)));
    }

    let mut reversal = NewTransactionRecord::new(
        original.company_id,
        format!("Reversal: {}", original.description),
        original.transaction_type.flipped(),
        original.amount,
    )
    .reference(ReferenceType::Reversal, original.id)
    .origin(original.origin)
    .category(&original.category)
    .status(original.status);

    reversal.due_date = original.due_date;

    append_record(reversal, connection).map_err(|error| match error {
        // The unique index caught a concurrent reversal of the same record.
        Error::DuplicateReversal(None) => Error::DuplicateReversal(Some(original_id)),
        error => error,
    })
}

/// Transition a pending ledger record to paid.
///
/// This is the one permitted mutation of a stored record: it realizes an
/// installment when the money is collected. Amount, type, and identity
/// remain untouched.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid record,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn mark_record_paid(
    id: DatabaseID,
    connection: &Connection,
) -> Result<TransactionRecord, Error> {
    let query = format!(
        "UPDATE \"transaction\" SET status = 'paid' WHERE id = :id
         RETURNING {RECORD_COLUMNS}"
    );

    let record = connection
        .prepare(&query)?
        .query_row(&[(":id", &id)], map_record_row)?;

    Ok(record)
}

/// Compute a company's cash balance by replaying its ledger.
///
/// Only paid records contribute. Income counts positive and expense
/// negative, except that reversal records are netted against the type
/// they reverse instead of counting as movements of their own: an
/// expense-type reversal reduces income rather than increasing expenses.
/// The result is identical for any insertion order of the same records.
///
/// # Errors
/// This function will return a:
/// - [Error::UnknownCompany] if `company_id` does not refer to a valid company,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn compute_balance(company_id: DatabaseID, connection: &Connection) -> Result<Decimal, Error> {
    crate::company::get_company(company_id, connection).map_err(|error| match error {
        Error::NotFound => Error::UnknownCompany,
        error => error,
    })?;

    let paid_records = query_records(
        LedgerQuery {
            company_id,
            status: Some(TransactionStatus::Paid),
            ..Default::default()
        },
        connection,
    )?;

    let mut income = Decimal::ZERO;
    let mut income_reversals = Decimal::ZERO;
    let mut expenses = Decimal::ZERO;
    let mut expense_reversals = Decimal::ZERO;

    for record in &paid_records {
        let is_reversal = record.reference_type == ReferenceType::Reversal;

        match (record.transaction_type, is_reversal) {
            (TransactionType::Income, false) => income += record.amount,
            (TransactionType::Income, true) => income_reversals += record.amount,
            (TransactionType::Expense, false) => expenses += record.amount,
            (TransactionType::Expense, true) => expense_reversals += record.amount,
        }
    }

    Ok((income - expense_reversals) - (expenses - income_reversals))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The state needed for the ledger route handlers.
#[derive(Debug, Clone)]
pub struct LedgerState {
    /// The database connection for accessing the ledger.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for LedgerState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler for appending a movement to the ledger.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn create_transaction_endpoint(
    State(state): State<LedgerState>,
    Json(input): Json<NewTransactionRecord>,
) -> impl IntoResponse {
    let connection = state.db_connection.lock().unwrap();

    record_movement(input, &connection).map(|record| (StatusCode::CREATED, Json(record)))
}

/// The query parameters accepted by [get_transactions_endpoint].
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionListParams {
    /// The company whose ledger to query.
    pub company_id: DatabaseID,
    /// Include only records of this type.
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// Include only records with this status.
    pub status: Option<TransactionStatus>,
    /// Include only records with this reference type.
    pub reference_type: Option<ReferenceType>,
    /// Include only records from this stream.
    pub origin: Option<Origin>,
    /// Include only records created on or after this date.
    pub start_date: Option<Date>,
    /// Include only records created on or before this date.
    pub end_date: Option<Date>,
    /// Selects up to the first N records.
    pub limit: Option<u64>,
    /// Ignore the first N records. Only has an effect with `limit`.
    pub offset: Option<u64>,
}

/// A route handler for listing a company's ledger records.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_transactions_endpoint(
    State(state): State<LedgerState>,
    Query(params): Query<TransactionListParams>,
) -> impl IntoResponse {
    let date_range = match (params.start_date, params.end_date) {
        (Some(start), Some(end)) => Some(start..=end),
        (Some(start), None) => Some(start..=Date::MAX),
        (None, Some(end)) => Some(Date::MIN..=end),
        (None, None) => None,
    };

    let filter = LedgerQuery {
        company_id: params.company_id,
        date_range,
        transaction_type: params.transaction_type,
        status: params.status,
        reference_type: params.reference_type,
        origin: params.origin,
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
    };

    let connection = state.db_connection.lock().unwrap();

    query_records(filter, &connection).map(Json)
}

/// A route handler for reversing a ledger record.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn reverse_transaction_endpoint(
    State(state): State<LedgerState>,
    Path(transaction_id): Path<DatabaseID>,
) -> impl IntoResponse {
    let connection = state.db_connection.lock().unwrap();

    record_reversal(transaction_id, &connection)
        .map(|record| (StatusCode::CREATED, Json(record)))
}

/// A route handler for marking a pending ledger record paid.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn mark_transaction_paid_endpoint(
    State(state): State<LedgerState>,
    Path(transaction_id): Path<DatabaseID>,
) -> impl IntoResponse {
    let connection = state.db_connection.lock().unwrap();

    mark_record_paid(transaction_id, &connection).map(Json)
}

/// The response body of [get_balance_endpoint].
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    /// The company the balance belongs to.
    pub company_id: DatabaseID,
    /// The company's cash balance.
    pub balance: Decimal,
}

/// A route handler for computing a company's balance.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn get_balance_endpoint(
    State(state): State<LedgerState>,
    Path(company_id): Path<DatabaseID>,
) -> impl IntoResponse {
    let connection = state.db_connection.lock().unwrap();

    compute_balance(company_id, &connection).map(|balance| {
        Json(BalanceResponse {
            company_id,
            balance,
        })
    })
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod ledger_route_tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        Router,
        http::StatusCode,
        routing::{get, post, put},
    };
    use axum_test::TestServer;
    use rusqlite::Connection;
    use rust_decimal_macros::dec;

    use crate::{
        company::create_company,
        db::initialize,
        endpoints,
        ledger::{NewTransactionRecord, TransactionType, record_movement},
    };

    use super::{
        LedgerState, create_transaction_endpoint, get_balance_endpoint,
        get_transactions_endpoint, mark_transaction_paid_endpoint, reverse_transaction_endpoint,
    };

    fn get_test_server() -> (TestServer, LedgerState, i64) {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        initialize(&connection).expect("Could not initialize database");
        let company = create_company("Studio Bela", &connection).unwrap();

        let state = LedgerState {
            db_connection: Arc::new(Mutex::new(connection)),
        };

        let app = Router::new()
            .route(
                endpoints::TRANSACTIONS,
                post(create_transaction_endpoint).get(get_transactions_endpoint),
            )
            .route(
                endpoints::REVERSE_TRANSACTION,
                post(reverse_transaction_endpoint),
            )
            .route(
                endpoints::MARK_TRANSACTION_PAID,
                put(mark_transaction_paid_endpoint),
            )
            .route(endpoints::COMPANY_BALANCE, get(get_balance_endpoint))
            .with_state(state.clone());

        let server = TestServer::new(app);

        (server, state, company.id)
    }

    #[tokio::test]
    async fn create_transaction_returns_created_record() {
        let (server, _, company_id) = get_test_server();

        let response = server
            .post(endpoints::TRANSACTIONS)
            .json(&NewTransactionRecord::new(
                company_id,
                "Opening balance".to_string(),
                TransactionType::Income,
                dec!(150),
            ))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["type"], "income");
        assert_eq!(body["amount"], "150");
        assert_eq!(body["status"], "paid");
    }

    #[tokio::test]
    async fn create_transaction_rejects_negative_amount() {
        let (server, _, company_id) = get_test_server();

        let response = server
            .post(endpoints::TRANSACTIONS)
            .json(&NewTransactionRecord::new(
                company_id,
                "bad".to_string(),
                TransactionType::Income,
                dec!(-5),
            ))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn list_transactions_filters_by_type() {
        let (server, state, company_id) = get_test_server();
        {
            let connection = state.db_connection.lock().unwrap();
            record_movement(
                NewTransactionRecord::new(
                    company_id,
                    "in".to_string(),
                    TransactionType::Income,
                    dec!(10),
                ),
                &connection,
            )
            .unwrap();
            record_movement(
                NewTransactionRecord::new(
                    company_id,
                    "out".to_string(),
                    TransactionType::Expense,
                    dec!(3),
                ),
                &connection,
            )
            .unwrap();
        }

        let response = server
            .get(endpoints::TRANSACTIONS)
            .add_query_param("company_id", company_id)
            .add_query_param("type", "expense")
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["description"], "out");
    }

    #[tokio::test]
    async fn list_transactions_filters_by_date_range() {
        let (server, state, company_id) = get_test_server();
        {
            let connection = state.db_connection.lock().unwrap();
            record_movement(
                NewTransactionRecord::new(
                    company_id,
                    "in".to_string(),
                    TransactionType::Income,
                    dec!(10),
                ),
                &connection,
            )
            .unwrap();
        }
        let today = time::OffsetDateTime::now_utc().date();
        let yesterday = today.previous_day().unwrap();

        let hit = server
            .get(endpoints::TRANSACTIONS)
            .add_query_param("company_id", company_id)
            .add_query_param("start_date", today.to_string())
            .add_query_param("end_date", today.to_string())
            .await;
        hit.assert_status_ok();
        let body: serde_json::Value = hit.json();
        assert_eq!(body.as_array().unwrap().len(), 1);

        let miss = server
            .get(endpoints::TRANSACTIONS)
            .add_query_param("company_id", company_id)
            .add_query_param("end_date", yesterday.to_string())
            .await;
        miss.assert_status_ok();
        let body: serde_json::Value = miss.json();
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reverse_endpoint_conflicts_on_second_call() {
        let (server, state, company_id) = get_test_server();
        let original_id = {
            let connection = state.db_connection.lock().unwrap();
            record_movement(
                NewTransactionRecord::new(
                    company_id,
                    "sale".to_string(),
                    TransactionType::Income,
                    dec!(50),
                ),
                &connection,
            )
            .unwrap()
            .id
        };
        let path = endpoints::format_endpoint(endpoints::REVERSE_TRANSACTION, original_id);

        let first = server.post(&path).await;
        first.assert_status(StatusCode::CREATED);

        let second = server.post(&path).await;
        second.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn balance_endpoint_reports_replayed_balance() {
        let (server, state, company_id) = get_test_server();
        {
            let connection = state.db_connection.lock().unwrap();
            record_movement(
                NewTransactionRecord::new(
                    company_id,
                    "in".to_string(),
                    TransactionType::Income,
                    dec!(100),
                ),
                &connection,
            )
            .unwrap();
            record_movement(
                NewTransactionRecord::new(
                    company_id,
                    "out".to_string(),
                    TransactionType::Expense,
                    dec!(40.50),
                ),
                &connection,
            )
            .unwrap();
        }

        let response = server
            .get(&endpoints::format_endpoint(
                endpoints::COMPANY_BALANCE,
                company_id,
            ))
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["balance"], "59.50");
    }

    #[tokio::test]
    async fn mark_paid_endpoint_returns_updated_record() {
        let (server, state, company_id) = get_test_server();
        let pending_id = {
            let connection = state.db_connection.lock().unwrap();
            record_movement(
                NewTransactionRecord::new(
                    company_id,
                    "installment".to_string(),
                    TransactionType::Income,
                    dec!(40),
                )
                .status(crate::ledger::TransactionStatus::Pending),
                &connection,
            )
            .unwrap()
            .id
        };

        let response = server
            .put(&endpoints::format_endpoint(
                endpoints::MARK_TRANSACTION_PAID,
                pending_id,
            ))
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "paid");
    }
}
