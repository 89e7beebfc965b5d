//! Caixa is the financial ledger service for a multi-tenant retail and
//! service business management application.
//!
//! The ledger is append-only: monetary movements are only ever inserted,
//! corrections are made with compensating reversal records, and a
//! company's balance is recomputed from the full record set on every
//! query. This library provides the ledger operations, the sale
//! settlement planner that turns a finalized sale into ledger records,
//! and a JSON REST API exposing them.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use rust_decimal::Decimal;
use tokio::signal;

mod app_state;
mod company;
mod database_id;
mod db;
mod endpoints;
mod ledger;
mod logging;
mod money;
mod routing;
mod settlement;

pub use app_state::AppState;
pub use company::{Company, create_company, get_company};
pub use db::initialize as initialize_db;
pub use ledger::{
    LedgerQuery, NewTransactionRecord, Origin, ReferenceType, TransactionRecord,
    TransactionStatus, TransactionType, compute_balance, find_reversal, mark_record_paid,
    query_by_reference, query_records, record_movement, record_reversal,
};
pub use logging::logging_middleware;
pub use routing::build_router;
pub use settlement::{
    ItemKind, PaymentMethod, Sale, SaleItem, plan_sale_movements, settle_sale,
};

use crate::database_id::DatabaseID;

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the ledger service.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A negative amount was used to create a ledger record.
    ///
    /// Ledger amounts are always non-negative, the direction of a
    /// movement is carried by its type (income or expense).
    #[error("{0} is a negative amount, which is not allowed on a ledger record")]
    NegativeAmount(Decimal),

    /// The company ID on a ledger operation did not match an existing
    /// company, so the record has no valid tenant scope.
    #[error("the company ID does not refer to a valid company")]
    UnknownCompany,

    /// A sale was submitted for settlement with an installment count of
    /// zero. Every sale settles into at least one installment.
    #[error("{0} is not a valid installment count, expected at least 1")]
    InvalidInstallmentCount(u32),

    /// A sale's down payment was larger than its total.
    #[error("the down payment {down_payment} exceeds the sale total {total}")]
    DownPaymentExceedsTotal {
        /// The down payment on the offending sale.
        down_payment: Decimal,
        /// The total of the offending sale.
        total: Decimal,
    },

    /// A reversal was requested for a record that already has one.
    ///
    /// A record must never be reversed twice. The ID is the record the
    /// duplicate reversal targeted, when known.
    #[error("the record already has a reversal")]
    DuplicateReversal(Option<DatabaseID>),

    /// The requested resource was not found.
    ///
    /// For HTTP request handlers, the client should check that the
    /// parameters (e.g., ID) are correct and that the resource has been
    /// created.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// A sale settlement stopped partway through appending its records.
    ///
    /// The records listed in `recorded` were written before the failure
    /// and are not rolled back. The caller must reconcile them, either
    /// by reversing them or by completing the settlement manually.
    #[error(
        "sale settlement was interrupted after {} of its records were written: {cause}",
        .recorded.len()
    )]
    PartialSettlement {
        /// The IDs of the records appended before the failure.
        recorded: Vec<DatabaseID>,
        /// The error that interrupted the settlement.
        cause: Box<Error>,
    },

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 787 occurs when a FOREIGN KEY constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(_))
                if sql_error.extended_code == 787 =>
            {
                Error::UnknownCompany
            }
            // Code 2067 occurs when a UNIQUE constraint failed. The only
            // unique index on the ledger is the one-reversal-per-record
            // guard, so a violation means a concurrent reversal won.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("transaction.reference_id") =>
            {
                Error::DuplicateReversal(None)
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound | Error::UnknownCompany => {
                error_response(StatusCode::NOT_FOUND, &self.to_string())
            }
            Error::DuplicateReversal(_) => error_response(StatusCode::CONFLICT, &self.to_string()),
            Error::NegativeAmount(_)
            | Error::InvalidInstallmentCount(_)
            | Error::DownPaymentExceedsTotal { .. } => {
                error_response(StatusCode::UNPROCESSABLE_ENTITY, &self.to_string())
            }
            Error::PartialSettlement {
                ref recorded,
                ref cause,
            } => {
                tracing::error!(
                    "sale settlement interrupted after records {recorded:?}: {cause}"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": self.to_string(),
                        "recorded_transaction_ids": recorded,
                    })),
                )
                    .into_response()
            }
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "an unexpected error occurred, check the server logs for more details",
                )
            }
        }
    }
}

/// Create a JSON error response with the given `status` code.
fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
