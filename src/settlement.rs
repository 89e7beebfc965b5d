//! Sale settlement planning.
//!
//! A finalized sale becomes a set of ledger records: the proceeds are
//! split between the product and service revenue streams in proportion
//! to the sale's items, and between an optional down payment (realized
//! immediately) and future installments on a fixed 30-day cadence. This
//! module contains the planner that builds that set deterministically,
//! and the settlement function that appends it to the ledger.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
    http::StatusCode,
    response::IntoResponse,
};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::{
    AppState, Error,
    database_id::DatabaseID,
    ledger::{
        NewTransactionRecord, Origin, ReferenceType, TransactionRecord, TransactionStatus,
        TransactionType, record_movement,
    },
    money::{split_evenly, split_proportionally},
};

// ============================================================================
// MODELS
// ============================================================================

/// How the customer pays for a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash.
    Dinheiro,
    /// Instant bank transfer.
    Pix,
    /// Credit or debit card.
    Cartao,
    /// Promissory note.
    Promissoria,
}

impl PaymentMethod {
    /// Whether the money changes hands at the moment of the sale.
    ///
    /// Only cash and pix settle immediately; cards and promissory notes
    /// clear later, so their installments start out pending.
    pub fn is_immediate(self) -> bool {
        matches!(self, Self::Dinheiro | Self::Pix)
    }
}

/// Whether a sale item is a product or a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A physical product from stock.
    Product,
    /// A service performed for the customer.
    Service,
}

/// One line item of a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem {
    /// What was sold.
    pub description: String,
    /// Whether the item is a product or a service.
    pub kind: ItemKind,
    /// The price of one unit.
    pub unit_price: Decimal,
    /// How many units were sold.
    pub quantity: u32,
}

impl SaleItem {
    /// The line total of this item.
    pub fn total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A finalized commercial transaction, as produced by the sale
/// management subsystem.
///
/// The sale itself is not stored here: this service only consumes it to
/// derive the ledger records of its settlement. `total` is the amount to
/// settle, with the discount already applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    /// The ID of the sale in the sale management subsystem.
    pub id: DatabaseID,
    /// The company the sale belongs to.
    pub company_id: DatabaseID,
    /// The human-facing sale number, used in record descriptions.
    pub sequence: i64,
    /// The customer's name, used in record descriptions.
    pub customer: String,
    /// The items sold.
    pub items: Vec<SaleItem>,
    /// The sum of the item line totals.
    pub subtotal: Decimal,
    /// The discount applied to the subtotal.
    #[serde(default)]
    pub discount: Decimal,
    /// The amount to settle.
    pub total: Decimal,
    /// The day the sale was made. Installment due dates count from here.
    pub date: Date,
    /// How the customer pays.
    pub payment_method: PaymentMethod,
    /// How many installments the remainder after the down payment is
    /// divided into. At least 1.
    pub installment_count: u32,
    /// The amount paid up front, realized on the sale date.
    #[serde(default)]
    pub down_payment: Decimal,
}

/// The fixed interval between installment due dates.
///
/// Deliberately calendar-month-naive: the second installment of a sale
/// made on January 15th is due on March 16th, not March 15th.
const INSTALLMENT_CADENCE: Duration = Duration::days(30);

/// The reporting category of every settlement record.
const SALE_CATEGORY: &str = "Vendas";

// ============================================================================
// PLANNER
// ============================================================================

/// Build the ordered list of ledger records that settle `sale`.
///
/// Down-payment records come first (one per non-zero stream, paid on the
/// sale date), followed by the installment records in due-date order.
/// The record amounts always sum to `sale.total` exactly: within each
/// split the last share absorbs the rounding remainder.
///
/// When the sale's items sum to zero, the proceeds are split evenly
/// between the two streams. That 50/50 ratio is a policy default, not a
/// derived rule.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidInstallmentCount] if the sale has no installments,
/// - [Error::NegativeAmount] if the total or down payment is negative,
/// - or [Error::DownPaymentExceedsTotal] if the down payment is larger
///   than the total.
pub fn plan_sale_movements(sale: &Sale) -> Result<Vec<NewTransactionRecord>, Error> {
    if sale.installment_count == 0 {
        return Err(Error::InvalidInstallmentCount(sale.installment_count));
    }
    if sale.total.is_sign_negative() && !sale.total.is_zero() {
        return Err(Error::NegativeAmount(sale.total));
    }
    if sale.down_payment.is_sign_negative() && !sale.down_payment.is_zero() {
        return Err(Error::NegativeAmount(sale.down_payment));
    }
    if sale.down_payment > sale.total {
        return Err(Error::DownPaymentExceedsTotal {
            down_payment: sale.down_payment,
            total: sale.total,
        });
    }

    let streams = stream_ratios(sale);
    let ratios: Vec<Decimal> = streams.iter().map(|stream| stream.ratio).collect();
    let mut records = Vec::new();

    if sale.down_payment > Decimal::ZERO {
        let shares = split_proportionally(sale.down_payment, &ratios);

        for (stream, share) in streams.iter().zip(shares) {
            records.push(
                settlement_record(sale, stream, share, describe_down_payment(sale, stream))
                    .status(TransactionStatus::Paid)
                    .due_date(sale.date),
            );
        }
    }

    let amount_to_install = sale.total - sale.down_payment;

    if amount_to_install > Decimal::ZERO {
        let installments = split_evenly(amount_to_install, sale.installment_count);

        for (index, installment_amount) in installments.into_iter().enumerate() {
            let status = installment_status(sale, index as u32);
            let due_date = sale
                .date
                .saturating_add(INSTALLMENT_CADENCE * (index as i32 + 1));
            let shares = split_proportionally(installment_amount, &ratios);

            for (stream, share) in streams.iter().zip(shares) {
                records.push(
                    settlement_record(
                        sale,
                        stream,
                        share,
                        describe_installment(sale, stream, index as u32 + 1),
                    )
                    .status(status)
                    .due_date(due_date),
                );
            }
        }
    }

    Ok(records)
}

/// A revenue stream's share of a sale.
struct StreamRatio {
    origin: Origin,
    tag: &'static str,
    ratio: Decimal,
}

/// The non-zero revenue streams of `sale` and their share of the
/// proceeds, derived from the item line totals.
fn stream_ratios(sale: &Sale) -> Vec<StreamRatio> {
    let product_total: Decimal = sale
        .items
        .iter()
        .filter(|item| item.kind == ItemKind::Product)
        .map(SaleItem::total)
        .sum();
    let service_total: Decimal = sale
        .items
        .iter()
        .filter(|item| item.kind == ItemKind::Service)
        .map(SaleItem::total)
        .sum();
    let subtotal = product_total + service_total;

    let (ratio_product, ratio_service) = if subtotal.is_zero() {
        let half = Decimal::new(5, 1);
        (half, half)
    } else {
        (product_total / subtotal, service_total / subtotal)
    };

    [
        StreamRatio {
            origin: Origin::ProductSale,
            tag: "Prod",
            ratio: ratio_product,
        },
        StreamRatio {
            origin: Origin::ServiceSale,
            tag: "Serv",
            ratio: ratio_service,
        },
    ]
    .into_iter()
    .filter(|stream| !stream.ratio.is_zero())
    .collect()
}

/// Whether an installment is realized at the moment of the sale.
///
/// Only the sole installment of a single-installment sale with no down
/// payment, paid in cash or by pix, starts out paid. Everything else is
/// pending until collected.
fn installment_status(sale: &Sale, index: u32) -> TransactionStatus {
    let immediate = sale.down_payment.is_zero()
        && index == 0
        && sale.installment_count == 1
        && sale.payment_method.is_immediate();

    if immediate {
        TransactionStatus::Paid
    } else {
        TransactionStatus::Pending
    }
}

/// A partially-built income record of a sale's settlement.
fn settlement_record(
    sale: &Sale,
    stream: &StreamRatio,
    amount: Decimal,
    description: String,
) -> NewTransactionRecord {
    NewTransactionRecord::new(sale.company_id, description, TransactionType::Income, amount)
        .reference(ReferenceType::Sale, sale.id)
        .origin(stream.origin)
        .category(SALE_CATEGORY)
}

fn describe_down_payment(sale: &Sale, stream: &StreamRatio) -> String {
    format!(
        "Venda #{:04} ({}) entrada - {}",
        sale.sequence, stream.tag, sale.customer
    )
}

fn describe_installment(sale: &Sale, stream: &StreamRatio, number: u32) -> String {
    format!(
        "Venda #{:04} ({}) {}/{} - {}",
        sale.sequence, stream.tag, number, sale.installment_count, sale.customer
    )
}

// ============================================================================
// SETTLEMENT
// ============================================================================

/// Plan and append the ledger records that settle `sale`.
///
/// Records are appended one at a time and there is no surrounding store
/// transaction. If an append fails partway through, the records already
/// written stay in the ledger and the error reports their IDs so the
/// caller can reconcile, either by reversing them or by completing the
/// settlement by hand.
///
/// # Errors
/// This function will return a:
/// - planner error (see [plan_sale_movements]) if the sale is invalid,
/// - the underlying error if the first append fails before anything was
///   written,
/// - or [Error::PartialSettlement] if a later append fails.
pub fn settle_sale(sale: &Sale, connection: &Connection) -> Result<Vec<TransactionRecord>, Error> {
    let planned = plan_sale_movements(sale)?;
    let mut recorded = Vec::with_capacity(planned.len());

    for input in planned {
        match record_movement(input, connection) {
            Ok(record) => recorded.push(record),
            Err(error) if recorded.is_empty() => return Err(error),
            Err(error) => {
                return Err(Error::PartialSettlement {
                    recorded: recorded.iter().map(|record| record.id).collect(),
                    cause: Box::new(error),
                });
            }
        }
    }

    Ok(recorded)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The state needed for the settlement route handler.
#[derive(Debug, Clone)]
pub struct SettlementState {
    /// The database connection for appending settlement records.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for SettlementState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler for settling a finalized sale into the ledger.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn settle_sale_endpoint(
    State(state): State<SettlementState>,
    Json(sale): Json<Sale>,
) -> impl IntoResponse {
    let connection = state.db_connection.lock().unwrap();

    settle_sale(&sale, &connection).map(|records| (StatusCode::CREATED, Json(records)))
}

// ============================================================================
// TESTS
// ============================================================================



#[cfg(test)]
mod settlement_route_tests {
    use std::sync::{Arc, Mutex};

    use axum::{Router, http::StatusCode, routing::post};
    use axum_test::TestServer;
    use rusqlite::Connection;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use time::macros::date;

    use crate::{company::create_company, db::initialize, endpoints};

    use super::{
        ItemKind, PaymentMethod, Sale, SaleItem, SettlementState, settle_sale_endpoint,
    };

    fn get_test_server() -> (TestServer, i64) {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        initialize(&connection).expect("Could not initialize database");
        let company = create_company("Studio Bela", &connection).unwrap();

        let app = Router::new()
            .route(endpoints::SETTLEMENTS, post(settle_sale_endpoint))
            .with_state(SettlementState {
                db_connection: Arc::new(Mutex::new(connection)),
            });

        (TestServer::new(app), company.id)
    }

    #[tokio::test]
    async fn settle_sale_returns_created_records() {
        let (server, company_id) = get_test_server();
        let sale = Sale {
            id: 7,
            company_id,
            sequence: 12,
            customer: "Maria".to_string(),
            items: vec![
                SaleItem {
                    description: "Shampoo".to_string(),
                    kind: ItemKind::Product,
                    unit_price: dec!(60),
                    quantity: 1,
                },
                SaleItem {
                    description: "Corte".to_string(),
                    kind: ItemKind::Service,
                    unit_price: dec!(40),
                    quantity: 1,
                },
            ],
            subtotal: dec!(100),
            discount: Decimal::ZERO,
            total: dec!(100),
            date: date!(2026 - 01 - 15),
            payment_method: PaymentMethod::Dinheiro,
            installment_count: 1,
            down_payment: Decimal::ZERO,
        };

        let response = server.post(endpoints::SETTLEMENTS).json(&sale).await;

        response.assert_status(StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["origin"], "product_sale");
        assert_eq!(records[1]["origin"], "service_sale");

        let amounts: Vec<Decimal> = records
            .iter()
            .map(|record| record["amount"].as_str().unwrap().parse().unwrap())
            .collect();
        assert_eq!(amounts, vec![dec!(60), dec!(40)]);
    }

    #[tokio::test]
    async fn settle_sale_rejects_zero_installments() {
        let (server, company_id) = get_test_server();
        let sale = Sale {
            id: 7,
            company_id,
            sequence: 12,
            customer: "Maria".to_string(),
            items: vec![],
            subtotal: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: dec!(10),
            date: date!(2026 - 01 - 15),
            payment_method: PaymentMethod::Dinheiro,
            installment_count: 0,
            down_payment: Decimal::ZERO,
        };

        let response = server.post(endpoints::SETTLEMENTS).json(&sale).await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }
}
