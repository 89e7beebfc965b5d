//! Tenant companies for the ledger service.
//!
//! A company is the unit of data isolation: every ledger record belongs
//! to exactly one company and every ledger query is scoped to one.
//! Provisioning beyond the bare record (plans, billing, users) is owned
//! by the SaaS admin console, not this service.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{FromRef, State},
    http::StatusCode,
    response::IntoResponse,
};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AppState, Error, database_id::DatabaseID};

// ============================================================================
// MODELS
// ============================================================================

/// A tenant company that owns a ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// The ID of the company.
    pub id: DatabaseID,
    /// The display name of the company.
    pub name: String,
    /// When the company record was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the company table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_company_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS company (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}

/// Create a new company in the database.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn create_company(name: &str, connection: &Connection) -> Result<Company, Error> {
    let company = connection
        .prepare(
            "INSERT INTO company (name, created_at)
             VALUES (?1, ?2)
             RETURNING id, name, created_at",
        )?
        .query_row((name, OffsetDateTime::now_utc()), map_company_row)?;

    Ok(company)
}

/// Retrieve a company from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid company,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_company(id: DatabaseID, connection: &Connection) -> Result<Company, Error> {
    let company = connection
        .prepare("SELECT id, name, created_at FROM company WHERE id = :id")?
        .query_row(&[(":id", &id)], map_company_row)?;

    Ok(company)
}

/// Map a database row to a [Company].
fn map_company_row(row: &Row) -> Result<Company, rusqlite::Error> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// The form data for creating a company.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompanyForm {
    /// The display name of the company.
    pub name: String,
}

/// The state needed for the company route handlers.
#[derive(Debug, Clone)]
pub struct CompanyState {
    /// The database connection for managing companies.
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for CompanyState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}

/// A route handler for creating a new company.
///
/// # Panics
///
/// Panics if the lock for the database connection is already held by the same thread.
pub async fn create_company_endpoint(
    State(state): State<CompanyState>,
    Json(data): Json<CompanyForm>,
) -> impl IntoResponse {
    let connection = state.db_connection.lock().unwrap();

    create_company(&data.name, &connection).map(|company| (StatusCode::CREATED, Json(company)))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod company_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        company::{create_company, get_company},
        db::initialize,
    };

    fn get_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    #[test]
    fn create_succeeds() {
        let conn = get_test_connection();

        let company = create_company("Studio Bela", &conn).expect("Could not create company");

        assert_eq!(company.name, "Studio Bela");
        assert!(company.id > 0);
    }

    #[test]
    fn get_returns_created_company() {
        let conn = get_test_connection();
        let created = create_company("Oficina Central", &conn).unwrap();

        let got = get_company(created.id, &conn).expect("Could not get company");

        assert_eq!(created, got);
    }

    #[test]
    fn get_fails_on_unknown_id() {
        let conn = get_test_connection();

        let result = get_company(999, &conn);

        assert_eq!(result, Err(Error::NotFound));
    }
}

#[cfg(test)]
mod company_route_tests {
    use std::sync::{Arc, Mutex};

    use axum::{Router, http::StatusCode, routing::post};
    use axum_test::TestServer;
    use rusqlite::Connection;

    use crate::{company::CompanyForm, db::initialize, endpoints};

    use super::{CompanyState, create_company_endpoint};

    fn get_test_state() -> CompanyState {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        initialize(&connection).expect("Could not initialize database");

        CompanyState {
            db_connection: Arc::new(Mutex::new(connection)),
        }
    }

    #[tokio::test]
    async fn create_company_succeeds() {
        let app = Router::new()
            .route(endpoints::COMPANIES, post(create_company_endpoint))
            .with_state(get_test_state());
        let server = TestServer::new(app);

        let response = server
            .post(endpoints::COMPANIES)
            .json(&CompanyForm {
                name: "Studio Bela".to_string(),
            })
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: serde_json::Value = response.json();
        assert_eq!(body["name"], "Studio Bela");
    }
}
