//! Application router configuration for the ledger API.

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};

use crate::{
    AppState,
    company::create_company_endpoint,
    endpoints,
    ledger::{
        create_transaction_endpoint, get_balance_endpoint, get_transactions_endpoint,
        mark_transaction_paid_endpoint, reverse_transaction_endpoint,
    },
    logging::logging_middleware,
    settlement::settle_sale_endpoint,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::COMPANIES, post(create_company_endpoint))
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
        .route(endpoints::SETTLEMENTS, post(settle_sale_endpoint))
        .layer(middleware::from_fn(logging_middleware))
        .fallback(get_not_found)
        .with_state(state)
}

/// The fallback for requests that match no route.
async fn get_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "the requested resource could not be found" })),
    )
        .into_response()
}

#[cfg(test)]
mod router_tests {
    use axum_test::TestServer;
    use rusqlite::Connection;

    use crate::{AppState, build_router};

    #[tokio::test]
    async fn unknown_route_returns_json_not_found() {
        let state = AppState::new(Connection::open_in_memory().unwrap()).unwrap();
        let server = TestServer::new(build_router(state));

        let response = server.get("/api/nonsense").await;

        response.assert_status_not_found();
        let body: serde_json::Value = response.json();
        assert!(body["error"].is_string());
    }
}
