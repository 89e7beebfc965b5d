//! The API endpoint URIs.
//!
//! For endpoints that take a parameter, e.g., '/api/transactions/{transaction_id}/reversal',
//! tests use `format_endpoint`.

/// The route to create a company.
pub const COMPANIES: &str = "/api/companies";
/// The route to append and list ledger records.
pub const TRANSACTIONS: &str = "/api/transactions";
/// The route to reverse a ledger record.
pub const REVERSE_TRANSACTION: &str = "/api/transactions/{transaction_id}/reversal";
/// The route to mark a pending ledger record paid.
pub const MARK_TRANSACTION_PAID: &str = "/api/transactions/{transaction_id}/paid";
/// The route to compute a company's balance.
pub const COMPANY_BALANCE: &str = "/api/companies/{company_id}/balance";
/// The route to settle a finalized sale into the ledger.
pub const SETTLEMENTS: &str = "/api/settlements";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/api/companies/{company_id}/balance',
/// '{company_id}' is the parameter.
///
/// This function assumes that an endpoint path only contains ASCII characters
/// and a single parameter.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// original `endpoint_path`.
#[cfg(test)]
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let mut param_start = None;
    let mut param_end = None;

    for (i, c) in endpoint_path.chars().enumerate() {
        if c == '{' {
            param_start = Some(i);
        } else if param_start.is_some() && c == '}' {
            param_end = Some(i + 1);
            break;
        }
    }

    let param_start = match param_start {
        Some(start) => start,
        None => return endpoint_path.to_string(),
    };

    let param_end = param_end.unwrap_or(endpoint_path.len());

    format!(
        "{}{}{}",
        &endpoint_path[..param_start],
        id,
        &endpoint_path[param_end..]
    )
}
