//! Database initialization for the ledger service.

use rusqlite::Connection;

use crate::{company::create_company_table, ledger::create_transaction_table};

/// Create the tables for the ledger's domain models.
///
/// Tables are only created if they do not already exist, so this
/// function is safe to call on every start-up.
///
/// # Errors
/// Returns an error if a table or index cannot be created or if there is
/// an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), rusqlite::Error> {
    // Company scoping relies on foreign keys, which SQLite does not
    // enforce unless asked to.
    connection.pragma_update(None, "foreign_keys", "ON")?;

    create_company_table(connection)?;
    create_transaction_table(connection)?;

    Ok(())
}

#[cfg(test)]
mod initialize_tests {
    use rusqlite::Connection;

    use super::initialize;

    #[test]
    fn initialize_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();

        initialize(&conn).expect("Could not initialize database");

        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(name) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('company', 'transaction')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(table_count, 2);
    }

    #[test]
    fn initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize(&conn).expect("Could not initialize database");
        initialize(&conn).expect("Second initialize failed");
    }
}
