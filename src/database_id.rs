//! The ID type for records stored in the application database.

/// Alias for the integer type used for database row IDs.
pub type DatabaseID = i64;
