// Identifier Validation
// Table and column names cannot be bound as parameters, so they are
// validated against a strict pattern and then quoted per dialect

use crate::db::traits::{DatabaseError, DatabaseType, Result};

/// Longest identifier part accepted (SQL Server's limit; the others allow less or equal)
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Check a table or column name.
///
/// Accepts one or two dot-separated parts (`table` or `schema.table`), each
/// matching `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "'{}' has too many dot-separated parts",
            name
        )));
    }
    for part in parts {
        validate_part(name, part)?;
    }
    Ok(())
}

fn validate_part(full: &str, part: &str) -> Result<()> {
    let mut chars = part.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "'{}' must contain only letters, digits and underscores and not start with a digit",
            full
        )));
    }
    if part.len() > MAX_IDENTIFIER_LEN {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "'{}' is longer than {} characters",
            full, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

/// Validate `name` and quote each part for the given dialect.
///
/// PostgreSQL parts are lowercased first, so the quoted name resolves the
/// same way the bare name would.
pub fn quote_identifier(db_type: DatabaseType, name: &str) -> Result<String> {
    validate_identifier(name)?;
    let quoted: Vec<String> = name
        .split('.')
        .map(|part| match db_type {
            DatabaseType::Postgresql => format!("\"{}\"", part.to_ascii_lowercase()),
            DatabaseType::Sqlite => format!("\"{}\"", part),
            DatabaseType::Mysql => format!("`{}`", part),
            DatabaseType::Mssql => format!("[{}]", part),
        })
        .collect();
    Ok(quoted.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::traits::DatabaseErrorKind;

    #[test]
    fn test_valid_identifiers() {
        for name in ["users", "_private", "Order_Items2", "dbo.users", "a"] {
            assert!(validate_identifier(name).is_ok(), "{} should be valid", name);
        }
    }

    #[test]
    fn test_rejects_injection_and_odd_names() {
        for name in [
            "users; DROP TABLE users;",
            "users--",
            "1users",
            "",
            "user name",
            "a.b.c",
            "users.",
            "\"users\"",
            "naïve",
        ] {
            let err = validate_identifier(name).unwrap_err();
            assert_eq!(err.kind(), DatabaseErrorKind::InvalidIdentifier, "{}", name);
        }
    }

    #[test]
    fn test_rejects_overlong_part() {
        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(validate_identifier(&long).is_err());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LEN)).is_ok());
    }

    #[test]
    fn test_quoting_per_dialect() {
        assert_eq!(quote_identifier(DatabaseType::Postgresql, "public.users").unwrap(), "\"public\".\"users\"");
        assert_eq!(quote_identifier(DatabaseType::Sqlite, "users").unwrap(), "\"users\"");
        assert_eq!(quote_identifier(DatabaseType::Mysql, "shop.orders").unwrap(), "`shop`.`orders`");
        assert_eq!(quote_identifier(DatabaseType::Mssql, "dbo.users").unwrap(), "[dbo].[users]");
        assert!(quote_identifier(DatabaseType::Mssql, "users]; --").is_err());
    }

    #[test]
    fn test_postgres_folds_case_like_bare_names() {
        assert_eq!(quote_identifier(DatabaseType::Postgresql, "Orders").unwrap(), "\"orders\"");
        assert_eq!(quote_identifier(DatabaseType::Postgresql, "Public.USERS").unwrap(), "\"public\".\"users\"");
        // other dialects keep the name as written
        assert_eq!(quote_identifier(DatabaseType::Mssql, "Orders").unwrap(), "[Orders]");
        assert_eq!(quote_identifier(DatabaseType::Sqlite, "Orders").unwrap(), "\"Orders\"");
    }
}
