//! Database schema definitions for the checkpoint database

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per (tenant, phase); a save replaces the whole row
CREATE TABLE IF NOT EXISTS checkpoints (
    tenant TEXT NOT NULL,
    phase TEXT NOT NULL,
    complete INTEGER NOT NULL DEFAULT 0,
    saved_at TEXT NOT NULL,
    items TEXT NOT NULL,
    metadata TEXT NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant, phase)
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_tenant ON checkpoints(tenant);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='checkpoints'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
