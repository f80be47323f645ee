//! Cache repository — get/set-with-expiry for the `translation_cache` table.
//!
//! Each operation is a single statement under the connection mutex, so
//! reads never observe a half-written entry.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Returns the cached value for `key`, or None when absent or expired.
/// An expired row is treated as a miss; the sweep deletes it later.
pub fn get(db: &Database, key: &str, now: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM translation_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    })
}

/// Inserts or replaces a cache entry with the given expiry.
pub fn set(
    db: &Database,
    key: &str,
    value: &str,
    now: &str,
    expires_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO translation_cache (key, value, inserted_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET value = ?2, inserted_at = ?3, expires_at = ?4",
            params![key, value, now, expires_at],
        )?;
        Ok(())
    })
}

/// Deletes expired entries. Returns the number removed.
pub fn purge_expired(db: &Database, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM translation_cache WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(removed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_set_and_get() {
        let db = test_db();
        set(
            &db,
            "translation:ja:abc",
            "こんにちは",
            "2026-01-01T00:00:00+00:00",
            "2026-01-08T00:00:00+00:00",
        )
        .unwrap();

        let value = get(&db, "translation:ja:abc", "2026-01-02T00:00:00+00:00").unwrap();
        assert_eq!(value.as_deref(), Some("こんにちは"));
    }

    #[test]
    fn test_get_missing() {
        let db = test_db();
        assert!(get(&db, "translation:ja:missing", "2026-01-01T00:00:00+00:00")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_expired_read_is_a_miss() {
        let db = test_db();
        set(
            &db,
            "translation:fr:xyz",
            "bonjour",
            "2026-01-01T00:00:00+00:00",
            "2026-01-02T00:00:00+00:00",
        )
        .unwrap();

        assert!(get(&db, "translation:fr:xyz", "2026-01-02T00:00:00+00:00")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_set_replaces_existing() {
        let db = test_db();
        set(
            &db,
            "translation:ja:k",
            "v1",
            "2026-01-01T00:00:00+00:00",
            "2026-01-08T00:00:00+00:00",
        )
        .unwrap();
        set(
            &db,
            "translation:ja:k",
            "v2",
            "2026-01-02T00:00:00+00:00",
            "2026-01-09T00:00:00+00:00",
        )
        .unwrap();

        let value = get(&db, "translation:ja:k", "2026-01-03T00:00:00+00:00").unwrap();
        assert_eq!(value.as_deref(), Some("v2"));
    }

    #[test]
    fn test_purge_expired() {
        let db = test_db();
        set(
            &db,
            "translation:ja:old",
            "v",
            "2026-01-01T00:00:00+00:00",
            "2026-01-02T00:00:00+00:00",
        )
        .unwrap();
        set(
            &db,
            "translation:ja:fresh",
            "v",
            "2026-01-01T00:00:00+00:00",
            "2026-02-01T00:00:00+00:00",
        )
        .unwrap();

        let removed = purge_expired(&db, "2026-01-03T00:00:00+00:00").unwrap();
        assert_eq!(removed, 1);
        assert!(get(&db, "translation:ja:fresh", "2026-01-03T00:00:00+00:00")
            .unwrap()
            .is_some());
    }
}
