use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use crate::Database;
use crate::queries::now_ts;

impl Database {
    // -- Local key/value cache --

    pub fn cache_get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM local_cache WHERE key = ?1", [key], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
    }

    pub fn cache_put(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO local_cache (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now_ts()],
            )?;
            Ok(())
        })
    }

    /// Remove every key under `prefix`. Returns how many were dropped.
    pub fn cache_clear_prefix(&self, prefix: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
            let removed = conn.execute("DELETE FROM local_cache WHERE key LIKE ?1 ESCAPE '\\'", [pattern])?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_overwrites() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.cache_get("k").unwrap(), None);

        db.cache_put("k", "one").unwrap();
        db.cache_put("k", "two").unwrap();
        assert_eq!(db.cache_get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_cache_clear_prefix_is_scoped() {
        let db = Database::open_in_memory().unwrap();
        db.cache_put("thinkspace:a:thoughts", "[]").unwrap();
        db.cache_put("thinkspace:a:chains", "[]").unwrap();
        db.cache_put("thinkspace:b:thoughts", "[]").unwrap();

        assert_eq!(db.cache_clear_prefix("thinkspace:a:").unwrap(), 2);
        assert!(db.cache_get("thinkspace:b:thoughts").unwrap().is_some());
    }
}
