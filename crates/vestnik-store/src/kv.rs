//! JSON documents stored by key.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Insert or replace the document stored under `key`.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn().execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let json: Option<String> = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if a row was deleted.
    pub fn delete_key(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;

    #[test]
    fn test_put_get_delete() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_json::<Vec<u32>>("numbers").unwrap(), None);

        db.put_json("numbers", &vec![1u32, 2, 3]).unwrap();
        db.put_json("numbers", &vec![4u32]).unwrap();
        assert_eq!(db.get_json::<Vec<u32>>("numbers").unwrap(), Some(vec![4]));

        assert!(db.delete_key("numbers").unwrap());
        assert!(!db.delete_key("numbers").unwrap());
    }

    #[test]
    fn test_corrupt_document() {
        let db = Database::open_in_memory().unwrap();
        db.put_json("doc", &"text").unwrap();
        let err = db.get_json::<Vec<u32>>("doc").unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
