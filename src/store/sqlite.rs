// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// SQLite 键值表: key = 图片 key, item = JSON 文档

use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Observation, ObservationStore};

pub struct SqliteStore {
    conn: Connection,
    table: String,
}

/// 表名规则与托管键值库一致: 3-255 个字母、数字、'_'、'-'、'.'
fn validate_table_name(table: &str) -> Result<()> {
    let re = Regex::new(r"^[A-Za-z0-9_.\-]{3,255}$")?;
    if !re.is_match(table) {
        bail!("invalid table name {table:?}");
    }
    Ok(())
}

impl SqliteStore {
    pub fn open(db_path: &Path, table: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open results db {}", db_path.display()))?;
        Self::with_connection(conn, table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table)
    }

    fn with_connection(conn: Connection, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        let mut store = Self {
            conn,
            table: table.to_string(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
              key TEXT PRIMARY KEY,
              item TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
            table = self.table
        ))?;
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl ObservationStore for SqliteStore {
    fn put(&mut self, obs: &Observation) -> Result<()> {
        let item = serde_json::to_string(obs)?;
        self.conn
            .execute(
                &format!(
                    r#"
                    INSERT INTO "{}"(key, item, updated_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET item = excluded.item, updated_at = excluded.updated_at
                    "#,
                    self.table
                ),
                params![obs.image, item, crate::execution_timestamp()],
            )
            .with_context(|| format!("failed to write {} to table {}", obs.image, self.table))?;
        Ok(())
    }

    fn get(&self, image: &str) -> Result<Option<Observation>> {
        let item: Option<String> = self
            .conn
            .query_row(
                &format!(r#"SELECT item FROM "{}" WHERE key = ?1"#, self.table),
                params![image],
                |row| row.get(0),
            )
            .optional()?;
        item.map(|s| serde_json::from_str(&s).with_context(|| format!("corrupt record {image}")))
            .transpose()
    }

    fn list(&self) -> Result<Vec<Observation>> {
        let mut stmt = self
            .conn
            .prepare(&format!(r#"SELECT key, item FROM "{}" ORDER BY key ASC"#, self.table))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, item) = row?;
            out.push(serde_json::from_str(&item).with_context(|| format!("corrupt record {key}"))?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(image: &str, count: u32) -> Observation {
        Observation {
            image: image.to_string(),
            output_key: Some(format!("resultados/out_{image}")),
            person_count: count,
            battery: None,
            image_time: None,
            run_time: "2024-05-01T10:00:00-03:00".to_string(),
        }
    }

    #[test]
    fn upsert_overwrites_same_key() {
        let mut store = SqliteStore::open_in_memory("yolo-resultados").unwrap();
        store.put(&obs("a.jpg", 3)).unwrap();
        store.put(&obs("b.jpg", 1)).unwrap();
        store.put(&obs("a.jpg", 5)).unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.get("a.jpg").unwrap().unwrap().person_count, 5);
        assert!(store.contains("b.jpg").unwrap());
        assert!(store.get("c.jpg").unwrap().is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        {
            let mut store = SqliteStore::open(&path, "yolo-resultados").unwrap();
            store.put(&obs("a.jpg", 0)).unwrap();
        }
        let store = SqliteStore::open(&path, "yolo-resultados").unwrap();
        assert_eq!(store.get("a.jpg").unwrap().unwrap().person_count, 0);
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(SqliteStore::open_in_memory("x\"; DROP TABLE y; --").is_err());
        assert!(SqliteStore::open_in_memory("ab").is_err());
    }
}
