use chrono::Utc;
use maq_core::BoardState;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

pub const STORE_SCHEMA_VERSION: i64 = 1;

/// Document path the live board is stored under, both in the hub's durable
/// store and in each client's local mirror. The name predates this port.
pub const BOARD_DOC_PATH: &str = "imgStates";

/// Key prefixes for the two immutable records a shift handover produces.
pub const SNAPSHOT_DOC_PREFIX: &str = "snapshots/";
pub const HANDOVER_DOC_PREFIX: &str = "handover/";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// SQLite-backed store. On the hub it is the durable home of the shared
/// document, the snapshot records and the push-token registry; on a board
/// client the same type (usually a different file) serves as the local
/// mirror that seeds the board before the first remote delivery.
pub struct StatusStore {
    conn: Connection,
}

impl StatusStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > STORE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: STORE_SCHEMA_VERSION,
            });
        }
        if current < 1 {
            let sql = include_str!("../migrations/0001_status_store.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }
        Ok(())
    }

    /// Durable upsert of an entire JSON document at a path, replacing any
    /// prior content. This is the only write primitive the sync layer gets.
    pub fn upsert_document(&self, path: &str, body: &Value) -> Result<(), StorageError> {
        let body_json = serde_json::to_string(body)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO documents (path, body_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET
                body_json=excluded.body_json,
                updated_at=excluded.updated_at
            ",
            params![path, body_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn document(&self, path: &str) -> Result<Option<Value>, StorageError> {
        let body_json: Option<String> = self
            .conn
            .query_row(
                "SELECT body_json FROM documents WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        match body_json {
            None => Ok(None),
            Some(body_json) => serde_json::from_str(&body_json)
                .map(Some)
                .map_err(|err| StorageError::Serialization(err.to_string())),
        }
    }

    /// Documents whose path starts with `prefix`, most recent key first.
    /// Snapshot keys sort lexicographically in chronological order, so a
    /// descending path sort is a descending time sort.
    pub fn documents_with_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, Value)>, StorageError> {
        let pattern = format!("{}%", prefix.replace('%', "").replace('_', "\\_"));
        let mut stmt = self.conn.prepare(
            "
            SELECT path, body_json FROM documents
            WHERE path LIKE ?1 ESCAPE '\\'
            ORDER BY path DESC
            ",
        )?;
        let rows = stmt.query_map(params![pattern], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut documents = Vec::new();
        for row in rows {
            let (path, body_json) = row?;
            let body = serde_json::from_str(&body_json)
                .map_err(|err| StorageError::Serialization(err.to_string()))?;
            documents.push((path, body));
        }
        Ok(documents)
    }

    /// Mirror write-through for the live board.
    pub fn save_board(&self, board: &BoardState) -> Result<(), StorageError> {
        self.upsert_document(BOARD_DOC_PATH, &board.to_value())
    }

    /// Loads the mirrored board. A missing or malformed document yields
    /// `None` / an empty board rather than an error; the mirror is a
    /// best-effort fallback, not a source of truth.
    pub fn load_board(&self) -> Result<Option<BoardState>, StorageError> {
        match self.document(BOARD_DOC_PATH) {
            Ok(Some(value)) => Ok(Some(BoardState::from_value(&value))),
            Ok(None) => Ok(None),
            Err(StorageError::Serialization(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Registers a push delivery endpoint, keyed by the token itself so a
    /// re-registration refreshes metadata instead of duplicating.
    pub fn register_token(
        &self,
        token: &str,
        user_agent: Option<&str>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO push_tokens (token, user_agent, registered_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(token) DO UPDATE SET
                user_agent=excluded.user_agent,
                registered_at=excluded.registered_at
            ",
            params![token, user_agent, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn tokens(&self) -> Result<Vec<String>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT token FROM push_tokens ORDER BY token")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maq_core::{MachineCategory, MachineStatus};
    use serde_json::json;

    #[test]
    fn document_upsert_replaces_whole_body() {
        let store = StatusStore::open_in_memory().expect("open store");
        store
            .upsert_document("imgStates", &json!({"S1": {"category": 4}}))
            .expect("first write");
        store
            .upsert_document("imgStates", &json!({"S2": {"category": 1}}))
            .expect("second write");
        let doc = store.document("imgStates").expect("read").expect("present");
        assert!(doc.get("S1").is_none());
        assert!(doc.get("S2").is_some());
    }

    #[test]
    fn board_mirror_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StatusStore::open(dir.path().join("mirror.db")).expect("open store");
        assert!(store.load_board().expect("empty load").is_none());

        let mut board = BoardState::new();
        board.set(
            "S1",
            MachineStatus::new(MachineCategory::Mechanical, Some(7), None).unwrap(),
        );
        store.save_board(&board).expect("save");
        let loaded = store.load_board().expect("load").expect("present");
        assert_eq!(loaded, board);
    }

    #[test]
    fn prefix_listing_is_most_recent_first() {
        let store = StatusStore::open_in_memory().expect("open store");
        for key in ["20260301_070000", "20260301_190001", "20260228_190000"] {
            store
                .upsert_document(&format!("snapshots/{key}"), &json!({}))
                .expect("write snapshot");
        }
        store
            .upsert_document("handover/20260301_190001", &json!({}))
            .expect("write handover");

        let listed = store
            .documents_with_prefix(SNAPSHOT_DOC_PREFIX)
            .expect("list");
        let paths: Vec<_> = listed.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "snapshots/20260301_190001",
                "snapshots/20260301_070000",
                "snapshots/20260228_190000",
            ]
        );
    }

    #[test]
    fn token_registration_deduplicates() {
        let store = StatusStore::open_in_memory().expect("open store");
        store
            .register_token("tok-1", Some("Safari iPhone"))
            .expect("register");
        store.register_token("tok-1", Some("Safari iPad")).expect("re-register");
        store.register_token("tok-2", None).expect("register");
        assert_eq!(store.tokens().expect("tokens"), vec!["tok-1", "tok-2"]);
    }
}
