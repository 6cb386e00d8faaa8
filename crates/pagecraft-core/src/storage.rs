use crate::blocks::{Block, BlockPatch, BlockType};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug)]
pub enum StorageError {
    NotFound,
    AuthRequired,
    Backend(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Creation fields; the collaborator assigns the id and timestamp.
#[derive(Clone, Debug)]
pub struct NewBlock {
    pub page_id: String,
    pub parent_block_id: Option<String>,
    pub owner_id: String,
}

/// Out-of-band change notification, keyed by block id.
#[derive(Clone, Debug)]
pub enum ChangeEvent {
    Created(Block),
    Updated { id: String, patch: BlockPatch },
    Deleted { id: String },
}

/// Persistence collaborator consumed by the engine. New blocks are always
/// created as empty text blocks; everything else is a field-level update.
pub trait BlockStorage {
    fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, StorageError>;

    fn create_block(&mut self, fields: NewBlock) -> Result<Block, StorageError>;

    /// Fails with `NotFound` when the id is unknown.
    fn update_block_fields(&mut self, block_id: &str, patch: &BlockPatch)
        -> Result<(), StorageError>;

    /// Fails with `NotFound` when the id is unknown.
    fn delete_block_by_id(&mut self, block_id: &str) -> Result<(), StorageError>;

    /// Drains pending change notifications; backends without a stream return
    /// nothing.
    fn poll_changes(&mut self) -> Result<Vec<ChangeEvent>, StorageError> {
        Ok(Vec::new())
    }
}

/// Type-specific fields stored as a JSON column alongside the text payload.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BlockProps {
    #[serde(default)]
    checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default)]
    is_expanded: bool,
}

impl BlockProps {
    fn of(block: &Block) -> Self {
        Self {
            checked: block.checked,
            src: block.src.clone(),
            language: block.language.clone(),
            is_expanded: block.is_expanded,
        }
    }
}

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "init",
    up: "CREATE TABLE IF NOT EXISTS blocks (
            id INTEGER PRIMARY KEY,
            uid TEXT UNIQUE NOT NULL,
            page_uid TEXT NOT NULL,
            parent_uid TEXT,
            owner_uid TEXT NOT NULL,
            block_type TEXT NOT NULL DEFAULT 'text',
            content TEXT NOT NULL DEFAULT '',
            props TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS blocks_page_created
          ON blocks(page_uid, created_at);
        CREATE INDEX IF NOT EXISTS blocks_parent_created
          ON blocks(parent_uid, created_at);",
}];

/// SQLite-backed block storage.
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        let storage = Self { conn };
        storage.run_migrations()?;
        Ok(storage)
    }

    pub fn run_migrations(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );",
        )?;

        let current_version: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for migration in MIGRATIONS {
            if migration.version > current_version {
                let tx = self.conn.unchecked_transaction()?;
                tx.execute_batch(migration.up)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    params![migration.version, migration.name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    fn get_block(&self, block_id: &str) -> Result<Option<Block>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT uid, page_uid, parent_uid, block_type, content, props, created_at
                 FROM blocks WHERE uid = ?1",
                [block_id],
                map_block_row,
            )
            .optional()?;
        match row {
            Some(raw) => Ok(Some(raw.into_block()?)),
            None => Ok(None),
        }
    }

    fn write_block(&self, block: &Block) -> Result<usize, StorageError> {
        let props = serde_json::to_string(&BlockProps::of(block))?;
        let affected = self.conn.execute(
            "UPDATE blocks
             SET block_type = ?1, content = ?2, props = ?3, updated_at = ?4
             WHERE uid = ?5",
            params![
                block.block_type.as_str(),
                block.content,
                props,
                Utc::now().timestamp_millis(),
                block.id,
            ],
        )?;
        Ok(affected)
    }
}

struct BlockRow {
    uid: String,
    page_uid: String,
    parent_uid: Option<String>,
    block_type: String,
    content: String,
    props: String,
    created_at: i64,
}

impl BlockRow {
    fn into_block(self) -> Result<Block, StorageError> {
        let props: BlockProps = serde_json::from_str(&self.props)?;
        Ok(Block {
            id: self.uid,
            page_id: self.page_uid,
            parent_block_id: self.parent_uid,
            block_type: BlockType::from_str(&self.block_type).unwrap_or_default(),
            content: self.content,
            checked: props.checked,
            src: props.src,
            language: props.language,
            is_expanded: props.is_expanded,
            created_at: self.created_at,
        })
    }
}

fn map_block_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRow> {
    Ok(BlockRow {
        uid: row.get(0)?,
        page_uid: row.get(1)?,
        parent_uid: row.get(2)?,
        block_type: row.get(3)?,
        content: row.get(4)?,
        props: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl BlockStorage for SqliteStorage {
    fn list_blocks(&self, page_id: &str) -> Result<Vec<Block>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT uid, page_uid, parent_uid, block_type, content, props, created_at
             FROM blocks
             WHERE page_uid = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([page_id], map_block_row)?;
        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?.into_block()?);
        }
        Ok(blocks)
    }

    fn create_block(&mut self, fields: NewBlock) -> Result<Block, StorageError> {
        let block = Block {
            id: Uuid::new_v4().to_string(),
            page_id: fields.page_id,
            parent_block_id: fields.parent_block_id,
            block_type: BlockType::Text,
            content: String::new(),
            checked: false,
            src: None,
            language: None,
            is_expanded: false,
            created_at: Utc::now().timestamp_millis(),
        };
        let props = serde_json::to_string(&BlockProps::of(&block))?;
        self.conn.execute(
            "INSERT INTO blocks (uid, page_uid, parent_uid, owner_uid, block_type, content,
                                 props, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                block.id,
                block.page_id,
                block.parent_block_id,
                fields.owner_id,
                block.block_type.as_str(),
                block.content,
                props,
                block.created_at,
            ],
        )?;
        Ok(block)
    }

    fn update_block_fields(
        &mut self,
        block_id: &str,
        patch: &BlockPatch,
    ) -> Result<(), StorageError> {
        let mut block = self.get_block(block_id)?.ok_or(StorageError::NotFound)?;
        patch.apply(&mut block);
        let affected = self.write_block(&block)?;
        if affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    fn delete_block_by_id(&mut self, block_id: &str) -> Result<(), StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM blocks WHERE uid = ?1", [block_id])?;
        if affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
