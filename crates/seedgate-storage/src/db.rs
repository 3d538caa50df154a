//! Embedded piece/file completion database.
//!
//! One sqlite file per torrent at `<dir>/.torrent.db` with two tables:
//! `piece_completion("index", complete, unique("index"))` and
//! `file_completion("path", unique("path"))`. A failed open degrades to an
//! in-memory map with a warning; errors after a successful open surface.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags, params};
use tracing::warn;

use seedgate_core::{Error, Result};

enum Backend {
    Sqlite(Connection),
    Memory {
        pieces: HashMap<u32, bool>,
        files: HashSet<String>,
    },
    Closed,
}

/// Durable record of verified pieces and wholly-downloaded files.
pub struct CompletionDb {
    backend: Mutex<Backend>,
}

impl CompletionDb {
    /// Open (creating if needed) the completion database in `dir`.
    ///
    /// A sqlite failure here is not fatal: the store continues with an
    /// in-memory completion map so the torrent stays usable, at the cost of
    /// losing completion state across restarts.
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(super::layout::DB_FILE);
        match Self::open_sqlite(&path) {
            Ok(conn) => Self {
                backend: Mutex::new(Backend::Sqlite(conn)),
            },
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "piece completion db unavailable; using in-memory completion"
                );
                Self {
                    backend: Mutex::new(Backend::Memory {
                        pieces: HashMap::new(),
                        files: HashSet::new(),
                    }),
                }
            }
        }
    }

    fn open_sqlite(path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            create table if not exists piece_completion("index", complete, unique("index"));
            create table if not exists file_completion("path", unique("path"));
            "#,
        )?;
        Ok(conn)
    }

    /// Rehydrate the in-memory bitmap: `bitmap[i]` is true when piece `i` is
    /// recorded complete.
    pub fn load_bitmap(&self, num_pieces: u32) -> Result<Vec<bool>> {
        let mut bitmap = vec![false; num_pieces as usize];
        let backend = self.lock();
        match &*backend {
            Backend::Sqlite(conn) => {
                let mut stmt = conn
                    .prepare(r#"select "index", complete from piece_completion"#)
                    .map_err(db_error)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                    })
                    .map_err(db_error)?;
                for row in rows {
                    let (index, complete) = row.map_err(db_error)?;
                    if complete != 0 {
                        if let Ok(index) = usize::try_from(index) {
                            if index < bitmap.len() {
                                bitmap[index] = true;
                            }
                        }
                    }
                }
            }
            Backend::Memory { pieces, .. } => {
                for (&index, &complete) in pieces {
                    if complete && (index as usize) < bitmap.len() {
                        bitmap[index as usize] = true;
                    }
                }
            }
            Backend::Closed => return Err(closed()),
        }
        Ok(bitmap)
    }

    /// Record the completion state of one piece.
    pub fn set_piece(&self, index: u32, complete: bool) -> Result<()> {
        let mut backend = self.lock();
        match &mut *backend {
            Backend::Sqlite(conn) => conn
                .execute(
                    r#"insert or replace into piece_completion("index", complete) values (?1, ?2)"#,
                    params![i64::from(index), i64::from(complete)],
                )
                .map(|_| ())
                .map_err(db_error),
            Backend::Memory { pieces, .. } => {
                pieces.insert(index, complete);
                Ok(())
            }
            Backend::Closed => Err(closed()),
        }
    }

    /// Read the recorded completion state of one piece; `None` when the piece
    /// has never been recorded.
    pub fn get_piece(&self, index: u32) -> Result<Option<bool>> {
        let backend = self.lock();
        match &*backend {
            Backend::Sqlite(conn) => {
                let mut stmt = conn
                    .prepare(r#"select complete from piece_completion where "index" = ?1"#)
                    .map_err(db_error)?;
                let mut rows = stmt.query(params![i64::from(index)]).map_err(db_error)?;
                match rows.next().map_err(db_error)? {
                    Some(row) => {
                        let complete: i64 = row.get(0).map_err(db_error)?;
                        Ok(Some(complete != 0))
                    }
                    None => Ok(None),
                }
            }
            Backend::Memory { pieces, .. } => Ok(pieces.get(&index).copied()),
            Backend::Closed => Err(closed()),
        }
    }

    /// Record a wholly-downloaded file; idempotent.
    pub fn insert_file(&self, path: &str) -> Result<()> {
        let mut backend = self.lock();
        match &mut *backend {
            Backend::Sqlite(conn) => conn
                .execute(
                    r#"insert or replace into file_completion("path") values (?1)"#,
                    params![path],
                )
                .map(|_| ())
                .map_err(db_error),
            Backend::Memory { files, .. } => {
                files.insert(path.to_string());
                Ok(())
            }
            Backend::Closed => Err(closed()),
        }
    }

    /// Whether a file is recorded wholly downloaded.
    pub fn file_complete(&self, path: &str) -> Result<bool> {
        let backend = self.lock();
        match &*backend {
            Backend::Sqlite(conn) => {
                let mut stmt = conn
                    .prepare(r#"select 1 from file_completion where "path" = ?1"#)
                    .map_err(db_error)?;
                let mut rows = stmt.query(params![path]).map_err(db_error)?;
                Ok(rows.next().map_err(db_error)?.is_some())
            }
            Backend::Memory { files, .. } => Ok(files.contains(path)),
            Backend::Closed => Err(closed()),
        }
    }

    /// Close the database. Idempotent; later calls on other methods fail.
    pub fn close(&self) {
        let mut backend = self.lock();
        *backend = Backend::Closed;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Backend> {
        match self.backend.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Query the `file_completion` table of an existing database read-only.
///
/// Absence of the database, the table, or the row all mean "not complete";
/// only real I/O failures surface as errors.
pub fn read_file_completion(db_path: &Path, file_path: &str) -> Result<bool> {
    if !db_path.exists() {
        return Ok(false);
    }
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(db_error)?;
    let mut stmt = match conn.prepare(r#"select 1 from file_completion where "path" = ?1"#) {
        Ok(stmt) => stmt,
        Err(err) if err.to_string().contains("no such table") => return Ok(false),
        Err(err) => return Err(db_error(err)),
    };
    let mut rows = stmt.query(params![file_path]).map_err(db_error)?;
    Ok(rows.next().map_err(db_error)?.is_some())
}

fn db_error(err: rusqlite::Error) -> Error {
    Error::integrity(format!("completion db: {err}"))
}

fn closed() -> Error {
    Error::fatal("completion db is closed")
}
