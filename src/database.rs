//! Database Module
//! SQLite-backed catalog of downloaded tracks

use crate::error::{Error, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const TRACK_COLUMNS: &str = "id, title, file_path, thumbnail, duration, created_at";

thread_local! {
    // One connection per thread and database file. SQLite handles are never shared
    // between the UI, download and monitor threads.
    static CONNECTIONS: RefCell<HashMap<PathBuf, Connection>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    /// Local image path or remote URL
    pub thumbnail: String,
    /// Whole seconds
    pub duration: i64,
    pub created_at: String,
}

impl Track {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Track {
            id: row.get(0)?,
            title: row.get(1)?,
            file_path: row.get(2)?,
            thumbnail: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            duration: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            created_at: row.get(5)?,
        })
    }
}

/// Handle to the catalog. Cheap to clone; every thread that uses a clone gets its own
/// connection to the same database file.
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let catalog = Self {
            path: path.to_path_buf(),
        };
        // Open eagerly so a broken database shows up at startup
        catalog.with_conn(|_| Ok(()))?;
        Ok(catalog)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        CONNECTIONS.with(|cell| {
            let mut connections = cell.borrow_mut();
            let conn = match connections.entry(self.path.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(open_connection(&self.path)?),
            };
            f(conn)
        })
    }

    pub fn add(&self, title: &str, file_path: &str, thumbnail: &str, duration: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO songs (title, file_path, thumbnail, duration) VALUES (?1, ?2, ?3, ?4)",
                params![title, file_path, thumbnail, duration],
            );

            match inserted {
                Ok(_) => {
                    let id = conn.last_insert_rowid();
                    log::info!("Catalogued track {} at {}", id, file_path);
                    Ok(id)
                }
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(Error::DuplicatePath(file_path.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Track>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM songs WHERE id = ?1", TRACK_COLUMNS);
            Ok(conn
                .query_row(&sql, params![id], Track::from_row)
                .optional()?)
        })
    }

    pub fn get_by_path(&self, file_path: &str) -> Result<Option<Track>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM songs WHERE file_path = ?1", TRACK_COLUMNS);
            Ok(conn
                .query_row(&sql, params![file_path], Track::from_row)
                .optional()?)
        })
    }

    pub fn contains_path(&self, file_path: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM songs WHERE file_path = ?1 LIMIT 1")?;
            Ok(stmt.exists(params![file_path])?)
        })
    }

    /// Newest first
    pub fn list_all(&self) -> Result<Vec<Track>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM songs ORDER BY created_at DESC, id DESC",
                TRACK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let tracks = stmt.query_map([], Track::from_row)?;
            Ok(tracks.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Removes the track's file (best effort) and then its row. Returns whether a row existed.
    pub fn delete(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let file_path: Option<String> = conn
                .query_row(
                    "SELECT file_path FROM songs WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(file_path) = file_path else {
                log::debug!("Delete of unknown track {} ignored", id);
                return Ok(false);
            };

            let path = Path::new(&file_path);
            if path.exists() {
                if let Err(e) = fs::remove_file(path) {
                    log::warn!("Could not remove {}: {}", file_path, e);
                }
            }

            conn.execute("DELETE FROM songs WHERE id = ?1", params![id])?;
            log::info!("Deleted track {} ({})", id, file_path);
            Ok(true)
        })
    }

    /// Drops rows whose file no longer exists on disk. Returns how many were dropped.
    pub fn prune_missing(&self) -> Result<usize> {
        let missing: Vec<i64> = self
            .list_all()?
            .into_iter()
            .filter(|track| !Path::new(&track.file_path).exists())
            .map(|track| track.id)
            .collect();

        self.with_conn(|conn| {
            for id in &missing {
                conn.execute("DELETE FROM songs WHERE id = ?1", params![id])?;
            }
            Ok(())
        })?;

        if !missing.is_empty() {
            log::info!("Pruned {} tracks with missing files", missing.len());
        }
        Ok(missing.len())
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    log::debug!(
        "Opening catalog {:?} on thread {:?}",
        path,
        std::thread::current().id()
    );
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            file_path TEXT UNIQUE NOT NULL,
            thumbnail TEXT,
            duration INTEGER,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_songs_created ON songs(created_at);
    "#,
    )?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn catalog() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let catalog = Catalog::new(&dir.path().join("songs.db")).unwrap();
        (dir, catalog)
    }

    #[test]
    fn add_then_lookup() {
        let (_dir, catalog) = catalog();
        let id = catalog
            .add("Song A", "/music/a.mp3", "https://img/a.jpg", 215)
            .unwrap();

        let by_path = catalog.get_by_path("/music/a.mp3").unwrap().unwrap();
        assert_eq!(by_path.id, id);
        assert_eq!(by_path.title, "Song A");
        assert_eq!(by_path.duration, 215);
        assert_eq!(catalog.get(id).unwrap(), Some(by_path));
        assert!(catalog.get_by_path("/music/other.mp3").unwrap().is_none());
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let (_dir, catalog) = catalog();
        catalog.add("First", "/music/a.mp3", "", 10).unwrap();

        let err = catalog.add("Second", "/music/a.mp3", "", 20).unwrap_err();
        assert!(matches!(err, Error::DuplicatePath(ref p) if p == "/music/a.mp3"));
        assert_eq!(catalog.list_all().unwrap().len(), 1);
    }

    #[test]
    fn list_is_newest_first() {
        let (_dir, catalog) = catalog();
        catalog.add("One", "/m/1.mp3", "", 1).unwrap();
        catalog.add("Two", "/m/2.mp3", "", 2).unwrap();
        catalog.add("Three", "/m/3.mp3", "", 3).unwrap();

        let titles: Vec<String> = catalog
            .list_all()
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Three", "Two", "One"]);
    }

    #[test]
    fn delete_removes_row_and_file() {
        let (dir, catalog) = catalog();
        let file = dir.path().join("a.mp3");
        fs::write(&file, b"fake").unwrap();
        let id = catalog
            .add("A", file.to_str().unwrap(), "", 3)
            .unwrap();

        assert!(catalog.delete(id).unwrap());
        assert!(!file.exists());
        assert!(catalog.get(id).unwrap().is_none());
    }

    #[test]
    fn delete_tolerates_missing_file_and_unknown_id() {
        let (_dir, catalog) = catalog();
        let id = catalog.add("Gone", "/does/not/exist.mp3", "", 3).unwrap();

        assert!(catalog.delete(id).unwrap());
        assert!(catalog.list_all().unwrap().is_empty());
        assert!(!catalog.delete(9999).unwrap());
    }

    #[test]
    fn prune_missing_keeps_present_files() {
        let (dir, catalog) = catalog();
        let present = dir.path().join("here.mp3");
        fs::write(&present, b"x").unwrap();
        catalog.add("Here", present.to_str().unwrap(), "", 1).unwrap();
        catalog.add("Gone", "/nowhere/gone.mp3", "", 1).unwrap();

        assert_eq!(catalog.prune_missing().unwrap(), 1);
        let left = catalog.list_all().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title, "Here");
    }

    #[test]
    fn threads_use_their_own_connections() {
        let (_dir, catalog) = catalog();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let catalog = catalog.clone();
                thread::spawn(move || {
                    for n in 0..10 {
                        let path = format!("/m/{}-{}.mp3", worker, n);
                        catalog.add("t", &path, "", n).unwrap();
                        assert!(catalog.contains_path(&path).unwrap());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(catalog.list_all().unwrap().len(), 40);
    }
}
