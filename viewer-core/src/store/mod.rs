//! Catalogue store.
//!
//! Single-writer, multi-reader persistence over SQLite via `sqlx`, chosen
//! over a client/server RDBMS because this catalogue needs to be a
//! self-contained on-disk store (see `DESIGN.md`). Every write path runs
//! inside a
//! transaction; `sqlx`'s connection-pool-with-single-writer-in-WAL-mode
//! pattern gives the "writes serialised, reads concurrent" property the
//! design requires without any locking of our own.
//!
//! Submodules: [`search`] parses the query grammar, [`playlist`] resolves
//! WPL playlists lazily against this store.

pub mod playlist;
pub mod search;

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Row, SqlitePool};
use unicode_normalization::UnicodeNormalization;

use crate::error::{ViewerError, ViewerResult};
use crate::metrics;
use viewer_model::{
    Credential, Favorite, File, MediaKind, Page, PasswordRecord, Session, SortKey, SortOrder, Tag,
    ThumbKey, TypeFilter,
};

/// Outcome of an [`CatalogueStore::upsert_file`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for this path; one was created.
    Inserted,
    /// A row existed with a different size or modified time; it was updated.
    Updated,
    /// A row existed and matched size and modified time exactly.
    Unchanged,
}

/// A page of directory-listing rows plus the total matching count.
#[derive(Debug, Clone, PartialEq)]
pub struct ListDirResult {
    /// The requested page of items.
    pub items: Vec<DirEntry>,
    /// Total rows across all pages (files + synthetic folders).
    pub total_items: u64,
}

/// A single row of a directory listing: either a real file or a synthetic
/// folder aggregate with a child count.
#[derive(Debug, Clone, PartialEq)]
pub enum DirEntry {
    /// A catalogued file.
    File(File),
    /// A synthetic directory row.
    Folder {
        /// Repository-relative path of the directory.
        path: String,
        /// Number of descendant files under this folder.
        child_count: u64,
    },
}

/// A page of search results plus the total matching count.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Matching files, ordered by FTS rank then name.
    pub items: Vec<File>,
    /// Total matches across all pages.
    pub total_items: u64,
}

/// Outcome of [`CatalogueStore::rename_tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    /// Number of files whose effective tag set changed.
    pub affected_files: u64,
}

/// Normalize a repository-relative path: forward slashes, no leading slash,
/// NFC unicode normalization. Does not validate that the path stays under
/// the media root — callers (the HTTP surface) do that against the
/// configured root before paths ever reach the store.
#[must_use]
pub fn normalize_path(raw: &str) -> String {
    let slashes = raw.replace('\\', "/");
    let trimmed = slashes.trim_start_matches('/');
    trimmed.nfc().collect()
}

fn row_to_file(row: &FileRow) -> ViewerResult<File> {
    let kind = parse_kind(&row.kind)?;
    Ok(File {
        path: row.path.clone(),
        size: row.size as u64,
        modified: DateTime::<Utc>::from_timestamp_millis(row.modified_ms)
            .unwrap_or_else(Utc::now),
        kind,
        content_hash: row.content_hash.clone(),
    })
}

fn parse_kind(raw: &str) -> ViewerResult<MediaKind> {
    match raw {
        "image" => Ok(MediaKind::Image),
        "video" => Ok(MediaKind::Video),
        "playlist" => Ok(MediaKind::Playlist),
        "folder" => Ok(MediaKind::Folder),
        other => Err(ViewerError::Internal(format!(
            "unknown media kind in store: {other}"
        ))),
    }
}

fn kind_to_str(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
        MediaKind::Playlist => "playlist",
        MediaKind::Folder => "folder",
    }
}

#[derive(Debug, Clone, FromRow)]
struct FileRow {
    path: String,
    size: i64,
    modified_ms: i64,
    kind: String,
    content_hash: Option<String>,
}

/// The catalogue store: files, tags, favorites, sessions, password record,
/// and WebAuthn credentials, backed by a single SQLite database file.
#[derive(Debug, Clone)]
pub struct CatalogueStore {
    pool: SqlitePool,
}

impl CatalogueStore {
    /// Open (creating if absent) the database at `path` and run pending
    /// migrations. `path`'s parent directory must already exist and be
    /// writable — the server treats an unwritable database directory as a
    /// configuration error at startup (exit code 1).
    pub async fn open(path: &Path) -> ViewerResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(ViewerError::from)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| ViewerError::Internal(format!("migration failed: {err}")))?;
        Ok(Self { pool })
    }

    /// Build a store directly from an existing pool, for tests that want an
    /// in-memory `sqlite::memory:` database.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open an in-memory database with migrations applied, for tests.
    pub async fn open_in_memory() -> ViewerResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(ViewerError::from)?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| ViewerError::Internal(format!("migration failed: {err}")))?;
        Ok(Self { pool })
    }

    /// Insert or update a file row, keyed by path. Compares size and
    /// modified time against any existing row to decide the outcome; a
    /// matching row is left untouched (no write, no FTS churn).
    pub async fn upsert_file(&self, file: &File) -> ViewerResult<UpsertOutcome> {
        let timer = metrics::store::TRANSACTION_DURATION
            .with_label_values(&["upsert_file"])
            .start_timer();
        let path = normalize_path(&file.path);
        let parent = match path.rfind('/') {
            Some(idx) => path[..idx].to_string(),
            None => String::new(),
        };
        let modified_ms = file.modified.timestamp_millis();

        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, FileRow>(
            "SELECT path, size, modified_ms, kind, content_hash FROM files WHERE path = ?",
        )
        .bind(&path)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO files (path, parent, size, modified_ms, kind, content_hash) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&path)
                .bind(&parent)
                .bind(file.size as i64)
                .bind(modified_ms)
                .bind(kind_to_str(file.kind))
                .bind(&file.content_hash)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Inserted
            }
            Some(row) if row.size == file.size as i64 && row.modified_ms == modified_ms => {
                UpsertOutcome::Unchanged
            }
            Some(_) => {
                sqlx::query(
                    "UPDATE files SET size = ?, modified_ms = ?, kind = ?, content_hash = ? \
                     WHERE path = ?",
                )
                .bind(file.size as i64)
                .bind(modified_ms)
                .bind(kind_to_str(file.kind))
                .bind(&file.content_hash)
                .bind(&path)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            }
        };
        tx.commit().await?;
        timer.observe_duration();
        Ok(outcome)
    }

    /// Delete every direct child of `prefix` whose path is not in `seen`.
    /// Run in one transaction; called once per directory at the end of a
    /// full scan (every directory in the tree gets its own call with its
    /// own direct children), never by a poll cycle (see the design's note
    /// on NFS robustness: a poll-cycle-only disappearance is not deletion
    /// evidence). Scoped to direct children only — matching the whole
    /// subtree here would delete a directory's freshly-reindexed
    /// descendants, since their parent's `seen` list only ever lists its
    /// own immediate files.
    pub async fn delete_missing(&self, prefix: &str, seen: &[String]) -> ViewerResult<u64> {
        let timer = metrics::store::TRANSACTION_DURATION
            .with_label_values(&["delete_missing"])
            .start_timer();
        let mut tx = self.pool.begin().await?;
        let existing: Vec<String> = sqlx::query_scalar::<_, String>(
            "SELECT path FROM files WHERE parent = ?",
        )
        .bind(prefix)
        .fetch_all(&mut *tx)
        .await?;

        let seen_set: std::collections::HashSet<&str> =
            seen.iter().map(String::as_str).collect();
        let mut deleted = 0u64;
        for path in existing {
            if !seen_set.contains(path.as_str()) {
                sqlx::query("DELETE FROM files WHERE path = ?")
                    .bind(&path)
                    .execute(&mut *tx)
                    .await?;
                deleted += 1;
            }
        }
        tx.commit().await?;
        timer.observe_duration();
        Ok(deleted)
    }

    /// Page through a directory's contents: real files directly under
    /// `dir`, plus one synthetic folder row per immediate subdirectory with
    /// its aggregated descendant count.
    pub async fn list_dir(
        &self,
        dir: &str,
        sort: SortKey,
        order: SortOrder,
        page: Page,
        type_filter: TypeFilter,
    ) -> ViewerResult<ListDirResult> {
        let dir = dir.trim_matches('/');

        let file_rows = sqlx::query_as::<_, FileRow>(
            "SELECT path, size, modified_ms, kind, content_hash FROM files WHERE parent = ?",
        )
        .bind(dir)
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::with_capacity(file_rows.len());
        for row in &file_rows {
            let file = row_to_file(row)?;
            if type_filter.matches(file.kind) {
                files.push(DirEntry::File(file));
            }
        }

        let mut folders = std::collections::BTreeMap::<String, u64>::new();
        if matches!(type_filter, TypeFilter::All | TypeFilter::Only(MediaKind::Folder)) {
            let like_pattern = if dir.is_empty() {
                "%".to_string()
            } else {
                format!("{dir}/%")
            };
            let descendants: Vec<String> =
                sqlx::query_scalar::<_, String>("SELECT path FROM files WHERE path LIKE ?")
                    .bind(&like_pattern)
                    .fetch_all(&self.pool)
                    .await?;
            for path in descendants {
                let rest = if dir.is_empty() {
                    path.as_str()
                } else {
                    path.strip_prefix(dir)
                        .and_then(|r| r.strip_prefix('/'))
                        .unwrap_or(path.as_str())
                };
                if let Some(idx) = rest.find('/') {
                    let child = &rest[..idx];
                    let folder_path = if dir.is_empty() {
                        child.to_string()
                    } else {
                        format!("{dir}/{child}")
                    };
                    *folders.entry(folder_path).or_insert(0) += 1;
                }
            }
        }

        let mut items: Vec<DirEntry> = Vec::with_capacity(files.len() + folders.len());
        items.extend(files);
        items.extend(
            folders
                .into_iter()
                .map(|(path, child_count)| DirEntry::Folder { path, child_count }),
        );

        sort_dir_entries(&mut items, sort, order);

        let total_items = items.len() as u64;
        let offset = page.offset() as usize;
        let page_items = items
            .into_iter()
            .skip(offset)
            .take(page.size as usize)
            .collect();

        Ok(ListDirResult {
            items: page_items,
            total_items,
        })
    }

    /// Search the catalogue with the grammar in [`search::parse`]: free
    /// text goes to FTS on filename, `tag:`/`-tag:`/`NOT tag:` narrow by an
    /// inclusive and exclusive tag set. Result = FTS ∩ include ∖ exclude,
    /// ordered by FTS rank then name.
    pub async fn search(
        &self,
        query: &str,
        type_filter: TypeFilter,
        page: Page,
    ) -> ViewerResult<SearchResult> {
        let parsed = search::parse(query);

        let candidate_paths: Vec<String> = if parsed.text.trim().is_empty() {
            sqlx::query_scalar::<_, String>("SELECT path FROM files ORDER BY path")
                .fetch_all(&self.pool)
                .await?
        } else {
            let fts_query = format!("{}*", escape_fts(&parsed.text));
            sqlx::query_scalar::<_, String>(
                "SELECT files.path FROM files_fts \
                 JOIN files ON files.rowid = files_fts.rowid \
                 WHERE files_fts MATCH ? ORDER BY rank",
            )
            .bind(fts_query)
            .fetch_all(&self.pool)
            .await?
        };

        if candidate_paths.is_empty() {
            return Ok(SearchResult {
                items: Vec::new(),
                total_items: 0,
            });
        }

        let mut matching = Vec::with_capacity(candidate_paths.len());
        for path in &candidate_paths {
            let tags: Vec<String> = sqlx::query_scalar::<_, String>(
                "SELECT tag_name FROM file_tags WHERE file_path = ?",
            )
            .bind(path)
            .fetch_all(&self.pool)
            .await?;
            let tag_set: std::collections::HashSet<&str> =
                tags.iter().map(String::as_str).collect();

            if !parsed
                .include_tags
                .iter()
                .all(|t| tag_set.contains(t.as_str()))
            {
                continue;
            }
            if parsed.exclude_tags.iter().any(|t| tag_set.contains(t.as_str())) {
                continue;
            }
            matching.push(path.clone());
        }

        let mut files = Vec::with_capacity(matching.len());
        for path in &matching {
            if let Some(row) = sqlx::query_as::<_, FileRow>(
                "SELECT path, size, modified_ms, kind, content_hash FROM files WHERE path = ?",
            )
            .bind(path)
            .fetch_optional(&self.pool)
            .await?
            {
                let file = row_to_file(&row)?;
                if type_filter.matches(file.kind) {
                    files.push(file);
                }
            }
        }

        let total_items = files.len() as u64;
        let offset = page.offset() as usize;
        let items = files.into_iter().skip(offset).take(page.size as usize).collect();
        Ok(SearchResult { items, total_items })
    }

    /// List all tags with their live usage counts.
    pub async fn list_tags(&self) -> ViewerResult<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT tags.name, tags.color, COUNT(file_tags.file_path) AS item_count \
             FROM tags LEFT JOIN file_tags ON file_tags.tag_name = tags.name \
             GROUP BY tags.name ORDER BY tags.name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Tag {
                name: row.get("name"),
                color: row.get("color"),
                item_count: row.get::<i64, _>("item_count") as u64,
            })
            .collect())
    }

    /// Attach `tag` to `file_path`, creating the tag if it does not exist.
    /// Idempotent: attaching an already-present tag is a no-op.
    pub async fn add_tag(&self, file_path: &str, tag: &str, color: Option<&str>) -> ViewerResult<()> {
        Tag::validate_name(tag).map_err(|err| ViewerError::Validation(err.to_string()))?;
        let timer = metrics::store::TRANSACTION_DURATION
            .with_label_values(&["add_tag"])
            .start_timer();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO tags (name, color) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(tag)
            .bind(color)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO file_tags (file_path, tag_name) VALUES (?, ?) \
             ON CONFLICT(file_path, tag_name) DO NOTHING",
        )
        .bind(file_path)
        .bind(tag)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        timer.observe_duration();
        Ok(())
    }

    /// Detach `tag` from `file_path`. Not an error if the pair did not exist.
    pub async fn remove_tag(&self, file_path: &str, tag: &str) -> ViewerResult<()> {
        sqlx::query("DELETE FROM file_tags WHERE file_path = ? AND tag_name = ?")
            .bind(file_path)
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rename `old_name` to `new_name`, re-pointing every `FileTag` row in
    /// one transaction. If `new_name` already exists, the two tags merge:
    /// files carrying both collapse to a single row, `old_name` is deleted.
    /// Renaming a tag onto itself is a no-op with `affected_files = 0`.
    pub async fn rename_tag(&self, old_name: &str, new_name: &str) -> ViewerResult<RenameOutcome> {
        if old_name == new_name {
            return Ok(RenameOutcome { affected_files: 0 });
        }
        Tag::validate_name(new_name).map_err(|err| ViewerError::Validation(err.to_string()))?;

        let timer = metrics::store::TRANSACTION_DURATION
            .with_label_values(&["rename_tag"])
            .start_timer();
        let mut tx = self.pool.begin().await?;

        let old_exists: Option<String> =
            sqlx::query_scalar::<_, String>("SELECT name FROM tags WHERE name = ?")
                .bind(old_name)
                .fetch_optional(&mut *tx)
                .await?;
        if old_exists.is_none() {
            return Err(ViewerError::NotFound(format!("tag not found: {old_name}")));
        }

        let new_exists: Option<String> =
            sqlx::query_scalar::<_, String>("SELECT name FROM tags WHERE name = ?")
                .bind(new_name)
                .fetch_optional(&mut *tx)
                .await?;

        let affected = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM file_tags WHERE tag_name = ?",
        )
        .bind(old_name)
        .fetch_one(&mut *tx)
        .await?;

        if new_exists.is_some() {
            // Merge: move rows, deduplicating on the unique (file, tag) key.
            sqlx::query(
                "INSERT OR IGNORE INTO file_tags (file_path, tag_name) \
                 SELECT file_path, ? FROM file_tags WHERE tag_name = ?",
            )
            .bind(new_name)
            .bind(old_name)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM file_tags WHERE tag_name = ?")
                .bind(old_name)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM tags WHERE name = ?")
                .bind(old_name)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("UPDATE tags SET name = ? WHERE name = ?")
                .bind(new_name)
                .bind(old_name)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE file_tags SET tag_name = ? WHERE tag_name = ?")
                .bind(new_name)
                .bind(old_name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        timer.observe_duration();
        Ok(RenameOutcome {
            affected_files: affected as u64,
        })
    }

    /// Delete a tag and all its `FileTag` rows. Errors with
    /// [`ViewerError::NotFound`] if the tag does not exist; deleting the
    /// same tag twice hits this on the second call since the row is simply
    /// gone.
    pub async fn delete_tag(&self, name: &str) -> ViewerResult<()> {
        let result = sqlx::query("DELETE FROM tags WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ViewerError::NotFound(format!("tag not found: {name}")));
        }
        Ok(())
    }

    /// List favorites, most recently favorited first.
    pub async fn list_favorites(&self) -> ViewerResult<Vec<Favorite>> {
        let rows = sqlx::query(
            "SELECT file_path, created_at FROM favorites ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                Ok(Favorite {
                    file_path: row.get("file_path"),
                    created_at: parse_rfc3339(&created_at)?,
                })
            })
            .collect()
    }

    /// Favorite a file. At most one favorite per file; favoriting an
    /// already-favorited file is a no-op (the original timestamp is kept).
    pub async fn add_favorite(&self, file_path: &str) -> ViewerResult<()> {
        sqlx::query(
            "INSERT INTO favorites (file_path, created_at) VALUES (?, ?) \
             ON CONFLICT(file_path) DO NOTHING",
        )
        .bind(file_path)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a favorite. Not an error if it did not exist.
    pub async fn remove_favorite(&self, file_path: &str) -> ViewerResult<()> {
        sqlx::query("DELETE FROM favorites WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create a new session row.
    pub async fn create_session(&self, session: &Session) -> ViewerResult<()> {
        sqlx::query(
            "INSERT INTO sessions (token, created_at, expires_at, last_seen_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.last_seen_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a session by its token.
    pub async fn get_session(&self, token: &str) -> ViewerResult<Option<Session>> {
        let row = sqlx::query(
            "SELECT token, created_at, expires_at, last_seen_at FROM sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(session_from_row).transpose()
    }

    /// Update a session's `last_seen_at` and (when sliding renewal applies)
    /// `expires_at`.
    pub async fn touch_session(&self, session: &Session) -> ViewerResult<()> {
        sqlx::query("UPDATE sessions SET last_seen_at = ?, expires_at = ? WHERE token = ?")
            .bind(session.last_seen_at.to_rfc3339())
            .bind(session.expires_at.to_rfc3339())
            .bind(&session.token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a session by token (logout).
    pub async fn delete_session(&self, token: &str) -> ViewerResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every session whose `expires_at` has already passed. Run
    /// periodically by the session cleanup task.
    pub async fn delete_expired_sessions(&self) -> ViewerResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Fetch the singleton password record, if first-run setup has happened.
    pub async fn get_password_record(&self) -> ViewerResult<Option<PasswordRecord>> {
        let row = sqlx::query("SELECT kdf_id, hash, updated_at FROM password_record WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let updated_at: String = row.get("updated_at");
            Ok(PasswordRecord {
                kdf_id: row.get("kdf_id"),
                hash: row.get("hash"),
                updated_at: parse_rfc3339(&updated_at)?,
            })
        })
        .transpose()
    }

    /// Create the singleton password record iff none exists yet, atomically
    /// with respect to concurrent callers (backs first-run setup, where the
    /// design requires exactly one of several racing `POST /api/auth/setup`
    /// calls to succeed). Returns `true` if this call created the record,
    /// `false` if one already existed and was left untouched.
    pub async fn create_password_record_if_absent(&self, record: &PasswordRecord) -> ViewerResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO password_record (id, kdf_id, hash, updated_at) VALUES (1, ?, ?, ?)",
        )
        .bind(&record.kdf_id)
        .bind(&record.hash)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Write the singleton password record, replacing any existing one.
    pub async fn set_password_record(&self, record: &PasswordRecord) -> ViewerResult<()> {
        sqlx::query(
            "INSERT INTO password_record (id, kdf_id, hash, updated_at) VALUES (1, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET kdf_id = excluded.kdf_id, hash = excluded.hash, \
             updated_at = excluded.updated_at",
        )
        .bind(&record.kdf_id)
        .bind(&record.hash)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Register a new WebAuthn credential.
    pub async fn add_credential(&self, credential: &Credential) -> ViewerResult<()> {
        sqlx::query(
            "INSERT INTO credentials \
             (credential_id, public_key, signature_count, transports, friendly_name, created_at, last_used_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&credential.credential_id)
        .bind(&credential.public_key)
        .bind(i64::from(credential.signature_count))
        .bind(credential.transports.join(","))
        .bind(&credential.friendly_name)
        .bind(credential.created_at.to_rfc3339())
        .bind(credential.last_used_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List all registered credentials.
    pub async fn list_credentials(&self) -> ViewerResult<Vec<Credential>> {
        let rows = sqlx::query(
            "SELECT credential_id, public_key, signature_count, transports, friendly_name, \
             created_at, last_used_at FROM credentials",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(credential_from_row).collect()
    }

    /// Fetch a single credential by id.
    pub async fn get_credential(&self, credential_id: &str) -> ViewerResult<Option<Credential>> {
        let row = sqlx::query(
            "SELECT credential_id, public_key, signature_count, transports, friendly_name, \
             created_at, last_used_at FROM credentials WHERE credential_id = ?",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(credential_from_row).transpose()
    }

    /// Update a credential's signature counter and last-used timestamp
    /// after a successful assertion. Callers must verify monotonicity
    /// *before* calling this — a counter regression is rejected by the
    /// caller as a cloned-authenticator failure and this is never reached.
    pub async fn touch_credential(&self, credential_id: &str, new_counter: u32) -> ViewerResult<()> {
        sqlx::query(
            "UPDATE credentials SET signature_count = ?, last_used_at = ? WHERE credential_id = ?",
        )
        .bind(i64::from(new_counter))
        .bind(Utc::now().to_rfc3339())
        .bind(credential_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Run `PRAGMA wal_checkpoint` + `VACUUM` to reclaim space and
    /// defragment. Called by the indexer after a full scan when
    /// changed-rows exceeded a threshold; safe to call at any time since it
    /// does not hold the single-writer lock any longer than a normal write.
    pub async fn vacuum(&self) -> ViewerResult<()> {
        let started = Instant::now();
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        tracing::info!(elapsed = ?started.elapsed(), "catalogue vacuum complete");
        Ok(())
    }

    /// Borrow the underlying pool, for callers (the indexer's batch writer)
    /// that need to build up a larger transaction than a single store
    /// method expresses.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Look up a file's thumbnail key inputs (size + modified time) without
    /// fetching the whole row, for the thumbnail engine's disk-key
    /// derivation.
    pub async fn file_key_inputs(&self, path: &str) -> ViewerResult<Option<(u64, i64)>> {
        let row = sqlx::query("SELECT size, modified_ms FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| (row.get::<i64, _>("size") as u64, row.get("modified_ms"))))
    }

    /// Every currently catalogued path, used by the thumbnail engine's
    /// garbage sweep to recognize orphaned artifacts.
    pub async fn all_file_paths(&self) -> ViewerResult<Vec<String>> {
        Ok(sqlx::query_scalar::<_, String>("SELECT path FROM files")
            .fetch_all(&self.pool)
            .await?)
    }

    /// Fetch a single file row by path.
    pub async fn get_file(&self, path: &str) -> ViewerResult<Option<File>> {
        let row = sqlx::query_as::<_, FileRow>(
            "SELECT path, size, modified_ms, kind, content_hash FROM files WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_file).transpose()
    }
}

#[async_trait::async_trait]
impl playlist::PlaylistLookup for CatalogueStore {
    async fn file_exists(&self, path: &str) -> ViewerResult<bool> {
        Ok(self.get_file(path).await?.is_some())
    }

    async fn find_by_basename(
        &self,
        dir_prefix: &str,
        basename: &str,
    ) -> ViewerResult<Option<String>> {
        let like_pattern = if dir_prefix.is_empty() {
            format!("%/{basename}")
        } else {
            format!("{dir_prefix}/%{basename}")
        };
        let mut candidates: Vec<String> = sqlx::query_scalar::<_, String>(
            "SELECT path FROM files WHERE path LIKE ? AND path LIKE ?",
        )
        .bind(format!("{dir_prefix}%"))
        .bind(like_pattern)
        .fetch_all(&self.pool)
        .await?;
        candidates.sort();
        Ok(candidates
            .into_iter()
            .find(|path| path.rsplit('/').next() == Some(basename)))
    }
}

fn session_from_row(row: sqlx::sqlite::SqliteRow) -> ViewerResult<Session> {
    let created_at: String = row.get("created_at");
    let expires_at: String = row.get("expires_at");
    let last_seen_at: String = row.get("last_seen_at");
    Ok(Session {
        token: row.get("token"),
        created_at: parse_rfc3339(&created_at)?,
        expires_at: parse_rfc3339(&expires_at)?,
        last_seen_at: parse_rfc3339(&last_seen_at)?,
    })
}

fn credential_from_row(row: sqlx::sqlite::SqliteRow) -> ViewerResult<Credential> {
    let created_at: String = row.get("created_at");
    let last_used_at: Option<String> = row.get("last_used_at");
    let transports: String = row.get("transports");
    Ok(Credential {
        credential_id: row.get("credential_id"),
        public_key: row.get("public_key"),
        signature_count: row.get::<i64, _>("signature_count") as u32,
        transports: if transports.is_empty() {
            Vec::new()
        } else {
            transports.split(',').map(String::from).collect()
        },
        friendly_name: row.get("friendly_name"),
        created_at: parse_rfc3339(&created_at)?,
        last_used_at: last_used_at.map(|s| parse_rfc3339(&s)).transpose()?,
    })
}

fn parse_rfc3339(raw: &str) -> ViewerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| ViewerError::Internal(format!("corrupt timestamp in store: {err}")))
}

fn escape_fts(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

fn sort_dir_entries(items: &mut [DirEntry], sort: SortKey, order: SortOrder) {
    items.sort_by(|a, b| {
        let ordering = match sort {
            SortKey::Name => entry_name(a).cmp(entry_name(b)),
            SortKey::Size => entry_size(a).cmp(&entry_size(b)),
            SortKey::Modified => entry_modified(a).cmp(&entry_modified(b)),
        };
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

fn entry_name(entry: &DirEntry) -> &str {
    match entry {
        DirEntry::File(file) => file.name(),
        DirEntry::Folder { path, .. } => path.rsplit('/').next().unwrap_or(path.as_str()),
    }
}

fn entry_size(entry: &DirEntry) -> u64 {
    match entry {
        DirEntry::File(file) => file.size,
        DirEntry::Folder { child_count, .. } => *child_count,
    }
}

fn entry_modified(entry: &DirEntry) -> i64 {
    match entry {
        DirEntry::File(file) => file.modified.timestamp_millis(),
        DirEntry::Folder { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64, kind: MediaKind) -> File {
        File {
            path: path.to_string(),
            size,
            modified: Utc::now(),
            kind,
            content_hash: None,
        }
    }

    async fn store() -> CatalogueStore {
        CatalogueStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn upsert_reports_inserted_unchanged_updated() {
        let store = store().await;
        let mut f = file("vacation/beach.jpg", 100, MediaKind::Image);
        assert_eq!(store.upsert_file(&f).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_file(&f).await.unwrap(), UpsertOutcome::Unchanged);
        f.size = 200;
        assert_eq!(store.upsert_file(&f).await.unwrap(), UpsertOutcome::Updated);
    }

    #[tokio::test]
    async fn delete_missing_only_removes_unseen_paths() {
        let store = store().await;
        store.upsert_file(&file("a.jpg", 1, MediaKind::Image)).await.unwrap();
        store.upsert_file(&file("b.jpg", 1, MediaKind::Image)).await.unwrap();
        let deleted = store
            .delete_missing("", &["b.jpg".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_file("a.jpg").await.unwrap().is_none());
        assert!(store.get_file("b.jpg").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_dir_aggregates_subdirectories_as_folders() {
        let store = store().await;
        store
            .upsert_file(&file("root.jpg", 1, MediaKind::Image))
            .await
            .unwrap();
        store
            .upsert_file(&file("vacation/beach.jpg", 1, MediaKind::Image))
            .await
            .unwrap();
        store
            .upsert_file(&file("vacation/2024/sunset.jpg", 1, MediaKind::Image))
            .await
            .unwrap();

        let result = store
            .list_dir("", SortKey::Name, SortOrder::Asc, Page::default(), TypeFilter::All)
            .await
            .unwrap();
        assert_eq!(result.total_items, 2);
        assert!(result.items.iter().any(|i| matches!(i, DirEntry::File(f) if f.path == "root.jpg")));
        assert!(
            result
                .items
                .iter()
                .any(|i| matches!(i, DirEntry::Folder { path, .. } if path == "vacation"))
        );
    }

    #[tokio::test]
    async fn tag_add_is_idempotent() {
        let store = store().await;
        store.upsert_file(&file("a.jpg", 1, MediaKind::Image)).await.unwrap();
        store.add_tag("a.jpg", "vacation", None).await.unwrap();
        store.add_tag("a.jpg", "vacation", None).await.unwrap();
        let tags = store.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].item_count, 1);
    }

    #[tokio::test]
    async fn rename_to_self_is_noop() {
        let store = store().await;
        store.upsert_file(&file("a.jpg", 1, MediaKind::Image)).await.unwrap();
        store.add_tag("a.jpg", "vacation", None).await.unwrap();
        let outcome = store.rename_tag("vacation", "vacation").await.unwrap();
        assert_eq!(outcome.affected_files, 0);
    }

    #[tokio::test]
    async fn rename_merges_into_existing_tag() {
        let store = store().await;
        store.upsert_file(&file("f1.jpg", 1, MediaKind::Image)).await.unwrap();
        store.upsert_file(&file("f2.jpg", 1, MediaKind::Image)).await.unwrap();
        store.add_tag("f1.jpg", "Vacaton", None).await.unwrap();
        store.add_tag("f2.jpg", "vacation", None).await.unwrap();

        let outcome = store.rename_tag("Vacaton", "vacation").await.unwrap();
        assert_eq!(outcome.affected_files, 1);

        let tags = store.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "vacation");
        assert_eq!(tags[0].item_count, 2);
    }

    #[tokio::test]
    async fn rename_roundtrip_restores_original_pairs() {
        let store = store().await;
        store.upsert_file(&file("f1.jpg", 1, MediaKind::Image)).await.unwrap();
        store.add_tag("f1.jpg", "a", None).await.unwrap();
        store.rename_tag("a", "b").await.unwrap();
        store.rename_tag("b", "a").await.unwrap();
        let tags = store.list_tags().await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "a");
    }

    #[tokio::test]
    async fn delete_tag_twice_is_not_found() {
        let store = store().await;
        store.upsert_file(&file("a.jpg", 1, MediaKind::Image)).await.unwrap();
        store.add_tag("a.jpg", "x", None).await.unwrap();
        store.delete_tag("x").await.unwrap();
        let err = store.delete_tag("x").await.unwrap_err();
        assert!(matches!(err, ViewerError::NotFound(_)));
    }

    #[tokio::test]
    async fn search_grammar_combines_text_and_tags() {
        let store = store().await;
        store.upsert_file(&file("f1.jpg", 1, MediaKind::Image)).await.unwrap();
        store.upsert_file(&file("f2.jpg", 1, MediaKind::Image)).await.unwrap();
        store.upsert_file(&file("f3.jpg", 1, MediaKind::Image)).await.unwrap();
        store.add_tag("f1.jpg", "beach", None).await.unwrap();
        store.add_tag("f1.jpg", "2024", None).await.unwrap();
        store.add_tag("f2.jpg", "beach", None).await.unwrap();
        store.add_tag("f2.jpg", "2023", None).await.unwrap();
        store.add_tag("f3.jpg", "mountain", None).await.unwrap();

        let only_beach = store
            .search("tag:beach", TypeFilter::All, Page::default())
            .await
            .unwrap();
        assert_eq!(only_beach.total_items, 2);

        let beach_not_2023 = store
            .search("tag:beach -tag:2023", TypeFilter::All, Page::default())
            .await
            .unwrap();
        assert_eq!(beach_not_2023.total_items, 1);
        assert_eq!(beach_not_2023.items[0].path, "f1.jpg");

        let not_beach = store
            .search("NOT tag:beach", TypeFilter::All, Page::default())
            .await
            .unwrap();
        assert_eq!(not_beach.total_items, 1);
        assert_eq!(not_beach.items[0].path, "f3.jpg");
    }

    #[tokio::test]
    async fn favorites_cascade_on_file_deletion() {
        let store = store().await;
        store.upsert_file(&file("a.jpg", 1, MediaKind::Image)).await.unwrap();
        store.add_favorite("a.jpg").await.unwrap();
        store.delete_missing("", &[]).await.unwrap();
        assert!(store.list_favorites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_tree_returns_empty_listing() {
        let store = store().await;
        let result = store
            .list_dir("", SortKey::Name, SortOrder::Asc, Page::default(), TypeFilter::All)
            .await
            .unwrap();
        assert_eq!(result.total_items, 0);
        assert!(result.items.is_empty());
    }
}
