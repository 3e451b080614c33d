use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::StoreError;
use crate::types::{Document, DocumentId, VectorId, VectorMapping};

type DocumentRow = (String, String, String, Option<String>, DateTime<Utc>);

fn row_to_document(row: DocumentRow) -> Document {
    let (id, title, content, url, created_at) = row;
    Document {
        id: DocumentId(id),
        title,
        content,
        url,
        created_at,
    }
}

/// Build a `?, ?, ...` placeholder list for an IN clause.
fn placeholders(count: usize) -> String {
    let mut s = String::with_capacity(count * 3);
    for i in 0..count {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the `SQLite` database and run migrations.
    ///
    /// Enables foreign key constraints at connection level so the
    /// mapping-table reference to `documents` is enforced.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let url = if path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("../../migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Expose the underlying pool for shared access.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a document together with all of its vector mappings in one
    /// transaction. No reader ever observes the document row without its
    /// complete mapping set, or vice versa.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; the transaction rolls back.
    pub async fn insert_document_with_mappings(
        &self,
        document: &Document,
        mappings: &[VectorMapping],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents (id, title, content, url, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.url)
        .bind(document.created_at)
        .execute(&mut *tx)
        .await?;

        for mapping in mappings {
            sqlx::query("INSERT INTO vector_mappings (vector_id, document_id) VALUES (?, ?)")
                .bind(mapping.vector_id)
                .bind(&mapping.document_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert a batch of vector mappings in one transaction (rebuild path;
    /// the documents already exist).
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; the transaction rolls back.
    pub async fn insert_vector_mappings(
        &self,
        mappings: &[VectorMapping],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for mapping in mappings {
            sqlx::query("INSERT INTO vector_mappings (vector_id, document_id) VALUES (?, ?)")
                .bind(mapping.vector_id)
                .bind(&mapping.document_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a single document by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT id, title, content, url, created_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_document))
    }

    /// Fetch documents by id. Unknown ids are simply absent from the result;
    /// no ordering is guaranteed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn documents_by_ids(&self, ids: &[DocumentId]) -> Result<Vec<Document>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, title, content, url, created_at FROM documents WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, DocumentRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_document).collect())
    }

    /// Resolve vector ids to mapping rows. Ids without a mapping row are
    /// absent from the result; that absence is the authoritative signal
    /// that the vector no longer represents live data.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn mappings_by_vector_ids(
        &self,
        vector_ids: &[VectorId],
    ) -> Result<Vec<VectorMapping>, StoreError> {
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT vector_id, document_id FROM vector_mappings WHERE vector_id IN ({})",
            placeholders(vector_ids.len())
        );
        let mut query = sqlx::query_as::<_, (i64, String)>(&sql);
        for id in vector_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(vector_id, document_id)| VectorMapping {
                vector_id: VectorId(vector_id),
                document_id: DocumentId(document_id),
            })
            .collect())
    }

    /// All vector ids currently mapped to a document, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn vector_ids_by_document(
        &self,
        id: &DocumentId,
    ) -> Result<Vec<VectorId>, StoreError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT vector_id FROM vector_mappings WHERE document_id = ? ORDER BY vector_id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(v,)| VectorId(v)).collect())
    }

    /// Page through documents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent_documents(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, title, content, url, created_at FROM documents \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    /// Total number of stored documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_documents(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Total number of mapping rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_vector_mappings(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vector_mappings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Delete a document and its mapping rows in one transaction.
    ///
    /// Returns `None` if the document does not exist (nothing is mutated),
    /// otherwise the vector ids that were mapped to it so the caller can
    /// instruct the vector index to drop them.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the transaction rolls back.
    pub async fn delete_document(
        &self,
        id: &DocumentId,
    ) -> Result<Option<Vec<VectorId>>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT vector_id FROM vector_mappings WHERE document_id = ?")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        let vector_ids: Vec<VectorId> = rows.into_iter().map(|(v,)| VectorId(v)).collect();

        sqlx::query("DELETE FROM vector_mappings WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(vector_ids))
    }

    /// Remove every mapping row (rebuild path: the index is about to be
    /// repopulated from scratch).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn clear_vector_mappings(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM vector_mappings")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
