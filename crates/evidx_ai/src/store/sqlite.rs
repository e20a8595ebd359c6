use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use evidx_core::db;
use evidx_core::domain::{DocumentId, Metadata, Modality};
use evidx_core::error::{codes, AppError};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{
    normalized_cosine, IndexSchema, KnnQuery, Similarity, StoredDocument, StoredHit, StoredRecord,
    VectorStore,
};
use crate::retrieve::similarity::{cosine_similarity, l2_norm};

/// Embedded single-file vector store. kNN is an exact scan over the index, so
/// `num_candidates` has no effect here.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

fn op_failed(message: &str, e: impl std::fmt::Display) -> AppError {
    AppError::new(codes::STORE_OPERATION_FAILED, message).with_details(e.to_string())
}

fn format_id(rowid: i64) -> DocumentId {
    DocumentId(format!("{rowid:020}"))
}

fn parse_id(id: &DocumentId) -> Option<i64> {
    id.as_str().parse::<i64>().ok()
}

impl SqliteVectorStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let mut conn = db::open(path).map_err(|e| {
            AppError::new(codes::STORE_UNREACHABLE, e.message.clone())
                .with_details(e.details.unwrap_or_default())
        })?;
        db::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let mut conn = db::open_in_memory()?;
        db::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::new(codes::STORE_OPERATION_FAILED, "SQLite connection lock poisoned"))
    }

    fn index_schema(conn: &Connection, index: &str) -> Result<Option<IndexSchema>, AppError> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT dims, similarity FROM vector_indices WHERE name=?1",
                [index],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| op_failed("Failed to read index schema", e))?;

        let Some((dims, similarity)) = row else {
            return Ok(None);
        };
        if similarity != Similarity::Cosine.as_str() {
            return Err(AppError::new(
                codes::STORE_OPERATION_FAILED,
                "Index uses an unsupported similarity",
            )
            .with_details(format!("index={index}; similarity={similarity}")));
        }
        Ok(Some(IndexSchema {
            dims: dims as usize,
            similarity: Similarity::Cosine,
        }))
    }

    fn require_index(conn: &Connection, index: &str) -> Result<IndexSchema, AppError> {
        Self::index_schema(conn, index)?.ok_or_else(|| {
            AppError::new(codes::STORE_OPERATION_FAILED, "Index does not exist")
                .with_details(format!("index={index}"))
        })
    }
}

fn parse_embedding(json: &str) -> Result<Vec<f32>, AppError> {
    serde_json::from_str(json).map_err(|e| op_failed("Stored embedding is corrupt", e))
}

fn parse_metadata(json: &str) -> Result<Metadata, AppError> {
    serde_json::from_str(json).map_err(|e| op_failed("Stored metadata is corrupt", e))
}

fn parse_modality(s: &str) -> Result<Modality, AppError> {
    s.parse::<Modality>()
        .map_err(|e| op_failed("Stored modality is corrupt", e))
}

struct Row {
    rowid: i64,
    modality: String,
    embedding_json: String,
    content_b64: Option<String>,
    description: String,
    metadata_json: String,
    content_path: Option<String>,
}

impl Row {
    fn into_record(self) -> Result<StoredRecord, AppError> {
        Ok(StoredRecord {
            id: format_id(self.rowid),
            doc: StoredDocument {
                embedding: parse_embedding(&self.embedding_json)?,
                modality: parse_modality(&self.modality)?,
                content_b64: self.content_b64,
                description: self.description,
                metadata: parse_metadata(&self.metadata_json)?,
                content_path: self.content_path,
            },
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, modality, embedding_json, content_b64, description, metadata_json, content_path";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok(Row {
        rowid: row.get(0)?,
        modality: row.get(1)?,
        embedding_json: row.get(2)?,
        content_b64: row.get(3)?,
        description: row.get(4)?,
        metadata_json: row.get(5)?,
        content_path: row.get(6)?,
    })
}

impl VectorStore for SqliteVectorStore {
    fn ping(&self) -> Result<(), AppError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| {
                AppError::new(codes::STORE_UNREACHABLE, "SQLite store is not usable")
                    .with_details(e.to_string())
            })
    }

    fn ensure_index(&self, index: &str, schema: &IndexSchema) -> Result<IndexSchema, AppError> {
        let conn = self.lock()?;
        if let Some(existing) = Self::index_schema(&conn, index)? {
            return Ok(existing);
        }
        conn.execute(
            "INSERT INTO vector_indices(name, dims, similarity, created_at) VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            rusqlite::params![index, schema.dims as i64, schema.similarity.as_str()],
        )
        .map_err(|e| op_failed("Failed to create index", e))?;
        debug!(index, dims = schema.dims, "created sqlite vector index");
        Ok(*schema)
    }

    fn insert(&self, index: &str, doc: &StoredDocument) -> Result<DocumentId, AppError> {
        let conn = self.lock()?;
        let schema = Self::require_index(&conn, index)?;
        if doc.embedding.len() != schema.dims {
            return Err(AppError::new(
                codes::DIMENSION_MISMATCH,
                "Embedding length does not match index dimension",
            )
            .with_details(format!("index={index}; expected={}; got={}", schema.dims, doc.embedding.len())));
        }

        let embedding_json =
            serde_json::to_string(&doc.embedding).map_err(|e| op_failed("Failed to encode embedding", e))?;
        let metadata_json =
            serde_json::to_string(&doc.metadata).map_err(|e| op_failed("Failed to encode metadata", e))?;

        conn.execute(
            r#"
            INSERT INTO evidence_documents(
              index_name, modality, embedding_json, content_b64, description, metadata_json, content_path, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            "#,
            rusqlite::params![
                index,
                doc.modality.as_str(),
                embedding_json,
                doc.content_b64,
                doc.description,
                metadata_json,
                doc.content_path,
            ],
        )
        .map_err(|e| op_failed("Failed to insert document", e))?;

        Ok(format_id(conn.last_insert_rowid()))
    }

    fn get(&self, index: &str, id: &DocumentId) -> Result<Option<StoredRecord>, AppError> {
        let Some(rowid) = parse_id(id) else {
            return Ok(None);
        };
        let conn = self.lock()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM evidence_documents WHERE index_name=?1 AND id=?2");
        let row = conn
            .query_row(&sql, rusqlite::params![index, rowid], read_row)
            .optional()
            .map_err(|e| op_failed("Failed to read document", e))?;
        row.map(Row::into_record).transpose()
    }

    fn knn(&self, index: &str, query: &KnnQuery<'_>) -> Result<Vec<StoredHit>, AppError> {
        if query.k == 0 {
            return Ok(Vec::new());
        }
        let qnorm = l2_norm(query.vector);
        if qnorm == 0.0 {
            return Ok(Vec::new());
        }

        let rows: Vec<Row> = {
            let conn = self.lock()?;
            let (sql, modality) = match query.modality {
                Some(m) => (
                    format!("SELECT {SELECT_COLUMNS} FROM evidence_documents WHERE index_name=?1 AND modality=?2"),
                    Some(m.as_str()),
                ),
                None => (
                    format!("SELECT {SELECT_COLUMNS} FROM evidence_documents WHERE index_name=?1"),
                    None,
                ),
            };
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| op_failed("Failed to prepare kNN scan", e))?;
            let mapped = match modality {
                Some(m) => stmt.query_map(rusqlite::params![index, m], read_row),
                None => stmt.query_map(rusqlite::params![index], read_row),
            }
            .map_err(|e| op_failed("Failed to run kNN scan", e))?;
            let rows = mapped
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| op_failed("Failed to read kNN row", e))?;
            rows
        };

        let mut hits: Vec<StoredHit> = Vec::new();
        for row in rows {
            let rowid = row.rowid;
            let record = match row.into_record() {
                Ok(r) => r,
                Err(e) => {
                    warn!(index, rowid, details = ?e.details, "skipping unreadable document in kNN scan");
                    continue;
                }
            };
            let v = &record.doc.embedding;
            if v.len() != query.vector.len() {
                continue;
            }
            let vnorm = l2_norm(v);
            if vnorm == 0.0 {
                continue;
            }
            let score = normalized_cosine(cosine_similarity(query.vector, v, qnorm, vnorm));
            hits.push(StoredHit {
                id: record.id,
                score,
                modality: record.doc.modality,
                content_b64: record.doc.content_b64,
                description: record.doc.description,
                metadata: record.doc.metadata,
                content_path: record.doc.content_path,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(query.k);
        Ok(hits)
    }

    fn delete(&self, index: &str, id: &DocumentId) -> Result<bool, AppError> {
        let Some(rowid) = parse_id(id) else {
            return Ok(false);
        };
        let conn = self.lock()?;
        let n = conn
            .execute(
                "DELETE FROM evidence_documents WHERE index_name=?1 AND id=?2",
                rusqlite::params![index, rowid],
            )
            .map_err(|e| op_failed("Failed to delete document", e))?;
        Ok(n > 0)
    }

    fn delete_by_modality(&self, index: &str, modality: Modality) -> Result<u64, AppError> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "DELETE FROM evidence_documents WHERE index_name=?1 AND modality=?2",
                rusqlite::params![index, modality.as_str()],
            )
            .map_err(|e| op_failed("Failed to delete documents", e))?;
        Ok(n as u64)
    }

    fn count(&self, index: &str, modality: Option<Modality>) -> Result<u64, AppError> {
        let conn = self.lock()?;
        let n: i64 = match modality {
            Some(m) => conn.query_row(
                "SELECT COUNT(*) FROM evidence_documents WHERE index_name=?1 AND modality=?2",
                rusqlite::params![index, m.as_str()],
                |row| row.get(0),
            ),
            None => conn.query_row(
                "SELECT COUNT(*) FROM evidence_documents WHERE index_name=?1",
                [index],
                |row| row.get(0),
            ),
        }
        .map_err(|e| op_failed("Failed to count documents", e))?;
        Ok(n as u64)
    }
}
