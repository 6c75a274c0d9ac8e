//! 向量存储：SQLite 持久化 + 余弦检索
//!
//! 每行一个块：(id, doc_id, content, metadata JSON, embedding BLOB)。
//! 检索为全表线性扫描余弦相似度，降序取 top-k；库规模为文档站点级别，够用。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::AgentError;
use crate::knowledge::chunker::Chunk;

/// 检索结果：块 + 余弦相似度（越高越相似）
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// SQLite 向量存储；Connection 不是 Sync，用 Mutex 包一层以便放进 Arc<dyn Retriever>
pub struct VectorStore {
    conn: Mutex<Connection>,
}

fn store_err(e: rusqlite::Error) -> AgentError {
    AgentError::Store(e.to_string())
}

impl VectorStore {
    /// 打开（或创建）存储文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// 内存库（测试用）
    pub fn open_in_memory() -> Result<Self, AgentError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> Result<(), AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id        TEXT PRIMARY KEY,
                doc_id    TEXT NOT NULL,
                content   TEXT NOT NULL,
                metadata  TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(doc_id);",
        )
        .map_err(store_err)
    }

    /// 写入一个块；同 id 覆盖
    pub fn add(&self, chunk: &Chunk, embedding: &[f32]) -> Result<(), AgentError> {
        if embedding.is_empty() {
            return Err(AgentError::Store("Empty embedding".to_string()));
        }
        let metadata = serde_json::to_string(&chunk.metadata)
            .map_err(|e| AgentError::Store(e.to_string()))?;
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO chunks (id, doc_id, content, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chunk.id,
                    chunk.source_id,
                    chunk.text,
                    metadata,
                    embedding_to_blob(embedding),
                ],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// 删除某文档的所有块（重建索引时先清旧版本）
    pub fn remove_by_doc(&self, doc_id: &str) -> Result<usize, AgentError> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])
            .map_err(store_err)
    }

    /// 余弦检索：降序取 top-k
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AgentError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, doc_id, content, metadata, embedding FROM chunks")
            .map_err(store_err)?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let doc_id: String = row.get(1)?;
                let content: String = row.get(2)?;
                let metadata: String = row.get(3)?;
                let blob: Vec<u8> = row.get(4)?;
                Ok((id, doc_id, content, metadata, blob))
            })
            .map_err(store_err)?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, doc_id, content, metadata, blob) = row.map_err(store_err)?;
            let embedding = blob_to_embedding(&blob);
            let score = cosine_similarity(query_embedding, &embedding);
            if score <= 0.0 {
                continue;
            }
            let metadata: HashMap<String, String> =
                serde_json::from_str(&metadata).unwrap_or_default();
            let mut chunk = Chunk::new(id, content, doc_id);
            chunk.metadata = metadata;
            scored.push(ScoredChunk { chunk, score });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// 块总数
    pub fn chunk_count(&self) -> Result<usize, AgentError> {
        self.conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(store_err)
    }

    /// 文档总数（去重 doc_id）
    pub fn document_count(&self) -> Result<usize, AgentError> {
        self.conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(DISTINCT doc_id) FROM chunks", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(store_err)
    }

    /// 清空整个集合
    pub fn clear(&self) -> Result<(), AgentError> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM chunks", [])
            .map(|_| ())
            .map_err(store_err)
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// 余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
