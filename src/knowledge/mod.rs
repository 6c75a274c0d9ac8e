//! 知识库：分块 -> 向量化 -> SQLite 存储与余弦检索
//!
//! KnowledgeRetriever 是智能体循环消费的检索边界；KnowledgeBase 是本地实现
//! （Chunker + EmbeddingProvider + VectorStore）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

pub mod chunker;
pub mod store;

pub use chunker::{Chunk, Chunker, ChunkingConfig};
pub use store::{cosine_similarity, ScoredChunk, VectorStore};

use crate::config::KnowledgeSection;
use crate::error::AgentError;
use crate::llm::EmbeddingProvider;

/// 检索到的上下文片段
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub content: String,
    pub metadata: HashMap<String, String>,
    /// 余弦相似度，越高越相似
    pub score: f32,
}

/// 检索边界：语义 top-k
///
/// 约定（调用方依赖，不得更改）：score 为余弦相似度，越高越相似，结果按
/// score 降序排列；调用方不再重排，只截断前 N 条。metadata 中的
/// `source_file` 作为来源去重键。
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, String>;
}

/// 本地知识库
pub struct KnowledgeBase {
    store: VectorStore,
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeBase {
    /// 按配置打开集合：persist_directory/<collection>.sqlite3
    pub fn open(
        cfg: &KnowledgeSection,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, AgentError> {
        let path = collection_path(cfg);
        let store = VectorStore::open(&path)?;
        tracing::info!(path = %path.display(), collection = %cfg.collection, "knowledge base opened");
        Ok(Self {
            store,
            chunker: Chunker::new(ChunkingConfig {
                chunk_size: cfg.chunk_size,
                chunk_overlap: cfg.chunk_overlap,
                ..Default::default()
            }),
            embedder,
        })
    }

    /// 测试/离线：内存库 + 自定义嵌入
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self, AgentError> {
        Ok(Self {
            store: VectorStore::open_in_memory()?,
            chunker: Chunker::default(),
            embedder,
        })
    }

    /// 添加文档：分块、逐块向量化并写入；返回成功写入的块数。
    /// 文档 id 取 metadata 的 source_file（没有则生成 UUID），重复索引同一来源
    /// 会先删除旧版本的块。
    pub async fn add_document(
        &self,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Result<usize, AgentError> {
        let doc_id = metadata
            .get("source_file")
            .cloned()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.store.remove_by_doc(&doc_id)?;

        let chunks = self.chunker.chunk(&doc_id, text);
        if chunks.is_empty() {
            tracing::warn!(doc_id = %doc_id, "no valid chunks in document");
            return Ok(0);
        }

        let indexed_at = chrono::Utc::now().to_rfc3339();
        let mut added = 0;
        for mut chunk in chunks {
            // 文档元数据 + 标题路径元数据合并；标题路径优先级更高
            for (k, v) in &metadata {
                chunk.metadata.entry(k.clone()).or_insert_with(|| v.clone());
            }
            chunk.metadata.insert("indexed_at".to_string(), indexed_at.clone());

            match self.embedder.embed(&chunk.text).await {
                Ok(embedding) if !embedding.is_empty() => {
                    self.store.add(&chunk, &embedding)?;
                    added += 1;
                }
                Ok(_) => {
                    tracing::warn!(chunk_id = %chunk.id, "empty embedding, chunk skipped");
                }
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "embedding failed, chunk skipped");
                }
            }
        }

        tracing::info!(doc_id = %doc_id, added, "document indexed");
        Ok(added)
    }

    /// 知识库中文档数量
    pub fn document_count(&self) -> Result<usize, AgentError> {
        self.store.document_count()
    }

    /// 知识库中块数量
    pub fn chunk_count(&self) -> Result<usize, AgentError> {
        self.store.chunk_count()
    }

    /// 清空集合
    pub fn clear(&self) -> Result<(), AgentError> {
        self.store.clear()
    }
}

#[async_trait]
impl KnowledgeRetriever for KnowledgeBase {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>, String> {
        let query_embedding = self.embedder.embed(query).await?;
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }
        let scored = self
            .store
            .search(&query_embedding, k)
            .map_err(|e| e.to_string())?;
        Ok(scored
            .into_iter()
            .map(|s| Passage {
                content: s.chunk.text,
                metadata: s.chunk.metadata,
                score: s.score,
            })
            .collect())
    }
}

/// 集合对应的存储文件路径
pub fn collection_path(cfg: &KnowledgeSection) -> PathBuf {
    cfg.persist_directory
        .join(format!("{}.sqlite3", cfg.collection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// 确定性假嵌入：按字符统计出一个低维向量，足以区分不同主题的文本
    struct FakeEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
            if text.trim().is_empty() {
                return Ok(vec![]);
            }
            let mut v = [0.0f32; 8];
            for (i, c) in text.chars().enumerate() {
                v[(c as usize + i) % 8] += 1.0;
            }
            Ok(v.to_vec())
        }
    }

    fn meta(source: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("source_file".to_string(), source.to_string());
        m
    }

    #[tokio::test]
    async fn test_index_and_search() {
        let kb = KnowledgeBase::in_memory(Arc::new(FakeEmbedder)).unwrap();
        let added = kb
            .add_document("# Rust async\nasync fn and await keywords", meta("rust.json"))
            .await
            .unwrap();
        assert!(added >= 1);
        assert_eq!(kb.document_count().unwrap(), 1);

        let results = kb.search("async fn and await", 5).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(
            results[0].metadata.get("source_file"),
            Some(&"rust.json".to_string())
        );
        assert!(results[0].metadata.contains_key("indexed_at"));
        // 降序排列
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_reindex_replaces_old_chunks() {
        let kb = KnowledgeBase::in_memory(Arc::new(FakeEmbedder)).unwrap();
        kb.add_document("first version of the page", meta("page.json"))
            .await
            .unwrap();
        let before = kb.chunk_count().unwrap();
        kb.add_document("second version of the page", meta("page.json"))
            .await
            .unwrap();
        // 同一来源重复索引不累积旧块
        assert_eq!(kb.chunk_count().unwrap(), before);
        assert_eq!(kb.document_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_document() {
        let kb = KnowledgeBase::in_memory(Arc::new(FakeEmbedder)).unwrap();
        let added = kb.add_document("   ", meta("empty.json")).await.unwrap();
        assert_eq!(added, 0);
    }
}
