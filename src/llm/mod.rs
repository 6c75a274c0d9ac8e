//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DashScope / Mock）
//!
//! create_llm_from_config / create_embedder_from_config 在构造期选定一次后端，
//! 运行期只通过 trait object 分发，不再探测环境。

use std::sync::Arc;

pub mod dashscope;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use dashscope::{create_dashscope_client, DASHSCOPE_BASE_URL, DASHSCOPE_CHAT, DASHSCOPE_EMBEDDING};
pub use embedding::{EmbeddingProvider, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, Message, Role};

use crate::config::{EmbeddingSection, LlmSection};
use crate::error::AgentError;

/// OpenAI 默认对话模型（DocuMind 同款回退）
pub const OPENAI_CHAT: &str = "gpt-4";
/// OpenAI 默认嵌入模型
pub const OPENAI_EMBEDDING: &str = "text-embedding-ada-002";

/// 根据配置创建 LLM 客户端；provider 为 auto 时按 API Key 决定（仅在构造期判断一次）
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.as_str() {
        "dashscope" => Arc::new(create_dashscope_client(cfg.model.as_deref())),
        "openai" => Arc::new(OpenAiClient::new(
            cfg.base_url.as_deref(),
            cfg.model.as_deref().unwrap_or(OPENAI_CHAT),
            None,
        )),
        // 离线冒烟：固定返回一段可运行的 Python
        "mock" => Arc::new(MockLlmClient::with_response(
            "```python\nprint(\"hello from nectar mock\")\n```",
        )),
        // auto：优先 DashScope（与 DocuMind 行为一致），否则 OpenAI
        _ => {
            if std::env::var("DASHSCOPE_API_KEY").is_ok() {
                tracing::debug!("llm provider auto -> dashscope");
                Arc::new(create_dashscope_client(cfg.model.as_deref()))
            } else {
                tracing::debug!("llm provider auto -> openai");
                Arc::new(OpenAiClient::new(
                    cfg.base_url.as_deref(),
                    cfg.model.as_deref().unwrap_or(OPENAI_CHAT),
                    None,
                ))
            }
        }
    }
}

/// 根据配置创建嵌入提供方；两个 Key 都缺失时报配置错误（知识库必须有嵌入才能工作）
pub fn create_embedder_from_config(
    cfg: &EmbeddingSection,
) -> Result<Arc<dyn EmbeddingProvider>, AgentError> {
    if let Ok(key) = std::env::var("DASHSCOPE_API_KEY") {
        return Ok(Arc::new(OpenAiEmbedder::new(
            Some(cfg.base_url.as_deref().unwrap_or(DASHSCOPE_BASE_URL)),
            cfg.model.as_deref().unwrap_or(DASHSCOPE_EMBEDDING),
            Some(&key),
        )));
    }
    if std::env::var("OPENAI_API_KEY").is_ok() {
        return Ok(Arc::new(OpenAiEmbedder::new(
            cfg.base_url.as_deref(),
            cfg.model.as_deref().unwrap_or(OPENAI_EMBEDDING),
            None,
        )));
    }
    Err(AgentError::Config(
        "需要设置 DASHSCOPE_API_KEY (阿里云百炼) 或 OPENAI_API_KEY 环境变量".to_string(),
    ))
}
