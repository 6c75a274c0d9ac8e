//! DashScope（阿里云百炼）客户端（OpenAI 兼容模式）
//!
//! DashScope 的 compatible-mode 端点与 OpenAI API 完全兼容。
//! - Base URL: https://dashscope.aliyuncs.com/compatible-mode/v1
//! - 模型: qwen-max (默认), qwen-plus, qwen-turbo

use crate::llm::OpenAiClient;

/// DashScope API 常量
pub const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DASHSCOPE_CHAT: &str = "qwen-max";
pub const DASHSCOPE_EMBEDDING: &str = "text-embedding-v1";

/// 创建 DashScope 客户端
///
/// - 优先使用环境变量 `DASHSCOPE_API_KEY`
/// - 模型可通过 `model` 参数或 `DASHSCOPE_MODEL` 环境变量指定
pub fn create_dashscope_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DASHSCOPE_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DASHSCOPE_MODEL").ok())
        .unwrap_or_else(|| DASHSCOPE_CHAT.to_string());

    OpenAiClient::new(Some(DASHSCOPE_BASE_URL), &model, Some(api_key.as_str()))
}
