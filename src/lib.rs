//! Nectar - Rust 文档智能 RAG 系统
//!
//! 爬取网页为可读文本，分块索引进本地向量库，再由有界的生成-执行循环
//! 检索上下文、生成代码、沙箱执行、失败重试。
//!
//! 模块划分：
//! - **agent**: 智能体核心（状态、生成器、沙箱执行器、主循环）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **knowledge**: 知识库（分块、嵌入、SQLite 向量存储与检索）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DashScope / Mock）
//! - **spider**: 爬虫（重试退避、HTML 提取、批量并发限制）
//! - **observability**: 日志初始化

pub mod agent;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod observability;
pub mod spider;

pub use agent::{AgentLoop, AgentRunState};
pub use error::AgentError;
