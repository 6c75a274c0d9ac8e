//! Agent 错误类型
//!
//! 预期内的失败（代码执行失败、超时、生成失败）不走这里——它们被折叠进
//! AgentRunState.error 并驱动下一轮循环；此处只承载致命的基础设施错误。

use thiserror::Error;

/// 运行过程中可能出现的致命错误（检索、LLM、子进程启动、存储、配置）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 检索失败：不由循环重试，调用方可选择重跑整个任务
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// 解释器进程无法启动（如 python3 不存在）
    #[error("Failed to spawn interpreter '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Knowledge store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
