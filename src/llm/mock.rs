//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设回复并记录每次收到的消息，便于离线驱动生成-执行循环
//! 与断言提示词内容（如「修复提示包含上一轮错误」）。脚本耗尽后重复最后一条。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message};

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    /// 每次 complete 收到的完整消息列表
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    /// 始终返回同一条回复
    pub fn with_response(response: impl Into<String>) -> Self {
        Self::with_script(vec![Ok(response.into())])
    }

    /// 按脚本依次返回；耗尽后重复最后一条
    pub fn with_script(script: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 第 n 次调用收到的所有消息内容（system + user），拼接为一个字符串
    pub fn prompt_at(&self, n: usize) -> Option<String> {
        self.calls.lock().unwrap().get(n).map(|msgs| {
            msgs.iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.lock().unwrap().push(messages.to_vec());

        let mut responses = self.responses.lock().unwrap();
        match responses.len() {
            0 => Ok(String::new()),
            1 => responses.front().cloned().unwrap_or(Ok(String::new())),
            _ => responses.pop_front().unwrap_or(Ok(String::new())),
        }
    }
}
