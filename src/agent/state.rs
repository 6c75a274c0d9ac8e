//! 智能体运行状态
//!
//! AgentRunState 是贯穿一次运行的唯一状态值：每个步骤消费旧状态、返回新状态
//! （with_research / with_code / with_generation_failure / with_execution），
//! 没有共享可变别名。终止判定是独立的纯函数 next_step。

use std::time::Duration;

use serde::Serialize;

use crate::knowledge::Passage;

/// 来源去重键：metadata 的 source_file，缺失时记 unknown
const PROVENANCE_KEY: &str = "source_file";

/// 一次代码执行的结果；仅在当轮迭代内消费，不跨轮保留
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    /// 失败原因（stderr / 超时说明 / OS 错误描述）
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// 一次智能体运行的完整状态，也是返回给调用方的最终报告
#[derive(Debug, Clone, Serialize)]
pub struct AgentRunState {
    /// 任务描述（创建后不再变化）
    pub task: String,
    /// 检索到的上下文，按相关度降序；研究阶段填充一次，之后只读
    pub context: Vec<Passage>,
    /// 上下文来源（按 source_file 去重，保留首见顺序）
    pub sources: Vec<String>,
    /// 当前最新一版代码（每轮生成覆盖）
    pub code: String,
    /// 最近一次失败信息；成功后必为 None
    pub error: Option<String>,
    /// 已完成的生成-执行轮数，从 0 开始
    pub iteration: u32,
    /// 仅由一次成功执行置 true
    pub success: bool,
}

impl AgentRunState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: Vec::new(),
            sources: Vec::new(),
            code: String::new(),
            error: None,
            iteration: 0,
            success: false,
        }
    }

    /// 研究阶段：填入检索结果并按来源去重（首见顺序）
    pub fn with_research(mut self, passages: Vec<Passage>) -> Self {
        let mut sources: Vec<String> = Vec::new();
        for p in &passages {
            let source = p
                .metadata
                .get(PROVENANCE_KEY)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        self.context = passages;
        self.sources = sources;
        self
    }

    /// 生成成功：替换当前代码，清掉上一轮错误
    pub fn with_code(mut self, code: String) -> Self {
        self.code = code;
        self.error = None;
        self
    }

    /// 生成失败：记录错误、保留旧代码；消耗一个迭代槽位（保证总时长有界，
    /// 错误会进入下一轮的修复提示）
    pub fn with_generation_failure(mut self, message: impl Into<String>) -> Self {
        self.error = Some(format!("代码生成失败: {}", message.into()));
        self.iteration += 1;
        self
    }

    /// 执行结束：折叠执行结果并推进迭代计数
    pub fn with_execution(mut self, result: &ExecutionResult) -> Self {
        self.success = result.success;
        self.error = if result.success {
            None
        } else {
            Some(
                result
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
            )
        };
        self.iteration += 1;
        self
    }
}

/// 循环下一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// 继续生成-执行
    Generate,
    /// 终止：成功或迭代预算耗尽
    End,
}

/// 终止判定（纯函数）：成功或 iteration >= max 时结束，别无出口
pub fn next_step(success: bool, iteration: u32, max_iterations: u32) -> LoopStep {
    if success || iteration >= max_iterations {
        LoopStep::End
    } else {
        LoopStep::Generate
    }
}
