//! 生成-执行主循环
//!
//! Research（仅一次）-> Generate -> Execute -> 成功或迭代预算耗尽则 End，
//! 否则带着错误回到 Generate。重试自动且有界；预算耗尽是正常终态，不是异常。
//! 预期内失败（代码报错、超时、生成失败）全部折叠进状态；只有检索失败与
//! 解释器无法启动作为致命错误向上传播。

use std::sync::Arc;

use crate::agent::executor::SandboxExecutor;
use crate::agent::generator::CodeGenerator;
use crate::agent::state::{next_step, AgentRunState, LoopStep};
use crate::error::AgentError;
use crate::knowledge::KnowledgeRetriever;

/// 生成-执行循环的默认最大迭代数
pub const MAX_ITERATIONS: u32 = 3;
/// 研究阶段一次性检索的片段数
pub const RETRIEVAL_K: usize = 5;
/// 喂给生成器的上下文片段数（取检索排名前 N）
pub const CONTEXT_PASSAGES: usize = 3;
/// 日志中任务描述的截断长度（字符）
const TASK_PREVIEW_CHARS: usize = 50;

/// 智能体循环：检索边界 + 生成器 + 沙箱执行器
pub struct AgentLoop {
    retriever: Arc<dyn KnowledgeRetriever>,
    generator: CodeGenerator,
    executor: SandboxExecutor,
    max_iterations: u32,
    retrieval_k: usize,
}

impl AgentLoop {
    pub fn new(
        retriever: Arc<dyn KnowledgeRetriever>,
        generator: CodeGenerator,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            retriever,
            generator,
            executor,
            max_iterations: MAX_ITERATIONS,
            retrieval_k: RETRIEVAL_K,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = k;
        self
    }

    /// 获取生成器累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.generator.token_usage()
    }

    /// 运行一次任务到终态，返回完整的最终状态。
    ///
    /// 状态由本次运行独占：每个步骤消费旧值、产出新值，终态交还调用方。
    pub async fn run(&self, task: &str) -> Result<AgentRunState, AgentError> {
        let preview: String = task.chars().take(TASK_PREVIEW_CHARS).collect();
        tracing::info!(task = %preview, "agent run started");

        let mut state = AgentRunState::new(task);

        // Research：仅此一次，检索失败不重试（调用方可重跑整个任务）
        let passages = self
            .retriever
            .search(task, self.retrieval_k)
            .await
            .map_err(|e| {
                tracing::error!(task = %preview, error = %e, "retrieval failed");
                AgentError::Retrieval(e)
            })?;
        tracing::info!(passages = passages.len(), "research done");
        state = state.with_research(passages);

        loop {
            match next_step(state.success, state.iteration, self.max_iterations) {
                LoopStep::End => break,
                LoopStep::Generate => {}
            }

            // 上下文固定为研究阶段的结果，只截断不重排
            let top = &state.context[..state.context.len().min(CONTEXT_PASSAGES)];
            state = match self
                .generator
                .generate(&state.task, top, state.error.as_deref())
                .await
            {
                Ok(code) => state.with_code(code),
                Err(e) => {
                    // 生成失败消耗一个迭代槽位；错误会进入下一轮修复提示
                    tracing::warn!(iteration = state.iteration, error = %e, "generation failed");
                    state = state.with_generation_failure(e);
                    continue;
                }
            };

            let result = self.executor.execute(&state.code).await.map_err(|e| {
                tracing::error!(task = %preview, error = %e, "executor infrastructure failure");
                e
            })?;
            state = state.with_execution(&result);
            tracing::info!(
                iteration = state.iteration,
                success = state.success,
                elapsed_secs = result.elapsed.as_secs_f64(),
                "iteration finished"
            );
        }

        tracing::info!(
            success = state.success,
            iterations = state.iteration,
            sources = state.sources.len(),
            "agent run finished"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;

    use crate::knowledge::Passage;
    use crate::llm::MockLlmClient;

    /// 固定返回预设片段的假检索器
    struct StaticRetriever {
        passages: Vec<Passage>,
    }

    #[async_trait]
    impl KnowledgeRetriever for StaticRetriever {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Passage>, String> {
            Ok(self.passages.iter().take(k).cloned().collect())
        }
    }

    /// 总是失败的检索器
    struct BrokenRetriever;

    #[async_trait]
    impl KnowledgeRetriever for BrokenRetriever {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>, String> {
            Err("vector store unreachable".to_string())
        }
    }

    fn passage(source: &str) -> Passage {
        let mut metadata = HashMap::new();
        metadata.insert("source_file".to_string(), source.to_string());
        Passage {
            content: format!("content from {}", source),
            metadata,
            score: 0.9,
        }
    }

    fn sh_loop(llm: Arc<MockLlmClient>, retriever: Arc<dyn KnowledgeRetriever>, dir: &std::path::Path) -> AgentLoop {
        AgentLoop::new(
            retriever,
            CodeGenerator::new(llm),
            SandboxExecutor::new("sh", ".sh", 5).with_work_dir(dir),
        )
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_response("```sh\necho Success\n```"));
        let retriever = Arc::new(StaticRetriever { passages: vec![passage("a.json")] });
        let state = sh_loop(llm, retriever, dir.path()).run("打印 Success").await.unwrap();

        assert!(state.success);
        assert_eq!(state.iteration, 1);
        assert!(state.error.is_none());
        assert_eq!(state.code, "echo Success");
        assert_eq!(state.sources, vec!["a.json"]);
    }

    #[tokio::test]
    async fn test_always_failing_code_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_response("echo kaboom >&2\nexit 1"));
        let retriever = Arc::new(StaticRetriever { passages: vec![] });
        let state = sh_loop(llm.clone(), retriever, dir.path()).run("必败任务").await.unwrap();

        assert!(!state.success);
        assert_eq!(state.iteration, 3);
        assert!(state.error.as_deref().unwrap().contains("kaboom"));
        // 每轮都生成 + 执行
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_repair_prompt_contains_previous_error_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_script(vec![
            Ok("echo unique_failure_marker_9321 >&2\nexit 1".to_string()),
            Ok("echo fixed".to_string()),
        ]));
        let retriever = Arc::new(StaticRetriever { passages: vec![passage("a.json")] });
        let state = sh_loop(llm.clone(), retriever, dir.path()).run("先败后成").await.unwrap();

        assert!(state.success);
        assert_eq!(state.iteration, 2);
        // 第二轮提示词必须原样携带第一轮的错误
        let second_prompt = llm.prompt_at(1).unwrap();
        assert!(second_prompt.contains("unique_failure_marker_9321"));
        // 第一轮没有修复段
        assert!(!llm.prompt_at(0).unwrap().contains("请修复此错误"));
        assert!(second_prompt.contains("请修复此错误"));
    }

    #[tokio::test]
    async fn test_generation_failure_consumes_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_script(vec![Err("api down".to_string())]));
        let retriever = Arc::new(StaticRetriever { passages: vec![] });
        let state = sh_loop(llm.clone(), retriever, dir.path()).run("生成一直失败").await.unwrap();

        assert!(!state.success);
        assert_eq!(state.iteration, 3);
        assert!(state.error.as_deref().unwrap().contains("api down"));
        assert!(state.code.is_empty());
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_retrieval_still_generates() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_response("echo no context needed"));
        let retriever = Arc::new(StaticRetriever { passages: vec![] });
        let state = sh_loop(llm, retriever, dir.path()).run("无上下文").await.unwrap();

        assert!(state.success);
        assert!(state.sources.is_empty());
        assert!(state.context.is_empty());
    }

    #[tokio::test]
    async fn test_sources_deduped_first_seen() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_response("echo ok"));
        let retriever = Arc::new(StaticRetriever {
            passages: vec![
                passage("b.json"),
                passage("a.json"),
                passage("b.json"),
                passage("a.json"),
            ],
        });
        let state = sh_loop(llm, retriever, dir.path()).run("去重").await.unwrap();
        assert_eq!(state.sources, vec!["b.json", "a.json"]);
    }

    #[tokio::test]
    async fn test_retrieval_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlmClient::with_response("echo ok"));
        let err = sh_loop(llm.clone(), Arc::new(BrokenRetriever), dir.path())
            .run("检索失败")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Retrieval(_)));
        // 检索失败不进入生成阶段
        assert_eq!(llm.call_count(), 0);
    }
}
