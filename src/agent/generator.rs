//! 代码生成器
//!
//! 一次调用产出一个候选方案：任务 + 按相关度拼接的上下文（最多 3 段）+ 可选的
//! 上一轮错误，走同一条提示词路径——有错误时只是在末尾追加修复要求，不走分支。
//! 输出剥掉首尾代码围栏后原样返回。

use std::sync::Arc;

use crate::knowledge::Passage;
use crate::llm::{LlmClient, Message};

/// 生成器系统提示词
const SYSTEM_PROMPT: &str = "你是一个专业的Python程序员，负责根据给定的任务和上下文生成高质量的Python代码。
你的代码应该：
1. 功能完整且正确
2. 包含适当的错误处理
3. 包含简明的注释
4. 符合Python最佳实践
5. 如果遇到错误，考虑之前的错误信息并修复

请只输出Python代码，不要有任何其他解释性文字。";

/// 代码生成器：持有 LLM 客户端，按任务/上下文/上轮错误构造提示词
pub struct CodeGenerator {
    llm: Arc<dyn LlmClient>,
}

impl CodeGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 生成一个候选方案；底层调用失败时返回错误字符串（由循环折叠进状态）
    pub async fn generate(
        &self,
        task: &str,
        context: &[Passage],
        prior_error: Option<&str>,
    ) -> Result<String, String> {
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(build_user_prompt(task, context, prior_error)),
        ];
        let output = self.llm.complete(&messages).await?;
        Ok(strip_code_fences(&output))
    }
}

/// 构造用户提示词：任务 + 上下文（按检索排名顺序拼接）+ 可选修复要求。
/// 上一轮错误原样嵌入，保证修复提示里能看到完整错误文本。
pub fn build_user_prompt(task: &str, context: &[Passage], prior_error: Option<&str>) -> String {
    let context_str = context
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "任务: {}\n\n相关上下文:\n{}\n",
        task, context_str
    );

    if let Some(error) = prior_error {
        prompt.push_str(&format!(
            "\n之前执行的代码遇到了以下错误:\n{}\n\n请修复此错误并重新生成代码。\n",
            error
        ));
    }

    prompt
}

/// 剥掉首尾代码围栏（```python / ``` 行），不做其他后处理
pub fn strip_code_fences(output: &str) -> String {
    let trimmed = output.trim();
    let mut lines: Vec<&str> = trimmed.lines().collect();

    if let Some(first) = lines.first() {
        if first.trim_start().starts_with("```") {
            lines.remove(0);
        }
    }
    if let Some(last) = lines.last() {
        if last.trim() == "```" {
            lines.pop();
        }
    }

    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::llm::MockLlmClient;

    fn passage(content: &str) -> Passage {
        Passage {
            content: content.to_string(),
            metadata: HashMap::new(),
            score: 0.5,
        }
    }

    #[test]
    fn test_strip_python_fence() {
        let out = strip_code_fences("```python\nprint(1)\n```");
        assert_eq!(out, "print(1)");
    }

    #[test]
    fn test_strip_bare_fence() {
        let out = strip_code_fences("```\nx = 1\ny = 2\n```");
        assert_eq!(out, "x = 1\ny = 2");
    }

    #[test]
    fn test_no_fence_untouched() {
        let code = "import os\nprint(os.getcwd())";
        assert_eq!(strip_code_fences(code), code);
    }

    #[test]
    fn test_inner_fences_preserved() {
        // 只剥首尾，不碰正文里的围栏
        let out = strip_code_fences("```python\ns = \"```\"\nprint(s)\n```");
        assert_eq!(out, "s = \"```\"\nprint(s)");
    }

    #[test]
    fn test_prompt_contains_error_verbatim() {
        let error = "Traceback (most recent call last):\n  NameError: name 'foo' is not defined";
        let prompt = build_user_prompt("写个脚本", &[passage("ctx")], Some(error));
        assert!(prompt.contains(error));
        assert!(prompt.contains("请修复此错误"));
    }

    #[test]
    fn test_prompt_without_error_has_no_repair_section() {
        let prompt = build_user_prompt("写个脚本", &[passage("ctx")], None);
        assert!(!prompt.contains("请修复此错误"));
        assert!(prompt.contains("写个脚本"));
        assert!(prompt.contains("ctx"));
    }

    #[test]
    fn test_prompt_concatenates_context_in_order() {
        let prompt = build_user_prompt(
            "t",
            &[passage("first"), passage("second"), passage("third")],
            None,
        );
        let a = prompt.find("first").unwrap();
        let b = prompt.find("second").unwrap();
        let c = prompt.find("third").unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_generate_strips_fences() {
        let llm = Arc::new(MockLlmClient::with_response("```python\nprint(42)\n```"));
        let generator = CodeGenerator::new(llm);
        let code = generator.generate("任务", &[], None).await.unwrap();
        assert_eq!(code, "print(42)");
    }

    #[tokio::test]
    async fn test_generate_surfaces_llm_error() {
        let llm = Arc::new(MockLlmClient::with_script(vec![Err("rate limited".to_string())]));
        let generator = CodeGenerator::new(llm);
        let err = generator.generate("任务", &[], None).await.unwrap_err();
        assert!(err.contains("rate limited"));
    }
}
