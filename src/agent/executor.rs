//! 沙箱执行器
//!
//! 把候选代码写进唯一命名的临时文件，用独立解释器子进程执行，捕获
//! stdout/stderr 并强制墙钟超时。临时文件由 NamedTempFile 守卫持有——
//! 无论成功、失败、超时还是中途出错，离开作用域即删除（删除失败被守卫吞掉）。
//! 候选代码运行在独立地址空间：崩溃或死循环最多拖到超时，不会拖垮调用方。

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::agent::state::ExecutionResult;
use crate::config::ExecutorSection;
use crate::error::AgentError;

/// 沙箱执行器：解释器 + 文件后缀 + 超时
pub struct SandboxExecutor {
    interpreter: String,
    file_suffix: String,
    timeout: Duration,
    work_dir: Option<PathBuf>,
}

impl SandboxExecutor {
    pub fn new(interpreter: impl Into<String>, file_suffix: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            interpreter: interpreter.into(),
            file_suffix: file_suffix.into(),
            timeout: Duration::from_secs(timeout_secs),
            work_dir: None,
        }
    }

    pub fn from_config(cfg: &ExecutorSection) -> Self {
        Self::new(&cfg.interpreter, &cfg.file_suffix, cfg.timeout_secs)
    }

    /// 指定临时文件目录（默认系统临时目录）
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// 执行一段候选代码并归类结果。
    ///
    /// 只有解释器本身无法启动才返回 Err（致命，向上传播）；退出码非零、
    /// 超时、等待期间的 OS 错误都归类为 success=false 的 ExecutionResult。
    pub async fn execute(&self, code: &str) -> Result<ExecutionResult, AgentError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("nectar-run-").suffix(&self.file_suffix);
        let mut temp = match &self.work_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        temp.as_file_mut().write_all(code.as_bytes())?;
        temp.as_file_mut().flush()?;

        let start = Instant::now();
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(temp.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| AgentError::Spawn {
            interpreter: self.interpreter.clone(),
            source: e,
        })?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let elapsed = start.elapsed();
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                if output.status.success() {
                    tracing::info!(elapsed_secs = elapsed.as_secs_f64(), "code executed successfully");
                    ExecutionResult {
                        success: true,
                        stdout,
                        error: None,
                        elapsed,
                    }
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    let error = if stderr.is_empty() {
                        format!("进程退出码非零: {:?}", output.status.code())
                    } else {
                        stderr
                    };
                    tracing::warn!(error = %error, "code execution failed");
                    ExecutionResult {
                        success: false,
                        stdout,
                        error: Some(error),
                        elapsed,
                    }
                }
            }
            // 等待已启动的子进程时的 OS 错误：非致命，归类为执行失败
            Ok(Err(e)) => ExecutionResult {
                success: false,
                stdout: String::new(),
                error: Some(format!("执行异常: {}", e)),
                elapsed: start.elapsed(),
            },
            // 超时：wait future 被丢弃，kill_on_drop 向子进程发 SIGKILL，不会残留
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "code execution timed out");
                ExecutionResult {
                    success: false,
                    stdout: String::new(),
                    error: Some(format!("代码执行超时 ({}秒)", self.timeout.as_secs())),
                    elapsed: start.elapsed(),
                }
            }
        };

        // temp 守卫在此释放并删除文件（所有路径共用）
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试用 sh 解释器，避免 CI 依赖 Python
    fn sh_executor(timeout_secs: u64, dir: &std::path::Path) -> SandboxExecutor {
        SandboxExecutor::new("sh", ".sh", timeout_secs).with_work_dir(dir)
    }

    #[tokio::test]
    async fn test_exit_zero_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let result = sh_executor(5, dir.path())
            .execute("echo hello")
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let result = sh_executor(5, dir.path())
            .execute("echo boom >&2\nexit 3")
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reports_limit() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let result = sh_executor(1, dir.path())
            .execute("sleep 60")
            .await
            .unwrap();
        // 1 秒超时必须在远小于 60 秒内返回
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("超时"));
        assert!(error.contains('1'));
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let executor = sh_executor(1, dir.path());

        executor.execute("echo ok").await.unwrap();
        executor.execute("exit 1").await.unwrap();
        executor.execute("sleep 60").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let executor =
            SandboxExecutor::new("definitely-not-an-interpreter", ".sh", 5).with_work_dir(dir.path());
        let err = executor.execute("echo hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }));
        // 启动失败同样不残留临时文件
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
