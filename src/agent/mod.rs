//! 智能体核心：状态、生成器、沙箱执行器与生成-执行主循环

pub mod executor;
pub mod generator;
pub mod loop_;
pub mod state;

pub use executor::SandboxExecutor;
pub use generator::CodeGenerator;
pub use loop_::{AgentLoop, CONTEXT_PASSAGES, MAX_ITERATIONS, RETRIEVAL_K};
pub use state::{next_step, AgentRunState, ExecutionResult, LoopStep};
