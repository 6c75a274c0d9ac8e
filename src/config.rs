//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NECTAR__*` 覆盖（双下划线表示嵌套，
//! 如 `NECTAR__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub knowledge: KnowledgeSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub spider: SpiderSection,
}

/// [app] 段：应用名与爬取数据目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 爬取结果输出目录，未设置时用 ./data
    pub data_dir: Option<PathBuf>,
}

/// [llm] 段：后端选择与模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：dashscope / openai / mock / auto（按 API Key 决定，构造期判断一次）
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "auto".to_string()
}

/// [embedding] 段：嵌入模型；provider 跟随 API Key（DashScope 优先）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EmbeddingSection {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// [knowledge] 段：向量库持久化目录、集合名、分块参数、检索条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeSection {
    #[serde(default = "default_persist_directory")]
    pub persist_directory: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// 研究阶段一次性检索的片段数
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            persist_directory: default_persist_directory(),
            collection: default_collection(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            retrieval_k: default_retrieval_k(),
        }
    }
}

fn default_persist_directory() -> PathBuf {
    PathBuf::from("./.nectar_db")
}

fn default_collection() -> String {
    "documents".to_string()
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_retrieval_k() -> usize {
    5
}

/// [executor] 段：解释器、代码文件后缀、超时、最大迭代数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,
    /// 单次代码执行超时（秒）
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,
    /// 生成-执行循环的最大迭代数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            file_suffix: default_file_suffix(),
            timeout_secs: default_exec_timeout_secs(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_file_suffix() -> String {
    ".py".to_string()
}

fn default_exec_timeout_secs() -> u64 {
    30
}

fn default_max_iterations() -> u32 {
    3
}

/// [spider] 段：重试、超时、批量并发上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpiderSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_spider_timeout_secs")]
    pub timeout_secs: u64,
    /// 批量爬取同时在途的请求数上限（Semaphore 许可数）
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for SpiderSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_spider_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_spider_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            embedding: EmbeddingSection::default(),
            knowledge: KnowledgeSection::default(),
            executor: ExecutorSection::default(),
            spider: SpiderSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 NECTAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NECTAR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NECTAR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "auto");
        assert_eq!(cfg.knowledge.chunk_size, 1000);
        assert_eq!(cfg.knowledge.chunk_overlap, 100);
        assert_eq!(cfg.knowledge.retrieval_k, 5);
        assert_eq!(cfg.executor.interpreter, "python3");
        assert_eq!(cfg.executor.timeout_secs, 30);
        assert_eq!(cfg.executor.max_iterations, 3);
        assert_eq!(cfg.spider.max_concurrent, 4);
    }

    #[test]
    fn test_toml_overrides() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [llm]
                provider = "openai"
                model = "gpt-4o"

                [executor]
                timeout_secs = 5
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.model.as_deref(), Some("gpt-4o"));
        assert_eq!(cfg.executor.timeout_secs, 5);
        // 未覆盖的段保持默认
        assert_eq!(cfg.knowledge.collection, "documents");
    }
}
