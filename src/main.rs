//! Nectar - Rust 文档智能 RAG 系统
//!
//! 入口：初始化日志、加载配置，按子命令执行爬取 / 索引 / 检索 / 智能体任务。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use nectar::agent::{AgentLoop, CodeGenerator, SandboxExecutor};
use nectar::config::{load_config, AppConfig};
use nectar::knowledge::{KnowledgeBase, KnowledgeRetriever};
use nectar::llm::{create_embedder_from_config, create_llm_from_config};
use nectar::observability;
use nectar::spider::{fetch_many, CrawlResult, DocSpider};

#[derive(Parser)]
#[command(
    name = "nectar",
    version,
    about = "文档智能 RAG 系统：爬取、索引、检索与代码生成智能体"
)]
struct Cli {
    /// 额外配置文件路径（叠加在 config/default.toml 之上）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 爬取网页内容并保存为 JSON
    Crawl {
        /// 要爬取的 URL（可多个）
        #[arg(required = true)]
        urls: Vec<String>,
        /// 输出目录
        #[arg(short, long, default_value = "./data")]
        output: PathBuf,
        /// 同时在途的请求数上限（默认取配置）
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// 将爬取结果索引到向量库
    Index {
        /// 输入数据目录（crawl 的输出）
        #[arg(short, long, default_value = "./data")]
        input: PathBuf,
        /// 集合名称
        #[arg(short, long)]
        collection: Option<String>,
    },
    /// 检索已索引的文档
    Query {
        /// 要查询的问题
        question: String,
        /// 集合名称
        #[arg(short, long)]
        collection: Option<String>,
        /// 返回的片段数
        #[arg(short)]
        k: Option<usize>,
    },
    /// 运行智能体完成任务（检索 -> 生成 -> 沙箱执行 -> 失败重试）
    Agent {
        /// 要执行的任务
        task: String,
        /// 集合名称
        #[arg(short, long)]
        collection: Option<String>,
        /// 代码执行超时（秒）
        #[arg(short, long)]
        timeout: Option<u64>,
        /// 生成-执行循环的最大迭代数
        #[arg(long)]
        max_iterations: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.clone()).context("Failed to load config")?;

    // 与 crawl 无关的命令都需要 API Key；这里只提示，不中断
    if std::env::var("DASHSCOPE_API_KEY").is_err() && std::env::var("OPENAI_API_KEY").is_err() {
        eprintln!("警告: 未检测到 DASHSCOPE_API_KEY (阿里云百炼) 或 OPENAI_API_KEY 环境变量");
    }

    match cli.command {
        Command::Crawl {
            urls,
            output,
            max_concurrent,
        } => cmd_crawl(&cfg, &urls, &output, max_concurrent).await,
        Command::Index { input, collection } => {
            if let Some(c) = collection {
                cfg.knowledge.collection = c;
            }
            cmd_index(&cfg, &input).await
        }
        Command::Query {
            question,
            collection,
            k,
        } => {
            if let Some(c) = collection {
                cfg.knowledge.collection = c;
            }
            cmd_query(&cfg, &question, k).await
        }
        Command::Agent {
            task,
            collection,
            timeout,
            max_iterations,
        } => {
            if let Some(c) = collection {
                cfg.knowledge.collection = c;
            }
            if let Some(t) = timeout {
                cfg.executor.timeout_secs = t;
            }
            if let Some(m) = max_iterations {
                cfg.executor.max_iterations = m;
            }
            cmd_agent(&cfg, &task).await
        }
    }
}

/// 爬取：批量抓取（许可池限流），成功的结果以标题命名存为 JSON
async fn cmd_crawl(
    cfg: &AppConfig,
    urls: &[String],
    output: &PathBuf,
    max_concurrent: Option<usize>,
) -> anyhow::Result<()> {
    let max_concurrent = max_concurrent.unwrap_or(cfg.spider.max_concurrent);
    println!("开始爬取 {} 个 URL (并发上限 {})", urls.len(), max_concurrent);

    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output dir {}", output.display()))?;

    let spider = Arc::new(DocSpider::from_config(&cfg.spider));
    let results = fetch_many(spider, urls, max_concurrent).await;

    let mut saved = 0;
    for result in &results {
        if result.success {
            let file = output.join(format!("{}.json", safe_file_name(&result.title)));
            std::fs::write(&file, serde_json::to_string_pretty(result)?)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            println!("✓ {} -> {}", result.url, file.display());
            saved += 1;
        } else {
            println!(
                "✗ {} 爬取失败: {}",
                result.url,
                result.error.as_deref().unwrap_or("Unknown error")
            );
        }
    }

    println!("完成: 成功 {}/{}", saved, results.len());
    Ok(())
}

/// 索引：读取 crawl 输出的 JSON，逐个加入知识库
async fn cmd_index(cfg: &AppConfig, input: &PathBuf) -> anyhow::Result<()> {
    anyhow::ensure!(input.exists(), "输入目录不存在: {}", input.display());

    let embedder = create_embedder_from_config(&cfg.embedding)?;
    let kb = KnowledgeBase::open(&cfg.knowledge, embedder)?;

    let mut json_files: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    json_files.sort();

    anyhow::ensure!(!json_files.is_empty(), "在 {} 中未找到 JSON 文件", input.display());
    println!("找到 {} 个 JSON 文件", json_files.len());

    let mut success_count = 0;
    for file in &json_files {
        let parsed: Result<CrawlResult, _> =
            std::fs::read_to_string(file).map_err(anyhow::Error::from).and_then(|data| {
                serde_json::from_str(&data).map_err(anyhow::Error::from)
            });
        let result = match parsed {
            Ok(r) => r,
            Err(e) => {
                println!("✗ 处理文件失败 {}: {}", file.display(), e);
                continue;
            }
        };

        if result.markdown.is_empty() {
            println!("⚠ 文件中没有正文内容: {}", file.display());
            continue;
        }

        let mut metadata = HashMap::new();
        metadata.insert("source_file".to_string(), file.display().to_string());
        metadata.insert("title".to_string(), result.title.clone());
        metadata.insert("url".to_string(), result.url.clone());
        metadata.insert("word_count".to_string(), result.word_count.to_string());

        match kb.add_document(&result.markdown, metadata).await {
            Ok(added) if added > 0 => {
                println!("✓ 已索引: {} ({} 块)", result.title, added);
                success_count += 1;
            }
            Ok(_) => println!("✗ 索引失败（无有效块）: {}", file.display()),
            Err(e) => println!("✗ 索引失败 {}: {}", file.display(), e),
        }
    }

    println!("\n索引完成: 成功 {}/{}", success_count, json_files.len());
    println!("文档总数: {}", kb.document_count()?);
    Ok(())
}

/// 检索：打印排名片段（相似度降序）
async fn cmd_query(cfg: &AppConfig, question: &str, k: Option<usize>) -> anyhow::Result<()> {
    let k = k.unwrap_or(cfg.knowledge.retrieval_k);
    let embedder = create_embedder_from_config(&cfg.embedding)?;
    let kb = KnowledgeBase::open(&cfg.knowledge, embedder)?;

    let results = kb
        .search(question, k)
        .await
        .map_err(|e| anyhow::anyhow!("检索失败: {}", e))?;

    if results.is_empty() {
        println!("未找到相关文档。");
        return Ok(());
    }

    println!("找到 {} 个相关文档片段:\n", results.len());
    for (i, passage) in results.iter().enumerate() {
        println!("结果 {} (相似度 {:.3}):", i + 1, passage.score);
        println!("{}", preview(&passage.content, 300));
        if let Some(title) = passage.metadata.get("title") {
            println!("  来源: {}", title);
        }
        println!();
    }
    Ok(())
}

/// 智能体：跑一轮任务并输出完整报告（永不静默失败）
async fn cmd_agent(cfg: &AppConfig, task: &str) -> anyhow::Result<()> {
    println!("任务: {}", task);
    println!("超时: {}秒, 最大迭代: {}", cfg.executor.timeout_secs, cfg.executor.max_iterations);

    let embedder = create_embedder_from_config(&cfg.embedding)?;
    let kb = KnowledgeBase::open(&cfg.knowledge, embedder)?;
    let retriever: Arc<dyn KnowledgeRetriever> = Arc::new(kb);

    let llm = create_llm_from_config(&cfg.llm);
    let agent = AgentLoop::new(
        retriever,
        CodeGenerator::new(llm),
        SandboxExecutor::from_config(&cfg.executor),
    )
    .with_max_iterations(cfg.executor.max_iterations)
    .with_retrieval_k(cfg.knowledge.retrieval_k);

    let state = agent.run(task).await.context("智能体执行失败")?;

    println!("\n执行完成!");
    println!("成功: {}", state.success);
    println!("迭代次数: {}", state.iteration);
    if !state.sources.is_empty() {
        println!("上下文来源: {}", state.sources.join(", "));
    }
    if let Some(error) = &state.error {
        println!("\n最终错误:\n{}", error);
    }
    println!("\n生成的代码:\n{}", state.code);

    let (prompt, completion, total) = agent.token_usage();
    if total > 0 {
        println!("\nToken 用量: prompt {}, completion {}, 合计 {}", prompt, completion, total);
    }

    if !state.success {
        std::process::exit(1);
    }
    Ok(())
}

/// 截断预览，超出部分以 ... 结尾
fn preview(text: &str, max_chars: usize) -> String {
    let preview: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// 标题 -> 安全文件名：仅保留字母数字、空格、点、连字符与下划线
fn safe_file_name(title: &str) -> String {
    let safe: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
        .collect();
    let safe = safe.trim().to_string();
    if safe.is_empty() {
        "untitled".to_string()
    } else {
        safe
    }
}
