//! 爬虫：网页 -> 可读文本
//!
//! 单页抓取带有界重试与指数退避（上限 10 秒）；失败编码在 CrawlResult 里，
//! 不抛错。HTML 用 html2text 提取可读文本，失败时回退到手写去标签。
//! 批量抓取用 Semaphore 许可池限制在途请求数，单个 URL 失败不影响整批。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::SpiderSection;

/// 现代浏览器 UA，避免被站点识别为爬虫
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
/// 退避上限（秒）
const MAX_BACKOFF_SECS: u64 = 10;
/// 低于此长度的正文可能不是有效文档
const MIN_CONTENT_CHARS: usize = 50;

/// 一次抓取的结果；失败时 success=false 且 error 给出原因，绝不 panic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    pub title: String,
    /// 提取出的可读正文（Markdown 风格纯文本）
    pub markdown: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub word_count: usize,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlResult {
    fn failure(url: &str, error: String) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            markdown: String::new(),
            success: false,
            status_code: None,
            word_count: 0,
            links: Vec::new(),
            error: Some(error),
        }
    }
}

/// 文档爬虫
pub struct DocSpider {
    client: Client,
    max_retries: u32,
}

impl DocSpider {
    pub fn new(max_retries: u32, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_retries: max_retries.max(1),
        }
    }

    pub fn from_config(cfg: &SpiderSection) -> Self {
        Self::new(cfg.max_retries, cfg.timeout_secs)
    }

    /// 抓取单个 URL：重试 + 指数退避；所有失败折叠为 CrawlResult
    pub async fn fetch(&self, url: &str) -> CrawlResult {
        let mut last_error = String::from("unknown error");

        for attempt in 0..self.max_retries {
            tracing::info!(url = %url, attempt = attempt + 1, max = self.max_retries, "fetching");

            match self.fetch_once(url).await {
                Ok(result) => return result,
                Err(e) => {
                    tracing::warn!(url = %url, attempt = attempt + 1, error = %e, "fetch failed");
                    last_error = e;
                }
            }

            if attempt + 1 < self.max_retries {
                let wait = Duration::from_secs(2u64.pow(attempt + 1).min(MAX_BACKOFF_SECS));
                tokio::time::sleep(wait).await;
            }
        }

        tracing::error!(url = %url, "fetch failed after all retries");
        CrawlResult::failure(url, last_error)
    }

    async fn fetch_once(&self, url: &str) -> Result<CrawlResult, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        let mut body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;

        // 去除 BOM，避免 HTML 检测失败
        if body.starts_with('\u{FEFF}') {
            body = body[1..].to_string();
        }

        let (title, markdown, links) = if looks_like_html(&body) {
            (
                extract_title(&body).unwrap_or_else(|| host_of(url)),
                html_to_text(&body),
                extract_links(&body, url),
            )
        } else {
            (host_of(url), body, Vec::new())
        };

        let markdown = markdown.trim().to_string();
        if markdown.chars().count() < MIN_CONTENT_CHARS {
            tracing::warn!(url = %url, "content too short, may not be a valid document");
        }

        Ok(CrawlResult {
            url: url.to_string(),
            title,
            word_count: markdown.split_whitespace().count(),
            markdown,
            success: true,
            status_code: Some(status.as_u16()),
            links,
            error: None,
        })
    }
}

/// 批量抓取：许可池限制并发，失败按 URL 隔离，永不中断整批
pub async fn fetch_many(spider: Arc<DocSpider>, urls: &[String], max_concurrent: usize) -> Vec<CrawlResult> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let tasks = urls.iter().map(|url| {
        let spider = spider.clone();
        let semaphore = semaphore.clone();
        let url = url.clone();
        async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            spider.fetch(&url).await
        }
    });

    join_all(tasks).await
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.len() > 20
            && s.contains('<')
            && (s.contains("</") || s.contains("<meta") || s.contains("<head") || s.contains("<title")))
}

/// HTML -> 可读文本；html2text 失败时回退到简易去标签
fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut prev_whitespace = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => {
                let is_whitespace = c.is_whitespace();
                if is_whitespace && prev_whitespace {
                    continue;
                }
                prev_whitespace = is_whitespace;
                out.push(if is_whitespace { ' ' } else { c });
            }
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// 提取 <title> 文本
fn extract_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    let title = re.captures(html)?.get(1)?.as_str().trim().to_string();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// 提取页面内链接（绝对化相对路径，跳过锚点与脚本伪链接）
fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let re = match Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let mut links = Vec::new();
    for cap in re.captures_iter(html) {
        let href = cap[1].trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let absolute = if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if let Some(root) = site_root(base_url) {
            if href.starts_with('/') {
                format!("{}{}", root, href)
            } else {
                continue; // 其余相对形式不展开
            }
        } else {
            continue;
        };
        if !links.contains(&absolute) {
            links.push(absolute);
        }
    }
    links
}

/// URL 的主机名（title 缺失时的回退，与 DocuMind 一致）
fn host_of(url: &str) -> String {
    url.trim()
        .strip_prefix("https://")
        .or_else(|| url.trim().strip_prefix("http://"))
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("untitled")
        .to_string()
}

/// scheme://host 前缀，用于绝对化站内链接
fn site_root(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let host = rest.split('/').next()?;
    Some(format!("{}://{}", scheme, host))
}
