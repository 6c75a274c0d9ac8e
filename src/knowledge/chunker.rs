//! 文档分块
//!
//! 两段式切分：先按 Markdown 标题（# / ## / ###）分节（标题保留在正文中，
//! 标题路径写入块元数据），再对每节做带重叠的递归字符切分（UTF-8 安全）。

use std::collections::HashMap;

/// 文档块
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 块 ID
    pub id: String,
    /// 原始文本
    pub text: String,
    /// 来源文档 ID
    pub source_id: String,
    /// 在原文档中的位置（字符偏移，按节内计）
    pub offset: usize,
    /// 元数据（含 header_1 / header_2 / header_3 标题路径）
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_id: source_id.into(),
            offset: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

/// 按标题切出的一节：标题路径 + 正文（正文首行含标题本身）
#[derive(Debug)]
struct Section {
    headers: Vec<(usize, String)>,
    text: String,
}

/// 文档分块器
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 将文档分割为块：标题分节 -> 节内递归字符切分
    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut chunk_idx = 0;

        for section in split_by_headers(text) {
            for (offset, piece) in self.split_chars(&section.text) {
                let mut chunk = Chunk::new(
                    format!("{}_{}", doc_id, chunk_idx),
                    piece,
                    doc_id,
                )
                .with_offset(offset);
                for (level, title) in &section.headers {
                    chunk = chunk.with_metadata(format!("header_{}", level), title.clone());
                }
                chunks.push(chunk);
                chunk_idx += 1;
            }
        }

        chunks
    }

    /// 递归字符切分：优先在分隔符处断开，带重叠，UTF-8 安全；返回 (字符偏移, 文本)
    fn split_chars(&self, text: &str) -> Vec<(usize, String)> {
        let mut pieces = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        if total_chars == 0 {
            return pieces;
        }

        let mut current_idx = 0;

        while current_idx < total_chars {
            let target_end = (current_idx + self.config.chunk_size).min(total_chars);
            let mut actual_end = target_end;

            // 如果不是末尾，尝试在分隔符处断开
            if target_end < total_chars {
                let slice: String = chars[current_idx..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = slice.rfind(sep) {
                        let chars_to_sep: usize = slice[..pos].chars().count() + sep.chars().count();
                        if chars_to_sep > 0 {
                            actual_end = current_idx + chars_to_sep;
                            break;
                        }
                    }
                }
            }

            // 确保至少前进一个字符
            if actual_end <= current_idx {
                actual_end = (current_idx + 1).min(total_chars);
            }

            let piece: String = chars[current_idx..actual_end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                pieces.push((current_idx, trimmed.to_string()));
            }

            // 下一块起点：回退 overlap，但必须前进
            let overlap = self.config.chunk_overlap.min(actual_end - current_idx);
            let next_start = actual_end.saturating_sub(overlap);
            current_idx = if next_start > current_idx {
                next_start
            } else {
                actual_end
            };
        }

        pieces
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

/// 按 Markdown 标题（# / ## / ###）分节；标题行保留在节正文中。
/// 标题路径逐级维护：出现 ## 时清掉旧的 ###，出现 # 时清掉旧的 ## 与 ###。
fn split_by_headers(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut trail: Vec<(usize, String)> = Vec::new();
    let mut current = String::new();

    let flush = |sections: &mut Vec<Section>, trail: &[(usize, String)], current: &mut String| {
        if !current.trim().is_empty() {
            sections.push(Section {
                headers: trail.to_vec(),
                text: std::mem::take(current),
            });
        } else {
            current.clear();
        }
    };

    for line in text.lines() {
        if let Some((level, title)) = parse_header(line) {
            flush(&mut sections, &trail, &mut current);
            trail.retain(|(l, _)| *l < level);
            trail.push((level, title));
        }
        current.push_str(line);
        current.push('\n');
    }
    flush(&mut sections, &trail, &mut current);

    sections
}

/// 解析标题行：`# 标题` -> (1, "标题")；只识别 1-3 级
fn parse_header(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 3 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((hashes, rest.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking() {
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 20,
            ..Default::default()
        });

        let text = "This is the first sentence. Here is another one.\n\nSecond paragraph with more content to split across chunks when the size limit is small enough.";
        let chunks = chunker.chunk("doc1", text);

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(!chunk.text.is_empty());
            assert_eq!(chunk.source_id, "doc1");
            assert!(chunk.text.chars().count() <= 100);
        }
    }

    #[test]
    fn test_header_sections_carry_metadata() {
        let text = "# Guide\nintro text\n\n## Install\npip install foo\n\n## Usage\nrun foo\n";
        let chunks = Chunker::default().chunk("doc1", text);

        assert!(chunks.len() >= 3);
        // 标题行保留在正文中
        assert!(chunks[0].text.contains("# Guide"));
        assert_eq!(chunks[0].metadata.get("header_1"), Some(&"Guide".to_string()));

        let install = chunks
            .iter()
            .find(|c| c.text.contains("pip install"))
            .unwrap();
        assert_eq!(install.metadata.get("header_1"), Some(&"Guide".to_string()));
        assert_eq!(install.metadata.get("header_2"), Some(&"Install".to_string()));

        // 同级标题互相替换，不叠加
        let usage = chunks.iter().find(|c| c.text.contains("run foo")).unwrap();
        assert_eq!(usage.metadata.get("header_2"), Some(&"Usage".to_string()));
    }

    #[test]
    fn test_header_level_resets_deeper_trail() {
        let text = "# A\n## B\n### C\nbody under c\n# D\nbody under d\n";
        let chunks = Chunker::default().chunk("doc1", text);

        let under_d = chunks.iter().find(|c| c.text.contains("body under d")).unwrap();
        assert_eq!(under_d.metadata.get("header_1"), Some(&"D".to_string()));
        assert_eq!(under_d.metadata.get("header_2"), None);
        assert_eq!(under_d.metadata.get("header_3"), None);
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(parse_header("# Title"), Some((1, "Title".to_string())));
        assert_eq!(parse_header("### Deep"), Some((3, "Deep".to_string())));
        assert_eq!(parse_header("#### Too deep"), None);
        assert_eq!(parse_header("#NoSpace"), None);
        assert_eq!(parse_header("plain text"), None);
    }

    #[test]
    fn test_empty_document() {
        let chunks = Chunker::default().chunk("doc1", "");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_utf8_safe() {
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 2,
            ..Default::default()
        });
        let text = "这是一段中文文本，用来验证多字节字符不会被从中间切断。";
        let chunks = chunker.chunk("doc1", text);
        assert!(!chunks.is_empty());
    }
}
