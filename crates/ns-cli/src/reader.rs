//! Source discovery and block splitting.
//!
//! Walks the source directories for `.md`, `.markdown` and `.txt` files and
//! turns each paragraph, list item and block quote into a [`SourceBlock`].
//! Headings and code blocks are not statements and are skipped. A leading
//! YAML frontmatter block can set `category`, `elicitation` and `date` for
//! every block of its file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result, bail};
use ns_core::time::{canonicalize, unix_to_iso8601};
use ns_core::{Elicitation, SourceBlock, SourceCategory};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use serde::Deserialize;

/// Blocks shorter than this carry no usable statement.
pub const MIN_BLOCK_CHARS: usize = 12;

const EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Frontmatter {
    category: Option<String>,
    elicitation: Option<String>,
    date: Option<String>,
}

/// Every block of every source file under `sources`, in path order.
/// `root` is stripped from recorded file names when it is a prefix.
pub fn read_sources(sources: &[PathBuf], root: &Path) -> Result<Vec<SourceBlock>> {
    let mut files = Vec::new();
    for source in sources {
        if source.is_dir() {
            collect_files(source, &mut files)?;
        } else if source.is_file() {
            files.push(source.clone());
        } else {
            bail!("source {} does not exist", source.display());
        }
    }
    files.sort();
    files.dedup();

    let mut blocks = Vec::new();
    for path in &files {
        let file_blocks = read_file(path, root)?;
        tracing::debug!(file = %path.display(), blocks = file_blocks.len(), "read source file");
        blocks.extend(file_blocks);
    }
    Ok(blocks)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read dir {}", dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e.to_lowercase().as_str()))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn read_file(path: &Path, root: &Path) -> Result<Vec<SourceBlock>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (frontmatter, body) = split_frontmatter(&content);
    let meta = match frontmatter {
        Some(yaml) => serde_yaml::from_str::<Frontmatter>(yaml).unwrap_or_else(|e| {
            tracing::warn!(file = %path.display(), "ignoring unparseable frontmatter: {e}");
            Frontmatter::default()
        }),
        None => Frontmatter::default(),
    };

    let category = match meta.category.as_deref() {
        Some(c) => SourceCategory::parse(c).unwrap_or_else(|| {
            tracing::warn!(file = %path.display(), category = c, "unknown category, using self");
            SourceCategory::SelfAuthored
        }),
        None => SourceCategory::SelfAuthored,
    };
    let elicitation = meta
        .elicitation
        .as_deref()
        .map(Elicitation::from_str_lossy)
        .unwrap_or_default();
    let timestamp = meta
        .date
        .as_deref()
        .and_then(canonicalize)
        .unwrap_or_else(|| modified_at(path));

    let display = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();
    let is_markdown = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| !e.eq_ignore_ascii_case("txt"));
    let texts = if is_markdown {
        markdown_blocks(body)
    } else {
        text_blocks(body)
    };

    Ok(texts
        .into_iter()
        .map(|text| {
            SourceBlock::new(text, display.clone())
                .with_category(category)
                .with_elicitation(elicitation)
                .with_timestamp(timestamp.clone())
        })
        .collect())
}

/// Split a leading `---` fenced YAML block from the body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (None, content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, content)
}

fn modified_at(path: &Path) -> String {
    let secs = fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    unix_to_iso8601(secs)
}

fn markdown_blocks(body: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut buf = String::new();
    let mut skip_depth = 0usize;

    for event in Parser::new(body) {
        match event {
            Event::Start(Tag::Heading { .. } | Tag::CodeBlock(_)) => {
                flush(&mut buf, &mut blocks);
                skip_depth += 1;
            }
            Event::End(TagEnd::Heading(_) | TagEnd::CodeBlock) => {
                skip_depth = skip_depth.saturating_sub(1);
            }
            // Quotes hold paragraphs; a nested item ends its parent's own text.
            Event::Start(Tag::Paragraph | Tag::Item)
            | Event::End(TagEnd::Paragraph | TagEnd::Item) => {
                flush(&mut buf, &mut blocks);
            }
            Event::Text(text) | Event::Code(text) if skip_depth == 0 => buf.push_str(&text),
            Event::SoftBreak | Event::HardBreak if skip_depth == 0 => buf.push(' '),
            _ => {}
        }
    }
    flush(&mut buf, &mut blocks);
    blocks
}

/// Plain text: blank-line separated paragraphs.
fn text_blocks(body: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut buf = String::new();
    for line in body.lines() {
        if line.trim().is_empty() {
            flush(&mut buf, &mut blocks);
        } else {
            buf.push_str(line);
            buf.push(' ');
        }
    }
    flush(&mut buf, &mut blocks);
    blocks
}

fn flush(buf: &mut String, blocks: &mut Vec<String>) {
    let text = buf.split_whitespace().collect::<Vec<_>>().join(" ");
    buf.clear();
    if text.chars().count() >= MIN_BLOCK_CHARS {
        blocks.push(text);
    }
}
