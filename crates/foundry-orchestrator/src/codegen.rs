//! Prompt construction and response parsing for the generation provider.

use core::result::Result as CoreResult;
use foundry_core::{IterationError, PackageSpec};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs::{create_dir_all, write};
use walkdir::WalkDir;

use crate::error::Result;

/// Entry point used for unlabelled blocks and fence-less responses.
pub const ENTRY_POINT: &str = "src/index.ts";

/// Source directory every generated file is written under.
pub const SOURCE_DIR: &str = "src";

/// System prompt for source generation.
pub const GENERATION_SYSTEM_PROMPT: &str = "\
You are an expert TypeScript engineer generating a complete, production-quality npm package.
Return every source file in its own fenced code block whose info string carries the file path,
for example ```ts src/index.ts. All paths must be relative and inside src/.
Include tests next to the code they cover (for example src/index.test.ts).
Do not explain the code outside the code blocks.";

/// System prompt for the production-readiness review.
pub const VALIDATION_SYSTEM_PROMPT: &str = "\
You are a senior code reviewer deciding whether a generated package is ready for production.
Respond with a single JSON object and nothing else:
{\"score\": <0-100>, \"production_ready\": <true|false>, \"issues\": [<string>], \"suggestions\": [<string>]}";

static FILE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"^\s*(?://|#)\s*[Ff]ile:\s*(\S+)\s*$") {
        Ok(regex) => regex,
        Err(err) => panic!("File marker regex is invalid: {err}"),
    });

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n\s*```") {
        Ok(regex) => regex,
        Err(err) => panic!("JSON fence regex is invalid: {err}"),
    });

/// One file extracted from a provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to the package root, always under `src/`.
    pub path: PathBuf,
    /// File contents.
    pub content: String,
}

/// Build the generation prompt: the spec, plus earlier failures when retrying.
pub fn generation_prompt(spec: &PackageSpec, iteration: u32, errors: &[IterationError]) -> String {
    let mut prompt = format!("Create the package described below.\n\n{}", spec.render());
    if iteration > 1 && !errors.is_empty() {
        prompt.push_str(
            "\nEarlier attempts failed. Regenerate every file and fix these problems:\n",
        );
        for record in errors {
            let _ignored = write!(
                prompt,
                "\n### Iteration {} ({})\n{}\n",
                record.iteration, record.phase, record.error
            );
        }
    }
    prompt
}

/// Build the validation prompt from the spec and the generated sources.
pub fn validation_prompt(spec: &PackageSpec, files: &[GeneratedFile]) -> String {
    let mut prompt = format!(
        "Review this package against its specification.\n\n{}\nFiles:\n",
        spec.render()
    );
    for file in files {
        let _ignored = write!(
            prompt,
            "\n--- {} ---\n{}\n",
            file.path.display(),
            file.content
        );
    }
    prompt
}

/// Normalize a path from a fence label so it lands under `src/`.
///
/// Leading `./` and `/` are stripped; anything containing `..` is rejected.
pub fn normalize_source_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim().trim_start_matches("./").trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        return None;
    }
    if relative.starts_with(SOURCE_DIR) {
        Some(relative)
    } else {
        Some(Path::new(SOURCE_DIR).join(relative))
    }
}

/// Path carried by a fence info string, if any.
///
/// Accepts `ts src/x.ts`, `ts:src/x.ts` and a bare `src/x.ts`.
fn path_from_info(info: &str) -> Option<&str> {
    let mut words = info.split_whitespace();
    let first = words.next()?;
    if let Some(second) = words.next() {
        return Some(second);
    }
    if let Some((_, path)) = first.split_once(':') {
        return Some(path);
    }
    first.contains('/').then_some(first)
}

/// Extract every fenced block from a provider response.
///
/// Unlabelled blocks become the entry point; a response with no fences at
/// all is taken whole as the entry point. Blocks with unsafe paths are
/// dropped.
pub fn parse_code_blocks(response: &str) -> Vec<GeneratedFile> {
    let mut files = Vec::<GeneratedFile>::new();
    let mut saw_fence = false;
    let mut lines = response.lines();

    while let Some(line) = lines.next() {
        let Some(info) = line.trim_start().strip_prefix("```") else {
            continue;
        };
        saw_fence = true;
        let mut body = Vec::new();
        for inner in lines.by_ref() {
            if inner.trim() == "```" {
                break;
            }
            body.push(inner);
        }

        let mut label = path_from_info(info.trim()).map(str::to_owned);
        if let Some(captures) = body.first().and_then(|first| FILE_MARKER.captures(first)) {
            label = Some(captures[1].to_owned());
            body.remove(0);
        }

        let path = match label {
            Some(raw) => match normalize_source_path(&raw) {
                Some(path) => path,
                None => {
                    tracing::warn!(path = %raw, "dropping generated file with unsafe path");
                    continue;
                }
            },
            None => PathBuf::from(ENTRY_POINT),
        };

        let mut content = body.join("\n");
        content.push('\n');
        match files.iter_mut().find(|file| file.path == path) {
            Some(existing) => existing.content = content,
            None => files.push(GeneratedFile { path, content }),
        }
    }

    if !saw_fence && !response.trim().is_empty() {
        files.push(GeneratedFile {
            path: PathBuf::from(ENTRY_POINT),
            content: format!("{}\n", response.trim()),
        });
    }
    files
}

/// Write generated files under `root`, creating parent directories.
///
/// # Errors
/// Returns an error if any directory or file cannot be written.
pub async fn write_files(root: &Path, files: &[GeneratedFile]) -> Result<usize> {
    for file in files {
        let target = root.join(&file.path);
        if let Some(parent) = target.parent() {
            create_dir_all(parent).await?;
        }
        write(&target, &file.content).await?;
    }
    Ok(files.len())
}

/// Read every source file under `root/src`, skipping unreadable files.
pub fn collect_sources(root: &Path) -> Vec<GeneratedFile> {
    let source_root = root.join(SOURCE_DIR);
    let mut files: Vec<GeneratedFile> = WalkDir::new(&source_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != "node_modules")
        .filter_map(CoreResult::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let content = fs::read_to_string(entry.path()).ok()?;
            let path = entry.path().strip_prefix(root).ok()?.to_path_buf();
            Some(GeneratedFile { path, content })
        })
        .collect();
    files.sort_by(|left, right| left.path.cmp(&right.path));
    files
}

/// Reviewer verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Quality score, clamped to 0-100.
    pub score: f64,
    /// Whether the package may ship.
    pub production_ready: bool,
    /// Blocking problems.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Non-blocking improvements.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidationVerdict {
    /// Failure detail listing every issue.
    pub fn failure_detail(&self) -> String {
        let mut detail = format!("Not production ready (score {:.0})", self.score);
        for issue in &self.issues {
            detail.push_str("\n- ");
            detail.push_str(issue);
        }
        detail
    }
}

/// Parse a verdict from raw JSON, a fenced JSON block, or the outermost braces.
///
/// # Errors
/// Returns a description of why the response could not be parsed.
pub fn parse_verdict(response: &str) -> CoreResult<ValidationVerdict, String> {
    let candidate = JSON_FENCE
        .captures(response)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str())
        .or_else(|| {
            let start = response.find('{')?;
            let end = response.rfind('}')?;
            (start < end).then(|| &response[start..=end])
        })
        .ok_or_else(|| "validation response contains no JSON object".to_owned())?;

    let mut verdict: ValidationVerdict = serde_json::from_str(candidate)
        .map_err(|error| format!("malformed validation response: {error}"))?;
    if !verdict.score.is_finite() {
        return Err("validation score is not a number".to_owned());
    }
    verdict.score = verdict.score.clamp(0.0, 100.0);
    Ok(verdict)
}
