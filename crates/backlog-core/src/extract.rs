use crate::epic::Epic;
use crate::ids::TEMP_ID_PREFIX;
use crate::{Story, StoryDraft};
use regex::Regex;
use serde_json::Value;
use std::path::{Component, Path};
use thiserror::Error;
use tracing::debug;

pub const MAX_BRANCH_CHARS: usize = 50;
const ACCEPTANCE_HEADING: &str = "## Acceptance Criteria";
const CRITERIA_PLACEHOLDER: &str = "[Add acceptance criteria]";
const IGNORED_FILE_NAMES: [&str; 2] = ["README.md", "index.md"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no frontmatter found")]
    MissingFrontmatter,
    #[error("frontmatter is not terminated by a '---' line")]
    UnterminatedFrontmatter,
    #[error("invalid frontmatter: {0}")]
    InvalidFrontmatter(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStory {
    pub draft: StoryDraft,
    pub body: String,
    pub heading: Option<String>,
}

/// Split `content` into its YAML block and the markdown body. The block must
/// open on the very first line.
pub fn split_frontmatter(content: &str) -> Result<(&str, &str), ExtractError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let first_end = content.find('\n').unwrap_or(content.len());
    if content[..first_end].trim_end() != "---" {
        return Err(ExtractError::MissingFrontmatter);
    }
    let yaml_start = (first_end + 1).min(content.len());
    let mut offset = yaml_start;
    for line in content[yaml_start..].split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &content[yaml_start..offset];
            let body = &content[offset + line.len()..];
            return Ok((yaml, body));
        }
        offset += line.len();
    }
    Err(ExtractError::UnterminatedFrontmatter)
}

/// Decode a YAML mapping into a draft. An empty block yields an empty draft.
pub fn parse_frontmatter(yaml: &str) -> Result<StoryDraft, ExtractError> {
    let raw: serde_yaml::Value = serde_yaml::from_str(yaml)
        .map_err(|err| ExtractError::InvalidFrontmatter(err.to_string()))?;
    let value = match raw {
        serde_yaml::Value::Null => return Ok(StoryDraft::default()),
        serde_yaml::Value::Mapping(_) => serde_json::to_value(&raw)
            .map_err(|err| ExtractError::InvalidFrontmatter(err.to_string()))?,
        _ => {
            return Err(ExtractError::InvalidFrontmatter(
                "expected a mapping of fields".to_string(),
            ))
        }
    };
    serde_json::from_value(value).map_err(|err| ExtractError::InvalidFrontmatter(err.to_string()))
}

/// Parse a staged story file: frontmatter is required, the body fills in the
/// user story, acceptance criteria and (as a fallback) the title.
pub fn parse_story_markdown(content: &str) -> Result<ParsedStory, ExtractError> {
    let (yaml, body) = split_frontmatter(content)?;
    let mut draft = parse_frontmatter(yaml)?;
    let heading = first_heading(body);

    if draft.user_story.is_none() {
        draft.user_story = user_story(body);
    }
    if draft.acceptance_criteria.is_empty() {
        draft.acceptance_criteria = acceptance_criteria(body);
    }
    if draft.title().trim().is_empty() {
        draft.title = heading.clone();
    }

    Ok(ParsedStory {
        draft,
        body: body.trim().to_string(),
        heading,
    })
}

/// The `**As a** ... **So that** ...` paragraph, if the body has one.
pub fn user_story(body: &str) -> Option<String> {
    let pattern = Regex::new(r"(?s)\*\*As a\*\*.*?\*\*So that\*\*[^#]*").expect("valid regex");
    pattern
        .find(body)
        .map(|found| found.as_str().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Checkbox items of the acceptance criteria section. Bodies without that
/// section contribute every checkbox item.
pub fn acceptance_criteria(body: &str) -> Vec<String> {
    let section = match body.find(ACCEPTANCE_HEADING) {
        Some(start) => {
            let rest = &body[start + ACCEPTANCE_HEADING.len()..];
            match rest.find("\n## ") {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => body,
    };
    section
        .lines()
        .filter_map(parse_checkbox)
        .filter(|item| item != CRITERIA_PLACEHOLDER)
        .collect()
}

fn parse_checkbox(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let trimmed = trimmed
        .strip_prefix("- [")
        .or_else(|| trimmed.strip_prefix("* ["))?;
    let mut chars = trimmed.chars();
    let marker = chars.next()?;
    if !matches!(marker, ' ' | 'x' | 'X') || chars.next()? != ']' {
        return None;
    }
    let text = chars.as_str().trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

/// First level-one heading with any leading `ID: ` removed.
pub fn first_heading(body: &str) -> Option<String> {
    let heading = Regex::new(r"(?m)^#[ \t]+(.+)$").expect("valid regex");
    let id_prefix = Regex::new(r"^[A-Z]+-\d+:\s*").expect("valid regex");
    let captures = heading.captures(body)?;
    let text = captures.get(1)?.as_str().trim();
    let text = id_prefix.replace(text, "").trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Lowercase kebab form of `input`: punctuation dropped, whitespace and
/// underscores collapsed into single dashes.
pub fn slugify(input: &str) -> String {
    let mut out = String::new();
    let mut prev_dash = false;
    for ch in input.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            prev_dash = false;
        } else if (ch.is_whitespace() || ch == '_' || ch == '-') && !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Git branch name for a story: `<id>-<kebab title>`, at most 50 characters
/// and never ending in a dash.
pub fn branch_name(id: &str, title: &str) -> String {
    let id = id.trim().to_lowercase();
    let slug = slugify(title);
    let full = if slug.is_empty() {
        id
    } else {
        format!("{id}-{slug}")
    };
    let truncated: String = full.chars().take(MAX_BRANCH_CHARS).collect();
    truncated.trim_end_matches('-').to_string()
}

/// `ID-Clean_Title.md`: punctuation dropped, whitespace runs become `_`.
pub fn story_file_name(id: &str, title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace() || *ch == '_' || *ch == '-')
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{id}-{joined}.md")
}

/// Placeholder id for a hand-written staged story: `TEMP-<stamp>-Title-Words`.
pub fn temp_story_id(stamp: &str, title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace() || *ch == '_' || *ch == '-')
        .collect();
    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join("-");
    format!("{TEMP_ID_PREFIX}{stamp}-{joined}")
}

/// Whether a file under the backlog tree is bookkeeping rather than a story.
pub fn is_ignored_story_file(file_name: &str) -> bool {
    file_name.starts_with('_') || IGNORED_FILE_NAMES.contains(&file_name)
}

/// Lenient extraction used when rescanning story files already living in the
/// backlog tree. Missing or broken frontmatter is tolerated; id, title and
/// epic fall back to what the path and heading reveal.
pub fn extract_tracked_story(
    rel_path: &Path,
    content: &str,
    today: &str,
    default_author: &str,
) -> Option<Story> {
    let file_name = rel_path.file_name()?.to_str()?;
    if is_ignored_story_file(file_name) {
        return None;
    }
    let stem = rel_path.file_stem()?.to_str()?;

    let (mut draft, body) = match split_frontmatter(content) {
        Ok((yaml, body)) => match parse_frontmatter(yaml) {
            Ok(draft) => (draft, body),
            Err(err) => {
                debug!(path = %rel_path.display(), error = %err, "ignoring frontmatter");
                (StoryDraft::default(), body)
            }
        },
        Err(_) => (StoryDraft::default(), content),
    };

    let id = draft
        .id
        .take()
        .filter(|id| !id.trim().is_empty())
        .or_else(|| id_from_file_name(file_name))
        .unwrap_or_else(|| stem.to_uppercase());

    if draft.title().trim().is_empty() {
        draft.title = Some(first_heading(body).unwrap_or_else(|| title_from_stem(stem)));
    }
    if draft.epic().trim().is_empty() {
        draft.epic = Some(epic_from_path(rel_path).as_str().to_string());
    }
    if draft.estimate.is_none() {
        draft.estimate = estimate_from_text(content);
    }
    if draft.labels.is_empty() {
        if let Some(Value::Array(tags)) = draft.extra.remove("tags") {
            draft.labels = tags
                .into_iter()
                .filter_map(|tag| tag.as_str().map(str::to_string))
                .collect();
        }
    }
    if draft.labels.is_empty() {
        draft.labels = vec![Epic::normalize(draft.epic()).label()];
    }
    if draft.user_story.is_none() {
        draft.user_story = user_story(body);
    }
    if draft.acceptance_criteria.is_empty() {
        draft.acceptance_criteria = acceptance_criteria(body);
    }
    draft.file_path = Some(path_to_slash(rel_path));

    Some(draft.into_story(id, today, default_author))
}

fn id_from_file_name(file_name: &str) -> Option<String> {
    let dashed = Regex::new(r"[A-Z]+-\d+").expect("valid regex");
    let compact = Regex::new(r"[A-Z]\d+").expect("valid regex");
    dashed
        .find(file_name)
        .or_else(|| compact.find(file_name))
        .map(|found| found.as_str().to_string())
}

fn title_from_stem(stem: &str) -> String {
    stem.split(|ch: char| ch == '_' || ch == '-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Deepest directory that names an epic, or the default epic.
fn epic_from_path(rel_path: &Path) -> Epic {
    rel_path
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|component| match component {
                    Component::Normal(name) => name.to_str(),
                    _ => None,
                })
                .filter_map(Epic::resolve)
                .last()
                .unwrap_or(Epic::DEFAULT)
        })
        .unwrap_or(Epic::DEFAULT)
}

fn estimate_from_text(content: &str) -> Option<String> {
    let pattern = Regex::new(
        r"(?i)estimate[:\s]*(\d+\.?\d*\s*(?:sp|story points?|days?|weeks?))",
    )
    .expect("valid regex");
    pattern
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().trim().to_string())
}

pub fn path_to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
