use crate::epic::Epic;
use crate::priority::{epic_weight, DEFAULT_EPIC_WEIGHT};
use crate::{Status, Story, TBD_ESTIMATE};
use serde::Serialize;
use std::fmt;

/// Body-only fields that are rendered as sections instead of frontmatter.
const BODY_FIELDS: [&str; 3] = ["user_story", "acceptance_criteria", "description"];

/// The record as a `---` delimited YAML block, body-only fields left out.
pub fn render_frontmatter(story: &Story) -> Result<String, serde_yaml::Error> {
    let mut frontmatter = serde_yaml::to_value(story)?;
    if let serde_yaml::Value::Mapping(mapping) = &mut frontmatter {
        for field in BODY_FIELDS {
            mapping.remove(field);
        }
    }
    fenced_yaml(&frontmatter)
}

fn fenced_yaml<T: Serialize>(value: &T) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(value)?;
    let mut out = String::from("---\n");
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("---\n");
    Ok(out)
}

/// Render the canonical story file: YAML frontmatter with the record, then
/// the standard sections.
pub fn render_story_markdown(story: &Story) -> Result<String, serde_yaml::Error> {
    let mut out = render_frontmatter(story)?;
    out.push('\n');
    out.push_str(&format!("# {}: {}\n\n", story.id, story.title));

    out.push_str("## User Story\n");
    match text_field(story, "user_story") {
        Some(text) => {
            out.push_str(&text);
            out.push_str("\n\n");
        }
        None => {
            out.push_str("**As a** [user role]  \n");
            out.push_str("**I want** [capability/feature]  \n");
            out.push_str("**So that** [business value/outcome]\n\n");
        }
    }

    out.push_str("## Acceptance Criteria\n");
    let criteria = list_field(story, "acceptance_criteria");
    if criteria.is_empty() {
        out.push_str("- [ ] [Add acceptance criteria]\n");
    } else {
        for criterion in criteria {
            out.push_str(&format!("- [ ] {criterion}\n"));
        }
    }
    out.push('\n');

    if let Some(description) = text_field(story, "description") {
        out.push_str("## Description\n");
        out.push_str(&description);
        out.push_str("\n\n");
    }

    out.push_str("## Implementation Notes\n");
    out.push_str("- [Technical considerations]\n");
    out.push_str("- [Dependencies or prerequisites]\n\n");

    out.push_str("## Definition of Done\n");
    out.push_str("- [ ] Implementation complete\n");
    out.push_str("- [ ] Tests written and passing\n");
    out.push_str("- [ ] Documentation updated\n");
    out.push_str("- [ ] Acceptance criteria verified\n");
    Ok(out)
}

fn text_field(story: &Story, key: &str) -> Option<String> {
    story
        .extra
        .get(key)
        .and_then(|value| value.as_str())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn list_field(story: &Story, key: &str) -> Vec<String> {
    story
        .extra
        .get(key)
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Skeletons for a story that is written by hand in staging and admitted
/// later by `ingest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryTemplate {
    Basic,
    Technical,
    Spike,
}

impl StoryTemplate {
    pub const ALL: [StoryTemplate; 3] = [
        StoryTemplate::Basic,
        StoryTemplate::Technical,
        StoryTemplate::Spike,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryTemplate::Basic => "basic",
            StoryTemplate::Technical => "technical",
            StoryTemplate::Spike => "spike",
        }
    }

    fn labels(&self) -> Vec<&'static str> {
        match self {
            StoryTemplate::Basic => Vec::new(),
            StoryTemplate::Technical => vec!["technical"],
            StoryTemplate::Spike => vec!["spike", "research"],
        }
    }

    fn body(&self) -> &'static str {
        match self {
            StoryTemplate::Basic => {
                "## User Story\n\
**As a** [user role]  \n\
**I want** [capability/feature]  \n\
**So that** [business value/outcome]\n\n\
## Acceptance Criteria\n\
- [ ] [Add acceptance criteria]\n\n\
## Notes\n\
- [Context, links, open questions]\n"
            }
            StoryTemplate::Technical => {
                "## Technical Context\n\
[What exists today and why it needs to change]\n\n\
## Implementation Approach\n\
- [Components touched]\n\
- [Data or schema changes]\n\n\
## Acceptance Criteria\n\
- [ ] [Add acceptance criteria]\n\n\
## Risks\n\
- [Migration, performance or rollout concerns]\n"
            }
            StoryTemplate::Spike => {
                "## Research Question\n\
[What do we need to learn?]\n\n\
## Timebox\n\
[Maximum effort before reporting back]\n\n\
## Acceptance Criteria\n\
- [ ] [Add acceptance criteria]\n\n\
## Expected Output\n\
- [Recommendation, prototype or written findings]\n"
            }
        }
    }
}

impl fmt::Display for StoryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct TemplateFrontmatter<'a> {
    id: &'a str,
    title: &'a str,
    epic: &'a str,
    status: &'a str,
    estimate: &'a str,
    labels: Vec<&'a str>,
}

/// A staged story skeleton carrying a placeholder id, so `ingest` allocates
/// the real one.
pub fn render_template(
    template: StoryTemplate,
    temp_id: &str,
    title: &str,
    epic: &str,
) -> Result<String, serde_yaml::Error> {
    let mut out = fenced_yaml(&TemplateFrontmatter {
        id: temp_id,
        title,
        epic,
        status: Status::Backlog.as_str(),
        estimate: TBD_ESTIMATE,
        labels: template.labels(),
    })?;
    out.push_str(&format!("\n# {title}\n\n"));
    out.push_str(template.body());
    Ok(out)
}

fn status_marker(status: &Status) -> &'static str {
    match status {
        Status::Ready => "🟢",
        Status::Backlog => "🟡",
        Status::Active => "🔵",
        Status::Blocked => "🔴",
        Status::Completed | Status::Accepted => "✅",
        _ => "⚪",
    }
}

/// Human-readable ranking of the whole backlog, in the order given.
pub fn render_prioritization_markdown(stories: &[Story], today: &str) -> String {
    let mut out = String::new();
    out.push_str("# Backlog Prioritization\n\n");
    out.push_str(&format!("*Last updated: {today}*\n\n"));
    out.push_str("## Priority Rankings\n\n");
    out.push_str("Stories ordered by strategic priority (1 = highest priority):\n\n");
    out.push_str("| Priority | Story ID | Title | Epic | Status |\n");
    out.push_str("|----------|----------|-------|------|--------|\n");
    for story in stories {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} {} |\n",
            story.priority,
            story.id,
            story.title.replace('|', "\\|"),
            story.epic,
            status_marker(&story.status),
            story.status
        ));
    }

    out.push_str("\n## Epic Priority Weights\n\n");
    let mut weights: Vec<(u32, Epic)> = Epic::ALL
        .into_iter()
        .map(|epic| (epic_weight(epic), epic))
        .collect();
    weights.sort();
    for (weight, epic) in weights {
        let note = if weight == DEFAULT_EPIC_WEIGHT {
            " (default)"
        } else {
            ""
        };
        out.push_str(&format!("- **{epic}**: {weight}{note}\n"));
    }

    out.push_str("\n## Status Legend\n\n");
    out.push_str("- 🟢 **Ready** - Ready for implementation\n");
    out.push_str("- 🟡 **Backlog** - In backlog, needs refinement\n");
    out.push_str("- 🔵 **Active** - In progress\n");
    out.push_str("- 🔴 **Blocked** - Blocked by dependencies\n");
    out.push_str("- ✅ **Completed / Accepted** - Done\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{parse_story_markdown, split_frontmatter};
    use crate::StoryDraft;

    fn sample() -> Story {
        let draft = StoryDraft {
            title: Some("Surface injury news in the match view".to_string()),
            epic: Some("ui".to_string()),
            user_story: Some(
                "**As a** fan  \n**I want** injury news  \n**So that** I can plan".to_string(),
            ),
            acceptance_criteria: vec!["News appears in the sidebar".to_string()],
            ..StoryDraft::default()
        };
        draft.into_story("UI-012".to_string(), "2025-05-01", "story-ingestor")
    }

    #[test]
    fn rendered_story_parses_back() {
        let story = sample();
        let markdown = render_story_markdown(&story).expect("render");
        assert!(markdown.starts_with("---\n"));
        assert!(markdown.contains("# UI-012: Surface injury news in the match view"));
        assert!(markdown.contains("## Definition of Done"));

        let parsed = parse_story_markdown(&markdown).expect("parse rendered story");
        assert_eq!(parsed.draft.id.as_deref(), Some("UI-012"));
        assert_eq!(parsed.draft.title(), story.title);
        assert_eq!(parsed.draft.acceptance_criteria, vec!["News appears in the sidebar"]);
        assert!(parsed.draft.user_story.is_some());
        let (yaml, _) = split_frontmatter(&markdown).expect("frontmatter");
        assert!(!yaml.contains("acceptance_criteria"));
        assert!(yaml.contains("author: story-ingestor"));
    }

    #[test]
    fn placeholders_fill_empty_sections() {
        let story = Story::new("ADH-003", "Collect retro action items", "adhoc");
        let markdown = render_story_markdown(&story).expect("render");
        assert!(markdown.contains("**As a** [user role]"));
        assert!(markdown.contains("- [ ] [Add acceptance criteria]"));
        assert!(!markdown.contains("## Description"));
        let parsed = parse_story_markdown(&markdown).expect("parse");
        assert!(parsed.draft.acceptance_criteria.is_empty());
    }

    #[test]
    fn templates_stage_as_ingestable_drafts() {
        for template in StoryTemplate::ALL {
            let markdown = render_template(
                template,
                "TEMP-101500-Odds-movement-alerts",
                "Odds movement alerts: first cut",
                "ingestion",
            )
            .expect("render template");
            let parsed = parse_story_markdown(&markdown).expect("parse template");
            assert!(parsed.draft.needs_id(), "{template}");
            assert_eq!(parsed.draft.title(), "Odds movement alerts: first cut");
            assert_eq!(parsed.draft.epic(), "ingestion");
            assert!(parsed.draft.acceptance_criteria.is_empty(), "{template}");
        }
        let spike = render_template(StoryTemplate::Spike, "TEMP-1", "Evaluate feed vendors", "ingestion")
            .expect("render spike");
        assert!(spike.contains("## Research Question"));
        assert!(spike.contains("- spike"));
    }

    #[test]
    fn prioritization_table_lists_every_story() {
        let mut first = Story::new("LLM-001", "Prompt registry", "core");
        first.priority = 1;
        first.status = Status::Ready;
        let second = Story::new("UI-001", "Dark mode | theme", "ui");
        let markdown = render_prioritization_markdown(&[first, second], "2025-05-01");
        assert!(markdown.contains("| 1 | LLM-001 | Prompt registry | core | 🟢 ready |"));
        assert!(markdown.contains("| 99 | UI-001 | Dark mode \\| theme | ui | 🟡 backlog |"));
        assert!(markdown.contains("- **core**: 1\n"));
        assert!(markdown.contains("- **quality**: 10 (default)"));
    }
}
