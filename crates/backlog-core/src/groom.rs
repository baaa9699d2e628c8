//! Grooming report over the top of the backlog, and the structural audit
//! behind `backlog check`.

use crate::epic::Epic;
use crate::ids::{is_well_formed, next_id};
use crate::validate::title_error;
use crate::{Status, Story};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Only stories ranked at or above this are considered for grooming.
pub const GROOMING_PRIORITY_CEILING: u32 = 20;
pub const DEFAULT_GROOM_COUNT: usize = 20;
const MIN_STORY_WORDS: usize = 100;
const PLACEHOLDER_WORDS: [&str; 3] = ["tbd", "placeholder", "template"];

/// Open stories within the grooming window, most urgent first.
pub fn grooming_candidates(stories: &[Story], count: usize) -> Vec<&Story> {
    let mut candidates: Vec<&Story> = stories
        .iter()
        .filter(|story| {
            story.priority <= GROOMING_PRIORITY_CEILING && story.status.is_active_work()
        })
        .collect();
    candidates.sort_by_key(|story| story.priority);
    candidates.truncate(count);
    candidates
}

/// The id a malformed record should get, allocated after the highest id
/// already used for its epic.
pub fn suggested_id(story: &Story, stories: &[Story]) -> Option<String> {
    if is_well_formed(&story.id) {
        return None;
    }
    let prefix = Epic::normalize(&story.epic).prefix();
    next_id(stories.iter().map(|s| s.id.as_str()), prefix).ok()
}

/// Canonical epic for a record whose stored value is a known alias.
pub fn suggested_epic(story: &Story) -> Option<Epic> {
    Epic::resolve(&story.epic).filter(|epic| epic.as_str() != story.epic)
}

pub fn title_has_placeholder(title: &str) -> bool {
    let lowered = title.to_lowercase();
    PLACEHOLDER_WORDS.iter().any(|word| lowered.contains(word))
}

/// Problems visible in a story's markdown file.
pub fn content_issues(content: &str) -> Vec<String> {
    let lowered = content.to_lowercase();
    let mut issues = Vec::new();
    if !lowered.contains("as a") || !lowered.contains("i want") {
        issues.push("Missing proper user story format".to_string());
    }
    if !lowered.contains("acceptance criteria") {
        issues.push("Missing acceptance criteria".to_string());
    }
    if lowered.split_whitespace().count() < MIN_STORY_WORDS {
        issues.push("Story content appears incomplete".to_string());
    }
    issues
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroomingEntry {
    pub id: String,
    pub epic: String,
    pub status: String,
    pub priority: u32,
    pub issues: Vec<String>,
}

impl GroomingEntry {
    pub fn is_ready(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub title: String,
    pub stories: Vec<(String, String)>,
}

/// Open stories sharing a title (case-insensitive, trimmed), grouped in
/// order of first appearance.
pub fn find_duplicates(stories: &[Story]) -> Vec<DuplicateGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for story in stories.iter().filter(|story| !story.status.is_done()) {
        let key = story.title.trim().to_lowercase();
        let members = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        members.push((story.id.clone(), story.epic.clone()));
    }
    order
        .into_iter()
        .filter_map(|title| {
            let members = groups.remove(&title)?;
            (members.len() > 1).then_some(DuplicateGroup {
                title,
                stories: members,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroomingReport {
    pub entries: Vec<GroomingEntry>,
    pub duplicates: Vec<DuplicateGroup>,
    pub open_stories: usize,
    pub ready_stories: usize,
    pub done_stories: usize,
}

/// Build the grooming report. `read_story` returns the markdown behind a
/// record when it can be found.
pub fn groom<F>(stories: &[Story], count: usize, read_story: F) -> GroomingReport
where
    F: Fn(&Story) -> Option<String>,
{
    let entries = grooming_candidates(stories, count)
        .into_iter()
        .map(|story| {
            let mut issues = Vec::new();
            if let Some(id) = suggested_id(story, stories) {
                issues.push(format!("ID should be {id}"));
            }
            if let Some(epic) = suggested_epic(story) {
                issues.push(format!("Epic should be {epic}"));
            }
            if title_has_placeholder(&story.title) {
                issues.push("Title contains placeholder text".to_string());
            }
            if let Some(content) = read_story(story) {
                issues.extend(content_issues(&content));
            }
            GroomingEntry {
                id: story.id.clone(),
                epic: story.epic.clone(),
                status: story.status.to_string(),
                priority: story.priority,
                issues,
            }
        })
        .collect();

    GroomingReport {
        entries,
        duplicates: find_duplicates(stories),
        open_stories: stories
            .iter()
            .filter(|story| story.status.is_active_work())
            .count(),
        ready_stories: stories
            .iter()
            .filter(|story| story.status == Status::Ready)
            .count(),
        done_stories: stories
            .iter()
            .filter(|story| story.status.is_done())
            .count(),
    }
}

fn capitalize_words(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl GroomingReport {
    pub fn to_markdown(&self, generated: &str) -> String {
        let mut out = String::new();
        out.push_str("# Backlog Grooming Report\n");
        out.push_str(&format!("**Generated:** {generated}\n"));
        out.push_str("**Note:** Completed and accepted stories are excluded from grooming\n\n");
        out.push_str(&format!(
            "## Top {} Active Stories Ready for Grooming\n\n",
            self.entries.len()
        ));
        out.push_str("| # | Story ID | Epic | Status | Priority | Issues |\n");
        out.push_str("|---|----------|------|--------|----------|--------|\n");
        for (index, entry) in self.entries.iter().enumerate() {
            let issues = if entry.is_ready() {
                "Ready".to_string()
            } else {
                entry.issues.join("; ")
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | P{} | {} |\n",
                index + 1,
                entry.id,
                entry.epic,
                entry.status,
                entry.priority,
                issues
            ));
        }

        if !self.duplicates.is_empty() {
            out.push_str("\n## Duplicate Stories Found\n\n");
            for group in &self.duplicates {
                out.push_str(&format!("**{}:**\n", capitalize_words(&group.title)));
                for (id, epic) in &group.stories {
                    out.push_str(&format!("  - {id} ({epic})\n"));
                }
                out.push('\n');
            }
        }

        out.push_str("\n## Summary\n");
        out.push_str(&format!(
            "- **Total active stories needing grooming:** {}\n",
            self.open_stories
        ));
        out.push_str(&format!(
            "- **Stories marked as ready:** {}\n",
            self.ready_stories
        ));
        if self.done_stories > 0 {
            out.push_str(&format!(
                "- **Completed stories (excluded from grooming):** {}\n",
                self.done_stories
            ));
        }
        out.push_str(&format!(
            "- **Stories needing work:** {}\n",
            self.entries.iter().filter(|entry| !entry.is_ready()).count()
        ));
        out.push_str(&format!(
            "- **Duplicate stories found:** {}\n",
            self.duplicates.len()
        ));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub findings: Vec<Finding>,
}

impl AuditReport {
    fn error(&mut self, id: &str, message: String) {
        self.findings.push(Finding {
            severity: Severity::Error,
            id: id.to_string(),
            message,
        });
    }

    fn warning(&mut self, id: &str, message: String) {
        self.findings.push(Finding {
            severity: Severity::Warning,
            id: id.to_string(),
            message,
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|finding| finding.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|finding| finding.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Structural checks over the whole store. A record pointing at a missing
/// file is only a warning; everything else is an error.
pub fn audit<F>(stories: &[Story], file_exists: F) -> AuditReport
where
    F: Fn(&str) -> bool,
{
    let mut report = AuditReport::default();
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for story in stories {
        *seen.entry(story.id.as_str()).or_insert(0) += 1;
    }
    for (id, count) in &seen {
        if *count > 1 {
            report.error(id, format!("Duplicate id used by {count} records"));
        }
    }

    for story in stories {
        let id = story.id.as_str();
        if !is_well_formed(id) {
            report.error(id, "Malformed id".to_string());
        }
        match Epic::resolve(&story.epic) {
            None => report.error(id, format!("Unrecognized epic '{}'", story.epic)),
            Some(epic) if epic.as_str() != story.epic => report.warning(
                id,
                format!("Epic '{}' should be written as '{epic}'", story.epic),
            ),
            Some(_) => {}
        }
        if story.priority == 0 {
            report.error(id, "Priority must be at least 1".to_string());
        }
        if let Some(problem) = title_error(story.title.trim()) {
            report.error(id, problem);
        }
        if let Some(path) = story.file_path.as_deref() {
            if !file_exists(path) {
                report.warning(id, format!("Story file not found: {path}"));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story(id: &str, title: &str, epic: &str, status: Status, priority: u32) -> Story {
        let mut story = Story::new(id, title, epic);
        story.status = status;
        story.priority = priority;
        story
    }

    #[test]
    fn candidates_skip_done_and_low_priority() {
        let stories = vec![
            story("UI-001", "Roster screen layout", "ui", Status::Ready, 4),
            story("UI-002", "Finished already here", "ui", Status::Completed, 1),
            story("UI-003", "Far down the list", "ui", Status::Backlog, 21),
            story("LLM-001", "Prompt registry setup", "core", Status::Draft, 2),
        ];
        let ids: Vec<&str> = grooming_candidates(&stories, 20)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["LLM-001", "UI-001"]);
        assert_eq!(grooming_candidates(&stories, 1).len(), 1);
    }

    #[test]
    fn malformed_ids_get_a_suggestion() {
        let stories = vec![
            story("ING-004", "Odds feed ingestion", "ingestion", Status::Ready, 1),
            story("odds-v2", "Odds feed version two", "data_sources", Status::Ready, 2),
        ];
        assert_eq!(suggested_id(&stories[0], &stories), None);
        assert_eq!(suggested_id(&stories[1], &stories).as_deref(), Some("ING-005"));
        assert_eq!(suggested_epic(&stories[1]), Some(Epic::Ingestion));
        assert_eq!(suggested_epic(&stories[0]), None);
    }

    #[test]
    fn report_lists_issues_and_duplicates() {
        let stories = vec![
            story("UI-001", "TBD dashboard widget", "ui", Status::Ready, 1),
            story("UI-002", "Match centre timeline", "ui", Status::Backlog, 2),
            story("ADH-001", "match centre timeline ", "adhoc", Status::Draft, 30),
            story("ADH-002", "Match centre timeline", "adhoc", Status::Accepted, 30),
        ];
        let report = groom(&stories, 20, |s| {
            (s.id == "UI-002").then(|| "As a fan I want a timeline".to_string())
        });
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].issues, vec!["Title contains placeholder text"]);
        assert_eq!(
            report.entries[1].issues,
            vec![
                "Missing acceptance criteria".to_string(),
                "Story content appears incomplete".to_string()
            ]
        );
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(
            report.duplicates[0].stories,
            vec![
                ("UI-002".to_string(), "ui".to_string()),
                ("ADH-001".to_string(), "adhoc".to_string())
            ]
        );
        assert_eq!(report.done_stories, 1);

        let markdown = report.to_markdown("2025-06-01");
        assert!(markdown.contains("| 1 | UI-001 | ui | ready | P1 | Title contains placeholder text |"));
        assert!(markdown.contains("**Match Centre Timeline:**"));
        assert!(markdown.contains("- **Duplicate stories found:** 1"));
    }

    #[test]
    fn audit_separates_errors_from_warnings() {
        let mut linked = story("UI-001", "Roster screen layout", "ui", Status::Ready, 1);
        linked.file_path = Some("ui/UI-001-Roster.md".to_string());
        let stories = vec![
            linked,
            story("UI-001", "Roster screen second", "ui", Status::Ready, 2),
            story("bad", "Short", "marketing", Status::Ready, 0),
        ];
        let report = audit(&stories, |_| false);
        let errors: Vec<&str> = report.errors().map(|f| f.message.as_str()).collect();
        assert!(errors.contains(&"Duplicate id used by 2 records"));
        assert!(errors.contains(&"Malformed id"));
        assert!(errors.contains(&"Unrecognized epic 'marketing'"));
        assert!(errors.contains(&"Priority must be at least 1"));
        assert!(errors.contains(&"Title too short (minimum 10 characters)"));
        assert_eq!(report.warnings().count(), 1);
        assert!(report.has_errors());

        let clean = vec![story("UI-001", "Roster screen layout", "ui", Status::Ready, 1)];
        assert!(!audit(&clean, |_| true).has_errors());
    }
}
