use crate::epic::Epic;
use crate::priority::{self, AssignScope};
use crate::{BacklogDocument, Story, TBD_ESTIMATE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const LONG_TITLE_CHARS: usize = 60;
const SHORT_TITLE_WORDS: usize = 8;
const SHORT_TITLE_MAX_CHARS: usize = 50;
const TITLE_PREFIXES: [&str; 4] = ["Story:", "Task:", "Feature:", "Epic:"];

const ESTIMATE_SYNONYMS: [(&str, &str); 19] = [
    ("1", "1sp"),
    ("2", "2sp"),
    ("3", "3sp"),
    ("5", "5sp"),
    ("8", "8sp"),
    ("13", "13sp"),
    ("1sp", "1sp"),
    ("2sp", "2sp"),
    ("3sp", "3sp"),
    ("5sp", "5sp"),
    ("8sp", "8sp"),
    ("13sp", "13sp"),
    ("small", "2sp"),
    ("medium", "5sp"),
    ("large", "8sp"),
    ("xl", "13sp"),
    ("s", "2sp"),
    ("m", "5sp"),
    ("l", "8sp"),
];

/// Title keywords that hint at a size, checked in order.
const ESTIMATE_HINTS: [(&[&str], &str); 3] = [
    (&["fix", "update", "cleanup", "refactor"], "2sp"),
    (&["integration", "framework", "system"], "8sp"),
    (&["api", "endpoint", "service"], "5sp"),
];

const LABEL_HINTS: [(&[&str], &str); 6] = [
    (&["api", "endpoint", "service"], "api"),
    (&["ui", "frontend", "interface"], "frontend"),
    (&["data", "dataset", "ingestion"], "data"),
    (&["ml", "ai", "model", "training"], "ai-ml"),
    (&["test", "validation"], "testing"),
    (&["doc"], "documentation"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub estimates_cleaned: usize,
    pub epics_standardized: usize,
    pub owners_assigned: usize,
    pub priorities_assigned: usize,
    pub titles_cleaned: usize,
    pub labels_added: usize,
    pub total_improvements: usize,
}

/// Normalize every record in place. Each counter is the number of records
/// the corresponding pass changed.
pub fn cleanup(stories: &mut [Story], today: &str) -> CleanupSummary {
    let mut summary = CleanupSummary {
        epics_standardized: clean_epics(stories),
        ..CleanupSummary::default()
    };
    summary.estimates_cleaned = clean_estimates(stories);
    summary.owners_assigned = clean_owners(stories);
    summary.priorities_assigned = priority::assign_priorities(stories, AssignScope::Unassigned, today);
    summary.titles_cleaned = clean_titles(stories);
    summary.labels_added = clean_labels(stories);
    summary.total_improvements = summary.estimates_cleaned
        + summary.epics_standardized
        + summary.owners_assigned
        + summary.priorities_assigned
        + summary.titles_cleaned
        + summary.labels_added;
    summary
}

/// What `cleanup` would change, without touching `stories`.
pub fn cleanup_preview(stories: &[Story], today: &str) -> CleanupSummary {
    let mut scratch = stories.to_vec();
    cleanup(&mut scratch, today)
}

/// Clean the whole document and record the outcome in its metadata.
pub fn cleanup_document(doc: &mut BacklogDocument, today: &str) -> CleanupSummary {
    let summary = cleanup(&mut doc.backlog, today);
    doc.metadata
        .extra
        .insert("last_cleaned".to_string(), Value::String(today.to_string()));
    if let Ok(value) = serde_json::to_value(summary) {
        doc.metadata.extra.insert("cleanup_summary".to_string(), value);
    }
    summary
}

fn clean_epics(stories: &mut [Story]) -> usize {
    let mut changed = 0;
    for story in stories.iter_mut() {
        let canonical = Epic::normalize(&story.epic).as_str();
        if story.epic != canonical {
            debug!(id = %story.id, from = %story.epic, to = canonical, "standardized epic");
            story.epic = canonical.to_string();
            changed += 1;
        }
    }
    changed
}

/// Canonical token for a known estimate spelling.
pub fn canonical_estimate(raw: &str) -> Option<&'static str> {
    let key = raw.trim().to_lowercase();
    ESTIMATE_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == key)
        .map(|(_, canonical)| *canonical)
}

/// Best guess at a size for a story nobody has estimated.
pub fn guess_estimate(story: &Story) -> &'static str {
    let title = story.title.to_lowercase();
    if let Some((_, estimate)) = ESTIMATE_HINTS
        .iter()
        .find(|(words, _)| words.iter().any(|word| title.contains(word)))
    {
        return *estimate;
    }
    match Epic::normalize(&story.epic) {
        Epic::Adhoc | Epic::Infrastructure => "3sp",
        Epic::Core | Epic::Modeling => "5sp",
        _ => "3sp",
    }
}

fn clean_estimates(stories: &mut [Story]) -> usize {
    let mut changed = 0;
    for story in stories.iter_mut() {
        let current = story.estimate.trim();
        let replacement = if current.is_empty() || current == TBD_ESTIMATE {
            Some(guess_estimate(story))
        } else {
            canonical_estimate(current).filter(|canonical| *canonical != story.estimate)
        };
        if let Some(estimate) = replacement {
            story.estimate = estimate.to_string();
            changed += 1;
        }
    }
    changed
}

fn clean_owners(stories: &mut [Story]) -> usize {
    let mut changed = 0;
    for story in stories.iter_mut() {
        if !story.owner.trim().is_empty() {
            continue;
        }
        if let Some(owner) = Epic::normalize(&story.epic).default_owner() {
            story.owner = owner.to_string();
            changed += 1;
        }
    }
    changed
}

/// Drop a redundant leading `Story:`-style prefix and shorten rambling
/// titles to their first eight words when that reads short enough.
pub fn tidy_title(title: &str) -> String {
    let mut tidied = title.to_string();
    if let Some(rest) = TITLE_PREFIXES
        .iter()
        .find_map(|prefix| tidied.strip_prefix(prefix))
    {
        tidied = rest.trim().to_string();
    }
    if tidied.chars().count() > LONG_TITLE_CHARS {
        let words: Vec<&str> = tidied.split_whitespace().collect();
        if words.len() > SHORT_TITLE_WORDS {
            let short = words[..SHORT_TITLE_WORDS].join(" ");
            if short.chars().count() < SHORT_TITLE_MAX_CHARS {
                tidied = short;
            }
        }
    }
    tidied
}

fn clean_titles(stories: &mut [Story]) -> usize {
    let mut changed = 0;
    for story in stories.iter_mut() {
        let tidied = tidy_title(&story.title);
        if tidied != story.title {
            story.title = tidied;
            changed += 1;
        }
    }
    changed
}

/// Lowercase, `-`-separated, first occurrence kept.
pub fn standardize_labels(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for label in labels {
        let clean = label.trim().to_lowercase().replace([' ', '_'], "-");
        if !clean.is_empty() && !out.contains(&clean) {
            out.push(clean);
        }
    }
    out
}

/// Labels for a story that has none: its epic plus topical hints from the
/// title words.
pub fn suggest_labels(story: &Story) -> Vec<String> {
    let title = story.title.to_lowercase();
    let words: Vec<&str> = title
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    let mut labels = vec![Epic::normalize(&story.epic).label()];
    for (hints, label) in LABEL_HINTS {
        let hit = hints
            .iter()
            .any(|hint| words.iter().any(|word| word.starts_with(hint)));
        if hit && !labels.iter().any(|existing| existing == label) {
            labels.push(label.to_string());
        }
    }
    labels
}

fn clean_labels(stories: &mut [Story]) -> usize {
    let mut changed = 0;
    for story in stories.iter_mut() {
        let labels = if story.labels.is_empty() {
            suggest_labels(story)
        } else {
            standardize_labels(&story.labels)
        };
        if labels != story.labels {
            story.labels = labels;
            changed += 1;
        }
    }
    changed
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityMetrics {
    pub total: usize,
    pub with_estimates: usize,
    pub with_owners: usize,
    pub prioritized: usize,
    pub with_labels: usize,
    pub proper_titles: usize,
}

impl QualityMetrics {
    pub fn collect(stories: &[Story]) -> Self {
        Self {
            total: stories.len(),
            with_estimates: stories.iter().filter(|s| s.has_estimate()).count(),
            with_owners: stories.iter().filter(|s| !s.owner.trim().is_empty()).count(),
            prioritized: stories.iter().filter(|s| s.is_prioritized()).count(),
            with_labels: stories.iter().filter(|s| !s.labels.is_empty()).count(),
            proper_titles: stories
                .iter()
                .filter(|s| s.title.chars().count() <= LONG_TITLE_CHARS)
                .count(),
        }
    }

    /// Share of satisfied checks across all records, as a percentage.
    pub fn score(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let satisfied = self.with_estimates
            + self.with_owners
            + self.prioritized
            + self.with_labels
            + self.proper_titles;
        round1(satisfied as f64 / (5 * self.total) as f64 * 100.0)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(part as f64 / total as f64 * 100.0)
    }
}

/// Markdown data-quality report, including the last recorded cleanup run.
pub fn render_cleanup_report(doc: &BacklogDocument) -> String {
    let metrics = QualityMetrics::collect(&doc.backlog);
    let total = metrics.total;
    let mut out = String::new();
    out.push_str("# Data Cleanup Report\n\n");
    out.push_str("## Summary\n");
    out.push_str(&format!("- **Total Stories**: {total}\n"));
    out.push_str(&format!("- **Data Quality Score**: {}%\n\n", metrics.score()));

    out.push_str("## Quality Metrics\n");
    let rows = [
        ("Stories with Estimates", metrics.with_estimates),
        ("Stories with Owners", metrics.with_owners),
        ("Prioritized Stories", metrics.prioritized),
        ("Stories with Labels", metrics.with_labels),
        ("Proper Title Length", metrics.proper_titles),
    ];
    for (label, count) in rows {
        out.push_str(&format!(
            "- **{label}**: {count}/{total} ({}%)\n",
            percent(count, total)
        ));
    }

    out.push_str("\n## Epic Distribution\n");
    let mut epics: BTreeMap<&str, usize> = BTreeMap::new();
    for story in &doc.backlog {
        *epics.entry(story.epic.as_str()).or_insert(0) += 1;
    }
    for (epic, count) in epics {
        out.push_str(&format!(
            "- **{epic}**: {count} stories ({}%)\n",
            percent(count, total)
        ));
    }

    let last = doc
        .metadata
        .extra
        .get("cleanup_summary")
        .cloned()
        .and_then(|value| serde_json::from_value::<CleanupSummary>(value).ok());
    if let Some(last) = last {
        out.push_str("\n## Last Cleanup Results\n");
        out.push_str(&format!("- **Estimates Cleaned**: {}\n", last.estimates_cleaned));
        out.push_str(&format!("- **Epics Standardized**: {}\n", last.epics_standardized));
        out.push_str(&format!("- **Owners Assigned**: {}\n", last.owners_assigned));
        out.push_str(&format!("- **Priorities Assigned**: {}\n", last.priorities_assigned));
        out.push_str(&format!("- **Titles Cleaned**: {}\n", last.titles_cleaned));
        out.push_str(&format!("- **Labels Added**: {}\n", last.labels_added));
        out.push_str(&format!("- **Total Improvements**: {}\n", last.total_improvements));
    }
    out
}
