use crate::epic::Epic;
use crate::{Status, Story, UNASSIGNED_PRIORITY};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Lower weight means the epic ranks earlier.
pub const EPIC_WEIGHTS: [(Epic, u32); 7] = [
    (Epic::Core, 1),
    (Epic::Modeling, 2),
    (Epic::Infrastructure, 4),
    (Epic::Ingestion, 5),
    (Epic::Ui, 7),
    (Epic::SocialMedia, 9),
    (Epic::Adhoc, 11),
];
pub const DEFAULT_EPIC_WEIGHT: u32 = 10;

pub const STATUS_MODIFIERS: [(Status, u32); 4] = [
    (Status::Ready, 0),
    (Status::Backlog, 1),
    (Status::Blocked, 5),
    (Status::Accepted, 10),
];
pub const DEFAULT_STATUS_MODIFIER: u32 = 2;

/// Keyword sets checked in order against the lowercased title; the first set
/// with a hit decides the adjustment.
pub const TITLE_ADJUSTMENTS: [(&[&str], i32); 3] = [
    (&["critical", "urgent", "blocker", "foundation", "core"], -3),
    (&["setup", "config", "install"], -1),
    (&["nice-to-have", "future", "maybe"], 3),
];

/// Readiness scores used when ranking ready stories for auto-prioritization.
const READY_EPIC_SCORES: [(Epic, u32); 7] = [
    (Epic::Core, 10),
    (Epic::Modeling, 8),
    (Epic::Ingestion, 7),
    (Epic::Ui, 6),
    (Epic::Quality, 5),
    (Epic::Infrastructure, 4),
    (Epic::Adhoc, 1),
];
const DEFAULT_READY_SCORE: u32 = 3;
const AUTO_PRIORITIZE_LIMIT: usize = 10;

pub fn epic_weight(epic: Epic) -> u32 {
    EPIC_WEIGHTS
        .iter()
        .find(|(candidate, _)| *candidate == epic)
        .map(|(_, weight)| *weight)
        .unwrap_or(DEFAULT_EPIC_WEIGHT)
}

pub fn status_modifier(status: &Status) -> u32 {
    STATUS_MODIFIERS
        .iter()
        .find(|(candidate, _)| candidate == status)
        .map(|(_, modifier)| *modifier)
        .unwrap_or(DEFAULT_STATUS_MODIFIER)
}

pub fn title_adjustment(title: &str) -> i32 {
    let lowered = title.to_lowercase();
    TITLE_ADJUSTMENTS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(_, adjustment)| *adjustment)
        .unwrap_or(0)
}

/// Heuristic priority for the story at `index` of a list of `total` stories.
/// Never below 1.
pub fn score(story: &Story, index: usize, total: usize) -> u32 {
    let position = if total == 0 {
        0.0
    } else {
        (index as f64 / total as f64) * 2.0
    };
    let raw = f64::from(epic_weight(Epic::normalize(&story.epic)))
        + f64::from(status_modifier(&story.status))
        + position
        + f64::from(title_adjustment(&story.title));
    raw.round().max(1.0) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignScope {
    /// Only records still carrying the unassigned sentinel.
    Unassigned,
    All,
}

/// Give every in-scope record a heuristic priority. Position is taken from
/// the full list so the result does not depend on which records are in
/// scope. Returns the number of records touched.
pub fn assign_priorities(stories: &mut [Story], scope: AssignScope, today: &str) -> usize {
    let total = stories.len();
    let mut touched = 0;
    for index in 0..total {
        let story = &stories[index];
        if scope == AssignScope::Unassigned && story.is_prioritized() {
            continue;
        }
        let priority = score(story, index, total);
        debug!(id = %story.id, priority, "assigned priority");
        let story = &mut stories[index];
        story.priority = priority;
        story.last_updated = Some(today.to_string());
        touched += 1;
    }
    touched
}

/// Canonical backlog order: priority, then epic, then id.
pub fn sort_backlog(stories: &mut [Story]) {
    stories.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.epic.cmp(&b.epic))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityChange {
    pub id: String,
    pub from: u32,
    pub to: u32,
}

/// Set one record's priority. Returns the change, or `None` when the id is
/// unknown.
pub fn set_priority(
    stories: &mut [Story],
    id: &str,
    priority: u32,
    today: &str,
) -> Option<PriorityChange> {
    let story = stories.iter_mut().find(|story| story.id == id)?;
    let change = PriorityChange {
        id: story.id.clone(),
        from: story.priority,
        to: priority,
    };
    story.priority = priority;
    story.last_updated = Some(today.to_string());
    Some(change)
}

/// A ranked story never lands on the unassigned sentinel; it steps one
/// further in the direction it was moving.
fn step_over_unassigned(priority: u32, increasing: bool) -> u32 {
    if priority != UNASSIGNED_PRIORITY {
        return priority;
    }
    debug!(priority, "stepping over the unassigned slot");
    if increasing {
        priority + 1
    } else {
        priority - 1
    }
}

/// Changes a shift would make: every assigned priority at or above `from`
/// moves by `positions` (negative moves up), floored at 1.
pub fn plan_shift(stories: &[Story], from: u32, positions: i64) -> Vec<PriorityChange> {
    stories
        .iter()
        .filter(|story| story.is_prioritized() && story.priority >= from)
        .map(|story| {
            let moved = (i64::from(story.priority) + positions).max(1);
            let to = u32::try_from(moved).unwrap_or(u32::MAX - 1);
            PriorityChange {
                id: story.id.clone(),
                from: story.priority,
                to: step_over_unassigned(to, positions > 0),
            }
        })
        .collect()
}

/// `count` consecutive ranked slots from `start`, skipping the sentinel.
fn ranked_slots(start: u32, count: usize) -> Vec<u32> {
    let mut slots = Vec::with_capacity(count);
    let mut next = start.max(1);
    for _ in 0..count {
        next = step_over_unassigned(next, true);
        slots.push(next);
        next = next.saturating_add(1);
    }
    slots
}

pub fn shift_priorities(stories: &mut [Story], from: u32, positions: i64) -> Vec<PriorityChange> {
    let changes = plan_shift(stories, from, positions);
    apply_changes(stories, &changes);
    changes
}

fn apply_changes(stories: &mut [Story], changes: &[PriorityChange]) {
    for change in changes {
        if let Some(story) = stories.iter_mut().find(|story| story.id == change.id) {
            story.priority = change.to;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub shifted: Vec<PriorityChange>,
    pub placed: Vec<PriorityChange>,
    pub missing: Vec<String>,
}

/// Place `ids` at consecutive priorities starting at `start`, optionally
/// shifting everything at or above `start` down first to make room.
pub fn insert_at(
    stories: &mut [Story],
    ids: &[String],
    start: u32,
    shift_existing: bool,
    today: &str,
) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();
    let slots = ranked_slots(start, ids.len());
    if shift_existing {
        if let Some(last) = slots.last() {
            let positions = i64::from(*last) - i64::from(start) + 1;
            outcome.shifted = shift_priorities(stories, start, positions);
        }
    }
    for (id, priority) in ids.iter().zip(slots) {
        match set_priority(stories, id, priority, today) {
            Some(change) => outcome.placed.push(change),
            None => outcome.missing.push(id.clone()),
        }
    }
    outcome
}

/// How attractive a ready story is to start next; higher is better.
pub fn readiness_score(story: &Story) -> u32 {
    let epic = Epic::resolve(&story.epic);
    let mut score = READY_EPIC_SCORES
        .iter()
        .find(|(candidate, _)| Some(*candidate) == epic)
        .map(|(_, score)| *score)
        .unwrap_or(DEFAULT_READY_SCORE);
    if story.dependencies.is_empty() {
        score += 2;
    }
    if !story.owner.trim().is_empty() {
        score += 1;
    }
    score
}

/// Rank unprioritized ready stories and give the best ten consecutive
/// priorities starting at the first slot above `max_priority` that nothing
/// currently occupies.
pub fn auto_prioritize_ready(
    stories: &mut [Story],
    max_priority: u32,
    today: &str,
) -> Vec<PriorityChange> {
    let mut ready: Vec<(usize, u32)> = stories
        .iter()
        .enumerate()
        .filter(|(_, story)| story.status == Status::Ready && !story.is_prioritized())
        .map(|(index, story)| (index, readiness_score(story)))
        .collect();
    // Stable, so equal scores keep store order.
    ready.sort_by(|a, b| b.1.cmp(&a.1));

    let taken: BTreeSet<u32> = stories.iter().map(|story| story.priority).collect();
    let mut next = max_priority.saturating_add(1);
    while taken.contains(&next) && next < u32::MAX {
        next += 1;
    }

    let ready: Vec<usize> = ready
        .into_iter()
        .take(AUTO_PRIORITIZE_LIMIT)
        .map(|(index, _)| index)
        .collect();
    let slots = ranked_slots(next, ready.len());
    ready
        .into_iter()
        .zip(slots)
        .map(|(index, slot)| {
            let story = &mut stories[index];
            let change = PriorityChange {
                id: story.id.clone(),
                from: story.priority,
                to: slot,
            };
            story.priority = change.to;
            story.last_updated = Some(today.to_string());
            change
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBucket {
    Critical,
    High,
    Medium,
    Low,
}

impl PriorityBucket {
    pub const ALL: [PriorityBucket; 4] = [
        PriorityBucket::Critical,
        PriorityBucket::High,
        PriorityBucket::Medium,
        PriorityBucket::Low,
    ];

    pub fn of(priority: u32) -> Self {
        match priority {
            0..=5 => PriorityBucket::Critical,
            6..=10 => PriorityBucket::High,
            11..=20 => PriorityBucket::Medium,
            _ => PriorityBucket::Low,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PriorityBucket::Critical => "Critical (1-5)",
            PriorityBucket::High => "High (6-10)",
            PriorityBucket::Medium => "Medium (11-20)",
            PriorityBucket::Low => "Low (21+)",
        }
    }
}
