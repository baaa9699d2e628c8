//! Standard on-disk layout for story files: `<backlog>/<epic dir>/<ID>-<Title>.md`
//! with YAML frontmatter. Planning is pure; the caller moves the files.

use crate::epic::Epic;
use crate::extract::{branch_name, story_file_name};
use crate::ids::{is_well_formed, IdAllocator, IdExhausted};
use crate::Story;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Missing,
    /// Present, but without a frontmatter block.
    Plain,
    WithFrontmatter,
}

/// One record whose file has to move, gain frontmatter, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutFix {
    pub id: String,
    /// Replacement for a malformed id.
    pub new_id: Option<String>,
    pub from: String,
    pub to: String,
    pub add_frontmatter: bool,
}

impl LayoutFix {
    pub fn moves(&self) -> bool {
        self.from != self.to
    }

    pub fn final_id(&self) -> &str {
        self.new_id.as_deref().unwrap_or(&self.id)
    }

    /// Whether the file content, not just its location, changes.
    pub fn rewrites(&self) -> bool {
        self.add_frontmatter || self.new_id.is_some()
    }

    /// Point `story` at its new file and id.
    pub fn apply_to(&self, story: &mut Story, today: &str) {
        if let Some(new_id) = &self.new_id {
            story.id = new_id.clone();
            story.branch_name = Some(branch_name(new_id, &story.title));
        }
        story.file_path = Some(self.to.clone());
        story.last_updated = Some(today.to_string());
    }
}

/// A target path already taken by another record or file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutConflict {
    pub id: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayoutPlan {
    pub fixes: Vec<LayoutFix>,
    pub conflicts: Vec<LayoutConflict>,
}

/// Where `story` belongs under `backlog_prefix` (root-relative, slash form).
pub fn standard_path(backlog_prefix: &str, story: &Story, id: &str) -> String {
    format!(
        "{}/{}/{}",
        backlog_prefix.trim_end_matches('/'),
        Epic::normalize(&story.epic).directory(),
        story_file_name(id, story.title.trim())
    )
}

/// Work out which tracked files are off-layout. Records without a file, or
/// whose file is gone, are left to `scan`.
pub fn plan_layout<F>(
    stories: &[Story],
    backlog_prefix: &str,
    file_state: F,
) -> Result<LayoutPlan, IdExhausted>
where
    F: Fn(&str) -> FileState,
{
    let mut allocator = IdAllocator::from_ids(stories.iter().map(|story| story.id.as_str()));
    let mut claimed: BTreeSet<String> = stories
        .iter()
        .filter_map(|story| story.file_path.clone())
        .collect();
    let mut plan = LayoutPlan::default();

    for story in stories {
        let Some(from) = story.file_path.as_deref() else {
            continue;
        };
        if story.title.trim().is_empty() {
            continue;
        }
        let state = file_state(from);
        if state == FileState::Missing {
            continue;
        }

        let new_id = if is_well_formed(&story.id) {
            None
        } else {
            Some(allocator.allocate_for(&story.epic)?)
        };
        let to = standard_path(
            backlog_prefix,
            story,
            new_id.as_deref().unwrap_or(&story.id),
        );
        let fix = LayoutFix {
            id: story.id.clone(),
            new_id,
            from: from.to_string(),
            to,
            add_frontmatter: state == FileState::Plain,
        };
        if !fix.moves() && !fix.rewrites() {
            continue;
        }
        if fix.moves() && (claimed.contains(&fix.to) || file_state(&fix.to) != FileState::Missing) {
            debug!(id = %fix.id, target = %fix.to, "layout target taken");
            plan.conflicts.push(LayoutConflict {
                id: fix.id,
                target: fix.to,
            });
            continue;
        }
        claimed.insert(fix.to.clone());
        plan.fixes.push(fix);
    }
    Ok(plan)
}

/// Replace every dependency on `old` with `new`.
pub fn rename_dependency(stories: &mut [Story], old: &str, new: &str) -> usize {
    let mut renamed = 0;
    for story in stories.iter_mut() {
        for dep in story.dependencies.iter_mut().filter(|dep| dep.as_str() == old) {
            *dep = new.to_string();
            renamed += 1;
        }
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tracked(id: &str, title: &str, epic: &str, path: &str) -> Story {
        let mut story = Story::new(id, title, epic);
        story.file_path = Some(path.to_string());
        story
    }

    fn states(entries: &[(&str, FileState)]) -> BTreeMap<String, FileState> {
        entries
            .iter()
            .map(|(path, state)| (path.to_string(), *state))
            .collect()
    }

    #[test]
    fn off_layout_files_are_planned() {
        let stories = vec![
            tracked(
                "UI-001",
                "Roster screen layout",
                "ui",
                "backlog/ui/UI-001-Roster_screen_layout.md",
            ),
            tracked("UI-002", "Dark mode toggle", "ui", "backlog/accepted/dark-mode.md"),
            tracked("S07", "Share match cards", "social_media", "backlog/social/s07.md"),
            tracked("ING-004", "Odds feed", "data_sources", "backlog/ingestion/gone.md"),
        ];
        let disk = states(&[
            ("backlog/ui/UI-001-Roster_screen_layout.md", FileState::WithFrontmatter),
            ("backlog/accepted/dark-mode.md", FileState::WithFrontmatter),
            ("backlog/social/s07.md", FileState::Plain),
        ]);
        let plan = plan_layout(&stories, "backlog", |path| {
            disk.get(path).copied().unwrap_or(FileState::Missing)
        })
        .expect("plan");

        assert!(plan.conflicts.is_empty());
        assert_eq!(
            plan.fixes,
            vec![
                LayoutFix {
                    id: "UI-002".into(),
                    new_id: None,
                    from: "backlog/accepted/dark-mode.md".into(),
                    to: "backlog/ui/UI-002-Dark_mode_toggle.md".into(),
                    add_frontmatter: false,
                },
                LayoutFix {
                    id: "S07".into(),
                    new_id: Some("SOC-001".into()),
                    from: "backlog/social/s07.md".into(),
                    to: "backlog/social_media/SOC-001-Share_match_cards.md".into(),
                    add_frontmatter: true,
                },
            ]
        );
    }

    #[test]
    fn taken_targets_are_conflicts() {
        let stories = vec![tracked(
            "UI-003",
            "Fixture calendar view",
            "ui",
            "backlog/old/calendar.md",
        )];
        let plan = plan_layout(&stories, "backlog/", |_| FileState::WithFrontmatter)
            .expect("plan");
        assert!(plan.fixes.is_empty());
        assert_eq!(
            plan.conflicts,
            vec![LayoutConflict {
                id: "UI-003".into(),
                target: "backlog/ui/UI-003-Fixture_calendar_view.md".into(),
            }]
        );
    }

    #[test]
    fn applying_a_new_id_updates_branch_and_dependencies() {
        let mut stories = vec![
            tracked("S07", "Share match cards", "social_media", "backlog/social/s07.md"),
            Story::new("UI-004", "Depends on sharing", "ui"),
        ];
        stories[1].dependencies = vec!["S07".to_string()];
        let fix = LayoutFix {
            id: "S07".into(),
            new_id: Some("SOC-001".into()),
            from: "backlog/social/s07.md".into(),
            to: "backlog/social_media/SOC-001-Share_match_cards.md".into(),
            add_frontmatter: true,
        };
        fix.apply_to(&mut stories[0], "2025-04-01");
        assert_eq!(rename_dependency(&mut stories, "S07", "SOC-001"), 1);
        assert_eq!(stories[0].id, "SOC-001");
        assert_eq!(
            stories[0].branch_name.as_deref(),
            Some("soc-001-share-match-cards")
        );
        assert_eq!(stories[0].file_path.as_deref(), Some(fix.to.as_str()));
        assert_eq!(stories[1].dependencies, vec!["SOC-001"]);
    }
}
