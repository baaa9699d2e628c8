use crate::epic::Epic;
use crate::ids::is_well_formed;
use crate::StoryDraft;
use serde::Serialize;

pub const MIN_TITLE_CHARS: usize = 10;
pub const MAX_TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a candidate before it may be admitted to the store. Every rule is
/// evaluated so the caller can report all problems at once.
pub fn validate_draft(draft: &StoryDraft) -> ValidationReport {
    let mut errors = Vec::new();
    let title = draft.title().trim();
    let epic = draft.epic().trim();

    if title.is_empty() {
        errors.push("Missing required field: title".to_string());
    }
    if epic.is_empty() {
        errors.push("Missing required field: epic".to_string());
    } else if let Err(err) = epic.parse::<Epic>() {
        errors.push(err);
    }
    if !title.is_empty() {
        errors.extend(title_error(title));
    }
    if !draft.needs_id() {
        let id = draft.id.as_deref().unwrap_or_default().trim();
        if !is_well_formed(id) {
            errors.push(format!("Invalid story id '{id}' (expected PREFIX-NNN)"));
        }
    }

    ValidationReport { errors }
}

/// Length rules for a title, counted in characters.
pub fn title_error(title: &str) -> Option<String> {
    let length = title.chars().count();
    if length < MIN_TITLE_CHARS {
        Some(format!(
            "Title too short (minimum {MIN_TITLE_CHARS} characters)"
        ))
    } else if length > MAX_TITLE_CHARS {
        Some(format!(
            "Title too long (maximum {MAX_TITLE_CHARS} characters)"
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str, epic: &str) -> StoryDraft {
        StoryDraft {
            title: Some(title.to_string()),
            epic: Some(epic.to_string()),
            ..StoryDraft::default()
        }
    }

    #[test]
    fn well_formed_draft_passes() {
        let report = validate_draft(&draft("Build the injury report feed", "ingestion"));
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn aliases_are_accepted() {
        assert!(validate_draft(&draft("Pull fixtures from the API", "data_sources")).is_valid());
    }

    #[test]
    fn short_title_is_rejected() {
        let report = validate_draft(&draft("Short", "ui"));
        assert_eq!(
            report.errors,
            vec!["Title too short (minimum 10 characters)".to_string()]
        );
    }

    #[test]
    fn long_title_is_rejected() {
        let report = validate_draft(&draft(&"x".repeat(150), "ui"));
        assert_eq!(
            report.errors,
            vec!["Title too long (maximum 100 characters)".to_string()]
        );
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert!(validate_draft(&draft(&"a".repeat(10), "ui")).is_valid());
        assert!(validate_draft(&draft(&"a".repeat(100), "ui")).is_valid());
        // Multi-byte characters count once.
        assert!(validate_draft(&draft(&"é".repeat(10), "ui")).is_valid());
    }

    #[test]
    fn explicit_ids_must_be_well_formed() {
        let mut candidate = draft("Dark mode for the match view", "ui");
        candidate.id = Some("UI-4".to_string());
        assert_eq!(
            validate_draft(&candidate).errors,
            vec!["Invalid story id 'UI-4' (expected PREFIX-NNN)".to_string()]
        );
        candidate.id = Some("UI-004".to_string());
        assert!(validate_draft(&candidate).is_valid());
        candidate.id = Some("TEMP-101500-Dark-mode".to_string());
        assert!(validate_draft(&candidate).is_valid());
    }

    #[test]
    fn missing_fields_and_bad_epic_are_all_reported() {
        let report = validate_draft(&StoryDraft::default());
        assert_eq!(
            report.errors,
            vec![
                "Missing required field: title".to_string(),
                "Missing required field: epic".to_string(),
            ]
        );

        let report = validate_draft(&draft("A perfectly fine title", "marketing"));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Invalid epic 'marketing'. Valid epics: core"));
    }
}
