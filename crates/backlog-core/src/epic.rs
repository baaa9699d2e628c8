use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Epic {
    Core,
    Modeling,
    Ingestion,
    Ui,
    Quality,
    Infrastructure,
    Adhoc,
    SocialMedia,
    Explain,
}

/// Historic spellings found in older stores and story files.
const EPIC_ALIASES: [(&str, Epic); 15] = [
    ("data_sources", Epic::Ingestion),
    ("data_source_integration", Epic::Ingestion),
    ("llm_ingestion", Epic::Ingestion),
    ("llm_backlog", Epic::Core),
    ("llm", Epic::Core),
    ("infra", Epic::Infrastructure),
    ("llm_infra", Epic::Infrastructure),
    ("training", Epic::Modeling),
    ("models", Epic::Modeling),
    ("llm_modeling", Epic::Modeling),
    ("social", Epic::SocialMedia),
    ("llm_quality", Epic::Quality),
    ("qa", Epic::Quality),
    ("llm_explain", Epic::Explain),
    ("ad_hoc", Epic::Adhoc),
];

impl Epic {
    pub const ALL: [Epic; 9] = [
        Epic::Core,
        Epic::Modeling,
        Epic::Ingestion,
        Epic::Ui,
        Epic::Quality,
        Epic::Infrastructure,
        Epic::Adhoc,
        Epic::SocialMedia,
        Epic::Explain,
    ];

    /// Bucket for anything that cannot be resolved.
    pub const DEFAULT: Epic = Epic::Adhoc;

    pub fn as_str(&self) -> &'static str {
        match self {
            Epic::Core => "core",
            Epic::Modeling => "modeling",
            Epic::Ingestion => "ingestion",
            Epic::Ui => "ui",
            Epic::Quality => "quality",
            Epic::Infrastructure => "infrastructure",
            Epic::Adhoc => "adhoc",
            Epic::SocialMedia => "social_media",
            Epic::Explain => "explain",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Epic::Core => "LLM",
            Epic::Modeling => "MOD",
            Epic::Ingestion => "ING",
            Epic::Ui => "UI",
            Epic::Quality => "QLT",
            Epic::Infrastructure => "INF",
            Epic::Adhoc => "ADH",
            Epic::SocialMedia => "SOC",
            Epic::Explain => "EXP",
        }
    }

    /// Directory under the backlog root that holds this epic's story files.
    pub fn directory(&self) -> &'static str {
        self.as_str()
    }

    pub fn default_owner(&self) -> Option<&'static str> {
        match self {
            Epic::Core | Epic::Modeling => Some("AI Team"),
            Epic::Ingestion => Some("Data Team"),
            Epic::Infrastructure => Some("DevOps Team"),
            Epic::Ui | Epic::SocialMedia => Some("Frontend Team"),
            Epic::Adhoc => Some("Planning Team"),
            Epic::Quality | Epic::Explain => None,
        }
    }

    /// Label form of the epic name (lowercase kebab-case).
    pub fn label(&self) -> String {
        self.as_str().replace('_', "-")
    }

    /// Strict lookup: canonical names and known aliases only.
    pub fn resolve(raw: &str) -> Option<Epic> {
        let key = raw.trim().to_lowercase().replace([' ', '-'], "_");
        if key.is_empty() {
            return None;
        }
        Epic::ALL
            .into_iter()
            .find(|epic| epic.as_str() == key)
            .or_else(|| {
                EPIC_ALIASES
                    .iter()
                    .find(|(alias, _)| *alias == key)
                    .map(|(_, epic)| *epic)
            })
    }

    /// Lenient lookup that never fails; unknown values land in the default
    /// bucket.
    pub fn normalize(raw: &str) -> Epic {
        Epic::resolve(raw).unwrap_or(Epic::DEFAULT)
    }

    pub fn from_prefix(prefix: &str) -> Option<Epic> {
        Epic::ALL.into_iter().find(|epic| epic.prefix() == prefix)
    }

    pub fn valid_names() -> String {
        Epic::ALL
            .iter()
            .map(|epic| epic.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Epic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Epic {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Epic::resolve(input).ok_or_else(|| {
            format!(
                "Invalid epic '{}'. Valid epics: {}",
                input.trim(),
                Epic::valid_names()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_collapse_to_canonical_epics() {
        assert_eq!(Epic::normalize("data_sources"), Epic::Ingestion);
        assert_eq!(Epic::normalize("data-sources"), Epic::Ingestion);
        assert_eq!(Epic::normalize("llm_backlog"), Epic::Core);
        assert_eq!(Epic::normalize("Infra"), Epic::Infrastructure);
        assert_eq!(Epic::normalize("training"), Epic::Modeling);
        assert_eq!(Epic::normalize("social"), Epic::SocialMedia);
    }

    #[test]
    fn normalization_is_idempotent() {
        for epic in Epic::ALL {
            assert_eq!(Epic::normalize(epic.as_str()), epic);
            assert_eq!(Epic::normalize(Epic::normalize(epic.as_str()).as_str()), epic);
        }
    }

    #[test]
    fn unknown_epics_fall_back_to_adhoc() {
        assert_eq!(Epic::resolve("unknown"), None);
        assert_eq!(Epic::normalize("unknown"), Epic::Adhoc);
        assert_eq!(Epic::normalize(""), Epic::Adhoc);
        assert_eq!(Epic::normalize("marketing"), Epic::Adhoc);
    }

    #[test]
    fn parse_error_lists_valid_epics() {
        let err = "marketing".parse::<Epic>().expect_err("unknown epic");
        assert!(err.contains("Invalid epic 'marketing'"));
        assert!(err.contains("core, modeling, ingestion"));
    }

    #[test]
    fn prefixes_round_trip() {
        for epic in Epic::ALL {
            assert_eq!(Epic::from_prefix(epic.prefix()), Some(epic));
        }
        assert_eq!(Epic::SocialMedia.label(), "social-media");
    }
}
