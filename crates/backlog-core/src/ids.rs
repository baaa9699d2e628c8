use crate::epic::Epic;
use regex::Regex;
use std::collections::BTreeMap;
use thiserror::Error;

pub const TEMP_ID_PREFIX: &str = "TEMP-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no ids left for prefix {prefix}")]
pub struct IdExhausted {
    pub prefix: String,
}

fn successor(prefix: &str, current: u32) -> Result<u32, IdExhausted> {
    current.checked_add(1).ok_or_else(|| IdExhausted {
        prefix: prefix.to_string(),
    })
}

/// True when a record carries no usable id yet.
pub fn needs_id(id: Option<&str>) -> bool {
    match id.map(str::trim) {
        None => true,
        Some(id) => id.is_empty() || id.starts_with(TEMP_ID_PREFIX),
    }
}

/// Numeric suffix of `id` when it belongs to `prefix` (`UI-003` -> 3).
pub fn sequence_number(id: &str, prefix: &str) -> Option<u32> {
    let rest = id.strip_prefix(prefix)?.strip_prefix('-')?;
    let digits = rest.split('-').next()?;
    digits.trim().parse::<u32>().ok()
}

pub fn format_id(prefix: &str, number: u32) -> String {
    format!("{prefix}-{number:03}")
}

/// Next identifier for `prefix` given a snapshot of existing ids: highest
/// suffix plus one. Gaps are never reused.
pub fn next_id<'a, I>(existing_ids: I, prefix: &str) -> Result<String, IdExhausted>
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing_ids
        .into_iter()
        .filter_map(|id| sequence_number(id, prefix))
        .max()
        .unwrap_or(0);
    Ok(format_id(prefix, successor(prefix, max)?))
}

/// Whether `id` has the `PREFIX-NNN` shape for one of the known prefixes.
pub fn is_well_formed(id: &str) -> bool {
    let pattern = Regex::new(r"^(LLM|INF|ING|MOD|UI|SOC|ADH|QLT|EXP)-\d{3,}$").expect("valid regex");
    pattern.is_match(id)
}

/// Per-prefix counters seeded once from a store snapshot. Allocating bumps
/// the counter, so ids handed out in one batch never collide with each other
/// or with the snapshot.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    counters: BTreeMap<&'static str, u32>,
}

impl IdAllocator {
    pub fn from_ids<'a, I>(existing_ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut counters = BTreeMap::new();
        for id in existing_ids {
            for epic in Epic::ALL {
                let prefix = epic.prefix();
                if let Some(number) = sequence_number(id, prefix) {
                    let entry = counters.entry(prefix).or_insert(0);
                    if number > *entry {
                        *entry = number;
                    }
                }
            }
        }
        Self { counters }
    }

    pub fn peek(&self, epic: Epic) -> Result<String, IdExhausted> {
        let current = self.counters.get(epic.prefix()).copied().unwrap_or(0);
        Ok(format_id(epic.prefix(), successor(epic.prefix(), current)?))
    }

    /// Hand out the next id for `epic`. The counter is left untouched when
    /// the sequence is used up.
    pub fn allocate(&mut self, epic: Epic) -> Result<String, IdExhausted> {
        let counter = self.counters.entry(epic.prefix()).or_insert(0);
        *counter = successor(epic.prefix(), *counter)?;
        Ok(format_id(epic.prefix(), *counter))
    }

    /// Allocate for a raw epic string; unknown epics use the default prefix.
    pub fn allocate_for(&mut self, raw_epic: &str) -> Result<String, IdExhausted> {
        self.allocate(Epic::normalize(raw_epic))
    }

    /// Record an id that was taken outside the allocator so later
    /// allocations stay above it.
    pub fn observe(&mut self, id: &str) {
        for epic in Epic::ALL {
            if let Some(number) = sequence_number(id, epic.prefix()) {
                let entry = self.counters.entry(epic.prefix()).or_insert(0);
                if number > *entry {
                    *entry = number;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn next_id_takes_max_plus_one_not_first_gap() {
        let existing = ["UI-001", "UI-003", "ING-010"];
        assert_eq!(next_id(existing, "UI").as_deref(), Ok("UI-004"));
        assert_eq!(next_id(existing, "ING").as_deref(), Ok("ING-011"));
        assert_eq!(next_id(existing, "SOC").as_deref(), Ok("SOC-001"));
    }

    #[test]
    fn suffix_parsing_ignores_noise() {
        assert_eq!(sequence_number("UI-003", "UI"), Some(3));
        assert_eq!(sequence_number("UI-012-extra", "UI"), Some(12));
        assert_eq!(sequence_number("UIX-003", "UI"), None);
        assert_eq!(sequence_number("UI-abc", "UI"), None);
        assert_eq!(sequence_number("INF-1000", "INF"), Some(1000));
    }

    #[test]
    fn batch_allocation_is_pairwise_distinct() {
        let existing = ["ING-002", "LLM-005", "ADH-001"];
        let mut allocator = IdAllocator::from_ids(existing);
        let epics = [
            "ingestion",
            "data_sources",
            "core",
            "ingestion",
            "nonsense",
            "ui",
        ];
        let ids: Vec<String> = epics
            .iter()
            .map(|epic| allocator.allocate_for(epic).expect("allocate"))
            .collect();
        assert_eq!(
            ids,
            vec!["ING-003", "ING-004", "LLM-006", "ING-005", "ADH-002", "UI-001"]
        );
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|id| is_well_formed(id)));
    }

    #[test]
    fn observe_keeps_allocations_above_external_ids() {
        let mut allocator = IdAllocator::from_ids(["MOD-001"]);
        allocator.observe("MOD-009");
        assert_eq!(allocator.peek(Epic::Modeling).as_deref(), Ok("MOD-010"));
        assert_eq!(allocator.allocate(Epic::Modeling).as_deref(), Ok("MOD-010"));
    }

    #[test]
    fn exhausted_sequence_is_an_error_not_a_wrap() {
        let top = format!("UI-{}", u32::MAX);
        let exhausted = IdExhausted {
            prefix: "UI".to_string(),
        };
        assert_eq!(next_id([top.as_str()], "UI"), Err(exhausted.clone()));

        let mut allocator = IdAllocator::from_ids([top.as_str(), "ING-004"]);
        assert_eq!(allocator.peek(Epic::Ui), Err(exhausted.clone()));
        assert_eq!(allocator.allocate(Epic::Ui), Err(exhausted.clone()));
        assert_eq!(allocator.allocate(Epic::Ui), Err(exhausted));
        assert_eq!(allocator.allocate(Epic::Ingestion).as_deref(), Ok("ING-005"));
    }

    #[test]
    fn placeholder_ids_need_replacement() {
        assert!(needs_id(None));
        assert!(needs_id(Some("  ")));
        assert!(needs_id(Some("TEMP-101500-New-Feature")));
        assert!(!needs_id(Some("UI-004")));
    }

    #[test]
    fn well_formed_ids() {
        assert!(is_well_formed("QLT-004"));
        assert!(!is_well_formed("QA-004"));
        assert!(!is_well_formed("UI-04"));
        assert!(!is_well_formed("GEN-001"));
        assert!(is_well_formed("INF-1000"));
    }
}
