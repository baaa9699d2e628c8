use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod cleanup;
pub mod epic;
pub mod extract;
pub mod groom;
pub mod ids;
pub mod layout;
pub mod priority;
pub mod render;
pub mod report;
pub mod validate;

pub use epic::Epic;

/// Sentinel priority for stories nobody has ranked yet.
pub const UNASSIGNED_PRIORITY: u32 = 99;
pub const TBD_ESTIMATE: &str = "TBD";
pub const DEFAULT_AUTHOR: &str = "story-ingestor";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BacklogDocument {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub backlog: Vec<Story>,
}

impl BacklogDocument {
    pub fn find(&self, id: &str) -> Option<&Story> {
        self.backlog.iter().find(|story| story.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Story> {
        self.backlog.iter_mut().find(|story| story.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.backlog.iter().map(|story| story.id.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_backlog_stories: Option<usize>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Field names of a story record, in the order they are declared.
const RECORD_FIELDS: [&str; 13] = [
    "id",
    "title",
    "branch_name",
    "file_path",
    "status",
    "priority",
    "estimate",
    "epic",
    "dependencies",
    "labels",
    "owner",
    "created",
    "last_updated",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(remote = "Self")]
pub struct Story {
    #[serde(deserialize_with = "deserialize_text")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub title: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_text"
    )]
    pub branch_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_text"
    )]
    pub file_path: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(
        default = "unassigned_priority",
        deserialize_with = "deserialize_priority"
    )]
    pub priority: u32,
    #[serde(default = "tbd_estimate", deserialize_with = "deserialize_text")]
    pub estimate: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub epic: String,
    #[serde(default, deserialize_with = "deserialize_text_list")]
    pub dependencies: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_text_list")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub owner: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_text"
    )]
    pub created: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_opt_text"
    )]
    pub last_updated: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
    #[serde(skip)]
    stored: StoredValues,
}

/// Stored values that decoding had to reinterpret: a named priority, a
/// numeric estimate, an explicit null, a field missing from the record.
/// Each one is written back verbatim while its field still holds the value
/// it was decoded to.
#[derive(Debug, Clone, Default)]
struct StoredValues(BTreeMap<&'static str, StoredValue>);

/// Bookkeeping only; two records with the same fields are equal.
impl PartialEq for StoredValues {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    original: Option<Value>,
    decoded: Option<Value>,
}

impl StoredValues {
    fn diff(original: &Map<String, Value>, decoded: &Map<String, Value>) -> Self {
        let mut stored = BTreeMap::new();
        for field in RECORD_FIELDS {
            let before = original.get(field);
            let after = decoded.get(field);
            if before != after {
                stored.insert(
                    field,
                    StoredValue {
                        original: before.cloned(),
                        decoded: after.cloned(),
                    },
                );
            }
        }
        Self(stored)
    }

    fn restore(&self, fields: &mut Map<String, Value>) {
        for (field, stored) in &self.0 {
            if fields.get(*field) != stored.decoded.as_ref() {
                continue;
            }
            match &stored.original {
                Some(value) => {
                    fields.insert(field.to_string(), value.clone());
                }
                None => {
                    fields.remove(*field);
                }
            }
        }
    }
}

impl Serialize for Story {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = self.decoded_fields().map_err(serde::ser::Error::custom)?;
        self.stored.restore(&mut fields);
        fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Story {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let original = Map::<String, Value>::deserialize(deserializer)?;
        let mut story = Story::deserialize(Value::Object(original.clone()))
            .map_err(serde::de::Error::custom)?;
        let decoded = story
            .decoded_fields()
            .map_err(serde::de::Error::custom)?;
        story.stored = StoredValues::diff(&original, &decoded);
        Ok(story)
    }
}

impl Story {
    pub fn new(id: impl Into<String>, title: impl Into<String>, epic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            branch_name: None,
            file_path: None,
            status: Status::default(),
            priority: UNASSIGNED_PRIORITY,
            estimate: TBD_ESTIMATE.to_string(),
            epic: epic.into(),
            dependencies: Vec::new(),
            labels: Vec::new(),
            owner: String::new(),
            created: None,
            last_updated: None,
            extra: BTreeMap::new(),
            stored: StoredValues::default(),
        }
    }

    /// The record's fields as they currently decode, before any stored
    /// legacy value is put back.
    fn decoded_fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match Story::serialize(self, serde_json::value::Serializer)? {
            Value::Object(fields) => Ok(fields),
            _ => Err(serde::ser::Error::custom("story is not a JSON object")),
        }
    }

    pub fn is_prioritized(&self) -> bool {
        self.priority != UNASSIGNED_PRIORITY
    }

    pub fn has_estimate(&self) -> bool {
        let estimate = self.estimate.trim();
        !estimate.is_empty() && estimate != TBD_ESTIMATE
    }

    pub fn author(&self) -> Option<&str> {
        self.extra.get("author").and_then(|value| value.as_str())
    }

    /// Stories with nothing blocking them: still in the backlog and either
    /// free of dependencies or only depending on done markers.
    pub fn is_ready_to_start(&self) -> bool {
        self.status == Status::Backlog
            && self
                .dependencies
                .iter()
                .all(|dep| matches!(dep.as_str(), "COMPLETED" | "ACCEPTED"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Draft,
    Backlog,
    Ready,
    Active,
    Blocked,
    Completed,
    Accepted,
    /// Legacy or hand-edited values, kept verbatim.
    Other(String),
}

impl Default for Status {
    fn default() -> Self {
        Self::Backlog
    }
}

impl Status {
    pub const KNOWN: [Status; 7] = [
        Status::Draft,
        Status::Backlog,
        Status::Ready,
        Status::Active,
        Status::Blocked,
        Status::Completed,
        Status::Accepted,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Status::Draft => "draft",
            Status::Backlog => "backlog",
            Status::Ready => "ready",
            Status::Active => "active",
            Status::Blocked => "blocked",
            Status::Completed => "completed",
            Status::Accepted => "accepted",
            Status::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Status::Completed | Status::Accepted)
    }

    /// Open statuses that still take part in grooming.
    pub fn is_active_work(&self) -> bool {
        matches!(
            self,
            Status::Draft | Status::Backlog | Status::Ready | Status::Active | Status::Blocked
        )
    }

    /// Exact decoding used for stored values, so unknown spellings are kept
    /// untouched on save.
    pub fn from_raw(raw: &str) -> Self {
        Status::KNOWN
            .iter()
            .find(|status| status.as_str() == raw)
            .cloned()
            .unwrap_or_else(|| Status::Other(raw.to_string()))
    }

    /// Lenient decoding for user input and frontmatter.
    pub fn coerce(raw: &str) -> Self {
        raw.parse().unwrap_or_else(|_| Status::Other(raw.trim().to_string()))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "draft" => Ok(Status::Draft),
            "backlog" => Ok(Status::Backlog),
            "ready" => Ok(Status::Ready),
            "active" | "in-progress" | "in_progress" => Ok(Status::Active),
            "blocked" => Ok(Status::Blocked),
            "completed" | "done" => Ok(Status::Completed),
            "accepted" => Ok(Status::Accepted),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|raw| Status::from_raw(&raw)).unwrap_or_default())
    }
}

/// A candidate record as it arrives from frontmatter, a bulk import file or
/// the interactive prompt, before validation and defaulting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoryDraft {
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub epic: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_priority")]
    pub priority: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub estimate: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub owner: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text_list")]
    pub dependencies: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_text_list")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub branch_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub file_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub created: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub last_updated: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub user_story: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text_list")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_opt_text")]
    pub description: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StoryDraft {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    pub fn epic(&self) -> &str {
        self.epic.as_deref().unwrap_or("")
    }

    /// Temporary placeholders (`TEMP-...`) and missing ids both need a
    /// freshly allocated identifier.
    pub fn needs_id(&self) -> bool {
        ids::needs_id(self.id.as_deref())
    }

    /// Turn an admitted draft into a store record, filling every field the
    /// draft left open. `id` must already be allocated.
    pub fn into_story(self, id: String, today: &str, default_author: &str) -> Story {
        let title = self.title.unwrap_or_default().trim().to_string();
        let mut extra = self.extra;
        extra.insert(
            "author".to_string(),
            Value::String(self.author.unwrap_or_else(|| default_author.to_string())),
        );
        if let Some(user_story) = self.user_story.filter(|text| !text.trim().is_empty()) {
            extra.insert("user_story".to_string(), Value::String(user_story));
        }
        if !self.acceptance_criteria.is_empty() {
            extra.insert(
                "acceptance_criteria".to_string(),
                Value::Array(
                    self.acceptance_criteria
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                ),
            );
        }
        if let Some(description) = self.description.filter(|text| !text.trim().is_empty()) {
            extra.insert("description".to_string(), Value::String(description));
        }

        let branch_name = self
            .branch_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| extract::branch_name(&id, &title));

        Story {
            branch_name: Some(branch_name),
            file_path: self.file_path,
            status: self
                .status
                .as_deref()
                .map(Status::coerce)
                .unwrap_or_default(),
            priority: self.priority.unwrap_or(UNASSIGNED_PRIORITY),
            estimate: self
                .estimate
                .filter(|estimate| !estimate.trim().is_empty())
                .unwrap_or_else(|| TBD_ESTIMATE.to_string()),
            epic: self.epic.unwrap_or_default().trim().to_lowercase(),
            dependencies: self.dependencies,
            labels: self.labels,
            owner: self.owner.unwrap_or_default(),
            created: Some(self.created.unwrap_or_else(|| today.to_string())),
            last_updated: Some(self.last_updated.unwrap_or_else(|| today.to_string())),
            extra,
            id,
            title,
            stored: StoredValues::default(),
        }
    }
}

/// Map a raw priority value to a numeric rank. Named levels come from the
/// interactive prompt vocabulary; anything unusable becomes unassigned.
pub fn priority_from_value(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u32))
            .unwrap_or(UNASSIGNED_PRIORITY),
        Value::String(s) => priority_from_str(s).unwrap_or(UNASSIGNED_PRIORITY),
        _ => UNASSIGNED_PRIORITY,
    }
}

pub fn priority_from_str(input: &str) -> Option<u32> {
    let normalized = input.trim().to_lowercase();
    if let Ok(parsed) = normalized.parse::<u32>() {
        return Some(parsed);
    }
    match normalized.as_str() {
        "critical" => Some(5),
        "high" => Some(10),
        "medium" => Some(15),
        "low" => Some(20),
        _ => None,
    }
}

pub fn today_string() -> String {
    chrono::Local::now().date_naive().format(DATE_FORMAT).to_string()
}

fn unassigned_priority() -> u32 {
    UNASSIGNED_PRIORITY
}

fn tbd_estimate() -> String {
    TBD_ESTIMATE.to_string()
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Deserialize a scalar (string, number or bool) into a String; null becomes
/// the empty string.
fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(String::new()),
        other => value_to_text(other)
            .ok_or_else(|| serde::de::Error::custom("expected string or number")),
    }
}

fn deserialize_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        other => value_to_text(other)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected string or number")),
    }
}

fn deserialize_text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.into_iter().filter_map(value_to_text).collect()),
        Value::String(s) => Ok(s
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()),
        _ => Err(serde::de::Error::custom("expected a list")),
    }
}

fn deserialize_priority<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    Ok(priority_from_value(&val))
}

fn deserialize_opt_priority<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        other => Ok(Some(priority_from_value(&other))),
    }
}
