use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Date,
    Event,
    Product,
    Document,
}

impl EntityType {
    pub const ALL: [EntityType; 7] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Date,
        EntityType::Event,
        EntityType::Product,
        EntityType::Document,
    ];

    /// Node label used by graph backends.
    pub fn as_label(&self) -> &'static str {
        match self {
            EntityType::Person => "Person",
            EntityType::Organization => "Organization",
            EntityType::Location => "Location",
            EntityType::Date => "Date",
            EntityType::Event => "Event",
            EntityType::Product => "Product",
            EntityType::Document => "DocumentRef",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_label() == label)
    }
}

/// Lower-cases and collapses whitespace so that "Paul  Martin" and
/// "paul martin" resolve to the same graph node.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub owner: String,
    pub entity_type: EntityType,
    pub name: String,
    pub properties: serde_json::Value,
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Entity {
    pub fn new(owner: impl Into<String>, entity_type: EntityType, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            entity_type,
            name: name.into(),
            properties: serde_json::Value::Object(serde_json::Map::new()),
            confidence: 1.0,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Dedup key within one owner's graph.
    pub fn key(&self) -> (EntityType, String) {
        (self.entity_type, normalize_name(&self.name))
    }

    /// Folds a later observation of the same entity into this one.
    ///
    /// Properties are unioned (a later value replaces an earlier one under the
    /// same key, no key is ever dropped), confidence keeps the maximum and the
    /// observation window widens. Identity (`id`, `name`) never changes.
    pub fn absorb(&mut self, other: &Entity) {
        let incoming = other.properties.as_object().cloned().unwrap_or_default();
        if !self.properties.is_object() {
            self.properties = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(existing) = self.properties.as_object_mut() {
            for (key, value) in incoming {
                existing.insert(key, value);
            }
        }
        if other.confidence > self.confidence {
            self.confidence = other.confidence;
        }
        if other.first_seen < self.first_seen {
            self.first_seen = other.first_seen;
        }
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Mentions,
    DependsOn,
    FixedBy,
    CausedBy,
    ParticipatedIn,
    Discussed,
    WorksFor,
    LocatedIn,
    BasedIn,
    OccurredOn,
    DevelopedBy,
    PartOf,
    RelatedTo,
}

impl RelationType {
    pub const ALL: [RelationType; 13] = [
        RelationType::Mentions,
        RelationType::DependsOn,
        RelationType::FixedBy,
        RelationType::CausedBy,
        RelationType::ParticipatedIn,
        RelationType::Discussed,
        RelationType::WorksFor,
        RelationType::LocatedIn,
        RelationType::BasedIn,
        RelationType::OccurredOn,
        RelationType::DevelopedBy,
        RelationType::PartOf,
        RelationType::RelatedTo,
    ];

    pub fn as_label(&self) -> &'static str {
        match self {
            RelationType::Mentions => "MENTIONS",
            RelationType::DependsOn => "DEPENDS_ON",
            RelationType::FixedBy => "FIXED_BY",
            RelationType::CausedBy => "CAUSED_BY",
            RelationType::ParticipatedIn => "PARTICIPATED_IN",
            RelationType::Discussed => "DISCUSSED",
            RelationType::WorksFor => "WORKS_FOR",
            RelationType::LocatedIn => "LOCATED_IN",
            RelationType::BasedIn => "BASED_IN",
            RelationType::OccurredOn => "OCCURRED_ON",
            RelationType::DevelopedBy => "DEVELOPED_BY",
            RelationType::PartOf => "PART_OF",
            RelationType::RelatedTo => "RELATED_TO",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let upper = label.trim().to_uppercase();
        Self::ALL.into_iter().find(|t| t.as_label() == upper)
    }
}

/// Directed, typed edge. Created once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub owner: String,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation_type: RelationType,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(
        owner: impl Into<String>,
        source_id: Uuid,
        target_id: Uuid,
        relation_type: RelationType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            source_id,
            target_id,
            relation_type,
            confidence: 1.0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(owner: impl Into<String>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            text: text.into(),
            embedding,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }

    /// Shallow merge of `patch` into the metadata object. A `null` value
    /// removes the key. Text, embedding and timestamps stay untouched.
    pub fn patch_metadata(&mut self, patch: &serde_json::Value) {
        let Some(patch) = patch.as_object() else {
            return;
        };
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(meta) = self.metadata.as_object_mut() {
            for (key, value) in patch {
                if value.is_null() {
                    meta.remove(key);
                } else {
                    meta.insert(key.clone(), value.clone());
                }
            }
        }
    }
}
