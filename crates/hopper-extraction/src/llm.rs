use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use hopper_core::entity::{EntityType, RelationType};
use hopper_core::error::{HopperError, Result};
use hopper_core::extraction::{EntityExtractor, ExtractedEntity, ExtractedRelation, Extraction};
use hopper_core::generation::{GenerationRequest, TextGenerator};

use crate::heuristic::HeuristicEntityExtractor;

const MAX_TOKENS: u32 = 1024;

/// Generator-backed extraction. Falls back to the regex extractor when the
/// generator is unreachable or answers with something unparseable.
pub struct LlmEntityExtractor {
    generator: Arc<dyn TextGenerator>,
    fallback: HeuristicEntityExtractor,
}

// ── Intermediate JSON schema for generator output ──────────────────────────

#[derive(Debug, Deserialize)]
struct LlmExtractionOutput {
    #[serde(default)]
    entities: Vec<LlmEntity>,
    #[serde(default, alias = "relationships")]
    relations: Vec<LlmRelation>,
}

#[derive(Debug, Deserialize)]
struct LlmEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct LlmRelation {
    source: String,
    target: String,
    #[serde(rename = "type")]
    relation_type: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

const SYSTEM_PROMPT: &str = r#"You extract named entities and the relations between them from a short personal document.

Return ONLY valid JSON matching this schema:

{
  "entities": [
    {"name": "Entity Name", "type": "person | organization | location | date | event | product | document", "confidence": 0.0 to 1.0}
  ],
  "relations": [
    {"source": "Entity Name", "target": "Entity Name", "type": "works_for | located_in | based_in | occurred_on | developed_by | part_of | depends_on | fixed_by | caused_by | participated_in | discussed | related_to", "confidence": 0.0 to 1.0}
  ]
}

Names used in relations MUST match an entity name. If nothing can be extracted return {"entities": [], "relations": []}."#;

impl LlmEntityExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            fallback: HeuristicEntityExtractor::default(),
        }
    }

    fn parse_entity_type(s: &str) -> Option<EntityType> {
        match s.trim().to_lowercase().as_str() {
            "person" | "people" => Some(EntityType::Person),
            "organization" | "organisation" | "org" | "company" => Some(EntityType::Organization),
            "location" | "place" | "city" | "country" => Some(EntityType::Location),
            "date" | "time" => Some(EntityType::Date),
            "event" | "meeting" | "incident" => Some(EntityType::Event),
            "product" | "technology" | "concept" | "tool" => Some(EntityType::Product),
            "document" | "file" | "report" => Some(EntityType::Document),
            other => {
                tracing::warn!(entity_type = %other, "Unknown entity type, skipping");
                None
            }
        }
    }

    fn parse_relation_type(s: &str) -> RelationType {
        if let Some(known) = RelationType::from_label(s) {
            return known;
        }
        match s.trim().to_lowercase().as_str() {
            "employee_of" | "employed_by" => RelationType::WorksFor,
            "lives_in" | "located_at" => RelationType::LocatedIn,
            "happened_on" | "born_on" => RelationType::OccurredOn,
            "member_of" => RelationType::PartOf,
            _ => {
                tracing::warn!(relation_type = %s, "Unknown relation type, defaulting to RelatedTo");
                RelationType::RelatedTo
            }
        }
    }

    fn parse_output(raw: &str) -> Result<Extraction> {
        let cleaned = raw.trim();
        let cleaned = if cleaned.starts_with("```") || !cleaned.starts_with('{') {
            let start = cleaned.find('{').unwrap_or(0);
            let end = cleaned.rfind('}').map(|i| i + 1).unwrap_or(cleaned.len());
            &cleaned[start..end.max(start)]
        } else {
            cleaned
        };

        let output: LlmExtractionOutput = serde_json::from_str(cleaned)
            .map_err(|e| HopperError::Extraction(format!("Failed to parse extraction JSON: {e}")))?;

        let mut names: HashMap<String, String> = HashMap::new();
        let mut entities = Vec::with_capacity(output.entities.len());
        for entity in output.entities {
            let Some(entity_type) = Self::parse_entity_type(&entity.entity_type) else {
                continue;
            };
            if entity.name.trim().is_empty() {
                continue;
            }
            names.insert(entity.name.to_lowercase(), entity.name.clone());
            entities.push(ExtractedEntity {
                entity_type,
                surface: entity.name,
                confidence: entity.confidence.clamp(0.0, 1.0),
                start: None,
            });
        }

        let mut relations = Vec::with_capacity(output.relations.len());
        for relation in output.relations {
            let source = names.get(&relation.source.to_lowercase());
            let target = names.get(&relation.target.to_lowercase());
            match (source, target) {
                (Some(source), Some(target)) => relations.push(ExtractedRelation {
                    source: source.clone(),
                    target: target.clone(),
                    relation_type: Self::parse_relation_type(&relation.relation_type),
                    confidence: relation.confidence.clamp(0.0, 1.0),
                }),
                _ => tracing::warn!(
                    source = %relation.source,
                    target = %relation.target,
                    "Skipping relation: referenced entity not found"
                ),
            }
        }

        Ok(Extraction { entities, relations })
    }
}

#[async_trait]
impl EntityExtractor for LlmEntityExtractor {
    fn name(&self) -> &str {
        "llm"
    }

    async fn extract(&self, text: &str) -> Result<Extraction> {
        let request = GenerationRequest::new(format!("Document:\n{text}"))
            .system(SYSTEM_PROMPT)
            .max_tokens(MAX_TOKENS)
            .temperature(0.0);

        let parsed = match self.generator.generate(&request).await {
            Ok(raw) => Self::parse_output(&raw),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(extraction) => {
                tracing::info!(
                    generator = %self.generator.name(),
                    entities = extraction.entities.len(),
                    relations = extraction.relations.len(),
                    "Extraction complete"
                );
                Ok(extraction)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Generator extraction failed, using heuristic extractor");
                self.fallback.extract(text).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(std::result::Result<&'static str, ()>);

    #[async_trait]
    impl TextGenerator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            self.0
                .map(str::to_string)
                .map_err(|_| HopperError::Generation("offline".into()))
        }
    }

    #[test]
    fn parses_fenced_output() {
        let raw = r#"```json
{"entities": [
    {"name": "Paul", "type": "person", "confidence": 0.9},
    {"name": "Acme", "type": "company"}
 ],
 "relations": [
    {"source": "paul", "target": "Acme", "type": "works_for", "confidence": 0.7},
    {"source": "Paul", "target": "Nobody", "type": "related_to"}
 ]}
```"#;
        let extraction = LlmEntityExtractor::parse_output(raw).unwrap();

        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(extraction.entities[1].entity_type, EntityType::Organization);
        assert_eq!(extraction.entities[1].confidence, 0.8);
        assert_eq!(extraction.relations.len(), 1);
        assert_eq!(extraction.relations[0].source, "Paul");
        assert_eq!(extraction.relations[0].relation_type, RelationType::WorksFor);
    }

    #[test]
    fn unknown_relation_defaults_to_related() {
        assert_eq!(
            LlmEntityExtractor::parse_relation_type("likes"),
            RelationType::RelatedTo
        );
        assert_eq!(
            LlmEntityExtractor::parse_relation_type("LOCATED_IN"),
            RelationType::LocatedIn
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(LlmEntityExtractor::parse_output("no json here").is_err());
    }

    #[tokio::test]
    async fn falls_back_when_generator_fails() {
        let extractor = LlmEntityExtractor::new(Arc::new(Fixed(Err(()))));
        let extraction = extractor.extract("Réunion à Paris avec Google").await.unwrap();
        assert!(extraction
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Location && e.surface == "Paris"));
    }

    #[tokio::test]
    async fn falls_back_on_garbage_output() {
        let extractor = LlmEntityExtractor::new(Arc::new(Fixed(Ok("sorry, I cannot"))));
        let extraction = extractor.extract("Docker tourne sur Kubernetes").await.unwrap();
        assert_eq!(extraction.entities.len(), 2);
    }
}
