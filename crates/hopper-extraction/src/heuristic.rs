use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use hopper_core::entity::{EntityType, RelationType};
use hopper_core::error::Result;
use hopper_core::extraction::{EntityExtractor, ExtractedEntity, ExtractedRelation, Extraction};

const DATE_CONFIDENCE: f64 = 0.90;
const PERSON_CONFIDENCE: f64 = 0.75;
const LOCATION_CONFIDENCE: f64 = 0.95;
const ORGANIZATION_CONFIDENCE: f64 = 0.85;
const PRODUCT_CONFIDENCE: f64 = 0.80;
const CAPITALISED_CONFIDENCE: f64 = 0.70;

/// Entities whose first occurrences lie within this many bytes are related.
const RELATION_WINDOW: usize = 100;
const RELATION_DAMPING: f64 = 0.8;

const LOCATIONS: &[&str] = &[
    "paris", "londres", "london", "berlin", "madrid", "rome", "moscou", "tokyo", "pékin",
    "new york", "washington", "los angeles", "san francisco", "lyon", "marseille", "france",
    "allemagne", "espagne", "italie", "royaume-uni", "angleterre", "états-unis", "usa", "chine",
    "japon", "russie", "brésil", "canada", "europe", "asie", "afrique", "amérique", "océanie",
];

const ORGANIZATIONS: &[&str] = &[
    "google", "microsoft", "apple", "amazon", "meta", "facebook", "openai", "anthropic",
    "netflix", "tesla", "spacex", "université", "école", "institut", "laboratoire", "cnrs",
];

const PRODUCTS: &[&str] = &[
    "python", "javascript", "java", "rust", "asyncio", "django", "flask", "fastapi", "react",
    "vue", "machine learning", "deep learning", "intelligence artificielle", "blockchain",
    "bitcoin", "ethereum", "docker", "kubernetes", "aws", "azure", "gcp", "neo4j", "tokio",
];

/// One alternation per vocabulary, longest phrases first so "new york"
/// wins over any shorter prefix.
fn vocabulary_regex(words: &[&str]) -> Regex {
    let mut sorted: Vec<&str> = words.to_vec();
    sorted.sort_by_key(|w| std::cmp::Reverse(w.len()));
    let alternation: Vec<String> = sorted.iter().map(|w| regex::escape(w)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation.join("|"))).unwrap()
}

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| vocabulary_regex(LOCATIONS));
static ORGANIZATION_RE: LazyLock<Regex> = LazyLock::new(|| vocabulary_regex(ORGANIZATIONS));
static PRODUCT_RE: LazyLock<Regex> = LazyLock::new(|| vocabulary_regex(PRODUCTS));

static DATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
        r"\b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b",
        r"(?i)\b\d{1,2}\s+(?:janvier|février|mars|avril|mai|juin|juillet|août|septembre|octobre|novembre|décembre)\s+\d{4}\b",
        r"(?i)\b(?:lundi|mardi|mercredi|jeudi|vendredi|samedi|dimanche)\b",
        r"(?i)\b(?:hier|aujourd'hui|demain)\b",
        r"\b(?:19|20)\d{2}\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static PERSON_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(?:[Mm]onsieur|[Mm]adame|[Mm]ademoiselle|M\.|Mme|Dr|[Dd]octeur|[Pp]rofesseur|Pr)\s+\p{Lu}\p{Ll}+(?:\s+\p{Lu}\p{Ll}+)*",
        r"\b\p{Lu}\p{Ll}+\s+\p{Lu}\p{Ll}+\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static CAPITALISED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\p{Lu}\p{Ll}{2,}\b").unwrap());

/// Regex and vocabulary based extractor. Needs no model and never fails.
pub struct HeuristicEntityExtractor {
    min_confidence: f64,
}

impl Default for HeuristicEntityExtractor {
    fn default() -> Self {
        Self::new(0.70)
    }
}

impl HeuristicEntityExtractor {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    pub fn extract_entities(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut found = Vec::new();

        for re in DATE_RES.iter() {
            collect(re, text, EntityType::Date, DATE_CONFIDENCE, &mut found);
        }
        collect(&LOCATION_RE, text, EntityType::Location, LOCATION_CONFIDENCE, &mut found);
        collect(&ORGANIZATION_RE, text, EntityType::Organization, ORGANIZATION_CONFIDENCE, &mut found);
        collect(&PRODUCT_RE, text, EntityType::Product, PRODUCT_CONFIDENCE, &mut found);

        for re in PERSON_RES.iter() {
            for m in re.find_iter(text) {
                if is_known_vocabulary(m.as_str()) {
                    continue;
                }
                found.push(ExtractedEntity {
                    entity_type: EntityType::Person,
                    surface: m.as_str().to_string(),
                    confidence: PERSON_CONFIDENCE,
                    start: Some(m.start()),
                });
            }
        }

        capitalised_fallback(text, &mut found);

        let mut entities = dedup(suppress_nested(found));
        entities.retain(|e| e.confidence >= self.min_confidence);
        entities.sort_by_key(|e| e.start.unwrap_or(usize::MAX));
        entities
    }

    /// Pairs of entities mentioned close together, typed by their entity kinds.
    pub fn infer_relations(&self, entities: &[ExtractedEntity]) -> Vec<ExtractedRelation> {
        let mut relations = Vec::new();
        for (i, a) in entities.iter().enumerate() {
            for b in &entities[i + 1..] {
                let (Some(sa), Some(sb)) = (a.start, b.start) else {
                    continue;
                };
                if sa.abs_diff(sb) >= RELATION_WINDOW {
                    continue;
                }
                let Some((relation_type, forward)) = relation_for(a.entity_type, b.entity_type)
                else {
                    continue;
                };
                let (source, target) = if forward { (a, b) } else { (b, a) };
                relations.push(ExtractedRelation {
                    source: source.surface.clone(),
                    target: target.surface.clone(),
                    relation_type,
                    confidence: a.confidence.min(b.confidence) * RELATION_DAMPING,
                });
            }
        }
        relations
    }
}

fn collect(
    re: &Regex,
    text: &str,
    entity_type: EntityType,
    confidence: f64,
    out: &mut Vec<ExtractedEntity>,
) {
    for m in re.find_iter(text) {
        out.push(ExtractedEntity {
            entity_type,
            surface: m.as_str().to_string(),
            confidence,
            start: Some(m.start()),
        });
    }
}

/// Lone capitalised words inside a sentence that no other rule claimed are
/// taken as names.
fn capitalised_fallback(text: &str, found: &mut Vec<ExtractedEntity>) {
    let claimed: Vec<(usize, usize)> = found
        .iter()
        .filter_map(|e| e.start.map(|s| (s, s + e.surface.len())))
        .collect();

    for m in CAPITALISED_RE.find_iter(text) {
        let overlaps = claimed
            .iter()
            .any(|&(s, t)| m.start() < t && s < m.end());
        if overlaps || starts_sentence(text, m.start()) || is_known_vocabulary(m.as_str()) {
            continue;
        }
        found.push(ExtractedEntity {
            entity_type: EntityType::Person,
            surface: m.as_str().to_string(),
            confidence: CAPITALISED_CONFIDENCE,
            start: Some(m.start()),
        });
    }
}

fn starts_sentence(text: &str, at: usize) -> bool {
    match text[..at].trim_end_matches([' ', '\t']).chars().last() {
        None => true,
        Some(c) => matches!(c, '.' | '!' | '?' | ':' | '\n' | '"' | '«'),
    }
}

fn is_known_vocabulary(candidate: &str) -> bool {
    LOCATION_RE.is_match(candidate)
        || ORGANIZATION_RE.is_match(candidate)
        || PRODUCT_RE.is_match(candidate)
}

/// Drops a match that sits strictly inside a longer match of the same type,
/// e.g. the bare year of "25 octobre 2025".
fn suppress_nested(found: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let span = |e: &ExtractedEntity| {
        let start = e.start.unwrap_or(0);
        (start, start + e.surface.len())
    };
    found
        .iter()
        .filter(|e| {
            let (s, t) = span(*e);
            !found.iter().any(|o| {
                let (os, ot) = span(o);
                o.entity_type == e.entity_type && os <= s && t <= ot && (ot - os) > (t - s)
            })
        })
        .cloned()
        .collect()
}

/// One entity per (lower-cased surface, type), keeping the most confident
/// and, among equals, the earliest occurrence.
fn dedup(found: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let mut best: HashMap<(String, EntityType), ExtractedEntity> = HashMap::new();
    for entity in found {
        let key = (entity.surface.to_lowercase(), entity.entity_type);
        match best.get(&key) {
            Some(existing)
                if existing.confidence > entity.confidence
                    || (existing.confidence == entity.confidence
                        && existing.start <= entity.start) => {}
            _ => {
                best.insert(key, entity);
            }
        }
    }
    best.into_values().collect()
}

/// Relation type for a pair of entity kinds. The flag is true when the
/// first kind is the source of the edge.
fn relation_for(a: EntityType, b: EntityType) -> Option<(RelationType, bool)> {
    use EntityType::*;
    let directed = |x: EntityType, y: EntityType| -> Option<RelationType> {
        match (x, y) {
            (Person, Location) => Some(RelationType::LocatedIn),
            (Person, Organization) => Some(RelationType::WorksFor),
            (Organization, Location) => Some(RelationType::BasedIn),
            (Person, Date) | (Event, Date) => Some(RelationType::OccurredOn),
            (Product, Organization) => Some(RelationType::DevelopedBy),
            (Product, Product) => Some(RelationType::RelatedTo),
            _ => None,
        }
    };
    directed(a, b)
        .map(|r| (r, true))
        .or_else(|| directed(b, a).map(|r| (r, false)))
}

#[async_trait]
impl EntityExtractor for HeuristicEntityExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, text: &str) -> Result<Extraction> {
        let entities = self.extract_entities(text);
        let relations = self.infer_relations(&entities);
        tracing::debug!(
            entities = entities.len(),
            relations = relations.len(),
            "Heuristic extraction complete"
        );
        Ok(Extraction { entities, relations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn of_type(entities: &[ExtractedEntity], t: EntityType) -> Vec<String> {
        entities
            .iter()
            .filter(|e| e.entity_type == t)
            .map(|e| e.surface.clone())
            .collect()
    }

    #[test]
    fn extracts_mixed_entities() {
        let extractor = HeuristicEntityExtractor::default();
        let entities = extractor
            .extract_entities("Albert Einstein a travaillé à Berlin en 1905 avant de rejoindre Google.");

        assert_eq!(of_type(&entities, EntityType::Person), vec!["Albert Einstein"]);
        assert_eq!(of_type(&entities, EntityType::Location), vec!["Berlin"]);
        assert_eq!(of_type(&entities, EntityType::Organization), vec!["Google"]);
        assert_eq!(of_type(&entities, EntityType::Date), vec!["1905"]);
    }

    #[test]
    fn full_date_hides_bare_year() {
        let extractor = HeuristicEntityExtractor::default();
        let entities = extractor.extract_entities("Réunion le 25 octobre 2025 à Paris");
        assert_eq!(of_type(&entities, EntityType::Date), vec!["25 octobre 2025"]);
    }

    #[test]
    fn dedups_case_insensitively() {
        let extractor = HeuristicEntityExtractor::default();
        let entities = extractor.extract_entities("Python est partout. J'aime python.");
        assert_eq!(of_type(&entities, EntityType::Product).len(), 1);
    }

    #[test]
    fn known_vocabulary_is_not_a_person() {
        let extractor = HeuristicEntityExtractor::default();
        let entities = extractor.extract_entities("Il habite New York depuis longtemps");
        assert!(of_type(&entities, EntityType::Person).is_empty());
        assert_eq!(of_type(&entities, EntityType::Location), vec!["New York"]);
    }

    #[test]
    fn lone_capitalised_word_is_a_name() {
        let extractor = HeuristicEntityExtractor::default();
        let entities = extractor.extract_entities("Demain je dois écrire à Paul pour le devis.");
        assert_eq!(of_type(&entities, EntityType::Person), vec!["Paul"]);
    }

    #[test]
    fn sentence_initial_word_is_not_a_name() {
        let extractor = HeuristicEntityExtractor::default();
        let entities = extractor.extract_entities("Voici le plan. Ensuite on verra.");
        assert!(of_type(&entities, EntityType::Person).is_empty());
    }

    #[test]
    fn nearby_entities_are_related() {
        let extractor = HeuristicEntityExtractor::default();
        let entities = extractor.extract_entities("Marie Curie travaillait à Paris.");
        let relations = extractor.infer_relations(&entities);

        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source, "Marie Curie");
        assert_eq!(relations[0].target, "Paris");
        assert_eq!(relations[0].relation_type, RelationType::LocatedIn);
        assert!((relations[0].confidence - PERSON_CONFIDENCE * RELATION_DAMPING).abs() < 1e-9);
    }

    #[test]
    fn distant_entities_are_not_related() {
        let extractor = HeuristicEntityExtractor::default();
        let filler = "x ".repeat(80);
        let text = format!("Marie Curie {filler} Paris");
        let entities = extractor.extract_entities(&text);
        assert!(extractor.infer_relations(&entities).is_empty());
    }
}
