use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use hopper_core::embedding::{mean_pool, Embedder};
use hopper_core::error::{HopperError, Result};
use hopper_core::generation::{GenerationRequest, TextGenerator};
use hopper_core::response::{Expansion, QueryType};

const MAX_HYPOTHESIS_CHARS: usize = 500;
const MAX_CANDIDATES: usize = 5;
const HYPOTHESES: usize = 3;

const VAGUE_TEMPLATES: &[&str] = &[
    "Pour répondre à cette question, il faut comprendre que {query}. Voici une explication détaillée.",
    "La question '{query}' peut être interprétée de plusieurs façons. Voici les aspects principaux.",
    "Concernant {query}, les éléments clés sont les suivants.",
];

const CONCEPTUAL_TEMPLATES: &[&str] = &[
    "Le concept de {query} repose sur plusieurs principes fondamentaux.",
    "D'un point de vue théorique, {query} s'explique par les mécanismes suivants.",
    "La théorie derrière {query} inclut plusieurs aspects importants.",
];

const EXPLORATORY_TEMPLATES: &[&str] = &[
    "En explorant {query}, on découvre plusieurs dimensions intéressantes.",
    "Pour approfondir {query}, il est utile d'examiner différents angles.",
    "L'analyse de {query} révèle plusieurs facettes à considérer.",
];

const STOP_WORDS: &[&str] = &[
    "comment", "quoi", "que", "quel", "quelle", "pourquoi", "est-ce", "c'est", "ça", "ca",
    "truc", "chose",
];

const HYPOTHESIS_SYSTEM: &str = "You write short passages that could plausibly answer a \
user's question, as if quoted from their own notes. Write in the language of the question. \
Separate passages with a blank line. No preamble, no numbering.";

/// Classifies a query by length and keywords. Word matching is on the
/// lower-cased, accent-insensitive form.
pub fn detect_query_type(query: &str) -> QueryType {
    let lower = fold_accents(&query.trim().to_lowercase());
    let words = lower.split_whitespace().count();
    let has_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if words > 10 && has_any(&["precisement", "exactement", "specifiquement"]) {
        return QueryType::Specific;
    }
    if words <= 3 {
        return QueryType::Vague;
    }
    if has_any(&[
        "theorie",
        "concept",
        "principe",
        "fondement",
        "definition",
        "qu'est-ce que",
        "expliquer",
    ]) {
        return QueryType::Conceptual;
    }
    if has_any(&["explorer", "decouvrir", "possibilites", "options", "alternatives"]) {
        return QueryType::Exploratory;
    }
    QueryType::Vague
}

fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn templates_for(query_type: QueryType) -> &'static [&'static str] {
    match query_type {
        QueryType::Conceptual => CONCEPTUAL_TEMPLATES,
        QueryType::Exploratory => EXPLORATORY_TEMPLATES,
        QueryType::Vague | QueryType::Specific => VAGUE_TEMPLATES,
    }
}

/// Fills `count` hypotheses from the templates for `query_type`, cycling
/// through them when more are needed than exist.
pub fn template_hypotheses(query: &str, query_type: QueryType, count: usize) -> Vec<String> {
    let templates = templates_for(query_type);
    (0..count.max(1))
        .map(|i| clip(&templates[i % templates.len()].replace("{query}", query.trim())))
        .collect()
}

fn clip(text: &str) -> String {
    text.chars().take(MAX_HYPOTHESIS_CHARS).collect()
}

fn clean_word(word: &str) -> &str {
    word.trim_matches(|c: char| matches!(c, '?' | '!' | '.' | ',' | ';' | ':' | '"' | '«' | '»'))
}

/// Keyword reformulations of the query plus the most frequent long words of
/// the hypotheses. At most five, without duplicates.
pub fn alternative_queries(query: &str, hypotheses: &[String]) -> Vec<String> {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower
        .split_whitespace()
        .map(clean_word)
        .filter(|w| !w.is_empty())
        .collect();
    let meaningful: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !STOP_WORDS.contains(w))
        .collect();

    let mut queries = Vec::new();
    if !meaningful.is_empty() {
        let joined = meaningful.join(" ");
        queries.push(joined.clone());
        if words.contains(&"comment") {
            queries.push(format!("fonctionnement {joined}"));
        }
        queries.push(format!("explication {joined}"));
    }

    // Counted in first-seen order so ties resolve the same way every run.
    let corpus = hypotheses.join(" ").to_lowercase();
    let mut order: Vec<&str> = Vec::new();
    let mut freq: HashMap<&str, usize> = HashMap::new();
    for word in corpus.split_whitespace().map(clean_word) {
        if word.chars().count() <= 4 {
            continue;
        }
        let count = freq.entry(word).or_insert(0);
        if *count == 0 {
            order.push(word);
        }
        *count += 1;
    }
    order.sort_by(|a, b| freq[b].cmp(&freq[a]));
    if !order.is_empty() {
        queries.push(order.iter().take(3).copied().collect::<Vec<_>>().join(" "));
    }

    if queries.is_empty() && !query.trim().is_empty() {
        queries.push(query.trim().to_string());
    }

    let mut seen = std::collections::HashSet::new();
    queries.retain(|q| seen.insert(q.clone()));
    queries.truncate(MAX_CANDIDATES);
    queries
}

/// HyDE expansion: hypothetical answers for a vague query, embedded in place
/// of the query itself.
pub struct QueryExpander {
    generator: Option<Arc<dyn TextGenerator>>,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl QueryExpander {
    pub fn new(
        generator: Option<Arc<dyn TextGenerator>>,
        embedder: Arc<dyn Embedder>,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            embedder,
            timeout,
        }
    }

    /// Never fails: when the generator is missing, slow or unhelpful the
    /// hypotheses come from templates.
    pub async fn expand(&self, query: &str) -> Expansion {
        let query_type = detect_query_type(query);

        let generated = match &self.generator {
            Some(generator) => match self.generate_hypotheses(generator.as_ref(), query).await {
                Ok(hypotheses) => hypotheses,
                Err(e) => {
                    warn!(error = %e, "Hypothesis generation failed, using templates");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let used_fallback = generated.is_empty();
        let hypotheses = if used_fallback {
            template_hypotheses(query, query_type, HYPOTHESES)
        } else {
            generated
        };
        let candidate_queries = alternative_queries(query, &hypotheses);

        debug!(
            query_type = query_type.as_str(),
            hypotheses = hypotheses.len(),
            candidates = candidate_queries.len(),
            used_fallback,
            "Query expanded"
        );

        Expansion {
            original: query.to_string(),
            query_type,
            hypotheses,
            candidate_queries,
            used_fallback,
        }
    }

    async fn generate_hypotheses(
        &self,
        generator: &dyn TextGenerator,
        query: &str,
    ) -> Result<Vec<String>> {
        let request = GenerationRequest::new(format!(
            "Question: {query}\n\nWrite {} different passages that could answer it.",
            HYPOTHESES
        ))
        .system(HYPOTHESIS_SYSTEM)
        .max_tokens(400)
        .temperature(0.7);

        let raw = tokio::time::timeout(self.timeout, generator.generate(&request))
            .await
            .map_err(|_| HopperError::Timeout(format!("hypothesis generation after {:?}", self.timeout)))??;

        Ok(raw
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .take(HYPOTHESES)
            .map(clip)
            .collect())
    }

    /// Mean of the hypothesis embeddings, normalized. Falls back to the
    /// original query's embedding when nothing could be pooled.
    pub async fn embed_expansion(&self, expansion: &Expansion) -> Result<Vec<f32>> {
        let mut vectors = Vec::with_capacity(expansion.hypotheses.len());
        for hypothesis in &expansion.hypotheses {
            match self.embedder.embed(hypothesis).await {
                Ok(v) => vectors.push(v),
                Err(e) => warn!(error = %e, "Skipping hypothesis that failed to embed"),
            }
        }
        match mean_pool(&vectors) {
            Some(pooled) => Ok(pooled),
            None => self.embedder.embed(&expansion.original).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl TextGenerator for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            if self.0.is_empty() {
                Err(HopperError::Generation("unavailable".into()))
            } else {
                Ok(self.0.to_string())
            }
        }
    }

    struct Unit;

    #[async_trait]
    impl Embedder for Unit {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.len() % 2 == 0 { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
        }
    }

    fn expander(reply: &'static str) -> QueryExpander {
        QueryExpander::new(Some(Arc::new(Canned(reply))), Arc::new(Unit), Duration::from_secs(1))
    }

    #[test]
    fn detects_query_types() {
        assert_eq!(detect_query_type("comment ça marche?"), QueryType::Vague);
        assert_eq!(
            detect_query_type("qu'est-ce que le machine learning?"),
            QueryType::Conceptual
        );
        assert_eq!(
            detect_query_type("je voudrais explorer les possibilités de déploiement"),
            QueryType::Exploratory
        );
        assert_eq!(
            detect_query_type(
                "je veux savoir précisément quelle version de la bibliothèque était utilisée en mars dernier"
            ),
            QueryType::Specific
        );
        assert_eq!(detect_query_type("le truc de l'autre jour"), QueryType::Vague);
    }

    #[test]
    fn templates_cycle_when_more_are_requested() {
        let hypotheses = template_hypotheses("le projet", QueryType::Conceptual, 4);
        assert_eq!(hypotheses.len(), 4);
        assert_eq!(hypotheses[0], hypotheses[3]);
        assert!(hypotheses[0].contains("le projet"));
    }

    #[test]
    fn alternative_queries_drop_stop_words() {
        let queries = alternative_queries("comment ça marche?", &[]);
        assert_eq!(
            queries,
            vec!["marche", "fonctionnement marche", "explication marche"]
        );
    }

    #[test]
    fn alternative_queries_are_capped_and_unique() {
        let hypotheses = vec!["réunion réunion serveur serveur migration".to_string()];
        let queries = alternative_queries("comment migrer le serveur", &hypotheses);
        assert!(queries.len() <= MAX_CANDIDATES);
        assert_eq!(queries.last().map(String::as_str), Some("réunion serveur migration"));
    }

    #[tokio::test]
    async fn generator_passages_become_hypotheses() {
        let expansion = expander("Premier passage.\n\nDeuxième passage.\n\n\nTroisième.\n\nQuatrième.")
            .expand("le truc de l'autre jour")
            .await;
        assert!(!expansion.used_fallback);
        assert_eq!(expansion.hypotheses.len(), 3);
        assert_eq!(expansion.hypotheses[1], "Deuxième passage.");
    }

    #[tokio::test]
    async fn failed_generation_falls_back_to_templates() {
        let expansion = expander("").expand("le truc de l'autre jour").await;
        assert!(expansion.used_fallback);
        assert_eq!(expansion.hypotheses.len(), 3);
        assert!(!expansion.candidate_queries.is_empty());
    }

    #[tokio::test]
    async fn expansion_without_generator_still_yields_candidates() {
        let expander = QueryExpander::new(None, Arc::new(Unit), Duration::from_secs(1));
        let expansion = expander.expand("ça").await;
        assert!(expansion.used_fallback);
        assert!(!expansion.candidate_queries.is_empty());
    }

    #[tokio::test]
    async fn pooled_embedding_is_normalized() {
        let expander = expander("ab\n\nabc");
        let expansion = expander.expand("le truc").await;
        let pooled = expander.embed_expansion(&expansion).await.unwrap();
        let norm: f32 = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((pooled[0] - pooled[1]).abs() < 1e-5);
    }
}
