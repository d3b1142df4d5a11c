use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use hopper_core::config::AppConfig;
use hopper_core::conversation::{render_turns, ConversationTurn};
use hopper_core::decision::{Decision, DecisionTag, LatencyClass, RouterStats};
use hopper_core::generation::{GenerationRequest, TextGenerator};

/// Extra condition a fast-path rule needs beyond its pattern.
#[derive(Debug, Clone, Copy)]
enum Guard {
    Always,
    /// Query has at most this many words.
    MaxWords(usize),
    /// Conversation has no prior turns to resolve a reference against.
    EmptyContext,
}

struct FastRule {
    name: &'static str,
    tag: DecisionTag,
    confidence: f64,
    pattern: Regex,
    guard: Guard,
}

impl FastRule {
    fn new(name: &'static str, tag: DecisionTag, confidence: f64, pattern: &str, guard: Guard) -> Self {
        Self {
            name,
            tag,
            confidence,
            pattern: Regex::new(pattern).unwrap(),
            guard,
        }
    }

    fn matches(&self, query: &str, context: &[ConversationTurn]) -> bool {
        let guarded = match self.guard {
            Guard::Always => true,
            Guard::MaxWords(max) => query.split_whitespace().count() <= max,
            Guard::EmptyContext => context.is_empty(),
        };
        guarded && self.pattern.is_match(query)
    }
}

const ACTION_VERBS: &str = "envoie|envoyez|envoyer|send|écris|ecris|écrire|ecrire|write|crée|cree|créer|creer|create|lance|lancer|launch|run|exécute|execute|exécuter|executer|ouvre|ouvrir|open|lis|lire|read|liste|lister|list|supprime|supprimer|delete|copie|copier|copy|déplace|déplacer|move|appelle|appeler|call|programme|programmer|schedule|rappelle-moi|remind|fais|faire|email|mail|note|noter|save|enregistre|enregistrer";

/// Words that may precede the verb of a request: politeness, greetings and
/// acknowledgements.
const ACTION_LEAD_INS: &str = "s'il (?:te|vous) pla[iî]t|stp|svp|please|peux-tu|pourrais-tu|tu peux|can you|could you|bonjour|bonsoir|salut|coucou|hello|hi|hey|ok|okay|d'accord|oui|yes|alors|merci de|thanks,? (?:could|can) you";

/// An action verb opening the query or any clause of it (after `,` `;` `:`
/// or sentence punctuation), optionally after lead-in words.
fn action_pattern() -> String {
    format!(
        r"(?i)(?:^|[,;:.!?])\s*(?:(?:{ACTION_LEAD_INS})[,!.\s]+|merci d')*(?:{ACTION_VERBS})\b"
    )
}

/// Fast-path rules, evaluated in order; the first match wins. Action
/// detection comes before vague-referent detection so that "send that
/// file" is an action, not a fuzzy lookup.
static FAST_RULES: LazyLock<Vec<FastRule>> = LazyLock::new(|| {
    vec![
        FastRule::new(
            "action_verb",
            DecisionTag::Action,
            0.9,
            &action_pattern(),
            Guard::Always,
        ),
        FastRule::new(
            "greeting",
            DecisionTag::Direct,
            0.95,
            r"(?i)^\s*(?:bonjour|bonsoir|salut|coucou|hello|hi|hey|merci|thanks|thank you|ok|okay|d'accord|oui|non|yes|no|au revoir|bye|bonne nuit)\b",
            Guard::MaxWords(4),
        ),
        FastRule::new(
            "vague_referent",
            DecisionTag::Fuzzy,
            0.85,
            r"(?i)(?:\ble truc\b|\bce truc\b|\bla chose\b|\bcette chose\b|\bmachin\b|\bbidule\b|\bl'autre jour\b|\bl'autre fois\b|\bje (?:ne )?sais plus\b|\bthe other day\b|\bthat thing\b|\bthe thing\b|\bthat stuff\b|\byou know what\b)",
            Guard::Always,
        ),
        FastRule::new(
            "leading_demonstrative",
            DecisionTag::Fuzzy,
            0.7,
            r"(?i)^\s*(?:ça|ca|cela|ceci|celui-là|celle-là|that|this|it|those|these)\b",
            Guard::EmptyContext,
        ),
    ]
});

const EMPTY_QUERY_RULE: &str = "empty_query";

const CLASSIFIER_SYSTEM: &str = "You route requests for a personal assistant. \
Answer with exactly one word from: direct, knowledge, action, fuzzy.\n\
direct: small talk or something answerable without looking anything up.\n\
knowledge: a question that needs the user's notes or documents.\n\
action: the user wants something done (send, write, run, open).\n\
fuzzy: the user refers vaguely to something they cannot name precisely.";

/// Reads the first word of a classifier reply as a tag.
pub fn parse_label(raw: &str) -> Option<DecisionTag> {
    let first = raw
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == ':')
        .find(|w| !w.is_empty())?;
    DecisionTag::parse(first.trim_matches(|c: char| !c.is_alphanumeric()))
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    fast_path: AtomicU64,
    classifier: AtomicU64,
    classifier_fallbacks: AtomicU64,
    direct: AtomicU64,
    knowledge: AtomicU64,
    action: AtomicU64,
    fuzzy: AtomicU64,
    empty_query: AtomicU64,
}

/// Two-tier router: ordered pattern rules, then one bounded classifier call.
pub struct DecisionRouter {
    generator: Option<Arc<dyn TextGenerator>>,
    classifier_timeout: Duration,
    context_turns: usize,
    counters: Counters,
    rule_hits: Vec<AtomicU64>,
}

impl DecisionRouter {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: &AppConfig) -> Self {
        Self {
            generator,
            classifier_timeout: Duration::from_millis(config.router.classifier_timeout_ms),
            context_turns: config.router.classifier_turns,
            counters: Counters::default(),
            rule_hits: FAST_RULES.iter().map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[instrument(skip(self, context), fields(query_len = query.len()))]
    pub async fn decide(&self, query: &str, context: &[ConversationTurn]) -> Decision {
        let decision = match self.fast_path(query, context) {
            Some(decision) => decision,
            None => self.classify(query, context).await,
        };
        self.record(&decision);
        info!(
            decision = %decision.tag,
            latency_class = ?decision.latency_class,
            reason = %decision.reason,
            "Routing decision"
        );
        decision
    }

    fn fast_path(&self, query: &str, context: &[ConversationTurn]) -> Option<Decision> {
        if query.trim().is_empty() {
            self.counters.empty_query.fetch_add(1, Ordering::Relaxed);
            return Some(Decision {
                tag: DecisionTag::Direct,
                confidence: 1.0,
                latency_class: LatencyClass::FastPath,
                reason: EMPTY_QUERY_RULE.into(),
            });
        }

        FAST_RULES
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(query, context))
            .map(|(i, rule)| {
                self.rule_hits[i].fetch_add(1, Ordering::Relaxed);
                Decision {
                    tag: rule.tag,
                    confidence: rule.confidence,
                    latency_class: LatencyClass::FastPath,
                    reason: rule.name.into(),
                }
            })
    }

    async fn classify(&self, query: &str, context: &[ConversationTurn]) -> Decision {
        let fallback = |reason: &str| Decision {
            tag: DecisionTag::Knowledge,
            confidence: 0.5,
            latency_class: LatencyClass::Classifier,
            reason: reason.to_string(),
        };

        let Some(generator) = &self.generator else {
            self.counters.classifier_fallbacks.fetch_add(1, Ordering::Relaxed);
            return fallback("no_classifier");
        };

        let history = render_turns(context, self.context_turns);
        let prompt = if history.is_empty() {
            format!("Request: {query}\nLabel:")
        } else {
            format!("Recent conversation:\n{history}\n\nRequest: {query}\nLabel:")
        };
        let request = GenerationRequest::new(prompt)
            .system(CLASSIFIER_SYSTEM)
            .max_tokens(4)
            .temperature(0.0)
            .stop(["\n"]);

        let label = match tokio::time::timeout(self.classifier_timeout, generator.generate(&request)).await {
            Ok(Ok(raw)) => {
                debug!(raw = %raw, "Classifier replied");
                parse_label(&raw)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Classifier call failed");
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.classifier_timeout.as_millis() as u64, "Classifier timed out");
                None
            }
        };

        match label {
            Some(tag) => Decision {
                tag,
                confidence: 0.8,
                latency_class: LatencyClass::Classifier,
                reason: "classifier".into(),
            },
            None => {
                self.counters.classifier_fallbacks.fetch_add(1, Ordering::Relaxed);
                fallback("classifier_fallback")
            }
        }
    }

    fn record(&self, decision: &Decision) {
        let c = &self.counters;
        c.total.fetch_add(1, Ordering::Relaxed);
        match decision.latency_class {
            LatencyClass::FastPath => c.fast_path.fetch_add(1, Ordering::Relaxed),
            LatencyClass::Classifier => c.classifier.fetch_add(1, Ordering::Relaxed),
        };
        let tag_counter = match decision.tag {
            DecisionTag::Direct => &c.direct,
            DecisionTag::Knowledge => &c.knowledge,
            DecisionTag::Action => &c.action,
            DecisionTag::Fuzzy => &c.fuzzy,
        };
        tag_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        let mut rule_hits: std::collections::BTreeMap<String, u64> = FAST_RULES
            .iter()
            .zip(self.rule_hits.iter())
            .map(|(rule, hits)| (rule.name.to_string(), hits.load(Ordering::Relaxed)))
            .collect();
        rule_hits.insert(EMPTY_QUERY_RULE.into(), c.empty_query.load(Ordering::Relaxed));

        RouterStats {
            total: c.total.load(Ordering::Relaxed),
            fast_path: c.fast_path.load(Ordering::Relaxed),
            classifier: c.classifier.load(Ordering::Relaxed),
            classifier_fallbacks: c.classifier_fallbacks.load(Ordering::Relaxed),
            direct: c.direct.load(Ordering::Relaxed),
            knowledge: c.knowledge.load(Ordering::Relaxed),
            action: c.action.load(Ordering::Relaxed),
            fuzzy: c.fuzzy.load(Ordering::Relaxed),
            rule_hits,
        }
    }
}
