use serde::{Deserialize, Serialize};

/// The four routing strategies. Nothing else can be produced by the router.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTag {
    Direct,
    Knowledge,
    Action,
    Fuzzy,
}

impl DecisionTag {
    pub const ALL: [DecisionTag; 4] = [
        DecisionTag::Direct,
        DecisionTag::Knowledge,
        DecisionTag::Action,
        DecisionTag::Fuzzy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionTag::Direct => "direct",
            DecisionTag::Knowledge => "knowledge",
            DecisionTag::Action => "action",
            DecisionTag::Fuzzy => "fuzzy",
        }
    }

    /// Parses a classifier label. Only the exact tag names are accepted.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "direct" => Some(DecisionTag::Direct),
            "knowledge" => Some(DecisionTag::Knowledge),
            "action" => Some(DecisionTag::Action),
            "fuzzy" => Some(DecisionTag::Fuzzy),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    FastPath,
    Classifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub tag: DecisionTag,
    pub confidence: f64,
    pub latency_class: LatencyClass,
    /// Name of the fast-path rule that fired, or a short note on how the
    /// classifier result was obtained.
    pub reason: String,
}

/// Running counters kept by the router since startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterStats {
    pub total: u64,
    pub fast_path: u64,
    pub classifier: u64,
    pub classifier_fallbacks: u64,
    pub direct: u64,
    pub knowledge: u64,
    pub action: u64,
    pub fuzzy: u64,
    /// Hits per fast-path rule name.
    pub rule_hits: std::collections::BTreeMap<String, u64>,
}

impl RouterStats {
    pub fn fast_path_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.fast_path as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_only_known_tags() {
        for tag in DecisionTag::ALL {
            assert_eq!(DecisionTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(DecisionTag::parse(" Action "), Some(DecisionTag::Action));
        assert_eq!(DecisionTag::parse("search"), None);
        assert_eq!(DecisionTag::parse(""), None);
    }
}
