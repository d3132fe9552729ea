//! Query understanding: normalization, expansion, filters, and intent
//!
//! Pure text processing, no I/O. The retrieval engine feeds the outputs
//! into embedding and index search.

use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

/// Basic English stopwords for key-term extraction
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "may", "might", "can", "this", "that", "these", "those", "i", "you", "he",
    "she", "it", "we", "they", "me", "him", "her", "us", "them",
];

/// The five boroughs, scanned in order; first match wins
const BOROUGHS: &[&str] = &["manhattan", "brooklyn", "queens", "bronx", "staten island"];

/// Domain synonym sets keyed by trigger word
const EXPANSIONS: &[(&str, &[&str])] = &[
    ("noise", &["noise", "loud", "sound", "music", "construction"]),
    ("water", &["water", "leak", "plumbing", "pipe", "flooding"]),
    ("heat", &["heat", "heating", "hot water", "boiler", "radiator"]),
    ("parking", &["parking", "car", "vehicle", "meter", "permit"]),
    ("trash", &["trash", "garbage", "waste", "sanitation", "pickup"]),
    ("street", &["street", "road", "sidewalk", "pothole", "pavement"]),
];

/// Query intent categories, checked in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Question,
    LocationSpecific,
    Temporal,
    StatusQuery,
    General,
}

impl QueryIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::LocationSpecific => "location_specific",
            Self::Temporal => "temporal",
            Self::StatusQuery => "status_query",
            Self::General => "general",
        }
    }
}

/// A query after the processing pipeline has run
#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub original: String,
    pub normalized: String,
    /// Normalized text with domain synonyms appended
    pub expanded: String,
    /// Key terms with stopwords and short tokens removed
    pub terms: Vec<String>,
    pub intent: QueryIntent,
}

/// Rule-based query processor for the complaint domain
#[derive(Debug, Clone)]
pub struct QueryProcessor {
    max_query_terms: usize,
}

impl QueryProcessor {
    pub fn new(max_query_terms: usize) -> Self {
        Self { max_query_terms }
    }

    /// Run the full pipeline over a raw query
    pub fn process(&self, query: &str) -> ProcessedQuery {
        let normalized = self.normalize(query);
        let expanded = self.expand(&normalized);
        let terms = self.extract_key_terms(&normalized);
        let intent = self.classify_intent(query);

        debug!(
            "Query processed: intent={}, terms={}, expanded={}",
            intent.as_str(),
            terms.len(),
            expanded != normalized
        );

        ProcessedQuery {
            original: query.to_string(),
            normalized,
            expanded,
            terms,
            intent,
        }
    }

    /// Lowercase, collapse whitespace, trim
    pub fn normalize(&self, query: &str) -> String {
        query
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Append domain synonyms for any trigger word present in the query
    ///
    /// Expansion terms are deduplicated and capped at `max_query_terms`.
    /// A query matching no trigger is returned unchanged.
    pub fn expand(&self, query: &str) -> String {
        let query_lower = query.to_lowercase();

        let mut seen = HashSet::new();
        let mut expansion_terms = Vec::new();
        for (trigger, synonyms) in EXPANSIONS {
            if query_lower.contains(trigger) {
                for synonym in *synonyms {
                    if expansion_terms.len() >= self.max_query_terms {
                        break;
                    }
                    if seen.insert(*synonym) {
                        expansion_terms.push(*synonym);
                    }
                }
            }
        }

        if expansion_terms.is_empty() {
            return query.to_string();
        }
        format!("{query} {}", expansion_terms.join(" "))
    }

    /// Scan a normalized query for implicit metadata filters
    ///
    /// Recognizes boroughs, status keywords, risk-level phrases, and coarse
    /// time periods. Categories with no match are absent from the result.
    pub fn extract_filters(&self, normalized: &str) -> HashMap<String, serde_json::Value> {
        let mut filters = HashMap::new();

        for borough in BOROUGHS {
            if normalized.contains(borough) {
                filters.insert(
                    "borough".to_string(),
                    serde_json::Value::String(borough.to_uppercase()),
                );
                break;
            }
        }

        let status = if normalized.contains("open") {
            Some("open")
        } else if normalized.contains("closed") || normalized.contains("resolved") {
            Some("closed")
        } else if normalized.contains("escalated") {
            Some("escalated")
        } else {
            None
        };
        if let Some(status) = status {
            filters.insert(
                "status".to_string(),
                serde_json::Value::String(status.to_string()),
            );
        }

        let risk_level = if normalized.contains("high risk")
            || normalized.contains("dangerous")
            || normalized.contains("urgent")
        {
            Some("high")
        } else if normalized.contains("low risk") || normalized.contains("minor") {
            Some("low")
        } else {
            None
        };
        if let Some(level) = risk_level {
            filters.insert(
                "risk_level".to_string(),
                serde_json::Value::String(level.to_string()),
            );
        }

        let time_period = if normalized.contains("last week") || normalized.contains("past week") {
            Some("last_week")
        } else if normalized.contains("last month") || normalized.contains("past month") {
            Some("last_month")
        } else if normalized.contains("today") {
            Some("today")
        } else {
            None
        };
        if let Some(period) = time_period {
            filters.insert(
                "time_period".to_string(),
                serde_json::Value::String(period.to_string()),
            );
        }

        filters
    }

    /// Classify the query intent, first match in priority order wins
    pub fn classify_intent(&self, query: &str) -> QueryIntent {
        let query_lower = query.to_lowercase();

        if ["what", "how many", "show me", "find"]
            .iter()
            .any(|w| query_lower.contains(w))
        {
            return QueryIntent::Question;
        }

        if ["manhattan", "brooklyn", "queens", "bronx", "staten"]
            .iter()
            .any(|b| query_lower.contains(b))
        {
            return QueryIntent::LocationSpecific;
        }

        if ["recent", "last week", "today", "yesterday"]
            .iter()
            .any(|t| query_lower.contains(t))
        {
            return QueryIntent::Temporal;
        }

        if ["open", "closed", "resolved", "escalated"]
            .iter()
            .any(|s| query_lower.contains(s))
        {
            return QueryIntent::StatusQuery;
        }

        QueryIntent::General
    }

    /// Tokenize and drop stopwords and tokens shorter than 3 characters
    pub fn extract_key_terms(&self, normalized: &str) -> Vec<String> {
        normalized
            .split_whitespace()
            .filter(|term| term.chars().count() > 2 && !STOPWORDS.contains(term))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> QueryProcessor {
        QueryProcessor::new(10)
    }

    #[test]
    fn test_normalize_collapses_and_lowercases() {
        assert_eq!(
            processor().normalize(" Noise   COMPLAINT "),
            "noise complaint"
        );
    }

    #[test]
    fn test_expand_no_trigger_unchanged() {
        let query = "graffiti on the bridge";
        assert_eq!(processor().expand(query), query);
    }

    #[test]
    fn test_expand_appends_synonyms_once() {
        let expanded = processor().expand("noise complaint");
        assert!(expanded.starts_with("noise complaint "));
        assert!(expanded.contains("loud"));
        assert!(expanded.contains("music"));
        assert_eq!(expanded.matches("loud").count(), 1);
    }

    #[test]
    fn test_expand_respects_term_cap() {
        let limited = QueryProcessor::new(3);
        let expanded = limited.expand("noise and water issues");
        let appended: Vec<&str> = expanded
            .strip_prefix("noise and water issues ")
            .unwrap()
            .split_whitespace()
            .collect();
        assert_eq!(appended.len(), 3);
    }

    #[test]
    fn test_extract_filters_borough_and_status() {
        let filters = processor().extract_filters("open complaints in brooklyn");
        assert_eq!(filters["borough"], serde_json::json!("BROOKLYN"));
        assert_eq!(filters["status"], serde_json::json!("open"));
        assert_eq!(filters.len(), 2);
    }

    #[test]
    fn test_extract_filters_resolved_maps_to_closed() {
        let filters = processor().extract_filters("resolved heating issues");
        assert_eq!(filters["status"], serde_json::json!("closed"));
    }

    #[test]
    fn test_extract_filters_risk_and_time() {
        let filters = processor().extract_filters("dangerous complaints from last week");
        assert_eq!(filters["risk_level"], serde_json::json!("high"));
        assert_eq!(filters["time_period"], serde_json::json!("last_week"));
    }

    #[test]
    fn test_extract_filters_nothing_matched() {
        assert!(processor().extract_filters("graffiti reports").is_empty());
    }

    #[test]
    fn test_intent_priority_question_first() {
        let p = processor();
        assert_eq!(
            p.classify_intent("What noise complaints exist in Brooklyn?"),
            QueryIntent::Question
        );
        assert_eq!(
            p.classify_intent("noise complaints in Brooklyn"),
            QueryIntent::LocationSpecific
        );
        assert_eq!(p.classify_intent("recent noise complaints"), QueryIntent::Temporal);
        assert_eq!(p.classify_intent("escalated complaints"), QueryIntent::StatusQuery);
        assert_eq!(p.classify_intent("noise complaints"), QueryIntent::General);
    }

    #[test]
    fn test_key_terms_drop_stopwords_and_short_tokens() {
        let terms = processor().extract_key_terms("what is the noise at my door");
        assert_eq!(terms, vec!["what", "noise", "door"]);
    }
}
