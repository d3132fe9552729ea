//! Risk classification for individual complaints
//!
//! One completion per complaint, with a structured-JSON contract. Responses
//! that cannot be parsed degrade to a heuristic fallback assessment instead
//! of failing the operation.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::RiskConfig;
use crate::errors::CivicRagError;
use crate::llm::Completer;
use crate::llm::ComplaintPrompts;
use crate::models::AnalysisMethod;
use crate::models::Complaint;
use crate::models::ComplaintAnalysis;

/// Upstream calls in flight during batch analysis
const MAX_ANALYSIS_CONCURRENCY: usize = 3;

/// Complaint types that score high risk when model analysis is unavailable
const HIGH_RISK_TYPES: [&str; 7] = [
    "Gas Leak",
    "Water Main Break",
    "Structural Damage",
    "Electrical Hazard",
    "Emergency Response",
    "Fire Safety",
    "Chemical Spill",
];

/// Complaint types that score medium risk when model analysis is unavailable
const MEDIUM_RISK_TYPES: [&str; 6] = [
    "Water System",
    "Heat/Hot Water",
    "Plumbing",
    "Street Condition",
    "Traffic Signal",
    "Sanitation Condition",
];

/// Complaint types that score low risk when model analysis is unavailable
const LOW_RISK_TYPES: [&str; 5] = [
    "Noise - Street/Sidewalk",
    "Illegal Parking",
    "Graffiti",
    "Litter Basket",
    "Animal Noise",
];

/// Analyzer producing structured risk assessments
pub struct ComplaintAnalyzer {
    completer: Arc<dyn Completer>,
    risk: RiskConfig,
}

impl ComplaintAnalyzer {
    /// Create a new analyzer
    #[must_use]
    pub fn new(completer: Arc<dyn Completer>, risk: RiskConfig) -> Self {
        Self { completer, risk }
    }

    /// Analyze one complaint
    ///
    /// Never fails: completion errors and unparseable responses both produce
    /// a fallback assessment tagged `analysis_method: fallback`.
    pub async fn analyze(&self, complaint: &Complaint) -> ComplaintAnalysis {
        info!(
            complaint_id = %complaint.id_string().unwrap_or_default(),
            "Starting complaint analysis"
        );

        let prompt = ComplaintPrompts::analysis().render(&HashMap::from([
            (
                "complaint_type".to_string(),
                complaint.complaint_type.clone(),
            ),
            ("description".to_string(), complaint.description.clone()),
            ("location".to_string(), complaint.location()),
            (
                "agency".to_string(),
                complaint
                    .agency
                    .clone()
                    .unwrap_or_else(|| "Unknown Agency".to_string()),
            ),
            (
                "submitted_at".to_string(),
                complaint
                    .submitted_at
                    .clone()
                    .unwrap_or_else(|| "Unknown time".to_string()),
            ),
        ]));

        let analysis = match self
            .completer
            .complete(ComplaintPrompts::municipal_analyst(), &prompt)
            .await
        {
            Ok(output) => match parse_analysis_response(&output) {
                Ok(parsed) => self.validate_analysis(&parsed),
                Err(e) => {
                    warn!("{e}, using fallback heuristics");
                    self.fallback_analysis(complaint, &output)
                }
            },
            Err(e) => {
                warn!("Completion failed during analysis, using fallback heuristics: {e}");
                self.fallback_analysis(complaint, &format!("Analysis failed: {e}"))
            }
        };

        if analysis.risk_score >= self.risk.escalation_threshold {
            warn!(
                complaint_id = %complaint.id_string().unwrap_or_default(),
                risk_score = analysis.risk_score,
                "Complaint exceeds escalation threshold"
            );
        }

        info!(
            risk_score = analysis.risk_score,
            category = %analysis.category,
            method = analysis.analysis_method.as_str(),
            "Complaint analysis completed"
        );

        analysis
    }

    /// Analyze complaints in input order with bounded upstream concurrency
    pub async fn analyze_batch(&self, complaints: &[Complaint]) -> Vec<ComplaintAnalysis> {
        if complaints.is_empty() {
            return Vec::new();
        }

        info!(
            complaint_count = complaints.len(),
            max_concurrent = MAX_ANALYSIS_CONCURRENCY,
            "Starting batch complaint analysis"
        );

        let mut results = Vec::with_capacity(complaints.len());
        for batch in complaints.chunks(MAX_ANALYSIS_CONCURRENCY) {
            let analyses =
                futures::future::join_all(batch.iter().map(|complaint| self.analyze(complaint)))
                    .await;
            results.extend(analyses);
            debug!(total_processed = results.len(), "Batch processed");
        }

        let genuine = results
            .iter()
            .filter(|a| a.analysis_method == AnalysisMethod::Ai)
            .count();
        info!(
            total_complaints = complaints.len(),
            successful_analyses = genuine,
            "Batch complaint analysis completed"
        );

        results
    }

    /// Normalize parsed model output into a valid assessment
    fn validate_analysis(&self, parsed: &serde_json::Value) -> ComplaintAnalysis {
        let risk_score = match parsed.get("risk_score") {
            None => 0.0,
            Some(value) => coerce_f64(value).map_or_else(
                || {
                    warn!("Invalid risk_score in analysis response, using default");
                    0.5
                },
                |score| score.clamp(0.0, 1.0),
            ),
        } as f32;

        let category = parsed
            .get("category")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("General")
            .to_string();

        let summary = parsed
            .get("summary")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("Analysis completed")
            .to_string();

        let tags = parsed
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(coerce_tag).collect())
            .unwrap_or_default();

        ComplaintAnalysis {
            risk_score,
            category,
            summary,
            tags,
            analysis_method: AnalysisMethod::Ai,
            model_used: Some(self.completer.model().to_string()),
        }
    }

    /// Heuristic assessment when model output is unusable
    fn fallback_analysis(&self, complaint: &Complaint, detail: &str) -> ComplaintAnalysis {
        let type_lower = complaint.complaint_type.to_lowercase();
        let text_lower = format!("{} {detail}", complaint.description).to_lowercase();

        let (risk_score, category) = if matches_type_table(&type_lower, &HIGH_RISK_TYPES) {
            (0.8, "Public Safety")
        } else if matches_type_table(&type_lower, &MEDIUM_RISK_TYPES) {
            (0.6, "Infrastructure")
        } else if matches_type_table(&type_lower, &LOW_RISK_TYPES) {
            (0.3, "Quality of Life")
        } else if ["emergency", "critical", "urgent", "danger"]
            .iter()
            .any(|word| text_lower.contains(word))
        {
            (0.8, "Public Safety")
        } else if ["infrastructure", "water", "gas", "structural"]
            .iter()
            .any(|word| text_lower.contains(word))
        {
            (0.6, "Infrastructure")
        } else {
            (0.5, "General")
        };

        let snippet: String = detail.chars().take(100).collect();

        ComplaintAnalysis {
            risk_score,
            category: category.to_string(),
            summary: format!("Fallback analysis created. Original response: {snippet}..."),
            tags: vec!["fallback".to_string(), "needs-review".to_string()],
            analysis_method: AnalysisMethod::Fallback,
            model_used: None,
        }
    }
}

/// Match a complaint type against a risk table, case-insensitive
fn matches_type_table(type_lower: &str, table: &[&str]) -> bool {
    table
        .iter()
        .any(|entry| type_lower.contains(&entry.to_lowercase()))
}

/// Numbers pass through; numeric strings are accepted too
fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Stringify scalar tag values, dropping empties and compound values
fn coerce_tag(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract the JSON object from a model response
///
/// Tolerates markdown code fences and prose around the object.
///
/// # Errors
/// - `ParseFailure` when no parseable object remains; the caller recovers
///   with the fallback assessment, so this never escapes the analyzer
fn parse_analysis_response(raw: &str) -> crate::errors::Result<serde_json::Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CivicRagError::ParseFailure(
            "empty analysis response".to_string(),
        ));
    }

    let mut cleaned = trimmed.to_string();
    if cleaned.starts_with("```") {
        let lines: Vec<&str> = cleaned.lines().collect();
        if lines.len() >= 2 && lines[lines.len() - 1].trim() == "```" {
            cleaned = lines[1..lines.len() - 1].join("\n");
        }
    }

    let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) else {
        return Err(CivicRagError::ParseFailure(
            "no JSON object in analysis response".to_string(),
        ));
    };
    if end < start {
        return Err(CivicRagError::ParseFailure(
            "no JSON object in analysis response".to_string(),
        ));
    }

    serde_json::from_str(&cleaned[start..=end])
        .map_err(|e| CivicRagError::ParseFailure(format!("invalid analysis JSON: {e}")))
}
