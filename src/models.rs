use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inbound municipal complaint record, as supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complaint {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub complaint_type: String,
    pub description: String,
    #[serde(default)]
    pub borough: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub agency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    #[serde(default)]
    pub analysis: Option<ComplaintAnalysis>,
}

impl Complaint {
    /// Render the complaint location as "BOROUGH, address"
    pub fn location(&self) -> String {
        let borough = self.borough.as_deref().unwrap_or("Unknown Borough");
        let address = self.address.as_deref().unwrap_or("Address not specified");
        format!("{borough}, {address}")
    }

    /// Complaint id rendered as a plain string, if present
    pub fn id_string(&self) -> Option<String> {
        self.id.as_ref().map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// How an analysis was produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMethod {
    #[default]
    Ai,
    Fallback,
}

impl AnalysisMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Fallback => "fallback",
        }
    }
}

/// Structured risk assessment for one complaint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplaintAnalysis {
    pub risk_score: f32,
    pub category: String,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub analysis_method: AnalysisMethod,
    #[serde(default)]
    pub model_used: Option<String>,
}

/// Risk bands derived from the numeric risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Map a risk score onto a band using the configured bounds
    pub fn from_score(score: f32, risk: &crate::config::RiskConfig) -> Self {
        if score >= risk.high_threshold {
            Self::High
        } else if score >= risk.medium_threshold {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Immutable unit of retrievable content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: HashMap<String, serde_json::Value>) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// String-typed metadata lookup
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Numeric metadata lookup
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(serde_json::Value::as_f64)
    }

    /// Content-identity key used to deduplicate across retrieval branches
    pub fn content_key(&self) -> String {
        let digest = Sha256::digest(self.content.as_bytes());
        hex::encode(digest)
    }
}
