use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Categorical strength label attached to one inference run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(from = "String", into = "String")]
pub enum EvidenceTier {
    #[strum(to_string = "TIER_1_HIGH", serialize = "HIGH")]
    High,
    #[strum(to_string = "TIER_2_MODERATE", serialize = "MODERATE")]
    Moderate,
    #[strum(to_string = "TIER_3_LOW", serialize = "LOW")]
    Low,
    #[strum(to_string = "NORMAL_BEHAVIOR", serialize = "NORMAL")]
    Normal,
    #[strum(to_string = "ERROR")]
    Error,
    #[default]
    #[strum(to_string = "UNKNOWN")]
    Unknown,
}

impl EvidenceTier {
    pub fn is_strong(self) -> bool {
        matches!(self, EvidenceTier::High | EvidenceTier::Moderate)
    }
}

// Tiers the model invents map to Unknown instead of failing the payload.
impl From<String> for EvidenceTier {
    fn from(value: String) -> Self {
        value.trim().to_uppercase().parse().unwrap_or(EvidenceTier::Unknown)
    }
}

impl From<EvidenceTier> for String {
    fn from(tier: EvidenceTier) -> Self {
        tier.to_string()
    }
}

/// Output of a single inference run over one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisIteration {
    pub confidence: f64,
    pub detected: bool,
    #[serde(default)]
    pub evidence_tier: EvidenceTier,
    #[serde(default)]
    pub key_behaviors: Vec<String>,
    #[serde(default)]
    pub concealment_actions: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl AnalysisIteration {
    /// Conservative stand-in for a run whose payload could not be parsed.
    pub fn unparseable(detail: impl std::fmt::Display) -> Self {
        Self {
            confidence: 0.1,
            detected: false,
            evidence_tier: EvidenceTier::Error,
            key_behaviors: Vec::new(),
            concealment_actions: Vec::new(),
            reasoning: format!("Response parsing error: {detail}"),
        }
    }
}

/// Fused verdict for one analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub final_confidence: f64,
    pub final_detection: bool,
    pub decision_reasoning: String,
    pub iterations: Vec<AnalysisIteration>,
}

impl AnalysisResult {
    /// Zero-confidence result returned instead of an error when a job cannot
    /// complete.
    pub fn terminal_failure(reason: impl Into<String>) -> Self {
        Self {
            final_confidence: 0.0,
            final_detection: false,
            decision_reasoning: reason.into(),
            iterations: Vec::new(),
        }
    }
}
