//! Confidence fusion: K independent inference runs in, one verdict out.
//!
//! `fuse` is deterministic. It performs no I/O and reads no clock, so two calls
//! with the same iterations and strictness return the same result.

use tracing::debug;

use crate::models::analysis::{AnalysisIteration, AnalysisResult};

/// Reasoning phrases that mark a run as carrying strong evidence.
pub const STRONG_EVIDENCE_KEYWORDS: &[&str] = &[
    "classic",
    "grab and stuff",
    "concealment",
    "theft pattern",
    "clear concealment",
    "definitive",
    "obvious",
    "pocket",
    "bag",
    "hidden",
];

/// Tunable multipliers and caps of the decision table.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// `moderate = moderate_factor * strictness`
    pub moderate_factor: f64,
    /// `low = low_factor * strictness`
    pub low_factor: f64,
    pub high_confidence_cap: f64,
    pub moderate_discount: f64,
    pub low_confidence_cap: f64,
    pub mixed_discount: f64,
    pub strong_keywords: Vec<String>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            moderate_factor: 0.8,
            low_factor: 0.5,
            high_confidence_cap: 0.9,
            moderate_discount: 0.9,
            low_confidence_cap: 0.3,
            mixed_discount: 0.8,
            strong_keywords: STRONG_EVIDENCE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Ensemble statistics feeding the decision table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleStats {
    pub detection_rate: f64,
    pub avg_confidence: f64,
    pub max_confidence: f64,
    pub strong_evidence: bool,
    /// Highest confidence among runs that carry strong evidence.
    pub strong_peak: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionFusion {
    config: FusionConfig,
}

impl DecisionFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Fuse all iterations of one job into a single result.
    ///
    /// Afterwards `final_detection == (final_confidence >= strictness)` always
    /// holds; the consistency pass flips the verdict when the decision table
    /// disagrees with the threshold and records the flip in the reasoning.
    pub fn fuse(&self, iterations: Vec<AnalysisIteration>, strictness: f64) -> AnalysisResult {
        let strictness = clamp_unit(strictness);

        let (mut final_confidence, mut final_detection, summary) = if iterations.is_empty() {
            (0.0, false, "No analysis results available".to_string())
        } else {
            let stats = self.stats(&iterations);
            debug!(
                detection_rate = stats.detection_rate,
                avg_confidence = stats.avg_confidence,
                max_confidence = stats.max_confidence,
                strong_evidence = stats.strong_evidence,
                strictness,
                "Fusing analysis iterations"
            );
            self.decide(&stats, strictness)
        };
        final_confidence = clamp_unit(final_confidence);

        let mut tail = summary;
        let meets_threshold = final_confidence >= strictness;
        if final_detection != meets_threshold {
            final_detection = meets_threshold;
            if meets_threshold {
                tail.push_str(&format!(" | THRESHOLD: Meets detection threshold {strictness:.3}"));
            } else {
                tail.push_str(&format!(" | THRESHOLD: Below detection threshold {strictness:.3}"));
            }
        }

        let representative = representative_reasoning(&iterations);
        let decision_reasoning = if representative.is_empty() {
            format!("Final Decision Reasoning Summary: {tail}")
        } else {
            format!("{representative}\nFinal Decision Reasoning Summary: {tail}")
        };

        AnalysisResult {
            final_confidence,
            final_detection,
            decision_reasoning,
            iterations,
        }
    }

    pub fn stats(&self, iterations: &[AnalysisIteration]) -> EnsembleStats {
        let k = iterations.len().max(1) as f64;
        let confidences: Vec<f64> = iterations.iter().map(|it| clamp_unit(it.confidence)).collect();

        let detections = iterations.iter().filter(|it| it.detected).count() as f64;
        let avg_confidence = confidences.iter().sum::<f64>() / k;
        let max_confidence = confidences.iter().copied().fold(0.0, f64::max);

        let mut strong_evidence = false;
        let mut strong_peak = 0.0_f64;
        for (it, confidence) in iterations.iter().zip(&confidences) {
            if self.is_strong(it) {
                strong_evidence = true;
                strong_peak = strong_peak.max(*confidence);
            }
        }

        EnsembleStats {
            detection_rate: detections / k,
            avg_confidence,
            max_confidence,
            strong_evidence,
            strong_peak,
        }
    }

    fn is_strong(&self, it: &AnalysisIteration) -> bool {
        if !it.concealment_actions.is_empty() || it.evidence_tier.is_strong() {
            return true;
        }
        let reasoning = it.reasoning.to_lowercase();
        self.config
            .strong_keywords
            .iter()
            .any(|k| reasoning.contains(k.as_str()))
    }

    /// Tiered decision table; first matching row wins.
    fn decide(&self, s: &EnsembleStats, strictness: f64) -> (f64, bool, String) {
        let c = &self.config;
        let high = strictness;
        let moderate = c.moderate_factor * strictness;
        let low = c.low_factor * strictness;
        let rate = s.detection_rate;
        let avg = s.avg_confidence;

        if rate >= high && avg >= high {
            (
                avg.min(c.high_confidence_cap),
                true,
                format!("High detection consistency ({:.1}%) with strong confidence ({avg:.3})", rate * 100.0),
            )
        } else if rate >= moderate && avg >= moderate {
            (
                avg * c.moderate_discount,
                true,
                format!("Moderate detection consistency ({:.1}%) with adequate confidence ({avg:.3})", rate * 100.0),
            )
        } else if s.strong_evidence && avg >= moderate {
            let confidence = avg.max(s.strong_peak);
            (
                confidence,
                true,
                format!(
                    "Strong theft evidence detected, maintaining original assessment (confidence: {confidence:.3}, ensemble average: {avg:.3})"
                ),
            )
        } else if rate <= low && avg <= low {
            (
                avg.min(c.low_confidence_cap),
                false,
                format!("Low detection rate ({:.1}%) and low confidence ({avg:.3}) - normal behavior", rate * 100.0),
            )
        } else {
            (
                avg * c.mixed_discount,
                false,
                format!("Mixed signals: detection rate ({:.1}%) with confidence ({avg:.3}) - conservative assessment", rate * 100.0),
            )
        }
    }
}

/// Convenience wrapper using the default table.
pub fn fuse(iterations: Vec<AnalysisIteration>, strictness: f64) -> AnalysisResult {
    DecisionFusion::default().fuse(iterations, strictness)
}

/// Reasoning of the run whose confidence is closest to the ensemble average;
/// the earliest run wins ties. Falls back to the first non-empty reasoning.
fn representative_reasoning(iterations: &[AnalysisIteration]) -> String {
    if iterations.is_empty() {
        return String::new();
    }
    let avg = iterations.iter().map(|it| clamp_unit(it.confidence)).sum::<f64>() / iterations.len() as f64;

    let mut closest = 0;
    let mut best = f64::INFINITY;
    for (idx, it) in iterations.iter().enumerate() {
        let distance = (clamp_unit(it.confidence) - avg).abs();
        if distance < best {
            best = distance;
            closest = idx;
        }
    }

    let reasoning = iterations[closest].reasoning.trim();
    if !reasoning.is_empty() {
        return reasoning.to_string();
    }
    iterations
        .iter()
        .map(|it| it.reasoning.trim())
        .find(|r| !r.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
