use std::collections::HashMap;

use crate::models::{PatternKind, PatternMatch};

/// Maps a pattern match to a signal confidence in `[0, 1]`.
pub trait ConfidenceModel: Send + Sync {
    fn confidence(&self, found: &PatternMatch) -> f64;

    fn name(&self) -> &str;
}

/// Match strength, optionally blended with a historical success rate per
/// pattern kind. Without a known rate the strength is used as is.
#[derive(Debug, Clone, Default)]
pub struct BlendedConfidence {
    success_rates: HashMap<PatternKind, f64>,
    weight: f64,
}

impl BlendedConfidence {
    pub fn new(success_rates: HashMap<PatternKind, f64>, weight: f64) -> Self {
        let success_rates = success_rates
            .into_iter()
            .filter(|(_, rate)| rate.is_finite())
            .map(|(kind, rate)| (kind, rate.clamp(0.0, 1.0)))
            .collect();
        Self {
            success_rates,
            weight: if weight.is_finite() {
                weight.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    pub fn strength_only() -> Self {
        Self::default()
    }

    pub fn success_rate(&self, kind: PatternKind) -> Option<f64> {
        self.success_rates.get(&kind).copied()
    }
}

impl ConfidenceModel for BlendedConfidence {
    fn confidence(&self, found: &PatternMatch) -> f64 {
        let strength = found.strength.clamp(0.0, 1.0);
        let blended = match self.success_rate(found.pattern_kind) {
            Some(rate) => (1.0 - self.weight) * strength + self.weight * rate,
            None => strength,
        };
        blended.clamp(0.0, 1.0)
    }

    fn name(&self) -> &str {
        if self.success_rates.is_empty() {
            "strength"
        } else {
            "blended"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DirectionalBias;

    fn found(kind: PatternKind, strength: f64) -> PatternMatch {
        PatternMatch {
            ticker: "AAA".to_string(),
            pattern_kind: kind,
            strength,
            window_length: 5,
            directional_bias: DirectionalBias::Bullish,
            key_strike: None,
        }
    }

    #[test]
    fn falls_back_to_strength_without_history() {
        let model = BlendedConfidence::strength_only();
        assert_eq!(model.confidence(&found(PatternKind::Accumulation, 0.8)), 0.8);
        assert_eq!(model.name(), "strength");
    }

    #[test]
    fn blends_known_success_rates() {
        let mut rates = HashMap::new();
        rates.insert(PatternKind::GammaSqueeze, 0.4);
        let model = BlendedConfidence::new(rates, 0.5);
        assert!((model.confidence(&found(PatternKind::GammaSqueeze, 1.0)) - 0.7).abs() < 1e-12);
        // Kinds missing from the map are not penalised.
        assert_eq!(model.confidence(&found(PatternKind::PutWall, 0.9)), 0.9);
    }

    #[test]
    fn clamps_out_of_range_inputs() {
        let mut rates = HashMap::new();
        rates.insert(PatternKind::Accumulation, 3.0);
        let model = BlendedConfidence::new(rates, 2.0);
        let value = model.confidence(&found(PatternKind::Accumulation, 0.2));
        assert!((0.0..=1.0).contains(&value));
        assert_eq!(value, 1.0);
    }
}
