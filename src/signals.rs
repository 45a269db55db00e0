use std::cmp::Ordering;

use chrono::NaiveDate;
use log::{debug, info};
use rayon::prelude::*;

use crate::config::SignalConfig;
use crate::confidence::ConfidenceModel;
use crate::error::{ExclusionKind, PipelineError, RejectedCandidate};
use crate::models::{
    DailyAggregate, DirectionalBias, EntryZone, PatternKind, PatternMatch, Signal, SignalAction,
};

/// One pattern match paired with the ticker's latest aggregate and cluster.
#[derive(Debug, Clone, Copy)]
pub struct SignalCandidate<'a> {
    pub found: &'a PatternMatch,
    pub latest: &'a DailyAggregate,
    pub cluster_id: i32,
}

#[derive(Debug, Clone, Default)]
pub struct SignalOutcome {
    pub signals: Vec<Signal>,
    pub rejected: Vec<RejectedCandidate>,
    /// Qualifying signals cut by the position limit.
    pub truncated: usize,
}

const STRIKE_EPSILON: f64 = 1e-6;

fn round_price(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Total order used for the final ranking.
pub fn compare_signals(a: &Signal, b: &Signal) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.ticker.cmp(&b.ticker))
        .then_with(|| a.pattern_kind.cmp(&b.pattern_kind))
}

/// Listed strike for the contract, by pattern kind.
pub fn select_strike(
    found: &PatternMatch,
    latest: &DailyAggregate,
    otm_offset: f64,
) -> Option<f64> {
    let price = latest.underlying_price;
    let at_or_above = |target: f64| {
        latest
            .listed_strikes()
            .find(|strike| *strike >= target - STRIKE_EPSILON)
            .or_else(|| latest.nearest_strike(target))
    };
    let at_or_below = |target: f64| {
        latest
            .listed_strikes()
            .filter(|strike| *strike <= target + STRIKE_EPSILON)
            .last()
            .or_else(|| latest.nearest_strike(target))
    };

    match found.pattern_kind {
        PatternKind::GammaSqueeze => latest.nearest_strike(price),
        PatternKind::Accumulation => at_or_above(price * (1.0 + otm_offset)),
        PatternKind::Distribution => at_or_below(price * (1.0 - otm_offset)),
        PatternKind::PutWall => match found.key_strike {
            Some(wall) => latest
                .listed_strikes()
                .filter(|strike| *strike < wall)
                .last()
                .or(Some(wall)),
            None => at_or_below(price * (1.0 - otm_offset)),
        },
    }
}

/// Listed expiration closest to the target DTE band, within tolerance.
///
/// Expirations inside the band win; otherwise the smallest distance to the
/// band, then the shorter DTE.
pub fn select_expiration(
    ticker: &str,
    as_of: NaiveDate,
    expirations: impl IntoIterator<Item = NaiveDate>,
    config: &SignalConfig,
) -> Result<(NaiveDate, i64), PipelineError> {
    let (min_dte, max_dte) = (config.target_dte_min, config.target_dte_max);
    expirations
        .into_iter()
        .filter_map(|expiration| {
            let dte = (expiration - as_of).num_days();
            let distance = if dte < min_dte {
                min_dte - dte
            } else if dte > max_dte {
                dte - max_dte
            } else {
                0
            };
            (distance <= config.dte_tolerance).then_some((distance, dte, expiration))
        })
        .min_by_key(|(distance, dte, _)| (*distance, *dte))
        .map(|(_, dte, expiration)| (expiration, dte))
        .ok_or_else(|| PipelineError::NoExpirationInBand {
            ticker: ticker.to_string(),
            min_dte,
            max_dte,
            tolerance: config.dte_tolerance,
        })
}

fn reject(
    found: &PatternMatch,
    confidence: f64,
    kind: ExclusionKind,
    detail: String,
) -> RejectedCandidate {
    RejectedCandidate {
        ticker: found.ticker.clone(),
        pattern_kind: found.pattern_kind,
        confidence,
        kind,
        detail,
    }
}

/// Turn one candidate into a concrete signal or a rejection record.
pub fn build_signal(
    candidate: &SignalCandidate<'_>,
    model: &dyn ConfidenceModel,
    config: &SignalConfig,
) -> Result<Signal, RejectedCandidate> {
    let found = candidate.found;
    let latest = candidate.latest;
    let confidence = model.confidence(found);
    if confidence < config.min_confidence {
        return Err(reject(
            found,
            confidence,
            ExclusionKind::BelowConfidence,
            format!(
                "confidence {:.3} below minimum {:.3}",
                confidence, config.min_confidence
            ),
        ));
    }

    let strike = select_strike(found, latest, config.otm_offset).ok_or_else(|| {
        reject(
            found,
            confidence,
            ExclusionKind::MissingData,
            format!("no listed strikes on {}", latest.date),
        )
    })?;
    let (expiration, expiration_days_out) = select_expiration(
        &found.ticker,
        latest.date,
        latest.expirations.iter().copied(),
        config,
    )
    .map_err(|error| {
        reject(
            found,
            confidence,
            ExclusionKind::from_error(&error),
            error.to_string(),
        )
    })?;

    let price = latest.underlying_price;
    let risk = config.risk.for_kind(found.pattern_kind);
    let (stop_loss, target) = match found.directional_bias {
        DirectionalBias::Bullish => (
            price * (1.0 - risk.stop_loss_pct),
            price * (1.0 + risk.stop_loss_pct * risk.reward_multiple),
        ),
        DirectionalBias::Bearish => (
            price * (1.0 + risk.stop_loss_pct),
            price * (1.0 - risk.stop_loss_pct * risk.reward_multiple),
        ),
    };

    Ok(Signal {
        ticker: found.ticker.clone(),
        action: SignalAction::from_bias(found.directional_bias),
        pattern_kind: found.pattern_kind,
        strike,
        expiration,
        expiration_days_out,
        confidence,
        entry_zone: EntryZone {
            low: round_price(price * (1.0 - config.entry_band)),
            high: round_price(price * (1.0 + config.entry_band)),
        },
        stop_loss: round_price(stop_loss),
        target: round_price(target),
        position_size: config.position_size,
        cluster_id: candidate.cluster_id,
    })
}

/// Build candidates in parallel, then rank and truncate serially.
pub fn generate_signals(
    candidates: &[SignalCandidate<'_>],
    model: &dyn ConfidenceModel,
    config: &SignalConfig,
) -> SignalOutcome {
    let built: Vec<Result<Signal, RejectedCandidate>> = candidates
        .par_iter()
        .map(|candidate| build_signal(candidate, model, config))
        .collect();

    let mut signals = Vec::new();
    let mut rejected = Vec::new();
    for result in built {
        match result {
            Ok(signal) => signals.push(signal),
            Err(rejection) => {
                debug!(
                    "Rejected {} {} candidate: {}",
                    rejection.ticker, rejection.pattern_kind, rejection.detail
                );
                rejected.push(rejection);
            }
        }
    }

    signals.sort_by(compare_signals);
    let truncated = signals.len().saturating_sub(config.max_positions);
    signals.truncate(config.max_positions);
    rejected.sort_by(|a, b| {
        a.ticker
            .cmp(&b.ticker)
            .then_with(|| a.pattern_kind.cmp(&b.pattern_kind))
    });

    info!(
        "Signal generation: {} candidates, {} signals, {} rejected, {} over position limit",
        candidates.len(),
        signals.len(),
        rejected.len(),
        truncated
    );

    SignalOutcome {
        signals,
        rejected,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::BlendedConfidence;
    use crate::delta::test_support::day_with_strikes;
    use crate::models::NOISE_CLUSTER_ID;
    use chrono::Duration;

    fn found(ticker: &str, kind: PatternKind, strength: f64) -> PatternMatch {
        let directional_bias = match kind {
            PatternKind::Accumulation | PatternKind::GammaSqueeze => DirectionalBias::Bullish,
            PatternKind::Distribution | PatternKind::PutWall => DirectionalBias::Bearish,
        };
        PatternMatch {
            ticker: ticker.to_string(),
            pattern_kind: kind,
            strength,
            window_length: 5,
            directional_bias,
            key_strike: (kind == PatternKind::PutWall).then_some(95.0),
        }
    }

    fn latest() -> DailyAggregate {
        // Strikes every 2.5 around 100; the fixture lists a 63 DTE expiration.
        let rows: Vec<(f64, u64, u64, u64, u64)> = (0..9)
            .map(|i| (90.0 + i as f64 * 2.5, 100, 100, 10, 10))
            .collect();
        day_with_strikes(0, 100.0, &rows)
    }

    #[test]
    fn picks_pattern_specific_strikes() {
        let day = latest();
        let strike = |kind| select_strike(&found("AAA", kind, 0.9), &day, 0.025);
        assert_eq!(strike(PatternKind::Accumulation), Some(102.5));
        assert_eq!(strike(PatternKind::Distribution), Some(97.5));
        assert_eq!(strike(PatternKind::GammaSqueeze), Some(100.0));
        assert_eq!(strike(PatternKind::PutWall), Some(92.5));
    }

    #[test]
    fn expiration_prefers_in_band_then_nearest_within_tolerance() {
        let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let config = SignalConfig::default();
        let listed = [30, 55, 64, 90].map(|d| as_of + Duration::days(d));
        let (expiration, dte) = select_expiration("AAA", as_of, listed, &config).unwrap();
        assert_eq!(dte, 64);
        assert_eq!(expiration, as_of + Duration::days(64));

        let listed = [30, 55, 80].map(|d| as_of + Duration::days(d));
        let (_, dte) = select_expiration("AAA", as_of, listed, &config).unwrap();
        assert_eq!(dte, 55);

        let listed = [30, 90].map(|d| as_of + Duration::days(d));
        assert!(matches!(
            select_expiration("AAA", as_of, listed, &config),
            Err(PipelineError::NoExpirationInBand { .. })
        ));
    }

    #[test]
    fn builds_bullish_and_bearish_levels() {
        let day = latest();
        let model = BlendedConfidence::strength_only();
        let config = SignalConfig::default();
        let bull = found("AAA", PatternKind::Accumulation, 0.9);
        let signal = build_signal(
            &SignalCandidate {
                found: &bull,
                latest: &day,
                cluster_id: 2,
            },
            &model,
            &config,
        )
        .unwrap();
        assert_eq!(signal.action, SignalAction::BuyCall);
        assert_eq!(signal.expiration_days_out, 63);
        assert_eq!(signal.stop_loss, 95.0);
        assert_eq!(signal.target, 110.0);
        assert_eq!(signal.entry_zone, EntryZone { low: 99.0, high: 101.0 });
        assert_eq!(signal.cluster_id, 2);
        assert_eq!(signal.position_size, 0.02);

        let bear = found("AAA", PatternKind::PutWall, 0.9);
        let signal = build_signal(
            &SignalCandidate {
                found: &bear,
                latest: &day,
                cluster_id: NOISE_CLUSTER_ID,
            },
            &model,
            &config,
        )
        .unwrap();
        assert_eq!(signal.action, SignalAction::BuyPut);
        assert_eq!(signal.stop_loss, 105.0);
        assert_eq!(signal.target, 90.0);
    }

    #[test]
    fn low_confidence_candidate_is_excluded() {
        let day = latest();
        let weak = found("WEAK", PatternKind::Accumulation, 0.65);
        let strong = found("STRONG", PatternKind::Accumulation, 0.75);
        let candidates = [&weak, &strong].map(|found| SignalCandidate {
            found,
            latest: &day,
            cluster_id: NOISE_CLUSTER_ID,
        });
        let outcome = generate_signals(
            &candidates,
            &BlendedConfidence::strength_only(),
            &SignalConfig::default(),
        );
        assert_eq!(outcome.signals.len(), 1);
        assert_eq!(outcome.signals[0].ticker, "STRONG");
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].ticker, "WEAK");
        assert_eq!(outcome.rejected[0].kind, ExclusionKind::BelowConfidence);
    }

    #[test]
    fn missing_expiration_drops_only_that_candidate() {
        let day = latest();
        let mut far = latest();
        far.expirations = [far.date + Duration::days(200)].into_iter().collect();
        let a = found("AAA", PatternKind::GammaSqueeze, 0.9);
        let b = found("BBB", PatternKind::GammaSqueeze, 0.9);
        let candidates = [
            SignalCandidate {
                found: &a,
                latest: &far,
                cluster_id: NOISE_CLUSTER_ID,
            },
            SignalCandidate {
                found: &b,
                latest: &day,
                cluster_id: NOISE_CLUSTER_ID,
            },
        ];
        let outcome = generate_signals(
            &candidates,
            &BlendedConfidence::strength_only(),
            &SignalConfig::default(),
        );
        assert_eq!(outcome.signals.len(), 1);
        assert_eq!(outcome.signals[0].ticker, "BBB");
        assert_eq!(outcome.rejected[0].kind, ExclusionKind::NoExpirationInBand);
    }

    #[test]
    fn each_match_of_a_ticker_becomes_its_own_signal() {
        let day = latest();
        // Equal confidence on one ticker: declaration order of the kind decides.
        let squeeze = found("AAA", PatternKind::GammaSqueeze, 0.9);
        let accumulation = found("AAA", PatternKind::Accumulation, 0.9);
        let wall = found("AAA", PatternKind::PutWall, 0.8);
        let candidates = [&squeeze, &wall, &accumulation].map(|found| SignalCandidate {
            found,
            latest: &day,
            cluster_id: 0,
        });
        let outcome = generate_signals(
            &candidates,
            &BlendedConfidence::strength_only(),
            &SignalConfig::default(),
        );

        let kinds: Vec<PatternKind> = outcome.signals.iter().map(|s| s.pattern_kind).collect();
        assert_eq!(
            kinds,
            vec![
                PatternKind::Accumulation,
                PatternKind::GammaSqueeze,
                PatternKind::PutWall
            ]
        );
        assert!(outcome.signals.iter().all(|s| s.ticker == "AAA"));
        assert_eq!(outcome.signals[2].action, SignalAction::BuyPut);
        assert_eq!(
            compare_signals(&outcome.signals[1], &outcome.signals[0]),
            Ordering::Greater
        );
    }

    #[test]
    fn ranked_output_is_sorted_and_bounded() {
        let day = latest();
        let strengths = [0.71, 0.95, 0.80, 0.95, 0.72, 0.99, 0.88];
        let matches: Vec<PatternMatch> = strengths
            .iter()
            .enumerate()
            .map(|(i, s)| found(&format!("T{}", i), PatternKind::Accumulation, *s))
            .collect();
        let candidates: Vec<SignalCandidate> = matches
            .iter()
            .map(|found| SignalCandidate {
                found,
                latest: &day,
                cluster_id: NOISE_CLUSTER_ID,
            })
            .collect();
        let config = SignalConfig {
            max_positions: 4,
            ..SignalConfig::default()
        };
        let outcome = generate_signals(&candidates, &BlendedConfidence::strength_only(), &config);

        assert_eq!(outcome.signals.len(), 4);
        assert_eq!(outcome.truncated, 3);
        assert!(outcome
            .signals
            .windows(2)
            .all(|pair| pair[0].confidence >= pair[1].confidence));
        let tickers: Vec<&str> = outcome.signals.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["T5", "T1", "T3", "T6"]);
    }
}
