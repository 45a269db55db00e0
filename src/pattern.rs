use crate::config::PatternThresholds;
use crate::delta::DeltaReport;
use crate::history::HistoryWindow;
use crate::models::{PatternKind, PatternMatch};

#[path = "patterns/accumulation.rs"]
pub mod accumulation;

pub use accumulation::AccumulationRule;

#[path = "patterns/distribution.rs"]
pub mod distribution;

pub use distribution::DistributionRule;

#[path = "patterns/gamma_squeeze.rs"]
pub mod gamma_squeeze;

pub use gamma_squeeze::GammaSqueezeRule;

#[path = "patterns/put_wall.rs"]
pub mod put_wall;

pub use put_wall::PutWallRule;

/// Closed set of pattern variants evaluated through one detection interface.
#[derive(Debug, Clone)]
pub enum PatternDetector {
    Accumulation(AccumulationRule),
    Distribution(DistributionRule),
    GammaSqueeze(GammaSqueezeRule),
    PutWall(PutWallRule),
}

impl PatternDetector {
    pub fn for_kind(kind: PatternKind, thresholds: &PatternThresholds) -> Self {
        match kind {
            PatternKind::Accumulation => {
                Self::Accumulation(AccumulationRule::new(&thresholds.accumulation))
            }
            PatternKind::Distribution => {
                Self::Distribution(DistributionRule::new(&thresholds.distribution))
            }
            PatternKind::GammaSqueeze => {
                Self::GammaSqueeze(GammaSqueezeRule::new(&thresholds.gamma_squeeze))
            }
            PatternKind::PutWall => Self::PutWall(PutWallRule::new(&thresholds.put_wall)),
        }
    }

    pub fn all(thresholds: &PatternThresholds) -> Vec<Self> {
        PatternKind::ALL
            .iter()
            .map(|kind| Self::for_kind(*kind, thresholds))
            .collect()
    }

    pub fn kind(&self) -> PatternKind {
        match self {
            Self::Accumulation(_) => PatternKind::Accumulation,
            Self::Distribution(_) => PatternKind::Distribution,
            Self::GammaSqueeze(_) => PatternKind::GammaSqueeze,
            Self::PutWall(_) => PatternKind::PutWall,
        }
    }

    /// Days of history the variant needs before it can match.
    pub fn min_days(&self) -> usize {
        match self {
            Self::Accumulation(rule) => rule.min_days(),
            Self::Distribution(rule) => rule.min_days(),
            Self::GammaSqueeze(rule) => rule.min_days(),
            Self::PutWall(rule) => rule.min_days(),
        }
    }

    /// Zero or one match. A window shorter than `min_days` never matches.
    pub fn detect(
        &self,
        ticker: &str,
        window: &HistoryWindow,
        deltas: &DeltaReport,
    ) -> Option<PatternMatch> {
        window.ensure_min_days(self.min_days()).ok()?;
        let found = match self {
            Self::Accumulation(rule) => rule.evaluate(ticker, deltas),
            Self::Distribution(rule) => rule.evaluate(ticker, deltas),
            Self::GammaSqueeze(rule) => rule.evaluate(ticker, window),
            Self::PutWall(rule) => rule.evaluate(ticker, window),
        }?;
        debug_assert!((0.0..=1.0).contains(&found.strength));
        Some(found)
    }
}

/// Run every variant independently against one ticker's window.
pub fn detect_all(
    detectors: &[PatternDetector],
    ticker: &str,
    window: &HistoryWindow,
    deltas: &DeltaReport,
) -> Vec<PatternMatch> {
    detectors
        .iter()
        .filter_map(|detector| detector.detect(ticker, window, deltas))
        .collect()
}

/// Highest-strength match; ties keep the earlier pattern kind.
pub fn best_match(matches: &[PatternMatch]) -> Option<&PatternMatch> {
    matches.iter().fold(None, |best: Option<&PatternMatch>, candidate| match best {
        Some(current) if current.strength >= candidate.strength => Some(current),
        _ => Some(candidate),
    })
}

/// Result of scanning consecutive qualifying days, oldest to newest.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Streak {
    pub days: usize,
    pub cumulative: f64,
}

/// Walk the daily changes keeping only the streak still running on the last
/// day. `qualify` returns the amount to accumulate, or `None` to reset.
pub(crate) fn trailing_streak<I, F>(changes: I, mut qualify: F) -> Streak
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Option<f64>,
{
    let mut streak = Streak::default();
    for change in changes {
        match qualify(change) {
            Some(amount) => {
                streak.days += 1;
                streak.cumulative += amount;
            }
            None => streak = Streak::default(),
        }
    }
    streak
}

/// Linear strength for streak patterns, saturating at 1.0.
pub(crate) fn streak_strength(cumulative: f64, min_increase: f64) -> f64 {
    if min_increase <= 0.0 {
        return 1.0;
    }
    (cumulative / min_increase).clamp(0.0, 1.0)
}
