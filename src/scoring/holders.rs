//! Holder distribution analysis
//!
//! Concentrated supply lets a handful of wallets exit on everyone else.
//! Holder data often lags DEX data for fresh mints, so "unknown" gets a
//! moderate penalty of its own rather than the neutral midpoint: a token we
//! cannot see holders for is riskier than one with a verified spread.

use crate::config::ScoringConfig;
use crate::types::{Factor, MarketFields};

pub const FACTOR_NAME: &str = "holder_concentration";

/// Penalty applied when holder data is missing entirely
pub const UNKNOWN_HOLDERS_SCORE: f64 = 0.55;

pub fn analyze(fields: &MarketFields, config: &ScoringConfig) -> Factor {
    let holder_count = fields.holder_count;
    let top_pct = fields.top_holder_pct;

    if holder_count.is_none() && top_pct.is_none() {
        return Factor {
            name: FACTOR_NAME.to_string(),
            weight: config.holders_weight,
            score: UNKNOWN_HOLDERS_SCORE,
            neutral: false,
            detail: "holder data unavailable".to_string(),
        };
    }

    let mut score: f64 = 0.0;
    let mut notes: Vec<String> = Vec::new();

    match top_pct {
        Some(pct) if pct > config.max_top_holder_pct => {
            // Scale from 0.6 at the threshold to 1.0 at full ownership
            let span = (100.0 - config.max_top_holder_pct).max(1.0);
            let over = ((pct - config.max_top_holder_pct) / span).clamp(0.0, 1.0);
            score += 0.6 + 0.4 * over;
            notes.push(format!("top holders control {:.1}%", pct));
        }
        Some(pct) => {
            score += 0.3 * (pct / config.max_top_holder_pct).clamp(0.0, 1.0);
            notes.push(format!("top holders {:.1}%", pct));
        }
        None => {
            score += 0.3;
            notes.push("concentration unknown".to_string());
        }
    }

    match holder_count {
        Some(count) if count < config.min_holder_count => {
            let shortfall =
                1.0 - (count as f64 / config.min_holder_count as f64).clamp(0.0, 1.0);
            score += 0.4 * shortfall;
            notes.push(format!("only {} holders", count));
        }
        Some(count) => {
            notes.push(format!("{} holders", count));
        }
        None => {
            score += 0.2;
            notes.push("holder count unknown".to_string());
        }
    }

    Factor {
        name: FACTOR_NAME.to_string(),
        weight: config.holders_weight,
        score: score.clamp(0.0, 1.0),
        neutral: false,
        detail: notes.join("; "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn missing_data_gets_moderate_penalty() {
        let factor = analyze(&MarketFields::default(), &config());
        assert_eq!(factor.score, UNKNOWN_HOLDERS_SCORE);
        assert!(!factor.neutral);
    }

    #[test]
    fn extreme_concentration_scores_high() {
        let fields = MarketFields {
            holder_count: Some(2_000),
            top_holder_pct: Some(92.0),
            ..MarketFields::default()
        };
        let factor = analyze(&fields, &config());
        assert!(factor.score > 0.85);
    }

    #[test]
    fn healthy_spread_scores_low() {
        let fields = MarketFields {
            holder_count: Some(5_000),
            top_holder_pct: Some(12.0),
            ..MarketFields::default()
        };
        let factor = analyze(&fields, &config());
        assert!(factor.score < 0.2);
    }

    #[test]
    fn tiny_holder_base_penalized() {
        let fields = MarketFields {
            holder_count: Some(8),
            top_holder_pct: Some(20.0),
            ..MarketFields::default()
        };
        let factor = analyze(&fields, &config());
        assert!(factor.score > 0.4);
    }
}
