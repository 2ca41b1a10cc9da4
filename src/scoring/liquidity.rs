//! Liquidity analysis: depth floor and pool concentration
//!
//! Thin liquidity is the strongest single rug signal: a creator can drain a
//! shallow pool in one transaction. Liquidity concentrated in a single pool
//! adds a smaller penalty on top.

use crate::config::ScoringConfig;
use crate::scoring::NEUTRAL_SCORE;
use crate::types::{Factor, MarketFields};

pub const FACTOR_NAME: &str = "liquidity";

pub fn analyze(fields: &MarketFields, config: &ScoringConfig) -> Factor {
    let Some(liquidity) = fields.liquidity_usd else {
        return Factor {
            name: FACTOR_NAME.to_string(),
            weight: config.liquidity_weight,
            score: NEUTRAL_SCORE,
            neutral: true,
            detail: "liquidity unknown".to_string(),
        };
    };

    let mut score;
    let mut notes: Vec<String> = Vec::new();

    if liquidity < config.min_liquidity_usd {
        // Below the floor: scale from 0.75 at the floor up to 1.0 at zero
        let shortfall = 1.0 - (liquidity / config.min_liquidity_usd).clamp(0.0, 1.0);
        score = 0.75 + 0.25 * shortfall;
        notes.push(format!(
            "liquidity ${:.0} below ${:.0} floor",
            liquidity, config.min_liquidity_usd
        ));
    } else {
        // Between floor and target: fade from 0.5 down to 0.1
        let span = (config.target_liquidity_usd - config.min_liquidity_usd).max(1.0);
        let depth = ((liquidity - config.min_liquidity_usd) / span).clamp(0.0, 1.0);
        score = 0.5 - 0.4 * depth;
        notes.push(format!("liquidity ${:.0}", liquidity));
    }

    // Single-pool concentration: everything sits behind one exit door
    if fields.pool_count == Some(1) && liquidity >= config.min_liquidity_usd {
        score = (score + 0.15_f64).min(1.0);
        notes.push("all liquidity in a single pool".to_string());
    }

    Factor {
        name: FACTOR_NAME.to_string(),
        weight: config.liquidity_weight,
        score,
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
    fn unknown_liquidity_is_neutral() {
        let factor = analyze(&MarketFields::default(), &config());
        assert!(factor.neutral);
        assert_eq!(factor.score, NEUTRAL_SCORE);
    }

    #[test]
    fn below_floor_is_flagged() {
        let fields = MarketFields {
            liquidity_usd: Some(500.0),
            ..MarketFields::default()
        };
        let factor = analyze(&fields, &config());
        assert!(factor.score > 0.75);
        assert!(!factor.neutral);
    }

    #[test]
    fn deep_liquidity_scores_low() {
        let fields = MarketFields {
            liquidity_usd: Some(100_000.0),
            pool_count: Some(3),
            ..MarketFields::default()
        };
        let factor = analyze(&fields, &config());
        assert!(factor.score <= 0.15);
    }

    #[test]
    fn single_pool_adds_penalty() {
        let base = MarketFields {
            liquidity_usd: Some(60_000.0),
            pool_count: Some(3),
            ..MarketFields::default()
        };
        let single = MarketFields {
            pool_count: Some(1),
            ..base.clone()
        };
        assert!(analyze(&single, &config()).score > analyze(&base, &config()).score);
    }
}
