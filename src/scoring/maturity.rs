//! Maturity analysis
//!
//! Most rugs die within hours of launch, so raw age is a usable prior.
//! Tokens younger than `young_age_hours` carry a high floor no matter how
//! good their market data looks; the penalty decays with survival time.

use crate::config::ScoringConfig;
use crate::types::{Factor, MarketFields};

pub const FACTOR_NAME: &str = "maturity";

pub fn analyze(age_hours: f64, fields: &MarketFields, config: &ScoringConfig) -> Factor {
    let mut notes: Vec<String> = Vec::new();

    let score = if age_hours < config.young_age_hours {
        // Inside the danger window: 0.9 at birth, 0.6 at the window edge
        let progress = (age_hours / config.young_age_hours).clamp(0.0, 1.0);
        notes.push(format!("{:.1}h old, inside the launch window", age_hours));
        0.9 - 0.3 * progress
    } else if age_hours < 24.0 {
        let progress = ((age_hours - config.young_age_hours)
            / (24.0 - config.young_age_hours))
            .clamp(0.0, 1.0);
        notes.push(format!("{:.1}h old", age_hours));
        0.6 - 0.3 * progress
    } else if age_hours < 24.0 * 7.0 {
        let progress = ((age_hours - 24.0) / (24.0 * 6.0)).clamp(0.0, 1.0);
        notes.push(format!("{:.1} days old", age_hours / 24.0));
        0.3 - 0.2 * progress
    } else {
        notes.push(format!("{:.0} days old", age_hours / 24.0));
        0.1
    };

    // A token still on the bonding curve has no locked DEX liquidity yet
    let score = match fields.bonding_curve_progress {
        Some(progress) if progress < 100.0 => {
            notes.push(format!("bonding curve at {:.0}%", progress));
            (score + 0.1_f64).min(1.0)
        }
        _ => score,
    };

    Factor {
        name: FACTOR_NAME.to_string(),
        weight: config.maturity_weight,
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
    fn fresh_launch_scores_high() {
        let factor = analyze(0.5, &MarketFields::default(), &config());
        assert!(factor.score > 0.8);
    }

    #[test]
    fn week_old_token_scores_low() {
        let factor = analyze(24.0 * 8.0, &MarketFields::default(), &config());
        assert!(factor.score <= 0.1 + f64::EPSILON);
    }

    #[test]
    fn penalty_decays_monotonically() {
        let cfg = config();
        let ages = [0.0, 2.0, 8.0, 20.0, 48.0, 24.0 * 10.0];
        let scores: Vec<f64> = ages
            .iter()
            .map(|&age| analyze(age, &MarketFields::default(), &cfg).score)
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1], "scores must not increase with age");
        }
    }

    #[test]
    fn incomplete_bonding_curve_adds_penalty() {
        let on_curve = MarketFields {
            bonding_curve_progress: Some(40.0),
            ..MarketFields::default()
        };
        let cfg = config();
        let with = analyze(30.0, &on_curve, &cfg).score;
        let without = analyze(30.0, &MarketFields::default(), &cfg).score;
        assert!(with > without);
    }
}
