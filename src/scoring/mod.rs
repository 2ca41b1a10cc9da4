//! Composite risk and investability scoring
//!
//! Four weighted sub-analyzers produce 0..1 suspicion scores which combine
//! into a 0-100 risk score. Every factor always reports, with a defined
//! neutral value when its data is missing, so two tokens scored by the same
//! engine are always comparable. The invest score is computed independently
//! from growth and liquidity quality rather than as an inverse of risk.

pub mod holders;
pub mod liquidity;
pub mod maturity;
pub mod patterns;

use crate::config::ScoringConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::sources::is_valid_mint;
use crate::types::{CanonicalToken, Factor, ScoreResult, Snapshot};
use chrono::{DateTime, Utc};

/// Midpoint reported by analyzers that have no usable data
pub const NEUTRAL_SCORE: f64 = 0.5;

pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score one token against its snapshot history.
    ///
    /// The reference time is the token's own `updated_at`, so scoring the
    /// same token twice yields identical results. History must be in
    /// ascending timestamp order, which is how the store returns it.
    pub fn score(
        &self,
        token: &CanonicalToken,
        history: &[Snapshot],
    ) -> PipelineResult<ScoreResult> {
        self.score_at(token, history, token.updated_at)
    }

    /// Score with an explicit reference time for the maturity analyzer.
    pub fn score_at(
        &self,
        token: &CanonicalToken,
        history: &[Snapshot],
        now: DateTime<Utc>,
    ) -> PipelineResult<ScoreResult> {
        if !is_valid_mint(&token.mint) {
            return Err(PipelineError::InvalidTokenState {
                mint: token.mint.clone(),
                reason: "not a valid mint address".to_string(),
            });
        }

        let age = token.age_hours(now);
        let fields = &token.market_fields;

        let mut factors = vec![
            liquidity::analyze(fields, &self.config),
            holders::analyze(fields, &self.config),
            patterns::analyze(fields, history, &self.config),
            maturity::analyze(age, fields, &self.config),
        ];

        let weight_sum: f64 = factors.iter().map(|f| f.weight).sum();
        let weighted: f64 = factors.iter().map(|f| f.weight * f.score).sum();
        let risk_score = if weight_sum > 0.0 {
            (weighted / weight_sum * 100.0).clamp(0.0, 100.0)
        } else {
            NEUTRAL_SCORE * 100.0
        };

        let (mut invest_score, invest_factors) = self.invest_score(token, history);
        if risk_score >= self.config.blacklist_threshold {
            invest_score = invest_score.min(self.config.blacklisted_invest_cap);
        }
        factors.extend(invest_factors);

        Ok(ScoreResult {
            risk_score,
            invest_score,
            factors,
        })
    }

    /// Investability from growth trends and liquidity quality, 0-100.
    ///
    /// Deliberately not `100 - risk`: a dying but safe token should score
    /// low, and a risky token with real momentum should not score high just
    /// because it is moving.
    fn invest_score(
        &self,
        token: &CanonicalToken,
        history: &[Snapshot],
    ) -> (f64, Vec<Factor>) {
        let fields = &token.market_fields;
        let mut factors = Vec::new();

        // Liquidity quality: depth relative to target, 0..1
        let depth = match fields.liquidity_usd {
            Some(liquidity) => (liquidity / self.config.target_liquidity_usd).clamp(0.0, 1.0),
            None => 0.0,
        };
        factors.push(Factor {
            name: "invest_liquidity".to_string(),
            weight: 0.4,
            score: depth,
            neutral: fields.liquidity_usd.is_none(),
            detail: match fields.liquidity_usd {
                Some(l) => format!("depth ${:.0} against ${:.0} target", l, self.config.target_liquidity_usd),
                None => "liquidity unknown".to_string(),
            },
        });

        // Activity: real two-sided trading with buy pressure
        let activity = match (fields.txns_24h_buys, fields.txns_24h_sells) {
            (Some(buys), Some(sells)) if buys + sells >= self.config.min_txn_samples => {
                let total = (buys + sells) as f64;
                let buy_share = buys as f64 / total;
                let volume_depth = (total / 500.0).clamp(0.0, 1.0);
                (buy_share * volume_depth).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };
        factors.push(Factor {
            name: "invest_momentum".to_string(),
            weight: 0.3,
            score: activity,
            neutral: false,
            detail: format!(
                "24h trades {}",
                fields.txns_24h_total().unwrap_or(0)
            ),
        });

        // Growth: holders and liquidity trending up across history
        let growth = growth_trend(fields.holder_count, fields.liquidity_usd, history);
        factors.push(Factor {
            name: "invest_growth".to_string(),
            weight: 0.3,
            score: growth,
            neutral: history.len() < 2,
            detail: if history.len() < 2 {
                "not enough history for a trend".to_string()
            } else {
                format!("trend over {} snapshots", history.len())
            },
        });

        let weight_sum: f64 = factors.iter().map(|f| f.weight).sum();
        let weighted: f64 = factors.iter().map(|f| f.weight * f.score).sum();
        let score = (weighted / weight_sum * 100.0).clamp(0.0, 100.0);
        (score, factors)
    }

    /// Check whether the current state confirms a rug against history.
    ///
    /// Returns the blacklist reason when confirmed. Two triggers: liquidity
    /// collapsing off its historical peak, and near-total supply
    /// concentration.
    pub fn confirm_rug(&self, token: &CanonicalToken, history: &[Snapshot]) -> Option<String> {
        if let Some(current) = token.market_fields.liquidity_usd {
            let peak = history
                .iter()
                .filter_map(|s| s.market_fields.liquidity_usd)
                .fold(0.0_f64, f64::max);
            // Only a collapse from a real peak counts; pools that never had
            // liquidity are handled by ordinary scoring
            if peak >= self.config.min_liquidity_usd {
                let drop_pct = (1.0 - current / peak) * 100.0;
                if drop_pct >= self.config.rug_liquidity_drop_pct {
                    return Some(format!(
                        "liquidity collapsed {:.0}% from ${:.0} peak",
                        drop_pct, peak
                    ));
                }
            }
        }

        if let Some(pct) = token.market_fields.top_holder_pct {
            if pct >= 95.0 {
                return Some(format!("top holders control {:.1}% of supply", pct));
            }
        }

        None
    }
}

fn growth_trend(
    holder_count: Option<i64>,
    liquidity_usd: Option<f64>,
    history: &[Snapshot],
) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }
    let first = &history[0];
    let mut score = 0.0_f64;
    let mut signals = 0usize;

    if let (Some(h0), Some(h1)) = (first.market_fields.holder_count, holder_count) {
        if h0 > 0 {
            signals += 1;
            let ratio = h1 as f64 / h0 as f64;
            if ratio > 1.0 {
                score += ((ratio - 1.0) * 2.0).clamp(0.0, 1.0);
            }
        }
    }
    if let (Some(l0), Some(l1)) = (first.market_fields.liquidity_usd, liquidity_usd) {
        if l0 > 0.0 {
            signals += 1;
            let ratio = l1 / l0;
            if ratio > 1.0 {
                score += ((ratio - 1.0) * 2.0).clamp(0.0, 1.0);
            }
        }
    }

    if signals == 0 {
        0.0
    } else {
        (score / signals as f64).clamp(0.0, 1.0)
    }
}
