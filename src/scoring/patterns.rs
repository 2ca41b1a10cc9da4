//! Trading pattern analysis: wash trading and coordinated-pump heuristics
//!
//! Works off the transaction counters and the snapshot history. With fewer
//! samples than `min_txn_samples` the factor reports the neutral midpoint;
//! a handful of trades proves nothing either way.

use crate::config::ScoringConfig;
use crate::scoring::NEUTRAL_SCORE;
use crate::types::{Factor, MarketFields, Snapshot};

pub const FACTOR_NAME: &str = "trading_patterns";

pub fn analyze(fields: &MarketFields, history: &[Snapshot], config: &ScoringConfig) -> Factor {
    let samples = fields.txns_24h_total().unwrap_or(0);
    if samples < config.min_txn_samples {
        return Factor {
            name: FACTOR_NAME.to_string(),
            weight: config.patterns_weight,
            score: NEUTRAL_SCORE,
            neutral: true,
            detail: format!("only {} trades in 24h, not enough signal", samples),
        };
    }

    let mut score: f64 = 0.0;
    let mut notes: Vec<String> = Vec::new();

    // Volume far above liquidity means the same money is cycling through
    // the pool. Organic markets rarely exceed a few turns per day.
    if let (Some(volume), Some(liquidity)) = (fields.volume_24h, fields.liquidity_usd) {
        if liquidity > 0.0 {
            let ratio = volume / liquidity;
            if ratio > config.max_volume_liquidity_ratio {
                let over = (ratio / config.max_volume_liquidity_ratio - 1.0).clamp(0.0, 1.0);
                score += 0.4 + 0.2 * over;
                notes.push(format!("volume {:.1}x liquidity", ratio));
            }
        }
    }

    // Near-perfect buy/sell symmetry with high counts is the wash signature
    if let (Some(buys), Some(sells)) = (fields.txns_24h_buys, fields.txns_24h_sells) {
        let total = buys + sells;
        if total >= config.min_txn_samples && buys > 0 && sells > 0 {
            let balance = (buys.min(sells) as f64) / (buys.max(sells) as f64);
            if balance > 0.92 && total > 200 {
                score += 0.3;
                notes.push(format!("suspicious buy/sell symmetry ({}/{})", buys, sells));
            }
            // Heavy one-sided selling after the pump
            let sell_share = sells as f64 / total as f64;
            if sell_share > 0.8 {
                score += 0.25;
                notes.push(format!("{:.0}% of trades are sells", sell_share * 100.0));
            }
        }
    }

    // Volume spiking while holders stagnate means a few wallets are doing
    // all the trading
    if history.len() >= 2 {
        let oldest = &history[0];
        let newest = &history[history.len() - 1];
        if let (Some(v0), Some(v1)) = (oldest.market_fields.volume_24h, newest.market_fields.volume_24h) {
            let volume_grew = v0 > 0.0 && v1 / v0 > 3.0;
            let holders_flat = match (oldest.market_fields.holder_count, newest.market_fields.holder_count) {
                (Some(h0), Some(h1)) if h0 > 0 => (h1 as f64 / h0 as f64) < 1.1,
                _ => false,
            };
            if volume_grew && holders_flat {
                score += 0.3;
                notes.push("volume surged without new holders".to_string());
            }
        }
    }

    if notes.is_empty() {
        notes.push(format!("{} trades in 24h, no anomalies", samples));
    }

    Factor {
        name: FACTOR_NAME.to_string(),
        weight: config.patterns_weight,
        score: score.clamp(0.0, 1.0),
        neutral: false,
        detail: notes.join("; "),
    }
}
