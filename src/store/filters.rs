//! Query types for dashboard-style filtering over canonical tokens

use crate::types::{CanonicalToken, TokenStatus};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSortKey {
    Symbol,
    LiquidityUsd,
    Volume24h,
    MarketCap,
    HolderCount,
    RiskScore,
    InvestScore,
    AgeHours,
    UpdatedAt,
    Mint,
}

/// Filter set backing dashboard table views and strategy presets.
///
/// All bounds are optional; unset bounds match everything. A numeric bound
/// never matches a token whose field is unknown: presets asking for
/// "liquidity above X" must not surface tokens that report no liquidity.
#[derive(Debug, Clone, Default)]
pub struct TokenQuery {
    pub status: Option<TokenStatus>,
    /// Soft-removed states are hidden unless explicitly requested
    pub include_archived: bool,
    pub symbol_contains: Option<String>,
    pub min_liquidity_usd: Option<f64>,
    pub max_liquidity_usd: Option<f64>,
    pub min_volume_24h: Option<f64>,
    pub max_volume_24h: Option<f64>,
    pub min_holder_count: Option<i64>,
    pub max_holder_count: Option<i64>,
    pub min_age_hours: Option<f64>,
    pub max_age_hours: Option<f64>,
    pub min_risk_score: Option<f64>,
    pub max_risk_score: Option<f64>,
    pub min_invest_score: Option<f64>,
    pub max_invest_score: Option<f64>,
    pub sort_key: Option<TokenSortKey>,
    pub sort_direction: Option<SortDirection>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TokenQuery {
    pub fn matches(&self, token: &CanonicalToken, now: DateTime<Utc>) -> bool {
        if let Some(status) = self.status {
            if token.status != status {
                return false;
            }
        } else if !self.include_archived
            && matches!(token.status, TokenStatus::Archived | TokenStatus::Blacklisted)
        {
            return false;
        }

        if let Some(needle) = &self.symbol_contains {
            let needle = needle.to_lowercase();
            let symbol_hit = token
                .symbol
                .as_ref()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false);
            let name_hit = token
                .name
                .as_ref()
                .map(|n| n.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !symbol_hit && !name_hit {
                return false;
            }
        }

        if !range_f64(
            token.market_fields.liquidity_usd,
            self.min_liquidity_usd,
            self.max_liquidity_usd,
        ) {
            return false;
        }
        if !range_f64(
            token.market_fields.volume_24h,
            self.min_volume_24h,
            self.max_volume_24h,
        ) {
            return false;
        }
        if !range_i64(
            token.market_fields.holder_count,
            self.min_holder_count,
            self.max_holder_count,
        ) {
            return false;
        }

        let age = token.age_hours(now);
        if let Some(min) = self.min_age_hours {
            if age < min {
                return false;
            }
        }
        if let Some(max) = self.max_age_hours {
            if age > max {
                return false;
            }
        }

        if !range_f64(Some(token.risk_score), self.min_risk_score, self.max_risk_score) {
            return false;
        }
        if !range_f64(
            Some(token.invest_score),
            self.min_invest_score,
            self.max_invest_score,
        ) {
            return false;
        }

        true
    }

    /// Sort comparator for the selected key; unknown values sort last
    pub fn compare(&self, a: &CanonicalToken, b: &CanonicalToken, now: DateTime<Utc>) -> std::cmp::Ordering {
        let key = self.sort_key.unwrap_or(TokenSortKey::UpdatedAt);
        let ordering = match key {
            TokenSortKey::Symbol => a.symbol.cmp(&b.symbol),
            TokenSortKey::LiquidityUsd => cmp_f64(
                a.market_fields.liquidity_usd,
                b.market_fields.liquidity_usd,
            ),
            TokenSortKey::Volume24h => {
                cmp_f64(a.market_fields.volume_24h, b.market_fields.volume_24h)
            }
            TokenSortKey::MarketCap => cmp_f64(a.market_fields.market_cap, b.market_fields.market_cap),
            TokenSortKey::HolderCount => a
                .market_fields
                .holder_count
                .unwrap_or(i64::MIN)
                .cmp(&b.market_fields.holder_count.unwrap_or(i64::MIN)),
            TokenSortKey::RiskScore => cmp_f64(Some(a.risk_score), Some(b.risk_score)),
            TokenSortKey::InvestScore => cmp_f64(Some(a.invest_score), Some(b.invest_score)),
            TokenSortKey::AgeHours => cmp_f64(Some(a.age_hours(now)), Some(b.age_hours(now))),
            TokenSortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            TokenSortKey::Mint => a.mint.cmp(&b.mint),
        };
        match self.sort_direction.unwrap_or(SortDirection::Desc) {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

fn range_f64(value: Option<f64>, min: Option<f64>, max: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(v) = value else {
        // Bounded queries never match unknown values
        return false;
    };
    if let Some(min) = min {
        if v < min {
            return false;
        }
    }
    if let Some(max) = max {
        if v > max {
            return false;
        }
    }
    true
}

fn range_i64(value: Option<i64>, min: Option<i64>, max: Option<i64>) -> bool {
    range_f64(
        value.map(|v| v as f64),
        min.map(|v| v as f64),
        max.map(|v| v as f64),
    )
}

fn cmp_f64(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    let a = a.unwrap_or(f64::MIN);
    let b = b.unwrap_or(f64::MIN);
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}

/// Query result with paging metadata
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub items: Vec<CanonicalToken>,
    pub total: usize,
    pub offset: usize,
}
