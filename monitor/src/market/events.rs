//! Typed market events consumed by the engine.
//!
//! Events are immutable once built. Timestamps are event-time milliseconds and
//! may arrive out of order; the state store is responsible for ordering.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A single swap executed against a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapEvent {
    pub pool: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
    pub amount_out: f64,
    pub ts_ms: u64,
}

/// Observed price of an asset from some source (feed, oracle pool, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub asset: String,
    pub price: f64,
    pub ts_ms: u64,
    pub source: String,
}

/// Pool reserves after a liquidity change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityEvent {
    pub pool: String,
    pub reserve0: f64,
    pub reserve1: f64,
    pub ts_ms: u64,
}

/// Out-of-band announcement about a protocol (upgrade, parameter change, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolUpdateEvent {
    pub protocol: String,
    pub description: String,
    pub ts_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    Swap(SwapEvent),
    PriceTick(PriceTick),
    Liquidity(LiquidityEvent),
    ProtocolUpdate(ProtocolUpdateEvent),
}

impl MarketEvent {
    pub fn ts_ms(&self) -> u64 {
        match self {
            MarketEvent::Swap(e) => e.ts_ms,
            MarketEvent::PriceTick(e) => e.ts_ms,
            MarketEvent::Liquidity(e) => e.ts_ms,
            MarketEvent::ProtocolUpdate(e) => e.ts_ms,
        }
    }

    /// Identifier used for partitioning and state lookup.
    pub fn subject_key(&self) -> &str {
        match self {
            MarketEvent::Swap(e) => &e.pool,
            MarketEvent::PriceTick(e) => &e.asset,
            MarketEvent::Liquidity(e) => &e.pool,
            MarketEvent::ProtocolUpdate(e) => &e.protocol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarketEvent::Swap(_) => "swap",
            MarketEvent::PriceTick(_) => "price_tick",
            MarketEvent::Liquidity(_) => "liquidity",
            MarketEvent::ProtocolUpdate(_) => "protocol_update",
        }
    }

    /// Rejects events whose fields would give detectors undefined inputs.
    pub fn validate(&self) -> Result<(), EngineError> {
        let subject = self.subject_key();
        if subject.trim().is_empty() {
            return Err(EngineError::malformed("<empty>", "empty subject key"));
        }

        match self {
            MarketEvent::Swap(e) => {
                if e.token_in.is_empty() || e.token_out.is_empty() {
                    return Err(EngineError::malformed(subject, "swap without token ids"));
                }
                non_negative(subject, "amount_in", e.amount_in)?;
                non_negative(subject, "amount_out", e.amount_out)?;
                if e.amount_in == 0.0 {
                    return Err(EngineError::malformed(subject, "amount_in must be positive"));
                }
                Ok(())
            }
            MarketEvent::PriceTick(e) => {
                non_negative(subject, "price", e.price)?;
                if e.price == 0.0 {
                    return Err(EngineError::malformed(subject, "price must be positive"));
                }
                Ok(())
            }
            MarketEvent::Liquidity(e) => {
                non_negative(subject, "reserve0", e.reserve0)?;
                non_negative(subject, "reserve1", e.reserve1)
            }
            MarketEvent::ProtocolUpdate(_) => Ok(()),
        }
    }
}

fn non_negative(subject: &str, field: &str, v: f64) -> Result<(), EngineError> {
    if !v.is_finite() || v < 0.0 {
        return Err(EngineError::malformed(
            subject,
            format!("{field} must be finite and non-negative, got {v}"),
        ));
    }
    Ok(())
}
