use serde::{Deserialize, Serialize};

use crate::error::{RagscopeError, Result};

/// Per-1k-token USD rates for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    pub input_rate_per_1k: f64,
    pub output_rate_per_1k: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_rate_per_1k: 0.00001,
            output_rate_per_1k: 0.00003,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CostBreakdown {
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

pub fn cost_usd(
    input_tokens: i64,
    output_tokens: i64,
    input_rate_per_1k: f64,
    output_rate_per_1k: f64,
) -> Result<f64> {
    let pricing = Pricing {
        input_rate_per_1k,
        output_rate_per_1k,
    };
    Ok(breakdown(input_tokens, output_tokens, &pricing)?.total_cost_usd)
}

pub fn breakdown(input_tokens: i64, output_tokens: i64, pricing: &Pricing) -> Result<CostBreakdown> {
    if input_tokens < 0 || output_tokens < 0 {
        return Err(RagscopeError::InvalidTokenCount {
            input_tokens,
            output_tokens,
        });
    }

    let input_cost_usd = input_tokens as f64 / 1000.0 * pricing.input_rate_per_1k;
    let output_cost_usd = output_tokens as f64 / 1000.0 * pricing.output_rate_per_1k;
    Ok(CostBreakdown {
        input_cost_usd,
        output_cost_usd,
        total_cost_usd: input_cost_usd + output_cost_usd,
    })
}
