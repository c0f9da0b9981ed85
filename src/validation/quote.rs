//! Quote sanity checks

use anyhow::Result;
use rust_decimal::prelude::*;
use crate::types::Quote;

pub fn validate_quote(quote: &Quote) -> Result<()> {
    if quote.bid <= Decimal::ZERO || quote.ask <= Decimal::ZERO {
        return Err(anyhow::anyhow!(
            "{} {} price is zero or negative: bid={} ask={}",
            quote.exchange, quote.symbol, quote.bid, quote.ask
        ));
    }

    if quote.bid > quote.ask {
        return Err(anyhow::anyhow!(
            "{} {} book is crossed: bid={} > ask={}",
            quote.exchange, quote.symbol, quote.bid, quote.ask
        ));
    }

    if let Some(volume) = quote.volume_24h {
        if volume < Decimal::ZERO {
            return Err(anyhow::anyhow!("{} {} negative volume: {}", quote.exchange, quote.symbol, volume));
        }
    }

    Ok(())
}
