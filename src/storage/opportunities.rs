//! Arbitrage opportunity journal

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use crate::types::ArbitrageOpportunity;

pub fn save_opportunity(dir: &Path, opp: &ArbitrageOpportunity) -> Result<()> {
    let filename = dir.join(format!("arbitrage_{}.jsonl", Utc::now().format("%Y-%m-%d")));

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&filename)
        .with_context(|| format!("opening {}", filename.display()))?;

    writeln!(file, "{}", serde_json::to_string(opp)?)?;

    info!(
        opportunity_id = %opp.id,
        spread_percent = %opp.spread_percent.round_dp(3),
        net_profit = %opp.net_profit.round_dp(2),
        "Saved arbitrage opportunity"
    );

    Ok(())
}

/// Appends opportunities to the daily JSONL file, skipping any whose spread
/// has not changed since it was last written.
pub struct OpportunityJournal {
    dir: PathBuf,
    last_written: HashMap<String, Decimal>,
}

impl OpportunityJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_written: HashMap::new(),
        }
    }

    /// Returns how many records were written.
    pub fn record(&mut self, opportunities: &[ArbitrageOpportunity]) -> Result<usize> {
        let mut written = 0;
        for opp in opportunities {
            if self.last_written.get(&opp.id) == Some(&opp.spread_percent) {
                continue;
            }
            save_opportunity(&self.dir, opp)?;
            self.last_written.insert(opp.id.clone(), opp.spread_percent);
            written += 1;
        }
        Ok(written)
    }
}
