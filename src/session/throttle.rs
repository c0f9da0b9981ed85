//! Per-key quote coalescing

use std::collections::HashMap;
use std::time::Duration;
use crate::types::{Quote, QuoteKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Deliver now and open a window for the key
    Emit,
    /// Held as the pending value of an open window
    Coalesced,
}

/// Window state for every `(exchange, symbol)` key.
///
/// The first quote for a key is emitted immediately and opens a window. Quotes
/// arriving inside the window replace the pending value. When the window
/// expires the pending value is emitted and a new window starts; an empty
/// window retires the key. Timing is driven by the caller.
#[derive(Debug)]
pub struct QuoteThrottle {
    window: Duration,
    windows: HashMap<QuoteKey, Option<Quote>>,
}

impl QuoteThrottle {
    pub fn new(max_updates_per_second: u32) -> Self {
        let rate = max_updates_per_second.max(1) as u64;
        Self {
            window: Duration::from_millis(1000 / rate),
            windows: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn on_quote(&mut self, quote: &Quote) -> ThrottleDecision {
        match self.windows.get_mut(&quote.key()) {
            Some(pending) => {
                *pending = Some(quote.clone());
                ThrottleDecision::Coalesced
            }
            None => {
                self.windows.insert(quote.key(), None);
                ThrottleDecision::Emit
            }
        }
    }

    /// Returns the value to emit. `Some` means the window was renewed and the
    /// caller must schedule another expiry; `None` retires the key.
    pub fn on_window_expired(&mut self, key: &QuoteKey) -> Option<Quote> {
        let pending = self.windows.get_mut(key)?.take();
        if pending.is_none() {
            self.windows.remove(key);
        }
        pending
    }

    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}
