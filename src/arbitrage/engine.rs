//! Streaming arbitrage detection over the latest quote per venue

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use crate::events::{ListenerId, Listeners};
use crate::types::{
    ArbitrageOpportunity, ArbitragePolicy, ExchangeId, OpportunityKey, PolicyUpdate, Quote, Symbol,
    MIN_AUTO_REFRESH_INTERVAL,
};
use super::evaluate_pair;

#[derive(Default)]
struct EngineState {
    policy: ArbitragePolicy,
    quotes: HashMap<Symbol, BTreeMap<ExchangeId, Quote>>,
    opportunities: HashMap<OpportunityKey, ArbitrageOpportunity>,
    ranked: Vec<ArbitrageOpportunity>,
}

impl EngineState {
    /// Re-evaluate every exchange pair quoting `symbol`.
    fn recompute_symbol(&mut self, symbol: &Symbol) {
        let Some(venues) = self.quotes.get(symbol) else {
            return;
        };
        if venues.len() < 2 {
            return;
        }

        let quotes: Vec<&Quote> = venues.values().collect();
        let mut upserts = Vec::new();
        let mut removals = Vec::new();

        for (i, a) in quotes.iter().enumerate() {
            for b in &quotes[i + 1..] {
                let forward = OpportunityKey::new(&a.exchange, &b.exchange, symbol);
                match evaluate_pair(a, b, &self.policy) {
                    Some(opportunity) => {
                        let key = opportunity.key();
                        removals.push(key.reversed());
                        upserts.push((key, opportunity));
                    }
                    None => {
                        removals.push(forward.reversed());
                        removals.push(forward);
                    }
                }
            }
        }

        for key in removals {
            self.opportunities.remove(&key);
        }
        self.opportunities.extend(upserts);
    }

    fn rank(&mut self) {
        let mut ranked: Vec<ArbitrageOpportunity> = self.opportunities.values().cloned().collect();
        ranked.sort_by(|a, b| {
            b.spread_percent
                .cmp(&a.spread_percent)
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked.truncate(self.policy.max_opportunities);
        self.ranked = ranked;
    }

    fn rebuild(&mut self) {
        self.opportunities.clear();
        if self.policy.enabled {
            let symbols: Vec<Symbol> = self.quotes.keys().cloned().collect();
            for symbol in &symbols {
                self.recompute_symbol(symbol);
            }
        }
        self.rank();
    }
}

struct EngineInner {
    state: Mutex<EngineState>,
    /// Held from mutation through emission so listeners see snapshots in
    /// the order the state changed.
    publish: Mutex<()>,
    listeners: Listeners<Vec<ArbitrageOpportunity>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

/// Keeps the latest quote per `(symbol, exchange)` and the ranked
/// opportunity list derived from it. Cheap to clone.
///
/// Opportunity listeners run under the publish lock and must not call the
/// engine's mutating methods.
#[derive(Clone)]
pub struct ArbitrageEngine {
    inner: Arc<EngineInner>,
}

impl ArbitrageEngine {
    pub fn new(policy: ArbitragePolicy) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    policy,
                    ..Default::default()
                }),
                publish: Mutex::new(()),
                listeners: Listeners::new(),
                refresh_task: Mutex::new(None),
            }),
        }
    }

    /// Handler to register with the session's `on_quote`.
    pub fn quote_handler(&self) -> impl Fn(&Quote) + Send + Sync + 'static {
        let engine = self.clone();
        move |quote: &Quote| engine.process_quote(quote)
    }

    /// Mutate the state and broadcast the resulting ranking, unless `change`
    /// reports nothing to publish.
    fn publish_with<F>(&self, change: F) -> Option<Vec<ArbitrageOpportunity>>
    where
        F: FnOnce(&mut EngineState) -> Option<Vec<ArbitrageOpportunity>>,
    {
        let _order = self.inner.publish.lock();
        let ranked = change(&mut *self.inner.state.lock())?;
        self.inner.listeners.emit(&ranked);
        Some(ranked)
    }

    pub fn process_quote(&self, quote: &Quote) {
        self.publish_with(|state| {
            let venues = state.quotes.entry(quote.symbol.clone()).or_default();
            venues.insert(quote.exchange.clone(), quote.clone());
            let venue_count = venues.len();

            if !state.policy.enabled || venue_count < 2 {
                return None;
            }
            state.recompute_symbol(&quote.symbol);
            state.rank();
            Some(state.ranked.clone())
        });
    }

    /// Rebuild every opportunity from the cached quotes.
    pub fn refresh_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        let ranked = self
            .publish_with(|state| {
                state.rebuild();
                Some(state.ranked.clone())
            })
            .unwrap_or_default();
        debug!(count = ranked.len(), "Opportunities refreshed");
        ranked
    }

    /// Forget an exchange that left the session: its cached quotes and every
    /// opportunity it takes part in. Returns whether anything was removed.
    pub fn remove_exchange(&self, exchange: &ExchangeId) -> bool {
        let removed = self.publish_with(|state| {
            let mut dropped_quotes = false;
            state.quotes.retain(|_, venues| {
                dropped_quotes |= venues.remove(exchange).is_some();
                !venues.is_empty()
            });
            let before = state.opportunities.len();
            state
                .opportunities
                .retain(|key, _| key.from_exchange != *exchange && key.to_exchange != *exchange);

            if !dropped_quotes && state.opportunities.len() == before {
                return None;
            }
            state.rank();
            Some(state.ranked.clone())
        });
        if removed.is_some() {
            info!(%exchange, "Removed exchange from arbitrage cache");
        }
        removed.is_some()
    }

    /// Handler to register with the session's `on_exchange_removed`.
    pub fn exchange_removed_handler(&self) -> impl Fn(&ExchangeId) + Send + Sync + 'static {
        let engine = self.clone();
        move |exchange: &ExchangeId| {
            engine.remove_exchange(exchange);
        }
    }

    pub fn get_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        self.inner.state.lock().ranked.clone()
    }

    pub fn get_opportunity_by_id(&self, id: &str) -> Option<ArbitrageOpportunity> {
        self.inner.state.lock().ranked.iter().find(|o| o.id == id).cloned()
    }

    pub fn policy(&self) -> ArbitragePolicy {
        self.inner.state.lock().policy.clone()
    }

    /// Apply a partial policy change. Inclusion changes trigger an immediate
    /// refresh; an interval change restarts a running auto-refresh.
    pub fn update_policy(&self, update: PolicyUpdate) -> ArbitragePolicy {
        let (policy, changed, interval_changed) = {
            let mut state = self.inner.state.lock();
            let interval_before = state.policy.auto_refresh_interval;
            let changed = state.policy.apply(&update);
            let policy = state.policy.clone();
            let interval_changed = policy.auto_refresh_interval != interval_before;
            (policy, changed, interval_changed)
        };

        info!(
            min_spread = %policy.min_spread_percent,
            max = policy.max_opportunities,
            only_profitable = policy.only_profitable,
            enabled = policy.enabled,
            "Arbitrage policy updated"
        );

        if changed {
            self.refresh_opportunities();
        }
        if interval_changed && self.is_auto_refreshing() {
            self.start_auto_refresh();
        }
        policy
    }

    pub fn on_opportunities<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Vec<ArbitrageOpportunity>) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    /// (Re)start the periodic refresh. Must be called inside a tokio runtime.
    pub fn start_auto_refresh(&self) {
        let period = self.policy().auto_refresh_interval.max(MIN_AUTO_REFRESH_INTERVAL);
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ArbitrageEngine { inner }.refresh_opportunities();
            }
        });

        if let Some(previous) = self.inner.refresh_task.lock().replace(handle) {
            previous.abort();
        }
        debug!(interval_ms = period.as_millis() as u64, "Auto-refresh started");
    }

    pub fn stop_auto_refresh(&self) {
        if let Some(handle) = self.inner.refresh_task.lock().take() {
            handle.abort();
            debug!("Auto-refresh stopped");
        }
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.inner
            .refresh_task
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Drop every cached quote and opportunity.
    pub fn clear(&self) {
        self.publish_with(|state| {
            state.quotes.clear();
            state.opportunities.clear();
            state.ranked.clear();
            Some(Vec::new())
        });
    }

    pub fn cached_quote_count(&self) -> usize {
        self.inner.state.lock().quotes.values().map(BTreeMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RiskLevel;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn quote(exchange: &str, symbol: &str, bid: Decimal, ask: Decimal) -> Quote {
        Quote::new(exchange, symbol, bid, ask)
    }

    #[test]
    fn test_single_opportunity_from_two_venues() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        assert!(engine.get_opportunities().is_empty());

        engine.process_quote(&quote("b", "BTC/USDT", dec!(102), dec!(103)));
        let opps = engine.get_opportunities();
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].from_exchange, ExchangeId::new("a"));
        assert_eq!(opps[0].to_exchange, ExchangeId::new("b"));
        assert_eq!(opps[0].spread_amount, dec!(2));
        assert!(engine.get_opportunity_by_id("a-b-BTC/USDT").is_some());
    }

    #[test]
    fn test_duplicate_quote_keeps_one_entry() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        let b = quote("b", "BTC/USDT", dec!(102), dec!(103));
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        engine.process_quote(&b);
        engine.process_quote(&b);
        assert_eq!(engine.get_opportunities().len(), 1);
    }

    #[test]
    fn test_orientation_flip_replaces_entry() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        engine.process_quote(&quote("b", "BTC/USDT", dec!(102), dec!(103)));
        engine.process_quote(&quote("a", "BTC/USDT", dec!(110), dec!(111)));

        let opps = engine.get_opportunities();
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].id, "b-a-BTC/USDT");
    }

    #[test]
    fn test_pair_falling_under_threshold_is_removed() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        engine.process_quote(&quote("b", "BTC/USDT", dec!(102), dec!(103)));
        engine.process_quote(&quote("b", "BTC/USDT", dec!(100.1), dec!(101.1)));
        assert!(engine.get_opportunities().is_empty());
    }

    #[test]
    fn test_ranked_and_capped() {
        let engine = ArbitrageEngine::new(ArbitragePolicy {
            max_opportunities: 2,
            ..ArbitragePolicy::default()
        });
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(100)));
        engine.process_quote(&quote("b", "BTC/USDT", dec!(101), dec!(101)));
        engine.process_quote(&quote("c", "BTC/USDT", dec!(103), dec!(103)));

        let opps = engine.get_opportunities();
        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].id, "a-c-BTC/USDT");
        assert!(opps[0].spread_percent >= opps[1].spread_percent);
    }

    #[test]
    fn test_symbols_do_not_mix() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        engine.process_quote(&quote("b", "ETH/USDT", dec!(102), dec!(103)));
        assert!(engine.get_opportunities().is_empty());
        assert_eq!(engine.cached_quote_count(), 2);
    }

    #[test]
    fn test_policy_update_refreshes() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        engine.process_quote(&quote("b", "BTC/USDT", dec!(102), dec!(103)));
        assert_eq!(engine.get_opportunities().len(), 1);

        let policy = engine.update_policy(PolicyUpdate {
            only_profitable: Some(true),
            ..Default::default()
        });
        assert!(policy.only_profitable);
        assert!(engine.get_opportunities().is_empty());

        engine.update_policy(PolicyUpdate {
            include_fees: Some(false),
            ..Default::default()
        });
        let opps = engine.get_opportunities();
        assert_eq!(opps.len(), 1);
        assert!(opps[0].profitable);
    }

    #[test]
    fn test_disabled_engine_caches_without_detecting() {
        let engine = ArbitrageEngine::new(ArbitragePolicy {
            enabled: false,
            ..ArbitragePolicy::default()
        });
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        engine.process_quote(&quote("b", "BTC/USDT", dec!(102), dec!(103)));
        assert!(engine.get_opportunities().is_empty());
        assert_eq!(engine.cached_quote_count(), 2);

        engine.update_policy(PolicyUpdate {
            enabled: Some(true),
            ..Default::default()
        });
        assert_eq!(engine.get_opportunities().len(), 1);
    }

    #[test]
    fn test_listeners_and_clear() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        let last_len = Arc::new(AtomicUsize::new(usize::MAX));
        {
            let last_len = Arc::clone(&last_len);
            engine.on_opportunities(move |opps| last_len.store(opps.len(), Ordering::SeqCst));
        }

        let handler = engine.quote_handler();
        handler(&quote("a", "BTC/USDT", dec!(100), dec!(101)).with_volume(dec!(50000)));
        handler(&quote("b", "BTC/USDT", dec!(102), dec!(103)).with_volume(dec!(80000)));
        assert_eq!(last_len.load(Ordering::SeqCst), 1);
        assert_eq!(engine.get_opportunities()[0].risk, RiskLevel::High);

        engine.clear();
        assert_eq!(last_len.load(Ordering::SeqCst), 0);
        assert_eq!(engine.cached_quote_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_lifecycle() {
        let engine = ArbitrageEngine::new(ArbitragePolicy {
            auto_refresh_interval: Duration::from_millis(100),
            ..ArbitragePolicy::default()
        });
        let refreshes = Arc::new(AtomicUsize::new(0));
        {
            let refreshes = Arc::clone(&refreshes);
            engine.on_opportunities(move |_| {
                refreshes.fetch_add(1, Ordering::SeqCst);
            });
        }

        engine.start_auto_refresh();
        assert!(engine.is_auto_refreshing());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let seen = refreshes.load(Ordering::SeqCst);
        assert!(seen >= 3, "only {} refreshes", seen);

        engine.stop_auto_refresh();
        assert!(!engine.is_auto_refreshing());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_update_keeps_refreshing() {
        let engine = ArbitrageEngine::new(ArbitragePolicy {
            auto_refresh_interval: Duration::from_millis(500),
            ..ArbitragePolicy::default()
        });
        let refreshes = Arc::new(AtomicUsize::new(0));
        {
            let refreshes = Arc::clone(&refreshes);
            engine.on_opportunities(move |_| {
                refreshes.fetch_add(1, Ordering::SeqCst);
            });
        }
        engine.start_auto_refresh();

        let policy = engine.update_policy(PolicyUpdate {
            auto_refresh_interval: Some(Duration::ZERO),
            ..Default::default()
        });
        assert_eq!(policy.auto_refresh_interval, MIN_AUTO_REFRESH_INTERVAL);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(engine.is_auto_refreshing());
        assert!(refreshes.load(Ordering::SeqCst) >= 3);
        engine.stop_auto_refresh();
    }

    #[test]
    fn test_remove_exchange_drops_quotes_and_opportunities() {
        let engine = ArbitrageEngine::new(ArbitragePolicy::default());
        engine.process_quote(&quote("a", "BTC/USDT", dec!(100), dec!(101)));
        engine.process_quote(&quote("b", "BTC/USDT", dec!(102), dec!(103)));
        engine.process_quote(&quote("b", "ETH/USDT", dec!(2000), dec!(2001)));
        assert_eq!(engine.get_opportunities().len(), 1);

        let handler = engine.exchange_removed_handler();
        handler(&ExchangeId::new("b"));

        assert!(engine.get_opportunities().is_empty());
        assert_eq!(engine.cached_quote_count(), 1);
        assert!(engine.refresh_opportunities().is_empty());
        assert!(!engine.remove_exchange(&ExchangeId::new("b")));
    }

    #[test]
    fn test_last_published_snapshot_matches_state() {
        let engine = ArbitrageEngine::new(ArbitragePolicy {
            min_spread_percent: dec!(0.1),
            ..ArbitragePolicy::default()
        });
        let last: Arc<Mutex<Vec<ArbitrageOpportunity>>> = Arc::default();
        {
            let last = Arc::clone(&last);
            engine.on_opportunities(move |opps| *last.lock() = opps.clone());
        }

        let workers: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .enumerate()
            .map(|(n, exchange)| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        let bid = dec!(100) + Decimal::from((i * 7 + n as u32 * 13) % 50) / dec!(10);
                        engine.process_quote(&quote(exchange, "BTC/USDT", bid, bid + dec!(0.1)));
                        if i % 25 == 0 {
                            engine.refresh_opportunities();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let summary = |opps: &[ArbitrageOpportunity]| {
            opps.iter()
                .map(|o| (o.id.clone(), o.spread_percent))
                .collect::<Vec<_>>()
        };
        assert_eq!(summary(&last.lock()), summary(&engine.get_opportunities()));
    }
}
