//! Single-writer quote dispatcher

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use crate::events::Listeners;
use crate::exchange::QuoteHandler;
use crate::health::HealthMonitor;
use crate::types::{Quote, QuoteKey};
use crate::validation::validate_quote;
use super::{QuoteThrottle, ThrottleDecision};

const DROP_LOG_EVERY: u64 = 1000;

#[derive(Debug)]
enum DispatchMessage {
    Quote(u64, Quote),
    WindowExpired(QuoteKey),
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    emitted: AtomicU64,
    coalesced: AtomicU64,
    dropped: AtomicU64,
    invalid: AtomicU64,
}

/// Counters since the session started. `dropped` counts quotes superseded by
/// a newer one for the same key before the dispatcher saw them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub emitted: u64,
    pub coalesced: u64,
    pub dropped: u64,
    pub invalid: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [&self.received, &self.emitted, &self.coalesced, &self.dropped, &self.invalid] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn record_drop(&self, quote: &Quote) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed);
        if dropped % DROP_LOG_EVERY == 0 {
            warn!(exchange = %quote.exchange, dropped = dropped + 1, "⚠️ Dispatch buffer full, keeping latest quote only");
        }
    }
}

/// Latest quote per key that did not fit in the channel. Sequence numbers
/// order entries against quotes still queued in the channel.
#[derive(Default)]
struct Overflow {
    latest: Mutex<HashMap<QuoteKey, (u64, Quote)>>,
    ready: Notify,
}

impl Overflow {
    /// Returns the quote this one replaced, if any.
    fn stash(&self, seq: u64, quote: Quote) -> Option<Quote> {
        let key = quote.key();
        let replaced = {
            let mut latest = self.latest.lock();
            if latest.get(&key).is_some_and(|(existing, _)| *existing > seq) {
                Some(quote)
            } else {
                latest.insert(key, (seq, quote)).map(|(_, q)| q)
            }
        };
        self.ready.notify_one();
        replaced
    }

    fn take(&self) -> Vec<(u64, Quote)> {
        let mut drained: Vec<(u64, Quote)> = self.latest.lock().drain().map(|(_, entry)| entry).collect();
        drained.sort_by_key(|(seq, _)| *seq);
        drained
    }
}

/// Window timers still running. Dropping the set aborts them, so cancelling
/// the dispatcher task cancels every timer with it.
#[derive(Default)]
struct WindowTimers(HashMap<QuoteKey, JoinHandle<()>>);

impl WindowTimers {
    fn schedule(&mut self, key: QuoteKey, window: std::time::Duration, tx: &mpsc::Sender<DispatchMessage>) {
        let tx = tx.clone();
        let expiry_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = tx.send(DispatchMessage::WindowExpired(expiry_key)).await;
        });
        if let Some(previous) = self.0.insert(key, handle) {
            previous.abort();
        }
    }

    fn finished(&mut self, key: &QuoteKey) {
        self.0.remove(key);
    }
}

impl Drop for WindowTimers {
    fn drop(&mut self) {
        for (_, handle) in self.0.drain() {
            handle.abort();
        }
    }
}

/// State owned by the dispatcher task
struct DispatchLoop {
    throttle: QuoteThrottle,
    timers: WindowTimers,
    last_seq: HashMap<QuoteKey, u64>,
    tx: mpsc::Sender<DispatchMessage>,
    listeners: Arc<Listeners<Quote>>,
    health: Arc<HealthMonitor>,
    stats: Arc<DispatchStats>,
}

impl DispatchLoop {
    fn on_quote(&mut self, seq: u64, quote: Quote) {
        if let Err(e) = validate_quote(&quote) {
            self.stats.invalid.fetch_add(1, Ordering::Relaxed);
            warn!("⚠️ Dropping invalid quote: {}", e);
            return;
        }

        let key = quote.key();
        match self.last_seq.get(&key) {
            Some(last) if *last > seq => {
                self.stats.record_drop(&quote);
                return;
            }
            _ => {
                self.last_seq.insert(key.clone(), seq);
            }
        }
        self.health.record_quote(&quote.exchange);

        match self.throttle.on_quote(&quote) {
            ThrottleDecision::Emit => {
                self.timers.schedule(key, self.throttle.window(), &self.tx);
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
                self.listeners.emit(&quote);
            }
            ThrottleDecision::Coalesced => {
                self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn on_window_expired(&mut self, key: QuoteKey) {
        self.timers.finished(&key);
        if let Some(quote) = self.throttle.on_window_expired(&key) {
            self.timers.schedule(key, self.throttle.window(), &self.tx);
            self.stats.emitted.fetch_add(1, Ordering::Relaxed);
            self.listeners.emit(&quote);
        }
    }
}

/// Owns the throttle map. Connections feed it through [`QuoteDispatcher::quote_handler`],
/// which never blocks. When the buffer is full only the latest quote per key
/// is kept until the dispatcher catches up.
pub struct QuoteDispatcher {
    tx: mpsc::Sender<DispatchMessage>,
    overflow: Arc<Overflow>,
    next_seq: Arc<AtomicU64>,
    task: JoinHandle<()>,
    stats: Arc<DispatchStats>,
}

impl QuoteDispatcher {
    pub fn spawn(
        max_updates_per_second: u32,
        buffer: usize,
        listeners: Arc<Listeners<Quote>>,
        health: Arc<HealthMonitor>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel(buffer.max(1));
        let overflow = Arc::new(Overflow::default());

        let mut state = DispatchLoop {
            throttle: QuoteThrottle::new(max_updates_per_second),
            timers: WindowTimers::default(),
            last_seq: HashMap::new(),
            tx: tx.clone(),
            listeners,
            health,
            stats: Arc::clone(&stats),
        };
        let loop_overflow = Arc::clone(&overflow);

        let task = tokio::spawn(async move {
            loop {
                // overflow first: it holds the newest value per key and drains in one go
                tokio::select! {
                    biased;
                    _ = loop_overflow.ready.notified() => {
                        for (seq, quote) in loop_overflow.take() {
                            state.on_quote(seq, quote);
                        }
                    }
                    message = rx.recv() => {
                        match message {
                            Some(DispatchMessage::Quote(seq, quote)) => state.on_quote(seq, quote),
                            Some(DispatchMessage::WindowExpired(key)) => state.on_window_expired(key),
                            None => break,
                        }
                    }
                }
            }
            debug!("Quote dispatcher stopped");
        });

        Self {
            tx,
            overflow,
            next_seq: Arc::new(AtomicU64::new(0)),
            task,
            stats,
        }
    }

    /// Handler to register on every exchange connection.
    pub fn quote_handler(&self) -> QuoteHandler {
        let tx = self.tx.clone();
        let overflow = Arc::clone(&self.overflow);
        let next_seq = Arc::clone(&self.next_seq);
        let stats = Arc::clone(&self.stats);
        Arc::new(move |quote: &Quote| {
            stats.received.fetch_add(1, Ordering::Relaxed);
            let seq = next_seq.fetch_add(1, Ordering::Relaxed);
            match tx.try_send(DispatchMessage::Quote(seq, quote.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(DispatchMessage::Quote(seq, quote))) => {
                    if let Some(replaced) = overflow.stash(seq, quote) {
                        stats.record_drop(&replaced);
                    }
                }
                Err(_) => {}
            }
        })
    }

    /// Stop delivery. Returns once the task has finished, so no listener runs
    /// after this resolves.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
