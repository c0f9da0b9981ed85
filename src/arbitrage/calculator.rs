//! Arbitrage opportunity calculation

use chrono::Utc;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use crate::types::{ArbitrageOpportunity, ArbitragePolicy, FeeBreakdown, OpportunityKey, Quote, RiskLevel};

const HIGH_RISK_SPREAD_PERCENT: Decimal = dec!(5);
const LOW_RISK_SPREAD_PERCENT: Decimal = dec!(1);
const THIN_VOLUME: Decimal = dec!(100000);
const DEEP_VOLUME: Decimal = dec!(1000000);

/// Compare two quotes for the same symbol on different exchanges.
///
/// Returns `None` when the pair does not qualify under `policy`: the spread is
/// under the minimum, or it is unprofitable while only profitable pairs are
/// wanted. The cheaper side is always `from_exchange`; equal mids fall back to
/// exchange id order so the result does not depend on argument order.
pub fn evaluate_pair(a: &Quote, b: &Quote, policy: &ArbitragePolicy) -> Option<ArbitrageOpportunity> {
    let mid_a = a.mid_price();
    let mid_b = b.mid_price();

    let a_buys = mid_a < mid_b || (mid_a == mid_b && a.exchange <= b.exchange);
    let (buy, sell) = if a_buys { (a, b) } else { (b, a) };
    let buy_price = buy.mid_price();
    let sell_price = sell.mid_price();

    if buy_price <= Decimal::ZERO {
        return None;
    }

    let spread_amount = sell_price - buy_price;
    let spread_percent = spread_amount / buy_price * dec!(100);
    if spread_percent < policy.min_spread_percent {
        return None;
    }

    let volume_24h = buy
        .volume_24h
        .unwrap_or_default()
        .min(sell.volume_24h.unwrap_or_default());

    let fees = if policy.include_fees {
        FeeBreakdown {
            trading_fees: sell_price * policy.trading_fee_percent / dec!(100) * dec!(2),
            network_fees: policy.network_fee_usd,
        }
    } else {
        FeeBreakdown::default()
    };

    let estimated_profit = spread_amount;
    let net_profit = estimated_profit - fees.total();
    let profitable = net_profit > Decimal::ZERO;
    if policy.only_profitable && !profitable {
        return None;
    }

    let key = OpportunityKey::new(&buy.exchange, &sell.exchange, &buy.symbol);
    Some(ArbitrageOpportunity {
        id: key.id(),
        timestamp: Utc::now(),
        symbol: key.symbol,
        from_exchange: key.from_exchange,
        to_exchange: key.to_exchange,
        buy_price,
        sell_price,
        spread_amount,
        spread_percent,
        volume_24h,
        estimated_profit,
        fees,
        net_profit,
        profitable,
        risk: classify_risk(spread_percent, volume_24h),
    })
}

/// Very wide spreads and thin books are high risk first; otherwise mid-depth
/// books are medium, and only deep books with tight spreads are low.
pub fn classify_risk(spread_percent: Decimal, volume_24h: Decimal) -> RiskLevel {
    if spread_percent > HIGH_RISK_SPREAD_PERCENT || volume_24h < THIN_VOLUME {
        RiskLevel::High
    } else if volume_24h < DEEP_VOLUME {
        RiskLevel::Medium
    } else if spread_percent < LOW_RISK_SPREAD_PERCENT {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quote(exchange: &str, bid: Decimal, ask: Decimal) -> Quote {
        Quote::new(exchange, "BTC/USDT", bid, ask)
    }

    #[test]
    fn test_spread_between_two_venues() {
        let policy = ArbitragePolicy::default();
        let a = quote("a", dec!(100), dec!(101));
        let b = quote("b", dec!(102), dec!(103));

        let opp = evaluate_pair(&b, &a, &policy).unwrap();
        assert_eq!(opp.id, "a-b-BTC/USDT");
        assert_eq!(opp.buy_price, dec!(100.5));
        assert_eq!(opp.sell_price, dec!(102.5));
        assert_eq!(opp.spread_amount, dec!(2.0));
        assert_eq!(opp.spread_percent.round_dp(2), dec!(1.99));
    }

    #[test]
    fn test_fees_make_small_spread_unprofitable() {
        let policy = ArbitragePolicy::default();
        let a = quote("a", dec!(100), dec!(101));
        let b = quote("b", dec!(102), dec!(103));

        let opp = evaluate_pair(&a, &b, &policy).unwrap();
        assert_eq!(opp.fees.trading_fees, dec!(0.205));
        assert_eq!(opp.fees.network_fees, dec!(5));
        assert_eq!(opp.net_profit, dec!(-3.205));
        assert!(!opp.profitable);

        let strict = ArbitragePolicy {
            only_profitable: true,
            ..ArbitragePolicy::default()
        };
        assert!(evaluate_pair(&a, &b, &strict).is_none());
    }

    #[test]
    fn test_fees_disabled() {
        let policy = ArbitragePolicy {
            include_fees: false,
            ..ArbitragePolicy::default()
        };
        let opp = evaluate_pair(
            &quote("a", dec!(100), dec!(101)),
            &quote("b", dec!(102), dec!(103)),
            &policy,
        )
        .unwrap();
        assert_eq!(opp.fees.total(), Decimal::ZERO);
        assert_eq!(opp.net_profit, dec!(2.0));
        assert!(opp.profitable);
    }

    #[test]
    fn test_below_min_spread_is_dropped() {
        let policy = ArbitragePolicy::default();
        let a = quote("a", dec!(100), dec!(101));
        let b = quote("b", dec!(100.2), dec!(101.2));
        assert!(evaluate_pair(&a, &b, &policy).is_none());
    }

    #[test]
    fn test_volume_is_min_of_sides() {
        let policy = ArbitragePolicy::default();
        let a = quote("a", dec!(100), dec!(101)).with_volume(dec!(2000000));
        let b = quote("b", dec!(102), dec!(103)).with_volume(dec!(500000));
        assert_eq!(evaluate_pair(&a, &b, &policy).unwrap().volume_24h, dec!(500000));

        let no_volume = quote("c", dec!(102), dec!(103));
        let opp = evaluate_pair(&a, &no_volume, &policy).unwrap();
        assert_eq!(opp.volume_24h, Decimal::ZERO);
        assert_eq!(opp.risk, RiskLevel::High);
    }

    #[test]
    fn test_risk_tiers() {
        assert_eq!(classify_risk(dec!(2), dec!(50000)), RiskLevel::High);
        assert_eq!(classify_risk(dec!(2), dec!(500000)), RiskLevel::Medium);
        assert_eq!(classify_risk(dec!(0.8), dec!(5000000)), RiskLevel::Low);
        assert_eq!(classify_risk(dec!(2), dec!(5000000)), RiskLevel::Medium);
        assert_eq!(classify_risk(dec!(6), dec!(5000000)), RiskLevel::High);
    }

    fn price() -> impl Strategy<Value = Decimal> {
        (1i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    proptest! {
        #[test]
        fn prop_orientation_and_spread_are_symmetric(
            bid_a in price(), width_a in 0i64..1000,
            bid_b in price(), width_b in 0i64..1000,
        ) {
            let policy = ArbitragePolicy {
                min_spread_percent: Decimal::ZERO,
                ..ArbitragePolicy::default()
            };
            let a = quote("a", bid_a, bid_a + Decimal::new(width_a, 2));
            let b = quote("b", bid_b, bid_b + Decimal::new(width_b, 2));

            let ab = evaluate_pair(&a, &b, &policy).unwrap();
            let ba = evaluate_pair(&b, &a, &policy).unwrap();

            prop_assert_eq!(&ab.id, &ba.id);
            prop_assert_eq!(ab.spread_percent, ba.spread_percent);
            prop_assert!(ab.buy_price <= ab.sell_price);
            prop_assert!(ab.spread_percent >= Decimal::ZERO);
            prop_assert_eq!(ab.net_profit, ab.estimated_profit - ab.fees.total());
        }
    }
}
