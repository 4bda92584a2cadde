/// From a position's current on-chain state and its `CapitalPeriod`/event
/// history, computes current value, realized and unrealized PnL,
/// collected/unclaimed fees, and time-weighted APR.
///
/// Numeric rule: every division scales its numerator by `10^30` first (see
/// `bigmath::ratio_scaled_1e30`); nothing here is ever routed through
/// floating point.
use crate::bigmath::{ratio_scaled_1e30, FixedPercentage};
use crate::error::LedgerError;
use crate::ledger::PriceOracle;
use crate::types::{CapitalPeriod, ChainId, EventKind, PositionEvent};
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use num_traits::Zero;
use once_cell::sync::Lazy;

static Q96: Lazy<BigInt> = Lazy::new(|| BigInt::from(2).pow(96));
const SECONDS_PER_YEAR: i64 = 365 * 86_400;

/// Tick <-> sqrt-price conversion is explicitly out of scope (standard,
/// well-known math); this crate depends only on its numeric contract.
pub trait TickMath {
    /// Returns `sqrt(price)` at `tick`, expressed in Q96 fixed point.
    fn sqrt_price_at_tick(&self, tick: i32) -> BigInt;
}

#[derive(Debug, Clone)]
pub struct OnChainPositionState {
    pub liquidity: BigInt,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub current_tick: i32,
    pub sqrt_price_x96: BigInt,
    /// Derived upstream from the NFPM `positions()` read and the two
    /// `feeGrowthInside` deltas; that on-chain read is outside this crate's
    /// scope, so the already-computed value is taken as an input.
    pub unclaimed_fees_quote: BigInt,
}

#[derive(Debug, Clone)]
pub struct PositionMetrics {
    pub current_value_quote: BigInt,
    pub unclaimed_fees_quote: BigInt,
    pub realized_pnl_quote: BigInt,
    pub collected_fees_quote: BigInt,
    pub total_pnl_quote: BigInt,
    pub position_apr: FixedPercentage,
    /// `(period index, APR)` for periods with positive duration and cost basis.
    pub period_aprs: Vec<(usize, FixedPercentage)>,
}

/// Standard Uniswap V3 in-range/out-of-range liquidity decomposition,
/// converted to quote-token value via the same price collaborator the
/// ledger uses.
pub fn current_value_in_quote(
    chain: ChainId,
    pool_ref: Option<&str>,
    state: &OnChainPositionState,
    tick_math: &dyn TickMath,
    price_oracle: &dyn PriceOracle,
    as_of_block: u64,
) -> Result<BigInt, LedgerError> {
    let (tick_lo, tick_hi) = if state.tick_lower <= state.tick_upper {
        (state.tick_lower, state.tick_upper)
    } else {
        (state.tick_upper, state.tick_lower)
    };
    let sqrt_a = tick_math.sqrt_price_at_tick(tick_lo);
    let sqrt_b = tick_math.sqrt_price_at_tick(tick_hi);
    let sqrt_p = &state.sqrt_price_x96;
    let l = &state.liquidity;
    let q96 = &*Q96;

    let (amount0, amount1) = if sqrt_p <= &sqrt_a {
        let amount0 = (l * (&sqrt_b - &sqrt_a) * q96) / (&sqrt_a * &sqrt_b);
        (amount0, BigInt::zero())
    } else if sqrt_p >= &sqrt_b {
        let amount1 = (l * (&sqrt_b - &sqrt_a)) / q96;
        (BigInt::zero(), amount1)
    } else {
        let amount0 = (l * (&sqrt_b - sqrt_p) * q96) / (sqrt_p * &sqrt_b);
        let amount1 = (l * (sqrt_p - &sqrt_a)) / q96;
        (amount0, amount1)
    };

    price_oracle
        .value_in_quote(chain, pool_ref, as_of_block, &amount0, &amount1)
        .map_err(LedgerError::Price)
}

fn event_value(
    chain: ChainId,
    pool_ref: Option<&str>,
    price_oracle: &dyn PriceOracle,
    event: &PositionEvent,
) -> Result<BigInt, LedgerError> {
    price_oracle
        .value_in_quote(chain, pool_ref, event.block_number, &event.amount0, &event.amount1)
        .map_err(LedgerError::Price)
}

/// Σ(DECREASE value) − Σ(INCREASE value), each valued at its own block.
pub fn realized_pnl(
    chain: ChainId,
    pool_ref: Option<&str>,
    events: &[PositionEvent],
    price_oracle: &dyn PriceOracle,
) -> Result<BigInt, LedgerError> {
    let mut total = BigInt::zero();
    for event in events {
        match event.event_kind {
            EventKind::IncreaseLiquidity => total -= event_value(chain, pool_ref, price_oracle, event)?,
            EventKind::DecreaseLiquidity => total += event_value(chain, pool_ref, price_oracle, event)?,
            EventKind::Collect => {}
        }
    }
    Ok(total)
}

/// Σ of COLLECT events valued at their block's price.
pub fn collected_fees(
    chain: ChainId,
    pool_ref: Option<&str>,
    events: &[PositionEvent],
    price_oracle: &dyn PriceOracle,
) -> Result<BigInt, LedgerError> {
    let mut total = BigInt::zero();
    for event in events {
        if event.event_kind == EventKind::Collect {
            total += event_value(chain, pool_ref, price_oracle, event)?;
        }
    }
    Ok(total)
}

/// Allocates each COLLECT's fee value across every period that had already
/// started by its timestamp, proportional to `weight_i = duration_i *
/// costBasis_i`. Periods are consecutive and non-overlapping, but a single
/// COLLECT still settles fees that accrued across several of them, so
/// eligibility only requires the period to have started — not still be
/// open — by the collect's timestamp. An open period's duration is taken
/// as-of the collect's own timestamp (provisional, for allocation purposes
/// only — it never mutates the stored period).
fn allocate_fees(periods: &[CapitalPeriod], collects: &[(DateTime<Utc>, BigInt)]) -> Vec<BigInt> {
    let mut allocated = vec![BigInt::zero(); periods.len()];

    for (collect_ts, fee_value) in collects {
        let mut weights: Vec<(usize, BigInt)> = Vec::new();
        for (i, period) in periods.iter().enumerate() {
            if period.start_time > *collect_ts {
                continue;
            }
            let effective_duration = period
                .duration_seconds
                .unwrap_or_else(|| (*collect_ts - period.start_time).num_seconds().max(0));
            if effective_duration <= 0 || period.cost_basis_in_quote <= BigInt::zero() {
                continue;
            }
            weights.push((i, BigInt::from(effective_duration) * &period.cost_basis_in_quote));
        }

        let sum_weights: BigInt = weights.iter().map(|(_, w)| w.clone()).sum();
        if sum_weights.is_zero() {
            continue;
        }
        for (i, w) in &weights {
            allocated[*i] += (fee_value * w) / &sum_weights;
        }
    }

    allocated
}

/// Per-period APR using each period's final duration (closed periods use
/// their stored duration; the still-open final period uses `as_of - start`),
/// plus the weight-weighted position-level APR.
fn compute_aprs(
    periods: &[CapitalPeriod],
    allocated_fees: &[BigInt],
    as_of: DateTime<Utc>,
) -> (Vec<(usize, FixedPercentage)>, FixedPercentage) {
    let mut period_aprs = Vec::new();
    let mut weighted_numerator_scaled = BigInt::zero();
    let mut weight_sum = BigInt::zero();

    for (i, period) in periods.iter().enumerate() {
        let duration = period
            .duration_seconds
            .unwrap_or_else(|| (as_of - period.start_time).num_seconds().max(0));
        if duration <= 0 || period.cost_basis_in_quote <= BigInt::zero() {
            continue;
        }
        let ratio = ratio_scaled_1e30(&allocated_fees[i], &period.cost_basis_in_quote);
        let annualized = (ratio * BigInt::from(SECONDS_PER_YEAR)) / BigInt::from(duration);
        let pct_scaled = annualized * BigInt::from(100);
        let weight = BigInt::from(duration) * &period.cost_basis_in_quote;

        weighted_numerator_scaled += &pct_scaled * &weight;
        weight_sum += &weight;
        period_aprs.push((i, FixedPercentage::from_scaled_1e30(&pct_scaled)));
    }

    let position_apr = if weight_sum.is_zero() {
        FixedPercentage::zero()
    } else {
        FixedPercentage::from_scaled_1e30(&(weighted_numerator_scaled / &weight_sum))
    };

    (period_aprs, position_apr)
}

#[allow(clippy::too_many_arguments)]
pub fn compute_position_metrics(
    chain: ChainId,
    pool_ref: Option<&str>,
    events: &[PositionEvent],
    periods: &[CapitalPeriod],
    on_chain: &OnChainPositionState,
    tick_math: &dyn TickMath,
    price_oracle: &dyn PriceOracle,
    as_of_block: u64,
    as_of_time: DateTime<Utc>,
) -> Result<PositionMetrics, LedgerError> {
    let current_value_quote =
        current_value_in_quote(chain, pool_ref, on_chain, tick_math, price_oracle, as_of_block)?;
    let realized_pnl_quote = realized_pnl(chain, pool_ref, events, price_oracle)?;
    let collected_fees_quote = collected_fees(chain, pool_ref, events, price_oracle)?;

    let current_cost_basis = periods
        .last()
        .map(|p| p.cost_basis_in_quote.clone())
        .unwrap_or_else(BigInt::zero);

    let total_pnl_quote = &realized_pnl_quote
        + &collected_fees_quote
        + &on_chain.unclaimed_fees_quote
        + (&current_value_quote - &current_cost_basis);

    let collects: Vec<(DateTime<Utc>, BigInt)> = events
        .iter()
        .filter(|e| e.event_kind == EventKind::Collect)
        .map(|e| Ok::<_, LedgerError>((e.block_timestamp, event_value(chain, pool_ref, price_oracle, e)?)))
        .collect::<Result<_, _>>()?;

    let allocated_fees = allocate_fees(periods, &collects);
    let (period_aprs, position_apr) = compute_aprs(periods, &allocated_fees, as_of_time);

    Ok(PositionMetrics {
        current_value_quote,
        unclaimed_fees_quote: on_chain.unclaimed_fees_quote.clone(),
        realized_pnl_quote,
        collected_fees_quote,
        total_pnl_quote,
        position_apr,
        period_aprs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FlatPrice;
    impl PriceOracle for FlatPrice {
        fn value_in_quote(
            &self,
            _chain: ChainId,
            _pool_ref: Option<&str>,
            _block_number: u64,
            amount0: &BigInt,
            amount1: &BigInt,
        ) -> Result<BigInt, String> {
            Ok(amount0 + amount1)
        }
    }

    fn period(start_secs: i64, end_secs: Option<i64>, cost_basis: i64) -> CapitalPeriod {
        let start_time = Utc.timestamp_opt(start_secs, 0).single().unwrap();
        let end_time = end_secs.map(|s| Utc.timestamp_opt(s, 0).single().unwrap());
        let duration_seconds = end_secs.map(|e| e - start_secs);
        let weight = duration_seconds.map(|d| BigInt::from(d) * BigInt::from(cost_basis));
        CapitalPeriod {
            position_id: None,
            event_id: None,
            start_time,
            end_time,
            duration_seconds,
            cost_basis_in_quote: BigInt::from(cost_basis),
            weight,
        }
    }

    #[test]
    fn test_single_open_period_apr() {
        let start = 1_700_000_000i64;
        let collect_ts = start + 30 * 86_400;
        let periods = vec![period(start, None, 1_000_000)];
        let collects = vec![(
            Utc.timestamp_opt(collect_ts, 0).single().unwrap(),
            BigInt::from(10_000),
        )];
        let allocated = allocate_fees(&periods, &collects);
        assert_eq!(allocated[0], BigInt::from(10_000));

        let (period_aprs, position_apr) =
            compute_aprs(&periods, &allocated, Utc.timestamp_opt(collect_ts, 0).single().unwrap());
        assert_eq!(period_aprs.len(), 1);
        assert_eq!(period_aprs[0].1.to_string(), "12.166666");
        assert_eq!(position_apr.to_string(), "12.166666");
    }

    #[test]
    fn test_fee_allocation_across_two_periods() {
        let start0 = 0i64;
        let end0 = 10 * 86_400;
        let end1 = end0 + 20 * 86_400;
        let periods = vec![
            period(start0, Some(end0), 1_000_000),
            period(end0, Some(end1), 2_000_000),
        ];
        let collect_ts = Utc.timestamp_opt(end1 - 1, 0).single().unwrap();
        let collects = vec![(collect_ts, BigInt::from(60_000))];
        let allocated = allocate_fees(&periods, &collects);
        assert_eq!(allocated[0], BigInt::from(12_000));
        assert_eq!(allocated[1], BigInt::from(48_000));
    }

    #[test]
    fn test_zero_cost_basis_period_excluded_from_apr() {
        let periods = vec![period(0, Some(86_400), 0)];
        let allocated = vec![BigInt::from(100)];
        let (period_aprs, position_apr) =
            compute_aprs(&periods, &allocated, Utc.timestamp_opt(86_400, 0).single().unwrap());
        assert!(period_aprs.is_empty());
        assert_eq!(position_apr, FixedPercentage::zero());
    }
}
