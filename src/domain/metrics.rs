//! Portfolio roll-up of per-cell outcomes.

use std::collections::BTreeMap;

use super::carriers::{self, CarrierName, DealSizeFormula};
use super::entities::{AggregationPolicy, MetricsResult, PricingControls, Selection, ShipmentRecord};
use super::selection::{CarrierSelector, CellOutcome, RateLookup, SelectionRun};
use super::weight::RowMapping;

/// Sample-to-annual multiplier for won-only aggregation.
///
/// `declared / observed`; 1 when the declared figure is missing or zero or
/// nothing qualified.
pub fn annualization_factor(observed_qualifying: u64, declared_annual: Option<u64>) -> f64 {
    match declared_annual {
        Some(declared) if declared > 0 && observed_qualifying > 0 => {
            declared as f64 / observed_qualifying as f64
        }
        _ => 1.0,
    }
}

fn fraction(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Rolls a selection run into a [`MetricsResult`].
#[derive(Clone, Copy, Debug)]
pub struct MetricsAggregator<'a> {
    controls: &'a PricingControls,
    declared_annual_orders: Option<u64>,
}

impl<'a> MetricsAggregator<'a> {
    pub fn new(controls: &'a PricingControls, declared_annual_orders: Option<u64>) -> Self {
        Self {
            controls,
            declared_annual_orders,
        }
    }

    pub fn aggregate(&self, run: &SelectionRun, selection: &Selection) -> MetricsResult {
        let won_only = self.controls.aggregation == AggregationPolicy::WonOnly;
        let counted = |cell: &&CellOutcome| !won_only || cell.won;

        let weighted = |value: fn(&CellOutcome) -> f64| -> f64 {
            run.cells
                .iter()
                .filter(counted)
                .map(|cell| cell.volume as f64 * value(cell))
                .sum()
        };

        let won_volume = run.won_volume();
        let winnable_volume: u64 = run
            .cells
            .iter()
            .filter(|cell| cell.winnable())
            .map(|cell| cell.volume)
            .sum();

        let savings = weighted(|cell| cell.savings);
        let spread_available = run
            .cells
            .iter()
            .map(|cell| cell.volume as f64 * (cell.baseline - cell.winning_rate).max(0.0))
            .sum::<f64>();
        let deal_size = match single_carrier_override(selection) {
            Some(DealSizeFormula::PerWonOrder(fee)) => fee * won_volume as f64,
            None => weighted(|cell| cell.spread),
        };

        let scale = if won_only {
            annualization_factor(run.qualifying_volume, self.declared_annual_orders)
        } else {
            1.0
        };

        MetricsResult {
            merchant_annual_savings: savings * scale,
            deal_size: deal_size * scale,
            total_spread_available: spread_available * scale,
            pct_orders_winnable: fraction(winnable_volume, run.qualifying_volume),
            pct_orders_won: fraction(won_volume, run.qualifying_volume),
        }
    }
}

fn single_carrier_override(selection: &Selection) -> Option<DealSizeFormula> {
    match selection.carriers() {
        [only] => carriers::deal_size_formula(only),
        _ => None,
    }
}

/// Selection plus aggregation in one call.
pub fn compute_metrics<R: RateLookup + ?Sized>(
    records: &[ShipmentRecord],
    rates: &R,
    rows: RowMapping,
    controls: &PricingControls,
    declared_annual_orders: Option<u64>,
    selection: &Selection,
) -> MetricsResult {
    let run = CarrierSelector::new(rates, rows, controls).run(records, selection);
    MetricsAggregator::new(controls, declared_annual_orders).aggregate(&run, selection)
}

/// One independent single-carrier run per candidate carrier.
pub fn compute_breakdown<R: RateLookup + ?Sized>(
    records: &[ShipmentRecord],
    rates: &R,
    rows: RowMapping,
    controls: &PricingControls,
    declared_annual_orders: Option<u64>,
    candidates: &Selection,
) -> BTreeMap<CarrierName, MetricsResult> {
    let selector = CarrierSelector::new(rates, rows, controls);
    let aggregator = MetricsAggregator::new(controls, declared_annual_orders);

    candidates
        .carriers()
        .iter()
        .filter_map(|carrier| {
            let single = Selection::single(carrier).ok()?;
            let run = selector.run(records, &single);
            Some((carrier.clone(), aggregator.aggregate(&run, &single)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Zone;
    use crate::domain::selection::CellKey;
    use crate::domain::weight::WeightBucket;

    fn cell(volume: u64, baseline: f64, winning: f64, offered: f64) -> CellOutcome {
        CellOutcome {
            key: CellKey {
                zone: Zone::new(5).unwrap(),
                bucket: WeightBucket::Pounds(2),
            },
            volume,
            baseline,
            winner: "DHL".to_string(),
            winning_rate: winning,
            offered_rate: offered,
            savings: baseline - offered,
            spread: offered - winning,
            won: baseline - offered >= 0.0,
        }
    }

    fn run(cells: Vec<CellOutcome>, qualifying: u64) -> SelectionRun {
        SelectionRun {
            qualifying_volume: qualifying,
            cells,
            ..SelectionRun::default()
        }
    }

    #[test]
    fn factor_defaults_to_one() {
        assert_eq!(annualization_factor(0, Some(1000)), 1.0);
        assert_eq!(annualization_factor(50, None), 1.0);
        assert_eq!(annualization_factor(50, Some(0)), 1.0);
        assert_eq!(annualization_factor(50, Some(200)), 4.0);
    }

    #[test]
    fn all_orders_sums_weighted_savings_and_spread() {
        let controls = PricingControls::default();
        let dhl = Selection::single("DHL").unwrap();
        let cells = vec![cell(2, 6.0, 4.0, 5.0), cell(1, 7.0, 5.0, 5.5)];
        let metrics = MetricsAggregator::new(&controls, Some(10_000)).aggregate(&run(cells, 4), &dhl);

        assert_eq!(metrics.merchant_annual_savings, 3.5);
        assert_eq!(metrics.deal_size, 2.5);
        assert_eq!(metrics.total_spread_available, 6.0);
        assert_eq!(metrics.pct_orders_winnable, 0.75);
        assert_eq!(metrics.pct_orders_won, 0.75);
    }

    #[test]
    fn won_only_excludes_lost_cells_and_rescales() {
        let controls = PricingControls {
            aggregation: AggregationPolicy::WonOnly,
            ..PricingControls::default()
        };
        let dhl = Selection::single("DHL").unwrap();
        let cells = vec![cell(2, 6.0, 5.0, 5.0), cell(2, 4.0, 4.5, 4.5)];
        let metrics = MetricsAggregator::new(&controls, Some(40)).aggregate(&run(cells, 4), &dhl);

        // Factor 40 / 4 = 10; only the first cell is won.
        assert_eq!(metrics.merchant_annual_savings, 20.0);
        assert_eq!(metrics.deal_size, 0.0);
        assert_eq!(metrics.total_spread_available, 20.0);
        assert_eq!(metrics.pct_orders_won, 0.5);
    }

    #[test]
    fn deal_size_override_applies_to_single_carrier_only() {
        let controls = PricingControls::default();
        let cells = vec![cell(3, 6.0, 5.0, 5.0), cell(1, 4.0, 4.5, 4.5)];

        let usps = Selection::single("USPS Market").unwrap();
        let single = MetricsAggregator::new(&controls, None).aggregate(&run(cells.clone(), 4), &usps);
        assert!((single.deal_size - 1.05).abs() < 1e-12);

        let pool = Selection::new(["USPS Market", "DHL"]).unwrap();
        let multi = MetricsAggregator::new(&controls, None).aggregate(&run(cells, 4), &pool);
        assert_eq!(multi.deal_size, 0.0);
    }

    #[test]
    fn empty_run_yields_zeroes() {
        let controls = PricingControls::default();
        let dhl = Selection::single("DHL").unwrap();
        let metrics = MetricsAggregator::new(&controls, Some(100)).aggregate(&run(vec![], 0), &dhl);
        assert_eq!(metrics, MetricsResult::default());
    }
}
