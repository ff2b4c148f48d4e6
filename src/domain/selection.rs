//! Per-cell carrier selection.
//!
//! Qualifying shipments are grouped into (zone, weight bucket) cells. For
//! each cell the merchant baseline is derived, the cheapest selected carrier
//! wins (ties broken by carrier priority), and the rate offered to the
//! merchant is computed from the discount controls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::carriers::{self, CarrierName};
use super::entities::{BaselinePolicy, PricingControls, Selection, ShipmentRecord, Zone};
use super::weight::{RowMapping, WeightBucket};

/// Read access to carrier rate tables.
pub trait RateLookup {
    /// Rate for `carrier` at `(row, zone)`; `None` when the table has no rate.
    fn rate(&self, carrier: &str, row: u32, zone: Zone) -> Option<f64>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub zone: Zone,
    pub bucket: WeightBucket,
}

/// Qualifying volume observed in one cell.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellVolume {
    pub count: u64,
    pub costs: Vec<f64>,
}

/// Why a cell with qualifying volume produced no outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoBaseline,
    NoRow,
    NoCandidateRate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkippedCell {
    pub key: CellKey,
    pub volume: u64,
    pub reason: SkipReason,
}

/// Priced result for one cell. Savings and spread are per order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellOutcome {
    pub key: CellKey,
    pub volume: u64,
    pub baseline: f64,
    pub winner: CarrierName,
    pub winning_rate: f64,
    pub offered_rate: f64,
    pub savings: f64,
    pub spread: f64,
    pub won: bool,
}

impl CellOutcome {
    /// We could win this cell if we priced at cost.
    pub fn winnable(&self) -> bool {
        self.winning_rate <= self.baseline
    }
}

/// Everything one selection run produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionRun {
    /// All qualifying shipments, including ones that landed in no cell.
    pub qualifying_volume: u64,
    /// Qualifying shipments with no zone or no weight bucket.
    pub unplaced_volume: u64,
    pub cells: Vec<CellOutcome>,
    pub skipped: Vec<SkippedCell>,
}

impl SelectionRun {
    pub fn won_volume(&self) -> u64 {
        self.cells.iter().filter(|c| c.won).map(|c| c.volume).sum()
    }
}

/// Groups qualifying records into cells. Returns the cells, the qualifying
/// count and the count of qualifying records that could not be placed.
pub fn group_cells(records: &[ShipmentRecord]) -> (BTreeMap<CellKey, CellVolume>, u64, u64) {
    let mut cells: BTreeMap<CellKey, CellVolume> = BTreeMap::new();
    let mut qualifying = 0_u64;
    let mut unplaced = 0_u64;

    for record in records.iter().filter(|r| r.qualified) {
        qualifying += 1;
        let (Some(zone), Some(bucket)) = (record.zone, record.bucket) else {
            unplaced += 1;
            continue;
        };
        let cell = cells.entry(CellKey { zone, bucket }).or_default();
        cell.count += 1;
        if let Some(cost) = record.label_cost {
            cell.costs.push(cost);
        }
    }

    (cells, qualifying, unplaced)
}

/// Merchant baseline for a cell. Non-positive and non-finite costs are ignored.
pub fn baseline_rate(costs: &[f64], policy: BaselinePolicy) -> Option<f64> {
    let mut usable: Vec<f64> = costs
        .iter()
        .copied()
        .filter(|c| c.is_finite() && *c > 0.0)
        .collect();
    if usable.is_empty() {
        return None;
    }

    match policy {
        BaselinePolicy::Minimum => usable.into_iter().reduce(f64::min),
        BaselinePolicy::Mode => {
            // Costs compare at cent precision; ties go to the lowest cost.
            usable.sort_by(|a, b| a.total_cmp(b));
            let mut counts: BTreeMap<i64, (u32, f64)> = BTreeMap::new();
            for cost in usable {
                let entry = counts.entry((cost * 100.0).round() as i64).or_insert((0, cost));
                entry.0 += 1;
            }
            let mut best: Option<(u32, f64)> = None;
            for (count, cost) in counts.into_values() {
                if best.map(|(n, _)| count > n).unwrap_or(true) {
                    best = Some((count, cost));
                }
            }
            best.map(|(_, cost)| cost)
        }
    }
}

/// Cheapest selected carrier with a rate at `(row, zone)`. Exact ties go to
/// the carrier earliest in the priority order.
pub fn pick_winner<'s, R: RateLookup + ?Sized>(
    selection: &'s Selection,
    rates: &R,
    row: u32,
    zone: Zone,
) -> Option<(&'s str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for carrier in selection.carriers() {
        let Some(rate) = rates.rate(carrier, row, zone) else {
            continue;
        };
        if best.map(|(_, current)| rate < current).unwrap_or(true) {
            best = Some((carrier.as_str(), rate));
        }
    }
    best
}

/// Rate offered to the merchant when `winner` takes a cell.
///
/// Pass-through carriers offer their own rate. Everyone else is discounted
/// from the baseline (or the reference carrier's rate, for reference-priced
/// carriers) and never offered below the winning rate.
pub fn offered_rate(
    winner: &str,
    winning_rate: f64,
    baseline: f64,
    reference_rate: Option<f64>,
    controls: &PricingControls,
) -> f64 {
    if carriers::is_pass_through(winner) {
        return winning_rate;
    }
    let base = reference_rate.unwrap_or(baseline);
    let discounted = match (controls.percent_off, controls.dollar_off) {
        (Some(pct), _) if pct > 0.0 => base * (1.0 - pct),
        (_, Some(amount)) if amount > 0.0 => base - amount,
        _ => base,
    };
    discounted.max(winning_rate)
}

/// Runs carrier selection over a dataset for one selection.
pub struct CarrierSelector<'a, R: ?Sized> {
    rates: &'a R,
    rows: RowMapping,
    controls: &'a PricingControls,
}

impl<'a, R: RateLookup + ?Sized> CarrierSelector<'a, R> {
    pub fn new(rates: &'a R, rows: RowMapping, controls: &'a PricingControls) -> Self {
        Self {
            rates,
            rows,
            controls,
        }
    }

    pub fn run(&self, records: &[ShipmentRecord], selection: &Selection) -> SelectionRun {
        let (cells, qualifying_volume, unplaced_volume) = group_cells(records);
        let mut run = SelectionRun {
            qualifying_volume,
            unplaced_volume,
            ..SelectionRun::default()
        };

        for (key, volume) in cells {
            match self.price_cell(key, &volume, selection) {
                Ok(outcome) => run.cells.push(outcome),
                Err(reason) => run.skipped.push(SkippedCell {
                    key,
                    volume: volume.count,
                    reason,
                }),
            }
        }
        run
    }

    fn price_cell(
        &self,
        key: CellKey,
        volume: &CellVolume,
        selection: &Selection,
    ) -> Result<CellOutcome, SkipReason> {
        let baseline =
            baseline_rate(&volume.costs, self.controls.baseline).ok_or(SkipReason::NoBaseline)?;
        let row = self.rows.row_for(key.bucket).ok_or(SkipReason::NoRow)?;
        let (winner, winning_rate) =
            pick_winner(selection, self.rates, row, key.zone).ok_or(SkipReason::NoCandidateRate)?;

        let reference_rate = carriers::reference_carrier(winner)
            .and_then(|reference| self.rates.rate(reference, row, key.zone));
        let offered = offered_rate(winner, winning_rate, baseline, reference_rate, self.controls);
        let savings = baseline - offered;

        Ok(CellOutcome {
            key,
            volume: volume.count,
            baseline,
            winner: winner.to_string(),
            winning_rate,
            offered_rate: offered,
            savings,
            spread: offered - winning_rate,
            won: savings >= 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct Table(HashMap<(String, u32, u8), f64>);

    impl Table {
        fn with(mut self, carrier: &str, row: u32, zone: u8, rate: f64) -> Self {
            self.0.insert((carrier.to_string(), row, zone), rate);
            self
        }
    }

    impl RateLookup for Table {
        fn rate(&self, carrier: &str, row: u32, zone: Zone) -> Option<f64> {
            self.0.get(&(carrier.to_string(), row, zone.get())).copied()
        }
    }

    fn record(zone: u8, bucket: WeightBucket, cost: f64) -> ShipmentRecord {
        ShipmentRecord {
            zone: Zone::new(zone),
            bucket: Some(bucket),
            label_cost: Some(cost),
            service: "UPS GROUND".to_string(),
            carrier: "UPS".to_string(),
            qualified: true,
        }
    }

    #[test]
    fn baseline_minimum_ignores_zero_costs() {
        assert_eq!(baseline_rate(&[0.0, 7.5, 6.25], BaselinePolicy::Minimum), Some(6.25));
        assert_eq!(baseline_rate(&[0.0, -1.0], BaselinePolicy::Minimum), None);
        assert_eq!(baseline_rate(&[], BaselinePolicy::Mode), None);
    }

    #[test]
    fn baseline_mode_breaks_ties_toward_lowest() {
        assert_eq!(baseline_rate(&[8.0, 7.0, 8.0, 7.0], BaselinePolicy::Mode), Some(7.0));
        assert_eq!(baseline_rate(&[9.0, 8.0, 9.0], BaselinePolicy::Mode), Some(9.0));
    }

    #[test]
    fn winner_is_minimum_with_priority_tie_break() {
        let table = Table::default()
            .with("DHL", 20, 5, 4.0)
            .with("FedEx", 20, 5, 4.0)
            .with("UPS Ground", 20, 5, 4.5);
        let selection = Selection::new(["DHL", "UPS Ground", "FedEx"]).unwrap();
        let zone = Zone::new(5).unwrap();
        assert_eq!(pick_winner(&selection, &table, 20, zone), Some(("FedEx", 4.0)));
        assert_eq!(pick_winner(&selection, &table, 21, zone), None);
    }

    #[test]
    fn offered_rate_never_drops_below_cost() {
        let deep = PricingControls {
            percent_off: Some(0.9),
            ..PricingControls::default()
        };
        assert_eq!(offered_rate("DHL", 5.0, 6.0, None, &deep), 5.0);

        let flat = PricingControls {
            dollar_off: Some(0.5),
            ..PricingControls::default()
        };
        assert_eq!(offered_rate("DHL", 5.0, 8.0, None, &flat), 7.5);

        let both = PricingControls {
            percent_off: Some(0.25),
            dollar_off: Some(0.5),
            ..PricingControls::default()
        };
        assert_eq!(offered_rate("DHL", 1.0, 8.0, None, &both), 6.0);
        assert_eq!(offered_rate("FedEx", 1.0, 8.0, Some(4.0), &both), 3.0);
        assert_eq!(offered_rate("USPS Market", 3.2, 8.0, None, &both), 3.2);
    }

    #[test]
    fn offered_rate_floor_holds_across_discount_grid() {
        let percents = [None, Some(0.0), Some(0.05), Some(0.5), Some(0.99), Some(1.0)];
        let dollars = [None, Some(0.0), Some(0.01), Some(1.0), Some(25.0)];
        let baselines = [0.5, 4.0, 8.0, 100.0];
        let winning = [0.01, 3.99, 4.0, 7.5, 120.0];
        let references = [None, Some(2.0), Some(9.0)];
        let carriers = ["DHL", "FedEx", "Amazon", "USPS Market", "UPS Ground", "UPS Ground Saver"];

        for percent_off in percents {
            for dollar_off in dollars {
                let controls = PricingControls {
                    percent_off,
                    dollar_off,
                    ..PricingControls::default()
                };
                for carrier in carriers {
                    for base in baselines {
                        for rate in winning {
                            for reference in references {
                                let offered = offered_rate(carrier, rate, base, reference, &controls);
                                assert!(
                                    offered >= rate,
                                    "{carrier} offered {offered} under {rate} \
                                     (base {base}, ref {reference:?}, {percent_off:?}/{dollar_off:?})"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn two_cell_example_savings() {
        let table = Table::default()
            .with("USPS Market", 21, 5, 5.0)
            .with("USPS Market", 22, 5, 5.0);
        let controls = PricingControls::default();
        let selector = CarrierSelector::new(&table, RowMapping::default(), &controls);
        let records = vec![
            record(5, WeightBucket::Pounds(2), 6.0),
            record(5, WeightBucket::Pounds(3), 7.0),
        ];
        let run = selector.run(&records, &Selection::single("USPS Market").unwrap());

        assert_eq!(run.qualifying_volume, 2);
        assert!(run.skipped.is_empty());
        let savings: Vec<f64> = run.cells.iter().map(|c| c.savings).collect();
        assert_eq!(savings, vec![1.0, 2.0]);
        assert!(run.cells.iter().all(|c| c.won && c.spread == 0.0));
    }

    #[test]
    fn sparse_cells_are_skipped_with_a_reason() {
        let table = Table::default().with("DHL", 20, 1, 3.0);
        let controls = PricingControls::default();
        let rows = RowMapping {
            last_row: 30,
            ..RowMapping::default()
        };
        let selector = CarrierSelector::new(&table, rows, &controls);
        let mut no_cost = record(1, WeightBucket::Pounds(1), 0.0);
        no_cost.label_cost = None;
        let mut unplaced = record(1, WeightBucket::Pounds(1), 4.0);
        unplaced.zone = None;
        let records = vec![
            no_cost,
            record(2, WeightBucket::Pounds(15), 9.0),
            record(3, WeightBucket::Pounds(1), 4.0),
            unplaced,
        ];
        let run = selector.run(&records, &Selection::single("DHL").unwrap());

        assert!(run.cells.is_empty());
        assert_eq!(run.qualifying_volume, 4);
        assert_eq!(run.unplaced_volume, 1);
        let reasons: Vec<SkipReason> = run.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![SkipReason::NoBaseline, SkipReason::NoRow, SkipReason::NoCandidateRate]
        );
    }
}
