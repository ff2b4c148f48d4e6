use std::fmt;

use serde::{Deserialize, Serialize};

use super::carriers::{self, CarrierName};
use super::weight::WeightBucket;
use crate::error::{EngineError, EngineResult};

/// Carrier-assigned shipping-distance band, 1 through 8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Zone(u8);

impl Zone {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 8;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Parses zone cells the way invoices carry them: `5`, `5.0`, ` 05 `.
    /// Blank or out-of-range values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let value: f64 = raw.trim().parse().ok()?;
        if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value > 255.0 {
            return None;
        }
        Self::new(value as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based column offset inside a carrier's rate-table block.
    pub fn offset(self) -> u32 {
        u32::from(self.0 - Self::MIN)
    }

    pub fn all() -> impl Iterator<Item = Zone> {
        (Self::MIN..=Self::MAX).map(Zone)
    }
}

impl TryFrom<u8> for Zone {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Zone::new(value).ok_or_else(|| format!("zone {value} outside 1-8"))
    }
}

impl From<Zone> for u8 {
    fn from(zone: Zone) -> Self {
        zone.0
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone {}", self.0)
    }
}

/// Normalized shipment row. Built once per dataset and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub zone: Option<Zone>,
    pub bucket: Option<WeightBucket>,
    pub label_cost: Option<f64>,
    /// Normalized service name (see `qualification::normalize_name`).
    pub service: String,
    /// Normalized merchant-side carrier name.
    pub carrier: String,
    pub qualified: bool,
}

/// How the merchant's current rate for a cell is derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselinePolicy {
    /// Cheapest nonzero observed cost.
    #[default]
    Minimum,
    /// Most common observed cost; ties go to the lowest value.
    Mode,
}

impl BaselinePolicy {
    /// Reads the template's control-cell wording.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MIN" | "MINIMUM" | "CHEAPEST" => Some(Self::Minimum),
            "MODE" | "MOST COMMON" => Some(Self::Mode),
            _ => None,
        }
    }
}

/// Which orders count toward savings and spread totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationPolicy {
    #[default]
    AllOrders,
    WonOnly,
}

impl AggregationPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        if upper.starts_with("WON") {
            Some(Self::WonOnly)
        } else if upper.starts_with("ALL") {
            Some(Self::AllOrders)
        } else {
            None
        }
    }
}

/// Scalar pricing controls read from the template's summary sheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingControls {
    pub baseline: BaselinePolicy,
    pub aggregation: AggregationPolicy,
    /// Fraction off the baseline, e.g. `0.1` for 10%. Wins over `dollar_off`.
    pub percent_off: Option<f64>,
    pub dollar_off: Option<f64>,
}

/// Candidate Redo carrier pool for one what-if run.
///
/// Members are kept in priority order, so two selections built from the same
/// set compare equal regardless of input order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    carriers: Vec<CarrierName>,
}

impl Selection {
    pub fn new<I, S>(carriers: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut canonical: Vec<&'static str> = Vec::new();
        for name in carriers {
            let name = name.as_ref();
            let known = carriers::canonical(name)
                .ok_or_else(|| EngineError::UnknownCarrier(name.to_string()))?;
            if !canonical.contains(&known) {
                canonical.push(known);
            }
        }
        canonical.sort_by_key(|name| carriers::priority(name));
        Ok(Self {
            carriers: canonical.into_iter().map(str::to_string).collect(),
        })
    }

    pub fn single(carrier: &str) -> EngineResult<Self> {
        Self::new([carrier])
    }

    /// Carriers in tie-break priority order.
    pub fn carriers(&self) -> &[CarrierName] {
        &self.carriers
    }

    pub fn len(&self) -> usize {
        self.carriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carriers.is_empty()
    }

    pub fn contains(&self, carrier: &str) -> bool {
        self.carriers.iter().any(|c| c == carrier)
    }

    /// Cache key: alphabetically sorted, pipe-joined carrier names.
    pub fn key(&self) -> String {
        let mut names: Vec<&str> = self.carriers.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.join("|")
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Portfolio-level outcome of one selection. Always recomputed whole.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub merchant_annual_savings: f64,
    /// Our spread on the deal.
    pub deal_size: f64,
    pub total_spread_available: f64,
    /// Fraction (0-1) of qualifying orders we could win at cost.
    pub pct_orders_winnable: f64,
    /// Fraction (0-1) of qualifying orders won under the discount policy.
    pub pct_orders_won: f64,
}

impl MetricsResult {
    pub const FIELD_NAMES: [&'static str; 5] = [
        "merchant_annual_savings",
        "deal_size",
        "total_spread_available",
        "pct_orders_winnable",
        "pct_orders_won",
    ];

    pub fn values(&self) -> [f64; 5] {
        [
            self.merchant_annual_savings,
            self.deal_size,
            self.total_spread_available,
            self.pct_orders_winnable,
            self.pct_orders_won,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_parse_accepts_float_text_and_rejects_out_of_range() {
        assert_eq!(Zone::parse("5"), Zone::new(5));
        assert_eq!(Zone::parse(" 8.0 "), Zone::new(8));
        assert_eq!(Zone::parse(""), None);
        assert_eq!(Zone::parse("9"), None);
        assert_eq!(Zone::parse("4.5"), None);
    }

    #[test]
    fn selection_equality_ignores_input_order() {
        let a = Selection::new(["UPS Ground", "USPS Market"]).unwrap();
        let b = Selection::new(["USPS Market", "UPS Ground", "UPS Ground"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), "UPS Ground|USPS Market");
        assert_eq!(a.carriers()[0], "USPS Market");
    }

    #[test]
    fn selection_rejects_unknown_carriers() {
        let err = Selection::new(["Pony Express"]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownCarrier(name) if name == "Pony Express"));
    }

    #[test]
    fn control_wording_parses() {
        assert_eq!(BaselinePolicy::parse("mode"), Some(BaselinePolicy::Mode));
        assert_eq!(BaselinePolicy::parse("Minimum"), Some(BaselinePolicy::Minimum));
        assert_eq!(AggregationPolicy::parse("Won Orders Only"), Some(AggregationPolicy::WonOnly));
        assert_eq!(AggregationPolicy::parse("All Orders"), Some(AggregationPolicy::AllOrders));
        assert_eq!(AggregationPolicy::parse("?"), None);
    }
}
