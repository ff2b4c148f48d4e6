//! Engine and merchant configuration.
//!
//! Both files are JSON with `deny_unknown_fields`: an option the engine does
//! not recognize is a load error rather than a silently ignored key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::carriers::{self, REDO_CARRIERS};
use crate::domain::{PricingControls, QualificationFilter, RowMapping, Selection};
use crate::error::{EngineError, EngineResult};
use crate::infra::workbook::{column_index, CellAddr};
use crate::util::persistence::{default_cache_dir, default_config_file, load_json};
use crate::util::sha256_hex;

/// Columns of the eight zone rates for one carrier on the rate sheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CarrierColumns {
    pub carrier: String,
    pub start: String,
    pub end: String,
}

/// Control cells on the summary sheet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ControlCells {
    pub baseline_policy: String,
    pub aggregation_policy: String,
    pub percent_off: String,
    pub dollar_off: String,
}

impl Default for ControlCells {
    fn default() -> Self {
        Self {
            baseline_policy: "C4".to_string(),
            aggregation_policy: "C5".to_string(),
            percent_off: "C6".to_string(),
            dollar_off: "C7".to_string(),
        }
    }
}

/// The five metric output cells on the summary sheet, in
/// [`crate::domain::MetricsResult::FIELD_NAMES`] order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputCells {
    pub merchant_annual_savings: String,
    pub deal_size: String,
    pub total_spread_available: String,
    pub pct_orders_winnable: String,
    pub pct_orders_won: String,
}

impl Default for OutputCells {
    fn default() -> Self {
        Self {
            merchant_annual_savings: "C10".to_string(),
            deal_size: "C11".to_string(),
            total_spread_available: "C12".to_string(),
            pct_orders_winnable: "C13".to_string(),
            pct_orders_won: "C14".to_string(),
        }
    }
}

impl OutputCells {
    pub fn addresses(&self) -> [&str; 5] {
        [
            &self.merchant_annual_savings,
            &self.deal_size,
            &self.total_spread_available,
            &self.pct_orders_winnable,
            &self.pct_orders_won,
        ]
    }
}

/// Where things live in the reference pricing template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TemplateLayout {
    pub rate_sheet: String,
    pub summary_sheet: String,
    pub rows: RowMapping,
    pub carrier_columns: Vec<CarrierColumns>,
    pub controls: ControlCells,
    pub outputs: OutputCells,
}

impl Default for TemplateLayout {
    fn default() -> Self {
        const RANGES: [(&str, &str); 9] = [
            ("B", "I"),
            ("J", "Q"),
            ("R", "Y"),
            ("Z", "AG"),
            ("AH", "AO"),
            ("AP", "AW"),
            ("AX", "BE"),
            ("BF", "BM"),
            ("BN", "BU"),
        ];
        let carrier_columns = REDO_CARRIERS
            .iter()
            .zip(RANGES)
            .map(|(carrier, (start, end))| CarrierColumns {
                carrier: carrier.to_string(),
                start: start.to_string(),
                end: end.to_string(),
            })
            .collect();

        Self {
            rate_sheet: "Rate Tables".to_string(),
            summary_sheet: "Pricing & Summary".to_string(),
            rows: RowMapping::default(),
            carrier_columns,
            controls: ControlCells::default(),
            outputs: OutputCells::default(),
        }
    }
}

impl TemplateLayout {
    pub fn validate(&self) -> EngineResult<()> {
        let rows = &self.rows;
        if rows.first_row == 0 || rows.first_row > rows.last_row {
            return Err(EngineError::InvalidConfig(format!(
                "row window {}..={} is empty",
                rows.first_row, rows.last_row
            )));
        }

        for columns in &self.carrier_columns {
            if carriers::priority(&columns.carrier).is_none() {
                return Err(EngineError::UnknownCarrier(columns.carrier.clone()));
            }
            let span = column_index(&columns.start)
                .zip(column_index(&columns.end))
                .map(|(start, end)| end as i64 - start as i64 + 1);
            if span != Some(8) {
                return Err(EngineError::InvalidConfig(format!(
                    "{}: columns {}..{} must span 8 zones",
                    columns.carrier, columns.start, columns.end
                )));
            }
        }

        let controls = &self.controls;
        let cells = [
            controls.baseline_policy.as_str(),
            controls.aggregation_policy.as_str(),
            controls.percent_off.as_str(),
            controls.dollar_off.as_str(),
        ];
        for cell in cells.into_iter().chain(self.outputs.addresses()) {
            if CellAddr::parse(cell).is_none() {
                return Err(EngineError::InvalidConfig(format!(
                    "'{cell}' is not a cell address"
                )));
            }
        }
        Ok(())
    }

    pub fn columns_for(&self, carrier: &str) -> Option<&CarrierColumns> {
        self.carrier_columns.iter().find(|c| c.carrier == carrier)
    }
}

/// Process-wide engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    /// A job marker older than this is treated as failed.
    pub job_stale_after_secs: u64,
    pub max_formula_depth: usize,
    /// Entries kept by each `(path, mtime)` memo.
    pub memo_capacity: usize,
    pub template: TemplateLayout,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            job_stale_after_secs: 600,
            max_formula_depth: 64,
            memo_capacity: 8,
            template: TemplateLayout::default(),
        }
    }
}

impl EngineConfig {
    /// Loads `path`, or the platform config file when `path` is `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_file(),
        };
        let config = match path.as_deref() {
            Some(path) => match load_json::<Self>(path)? {
                Some(config) => {
                    info!(path = %path.display(), "loaded engine config");
                    config
                }
                None => {
                    debug!(path = %path.display(), "no engine config, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.memo_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "memo_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_formula_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "max_formula_depth must be at least 1".to_string(),
            ));
        }
        self.template.validate()
    }
}

/// Merchant-side discount settings. Either one replaces the template value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DiscountOverrides {
    pub percent_off: Option<f64>,
    pub dollar_off: Option<f64>,
}

/// One merchant's analysis choices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MerchantConfig {
    /// `None` applies the default service policy.
    pub included_services: Option<Vec<String>>,
    pub excluded_carriers: Vec<String>,
    pub declared_annual_orders: Option<u64>,
    pub discount: DiscountOverrides,
    /// Redo carrier pool; the forced-on carriers are always added.
    pub candidate_carriers: Vec<String>,
}

impl MerchantConfig {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let config = load_json::<Self>(path)?.ok_or_else(|| {
            EngineError::InvalidConfig(format!("merchant config not found: {}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        for carrier in &self.candidate_carriers {
            if carriers::canonical(carrier).is_none() {
                return Err(EngineError::UnknownCarrier(carrier.clone()));
            }
        }
        if let Some(pct) = self.discount.percent_off {
            if !(0.0..=1.0).contains(&pct) {
                return Err(EngineError::InvalidConfig(format!(
                    "percent_off {pct} must be a fraction between 0 and 1"
                )));
            }
        }
        if let Some(amount) = self.discount.dollar_off {
            if !amount.is_finite() || amount < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "dollar_off {amount} must be a non-negative amount"
                )));
            }
        }
        Ok(())
    }

    /// Candidate pool with the forced-on carriers added.
    pub fn candidate_selection(&self) -> EngineResult<Selection> {
        Selection::new(
            self.candidate_carriers
                .iter()
                .map(String::as_str)
                .chain(carriers::FORCED_ON),
        )
    }

    pub fn qualification_filter(&self) -> QualificationFilter {
        QualificationFilter::new(
            self.included_services.as_deref(),
            self.excluded_carriers.as_slice(),
        )
    }

    /// Template controls with the merchant's discount overrides applied.
    pub fn apply_discount(&self, mut controls: PricingControls) -> PricingControls {
        if self.discount.percent_off.is_some() {
            controls.percent_off = self.discount.percent_off;
        }
        if self.discount.dollar_off.is_some() {
            controls.dollar_off = self.discount.dollar_off;
        }
        controls
    }

    /// Hash of everything besides the dataset that changes results.
    pub fn config_hash(&self, controls: &PricingControls) -> EngineResult<String> {
        let mut canonical = self.clone();
        if let Some(services) = canonical.included_services.as_mut() {
            services.sort();
            services.dedup();
        }
        canonical.excluded_carriers.sort();
        canonical.excluded_carriers.dedup();
        canonical.candidate_carriers = self
            .candidate_selection()?
            .carriers()
            .to_vec();

        let bytes = serde_json::to_vec(&(canonical, controls))?;
        Ok(sha256_hex(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid_and_covers_every_carrier() {
        let layout = TemplateLayout::default();
        layout.validate().unwrap();
        assert_eq!(layout.carrier_columns.len(), REDO_CARRIERS.len());
        assert_eq!(layout.columns_for("DHL").map(|c| c.end.as_str()), Some("BU"));
    }

    #[test]
    fn unknown_engine_options_are_rejected() {
        let err = serde_json::from_str::<EngineConfig>(r#"{"cache_ttl": 5}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field"));

        let partial: EngineConfig = serde_json::from_str(r#"{"memo_capacity": 2}"#).unwrap();
        assert_eq!(partial.memo_capacity, 2);
        assert_eq!(partial.job_stale_after_secs, 600);
    }

    #[test]
    fn bad_column_span_fails_validation() {
        let mut layout = TemplateLayout::default();
        layout.carrier_columns[0].end = "H".to_string();
        assert!(matches!(layout.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn merchant_validation_and_forced_on_pool() {
        let merchant = MerchantConfig {
            candidate_carriers: vec!["DHL".to_string()],
            ..MerchantConfig::default()
        };
        merchant.validate().unwrap();
        let pool = merchant.candidate_selection().unwrap();
        assert_eq!(pool.len(), 4);
        assert!(pool.contains("UPS Ground Saver"));

        let bad = MerchantConfig {
            discount: DiscountOverrides {
                percent_off: Some(15.0),
                dollar_off: None,
            },
            ..MerchantConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_hash_ignores_list_order_but_not_controls() {
        let a = MerchantConfig {
            excluded_carriers: vec!["FEDEX".into(), "DHL".into()],
            candidate_carriers: vec!["DHL".into(), "FedEx".into()],
            ..MerchantConfig::default()
        };
        let b = MerchantConfig {
            excluded_carriers: vec!["DHL".into(), "FEDEX".into()],
            candidate_carriers: vec!["FedEx".into(), "DHL".into()],
            ..MerchantConfig::default()
        };
        let controls = PricingControls::default();
        assert_eq!(a.config_hash(&controls).unwrap(), b.config_hash(&controls).unwrap());

        let discounted = a.apply_discount(PricingControls {
            percent_off: Some(0.1),
            ..PricingControls::default()
        });
        assert_ne!(a.config_hash(&controls).unwrap(), a.config_hash(&discounted).unwrap());
    }
}
