//! Shipment dataset loader.
//!
//! Parses an invoice CSV into immutable `ShipmentRecord`s. Accepted columns
//! (snake_case or the invoice export's own headers):
//!   zone / Zone, weight_oz / Weight (oz), weight_lbs / WEIGHT_IN_LBS,
//!   label_cost / Label Cost, shipping_service / Shipping Service,
//!   shipping_carrier / Shipping Carrier

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::config::MerchantConfig;
use crate::domain::carriers::{self, REDO_CARRIERS};
use crate::domain::qualification::{available_services, normalize_name};
use crate::domain::{QualificationFilter, ShipmentRecord, WeightBucket, Zone};
use crate::error::{EngineError, EngineResult};
use crate::util::sha256_hex;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceRow {
    #[serde(default, alias = "Zone", alias = "ZONE")]
    pub zone: Option<String>,
    #[serde(default, alias = "Weight (oz)", alias = "WEIGHT_IN_OZ")]
    pub weight_oz: Option<String>,
    #[serde(default, alias = "WEIGHT_IN_LBS", alias = "Weight (lbs)")]
    pub weight_lbs: Option<String>,
    #[serde(default, alias = "Label Cost", alias = "LABEL_COST")]
    pub label_cost: Option<String>,
    #[serde(default, alias = "Shipping Service", alias = "SHIPPING_SERVICE")]
    pub shipping_service: Option<String>,
    #[serde(default, alias = "Shipping Carrier", alias = "SHIPPING_CARRIER")]
    pub shipping_carrier: Option<String>,
}

/// Lenient numeric cell: blanks and junk are `None`; `$` and thousands
/// separators are ignored.
fn number(raw: Option<&str>) -> Option<f64> {
    let cleaned: String = raw?
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '$' | ','))
        .collect();
    cleaned.parse().ok().filter(|v: &f64| v.is_finite())
}

impl InvoiceRow {
    pub fn to_record(&self, filter: &QualificationFilter) -> ShipmentRecord {
        let service = normalize_name(self.shipping_service.as_deref().unwrap_or_default());
        let carrier = normalize_name(self.shipping_carrier.as_deref().unwrap_or_default());
        let qualified = filter.is_qualified(&service, &carrier);

        ShipmentRecord {
            zone: self.zone.as_deref().and_then(Zone::parse),
            bucket: WeightBucket::for_weight(
                number(self.weight_oz.as_deref()),
                number(self.weight_lbs.as_deref()),
            ),
            label_cost: number(self.label_cost.as_deref()),
            service,
            carrier,
            qualified,
        }
    }
}

pub fn load_rows<R: Read>(reader: R) -> EngineResult<Vec<InvoiceRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line_num, result) in csv_reader.deserialize().enumerate() {
        let row: InvoiceRow = result.map_err(|e| EngineError::Dataset {
            line: line_num as u64 + 2,
            reason: e.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// An uploaded shipment dataset, normalized once and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    hash: String,
    records: Vec<ShipmentRecord>,
    services: Vec<String>,
    detected_carriers: Vec<&'static str>,
}

impl Dataset {
    pub fn load(path: &Path, merchant: &MerchantConfig) -> EngineResult<Arc<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::MissingDataset(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        let dataset = Self::from_bytes(&bytes, merchant)?;
        info!(
            path = %path.display(),
            records = dataset.records.len(),
            qualifying = dataset.qualifying_count(),
            dataset_hash = %dataset.hash,
            "loaded shipment dataset"
        );
        Ok(Arc::new(dataset))
    }

    pub fn from_bytes(bytes: &[u8], merchant: &MerchantConfig) -> EngineResult<Self> {
        let rows = load_rows(bytes)?;
        let filter = merchant.qualification_filter();

        let mut services = BTreeSet::new();
        let mut detected = BTreeSet::new();
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(service) = row.shipping_service.as_deref().filter(|s| !s.is_empty()) {
                services.insert(service.to_string());
            }
            if let Some(carrier) = carriers::infer_carrier(
                row.shipping_carrier.as_deref().unwrap_or_default(),
                row.shipping_service.as_deref().unwrap_or_default(),
            ) {
                detected.insert(carrier);
            }
            records.push(row.to_record(&filter));
        }

        Ok(Self {
            hash: sha256_hex(bytes),
            records,
            services: services.into_iter().collect(),
            detected_carriers: REDO_CARRIERS
                .into_iter()
                .filter(|carrier| detected.contains(carrier))
                .collect(),
        })
    }

    /// SHA-256 of the raw file bytes.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn records(&self) -> &[ShipmentRecord] {
        &self.records
    }

    pub fn qualifying_count(&self) -> usize {
        self.records.iter().filter(|r| r.qualified).count()
    }

    /// Redo carriers the invoice already ships with, in priority order.
    pub fn detect_carriers(&self) -> &[&'static str] {
        &self.detected_carriers
    }

    /// Known service levels present in the invoice.
    pub fn available_services(&self) -> Vec<&'static str> {
        available_services(self.services.iter().map(String::as_str))
    }
}
