#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rate_spread_engine::{EngineConfig, MerchantConfig};
use serde_json::json;
use tempfile::TempDir;

/// Zone 5 invoice: two 2 lb shipments ($6, $7), one 3 lb ($8), one without
/// a zone and one excluded second-day shipment.
pub const SHIPMENTS_CSV: &str = "\
Zone,Weight (oz),WEIGHT_IN_LBS,Label Cost,Shipping Service,Shipping Carrier
5,,2,$6.00,UPS® Ground,UPS
5,,1.6,$7.00,UPS® Ground,UPS
5,,3,$8.00,USPS Ground Advantage,USPS
,,3,$8.00,UPS® Ground,UPS
4,,1,$9.00,UPS 2nd Day Air®,UPS
";

/// Rate sheet with USPS Market, UPS Ground and DHL zone 5 rates at the
/// 2 lb (row 21) and 3 lb (row 22) rows; 10% off, minimum baseline.
pub fn template_json() -> serde_json::Value {
    json!({
        "sheets": {
            "Rate Tables": {
                "cells": {
                    "N21": 5.5,
                    "N22": 6.5,
                    "V21": 5.8,
                    "BR21": 5.0,
                    "BR22": "=BR21+1"
                }
            },
            "Pricing & Summary": {
                "cells": {
                    "B4": "Baseline",
                    "C4": "Minimum",
                    "C5": "All Orders",
                    "C6": 0.1,
                    "C7": null,
                    "C10": "=IF(D22=\"Yes\",2,99)",
                    "C11": 2,
                    "C13": 0.75,
                    "C14": "=C13",
                    "B20": "Redo Carriers",
                    "D20": "Use in Pricing",
                    "B21": "USPS Market",
                    "D21": "Yes",
                    "B22": "DHL",
                    "D22": "No"
                }
            }
        }
    })
}

pub struct Fixture {
    pub dir: TempDir,
    pub dataset: PathBuf,
    pub template: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("shipments.csv");
        let template = dir.path().join("template.json");
        fs::write(&dataset, SHIPMENTS_CSV).unwrap();
        fs::write(&template, serde_json::to_vec_pretty(&template_json()).unwrap()).unwrap();
        Self {
            dir,
            dataset,
            template,
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache_dir: self.cache_dir(),
            ..EngineConfig::default()
        }
    }

    pub fn merchant(&self) -> MerchantConfig {
        MerchantConfig {
            candidate_carriers: vec!["DHL".to_string()],
            ..MerchantConfig::default()
        }
    }
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

pub fn cache_file(cache_dir: &Path, prefix: &str, hash: &str) -> PathBuf {
    cache_dir.join(format!("{prefix}-{hash}.json"))
}
