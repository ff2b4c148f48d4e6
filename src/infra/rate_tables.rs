//! Carrier rate tables parsed from the template's rate sheet.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::memo::FileMemo;
use super::workbook::{column_index, CellAddr, Workbook};
use crate::config::TemplateLayout;
use crate::domain::{CarrierName, RateLookup, Zone};
use crate::error::{EngineError, EngineResult};
use crate::formula::{Evaluator, Value};

/// One carrier's rates: row → eight zone columns. A missing rate is `None`,
/// never zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RateTable {
    rows: BTreeMap<u32, [Option<f64>; 8]>,
}

impl RateTable {
    pub fn rate(&self, row: u32, zone: Zone) -> Option<f64> {
        self.rows
            .get(&row)
            .and_then(|zones| zones[zone.offset() as usize])
    }

    /// Number of defined rates.
    pub fn defined(&self) -> usize {
        self.rows
            .values()
            .map(|zones| zones.iter().flatten().count())
            .sum()
    }

    pub fn set(&mut self, row: u32, zone: Zone, rate: f64) {
        let zones = self.rows.entry(row).or_insert([None; 8]);
        zones[zone.offset() as usize] = Some(rate);
    }
}

/// Rate tables for every carrier in the template layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RateTables {
    tables: HashMap<CarrierName, RateTable>,
}

impl RateTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, carrier: &str, table: RateTable) {
        self.tables.insert(carrier.to_string(), table);
    }

    pub fn table(&self, carrier: &str) -> Option<&RateTable> {
        self.tables.get(carrier)
    }

    /// Reads each carrier's block over the layout's row window. Formula
    /// cells are resolved through the evaluator; blanks, text and
    /// non-positive values are absent.
    pub fn from_workbook(
        workbook: &Workbook,
        layout: &TemplateLayout,
        max_formula_depth: usize,
    ) -> EngineResult<Self> {
        let sheet_name = workbook
            .sheet_name(&layout.rate_sheet)
            .ok_or_else(|| EngineError::MissingSheet(layout.rate_sheet.clone()))?;
        let evaluator = Evaluator::new(workbook, max_formula_depth);
        let rows = layout.rows.first_row..=layout.rows.last_row;

        let mut tables = Self::new();
        for columns in &layout.carrier_columns {
            let start = column_index(&columns.start).ok_or_else(|| {
                EngineError::InvalidConfig(format!("bad column '{}'", columns.start))
            })?;

            let mut table = RateTable::default();
            for row in rows.clone() {
                for zone in Zone::all() {
                    let addr = CellAddr::new(start + zone.offset(), row);
                    if let Value::Number(rate) = evaluator.cell_value(sheet_name, addr) {
                        if rate.is_finite() && rate > 0.0 {
                            table.set(row, zone, rate);
                        }
                    }
                }
            }
            if table.defined() == 0 {
                warn!(carrier = %columns.carrier, "rate table has no rates");
            }
            tables.insert(&columns.carrier, table);
        }
        Ok(tables)
    }
}

impl RateLookup for RateTables {
    fn rate(&self, carrier: &str, row: u32, zone: Zone) -> Option<f64> {
        self.table(carrier).and_then(|table| table.rate(row, zone))
    }
}

/// Loads templates and rate tables, memoized on file identity and mtime.
pub struct RateTableStore {
    layout: TemplateLayout,
    max_formula_depth: usize,
    workbooks: FileMemo<Workbook>,
    tables: FileMemo<RateTables>,
}

impl RateTableStore {
    pub fn new(layout: TemplateLayout, max_formula_depth: usize, memo_capacity: usize) -> Self {
        Self {
            layout,
            max_formula_depth,
            workbooks: FileMemo::new(memo_capacity),
            tables: FileMemo::new(memo_capacity),
        }
    }

    pub fn layout(&self) -> &TemplateLayout {
        &self.layout
    }

    pub fn workbook(&self, template: &Path) -> EngineResult<Arc<Workbook>> {
        self.workbooks.get_or_load(template, Workbook::load)
    }

    pub fn load(&self, template: &Path) -> EngineResult<Arc<RateTables>> {
        self.tables.get_or_load(template, |path| {
            let workbook = self.workbook(path)?;
            let tables = RateTables::from_workbook(&workbook, &self.layout, self.max_formula_depth)?;
            info!(
                path = %path.display(),
                carriers = tables.tables.len(),
                "parsed rate tables"
            );
            Ok(tables)
        })
    }
}
