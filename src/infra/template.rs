//! Reading controls from, and checking results against, the pricing
//! template's summary sheet.

use serde::Serialize;
use tracing::warn;

use super::workbook::{CellAddr, Sheet, Workbook};
use crate::config::TemplateLayout;
use crate::domain::carriers;
use crate::domain::qualification::{normalize_name, SERVICE_POLICY};
use crate::domain::{
    AggregationPolicy, BaselinePolicy, MetricsResult, PricingControls, QualificationFilter, Selection,
};
use crate::error::{EngineError, EngineResult};
use crate::formula::{Evaluator, Overrides, Value};

const REDO_SECTION: &str = "Redo Carriers";
const MERCHANT_CARRIER_SECTION: &str = "Merchant Carriers";
const USE_COLUMN: &str = "Use in Pricing";
const REDO_STOP_TITLES: [&str; 3] = ["MERCHANT CARRIERS", "MERCHANT CARRIER", "MERCHANT SERVICE LEVELS"];
const MERCHANT_STOP_TITLES: [&str; 2] = ["MERCHANT SERVICE LEVELS", "REDO CARRIERS"];
const SERVICE_SECTION: &str = "Merchant Service Levels";
const SERVICE_STOP_TITLES: [&str; 3] = ["REDO CARRIERS", "MERCHANT CARRIERS", "MERCHANT CARRIER"];

fn cell(layout_addr: &str) -> EngineResult<CellAddr> {
    CellAddr::parse(layout_addr)
        .ok_or_else(|| EngineError::InvalidConfig(format!("'{layout_addr}' is not a cell address")))
}

/// Discount cell reading: blanks and zero mean "not configured"; values
/// above 1 are read as whole percents.
fn percent(value: &Value) -> Option<f64> {
    let pct = value.as_number().ok().filter(|v| v.is_finite() && *v > 0.0)?;
    Some(if pct > 1.0 { pct / 100.0 } else { pct })
}

fn amount(value: &Value) -> Option<f64> {
    value.as_number().ok().filter(|v| v.is_finite() && *v > 0.0)
}

impl PricingControls {
    /// Reads the control cells; they may be formulas.
    pub fn from_workbook(
        workbook: &Workbook,
        layout: &TemplateLayout,
        max_formula_depth: usize,
    ) -> EngineResult<Self> {
        let sheet = &layout.summary_sheet;
        workbook.sheet(sheet)?;
        let evaluator = Evaluator::new(workbook, max_formula_depth);
        let read = |addr: &str| -> EngineResult<Value> { Ok(evaluator.cell_value(sheet, cell(addr)?)) };

        let baseline_raw = read(&layout.controls.baseline_policy)?.as_text();
        let baseline = BaselinePolicy::parse(&baseline_raw).unwrap_or_else(|| {
            warn!(value = %baseline_raw, "unrecognized baseline policy, using minimum");
            BaselinePolicy::default()
        });
        let aggregation_raw = read(&layout.controls.aggregation_policy)?.as_text();
        let aggregation = AggregationPolicy::parse(&aggregation_raw).unwrap_or_else(|| {
            warn!(value = %aggregation_raw, "unrecognized aggregation policy, using all orders");
            AggregationPolicy::default()
        });

        Ok(Self {
            baseline,
            aggregation,
            percent_off: percent(&read(&layout.controls.percent_off)?),
            dollar_off: amount(&read(&layout.controls.dollar_off)?),
        })
    }
}

/// A titled section with a "Use in Pricing" column.
struct Section {
    header_row: u32,
    label_col: u32,
    use_col: u32,
}

fn find_section(sheet: &Sheet, title: &str) -> Option<Section> {
    let title_cell = sheet.find_text(title)?;
    let use_col_in = |row: u32| {
        (1..=sheet.max_col()).find(|col| sheet.text(CellAddr::new(*col, row)) == Some(USE_COLUMN))
    };

    let (header_row, use_col) = match use_col_in(title_cell.row) {
        Some(col) => (title_cell.row, col),
        None => (title_cell.row + 1, use_col_in(title_cell.row + 1)?),
    };
    Some(Section {
        header_row,
        label_col: title_cell.col,
        use_col,
    })
}

/// Labels below a section header, up to a blank or the next section title.
fn section_rows(
    evaluator: &Evaluator<'_>,
    sheet_name: &str,
    section: &Section,
    stop_titles: &[&str],
) -> Vec<(u32, String)> {
    let mut rows = Vec::new();
    let mut row = section.header_row + 1;
    loop {
        let label = evaluator
            .cell_value(sheet_name, CellAddr::new(section.label_col, row))
            .as_text();
        let normalized = carriers::normalize_label(&label);
        if normalized.is_empty() || stop_titles.contains(&normalized.as_str()) {
            return rows;
        }
        rows.push((row, label));
        row += 1;
    }
}

fn yes_no(on: bool) -> Value {
    Value::text(if on { "Yes" } else { "No" })
}

/// Merchant-side carrier labels switched on by a Redo selection.
fn merchant_carriers_on(selection: &Selection) -> Vec<&'static str> {
    let mut on = Vec::new();
    if selection.contains("USPS Market") {
        on.push("USPS");
    }
    if selection.contains("UPS Ground") || selection.contains("UPS Ground Saver") {
        on.push("UPS");
    }
    if selection.contains("DHL") {
        on.push("DHL");
    }
    if selection.contains("Amazon") {
        on.push("AMAZON");
    }
    if selection.contains("FedEx") {
        on.push("FEDEX");
    }
    if selection.carriers().iter().any(|c| c.starts_with("First Mile")) {
        on.push("FIRST MILE");
    }
    on
}

/// "Use in Pricing" overrides that make the template price `selection`
/// (plus the forced-on carriers) over the service levels `services` keeps.
/// Missing sections produce no overrides.
pub fn carrier_toggle_overrides(
    workbook: &Workbook,
    layout: &TemplateLayout,
    selection: &Selection,
    services: &QualificationFilter,
    max_formula_depth: usize,
) -> EngineResult<Overrides> {
    let sheet_name = &layout.summary_sheet;
    let sheet = workbook.sheet(sheet_name)?;
    let evaluator = Evaluator::new(workbook, max_formula_depth);
    let mut overrides = Overrides::new();

    match find_section(sheet, REDO_SECTION) {
        Some(section) => {
            for (row, label) in section_rows(&evaluator, sheet_name, &section, &REDO_STOP_TITLES) {
                let on = carriers::canonical(&label)
                    .map(|carrier| selection.contains(carrier) || carriers::is_forced_on(carrier))
                    .unwrap_or(false);
                overrides.insert(
                    (sheet_name.clone(), CellAddr::new(section.use_col, row)),
                    yes_no(on),
                );
            }
        }
        None => warn!(sheet = %sheet_name, "template has no '{REDO_SECTION}' section"),
    }

    if let Some(section) = find_section(sheet, MERCHANT_CARRIER_SECTION) {
        let with_forced = Selection::new(
            selection
                .carriers()
                .iter()
                .map(String::as_str)
                .chain(carriers::FORCED_ON),
        )?;
        let on = merchant_carriers_on(&with_forced);
        for (row, label) in section_rows(&evaluator, sheet_name, &section, &MERCHANT_STOP_TITLES) {
            let normalized = carriers::normalize_label(&label);
            overrides.insert(
                (sheet_name.clone(), CellAddr::new(section.use_col, row)),
                yes_no(on.contains(&normalized.as_str())),
            );
        }
    }

    if let Some(section) = find_section(sheet, SERVICE_SECTION) {
        let rows = section_rows(&evaluator, sheet_name, &section, &SERVICE_STOP_TITLES);
        let listed: Vec<String> = rows.iter().map(|(_, label)| normalize_name(label)).collect();
        for ((row, _), service) in rows.iter().zip(&listed) {
            overrides.insert(
                (sheet_name.clone(), CellAddr::new(section.use_col, *row)),
                yes_no(services.includes_service(service)),
            );
        }
        let missing: Vec<&str> = SERVICE_POLICY
            .iter()
            .map(|entry| entry.service)
            .filter(|service| !listed.contains(&normalize_name(service)))
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "service levels missing from template");
        }
    }

    Ok(overrides)
}

/// The five output cells as the template computes them. `None` means the
/// cell was blank or not numeric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TemplateMetrics {
    pub values: [Option<f64>; 5],
}

pub fn template_metrics(
    workbook: &Workbook,
    layout: &TemplateLayout,
    overrides: Overrides,
    max_formula_depth: usize,
) -> EngineResult<TemplateMetrics> {
    let sheet = &layout.summary_sheet;
    workbook.sheet(sheet)?;
    let evaluator = Evaluator::new(workbook, max_formula_depth).with_overrides(overrides);

    let mut values = [None; 5];
    for (slot, addr) in values.iter_mut().zip(layout.outputs.addresses()) {
        let value = evaluator.cell_value(sheet, cell(addr)?);
        *slot = match value {
            Value::Blank => None,
            other => other.as_number().ok(),
        };
    }
    Ok(TemplateMetrics { values })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Discrepancy {
    pub field: &'static str,
    pub computed: f64,
    pub template: f64,
}

/// Outcome of comparing computed metrics with the template's.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CrossCheck {
    pub discrepancies: Vec<Discrepancy>,
    /// Output cells the template could not produce.
    pub unavailable: Vec<&'static str>,
}

impl CrossCheck {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Compares field by field. Values agree within `tolerance` absolute or
/// relative, whichever is looser.
pub fn cross_check(computed: &MetricsResult, template: &TemplateMetrics, tolerance: f64) -> CrossCheck {
    let mut check = CrossCheck::default();
    for ((field, computed), template) in MetricsResult::FIELD_NAMES
        .into_iter()
        .zip(computed.values())
        .zip(template.values)
    {
        match template {
            None => check.unavailable.push(field),
            Some(expected) => {
                let allowed = tolerance.max(tolerance * expected.abs());
                if (computed - expected).abs() > allowed {
                    check.discrepancies.push(Discrepancy {
                        field,
                        computed,
                        template: expected,
                    });
                }
            }
        }
    }
    check
}
