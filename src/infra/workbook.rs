//! Reference pricing workbook, read from its JSON export.
//!
//! ```json
//! {
//!   "sheets": {
//!     "Rate Tables": {
//!       "cells": { "B20": 5.25, "C20": "=B20*1.1", "A1": "Zone" },
//!       "cached": { "C20": 5.775 }
//!     }
//!   }
//! }
//! ```
//!
//! Strings that start with `=` are formulas. `cached` holds the values the
//! spreadsheet application last computed, used when a formula is too
//! expensive to re-derive.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// 1-based column index of a column label (`"A"` = 1, `"AB"` = 28).
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    letters.chars().try_fold(0_u32, |acc, ch| {
        let ch = ch.to_ascii_uppercase();
        ch.is_ascii_uppercase()
            .then(|| acc * 26 + (ch as u32 - 'A' as u32 + 1))
    })
}

pub fn column_letters(mut index: u32) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        index = (index - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// A single-cell address such as `B20` or `$B$20`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddr {
    pub col: u32,
    pub row: u32,
}

impl CellAddr {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().replace('$', "");
        let split = raw.find(|ch: char| ch.is_ascii_digit())?;
        let (letters, digits) = raw.split_at(split);
        let col = column_index(letters)?;
        let row: u32 = digits.parse().ok()?;
        (row > 0).then_some(Self { col, row })
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

/// A cell as stored in the export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCell {
    Bool(bool),
    Number(f64),
    Text(String),
    Empty,
}

impl RawCell {
    /// Formula source without the leading `=`.
    pub fn formula(&self) -> Option<&str> {
        match self {
            Self::Text(text) => text.strip_prefix('='),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) if !text.starts_with('=') => Some(text),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct SheetFile {
    #[serde(default)]
    cells: BTreeMap<String, RawCell>,
    #[serde(default)]
    cached: BTreeMap<String, RawCell>,
}

#[derive(Deserialize)]
struct WorkbookFile {
    sheets: BTreeMap<String, SheetFile>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sheet {
    cells: HashMap<CellAddr, RawCell>,
    cached: HashMap<CellAddr, RawCell>,
    max_row: u32,
    max_col: u32,
}

impl Sheet {
    pub fn get(&self, addr: CellAddr) -> Option<&RawCell> {
        self.cells.get(&addr)
    }

    pub fn cached(&self, addr: CellAddr) -> Option<&RawCell> {
        self.cached.get(&addr)
    }

    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    pub fn max_col(&self) -> u32 {
        self.max_col
    }

    /// Literal text at `addr`, trimmed; formulas and non-text cells yield `None`.
    pub fn text(&self, addr: CellAddr) -> Option<&str> {
        self.get(addr).and_then(RawCell::as_text).map(str::trim)
    }

    /// First cell, scanning row by row, whose literal text equals `needle`.
    pub fn find_text(&self, needle: &str) -> Option<CellAddr> {
        (1..=self.max_row)
            .flat_map(|row| (1..=self.max_col).map(move |col| CellAddr::new(col, row)))
            .find(|addr| self.text(*addr) == Some(needle))
    }

    /// Builds a sheet from address/value pairs; used by tests and importers.
    pub fn from_cells<'a, I>(cells: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (&'a str, RawCell)>,
    {
        let mut sheet = Self::default();
        for (addr, cell) in cells {
            sheet.insert(addr, cell)?;
        }
        Ok(sheet)
    }

    /// Adds a cached computed value for `addr`.
    pub fn with_cached(mut self, addr: &str, cell: RawCell) -> EngineResult<Self> {
        self.cached.insert(parse_addr(addr)?, cell);
        Ok(self)
    }

    fn insert(&mut self, addr: &str, cell: RawCell) -> EngineResult<()> {
        let parsed = parse_addr(addr)?;
        self.max_row = self.max_row.max(parsed.row);
        self.max_col = self.max_col.max(parsed.col);
        self.cells.insert(parsed, cell);
        Ok(())
    }
}

fn parse_addr(addr: &str) -> EngineResult<CellAddr> {
    CellAddr::parse(addr)
        .ok_or_else(|| EngineError::InvalidTemplate(format!("bad cell address '{addr}'")))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Workbook {
    path: PathBuf,
    sheets: HashMap<String, Sheet>,
}

impl Workbook {
    pub fn load(path: &Path) -> EngineResult<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::MissingTemplate(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        let file: WorkbookFile = serde_json::from_str(&data)?;

        let mut workbook = Self {
            path: path.to_path_buf(),
            sheets: HashMap::new(),
        };
        for (name, sheet_file) in file.sheets {
            let mut sheet = Sheet::default();
            for (addr, cell) in sheet_file.cells {
                sheet.insert(&addr, cell)?;
            }
            for (addr, cell) in sheet_file.cached {
                sheet.cached.insert(parse_addr(&addr)?, cell);
            }
            workbook.sheets.insert(name, sheet);
        }

        info!(
            path = %path.display(),
            sheets = workbook.sheets.len(),
            "loaded pricing template"
        );
        Ok(workbook)
    }

    pub fn with_sheet(mut self, name: &str, sheet: Sheet) -> Self {
        self.sheets.insert(name.to_string(), sheet);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sheet lookup; exact name first, then case-insensitive.
    pub fn sheet(&self, name: &str) -> EngineResult<&Sheet> {
        self.find_sheet(name)
            .map(|(_, sheet)| sheet)
            .ok_or_else(|| EngineError::MissingSheet(name.to_string()))
    }

    /// Canonical stored name for `name`, if the sheet exists.
    pub fn sheet_name(&self, name: &str) -> Option<&str> {
        self.find_sheet(name).map(|(stored, _)| stored)
    }

    fn find_sheet(&self, name: &str) -> Option<(&str, &Sheet)> {
        if let Some((stored, sheet)) = self.sheets.get_key_value(name) {
            return Some((stored.as_str(), sheet));
        }
        self.sheets
            .iter()
            .find(|(stored, _)| stored.eq_ignore_ascii_case(name))
            .map(|(stored, sheet)| (stored.as_str(), sheet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_labels_convert_both_ways() {
        assert_eq!(column_index("A"), Some(1));
        assert_eq!(column_index("z"), Some(26));
        assert_eq!(column_index("AB"), Some(28));
        assert_eq!(column_index("BU"), Some(73));
        assert_eq!(column_index("A1"), None);
        assert_eq!(column_letters(73), "BU");
        assert_eq!(column_letters(26), "Z");
    }

    #[test]
    fn addresses_accept_absolute_markers() {
        assert_eq!(CellAddr::parse("$B$20"), Some(CellAddr::new(2, 20)));
        assert_eq!(CellAddr::parse("c5"), Some(CellAddr::new(3, 5)));
        assert_eq!(CellAddr::parse("B0"), None);
        assert_eq!(CellAddr::parse("20"), None);
        assert_eq!(CellAddr::new(34, 7).to_string(), "AH7");
    }

    #[test]
    fn load_reports_missing_template_and_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("template.json");
        assert!(matches!(Workbook::load(&missing), Err(EngineError::MissingTemplate(_))));

        fs::write(
            &missing,
            r#"{"sheets": {"Rate Tables": {"cells": {"B20": 5.0, "C20": "=B20*2", "D20": null},
                "cached": {"C20": 10.0}}}}"#,
        )
        .unwrap();
        let workbook = Workbook::load(&missing).unwrap();
        let sheet = workbook.sheet("rate tables").unwrap();
        assert_eq!(sheet.get(CellAddr::new(2, 20)), Some(&RawCell::Number(5.0)));
        assert_eq!(sheet.get(CellAddr::new(3, 20)).and_then(RawCell::formula), Some("B20*2"));
        assert_eq!(sheet.get(CellAddr::new(4, 20)), Some(&RawCell::Empty));
        assert_eq!(sheet.cached(CellAddr::new(3, 20)), Some(&RawCell::Number(10.0)));
        assert!(matches!(workbook.sheet("Summary"), Err(EngineError::MissingSheet(_))));
    }

    #[test]
    fn find_text_scans_row_major() {
        let sheet = Sheet::from_cells([
            ("C3", RawCell::Text("Redo Carriers".into())),
            ("B9", RawCell::Text("Redo Carriers".into())),
        ])
        .unwrap();
        assert_eq!(sheet.find_text("Redo Carriers"), Some(CellAddr::new(3, 3)));
        assert_eq!(sheet.find_text("Merchant Carriers"), None);
    }
}
