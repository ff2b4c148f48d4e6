use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use super::lexer::Op;
use super::parser::{parse, Expr, RefKind, Reference};
use super::value::Value;
use super::FormulaError;
use crate::infra::workbook::{CellAddr, Sheet, Workbook};

/// Cells pinned to fixed values, keyed by `(sheet, address)`.
pub type Overrides = HashMap<(String, CellAddr), Value>;

type CellKey = (String, CellAddr);

/// Expression levels walked at once, across every cell on the stack.
const MAX_EVAL_DEPTH: usize = 1024;

enum Operand {
    /// Values from a reference; text and blanks inside are skipped by
    /// aggregate functions.
    Range(Vec<Value>),
    Scalar(Value),
}

/// Evaluates workbook cells on demand, memoizing each cell once.
///
/// Cells whose value depended on a cut cycle are only remembered until the
/// outermost lookup returns, so the answer for a cell never depends on which
/// cells were asked for earlier.
///
/// One evaluator serves one question; build a fresh one when the overrides
/// change.
pub struct Evaluator<'w> {
    workbook: &'w Workbook,
    overrides: Overrides,
    memo: RefCell<HashMap<CellKey, Value>>,
    provisional: RefCell<HashMap<CellKey, Value>>,
    stack: RefCell<Vec<CellKey>>,
    cuts: Cell<u64>,
    depth: Cell<usize>,
    max_depth: usize,
}

impl<'w> Evaluator<'w> {
    pub fn new(workbook: &'w Workbook, max_depth: usize) -> Self {
        Self {
            workbook,
            overrides: Overrides::new(),
            memo: RefCell::new(HashMap::new()),
            provisional: RefCell::new(HashMap::new()),
            stack: RefCell::new(Vec::new()),
            cuts: Cell::new(0),
            depth: Cell::new(0),
            max_depth: max_depth.max(1),
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        for ((sheet, addr), value) in overrides {
            self.pin(&sheet, addr, value);
        }
        self
    }

    /// Pins one cell. The workbook itself is untouched.
    pub fn pin(&mut self, sheet: &str, addr: CellAddr, value: Value) {
        let sheet = self.workbook.sheet_name(sheet).unwrap_or(sheet).to_string();
        self.overrides.insert((sheet, addr), value);
        self.memo.get_mut().clear();
    }

    /// Value of one cell. Never fails: unreadable formulas fall back to the
    /// workbook's cached value, then to blank.
    pub fn cell_value(&self, sheet: &str, addr: CellAddr) -> Value {
        let Some(sheet_name) = self.workbook.sheet_name(sheet) else {
            debug!(sheet, cell = %addr, "reference to unknown sheet");
            return Value::Blank;
        };
        let key = (sheet_name.to_string(), addr);

        if let Some(value) = self.overrides.get(&key) {
            return value.clone();
        }
        if let Some(value) = self.memo.borrow().get(&key) {
            return value.clone();
        }
        if let Some(value) = self.provisional.borrow().get(&key) {
            return value.clone();
        }
        if self.stack.borrow().contains(&key) {
            debug!(sheet = sheet_name, cell = %addr, "circular reference evaluates to blank");
            self.cuts.set(self.cuts.get() + 1);
            return Value::Blank;
        }
        let Ok(sheet_data) = self.workbook.sheet(sheet_name) else {
            return Value::Blank;
        };

        let outermost = self.stack.borrow().is_empty();
        let cuts_before = self.cuts.get();
        let value = match sheet_data.get(addr) {
            None => Value::Blank,
            Some(raw) => match raw.formula() {
                None => Value::from(raw),
                Some(src) => self.formula_cell(&key, sheet_data, src),
            },
        };
        if self.cuts.get() == cuts_before {
            self.memo.borrow_mut().insert(key, value.clone());
        } else {
            self.provisional.borrow_mut().insert(key, value.clone());
        }
        if outermost {
            self.provisional.borrow_mut().clear();
        }
        value
    }

    /// Evaluates an ad hoc formula as if it lived on `sheet`.
    pub fn evaluate(&self, sheet: &str, formula: &str) -> Result<Value, FormulaError> {
        let expr = parse(formula)?;
        if expr.is_expensive() {
            return Ok(Value::Blank);
        }
        self.eval(&expr, sheet)
    }

    fn formula_cell(&self, key: &CellKey, sheet: &Sheet, src: &str) -> Value {
        let fallback = |reason: &dyn std::fmt::Display| {
            debug!(sheet = %key.0, cell = %key.1, %reason, "formula fallback");
            sheet.cached(key.1).map(Value::from).unwrap_or_default()
        };

        if self.stack.borrow().len() >= self.max_depth {
            return fallback(&FormulaError::DepthExceeded(self.max_depth));
        }
        let expr = match parse(src) {
            Ok(expr) => expr,
            Err(err) => return fallback(&err),
        };
        if expr.is_expensive() {
            return fallback(&"expensive pattern");
        }

        self.stack.borrow_mut().push(key.clone());
        let result = self.eval(&expr, &key.0);
        self.stack.borrow_mut().pop();

        result.unwrap_or_else(|err| fallback(&err))
    }

    fn eval(&self, expr: &Expr, sheet: &str) -> Result<Value, FormulaError> {
        let depth = self.depth.get();
        if depth >= MAX_EVAL_DEPTH {
            return Err(FormulaError::DepthExceeded(MAX_EVAL_DEPTH));
        }
        self.depth.set(depth + 1);
        let result = self.eval_expr(expr, sheet);
        self.depth.set(depth);
        result
    }

    fn eval_expr(&self, expr: &Expr, sheet: &str) -> Result<Value, FormulaError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Text(text) => Ok(Value::Text(text.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Missing => Ok(Value::Blank),
            Expr::Ref(reference) => match reference.kind {
                RefKind::Cell(addr) => Ok(self.cell_value(ref_sheet(reference, sheet), addr)),
                _ => Err(FormulaError::RangeInScalarContext),
            },
            Expr::Neg(inner) => Ok(Value::Number(-self.eval(inner, sheet)?.as_number()?)),
            Expr::Percent(inner) => Ok(Value::Number(self.eval(inner, sheet)?.as_number()? / 100.0)),
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, sheet)?;
                let right = self.eval(right, sheet)?;
                binary(*op, &left, &right)
            }
            Expr::Call(name, args) => self.call(name, args, sheet),
        }
    }

    fn call(&self, name: &str, args: &[Expr], sheet: &str) -> Result<Value, FormulaError> {
        match name {
            "IF" => {
                if args.is_empty() || args.len() > 3 {
                    return Err(FormulaError::Arity {
                        function: "IF",
                        expected: "1 to 3",
                    });
                }
                let branch = if self.eval(&args[0], sheet)?.truthy()? {
                    args.get(1).ok_or(Value::Bool(true))
                } else {
                    args.get(2).ok_or(Value::Bool(false))
                };
                match branch {
                    Ok(expr) => self.eval(expr, sheet),
                    Err(default) => Ok(default),
                }
            }
            "AND" | "OR" => {
                if args.is_empty() {
                    return Err(FormulaError::Arity {
                        function: if name == "AND" { "AND" } else { "OR" },
                        expected: "at least 1",
                    });
                }
                let mut flags = Vec::new();
                for arg in args {
                    match self.operand(arg, sheet)? {
                        Operand::Range(values) => {
                            for value in values {
                                match value {
                                    Value::Bool(b) => flags.push(b),
                                    Value::Number(n) => flags.push(n != 0.0),
                                    Value::Text(_) | Value::Blank => {}
                                }
                            }
                        }
                        Operand::Scalar(value) => flags.push(value.truthy()?),
                    }
                }
                if flags.is_empty() {
                    return Err(FormulaError::Type(format!("{name} found no logical values")));
                }
                let result = if name == "AND" {
                    flags.iter().all(|b| *b)
                } else {
                    flags.iter().any(|b| *b)
                };
                Ok(Value::Bool(result))
            }
            "IFERROR" => {
                if args.len() != 2 {
                    return Err(FormulaError::Arity {
                        function: "IFERROR",
                        expected: "2",
                    });
                }
                self.eval(&args[0], sheet)
                    .or_else(|_| self.eval(&args[1], sheet))
            }
            "SUM" => {
                let mut total = 0.0;
                for arg in args {
                    match self.operand(arg, sheet)? {
                        Operand::Range(values) => {
                            total += values
                                .iter()
                                .filter_map(|value| match value {
                                    Value::Number(n) => Some(*n),
                                    _ => None,
                                })
                                .sum::<f64>();
                        }
                        Operand::Scalar(value) => total += value.as_number()?,
                    }
                }
                Ok(Value::Number(total))
            }
            other => Err(FormulaError::UnsupportedFunction(other.to_string())),
        }
    }

    fn operand(&self, arg: &Expr, sheet: &str) -> Result<Operand, FormulaError> {
        match arg {
            Expr::Ref(reference) => Ok(Operand::Range(self.range_values(reference, sheet))),
            _ => Ok(Operand::Scalar(self.eval(arg, sheet)?)),
        }
    }

    /// Columns and rows in use on `sheet`, counting pinned cells.
    fn extent(&self, sheet: &str) -> (u32, u32) {
        let Some(name) = self.workbook.sheet_name(sheet) else {
            return (0, 0);
        };
        let (mut cols, mut rows) = self
            .workbook
            .sheet(name)
            .map(|data| (data.max_col(), data.max_row()))
            .unwrap_or((0, 0));
        for (pinned_sheet, addr) in self.overrides.keys() {
            if pinned_sheet == name {
                cols = cols.max(addr.col);
                rows = rows.max(addr.row);
            }
        }
        (cols, rows)
    }

    /// Flattens a reference row by row. Rectangles are clipped to the cells in
    /// use; everything outside is blank, which no aggregate counts.
    fn range_values(&self, reference: &Reference, sheet: &str) -> Vec<Value> {
        let sheet = ref_sheet(reference, sheet);
        let (used_cols, used_rows) = self.extent(sheet);
        let (first_col, first_row, last_col, last_row) = match reference.kind {
            RefKind::Cell(addr) => (addr.col, addr.row, addr.col, addr.row),
            RefKind::Range(a, b) => (
                a.col.min(b.col),
                a.row.min(b.row),
                a.col.max(b.col),
                a.row.max(b.row),
            ),
            RefKind::Columns(a, b) => (a.min(b), 1, a.max(b), used_rows),
        };
        let (last_col, last_row) = (last_col.min(used_cols), last_row.min(used_rows));

        let mut values = Vec::new();
        for row in first_row..=last_row {
            for col in first_col..=last_col {
                values.push(self.cell_value(sheet, CellAddr::new(col, row)));
            }
        }
        values
    }
}

fn ref_sheet<'a>(reference: &'a Reference, current: &'a str) -> &'a str {
    reference.sheet.as_deref().unwrap_or(current)
}

fn binary(op: Op, left: &Value, right: &Value) -> Result<Value, FormulaError> {
    let compare = |accept: fn(Ordering) -> bool| Ok(Value::Bool(accept(left.compare(right))));
    match op {
        Op::Eq => compare(|o| o == Ordering::Equal),
        Op::Ne => compare(|o| o != Ordering::Equal),
        Op::Lt => compare(|o| o == Ordering::Less),
        Op::Le => compare(|o| o != Ordering::Greater),
        Op::Gt => compare(|o| o == Ordering::Greater),
        Op::Ge => compare(|o| o != Ordering::Less),
        Op::Concat => Ok(Value::Text(left.as_text() + &right.as_text())),
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
            let (a, b) = (left.as_number()?, right.as_number()?);
            let n = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div if b == 0.0 => return Err(FormulaError::DivideByZero),
                Op::Div => a / b,
                _ => a.powf(b),
            };
            Ok(Value::Number(n))
        }
        Op::Percent => Err(FormulaError::Parse("'%' is not a binary operator".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::workbook::RawCell;

    fn text(s: &str) -> RawCell {
        RawCell::Text(s.to_string())
    }

    fn workbook(cells: Vec<(&str, RawCell)>) -> Workbook {
        Workbook::default().with_sheet("Summary", Sheet::from_cells(cells).unwrap())
    }

    fn at(addr: &str) -> CellAddr {
        CellAddr::parse(addr).unwrap()
    }

    #[test]
    fn overrides_drive_if_without_touching_the_workbook() {
        let book = workbook(vec![("A1", RawCell::Number(0.0)), ("B1", text(r#"=IF(A1>0,"Yes","No")"#))]);

        let positive = Evaluator::new(&book, 16).with_overrides(Overrides::from([(
            ("Summary".to_string(), at("A1")),
            Value::Number(5.0),
        )]));
        assert_eq!(positive.cell_value("Summary", at("B1")), Value::text("Yes"));

        let mut negative = Evaluator::new(&book, 16);
        negative.pin("summary", at("A1"), Value::Number(-1.0));
        assert_eq!(negative.cell_value("Summary", at("B1")), Value::text("No"));

        let sheet = book.sheet("Summary").unwrap();
        assert_eq!(sheet.get(at("A1")), Some(&RawCell::Number(0.0)));
    }

    #[test]
    fn cycles_evaluate_to_blank() {
        let book = workbook(vec![("A1", text("=B1+1")), ("B1", text("=A1+1"))]);
        let eval = Evaluator::new(&book, 16);
        // B1 sees A1 as blank while A1 is on the stack.
        assert_eq!(eval.cell_value("Summary", at("A1")), Value::Number(2.0));
    }

    #[test]
    fn depth_limit_falls_back_to_cached_value() {
        let sheet = Sheet::from_cells(vec![
            ("A1", text("=A2")),
            ("A2", text("=A3")),
            ("A3", text("=A4")),
            ("A4", RawCell::Number(7.0)),
        ])
        .unwrap()
        .with_cached("A3", RawCell::Number(6.0))
        .unwrap();
        let book = Workbook::default().with_sheet("Summary", sheet);

        assert_eq!(Evaluator::new(&book, 2).cell_value("Summary", at("A1")), Value::Number(6.0));
        assert_eq!(Evaluator::new(&book, 8).cell_value("Summary", at("A1")), Value::Number(7.0));
    }

    #[test]
    fn expensive_formulas_use_cached_values_or_blank() {
        let sheet = Sheet::from_cells(vec![
            ("A1", text(r#"=COUNTIF(B1:B9,">0")"#)),
            ("A2", text("=SUM(B:B)")),
        ])
        .unwrap()
        .with_cached("A1", RawCell::Number(4.0))
        .unwrap();
        let book = Workbook::default().with_sheet("Summary", sheet);
        let eval = Evaluator::new(&book, 16);

        assert_eq!(eval.cell_value("Summary", at("A1")), Value::Number(4.0));
        assert_eq!(eval.cell_value("Summary", at("A2")), Value::Blank);
    }

    #[test]
    fn errors_degrade_and_iferror_catches() {
        let book = workbook(vec![
            ("A1", RawCell::Number(0.0)),
            ("B1", text("=10/A1")),
            ("C1", text("=IFERROR(10/A1,-1)")),
            ("D1", text("=VLOOKUP(A1,B1:C1,2)")),
        ]);
        let eval = Evaluator::new(&book, 16);
        assert_eq!(eval.cell_value("Summary", at("B1")), Value::Blank);
        assert_eq!(eval.cell_value("Summary", at("C1")), Value::Number(-1.0));
        assert_eq!(eval.cell_value("Summary", at("D1")), Value::Blank);
        assert_eq!(
            eval.evaluate("Summary", "=VLOOKUP(1,2,3)"),
            Err(FormulaError::UnsupportedFunction("VLOOKUP".into()))
        );
    }

    #[test]
    fn sum_and_logic_over_ranges_across_sheets() {
        let rates = Sheet::from_cells(vec![
            ("B5", RawCell::Number(1.5)),
            ("B6", text("n/a")),
            ("B7", RawCell::Number(2.5)),
        ])
        .unwrap();
        let book = workbook(vec![("A1", text("=SUM('Rate Tables'!B5:B7, 1)"))])
            .with_sheet("Rate Tables", rates);
        let eval = Evaluator::new(&book, 16);

        assert_eq!(eval.cell_value("Summary", at("A1")), Value::Number(5.0));
        assert_eq!(
            eval.evaluate("Summary", "=AND('Rate Tables'!B5:B7, A1>4)"),
            Ok(Value::Bool(true))
        );
        assert_eq!(eval.evaluate("Summary", "=OR(FALSE, 0)"), Ok(Value::Bool(false)));
        assert_eq!(eval.evaluate("Summary", "=\"Zone \" & 5"), Ok(Value::text("Zone 5")));
        assert_eq!(eval.evaluate("Summary", "=IF(FALSE,1)"), Ok(Value::Bool(false)));
    }
}
