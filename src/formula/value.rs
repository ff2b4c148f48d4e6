use std::cmp::Ordering;
use std::fmt;

use super::FormulaError;
use crate::infra::workbook::RawCell;

/// A value flowing through formula evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    #[default]
    Blank,
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Blank)
    }

    /// Numeric coercion: blanks are 0, booleans 1/0, numeric text parses.
    pub fn as_number(&self) -> Result<f64, FormulaError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Blank => Ok(0.0),
            Self::Text(text) if text.trim().is_empty() => Ok(0.0),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| FormulaError::Type(format!("'{text}' is not a number"))),
        }
    }

    /// Truth coercion: nonzero numbers and `TRUE`/`FALSE` text.
    pub fn truthy(&self) -> Result<bool, FormulaError> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Blank => Ok(false),
            Self::Text(text) => match text.trim().to_ascii_uppercase().as_str() {
                "TRUE" => Ok(true),
                "FALSE" => Ok(false),
                _ => Err(FormulaError::Type(format!("'{text}' is not a boolean"))),
            },
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(text) => text.clone(),
            Self::Bool(true) => "TRUE".to_string(),
            Self::Bool(false) => "FALSE".to_string(),
            Self::Blank => String::new(),
        }
    }

    /// Spreadsheet comparison order. A blank takes the shape of the other
    /// side; across types numbers sort before text, text before booleans.
    pub fn compare(&self, other: &Value) -> Ordering {
        let (left, right) = match (self, other) {
            (Self::Blank, Self::Blank) => return Ordering::Equal,
            (Self::Blank, other) => (other.blank_like(), other.clone()),
            (value, Self::Blank) => (value.clone(), value.blank_like()),
            (a, b) => (a.clone(), b.clone()),
        };
        match (&left, &right) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => left.type_rank().cmp(&right.type_rank()),
        }
    }

    fn blank_like(&self) -> Value {
        match self {
            Self::Number(_) | Self::Blank => Self::Number(0.0),
            Self::Text(_) => Self::Text(String::new()),
            Self::Bool(_) => Self::Bool(false),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Blank | Self::Number(_) => 0,
            Self::Text(_) => 1,
            Self::Bool(_) => 2,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&RawCell> for Value {
    fn from(cell: &RawCell) -> Self {
        match cell {
            RawCell::Bool(b) => Self::Bool(*b),
            RawCell::Number(n) => Self::Number(*n),
            RawCell::Text(text) => Self::Text(text.clone()),
            RawCell::Empty => Self::Blank,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercions() {
        assert_eq!(Value::Blank.as_number().unwrap(), 0.0);
        assert_eq!(Value::text(" 4.5 ").as_number().unwrap(), 4.5);
        assert!(Value::text("four").as_number().is_err());
        assert!(Value::Number(-1.0).truthy().unwrap());
        assert!(!Value::text("false").truthy().unwrap());
        assert_eq!(Value::Number(3.0).as_text(), "3");
        assert_eq!(Value::Number(0.25).as_text(), "0.25");
    }

    #[test]
    fn comparison_rules() {
        assert_eq!(Value::Blank.compare(&Value::Number(0.0)), Ordering::Equal);
        assert_eq!(Value::Blank.compare(&Value::Number(-1.0)), Ordering::Greater);
        assert_eq!(Value::text("yes").compare(&Value::text("YES")), Ordering::Equal);
        assert_eq!(Value::Number(99.0).compare(&Value::text("1")), Ordering::Less);
        assert_eq!(Value::Bool(false).compare(&Value::text("z")), Ordering::Greater);
    }
}
