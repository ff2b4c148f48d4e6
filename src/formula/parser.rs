//! Recursive-descent parser.
//!
//! Precedence, loosest first: comparison, concatenation, additive,
//! multiplicative, power, unary sign, postfix percent, primary.
//!
//! Nesting (parentheses, function arguments, prefix signs) and the operator
//! count are both bounded, so neither parsing nor walking the tree can run
//! out of stack on a hostile template cell.

use super::lexer::{tokenize, Op, Token};
use super::FormulaError;
use crate::infra::workbook::{column_index, CellAddr};

#[derive(Clone, Debug, PartialEq)]
pub enum RefKind {
    Cell(CellAddr),
    /// Rectangle between two corners, inclusive.
    Range(CellAddr, CellAddr),
    /// Whole columns, e.g. `A:C`.
    Columns(u32, u32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub sheet: Option<String>,
    pub kind: RefKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    /// An omitted function argument, as in `IF(A1,,1)`.
    Missing,
    Ref(Reference),
    Neg(Box<Expr>),
    Percent(Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Deepest parenthesis, argument or sign nesting accepted in one formula.
pub const MAX_NESTING: usize = 64;
/// Most operators accepted in one formula.
pub const MAX_OPERATORS: usize = 512;

/// Function names whose evaluation scans whole ranges by criteria.
const CRITERIA_FUNCTIONS: [&str; 6] = [
    "COUNTIF",
    "COUNTIFS",
    "SUMIF",
    "SUMIFS",
    "AVERAGEIF",
    "AVERAGEIFS",
];

impl Expr {
    /// Whole-column references and criteria-family calls are served from the
    /// workbook's cached values instead of being re-derived.
    pub fn is_expensive(&self) -> bool {
        match self {
            Expr::Ref(reference) => matches!(reference.kind, RefKind::Columns(..)),
            Expr::Neg(inner) | Expr::Percent(inner) => inner.is_expensive(),
            Expr::Binary(_, left, right) => left.is_expensive() || right.is_expensive(),
            Expr::Call(name, args) => {
                CRITERIA_FUNCTIONS.contains(&name.as_str()) || args.iter().any(Expr::is_expensive)
            }
            _ => false,
        }
    }
}

pub fn parse(src: &str) -> Result<Expr, FormulaError> {
    let src = src.strip_prefix('=').unwrap_or(src);
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
        operators: 0,
    };
    let expr = parser.comparison()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(FormulaError::Parse(format!("unexpected {token:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_op(&mut self, ops: &[Op]) -> Option<Op> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, wanted: Token) -> Result<(), FormulaError> {
        match self.next() {
            Some(token) if token == wanted => Ok(()),
            other => Err(FormulaError::Parse(format!(
                "expected {wanted:?}, found {other:?}"
            ))),
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, FormulaError>,
    ) -> Result<T, FormulaError> {
        if self.nesting >= MAX_NESTING {
            return Err(FormulaError::DepthExceeded(MAX_NESTING));
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn count_operator(&mut self) -> Result<(), FormulaError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(FormulaError::DepthExceeded(MAX_OPERATORS));
        }
        Ok(())
    }

    fn binary_level(
        &mut self,
        ops: &[Op],
        operand: fn(&mut Self) -> Result<Expr, FormulaError>,
    ) -> Result<Expr, FormulaError> {
        let mut left = operand(self)?;
        while let Some(op) = self.eat_op(ops) {
            self.count_operator()?;
            let right = operand(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(
            &[Op::Eq, Op::Ne, Op::Lt, Op::Le, Op::Gt, Op::Ge],
            Self::concat,
        )
    }

    fn concat(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(&[Op::Concat], Self::additive)
    }

    fn additive(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(&[Op::Add, Op::Sub], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(&[Op::Mul, Op::Div], Self::power)
    }

    fn power(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(&[Op::Pow], Self::unary)
    }

    /// Prefix sign binds tighter than `^`, as in spreadsheets: `-2^2` is 4.
    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.eat_op(&[Op::Sub, Op::Add]) {
            Some(op) => {
                self.count_operator()?;
                let operand = self.nested(Self::unary)?;
                Ok(match op {
                    Op::Sub => Expr::Neg(Box::new(operand)),
                    _ => operand,
                })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, FormulaError> {
        let mut expr = self.primary()?;
        while self.eat_op(&[Op::Percent]).is_some() {
            self.count_operator()?;
            expr = Expr::Percent(Box::new(expr));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(text)) => Ok(Expr::Text(text)),
            Some(Token::LParen) => {
                let inner = self.nested(Self::comparison)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Sheet(sheet)) => match self.next() {
                Some(Token::Ident(word)) => self.reference(Some(sheet), &word),
                other => Err(FormulaError::Parse(format!(
                    "expected reference after sheet '{sheet}', found {other:?}"
                ))),
            },
            Some(Token::Ident(word)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    return self.call(word.to_ascii_uppercase());
                }
                match word.to_ascii_uppercase().as_str() {
                    "TRUE" => Ok(Expr::Bool(true)),
                    "FALSE" => Ok(Expr::Bool(false)),
                    _ => self.reference(None, &word),
                }
            }
            other => Err(FormulaError::Parse(format!("unexpected {other:?}"))),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, FormulaError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(Expr::Call(name, args));
        }
        loop {
            match self.peek() {
                Some(Token::Comma) | Some(Token::RParen) => args.push(Expr::Missing),
                _ => args.push(self.nested(Self::comparison)?),
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(Expr::Call(name, args)),
                other => {
                    return Err(FormulaError::Parse(format!(
                        "expected ',' or ')' in {name}, found {other:?}"
                    )))
                }
            }
        }
    }

    fn reference(&mut self, sheet: Option<String>, word: &str) -> Result<Expr, FormulaError> {
        let bad = || FormulaError::Parse(format!("unknown name '{word}'"));
        let ranged = self.peek() == Some(&Token::Colon);

        let kind = if let Some(start) = CellAddr::parse(word) {
            if ranged {
                self.pos += 1;
                let end = match self.next() {
                    Some(Token::Ident(end)) => CellAddr::parse(&end).ok_or_else(bad)?,
                    _ => return Err(bad()),
                };
                RefKind::Range(start, end)
            } else {
                RefKind::Cell(start)
            }
        } else if ranged {
            let start = column_index(&word.replace('$', "")).ok_or_else(bad)?;
            self.pos += 1;
            let end = match self.next() {
                Some(Token::Ident(end)) => column_index(&end.replace('$', "")).ok_or_else(bad)?,
                _ => return Err(bad()),
            };
            RefKind::Columns(start, end)
        } else {
            return Err(bad());
        };

        Ok(Expr::Ref(Reference { sheet, kind }))
    }
}
