use super::FormulaError;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    /// Function name, boolean literal, or cell/column reference.
    Ident(String),
    /// Sheet qualifier, without the trailing `!`.
    Sheet(String),
    Op(Op),
    LParen,
    RParen,
    Comma,
    Colon,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| FormulaError::Parse(format!("bad number '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            '"' => {
                let (text, next) = quoted(&chars, i, '"')?;
                tokens.push(Token::Str(text));
                i = next;
            }
            '\'' => {
                let (name, next) = quoted(&chars, i, '\'')?;
                if chars.get(next) != Some(&'!') {
                    return Err(FormulaError::Parse(format!("expected '!' after sheet '{name}'")));
                }
                tokens.push(Token::Sheet(name));
                i = next + 1;
            }
            c if c.is_alphabetic() || c == '$' || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '$' | '_' | '.'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if chars.get(i) == Some(&'!') {
                    tokens.push(Token::Sheet(word));
                    i += 1;
                } else {
                    tokens.push(Token::Ident(word));
                }
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (ch, next) {
                    ('<', Some('>')) => (Token::Op(Op::Ne), 2),
                    ('<', Some('=')) => (Token::Op(Op::Le), 2),
                    ('>', Some('=')) => (Token::Op(Op::Ge), 2),
                    ('<', _) => (Token::Op(Op::Lt), 1),
                    ('>', _) => (Token::Op(Op::Gt), 1),
                    ('=', _) => (Token::Op(Op::Eq), 1),
                    ('+', _) => (Token::Op(Op::Add), 1),
                    ('-', _) => (Token::Op(Op::Sub), 1),
                    ('*', _) => (Token::Op(Op::Mul), 1),
                    ('/', _) => (Token::Op(Op::Div), 1),
                    ('^', _) => (Token::Op(Op::Pow), 1),
                    ('&', _) => (Token::Op(Op::Concat), 1),
                    ('%', _) => (Token::Op(Op::Percent), 1),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    (',', _) => (Token::Comma, 1),
                    (':', _) => (Token::Colon, 1),
                    _ => return Err(FormulaError::Parse(format!("unexpected character '{ch}'"))),
                };
                tokens.push(token);
                i += width;
            }
        }
    }
    Ok(tokens)
}

/// Reads a `quote`-delimited run starting at `start`; a doubled quote is an
/// escaped quote. Returns the text and the index after the closing quote.
fn quoted(chars: &[char], start: usize, quote: char) -> Result<(String, usize), FormulaError> {
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                text.push(quote);
                i += 2;
                continue;
            }
            return Ok((text, i + 1));
        }
        text.push(chars[i]);
        i += 1;
    }
    Err(FormulaError::Parse("unterminated quoted text".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_sheet_qualified_ranges_and_operators() {
        let tokens = tokenize("SUM('Rate Tables'!$B$5:B6)<>1.5e1").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("SUM".into()),
                Token::LParen,
                Token::Sheet("Rate Tables".into()),
                Token::Ident("$B$5".into()),
                Token::Colon,
                Token::Ident("B6".into()),
                Token::RParen,
                Token::Op(Op::Ne),
                Token::Number(15.0),
            ]
        );
    }

    #[test]
    fn strings_unescape_doubled_quotes() {
        assert_eq!(
            tokenize(r#""say ""hi""" & Summary!A1"#).unwrap(),
            vec![
                Token::Str(r#"say "hi""#.into()),
                Token::Op(Op::Concat),
                Token::Sheet("Summary".into()),
                Token::Ident("A1".into()),
            ]
        );
        assert!(tokenize("\"open").is_err());
        assert!(tokenize("A1 # 2").is_err());
    }
}
