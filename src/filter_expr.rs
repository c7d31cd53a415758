//! Purpose: Parse `widecol scan --filter` expressions written in the HBase filter language.
//! Exports: `parse_filter`.
//! Role: CLI adapter from text to `Filter`; the library never parses filter strings.
//! Invariants: `AND` binds tighter than `OR`; parentheses group; keywords are case-insensitive.
//! Invariants: Quoted strings use `''` to embed a single quote. Any parse failure is an argument error.

use widecol::api::{CompareOp, Comparator, Error, ErrorKind, Filter, ListOperator};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(u64),
    Op(CompareOp),
    And,
    Or,
    LParen,
    RParen,
    Comma,
    Eof,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source: String,
}

pub fn parse_filter(expr: &str) -> Result<Filter, Error> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source: expr.to_string(),
    };
    let filter = parser.parse_or()?;
    if parser.current() != &Token::Eof {
        return Err(parser.error(format!("unexpected {:?} after filter", parser.current())));
    }
    Ok(filter)
}

fn tokenize(expr: &str) -> Result<Vec<Token>, Error> {
    let chars: Vec<char> = expr.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
                continue;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
                continue;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
                continue;
            }
            _ => {}
        }

        if matches!(c, '<' | '>' | '=' | '!') {
            let two: String = chars[i..len.min(i + 2)].iter().collect();
            let (symbol, width) = if CompareOp::from_symbol(&two).is_some() {
                (two, 2)
            } else {
                (c.to_string(), 1)
            };
            let op = CompareOp::from_symbol(&symbol)
                .ok_or_else(|| syntax_error(expr, format!("unknown operator '{symbol}'")))?;
            tokens.push(Token::Op(op));
            i += width;
            continue;
        }

        if c == '\'' {
            i += 1;
            let mut value = String::new();
            loop {
                if i >= len {
                    return Err(syntax_error(expr, "unterminated string literal"));
                }
                if chars[i] == '\'' {
                    if i + 1 < len && chars[i + 1] == '\'' {
                        value.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                value.push(chars[i]);
                i += 1;
            }
            tokens.push(Token::Str(value));
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            let value = digits
                .parse::<u64>()
                .map_err(|_| syntax_error(expr, format!("invalid number '{digits}'")))?;
            tokens.push(Token::Int(value));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = match word.to_ascii_uppercase().as_str() {
                "AND" => Token::And,
                "OR" => Token::Or,
                _ => Token::Ident(word),
            };
            tokens.push(token);
            continue;
        }

        return Err(syntax_error(expr, format!("unexpected character '{c}'")));
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), Error> {
        if self.current() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, got {:?}", self.current())))
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        syntax_error(&self.source, message)
    }

    fn parse_or(&mut self) -> Result<Filter, Error> {
        let mut branches = vec![self.parse_and()?];
        while self.current() == &Token::Or {
            self.advance();
            branches.push(self.parse_and()?);
        }
        Ok(collapse(ListOperator::MustPassOne, branches))
    }

    fn parse_and(&mut self) -> Result<Filter, Error> {
        let mut branches = vec![self.parse_primary()?];
        while self.current() == &Token::And {
            self.advance();
            branches.push(self.parse_primary()?);
        }
        Ok(collapse(ListOperator::MustPassAll, branches))
    }

    fn parse_primary(&mut self) -> Result<Filter, Error> {
        match self.advance() {
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                self.expect(Token::LParen)?;
                let args = self.parse_args()?;
                self.expect(Token::RParen)?;
                self.build(&name, args)
            }
            other => Err(self.error(format!("expected a filter, got {other:?}"))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Token>, Error> {
        let mut args = Vec::new();
        if self.current() == &Token::RParen {
            return Ok(args);
        }
        loop {
            match self.advance() {
                token @ (Token::Str(_) | Token::Int(_) | Token::Op(_) | Token::Ident(_)) => {
                    args.push(token)
                }
                other => return Err(self.error(format!("unexpected argument {other:?}"))),
            }
            if self.current() == &Token::Comma {
                self.advance();
                continue;
            }
            return Ok(args);
        }
    }

    fn build(&self, name: &str, args: Vec<Token>) -> Result<Filter, Error> {
        let arity = |expected: &[usize]| -> Result<(), Error> {
            if expected.contains(&args.len()) {
                Ok(())
            } else {
                Err(self.error(format!(
                    "{name} takes {expected:?} arguments, got {}",
                    args.len()
                )))
            }
        };
        match name {
            "PrefixFilter" => {
                arity(&[1])?;
                Ok(Filter::Prefix(self.string(&args[0])?.into_bytes()))
            }
            "ColumnPrefixFilter" => {
                arity(&[1])?;
                Ok(Filter::ColumnPrefix(self.string(&args[0])?.into_bytes()))
            }
            "RowFilter" => {
                arity(&[2])?;
                Ok(Filter::Row {
                    op: self.op(&args[0])?,
                    comparator: self.comparator(&args[1])?,
                })
            }
            "ValueFilter" => {
                arity(&[2])?;
                Ok(Filter::Value {
                    op: self.op(&args[0])?,
                    comparator: self.comparator(&args[1])?,
                })
            }
            "SingleColumnValueFilter" => {
                arity(&[4, 5, 6])?;
                let filter_if_missing = match args.get(4) {
                    Some(token) => self.boolean(token)?,
                    None => false,
                };
                if let Some(token) = args.get(5) {
                    // Only the latest version is stored, so the flag has no effect.
                    self.boolean(token)?;
                }
                Ok(Filter::SingleColumnValue {
                    family: self.string(&args[0])?,
                    qualifier: self.string(&args[1])?.into_bytes(),
                    op: self.op(&args[2])?,
                    comparator: self.comparator(&args[3])?,
                    filter_if_missing,
                })
            }
            "KeyOnlyFilter" => {
                arity(&[0])?;
                Ok(Filter::KeyOnly)
            }
            "FirstKeyOnlyFilter" => {
                arity(&[0])?;
                Ok(Filter::FirstKeyOnly)
            }
            "PageFilter" => {
                arity(&[1])?;
                match &args[0] {
                    Token::Int(limit) => Ok(Filter::Page(*limit)),
                    other => Err(self.error(format!("PageFilter needs a number, got {other:?}"))),
                }
            }
            other => Err(self
                .error(format!("unsupported filter '{other}'"))
                .with_hint(SUPPORTED_FILTERS)),
        }
    }

    fn string(&self, token: &Token) -> Result<String, Error> {
        match token {
            Token::Str(value) => Ok(value.clone()),
            other => Err(self.error(format!("expected a quoted string, got {other:?}"))),
        }
    }

    fn op(&self, token: &Token) -> Result<CompareOp, Error> {
        match token {
            Token::Op(op) => Ok(*op),
            other => Err(self.error(format!("expected a compare operator, got {other:?}"))),
        }
    }

    fn boolean(&self, token: &Token) -> Result<bool, Error> {
        match token {
            Token::Ident(word) if word.eq_ignore_ascii_case("true") => Ok(true),
            Token::Ident(word) if word.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(self.error(format!("expected true or false, got {other:?}"))),
        }
    }

    fn comparator(&self, token: &Token) -> Result<Comparator, Error> {
        let raw = self.string(token)?;
        let (kind, value) = raw
            .split_once(':')
            .ok_or_else(|| self.error(format!("comparator '{raw}' needs a type prefix")))?;
        match kind.to_ascii_lowercase().as_str() {
            "binary" => Ok(Comparator::Binary(value.as_bytes().to_vec())),
            "binaryprefix" => Ok(Comparator::BinaryPrefix(value.as_bytes().to_vec())),
            "substring" => Ok(Comparator::Substring(value.to_string())),
            other => Err(self.error(format!("unsupported comparator '{other}'"))),
        }
    }
}

const SUPPORTED_FILTERS: &str = "Supported: PrefixFilter, RowFilter, ValueFilter, ColumnPrefixFilter, SingleColumnValueFilter, KeyOnlyFilter, FirstKeyOnlyFilter, PageFilter.";

fn collapse(operator: ListOperator, mut branches: Vec<Filter>) -> Filter {
    if branches.len() == 1 {
        if let Some(only) = branches.pop() {
            return only;
        }
    }
    Filter::List {
        operator,
        filters: branches,
    }
}

fn syntax_error(expr: &str, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Argument)
        .with_message(format!("invalid --filter expression: {}", message.into()))
        .with_hint(format!(
            "Failed to parse `{expr}`. Example: --filter \"PrefixFilter('row') AND ValueFilter(=, 'binary:1')\""
        ))
}
