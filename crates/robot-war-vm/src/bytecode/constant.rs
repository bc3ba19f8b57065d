//! Parser for the constant reprs found in `LOAD_CONST` notes.

use crate::{types::Set, value::Value};

/// A parsed constant: either a value or a reference to another code object of the module.
#[derive(Debug)]
pub(crate) enum Constant {
    Value(Value),
    Code(String),
}

pub(crate) fn parse_constant(text: &str) -> Result<Constant, String> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("<code") {
        return code_label(rest).map(Constant::Code);
    }
    let mut parser = Parser { text, pos: 0 };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos == text.len() {
        Ok(Constant::Value(value))
    } else {
        Err(format!("unexpected trailing text in constant {text:?}"))
    }
}

/// Accepts both `<code LABEL>` and CPython's `<code object LABEL at 0x..., file ...>`.
fn code_label(rest: &str) -> Result<String, String> {
    let rest = rest.trim_start();
    let rest = rest.strip_prefix("object").map_or(rest, str::trim_start);
    let label: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '>' && *c != ',')
        .collect();
    if label.is_empty() {
        Err("code reference without a label".to_owned())
    } else {
        Ok(label)
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn value(&mut self) -> Result<Value, String> {
        self.skip_ws();
        match self.peek() {
            None => Err("empty constant".to_owned()),
            Some('\'' | '"') => self.string().map(Value::from),
            Some('(') => {
                self.bump();
                Ok(Value::tuple(self.items(')')?))
            }
            Some('{') => {
                self.bump();
                let items = self.items('}')?;
                Ok(Value::set(Set::from_values(items).map_err(|err| err.to_string())?))
            }
            Some('.') if self.eat("...") => Ok(Value::Ellipsis),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(_) => self.word(),
        }
    }

    /// Comma separated values up to `close`, allowing a trailing comma.
    fn items(&mut self, close: char) -> Result<Vec<Value>, String> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(items);
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some(c) if c == close => return Ok(items),
                other => return Err(format!("expected ',' or '{close}', found {other:?}")),
            }
        }
    }

    fn word(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        let word = &self.text[start..self.pos];
        match word {
            "None" => Ok(Value::None),
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "Ellipsis" => Ok(Value::Ellipsis),
            "inf" => Ok(Value::Float(f64::INFINITY)),
            "nan" => Ok(Value::Float(f64::NAN)),
            "frozenset" => {
                self.skip_ws();
                if !self.eat("(") {
                    return Err("expected '(' after frozenset".to_owned());
                }
                self.skip_ws();
                let value = if self.eat(")") {
                    Value::set(Set::new())
                } else {
                    let inner = self.value()?;
                    self.skip_ws();
                    if !self.eat(")") {
                        return Err("unterminated frozenset".to_owned());
                    }
                    inner
                };
                Ok(value)
            }
            "" => Err(format!("unexpected character in constant {:?}", self.rest())),
            other => Err(format!("unsupported constant '{other}'")),
        }
    }

    fn number(&mut self) -> Result<Value, String> {
        let negative = if self.eat("-") {
            true
        } else {
            self.eat("+");
            false
        };
        if self.eat("inf") {
            return Ok(Value::Float(if negative { f64::NEG_INFINITY } else { f64::INFINITY }));
        }
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('+' | '-')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }
        let digits: String = self.text[start..self.pos].chars().filter(|c| *c != '_').collect();
        if digits.is_empty() {
            return Err("malformed number".to_owned());
        }
        let signed = if negative { format!("-{digits}") } else { digits };
        if is_float {
            signed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|err| format!("bad float {signed}: {err}"))
        } else {
            signed
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("integer constant {signed} is out of range"))
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let Some(quote) = self.bump() else {
            return Err("expected string".to_owned());
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string constant".to_owned()),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => out.push(self.escape()?),
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self) -> Result<char, String> {
        let c = self.bump().ok_or("unterminated escape")?;
        Ok(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'v' => '\x0b',
            'x' => self.hex_escape(2)?,
            'u' => self.hex_escape(4)?,
            'U' => self.hex_escape(8)?,
            other => other,
        })
    }

    fn hex_escape(&mut self, width: usize) -> Result<char, String> {
        let end = self.pos + width;
        let digits = self.text.get(self.pos..end).ok_or("truncated escape")?;
        let code = u32::from_str_radix(digits, 16).map_err(|err| err.to_string())?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| format!("invalid code point {code:#x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(text: &str) -> Value {
        match parse_constant(text).unwrap() {
            Constant::Value(value) => value,
            Constant::Code(label) => panic!("unexpected code ref {label}"),
        }
    }

    #[test]
    fn scalars() {
        assert!(value("None").is_none());
        assert_eq!(value("-12").py_repr(), "-12");
        assert_eq!(value("1_000").py_repr(), "1000");
        assert_eq!(value("2.5e-3").py_repr(), "0.0025");
        assert_eq!(value("-inf").py_repr(), "-inf");
        assert_eq!(value("...").py_repr(), "Ellipsis");
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(value(r"'a\'b\n'").py_str(), "a'b\n");
        assert_eq!(value(r#""it's""#).py_str(), "it's");
        assert_eq!(value(r"'\x41é'").py_str(), "A\u{e9}");
    }

    #[test]
    fn nested_tuples_and_frozensets() {
        assert_eq!(value("('a', (1, 2.0), None)").py_repr(), "('a', (1, 2.0), None)");
        assert_eq!(value("(1,)").py_repr(), "(1,)");
        assert_eq!(value("frozenset({1, 2})").py_repr(), "{1, 2}");
    }

    #[test]
    fn code_references() {
        for text in ["<code f>", "<code object f at 0x7f00, file \"a.py\", line 3>"] {
            match parse_constant(text).unwrap() {
                Constant::Code(label) => assert_eq!(label, "f"),
                Constant::Value(v) => panic!("expected code ref, got {v:?}"),
            }
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_constant("spam").is_err());
        assert!(parse_constant("'open").is_err());
        assert!(parse_constant("(1, 2").is_err());
    }
}
