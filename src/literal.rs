//! Extraction of literal data from an untrusted page script.
//!
//! The config script is never evaluated. It is tokenized and scanned for the
//! handful of statement shapes that put data onto the config object:
//!
//! ```text
//! var NAME = { key: VALUE, ... }
//! NAME.key = VALUE
//! NAME["key"] = VALUE
//! Object.defineProperty(NAME, KEY, { value: VALUE, ... })
//! ```
//!
//! `VALUE` must be a literal: string, integer, boolean, `null`, array, object,
//! or `atob("...")` of a string. Anything else at one of those positions is an
//! error. Statements of any other shape are skipped.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

/// Lenient base64, matching what browsers accept for `atob`.
pub(crate) const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Array(Vec<Literal>),
    Object(Vec<(String, Literal)>),
}

impl Literal {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Literal]> {
        match self {
            Literal::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Literal> {
        match self {
            Literal::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LiteralError {
    #[error("unterminated string starting at byte {0}")]
    UnterminatedString(usize),
    #[error("unterminated comment starting at byte {0}")]
    UnterminatedComment(usize),
    #[error("invalid escape sequence at byte {0}")]
    InvalidEscape(usize),
    #[error("unexpected end of script")]
    UnexpectedEnd,
    #[error("expected {expected}, found '{found}'")]
    Unexpected { expected: &'static str, found: String },
    #[error("refusing non-literal expression starting at '{0}'")]
    NotLiteral(String),
    #[error("invalid integer '{0}'")]
    InvalidNumber(String),
    #[error("atob argument is not valid base64 text")]
    InvalidBase64,
    #[error("unterminated regular expression starting at byte {0}")]
    UnterminatedRegex(usize),
    #[error("literal nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

/// Deepest array/object nesting accepted in a value.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Punct(&'static str),
    Regex(String),
    Other(char),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Ident(s) | Token::Num(s) | Token::Regex(s) => s.clone(),
            Token::Str(s) => format!("{:?}", s),
            Token::Punct(p) => p.to_string(),
            Token::Other(c) => c.to_string(),
        }
    }
}

// Longest first
const PUNCTS: [&str; 24] = [
    "===", "!==", "==", "!=", "=>", "<=", ">=", "&&", "||", "=", "!", ".", ",", ":", ";", "(",
    ")", "[", "]", "{", "}", "-", "+", "?",
];

// Keywords after which a `/` opens a regular expression
const REGEX_KEYWORDS: [&str; 10] = [
    "return", "typeof", "case", "in", "of", "new", "delete", "void", "throw", "instanceof",
];

/// Whether a `/` following `prev` starts a regular expression rather than a
/// division.
fn regex_allowed(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(Token::Punct(p)) => !matches!(*p, ")" | "]"),
        Some(Token::Ident(id)) => REGEX_KEYWORDS.contains(&id.as_str()),
        // An interpolated template is a complete operand
        Some(Token::Other(c)) => *c != '`',
        Some(Token::Str(_) | Token::Num(_) | Token::Regex(_)) => false,
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, LiteralError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
        } else if src[i..].starts_with("//") {
            i = src[i..].find('\n').map(|n| i + n).unwrap_or(bytes.len());
        } else if src[i..].starts_with("/*") {
            let end = src[i + 2..]
                .find("*/")
                .ok_or(LiteralError::UnterminatedComment(i))?;
            i += end + 4;
        } else if c == b'/' && regex_allowed(tokens.last()) {
            let next = read_regex(src, i)?;
            tokens.push(Token::Regex(src[i..next].to_string()));
            i = next;
        } else if c == b'"' || c == b'\'' || c == b'`' {
            let (s, next) = read_string(src, i)?;
            match s {
                Some(s) => tokens.push(Token::Str(s)),
                // Template literal with interpolation
                None => tokens.push(Token::Other('`')),
            }
            i = next;
        } else if c.is_ascii_digit() {
            let len = src[i..]
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'))
                .unwrap_or(bytes.len() - i);
            tokens.push(Token::Num(src[i..i + len].to_string()));
            i += len;
        } else if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let len = src[i..]
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
                .unwrap_or(bytes.len() - i);
            tokens.push(Token::Ident(src[i..i + len].to_string()));
            i += len;
        } else if let Some(p) = PUNCTS.iter().find(|p| src[i..].starts_with(**p)) {
            tokens.push(Token::Punct(*p));
            i += p.len();
        } else {
            let ch = src[i..].chars().next().ok_or(LiteralError::UnexpectedEnd)?;
            tokens.push(Token::Other(ch));
            i += ch.len_utf8();
        }
    }

    Ok(tokens)
}

/// Reads a quoted string starting at `start`. Returns `None` for template
/// literals that interpolate, together with the index after the closing quote.
fn read_string(src: &str, start: usize) -> Result<(Option<String>, usize), LiteralError> {
    let mut chars = src[start..].char_indices();
    let (_, quote) = chars.next().ok_or(LiteralError::UnexpectedEnd)?;
    let mut out = String::new();
    let mut interpolated = false;

    while let Some((off, ch)) = chars.next() {
        let pos = start + off;
        match ch {
            c if c == quote => return Ok(((!interpolated).then_some(out), pos + 1)),
            '\n' if quote != '`' => return Err(LiteralError::UnterminatedString(start)),
            '$' if quote == '`' && src[pos..].starts_with("${") => {
                interpolated = true;
                out.push(ch);
            }
            '\\' => {
                let (_, esc) = chars.next().ok_or(LiteralError::UnterminatedString(start))?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'v' => out.push('\u{b}'),
                    '0' => out.push('\0'),
                    'x' => out.push(read_hex_escape(&mut chars, 2, pos)?),
                    'u' => out.push(read_hex_escape(&mut chars, 4, pos)?),
                    // Line continuation
                    '\n' => (),
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
    }

    Err(LiteralError::UnterminatedString(start))
}

/// Returns the index after a regular expression literal (flags included)
/// starting at `start`.
fn read_regex(src: &str, start: usize) -> Result<usize, LiteralError> {
    let mut chars = src[start..].char_indices().skip(1);
    let mut in_class = false;

    while let Some((off, ch)) = chars.next() {
        match ch {
            '\\' => {
                chars.next();
            }
            '\n' => break,
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                let end = start + off + 1;
                let flags = src[end..]
                    .find(|c: char| !c.is_ascii_alphabetic())
                    .unwrap_or(src.len() - end);
                return Ok(end + flags);
            }
            _ => (),
        }
    }

    Err(LiteralError::UnterminatedRegex(start))
}

fn read_hex_escape(
    chars: &mut std::str::CharIndices<'_>,
    digits: usize,
    pos: usize,
) -> Result<char, LiteralError> {
    let hex: String = chars.by_ref().take(digits).map(|(_, c)| c).collect();
    if hex.len() != digits {
        return Err(LiteralError::InvalidEscape(pos));
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or(LiteralError::InvalidEscape(pos))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self, ahead: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn next(&mut self) -> Result<&'a Token, LiteralError> {
        let tok = self.tokens.get(self.pos).ok_or(LiteralError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn is_punct(&self, ahead: usize, p: &str) -> bool {
        matches!(self.peek(ahead), Some(Token::Punct(q)) if *q == p)
    }

    fn is_ident(&self, ahead: usize, name: &str) -> bool {
        matches!(self.peek(ahead), Some(Token::Ident(s)) if s == name)
    }

    fn expect(&mut self, p: &'static str) -> Result<(), LiteralError> {
        match self.next()? {
            Token::Punct(q) if *q == p => Ok(()),
            other => Err(LiteralError::Unexpected {
                expected: p,
                found: other.text(),
            }),
        }
    }

    fn value(&mut self) -> Result<Literal, LiteralError> {
        let tok = self.next()?;
        match tok {
            Token::Str(s) => Ok(Literal::Str(s.clone())),
            Token::Num(n) => parse_int(n, false),
            Token::Punct("-") => match self.next()? {
                Token::Num(n) => parse_int(n, true),
                other => Err(LiteralError::NotLiteral(format!("-{}", other.text()))),
            },
            // Minified booleans
            Token::Punct("!") => match self.next()? {
                Token::Num(n) if n == "0" => Ok(Literal::Bool(true)),
                Token::Num(n) if n == "1" => Ok(Literal::Bool(false)),
                other => Err(LiteralError::NotLiteral(format!("!{}", other.text()))),
            },
            Token::Ident(id) => match id.as_str() {
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                "null" => Ok(Literal::Null),
                "atob" if self.is_punct(0, "(") => {
                    self.expect("(")?;
                    let arg = match self.next()? {
                        Token::Str(s) => s,
                        other => return Err(LiteralError::NotLiteral(format!("atob({}", other.text()))),
                    };
                    self.expect(")")?;
                    atob(arg).map(Literal::Str)
                }
                _ => Err(LiteralError::NotLiteral(id.clone())),
            },
            Token::Punct("[") => self.nested(Self::array),
            Token::Punct("{") => self.nested(Self::object),
            other => Err(LiteralError::NotLiteral(other.text())),
        }
    }

    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Literal, LiteralError>,
    ) -> Result<Literal, LiteralError> {
        if self.depth >= MAX_DEPTH {
            return Err(LiteralError::TooDeep);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Array body, after the opening `[`.
    fn array(&mut self) -> Result<Literal, LiteralError> {
        let mut items = Vec::new();
        loop {
            if self.is_punct(0, "]") {
                self.pos += 1;
                break;
            }
            items.push(self.value()?);
            match self.next()? {
                Token::Punct(",") => (),
                Token::Punct("]") => break,
                other => {
                    return Err(LiteralError::Unexpected {
                        expected: "',' or ']'",
                        found: other.text(),
                    })
                }
            }
        }
        Ok(Literal::Array(items))
    }

    /// Object body, after the opening `{`.
    fn object(&mut self) -> Result<Literal, LiteralError> {
        let mut entries = Vec::new();
        loop {
            if self.is_punct(0, "}") {
                self.pos += 1;
                break;
            }
            let key = match self.next()? {
                Token::Ident(k) | Token::Str(k) | Token::Num(k) => k.clone(),
                other => {
                    return Err(LiteralError::Unexpected {
                        expected: "property name",
                        found: other.text(),
                    })
                }
            };
            self.expect(":")?;
            let value = self.value()?;
            set(&mut entries, key, value);
            match self.next()? {
                Token::Punct(",") => (),
                Token::Punct("}") => break,
                other => {
                    return Err(LiteralError::Unexpected {
                        expected: "',' or '}'",
                        found: other.text(),
                    })
                }
            }
        }
        Ok(Literal::Object(entries))
    }

    /// Property name position: a string literal or `atob` of one.
    fn key(&mut self) -> Result<String, LiteralError> {
        match self.value()? {
            Literal::Str(s) => Ok(s),
            Literal::Int(i) => Ok(i.to_string()),
            other => Err(LiteralError::Unexpected {
                expected: "property name",
                found: format!("{:?}", other),
            }),
        }
    }
}

fn parse_int(raw: &str, negative: bool) -> Result<Literal, LiteralError> {
    let value: i64 = raw
        .parse()
        .map_err(|_| LiteralError::InvalidNumber(raw.to_string()))?;
    Ok(Literal::Int(if negative { -value } else { value }))
}

fn atob(encoded: &str) -> Result<String, LiteralError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| LiteralError::InvalidBase64)?;
    // atob yields one char per byte
    Ok(bytes.into_iter().map(char::from).collect())
}

fn set(entries: &mut Vec<(String, Literal)>, key: String, value: Literal) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Collects every literal property assigned to the object called `name` in
/// `script`, in assignment order. Later assignments replace earlier ones.
pub fn extract_object(script: &str, name: &str) -> Result<Vec<(String, Literal)>, LiteralError> {
    let tokens = tokenize(script)?;
    let mut p = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let mut entries = Vec::new();

    while p.pos < tokens.len() {
        let member_access = p.pos > 0 && matches!(tokens[p.pos - 1], Token::Punct("."));

        if matches!(p.peek(0), Some(Token::Ident(kw)) if kw == "var" || kw == "let" || kw == "const")
            && p.is_ident(1, name)
            && p.is_punct(2, "=")
        {
            // var NAME = { ... }
            p.pos += 3;
            match p.value()? {
                Literal::Object(fields) => {
                    for (k, v) in fields {
                        set(&mut entries, k, v);
                    }
                }
                other => {
                    return Err(LiteralError::Unexpected {
                        expected: "object literal",
                        found: format!("{:?}", other),
                    })
                }
            }
        } else if !member_access && p.is_ident(0, name) && p.is_punct(1, ".") && p.is_punct(3, "=") {
            // NAME.key = VALUE
            let key = match p.peek(2) {
                Some(Token::Ident(k)) => k.clone(),
                _ => {
                    p.pos += 1;
                    continue;
                }
            };
            p.pos += 4;
            let value = p.value()?;
            set(&mut entries, key, value);
        } else if let (Some(Token::Str(key)), true) = (
            p.peek(2),
            !member_access
                && p.is_ident(0, name)
                && p.is_punct(1, "[")
                && p.is_punct(3, "]")
                && p.is_punct(4, "="),
        ) {
            // NAME["key"] = VALUE
            let key = key.clone();
            p.pos += 5;
            let value = p.value()?;
            set(&mut entries, key, value);
        } else if p.is_ident(0, "Object")
            && p.is_punct(1, ".")
            && p.is_ident(2, "defineProperty")
            && p.is_punct(3, "(")
            && p.is_ident(4, name)
            && p.is_punct(5, ",")
        {
            // Object.defineProperty(NAME, KEY, { value: VALUE })
            p.pos += 6;
            let key = p.key()?;
            p.expect(",")?;
            let descriptor = p.value()?;
            p.expect(")")?;
            let value = descriptor
                .get("value")
                .cloned()
                .ok_or_else(|| LiteralError::Unexpected {
                    expected: "descriptor with a value",
                    found: format!("{:?}", descriptor),
                })?;
            set(&mut entries, key, value);
        } else {
            p.pos += 1;
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(entries: &'a [(String, Literal)], key: &str) -> &'a Literal {
        &entries
            .iter()
            .find(|(k, _)| k == key)
            .unwrap_or_else(|| panic!("missing key {}", key))
            .1
    }

    #[test]
    fn statement_shapes() {
        let script = r#"
            var gC = { PRz: [1, 9, 3], "old": 'x' };
            // gC.commented = 1;
            gC.Rjm = [0, 8, -2, 0];
            gC["stz"] = ["0x34", '0x70'];
            Object.defineProperty(gC, atob("QURL"), { value: ["1 10", "YQ=="], enumerable: !0 });
            /* Object.defineProperty(gC, "nope", { value: 1 }); */
            gC.old = `y`;
        "#;
        let entries = extract_object(script, "gC").expect("Could not extract");

        assert_eq!(get(&entries, "PRz"), &Literal::Array(vec![Literal::Int(1), Literal::Int(9), Literal::Int(3)]));
        assert_eq!(get(&entries, "Rjm").as_array().unwrap()[2], Literal::Int(-2));
        assert_eq!(get(&entries, "stz").as_array().unwrap()[1].as_str(), Some("0x70"));
        assert_eq!(get(&entries, "ADK").as_array().unwrap()[1].as_str(), Some("YQ=="));
        assert_eq!(get(&entries, "old").as_str(), Some("y"));
        assert!(!entries.iter().any(|(k, _)| k == "commented" || k == "nope"));
    }

    #[test]
    fn ignores_reads_and_other_code() {
        let script = r#"
            var gC = {};
            function d(i) { if (/^[0-3]$/.test(i)) { return gC[atob(gC.AWF[i])]; } return null; }
            var x = window.gC; x.gC = 5; gC.a == 1;
            gC.k = "v";
        "#;
        let entries = extract_object(script, "gC").expect("Could not extract");
        assert_eq!(entries, vec![("k".to_string(), Literal::Str("v".into()))]);
    }

    #[test]
    fn refuses_code() {
        let err = extract_object("var gC = {}; gC.k = compute();", "gC").unwrap_err();
        assert_eq!(err, LiteralError::NotLiteral("compute".into()));

        let err = extract_object(
            "var gC = {}; Object.defineProperty(gC, 'k', { get: function () { return 1; } });",
            "gC",
        )
        .unwrap_err();
        assert_eq!(err, LiteralError::NotLiteral("function".into()));

        let err = extract_object("var gC = {}; gC.k = `a${b}`;", "gC").unwrap_err();
        assert_eq!(err, LiteralError::NotLiteral("`".into()));

        let err = extract_object("var gC = {}; gC.k = 1.5;", "gC").unwrap_err();
        assert_eq!(err, LiteralError::InvalidNumber("1.5".into()));
    }

    #[test]
    fn string_escapes() {
        let entries =
            extract_object(r#"var gC = {}; gC.k = "a\x41B\"c\\";"#, "gC").expect("Could not extract");
        assert_eq!(get(&entries, "k").as_str(), Some("aAB\"c\\"));

        assert_eq!(
            extract_object("var gC = {}; gC.k = 'open", "gC").unwrap_err(),
            LiteralError::UnterminatedString(20)
        );
    }

    #[test]
    fn regex_literals_are_skipped() {
        let script = r#"
            var gC = {};
            gC.k = "v";
            function f(s) { return s.replace(/'/g, ""); }
            var u = /https?:\/\/[^/"]+/i.exec(location), half = gC.k.length / 2;
            var g = (/"/).test(u) ? 1 : 2 / half;
            gC.n = 7;
        "#;
        let entries = extract_object(script, "gC").expect("Could not extract");
        assert_eq!(get(&entries, "k").as_str(), Some("v"));
        assert_eq!(get(&entries, "n").as_int(), Some(7));

        // A regex is never a value
        let err = extract_object("var gC = {}; gC.k = /x/;", "gC").unwrap_err();
        assert_eq!(err, LiteralError::NotLiteral("/x/".into()));

        assert_eq!(
            extract_object("var gC = {}; x = /open", "gC").unwrap_err(),
            LiteralError::UnterminatedRegex(17)
        );
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("var gC = {{}}; gC.k = {};", "[".repeat(200_000));
        assert_eq!(extract_object(&deep, "gC").unwrap_err(), LiteralError::TooDeep);

        let deep = format!("var gC = {}", "{a: ".repeat(MAX_DEPTH + 1));
        assert_eq!(extract_object(&deep, "gC").unwrap_err(), LiteralError::TooDeep);

        // Exactly at the limit is fine
        let ok = format!(
            "var gC = {{}}; gC.k = {}1{};",
            "[".repeat(MAX_DEPTH),
            "]".repeat(MAX_DEPTH)
        );
        let entries = extract_object(&ok, "gC").expect("Could not extract");
        let mut v = get(&entries, "k");
        for _ in 0..MAX_DEPTH {
            v = &v.as_array().unwrap()[0];
        }
        assert_eq!(v, &Literal::Int(1));
    }

    #[test]
    fn truncated_script() {
        assert_eq!(
            extract_object("var gC = {}; gC.k = [1, 2", "gC").unwrap_err(),
            LiteralError::UnexpectedEnd
        );
    }
}
