//! A small packet-template grammar, in the spirit of the original's `{ fill(0xff, 6), c16(80),
//! csumip(14, 33), ... }` syntax (`trafgen_conf.y`/`example()`), reduced to the handful of forms
//! this crate needs to compile a [`PacketTemplate`]/[`DynFields`] pair. Not a reimplementation of
//! the original's full grammar (nesting, includes, `cpu()` scoping, C preprocessor passthrough
//! are intentionally out of scope) — just enough of its shape to write config files by hand.
//!
//! ```text
//! { fill(0xff, 6), 0x00, 0x02, drnd(2), c16(0x0800), cnt8(0, 10, 1), csumip(0, 19) }
//! ```

use crate::packet::{Checksum, ChecksumKind, Counter, CounterKind, DynFields, PacketTemplate};

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug)]
pub struct ParseError(pub String);

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config parse error: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

struct Tokenizer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Ident(String),
    Number(u64),
    Str(String),
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Tokenizer {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
                self.chars.next();
            }
            if let Some((_, '/')) = self.chars.peek() {
                let mut clone = self.chars.clone();
                clone.next();
                if let Some((_, '*')) = clone.peek() {
                    self.chars.next();
                    self.chars.next();
                    let mut prev = ' ';
                    while let Some((_, c)) = self.chars.next() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        prev = c;
                    }
                    continue;
                }
            }
            break;
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        self.skip_trivia();
        let (start, c) = match self.chars.peek().copied() {
            Some(pair) => pair,
            None => return Ok(None),
        };

        match c {
            '{' => {
                self.chars.next();
                Ok(Some(Token::LBrace))
            }
            '}' => {
                self.chars.next();
                Ok(Some(Token::RBrace))
            }
            '(' => {
                self.chars.next();
                Ok(Some(Token::LParen))
            }
            ')' => {
                self.chars.next();
                Ok(Some(Token::RParen))
            }
            ',' => {
                self.chars.next();
                Ok(Some(Token::Comma))
            }
            '"' => {
                self.chars.next();
                let mut s = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, '"')) => break,
                        Some((_, c)) => s.push(c),
                        None => return Err(ParseError("unterminated string literal".into())),
                    }
                }
                Ok(Some(Token::Str(s)))
            }
            '\'' => {
                self.chars.next();
                let byte = match self.chars.next() {
                    Some((_, c)) => c as u64,
                    None => return Err(ParseError("unterminated char literal".into())),
                };
                match self.chars.next() {
                    Some((_, '\'')) => {}
                    _ => return Err(ParseError("unterminated char literal".into())),
                }
                Ok(Some(Token::Number(byte)))
            }
            c if c.is_ascii_digit() => {
                let mut end = start + c.len_utf8();
                self.chars.next();
                while matches!(self.chars.peek(), Some((_, c)) if c.is_ascii_alphanumeric() || *c == 'x' || *c == 'b')
                {
                    let (i, c) = self.chars.next().unwrap();
                    end = i + c.len_utf8();
                }
                let text = &self.src[start..end];
                let value = parse_numeric_literal(text)?;
                Ok(Some(Token::Number(value)))
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                self.chars.next();
                while matches!(self.chars.peek(), Some((_, c)) if c.is_alphanumeric() || *c == '_')
                {
                    let (i, c) = self.chars.next().unwrap();
                    end = i + c.len_utf8();
                }
                Ok(Some(Token::Ident(self.src[start..end].to_string())))
            }
            other => Err(ParseError(format!("unexpected character {other:?}"))),
        }
    }
}

fn parse_numeric_literal(text: &str) -> Result<u64, ParseError> {
    if let Some(bin) = text.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).map_err(|e| ParseError(e.to_string()))
    } else if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).map_err(|e| ParseError(e.to_string()))
    } else {
        text.parse().map_err(|_| ParseError(format!("bad numeric literal {text:?}")))
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokenizer = Tokenizer::new(src);
    let mut tokens = Vec::new();
    while let Some(tok) = tokenizer.next_token()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<(), ParseError> {
        match self.bump() {
            Some(ref t) if t == want => Ok(()),
            other => Err(ParseError(format!("expected {want:?}, found {other:?}"))),
        }
    }

    fn number(&mut self) -> Result<u64, ParseError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(n),
            other => Err(ParseError(format!("expected a number, found {other:?}"))),
        }
    }

    fn call_args(&mut self) -> Result<Vec<u64>, ParseError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.number()?);
            while self.peek() == Some(&Token::Comma) {
                self.bump();
                args.push(self.number()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }
}

/// Parses one `{ ... }` packet template into its payload bytes plus dynamic-field descriptors.
pub fn parse(src: &str) -> Result<(PacketTemplate, DynFields), ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };

    parser.expect(&Token::LBrace)?;

    let mut payload = Vec::new();
    let mut fields = DynFields::default();

    loop {
        match parser.peek() {
            Some(&Token::RBrace) => {
                parser.bump();
                break;
            }
            None => return Err(ParseError("unexpected end of input, missing '}'".into())),
            _ => {}
        }

        match parser.bump() {
            Some(Token::Number(n)) => {
                if n > 0xff {
                    return Err(ParseError(format!("byte literal {n} out of range")));
                }
                payload.push(n as u8);
            }
            Some(Token::Str(s)) => payload.extend(s.into_bytes()),
            Some(Token::Ident(name)) => match name.as_str() {
                "fill" => {
                    let args = parser.call_args()?;
                    let (byte, count) = match args.as_slice() {
                        [b, n] => (*b, *n),
                        _ => return Err(ParseError("fill(byte, count) takes 2 arguments".into())),
                    };
                    if byte > 0xff {
                        return Err(ParseError("fill byte out of range".into()));
                    }
                    payload.extend(std::iter::repeat(byte as u8).take(count as usize));
                }
                "c16" => {
                    let args = parser.call_args()?;
                    let v = args.first().copied().ok_or_else(|| {
                        ParseError("c16(value) takes 1 argument".to_string())
                    })?;
                    payload.extend_from_slice(&(v as u16).to_be_bytes());
                }
                "c32" => {
                    let args = parser.call_args()?;
                    let v = args.first().copied().ok_or_else(|| {
                        ParseError("c32(value) takes 1 argument".to_string())
                    })?;
                    payload.extend_from_slice(&(v as u32).to_be_bytes());
                }
                "rnd" => {
                    // Static random fill, resolved once here at compile time — unlike `drnd`,
                    // these bytes never change again at send time.
                    let args = parser.call_args()?;
                    let count = args
                        .first()
                        .copied()
                        .ok_or_else(|| ParseError("rnd(count) takes 1 argument".to_string()))?;
                    use rand::RngCore;
                    let mut rng = rand::thread_rng();
                    for _ in 0..count {
                        payload.push((rng.next_u32() & 0xff) as u8);
                    }
                }
                "drnd" => {
                    let args = parser.call_args()?;
                    let count = args
                        .first()
                        .copied()
                        .ok_or_else(|| ParseError("drnd(count) takes 1 argument".to_string()))?;
                    for _ in 0..count {
                        fields.randomizers.push(crate::packet::Randomizer {
                            off: payload.len(),
                        });
                        payload.push(0);
                    }
                }
                "cnt8" | "cntd8" => {
                    let args = parser.call_args()?;
                    let (min, max, inc) = match args.as_slice() {
                        [min, max, inc] => (*min, *max, *inc),
                        _ => {
                            return Err(ParseError(format!(
                                "{name}(min, max, inc) takes 3 arguments"
                            )))
                        }
                    };
                    if min > 0xff || max > 0xff || inc > 0xff {
                        return Err(ParseError("counter bounds must fit a byte".into()));
                    }
                    let kind = if name == "cnt8" {
                        CounterKind::Inc
                    } else {
                        CounterKind::Dec
                    };
                    fields.counters.push(Counter::new(
                        payload.len(),
                        min as u8,
                        max as u8,
                        inc as u8,
                        kind,
                    ));
                    payload.push(min as u8);
                }
                "csumip" | "csumudp" | "csumtcp" => {
                    let args = parser.call_args()?;
                    let (from, to) = match args.as_slice() {
                        [from, to] => (*from as usize, *to as usize),
                        _ => return Err(ParseError(format!("{name}(from, to) takes 2 arguments"))),
                    };
                    let kind = match name.as_str() {
                        "csumip" => ChecksumKind::Ip,
                        "csumudp" => ChecksumKind::Udp,
                        _ => ChecksumKind::Tcp,
                    };
                    fields.checksums.push(Checksum {
                        off: payload.len(),
                        from,
                        to,
                        kind,
                    });
                    payload.extend_from_slice(&[0u8, 0u8]);
                }
                other => return Err(ParseError(format!("unknown element {other:?}"))),
            },
            other => return Err(ParseError(format!("unexpected token {other:?}"))),
        }

        match parser.peek() {
            Some(&Token::Comma) => {
                parser.bump();
            }
            Some(&Token::RBrace) => {}
            other => return Err(ParseError(format!("expected ',' or '}}', found {other:?}"))),
        }
    }

    Ok((PacketTemplate::new(payload), fields))
}

/// Splits a config file into its top-level `{ ... }` blocks (brace-depth aware, so nested braces
/// inside a block don't split it) and parses each into a template, producing one
/// [`crate::packet::CompiledPackets`] for the whole file. Mirrors the original allowing several
/// packets per config, minus its `cpu(n):` scoping prefix.
pub fn parse_all(src: &str) -> Result<crate::packet::CompiledPackets, ParseError> {
    let mut templates = Vec::new();
    let mut dyn_fields = Vec::new();

    let mut depth = 0i32;
    let mut block_start = None;
    let mut in_comment = false;
    let mut chars = src.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if in_comment {
            if c == '*' && matches!(chars.peek(), Some((_, '/'))) {
                chars.next();
                in_comment = false;
            }
            continue;
        }
        if c == '/' && matches!(chars.peek(), Some((_, '*'))) {
            chars.next();
            in_comment = true;
            continue;
        }
        match c {
            '{' => {
                if depth == 0 {
                    block_start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(ParseError("unbalanced '}'".into()));
                }
                if depth == 0 {
                    let start = block_start.take().expect("depth reached 0 without a start");
                    let (template, fields) = parse(&src[start..=i])?;
                    templates.push(template);
                    dyn_fields.push(fields);
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ParseError("unbalanced '{'".into()));
    }

    Ok(crate::packet::CompiledPackets {
        templates,
        dyn_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_bytes_and_fill_concatenate_in_order() {
        let (template, fields) = parse("{ fill(0xff, 2), 0x00, 0x01 }").unwrap();
        assert_eq!(template.payload, vec![0xff, 0xff, 0x00, 0x01]);
        assert!(fields.is_empty());
    }

    #[test]
    fn c16_and_c32_are_big_endian() {
        let (template, _) = parse("{ c16(0x0800), c32(0x01020304) }").unwrap();
        assert_eq!(template.payload, vec![0x08, 0x00, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn drnd_reserves_zeroed_bytes_and_records_offsets() {
        let (template, fields) = parse("{ 0xAA, drnd(2) }").unwrap();
        assert_eq!(template.payload, vec![0xAA, 0, 0]);
        assert_eq!(fields.randomizers.len(), 2);
        assert_eq!(fields.randomizers[0].off, 1);
        assert_eq!(fields.randomizers[1].off, 2);
    }

    #[test]
    fn cnt8_records_a_counter_at_its_offset() {
        let (template, fields) = parse("{ 0x00, cnt8(0, 9, 1) }").unwrap();
        assert_eq!(template.payload, vec![0x00, 0x00]);
        assert_eq!(fields.counters.len(), 1);
        assert_eq!(fields.counters[0].off, 1);
        assert_eq!(fields.counters[0].max, 9);
    }

    #[test]
    fn csumip_reserves_two_bytes_and_records_bounds() {
        let (template, fields) = parse("{ fill(0, 14), csumip(0, 13) }").unwrap();
        assert_eq!(template.len(), 16);
        assert_eq!(fields.checksums.len(), 1);
        assert_eq!(fields.checksums[0].from, 0);
        assert_eq!(fields.checksums[0].to, 13);
    }

    #[test]
    fn string_literal_appends_its_bytes() {
        let (template, _) = parse("{ \"hi\" }").unwrap();
        assert_eq!(template.payload, b"hi");
    }

    #[test]
    fn comments_are_ignored() {
        let (template, _) = parse("{ /* mac */ 0x01, /* proto */ 0x02 }").unwrap();
        assert_eq!(template.payload, vec![0x01, 0x02]);
    }

    #[test]
    fn missing_closing_brace_is_an_error() {
        assert!(parse("{ 0x01, 0x02").is_err());
    }

    #[test]
    fn byte_literal_out_of_range_is_rejected() {
        assert!(parse("{ 0x100 }").is_err());
    }

    #[test]
    fn parse_all_splits_sibling_blocks() {
        let packets = parse_all("{ 0x01, 0x02 }, { 0x03 }").unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets.templates[0].payload, vec![0x01, 0x02]);
        assert_eq!(packets.templates[1].payload, vec![0x03]);
    }

    #[test]
    fn parse_all_rejects_unbalanced_braces() {
        assert!(parse_all("{ 0x01, { 0x02 }").is_err());
    }
}
