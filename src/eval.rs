//! Represents command templates with embedded variable references, e.g.
//! `cc -c $in -o $out`, and mechanisms for expanding those into plain strings.

use crate::scanner::{ParseError, ParseResult};
use crate::smallmap::SmallMap;
use std::borrow::Cow;

/// An environment providing a mapping of variable name to variable value.
/// A template may need several environments to be fully expanded; they are
/// consulted in order.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

impl Env for SmallMap<String, String> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}

/// One token within an EvalString, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<'text> {
    Literal(&'text str),
    VarRef(&'text str),
}

/// A parsed but unexpanded template.
#[derive(Debug, PartialEq)]
pub struct EvalString<'text>(Vec<EvalPart<'text>>);

fn is_ident_char(c: u8) -> bool {
    matches!(c, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-')
}

impl<'text> EvalString<'text> {
    /// Parse `$var`, `${var}` and the escapes `$$`, `$ ` and `$:`.
    pub fn parse(text: &'text str) -> ParseResult<Self> {
        let bytes = text.as_bytes();
        let mut parts = Vec::new();
        let mut literal_start = 0;
        let mut ofs = 0;
        while ofs < bytes.len() {
            if bytes[ofs] != b'$' {
                ofs += 1;
                continue;
            }
            if literal_start < ofs {
                parts.push(EvalPart::Literal(&text[literal_start..ofs]));
            }
            let dollar = ofs;
            ofs += 1;
            match bytes.get(ofs) {
                Some(b'$') => parts.push(EvalPart::Literal("$")),
                Some(b' ') => parts.push(EvalPart::Literal(" ")),
                Some(b':') => parts.push(EvalPart::Literal(":")),
                Some(b'{') => {
                    let start = ofs + 1;
                    let end = match bytes[start..].iter().position(|&c| c == b'}') {
                        Some(len) => start + len,
                        None => return Err(ParseError::new("unterminated ${", dollar)),
                    };
                    let name = &text[start..end];
                    if name.is_empty() || !name.bytes().all(|c| is_ident_char(c) || c == b'.') {
                        return Err(ParseError::new("invalid variable name", start));
                    }
                    parts.push(EvalPart::VarRef(name));
                    ofs = end;
                }
                Some(&c) if is_ident_char(c) => {
                    let start = ofs;
                    while ofs < bytes.len() && is_ident_char(bytes[ofs]) {
                        ofs += 1;
                    }
                    parts.push(EvalPart::VarRef(&text[start..ofs]));
                    literal_start = ofs;
                    continue;
                }
                _ => return Err(ParseError::new("bad $-escape (literal $ must be written as $$)", dollar)),
            }
            ofs += 1;
            literal_start = ofs;
        }
        if literal_start < bytes.len() {
            parts.push(EvalPart::Literal(&text[literal_start..]));
        }
        Ok(EvalString(parts))
    }

    /// Expand into a plain String, looking each variable up in the first Env
    /// that has it.  Unknown variables expand to nothing.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut result = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => result.push_str(s),
                EvalPart::VarRef(v) => {
                    if let Some(val) = envs.iter().find_map(|env| env.get_var(v)) {
                        result.push_str(&val);
                    }
                }
            }
        }
        result
    }

    pub fn parts(&self) -> &[EvalPart<'text>] {
        &self.0
    }
}
