//! Parsing of Makefile-syntax dependency files (.d) as emitted by compilers,
//! e.g. `gcc -MD`.
//!
//! Escaping follows what GCC emits and ninja accepts:
//! - `\` at the end of a line continues the record on the next line;
//! - 2N+1 backslashes before a space give N backslashes and a literal space,
//!   while 2N backslashes before a space are literal and end the path;
//! - `\#` is `#` and `$$` is `$`;
//! - any other backslash is literal, so Windows paths pass through;
//! - `:` only separates outputs from inputs when followed by whitespace.

use crate::error::Error;
use crate::scanner::{ParseResult, Scanner};
use crate::smallmap::SmallMap;
use std::borrow::Cow;

/// Parsed depfile records: each output maps to its inputs, in the order seen.
/// Paths borrow from the input text unless they contained escapes.
pub type Deps<'a> = SmallMap<Cow<'a, str>, Vec<Cow<'a, str>>>;

/// Deps detached from the text they were parsed from.
pub type OwnedDeps = SmallMap<String, Vec<String>>;

fn is_separator(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b'\0')
}

fn unterminated<T>(scanner: &Scanner) -> ParseResult<T> {
    scanner.parse_error("unterminated line continuation")
}

/// Skip spaces and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.peek() {
            b' ' | b'\t' => scanner.next(),
            b'\\' => {
                let newline_len = match (scanner.peek_at(1), scanner.peek_at(2)) {
                    (b'\n', _) => 1,
                    (b'\r', b'\n') => 2,
                    _ => return Ok(()),
                };
                for _ in 0..=newline_len {
                    scanner.next();
                }
                if scanner.at_end() {
                    return unterminated(scanner);
                }
            }
            _ => return Ok(()),
        }
    }
}

/// Skip whitespace including blank lines between records.
fn skip_blank_lines(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        skip_spaces(scanner)?;
        if !scanner.skip_newline() {
            return Ok(());
        }
    }
}

/// Switch a path to an owned buffer, copying what has been read so far.
fn owned<'b>(buf: &'b mut Option<Vec<u8>>, scanner: &Scanner, start: usize) -> &'b mut Vec<u8> {
    buf.get_or_insert_with(|| scanner.bytes(start, scanner.ofs).to_vec())
}

fn push_backslashes(buf: &mut Option<Vec<u8>>, n: usize) {
    if let Some(buf) = buf {
        buf.extend(std::iter::repeat(b'\\').take(n));
    }
}

fn advance(scanner: &mut Scanner, n: usize) {
    for _ in 0..n {
        scanner.next();
    }
}

fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<Cow<'a, str>>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    // Set once the path contains an escape and can no longer borrow the input.
    let mut unescaped: Option<Vec<u8>> = None;
    loop {
        let c = scanner.peek();
        match c {
            b'\0' => {
                if !scanner.at_end() {
                    return scanner.parse_error("unexpected nul byte");
                }
                break;
            }
            b' ' | b'\t' | b'\n' => break,
            b'\r' if scanner.peek_at(1) == b'\n' => break,
            b':' if is_separator(scanner.peek_at(1)) => break,
            b'$' if scanner.peek_at(1) == b'$' => {
                owned(&mut unescaped, scanner, start).push(b'$');
                advance(scanner, 2);
            }
            b'\\' => {
                let mut run = 1;
                while scanner.peek_at(run) == b'\\' {
                    run += 1;
                }
                match scanner.peek_at(run) {
                    sep @ (b' ' | b'\t') if run % 2 == 1 => {
                        let buf = owned(&mut unescaped, scanner, start);
                        buf.extend(std::iter::repeat(b'\\').take(run / 2));
                        buf.push(sep);
                        advance(scanner, run + 1);
                    }
                    b' ' | b'\t' => {
                        push_backslashes(&mut unescaped, run);
                        advance(scanner, run);
                        break;
                    }
                    b'#' => {
                        let buf = owned(&mut unescaped, scanner, start);
                        buf.extend(std::iter::repeat(b'\\').take(run - 1));
                        buf.push(b'#');
                        advance(scanner, run + 1);
                    }
                    b'\n' | b'\r' if scanner.peek_newline_at(run) => {
                        // The last backslash continues the line; the rest are
                        // part of the path, which ends here.
                        push_backslashes(&mut unescaped, run - 1);
                        advance(scanner, run - 1);
                        break;
                    }
                    _ => {
                        push_backslashes(&mut unescaped, run);
                        advance(scanner, run);
                        if scanner.at_end() {
                            return unterminated(scanner);
                        }
                    }
                }
            }
            _ => {
                if let Some(buf) = &mut unescaped {
                    buf.push(c);
                }
                scanner.next();
            }
        }
    }

    let path = match unescaped {
        Some(bytes) => String::from_utf8(bytes).ok().map(Cow::Owned),
        None => {
            let bytes = scanner.bytes(start, scanner.ofs);
            if bytes.is_empty() {
                return Ok(None);
            }
            std::str::from_utf8(bytes).ok().map(Cow::Borrowed)
        }
    };
    match path {
        Some(path) => Ok(Some(path)),
        None => scanner.parse_error_at(start, "invalid UTF-8 in path"),
    }
}

/// Parse all records in a depfile.  A record naming an output seen earlier
/// adds to that output's inputs.
pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Deps<'a>> {
    let mut result = Deps::new();
    loop {
        skip_blank_lines(scanner)?;
        if scanner.at_end() {
            break;
        }

        let mut targets = Vec::new();
        while let Some(target) = read_path(scanner)? {
            targets.push(target);
        }
        if targets.is_empty() {
            return scanner.parse_error("expected file");
        }
        scanner.expect(b':')?;

        let mut deps = Vec::new();
        while let Some(dep) = read_path(scanner)? {
            deps.push(dep);
        }
        if scanner.peek() == b':' {
            return scanner.parse_error("inputs may not also have inputs");
        }
        if !scanner.skip_newline() && !scanner.at_end() {
            return scanner.parse_error("expected newline");
        }

        for target in targets {
            result
                .entry_or_insert_with(target, Vec::new)
                .extend(deps.iter().cloned());
        }
    }
    Ok(result)
}

/// Parse depfile content read from `path`, returning owned records.
pub fn parse_bytes(path: &str, mut bytes: Vec<u8>) -> Result<OwnedDeps, Error> {
    bytes.push(0);
    let mut scanner = Scanner::new(&bytes);
    let deps = parse(&mut scanner).map_err(|err| Error::Parse {
        path: path.to_string(),
        message: scanner.format_parse_error(path, &err),
    })?;
    Ok(deps
        .into_iter()
        .map(|(target, ins)| {
            (
                target.into_owned(),
                ins.into_iter().map(Cow::into_owned).collect(),
            )
        })
        .collect())
}

fn escape_path(path: &str, out: &mut String) {
    // Backslashes immediately preceding the current char.
    let mut backslashes = 0;
    for c in path.chars() {
        match c {
            '\\' => {
                out.push('\\');
                backslashes += 1;
                continue;
            }
            ' ' | '\t' => {
                // Already wrote N; N more plus one makes 2N+1.
                out.extend(std::iter::repeat('\\').take(backslashes + 1));
                out.push(c);
            }
            '#' => out.push_str("\\#"),
            '$' => out.push_str("$$"),
            c => out.push(c),
        }
        backslashes = 0;
    }
}

/// Serialize records back to depfile syntax, one record per line.
/// Paths ending in a backslash or a colon, or containing newlines, have no
/// depfile spelling and are not supported.
pub fn write<K: AsRef<str>, V: AsRef<str>>(deps: &SmallMap<K, Vec<V>>) -> String {
    let mut out = String::new();
    for (target, ins) in deps.iter() {
        escape_path(target.as_ref(), &mut out);
        out.push(':');
        for input in ins {
            out.push(' ');
            escape_path(input.as_ref(), &mut out);
        }
        out.push('\n');
    }
    out
}
