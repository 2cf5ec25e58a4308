//! Scans an input buffer (e.g. a depfile) byte by byte.
//!
//! The buffer must be nul-terminated; the trailing nul acts as a sentinel so
//! that peek() never needs a bounds check against the end of input.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}

impl ParseError {
    pub fn new(msg: impl Into<String>, ofs: usize) -> Self {
        ParseError {
            msg: msg.into(),
            ofs,
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Byte offset into the scanned buffer where the error was detected.
    pub fn offset(&self) -> usize {
        self.ofs
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.msg, self.ofs)
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct Scanner<'a> {
    buf: &'a [u8],
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        if !buf.ends_with(b"\0") {
            panic!("Scanner requires nul-terminated buf");
        }
        Scanner {
            buf,
            ofs: 0,
            line: 1,
        }
    }

    pub fn bytes(&self, start: usize, end: usize) -> &'a [u8] {
        &self.buf[start..end]
    }

    /// True if the scanner is sitting on the terminating nul.
    pub fn at_end(&self) -> bool {
        self.ofs >= self.buf.len() - 1
    }

    pub fn peek(&self) -> u8 {
        self.buf[self.ofs]
    }

    /// Look ahead n bytes past the current position, returning nul past the end.
    pub fn peek_at(&self, n: usize) -> u8 {
        self.buf.get(self.ofs + n).copied().unwrap_or(0)
    }

    pub fn peek_newline(&self) -> bool {
        self.peek_newline_at(0)
    }

    /// Whether a "\n" or "\r\n" starts n bytes past the current position.
    pub fn peek_newline_at(&self, n: usize) -> bool {
        match self.peek_at(n) {
            b'\n' => true,
            b'\r' => self.peek_at(n + 1) == b'\n',
            _ => false,
        }
    }

    pub fn next(&mut self) {
        if self.ofs == self.buf.len() {
            panic!("scanned past end")
        }
        if self.peek() == b'\n' {
            self.line += 1;
        }
        self.ofs += 1;
    }

    pub fn back(&mut self) {
        if self.ofs == 0 {
            panic!("back at start")
        }
        self.ofs -= 1;
        if self.peek() == b'\n' {
            self.line -= 1;
        }
    }

    pub fn read(&mut self) -> u8 {
        let c = self.peek();
        self.next();
        c
    }

    pub fn skip(&mut self, ch: u8) -> bool {
        if self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    /// Skip a "\n" or "\r\n" line ending, returning whether one was present.
    pub fn skip_newline(&mut self) -> bool {
        if self.peek_newline() {
            if self.peek() == b'\r' {
                self.next();
            }
            self.next();
            return true;
        }
        false
    }

    pub fn skip_spaces(&mut self) {
        while self.peek() == b' ' || self.peek() == b'\t' {
            self.next();
        }
    }

    pub fn expect(&mut self, ch: u8) -> ParseResult<()> {
        let r = self.read();
        if r != ch {
            self.back();
            return self.parse_error(format!("expected {:?}, got {:?}", ch as char, r as char));
        }
        Ok(())
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        self.parse_error_at(self.ofs, msg)
    }

    pub fn parse_error_at<T, S: Into<String>>(&self, ofs: usize, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs,
        })
    }

    /// Render an error with the offending line and a caret under the column.
    pub fn format_parse_error(&self, filename: &str, err: &ParseError) -> String {
        // Exclude the nul sentinel from the displayed text.
        let text = &self.buf[..self.buf.len() - 1];
        let mut ofs = 0;
        let mut lines = text.split(|&c| c == b'\n').enumerate().peekable();
        while let Some((line_number, line)) = lines.next() {
            let last = lines.peek().is_none();
            if !last && ofs + line.len() < err.ofs {
                ofs += line.len() + 1;
                continue;
            }

            let mut msg = "parse error: ".to_string();
            msg.push_str(&err.msg);
            msg.push('\n');

            let prefix = format!("{}:{}: ", filename, line_number + 1);
            msg.push_str(&prefix);

            let line = String::from_utf8_lossy(line);
            let line = line.trim_end_matches('\r');
            let mut context: String = line.chars().collect();
            let mut col = err.ofs.saturating_sub(ofs).min(context.len());
            if col > 40 {
                // Trim beginning of line to fit it on screen.
                msg.push_str("...");
                context = context.chars().skip(col - 20).collect();
                col = 3 + 20;
            }
            if context.chars().count() > 40 {
                msg.extend(context.chars().take(40));
                msg.push_str("...");
            } else {
                msg.push_str(&context);
            }
            msg.push('\n');

            msg.push_str(&" ".repeat(prefix.len() + col));
            msg.push_str("^\n");
            return msg;
        }
        format!("parse error: {}\n{}: (empty input)\n", err.msg, filename)
    }
}
