use std::io::BufRead;

use crate::errors::{FiftError, FiftResult};

/// Line-oriented token scanner over an input stream.
///
/// Tokens are whitespace-delimited; active literal words scan with custom
/// delimiters through [`scan_word_to`](ParseCtx::scan_word_to).
pub struct ParseCtx {
    reader: Box<dyn BufRead + Send>,
    pub filename: String,
    pub line_no: u32,
    pub include_depth: u32,
    line: String,
    pos: usize,
    eof: bool,
}

impl ParseCtx {
    pub fn new(
        reader: Box<dyn BufRead + Send>,
        filename: impl Into<String>,
        include_depth: u32,
    ) -> Self {
        ParseCtx {
            reader,
            filename: filename.into(),
            line_no: 0,
            include_depth,
            line: String::new(),
            pos: 0,
            eof: false,
        }
    }

    pub fn from_string(input: &str, filename: impl Into<String>) -> Self {
        Self::new(
            Box::new(std::io::Cursor::new(input.as_bytes().to_vec())),
            filename,
            0,
        )
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.filename, self.line_no)
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Pulls the next line; `false` at end of input.
    pub fn load_next_line(&mut self) -> FiftResult<bool> {
        self.line.clear();
        self.pos = 0;
        let read = self.reader.read_line(&mut self.line)?;
        if read == 0 {
            self.eof = true;
            return Ok(false);
        }
        while self.line.ends_with('\n') || self.line.ends_with('\r') {
            self.line.pop();
        }
        self.line_no += 1;
        Ok(true)
    }

    fn rest(&self) -> &str {
        &self.line[self.pos.min(self.line.len())..]
    }

    pub fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start_matches([' ', '\t']);
        self.pos = self.line.len() - trimmed.len();
    }

    /// True when the current line holds no more tokens.
    pub fn line_exhausted(&mut self) -> bool {
        self.skip_whitespace();
        self.rest().is_empty()
    }

    /// Advances over lines until a token is available; `false` on EOF.
    pub fn seek_token(&mut self) -> FiftResult<bool> {
        loop {
            if !self.line_exhausted() {
                return Ok(true);
            }
            if !self.load_next_line()? {
                return Ok(false);
            }
        }
    }

    /// The upcoming whitespace-delimited token, without consuming it.
    pub fn peek_token(&mut self) -> Option<&str> {
        self.skip_whitespace();
        let rest = &self.line[self.pos..];
        if rest.is_empty() {
            return None;
        }
        let end = rest.find([' ', '\t']).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Consumes `len` bytes of the upcoming token (after a prefix match).
    pub fn advance(&mut self, len: usize) {
        self.pos += len;
    }

    /// Scans one whitespace-delimited word.
    pub fn scan_word(&mut self) -> FiftResult<String> {
        if !self.seek_token()? {
            return Err(FiftError::new("unexpected end of input"));
        }
        let token = self
            .peek_token()
            .ok_or_else(|| FiftError::new("unexpected end of line"))?
            .to_owned();
        self.advance(token.len());
        Ok(token)
    }

    /// Scans everything up to `delim` on the current line; the delimiter is
    /// consumed and not returned.
    pub fn scan_word_to(&mut self, delim: char) -> FiftResult<String> {
        let rest = &self.line[self.pos..];
        match rest.find(delim) {
            Some(idx) => {
                let word = rest[..idx].to_owned();
                self.pos += idx + delim.len_utf8();
                Ok(word)
            }
            None => Err(FiftError::new(format!(
                "end of line while looking for `{delim}`"
            ))),
        }
    }

    /// Skips a single space after an active word's name, the conventional
    /// separator before a quoted literal.
    pub fn skip_one_space(&mut self) {
        if self.rest().starts_with(' ') {
            self.pos += 1;
        }
    }

    /// Drops the remainder of the current input (`skip-to-eof`).
    pub fn skip_to_eof(&mut self) -> FiftResult<()> {
        self.line.clear();
        self.pos = 0;
        while self.load_next_line()? {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_scanning() -> FiftResult<()> {
        let mut ctx = ParseCtx::from_string("2 3 +\n  dup *  ", "<test>");
        let mut words = vec![];
        while ctx.seek_token()? {
            words.push(ctx.scan_word()?);
        }
        assert_eq!(words, vec!["2", "3", "+", "dup", "*"]);
        Ok(())
    }

    #[test]
    fn delimited_scan() -> FiftResult<()> {
        let mut ctx = ParseCtx::from_string("hello world\" rest", "<test>");
        ctx.seek_token()?;
        let quoted = ctx.scan_word_to('"')?;
        assert_eq!(quoted, "hello world");
        assert_eq!(ctx.scan_word()?, "rest");
        Ok(())
    }

    #[test]
    fn location_tracks_lines() -> FiftResult<()> {
        let mut ctx = ParseCtx::from_string("a\nb", "test.fif");
        ctx.seek_token()?;
        ctx.scan_word()?;
        ctx.seek_token()?;
        assert_eq!(ctx.location(), "test.fif:2");
        Ok(())
    }
}
