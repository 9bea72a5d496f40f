use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use num_bigint::BigInt;
use tonvm_core::num::Int257;
use tonvm_core::stack::{SharedBox, Stack, StackValue};

use crate::cont::{chain, FiftCont, FiftContObj, WordListBuilder};
use crate::dictionary::{DictEntry, Dictionary};
use crate::errors::{FiftError, FiftResult};
use crate::parser::ParseCtx;

/// The interpreter state threaded through every word: the shared value
/// stack, the scheduled `next` continuation, the compile/interpret state
/// and the dictionaries.
pub struct IntCtx {
    pub stack: Stack,
    pub next: Option<Arc<FiftCont>>,
    /// 0 = interpret, > 0 = compile depth, < 0 = internal interpret.
    pub state: i32,
    pub exit_code: i32,
    pub stopped: bool,

    pub parser: Option<ParseCtx>,
    parser_stack: Vec<ParseCtx>,
    pub last_word: String,

    pub output: Box<dyn Write + Send>,
    pub interactive: bool,

    /// Definitions go here (`current!` retargets it).
    pub current: Dictionary,
    /// Lookups go here (`context!` retargets it).
    pub context: Dictionary,
    /// The dictionary both start out as; `Fift` switches back to it.
    pub main_dictionary: Dictionary,

    pub exit_interpret: SharedBox,
    pub include_dirs: Vec<PathBuf>,
    pub cmdline_args: Vec<StackValue>,
    /// Library collections handed to spawned VMs (`vmlibs`).
    pub vm_libraries: SharedBox,
    /// Open `[ ... ]` frames: the saved compile state and the stack depth
    /// at entry; values above that depth become literals on `]`.
    pub bracket_frames: Vec<(i32, usize)>,
}

impl IntCtx {
    pub fn new(output: Box<dyn Write + Send>) -> Self {
        let main = Dictionary::new();
        IntCtx {
            stack: Stack::new(),
            next: None,
            state: 0,
            exit_code: 0,
            stopped: false,
            parser: None,
            parser_stack: vec![],
            last_word: String::new(),
            output,
            interactive: false,
            current: main.clone(),
            context: main.clone(),
            main_dictionary: main,
            exit_interpret: SharedBox::empty(),
            include_dirs: vec![],
            cmdline_args: vec![],
            vm_libraries: SharedBox::empty(),
            bracket_frames: vec![],
        }
    }

    pub fn with_input(mut self, parser: ParseCtx) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn location(&self) -> String {
        match &self.parser {
            Some(parser) => format!("{}: {}", parser.location(), self.last_word),
            None => self.last_word.clone(),
        }
    }

    pub fn include_depth(&self) -> usize {
        self.parser_stack.len()
    }

    /// Pushes the current source and switches to a nested one (`include`).
    pub fn enter_source(&mut self, parser: ParseCtx) {
        if let Some(old) = self.parser.take() {
            self.parser_stack.push(old);
        }
        self.parser = Some(parser);
    }

    fn leave_source(&mut self) -> bool {
        match self.parser_stack.pop() {
            Some(prev) => {
                self.parser = Some(prev);
                true
            }
            None => false,
        }
    }

    /// The tail-dispatch loop: run continuations until both the current one
    /// and the `next` chain are exhausted or a quit fires.
    pub fn run(&mut self, cont: Arc<FiftCont>) -> FiftResult<i32> {
        let mut cur = Some(cont);
        loop {
            if self.stopped {
                break;
            }
            let Some(c) = cur.take() else {
                match self.next.take() {
                    Some(next) => {
                        cur = Some(next);
                        continue;
                    }
                    None => break,
                }
            };
            cur = c.run(self).map_err(|e| e.at(self.location()))?;
        }
        Ok(self.exit_code)
    }

    /// One step of the outer interpreter (spec steps: seekeof,
    /// word-prefix-find, prepare, compile/execute).
    pub fn interpret_step(
        &mut self,
        self_cont: &Arc<FiftCont>,
    ) -> FiftResult<Option<Arc<FiftCont>>> {
        // seekeof: find the next token, popping include frames at their end.
        loop {
            let Some(parser) = self.parser.as_mut() else {
                return Ok(None);
            };
            if parser.seek_token()? {
                break;
            }
            if !self.leave_source() {
                return Ok(None);
            }
        }

        // The current return chain is what `'exit-interpret @ execute`
        // must resume.
        let resume = chain(self_cont.clone(), self.next.clone());
        self.exit_interpret
            .store(StackValue::Object(Arc::new(FiftContObj(resume))));

        let (word, entry) = self.find_word_prefix()?;
        self.last_word = word.clone();

        match entry {
            Some(entry) if entry.active || self.state <= 0 => {
                // Tail-call the definition, then come back here.
                self.next = Some(chain(self_cont.clone(), self.next.take()));
                Ok(Some(entry.def))
            }
            Some(entry) => {
                self.compile_cont(entry.def)?;
                Ok(Some(self_cont.clone()))
            }
            None => {
                let values = parse_number(&word)
                    .ok_or_else(|| FiftError::new(format!("undefined word `{word}`")))?;
                if self.state > 0 {
                    self.compile_literals(&values)?;
                } else {
                    for value in values {
                        self.stack.push(value);
                    }
                }
                Ok(Some(self_cont.clone()))
            }
        }
    }

    /// Longest-prefix dictionary match on the upcoming token.
    fn find_word_prefix(&mut self) -> FiftResult<(String, Option<DictEntry>)> {
        let parser = self
            .parser
            .as_mut()
            .ok_or_else(|| FiftError::new("no input"))?;
        let token = parser
            .peek_token()
            .ok_or_else(|| FiftError::new("no token"))?
            .to_owned();

        let boundaries: Vec<usize> = token
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .chain(std::iter::once(token.len()))
            .collect();
        for &len in boundaries.iter().rev() {
            let prefix = &token[..len];
            if let Some(entry) = self.context.lookup(prefix) {
                let parser = self.parser.as_mut().expect("checked above");
                parser.advance(len);
                return Ok((prefix.to_owned(), Some(entry)));
            }
        }
        let parser = self.parser.as_mut().expect("checked above");
        parser.advance(token.len());
        Ok((token, None))
    }

    /// Gives access to the word list currently being built, expected on
    /// top of the stack.
    pub fn with_wordlist<R>(
        &mut self,
        f: impl FnOnce(&WordListBuilder) -> R,
    ) -> FiftResult<R> {
        let top = self.stack.fetch(0)?;
        let builder = top
            .as_object::<WordListBuilder>()
            .ok_or_else(|| FiftError::new("no word list under construction"))?;
        Ok(f(builder))
    }

    /// Appends a word's continuation to the open word list, inlining short
    /// word-list bodies.
    pub fn compile_cont(&mut self, def: Arc<FiftCont>) -> FiftResult<()> {
        self.with_wordlist(|builder| {
            if let FiftCont::WordList { list } = &*def {
                if list.len() <= 2 {
                    for item in list.iter() {
                        builder.push(item.clone());
                    }
                    return;
                }
            }
            builder.push(def);
        })
    }

    pub fn compile_literals(&mut self, values: &[StackValue]) -> FiftResult<()> {
        self.with_wordlist(|builder| {
            for value in values {
                builder.push(Arc::new(FiftCont::Lit(value.clone())));
            }
        })
    }

    /// Pushes a literal in interpret mode, compiles it otherwise.
    pub fn push_or_compile(&mut self, value: StackValue) -> FiftResult<()> {
        if self.state > 0 {
            self.compile_literals(std::slice::from_ref(&value))
        } else {
            self.stack.push(value);
            Ok(())
        }
    }

    pub fn check_compile(&self) -> FiftResult<()> {
        if self.state <= 0 {
            return Err(FiftError::new("compilation mode only"));
        }
        Ok(())
    }

    pub fn check_not_internal(&self) -> FiftResult<()> {
        if self.state < 0 {
            return Err(FiftError::new("not allowed in internal interpret mode"));
        }
        Ok(())
    }

    pub fn write_str(&mut self, text: &str) -> FiftResult<()> {
        self.output.write_all(text.as_bytes())?;
        Ok(())
    }
}

/// Parses an integer or fraction literal: decimal, `0x…`, `0b…`, optional
/// leading `-`, and `p/q` fractions; every part must fit 257 signed bits.
pub fn parse_number(word: &str) -> Option<Vec<StackValue>> {
    if let Some(slash) = word.find('/') {
        let num = parse_int(&word[..slash])?;
        let denom = parse_int(&word[slash + 1..])?;
        return Some(vec![StackValue::Int(num), StackValue::Int(denom)]);
    }
    Some(vec![StackValue::Int(parse_int(word)?)])
}

fn parse_int(word: &str) -> Option<Int257> {
    let (negative, rest) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word),
    };
    let value = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        BigInt::parse_bytes(hex.as_bytes(), 16)?
    } else if let Some(bin) = rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")) {
        BigInt::parse_bytes(bin.as_bytes(), 2)?
    } else {
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        BigInt::parse_bytes(rest.as_bytes(), 10)?
    };
    let value = if negative { -value } else { value };
    let int = Int257::from_bigint(value);
    if int.is_nan() {
        return None;
    }
    Some(int)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_of(word: &str) -> Option<i64> {
        match parse_number(word)?.first()? {
            StackValue::Int(i) => i.to_i64(),
            _ => None,
        }
    }

    #[test]
    fn number_bases() {
        assert_eq!(int_of("42"), Some(42));
        assert_eq!(int_of("-17"), Some(-17));
        assert_eq!(int_of("0x2A"), Some(42));
        assert_eq!(int_of("-0x2a"), Some(-42));
        assert_eq!(int_of("0b1010"), Some(10));
        assert!(parse_number("hello").is_none());
        assert!(parse_number("12abc").is_none());
        assert!(parse_number("").is_none());
    }

    #[test]
    fn fractions_push_two_values() {
        let values = parse_number("5/7").unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn too_wide_is_rejected() {
        // 2^257 does not fit 257 signed bits.
        let huge = format!("0x1{}", "0".repeat(65));
        assert!(parse_number(&huge).is_none());
    }
}
