pub mod cont;
pub mod ctx;
pub mod dictionary;
pub mod errors;
pub mod hashmap;
pub mod parser;
pub mod words;

use std::io::Write;
use std::sync::{Arc, Mutex};

use cont::FiftCont;
use ctx::IntCtx;
use errors::FiftResult;
use parser::ParseCtx;

/// A writer into a shared buffer, used to capture interpreter output.
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_string(&self) -> String {
        let mut buffer = self.0.lock().expect("poisoned");
        String::from_utf8_lossy(&std::mem::take(&mut *buffer)).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Builds an interpreter context with the full built-in dictionary.
pub fn create_ctx(output: Box<dyn Write + Send>) -> IntCtx {
    let ctx = IntCtx::new(output);
    words::init_words(&ctx.main_dictionary);
    words::init_exit_interpret(&ctx.main_dictionary, ctx.exit_interpret.clone());
    words::init_wordlist_literal(&ctx.main_dictionary, &ctx.main_dictionary);
    ctx
}

/// Runs a source string to completion; returns the exit code and whatever
/// the script printed.
pub fn run_source(source: &str) -> FiftResult<(i32, String)> {
    let output = SharedOutput::new();
    let mut ctx = create_ctx(Box::new(output.clone()))
        .with_input(ParseCtx::from_string(source, "<input>"));
    let exit_code = ctx.run(Arc::new(FiftCont::Interpret))?;
    Ok((exit_code, output.take_string()))
}

/// Like [`run_source`], also handing back the final stack for inspection.
pub fn run_source_with_stack(
    source: &str,
) -> FiftResult<(i32, String, tonvm_core::stack::Stack)> {
    let output = SharedOutput::new();
    let mut ctx = create_ctx(Box::new(output.clone()))
        .with_input(ParseCtx::from_string(source, "<input>"));
    let exit_code = ctx.run(Arc::new(FiftCont::Interpret))?;
    Ok((exit_code, output.take_string(), ctx.stack))
}
