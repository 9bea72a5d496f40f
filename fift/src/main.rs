use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};

use tonvm_fift::cont::FiftCont;
use tonvm_fift::create_ctx;
use tonvm_fift::parser::ParseCtx;

struct CliOptions {
    interactive: bool,
    verbosity: LevelFilter,
    include_dirs: Vec<PathBuf>,
    script: Option<PathBuf>,
    script_args: Vec<String>,
}

fn parse_args() -> CliOptions {
    let mut options = CliOptions {
        interactive: false,
        verbosity: LevelFilter::Warn,
        include_dirs: vec![],
        script: None,
        script_args: vec![],
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-i" => options.interactive = true,
            "-v" => options.verbosity = LevelFilter::Debug,
            "-I" => {
                if let Some(dirs) = args.next() {
                    options
                        .include_dirs
                        .extend(dirs.split(':').map(PathBuf::from));
                }
            }
            "-h" | "--help" => {
                eprintln!(
                    "usage: fift [-i] [-v] [-I dir1:dir2] [script.fif [args...]]"
                );
                std::process::exit(0);
            }
            _ if options.script.is_none() => options.script = Some(PathBuf::from(arg)),
            _ => options.script_args.push(arg),
        }
    }
    options
}

fn init_logging(level: LevelFilter) {
    let stderr = ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level));
    if let Ok(config) = config {
        let _ = log4rs::init_config(config);
    }
}

fn main() {
    let options = parse_args();
    init_logging(options.verbosity);

    let mut ctx = create_ctx(Box::new(std::io::stdout()));
    ctx.include_dirs = options.include_dirs;
    ctx.interactive = options.interactive && options.script.is_none();
    ctx.cmdline_args = options
        .script_args
        .iter()
        .map(|arg| tonvm_core::stack::StackValue::String(arg.clone()))
        .collect();

    let parser = match &options.script {
        Some(path) => match std::fs::File::open(path) {
            Ok(file) => ParseCtx::new(
                Box::new(std::io::BufReader::new(file)),
                path.to_string_lossy().into_owned(),
                0,
            ),
            Err(e) => {
                eprintln!("fift: cannot open {}: {e}", path.display());
                std::process::exit(2);
            }
        },
        None => ParseCtx::new(Box::new(StdinReader::new()), "<stdin>", 0),
    };
    ctx.parser = Some(parser);

    let exit_code = loop {
        match ctx.run(Arc::new(FiftCont::Interpret)) {
            Ok(code) => break code,
            Err(e) => {
                eprintln!("fift: {e}");
                if ctx.interactive {
                    // Clear the stack and resume at the top-level loop.
                    ctx.stack.clear();
                    ctx.state = 0;
                    ctx.next = None;
                    continue;
                }
                std::process::exit(2);
            }
        }
    };

    // Normal completion and `quit` report success; `halt n` propagates ~n.
    std::process::exit(if exit_code == -1 { 0 } else { exit_code });
}

/// Line-buffered stdin with an ` ok` prompt feel kept out of the way; the
/// interpreter itself stays stream-agnostic.
struct StdinReader {
    inner: std::io::BufReader<std::io::Stdin>,
}

impl StdinReader {
    fn new() -> Self {
        StdinReader {
            inner: std::io::BufReader::new(std::io::stdin()),
        }
    }
}

impl std::io::Read for StdinReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.inner, buf)
    }
}

impl BufRead for StdinReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        let _ = std::io::stdout().flush();
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}
