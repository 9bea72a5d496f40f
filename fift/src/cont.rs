use std::fmt;
use std::sync::{Arc, Mutex};

use tonvm_core::num::Int257;
use tonvm_core::stack::{Stack, StackValue, VmObject};

use crate::ctx::IntCtx;
use crate::errors::{FiftError, FiftResult};

pub type PrimFn = Arc<dyn Fn(&mut IntCtx) -> FiftResult<Option<Arc<FiftCont>>> + Send + Sync>;

/// A Fift continuation: a first-class "what to do next" value. The whole
/// interpreter is a single tail-dispatch loop over these.
pub enum FiftCont {
    /// Does nothing; flows into the scheduled `next`.
    Nop,
    /// One step of the outer text interpreter.
    Interpret,
    /// Terminates the run with an exit code.
    Quit { exit_code: i32 },
    /// Runs `first`, then `second`.
    Seq {
        first: Arc<FiftCont>,
        second: Arc<FiftCont>,
    },
    /// Runs `body` `count` times, then `after`.
    Times {
        body: Arc<FiftCont>,
        after: Option<Arc<FiftCont>>,
        count: i64,
    },
    /// Re-runs `body` until it leaves a true flag.
    Until {
        body: Arc<FiftCont>,
        after: Option<Arc<FiftCont>>,
    },
    /// `cond` / `body` alternation; `chkcond` is true right after `cond`
    /// has produced its flag.
    While {
        cond: Arc<FiftCont>,
        body: Arc<FiftCont>,
        after: Option<Arc<FiftCont>>,
        chkcond: bool,
    },
    /// A closed `{ ... }` block.
    WordList { list: Arc<Vec<Arc<FiftCont>>> },
    /// Execution position inside a word list; `up` is the saved return
    /// chain.
    ListCursor {
        list: Arc<Vec<Arc<FiftCont>>>,
        pos: usize,
        up: Option<Arc<FiftCont>>,
    },
    /// Literal pushers.
    IntLit(Int257),
    Lit(StackValue),
    MultiLit(Vec<StackValue>),
    /// A built-in word.
    Primitive { name: String, f: PrimFn },
}

impl fmt::Debug for FiftCont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiftCont::Nop => write!(f, "Nop"),
            FiftCont::Interpret => write!(f, "Interpret"),
            FiftCont::Quit { exit_code } => write!(f, "Quit({exit_code})"),
            FiftCont::Seq { .. } => write!(f, "Seq"),
            FiftCont::Times { count, .. } => write!(f, "Times({count})"),
            FiftCont::Until { .. } => write!(f, "Until"),
            FiftCont::While { chkcond, .. } => write!(f, "While(chkcond={chkcond})"),
            FiftCont::WordList { list } => write!(f, "WordList[{}]", list.len()),
            FiftCont::ListCursor { pos, list, .. } => {
                write!(f, "ListCursor[{pos}/{}]", list.len())
            }
            FiftCont::IntLit(value) => write!(f, "IntLit({value})"),
            FiftCont::Lit(value) => write!(f, "Lit({value})"),
            FiftCont::MultiLit(values) => write!(f, "MultiLit[{}]", values.len()),
            FiftCont::Primitive { name, .. } => write!(f, "Primitive({name})"),
        }
    }
}

/// Chains `a` before an optional `b`.
pub fn chain(a: Arc<FiftCont>, b: Option<Arc<FiftCont>>) -> Arc<FiftCont> {
    match b {
        None => a,
        Some(b) => Arc::new(FiftCont::Seq {
            first: a,
            second: b,
        }),
    }
}

impl FiftCont {
    pub fn primitive(
        name: impl Into<String>,
        f: impl Fn(&mut IntCtx) -> FiftResult<Option<Arc<FiftCont>>> + Send + Sync + 'static,
    ) -> Arc<FiftCont> {
        Arc::new(FiftCont::Primitive {
            name: name.into(),
            f: Arc::new(f),
        })
    }

    pub fn nop() -> Arc<FiftCont> {
        Arc::new(FiftCont::Nop)
    }

    /// The literal values this continuation would push, if it is a pure
    /// literal pusher.
    pub fn literal_values(&self) -> Option<Vec<StackValue>> {
        match self {
            FiftCont::IntLit(value) => Some(vec![StackValue::Int(value.clone())]),
            FiftCont::Lit(value) => Some(vec![value.clone()]),
            FiftCont::MultiLit(values) => Some(values.clone()),
            _ => None,
        }
    }

    /// Runs one dispatch step; the result is the continuation to run next
    /// (`None` falls through to the context's `next` chain).
    pub fn run(self: &Arc<Self>, ctx: &mut IntCtx) -> FiftResult<Option<Arc<FiftCont>>> {
        match &**self {
            FiftCont::Nop => Ok(None),
            FiftCont::Interpret => ctx.interpret_step(self),
            FiftCont::Quit { exit_code } => {
                ctx.exit_code = *exit_code;
                ctx.stopped = true;
                ctx.next = None;
                Ok(None)
            }
            FiftCont::Seq { first, second } => {
                ctx.next = Some(chain(second.clone(), ctx.next.take()));
                Ok(Some(first.clone()))
            }
            FiftCont::Times { body, after, count } => {
                if *count <= 0 {
                    return Ok(after.clone());
                }
                if *count == 1 {
                    ctx.next = match after {
                        Some(after) => Some(chain(after.clone(), ctx.next.take())),
                        None => ctx.next.take(),
                    };
                } else {
                    ctx.next = Some(Arc::new(FiftCont::Times {
                        body: body.clone(),
                        after: after.clone(),
                        count: count - 1,
                    }));
                }
                Ok(Some(body.clone()))
            }
            FiftCont::Until { body, after } => {
                if pop_bool(&mut ctx.stack)? {
                    Ok(after.clone())
                } else {
                    ctx.next = Some(self.clone());
                    Ok(Some(body.clone()))
                }
            }
            FiftCont::While {
                cond,
                body,
                after,
                chkcond,
            } => {
                if !chkcond {
                    ctx.next = Some(Arc::new(FiftCont::While {
                        cond: cond.clone(),
                        body: body.clone(),
                        after: after.clone(),
                        chkcond: true,
                    }));
                    Ok(Some(cond.clone()))
                } else if pop_bool(&mut ctx.stack)? {
                    ctx.next = Some(Arc::new(FiftCont::While {
                        cond: cond.clone(),
                        body: body.clone(),
                        after: after.clone(),
                        chkcond: false,
                    }));
                    Ok(Some(body.clone()))
                } else {
                    Ok(after.clone())
                }
            }
            FiftCont::WordList { list } => match list.len() {
                0 => Ok(None),
                1 => Ok(Some(list[0].clone())),
                _ => {
                    ctx.next = Some(Arc::new(FiftCont::ListCursor {
                        list: list.clone(),
                        pos: 1,
                        up: ctx.next.take(),
                    }));
                    Ok(Some(list[0].clone()))
                }
            },
            FiftCont::ListCursor { list, pos, up } => {
                if *pos < list.len() {
                    ctx.next = Some(Arc::new(FiftCont::ListCursor {
                        list: list.clone(),
                        pos: pos + 1,
                        up: up.clone(),
                    }));
                    Ok(Some(list[*pos].clone()))
                } else {
                    Ok(up.clone())
                }
            }
            FiftCont::IntLit(value) => {
                ctx.stack.push(StackValue::Int(value.clone()));
                Ok(None)
            }
            FiftCont::Lit(value) => {
                ctx.stack.push(value.clone());
                Ok(None)
            }
            FiftCont::MultiLit(values) => {
                for value in values {
                    ctx.stack.push(value.clone());
                }
                Ok(None)
            }
            FiftCont::Primitive { f, .. } => f(ctx),
        }
    }
}

pub fn pop_bool(stack: &mut Stack) -> FiftResult<bool> {
    Ok(stack.pop_bool()?)
}

/// A Fift continuation boxed onto the shared value stack (an exec token).
#[derive(Debug)]
pub struct FiftContObj(pub Arc<FiftCont>);

impl VmObject for FiftContObj {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub fn push_cont(stack: &mut Stack, cont: Arc<FiftCont>) {
    stack.push(StackValue::Object(Arc::new(FiftContObj(cont))));
}

pub fn pop_cont(stack: &mut Stack) -> FiftResult<Arc<FiftCont>> {
    let value = stack.pop()?;
    as_cont(&value).ok_or_else(|| FiftError::new("expected an execution token"))
}

pub fn as_cont(value: &StackValue) -> Option<Arc<FiftCont>> {
    value
        .as_object::<FiftContObj>()
        .map(|wrapper| wrapper.0.clone())
}

/// A word list under construction, mutated in place while `{ ... }` (or a
/// colon definition) is open.
#[derive(Debug)]
pub struct WordListBuilder(pub Mutex<Vec<Arc<FiftCont>>>);

impl WordListBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(WordListBuilder(Mutex::new(vec![])))
    }

    pub fn push(&self, cont: Arc<FiftCont>) {
        self.0.lock().expect("poisoned").push(cont);
    }

    pub fn close(&self) -> Arc<FiftCont> {
        let list = self.0.lock().expect("poisoned").clone();
        Arc::new(FiftCont::WordList {
            list: Arc::new(list),
        })
    }
}

impl VmObject for WordListBuilder {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
