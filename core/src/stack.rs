use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;

use crate::cell::{ArcCell, CellBuilder, OwnedCellSlice};
use crate::cont::Continuation;
use crate::error::{Excno, VmError, VmResult};
use crate::num::Int257;

pub const MAX_TUPLE_LEN: usize = 255;

pub type Tuple = Arc<Vec<StackValue>>;

/// An interned symbol. Atoms with the same name share one index; anonymous
/// atoms get fresh negative-free indices and never compare equal by name.
#[derive(Debug, Clone)]
pub struct Atom {
    name: Option<Arc<str>>,
    index: i64,
}

lazy_static! {
    static ref ATOM_TABLE: Mutex<(HashMap<String, i64>, i64)> = Mutex::new((HashMap::new(), 0));
}

impl Atom {
    pub fn named(name: &str) -> Atom {
        let mut table = ATOM_TABLE.lock().expect("poisoned");
        if let Some(&index) = table.0.get(name) {
            return Atom {
                name: Some(name.into()),
                index,
            };
        }
        table.1 += 1;
        let index = table.1;
        table.0.insert(name.to_owned(), index);
        Atom {
            name: Some(name.into()),
            index,
        }
    }

    pub fn anonymous() -> Atom {
        let mut table = ATOM_TABLE.lock().expect("poisoned");
        table.1 += 1;
        Atom {
            name: None,
            index: table.1,
        }
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => format!("atom#{}", self.index),
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Atom {}

/// A single-slot mutable container shared by reference.
#[derive(Debug, Clone)]
pub struct SharedBox(Arc<Mutex<StackValue>>);

impl SharedBox {
    pub fn new(value: StackValue) -> Self {
        SharedBox(Arc::new(Mutex::new(value)))
    }

    pub fn empty() -> Self {
        Self::new(StackValue::Null)
    }

    pub fn fetch(&self) -> StackValue {
        self.0.lock().expect("poisoned").clone()
    }

    pub fn store(&self, value: StackValue) {
        *self.0.lock().expect("poisoned") = value;
    }

    pub fn ptr_eq(&self, other: &SharedBox) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for SharedBox {
    fn default() -> Self {
        Self::empty()
    }
}

/// Escape hatch for embedders: the Fift interpreter keeps its own
/// continuations on the shared stack through this trait.
pub trait VmObject: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

/// The tagged value universe shared by the TVM stack and the Fift stack.
#[derive(Debug, Clone)]
pub enum StackValue {
    Null,
    Int(Int257),
    Cell(ArcCell),
    Slice(OwnedCellSlice),
    Builder(Arc<CellBuilder>),
    Cont(Arc<Continuation>),
    Tuple(Tuple),
    Atom(Atom),
    String(String),
    Bytes(Vec<u8>),
    Box(SharedBox),
    Object(Arc<dyn VmObject>),
}

impl StackValue {
    pub fn int(value: impl Into<Int257>) -> StackValue {
        StackValue::Int(value.into())
    }

    pub fn bool(value: bool) -> StackValue {
        StackValue::Int(Int257::from_bool(value))
    }

    pub fn tuple(values: Vec<StackValue>) -> StackValue {
        StackValue::Tuple(Arc::new(values))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StackValue::Null => "null",
            StackValue::Int(_) => "integer",
            StackValue::Cell(_) => "cell",
            StackValue::Slice(_) => "slice",
            StackValue::Builder(_) => "builder",
            StackValue::Cont(_) => "continuation",
            StackValue::Tuple(_) => "tuple",
            StackValue::Atom(_) => "atom",
            StackValue::String(_) => "string",
            StackValue::Bytes(_) => "bytes",
            StackValue::Box(_) => "box",
            StackValue::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StackValue::Null)
    }

    pub fn as_int(&self) -> Option<&Int257> {
        match self {
            StackValue::Int(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            StackValue::Tuple(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&ArcCell> {
        match self {
            StackValue::Cell(val) => Some(val),
            _ => None,
        }
    }

    pub fn as_object<T: VmObject>(&self) -> Option<&T> {
        match self {
            StackValue::Object(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Structural equality where it is cheap, identity elsewhere.
    pub fn eqv(&self, other: &StackValue) -> bool {
        match (self, other) {
            (StackValue::Null, StackValue::Null) => true,
            (StackValue::Int(a), StackValue::Int(b)) => a == b,
            (StackValue::Atom(a), StackValue::Atom(b)) => a == b,
            (StackValue::String(a), StackValue::String(b)) => a == b,
            (StackValue::Bytes(a), StackValue::Bytes(b)) => a == b,
            _ => self.identical(other),
        }
    }

    /// Identity comparison: same cell hash, same shared allocation.
    pub fn identical(&self, other: &StackValue) -> bool {
        match (self, other) {
            (StackValue::Null, StackValue::Null) => true,
            (StackValue::Cell(a), StackValue::Cell(b)) => a.repr_hash() == b.repr_hash(),
            (StackValue::Tuple(a), StackValue::Tuple(b)) => Arc::ptr_eq(a, b),
            (StackValue::Box(a), StackValue::Box(b)) => a.ptr_eq(b),
            (StackValue::Cont(a), StackValue::Cont(b)) => Arc::ptr_eq(a, b),
            (StackValue::Builder(a), StackValue::Builder(b)) => Arc::ptr_eq(a, b),
            (StackValue::Object(a), StackValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for StackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackValue::Null => write!(f, "(null)"),
            StackValue::Int(v) => write!(f, "{v}"),
            StackValue::Cell(c) => write!(f, "C{{{}}}", hex::encode(&c.repr_hash()[0..4])),
            StackValue::Slice(s) => write!(f, "CS{{{s}}}"),
            StackValue::Builder(b) => write!(f, "BC{{{} bits}}", b.bits()),
            StackValue::Cont(_) => write!(f, "Cont"),
            StackValue::Tuple(t) => {
                write!(f, "[")?;
                for (i, v) in t.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            StackValue::Atom(a) => write!(f, "{}", a.name()),
            StackValue::String(s) => write!(f, "\"{s}\""),
            StackValue::Bytes(b) => write!(f, "BYTES:{}", hex::encode(b)),
            StackValue::Box(_) => write!(f, "Box"),
            StackValue::Object(_) => write!(f, "Object"),
        }
    }
}

/// The data stack. Index 0 is the top.
#[derive(Debug, Clone, Default)]
pub struct Stack {
    items: Vec<StackValue>,
}

impl Stack {
    pub fn new() -> Stack {
        Stack::default()
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[StackValue] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn check_underflow(&self, required: usize) -> VmResult<()> {
        if self.depth() < required {
            return Err(VmError::stk_und(format!(
                "need {required} stack values, depth is {}",
                self.depth()
            )));
        }
        Ok(())
    }

    pub fn push(&mut self, value: StackValue) {
        self.items.push(value);
    }

    pub fn push_int(&mut self, value: impl Into<Int257>) {
        self.push(StackValue::Int(value.into()));
    }

    /// Pushes an integer, raising integer-overflow for NaN unless `quiet`.
    pub fn push_int_checked(&mut self, value: Int257, quiet: bool) -> VmResult<()> {
        if value.is_nan() && !quiet {
            return Err(VmError::int_ov("integer overflow"));
        }
        self.push(StackValue::Int(value));
        Ok(())
    }

    pub fn push_bool(&mut self, value: bool) {
        self.push(StackValue::bool(value));
    }

    pub fn push_cell(&mut self, cell: ArcCell) {
        self.push(StackValue::Cell(cell));
    }

    pub fn push_slice(&mut self, slice: OwnedCellSlice) {
        self.push(StackValue::Slice(slice));
    }

    pub fn push_builder(&mut self, builder: CellBuilder) {
        self.push(StackValue::Builder(Arc::new(builder)));
    }

    pub fn push_cont(&mut self, cont: Arc<Continuation>) {
        self.push(StackValue::Cont(cont));
    }

    pub fn push_string(&mut self, s: impl Into<String>) {
        self.push(StackValue::String(s.into()));
    }

    pub fn pop(&mut self) -> VmResult<StackValue> {
        self.items
            .pop()
            .ok_or_else(|| VmError::stk_und("pop from an empty stack"))
    }

    pub fn pop_many(&mut self, count: usize) -> VmResult<Vec<StackValue>> {
        self.check_underflow(count)?;
        Ok(self.items.split_off(self.items.len() - count))
    }

    pub fn drop_many(&mut self, count: usize) -> VmResult<()> {
        self.check_underflow(count)?;
        self.items.truncate(self.items.len() - count);
        Ok(())
    }

    /// Drops `count` values located under the top `top` values.
    pub fn drop_under(&mut self, count: usize, top: usize) -> VmResult<()> {
        self.check_underflow(count + top)?;
        let from = self.items.len() - top - count;
        self.items.drain(from..from + count);
        Ok(())
    }

    pub fn fetch(&self, idx: usize) -> VmResult<StackValue> {
        self.check_underflow(idx + 1)?;
        Ok(self.items[self.items.len() - 1 - idx].clone())
    }

    pub fn fetch_ref(&self, idx: usize) -> VmResult<&StackValue> {
        self.check_underflow(idx + 1)?;
        Ok(&self.items[self.items.len() - 1 - idx])
    }

    pub fn set(&mut self, idx: usize, value: StackValue) -> VmResult<()> {
        self.check_underflow(idx + 1)?;
        let depth = self.items.len();
        self.items[depth - 1 - idx] = value;
        Ok(())
    }

    pub fn swap(&mut self, i: usize, j: usize) -> VmResult<()> {
        self.check_underflow(i.max(j) + 1)?;
        let depth = self.items.len();
        self.items.swap(depth - 1 - i, depth - 1 - j);
        Ok(())
    }

    pub fn dup(&mut self) -> VmResult<()> {
        self.push(self.fetch(0)?);
        Ok(())
    }

    pub fn over(&mut self) -> VmResult<()> {
        self.push(self.fetch(1)?);
        Ok(())
    }

    /// Copies `s[n]` to the top.
    pub fn pick(&mut self, n: usize) -> VmResult<()> {
        self.push(self.fetch(n)?);
        Ok(())
    }

    /// Moves `s[n]` to the top, shifting the values above it down.
    pub fn roll(&mut self, n: usize) -> VmResult<()> {
        self.check_underflow(n + 1)?;
        let depth = self.items.len();
        let value = self.items.remove(depth - 1 - n);
        self.items.push(value);
        Ok(())
    }

    /// Moves the top under `s[n]`; the inverse of `roll`.
    pub fn roll_rev(&mut self, n: usize) -> VmResult<()> {
        self.check_underflow(n + 1)?;
        let value = self.pop()?;
        let depth = self.items.len();
        self.items.insert(depth - n, value);
        Ok(())
    }

    /// Reverses `count` values located under the top `top` values.
    pub fn reverse(&mut self, count: usize, top: usize) -> VmResult<()> {
        self.check_underflow(count + top)?;
        let to = self.items.len() - top;
        self.items[to - count..to].reverse();
        Ok(())
    }

    pub fn pop_int(&mut self) -> VmResult<Int257> {
        match self.pop()? {
            StackValue::Int(val) => Ok(val),
            other => Err(VmError::type_chk(format!(
                "expected an integer, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_finite(&mut self) -> VmResult<Int257> {
        let val = self.pop_int()?;
        val.finite()?;
        Ok(val)
    }

    /// Pops an integer constrained to `min..=max`.
    pub fn pop_int_range(&mut self, min: i64, max: i64) -> VmResult<i64> {
        let val = self.pop_int()?;
        match val.to_i64() {
            Some(v) if v >= min && v <= max => Ok(v),
            _ => Err(VmError::range_chk(format!(
                "expected an integer in {min}..={max}, got {val}"
            ))),
        }
    }

    pub fn pop_smallint_range(&mut self, max: u32) -> VmResult<u32> {
        Ok(self.pop_int_range(0, max as i64)? as u32)
    }

    pub fn pop_bool(&mut self) -> VmResult<bool> {
        Ok(self.pop_int()?.is_true())
    }

    pub fn pop_cell(&mut self) -> VmResult<ArcCell> {
        match self.pop()? {
            StackValue::Cell(cell) => Ok(cell),
            other => Err(VmError::type_chk(format!(
                "expected a cell, got {}",
                other.type_name()
            ))),
        }
    }

    /// A cell or null, the "maybe cell" convention of dictionary roots.
    pub fn pop_maybe_cell(&mut self) -> VmResult<Option<ArcCell>> {
        match self.pop()? {
            StackValue::Null => Ok(None),
            StackValue::Cell(cell) => Ok(Some(cell)),
            other => Err(VmError::type_chk(format!(
                "expected a cell or null, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_slice(&mut self) -> VmResult<OwnedCellSlice> {
        match self.pop()? {
            StackValue::Slice(slice) => Ok(slice),
            other => Err(VmError::type_chk(format!(
                "expected a slice, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_builder(&mut self) -> VmResult<Arc<CellBuilder>> {
        match self.pop()? {
            StackValue::Builder(builder) => Ok(builder),
            other => Err(VmError::type_chk(format!(
                "expected a builder, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_cont(&mut self) -> VmResult<Arc<Continuation>> {
        match self.pop()? {
            StackValue::Cont(cont) => Ok(cont),
            other => Err(VmError::type_chk(format!(
                "expected a continuation, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_tuple(&mut self) -> VmResult<Tuple> {
        match self.pop()? {
            StackValue::Tuple(tuple) => Ok(tuple),
            other => Err(VmError::type_chk(format!(
                "expected a tuple, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_maybe_tuple(&mut self) -> VmResult<Option<Tuple>> {
        match self.pop()? {
            StackValue::Null => Ok(None),
            StackValue::Tuple(tuple) => Ok(Some(tuple)),
            other => Err(VmError::type_chk(format!(
                "expected a tuple or null, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_string(&mut self) -> VmResult<String> {
        match self.pop()? {
            StackValue::String(s) => Ok(s),
            other => Err(VmError::type_chk(format!(
                "expected a string, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_bytes(&mut self) -> VmResult<Vec<u8>> {
        match self.pop()? {
            StackValue::Bytes(b) => Ok(b),
            other => Err(VmError::type_chk(format!(
                "expected bytes, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_atom(&mut self) -> VmResult<Atom> {
        match self.pop()? {
            StackValue::Atom(a) => Ok(a),
            other => Err(VmError::type_chk(format!(
                "expected an atom, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn pop_box(&mut self) -> VmResult<SharedBox> {
        match self.pop()? {
            StackValue::Box(b) => Ok(b),
            other => Err(VmError::type_chk(format!(
                "expected a box, got {}",
                other.type_name()
            ))),
        }
    }

    /// Splits off the top `count` values as a new stack (bottom-to-top order
    /// preserved).
    pub fn split_top(&mut self, count: usize) -> VmResult<Stack> {
        Ok(Stack {
            items: self.pop_many(count)?,
        })
    }

    /// Moves the top `count` values of `other` onto this stack.
    pub fn take_from(&mut self, other: &mut Stack, count: usize) -> VmResult<()> {
        let mut moved = other.pop_many(count)?;
        self.items.append(&mut moved);
        Ok(())
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for value in &self.items {
            out.push(' ');
            out.push_str(&value.to_string());
        }
        out
    }
}

impl From<Vec<StackValue>> for Stack {
    fn from(items: Vec<StackValue>) -> Self {
        Stack { items }
    }
}

pub fn typechk_error(expected: &str, got: &StackValue) -> VmError {
    VmError::new(
        Excno::TypeCheck,
        format!("expected {expected}, got {}", got.type_name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underflow_is_stk_und() {
        let mut stack = Stack::new();
        let err = stack.pop().unwrap_err();
        assert_eq!(err.excno, Excno::StackUnderflow);
    }

    #[test]
    fn typed_pops() {
        let mut stack = Stack::new();
        stack.push_int(42i64);
        let err = stack.clone().pop_cell().unwrap_err();
        assert_eq!(err.excno, Excno::TypeCheck);
        assert_eq!(stack.pop_int().unwrap().to_i64(), Some(42));
    }

    #[test]
    fn roll_and_reverse() -> VmResult<()> {
        let mut stack = Stack::new();
        for i in 1..=5i64 {
            stack.push_int(i);
        }
        // 1 2 3 4 5 -> roll(2): 1 2 4 5 3
        stack.roll(2)?;
        assert_eq!(stack.fetch(0)?.as_int().unwrap().to_i64(), Some(3));
        assert_eq!(stack.fetch(1)?.as_int().unwrap().to_i64(), Some(5));
        stack.roll_rev(2)?;
        assert_eq!(stack.fetch(0)?.as_int().unwrap().to_i64(), Some(5));
        stack.reverse(3, 0)?;
        assert_eq!(stack.fetch(0)?.as_int().unwrap().to_i64(), Some(3));
        Ok(())
    }

    #[test]
    fn nan_push_is_gated() {
        let mut stack = Stack::new();
        assert!(stack.push_int_checked(Int257::nan(), true).is_ok());
        let err = stack.push_int_checked(Int257::nan(), false).unwrap_err();
        assert_eq!(err.excno, Excno::IntOverflow);
    }

    #[test]
    fn atoms_intern_by_name() {
        let a = Atom::named("answer");
        let b = Atom::named("answer");
        let c = Atom::named("question");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Atom::anonymous(), Atom::anonymous());
    }
}
