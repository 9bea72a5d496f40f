use std::sync::Arc;

use tonvm_core::stack::{SharedBox, Stack, StackValue, VmObject};

use crate::cont::{FiftCont, PrimFn};
use crate::ctx::IntCtx;
use crate::errors::FiftResult;
use crate::hashmap::{self, DictKey, HashmapRef};

/// One dictionary entry: the word's definition and whether it executes
/// immediately even in compile mode.
#[derive(Debug, Clone)]
pub struct DictEntry {
    pub def: Arc<FiftCont>,
    pub active: bool,
}

#[derive(Debug)]
struct DictEntryObj(DictEntry);

impl VmObject for DictEntryObj {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// The treap root boxed onto the value stack; dictionaries and `hmap*`
/// words share this representation.
#[derive(Debug)]
pub struct HashmapObj(pub HashmapRef);

impl VmObject for HashmapObj {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub fn hashmap_value(root: HashmapRef) -> StackValue {
    match root {
        None => StackValue::Null,
        root => StackValue::Object(Arc::new(HashmapObj(root))),
    }
}

pub fn hashmap_from_value(value: &StackValue) -> Option<HashmapRef> {
    match value {
        StackValue::Null => Some(None),
        StackValue::Object(_) => value
            .as_object::<HashmapObj>()
            .map(|wrapper| wrapper.0.clone()),
        _ => None,
    }
}

/// A word dictionary: a shared box holding a persistent treap from word
/// name to entry. Copying the `Dictionary` aliases the same box, the way
/// `current@`/`context!` expect.
#[derive(Clone, Debug)]
pub struct Dictionary {
    words: SharedBox,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary {
            words: SharedBox::new(StackValue::Null),
        }
    }

    pub fn from_box(words: SharedBox) -> Self {
        Dictionary { words }
    }

    pub fn get_box(&self) -> SharedBox {
        self.words.clone()
    }

    pub fn same_as(&self, other: &Dictionary) -> bool {
        self.words.ptr_eq(&other.words)
    }

    fn root(&self) -> HashmapRef {
        hashmap_from_value(&self.words.fetch()).unwrap_or(None)
    }

    fn set_root(&self, root: HashmapRef) {
        self.words.store(hashmap_value(root));
    }

    pub fn lookup(&self, name: &str) -> Option<DictEntry> {
        let root = self.root();
        let value = hashmap::lookup(&root, &DictKey::string(name))?;
        value.as_object::<DictEntryObj>().map(|obj| obj.0.clone())
    }

    pub fn def_entry(&self, name: &str, entry: DictEntry) {
        let root = self.root();
        let value = StackValue::Object(Arc::new(DictEntryObj(entry)));
        self.set_root(hashmap::set(&root, DictKey::string(name), value));
    }

    pub fn def_word(&self, name: &str, def: Arc<FiftCont>) {
        self.def_entry(name, DictEntry { def, active: false });
    }

    pub fn def_active_word(&self, name: &str, def: Arc<FiftCont>) {
        self.def_entry(name, DictEntry { def, active: true });
    }

    pub fn def_stack_word(
        &self,
        name: &str,
        f: impl Fn(&mut Stack) -> FiftResult<()> + Send + Sync + 'static,
    ) {
        let wrapped: PrimFn = Arc::new(move |ctx: &mut IntCtx| {
            f(&mut ctx.stack)?;
            Ok(None)
        });
        self.def_word(
            name,
            Arc::new(FiftCont::Primitive {
                name: name.to_owned(),
                f: wrapped,
            }),
        );
    }

    pub fn def_ctx_word(
        &self,
        name: &str,
        f: impl Fn(&mut IntCtx) -> FiftResult<()> + Send + Sync + 'static,
    ) {
        let wrapped: PrimFn = Arc::new(move |ctx: &mut IntCtx| {
            f(ctx)?;
            Ok(None)
        });
        self.def_word(
            name,
            Arc::new(FiftCont::Primitive {
                name: name.to_owned(),
                f: wrapped,
            }),
        );
    }

    pub fn def_tail_word(
        &self,
        name: &str,
        f: impl Fn(&mut IntCtx) -> FiftResult<Option<Arc<FiftCont>>> + Send + Sync + 'static,
    ) {
        self.def_word(name, FiftCont::primitive(name, f));
    }

    pub fn def_active(
        &self,
        name: &str,
        f: impl Fn(&mut IntCtx) -> FiftResult<Option<Arc<FiftCont>>> + Send + Sync + 'static,
    ) {
        self.def_active_word(name, FiftCont::primitive(name, f));
    }

    pub fn undef_word(&self, name: &str) -> bool {
        let root = self.root();
        let (new_root, old) = hashmap::remove(&root, &DictKey::string(name));
        self.set_root(new_root);
        old.is_some()
    }

    /// Word names in dictionary order.
    pub fn word_names(&self) -> Vec<String> {
        let mut names = vec![];
        hashmap::foreach(&self.root(), false, &mut |key, _| {
            if let StackValue::String(name) = key.to_value() {
                names.push(name);
            }
            true
        });
        names
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_lookup_forget() {
        let dict = Dictionary::new();
        assert!(dict.lookup("dup").is_none());
        dict.def_stack_word("dup", |stack| {
            stack.dup()?;
            Ok(())
        });
        let entry = dict.lookup("dup").expect("defined");
        assert!(!entry.active);
        assert!(dict.undef_word("dup"));
        assert!(dict.lookup("dup").is_none());
        assert!(!dict.undef_word("dup"));
    }

    #[test]
    fn aliased_dictionaries_share_words() {
        let dict = Dictionary::new();
        let alias = Dictionary::from_box(dict.get_box());
        dict.def_word("nop", FiftCont::nop());
        assert!(alias.lookup("nop").is_some());
        assert!(alias.same_as(&dict));
    }
}
