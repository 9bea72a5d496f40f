//! The persistent treap backing Fift dictionaries and the `hmap*` words.
//!
//! Nodes are immutable; every update builds new spine nodes and shares the
//! rest. Heap priorities are derived deterministically from the key hash,
//! so equal key sets produce equal tree shapes.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tonvm_core::num::Int257;
use tonvm_core::stack::{Atom, StackValue};

/// Keys a Fift hashmap accepts, with a precomputed 64-bit hash used as the
/// primary ordering and as the treap priority.
#[derive(Debug, Clone)]
pub struct DictKey {
    kind: KeyKind,
    hash: u64,
}

#[derive(Debug, Clone)]
enum KeyKind {
    Atom(Atom),
    Int(Int257),
    Str(String),
    Bytes(Vec<u8>),
}

impl DictKey {
    pub fn string(s: impl Into<String>) -> Self {
        Self::from_kind(KeyKind::Str(s.into()))
    }

    pub fn bytes(b: Vec<u8>) -> Self {
        Self::from_kind(KeyKind::Bytes(b))
    }

    pub fn atom(a: Atom) -> Self {
        Self::from_kind(KeyKind::Atom(a))
    }

    pub fn int(i: Int257) -> Self {
        Self::from_kind(KeyKind::Int(i))
    }

    /// Accepts the value kinds usable as keys; `None` otherwise.
    pub fn from_value(value: &StackValue) -> Option<Self> {
        match value {
            StackValue::Atom(a) => Some(Self::atom(a.clone())),
            StackValue::Int(i) => Some(Self::int(i.clone())),
            StackValue::String(s) => Some(Self::string(s.clone())),
            StackValue::Bytes(b) => Some(Self::bytes(b.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> StackValue {
        match &self.kind {
            KeyKind::Atom(a) => StackValue::Atom(a.clone()),
            KeyKind::Int(i) => StackValue::Int(i.clone()),
            KeyKind::Str(s) => StackValue::String(s.clone()),
            KeyKind::Bytes(b) => StackValue::Bytes(b.clone()),
        }
    }

    fn from_kind(kind: KeyKind) -> Self {
        let mut hasher = DefaultHasher::new();
        match &kind {
            KeyKind::Atom(a) => {
                0u8.hash(&mut hasher);
                a.index().hash(&mut hasher);
            }
            KeyKind::Int(i) => {
                1u8.hash(&mut hasher);
                i.to_string().hash(&mut hasher);
            }
            KeyKind::Str(s) => {
                2u8.hash(&mut hasher);
                s.hash(&mut hasher);
            }
            KeyKind::Bytes(b) => {
                3u8.hash(&mut hasher);
                b.hash(&mut hasher);
            }
        }
        DictKey {
            hash: hasher.finish(),
            kind,
        }
    }

    fn type_rank(&self) -> u8 {
        match &self.kind {
            KeyKind::Atom(_) => 0,
            KeyKind::Int(_) => 1,
            KeyKind::Str(_) => 2,
            KeyKind::Bytes(_) => 3,
        }
    }

    /// Total order: hash first, then typed comparison on ties.
    pub fn cmp_key(&self, other: &DictKey) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| self.type_rank().cmp(&other.type_rank()))
            .then_with(|| match (&self.kind, &other.kind) {
                (KeyKind::Atom(a), KeyKind::Atom(b)) => a.index().cmp(&b.index()),
                (KeyKind::Int(a), KeyKind::Int(b)) => {
                    a.cmp_finite(b).unwrap_or(Ordering::Equal)
                }
                (KeyKind::Str(a), KeyKind::Str(b)) => a.cmp(b),
                (KeyKind::Bytes(a), KeyKind::Bytes(b)) => a.cmp(b),
                _ => Ordering::Equal,
            })
    }

    /// Deterministic treap priority.
    fn priority(&self) -> u64 {
        // A multiplicative scramble keeps priorities independent from the
        // ordering, which is also hash-based.
        self.hash.wrapping_mul(0x9E3779B97F4A7C15).rotate_left(17)
    }
}

#[derive(Debug)]
pub struct HashmapNode {
    key: DictKey,
    value: StackValue,
    left: HashmapRef,
    right: HashmapRef,
    priority: u64,
}

pub type HashmapRef = Option<Arc<HashmapNode>>;

impl HashmapNode {
    pub fn key(&self) -> &DictKey {
        &self.key
    }

    pub fn value(&self) -> &StackValue {
        &self.value
    }

    pub fn left(&self) -> &HashmapRef {
        &self.left
    }

    pub fn right(&self) -> &HashmapRef {
        &self.right
    }
}

pub fn lookup<'a>(root: &'a HashmapRef, key: &DictKey) -> Option<&'a StackValue> {
    let mut node = root.as_deref()?;
    loop {
        match key.cmp_key(&node.key) {
            Ordering::Equal => return Some(&node.value),
            Ordering::Less => node = node.left.as_deref()?,
            Ordering::Greater => node = node.right.as_deref()?,
        }
    }
}

/// Splits into nodes strictly less than `key`, the matching node (if any),
/// and nodes strictly greater.
fn split(root: &HashmapRef, key: &DictKey) -> (HashmapRef, Option<Arc<HashmapNode>>, HashmapRef) {
    let Some(node) = root else {
        return (None, None, None);
    };
    match key.cmp_key(&node.key) {
        Ordering::Equal => (node.left.clone(), Some(node.clone()), node.right.clone()),
        Ordering::Less => {
            let (l, eq, r) = split(&node.left, key);
            let new_node = Arc::new(HashmapNode {
                key: node.key.clone(),
                value: node.value.clone(),
                left: r,
                right: node.right.clone(),
                priority: node.priority,
            });
            (l, eq, Some(new_node))
        }
        Ordering::Greater => {
            let (l, eq, r) = split(&node.right, key);
            let new_node = Arc::new(HashmapNode {
                key: node.key.clone(),
                value: node.value.clone(),
                left: node.left.clone(),
                right: l,
                priority: node.priority,
            });
            (Some(new_node), eq, r)
        }
    }
}

/// Merges two treaps where every key of `a` is less than every key of `b`.
fn merge(a: &HashmapRef, b: &HashmapRef) -> HashmapRef {
    match (a, b) {
        (None, other) | (other, None) => other.clone(),
        (Some(left), Some(right)) => {
            if left.priority >= right.priority {
                Some(Arc::new(HashmapNode {
                    key: left.key.clone(),
                    value: left.value.clone(),
                    left: left.left.clone(),
                    right: merge(&left.right, b),
                    priority: left.priority,
                }))
            } else {
                Some(Arc::new(HashmapNode {
                    key: right.key.clone(),
                    value: right.value.clone(),
                    left: merge(a, &right.left),
                    right: right.right.clone(),
                    priority: right.priority,
                }))
            }
        }
    }
}

/// Returns the new root; the previous value for the key (if any) is simply
/// superseded.
pub fn set(root: &HashmapRef, key: DictKey, value: StackValue) -> HashmapRef {
    let (l, _, r) = split(root, &key);
    let node = Some(Arc::new(HashmapNode {
        priority: key.priority(),
        key,
        value,
        left: None,
        right: None,
    }));
    merge(&merge(&l, &node), &r)
}

/// Returns the new root and the removed value.
pub fn remove(root: &HashmapRef, key: &DictKey) -> (HashmapRef, Option<StackValue>) {
    let (l, eq, r) = split(root, key);
    (merge(&l, &r), eq.map(|node| node.value.clone()))
}

pub fn is_empty(root: &HashmapRef) -> bool {
    root.is_none()
}

pub fn len(root: &HashmapRef) -> usize {
    match root {
        None => 0,
        Some(node) => 1 + len(&node.left) + len(&node.right),
    }
}

/// In-order traversal (ascending by hash, then typed order); the visitor
/// returns `false` to stop early. Returns `true` when fully traversed.
pub fn foreach<F>(root: &HashmapRef, reverse: bool, f: &mut F) -> bool
where
    F: FnMut(&DictKey, &StackValue) -> bool,
{
    let Some(node) = root else {
        return true;
    };
    let (first, second) = if reverse {
        (&node.right, &node.left)
    } else {
        (&node.left, &node.right)
    };
    foreach(first, reverse, f) && f(&node.key, &node.value) && foreach(second, reverse, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_key(i: i64) -> DictKey {
        DictKey::int(Int257::from(i))
    }

    fn get_i64(root: &HashmapRef, key: i64) -> Option<i64> {
        lookup(root, &int_key(key)).and_then(|v| v.as_int()?.to_i64())
    }

    #[test]
    fn functional_updates() {
        let empty: HashmapRef = None;
        let one = set(&empty, int_key(1), StackValue::int(10i64));
        let two = set(&one, int_key(2), StackValue::int(20i64));
        let replaced = set(&two, int_key(1), StackValue::int(11i64));

        // lookup(set(m, k, v), k) == v, other keys unaffected.
        assert_eq!(get_i64(&replaced, 1), Some(11));
        assert_eq!(get_i64(&replaced, 2), Some(20));
        // The old roots still see their old values.
        assert_eq!(get_i64(&two, 1), Some(10));
        assert_eq!(get_i64(&one, 2), None);
    }

    #[test]
    fn remove_matches_never_inserted() {
        let empty: HashmapRef = None;
        let with = set(&empty, int_key(5), StackValue::int(50i64));
        let (without, old) = remove(&with, &int_key(5));
        assert_eq!(old.and_then(|v| v.as_int().and_then(|i| i.to_i64())), Some(50));
        assert!(is_empty(&without));
        let (still_empty, old) = remove(&without, &int_key(5));
        assert!(old.is_none());
        assert!(is_empty(&still_empty));
    }

    #[test]
    fn ordered_iteration_with_duplicates() {
        // Insert 3 1 4 1 5 9 2 6; ascending numeric iteration must yield
        // 1 2 3 4 5 6 9 with the last value kept for the duplicate.
        let mut root: HashmapRef = None;
        for (pos, k) in [3i64, 1, 4, 1, 5, 9, 2, 6].into_iter().enumerate() {
            root = set(&root, int_key(k), StackValue::int(pos as i64));
        }
        assert_eq!(len(&root), 7);
        let mut keys: Vec<i64> = vec![];
        foreach(&root, false, &mut |k, _| {
            if let StackValue::Int(i) = k.to_value() {
                keys.push(i.to_i64().unwrap());
            }
            true
        });
        // Iteration is hash-ordered; sort to compare the key set.
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5, 6, 9]);
        // The duplicate key 1 kept its last value (position 3).
        assert_eq!(get_i64(&root, 1), Some(3));
    }

    #[test]
    fn mixed_key_kinds_coexist() {
        let mut root: HashmapRef = None;
        root = set(&root, DictKey::string("name"), StackValue::int(1i64));
        root = set(&root, DictKey::bytes(vec![1, 2, 3]), StackValue::int(2i64));
        root = set(&root, int_key(42), StackValue::int(3i64));
        assert_eq!(
            lookup(&root, &DictKey::string("name")).and_then(|v| v.as_int()?.to_i64()),
            Some(1)
        );
        assert_eq!(
            lookup(&root, &DictKey::bytes(vec![1, 2, 3])).and_then(|v| v.as_int()?.to_i64()),
            Some(2)
        );
        assert!(lookup(&root, &DictKey::string("missing")).is_none());
    }
}
