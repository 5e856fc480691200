//! Byte arrays and the update lists layered over them.
//!
//! An `Array` is the root content of a memory object: either an unconstrained
//! symbolic input, or constant bytes. Writes at symbolic offsets are recorded
//! in an `UpdateList`, a persistent list of `(index, value)` pairs, newest
//! first, which many states share structurally.
//!
//! Arrays have a 32-bit domain and an 8-bit range.

use crate::il::*;
use crate::Error;
use crate::RC;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The bitness of an index into an `Array`.
pub const ARRAY_INDEX_BITS: usize = 32;

/// A root byte array.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Array {
    name: String,
    size: u64,
    contents: Option<RC<Vec<u8>>>,
}

impl Array {
    /// Create a new symbolic array of `size` bytes.
    pub fn new<S>(name: S, size: u64) -> Array
    where
        S: Into<String>,
    {
        Array {
            name: name.into(),
            size,
            contents: None,
        }
    }

    /// Create a new array with constant contents.
    pub fn new_constant<S>(name: S, contents: Vec<u8>) -> Array
    where
        S: Into<String>,
    {
        Array {
            name: name.into(),
            size: contents.len() as u64,
            contents: Some(RC::new(contents)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of the `Array` in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True if this array is an unconstrained input.
    pub fn is_symbolic(&self) -> bool {
        self.contents.is_none()
    }

    /// The constant contents of this array, if it has them.
    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_ref().map(|contents| contents.as_slice())
    }

    /// The constant byte at `index`, if this array is constant.
    pub fn constant_byte(&self, index: u64) -> Result<Option<u8>, Error> {
        match self.contents {
            Some(ref contents) => contents
                .get(index as usize)
                .copied()
                .map(Some)
                .ok_or(Error::ArrayIndex(self.name.clone(), index)),
            None => Ok(None),
        }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.size == other.size
            && match (&self.contents, &other.contents) {
                (Some(lhs), Some(rhs)) => RC::ptr_eq(lhs, rhs) || lhs == rhs,
                (None, None) => true,
                _ => false,
            }
    }
}

impl Eq for Array {}

// Names are unique per root, so hashing the contents buys nothing.
impl Hash for Array {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.size.hash(state);
        self.contents.is_some().hash(state);
    }
}

impl PartialOrd for Array {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Array {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then(self.size.cmp(&other.size))
            .then_with(|| self.contents.cmp(&other.contents))
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.size)
    }
}

/// One write in an `UpdateList`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateNode {
    hash: u64,
    index: Expression,
    value: Expression,
    next: Option<RC<UpdateNode>>,
}

impl Drop for UpdateNode {
    // Unlink the chain iteratively so that long write histories do not
    // exhaust the stack.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match RC::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

impl UpdateNode {
    fn new(index: Expression, value: Expression, next: Option<RC<UpdateNode>>) -> UpdateNode {
        let mut hasher = FxHasher::default();
        index.hash(&mut hasher);
        value.hash(&mut hasher);
        next.as_ref().map(|next| next.hash).hash(&mut hasher);
        UpdateNode {
            hash: hasher.finish(),
            index,
            value,
            next,
        }
    }

    pub fn index(&self) -> &Expression {
        &self.index
    }

    pub fn value(&self) -> &Expression {
        &self.value
    }

    pub fn next(&self) -> Option<&RC<UpdateNode>> {
        self.next.as_ref()
    }
}

fn nodes_eq(mut lhs: Option<&RC<UpdateNode>>, mut rhs: Option<&RC<UpdateNode>>) -> bool {
    loop {
        match (lhs, rhs) {
            (None, None) => return true,
            (Some(l), Some(r)) => {
                if RC::ptr_eq(l, r) {
                    return true;
                }
                if l.hash != r.hash || l.index != r.index || l.value != r.value {
                    return false;
                }
                lhs = l.next.as_ref();
                rhs = r.next.as_ref();
            }
            _ => return false,
        }
    }
}

/// A persistent list of writes over a root `Array`, newest first.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateList {
    root: Array,
    head: Option<RC<UpdateNode>>,
    len: usize,
}

impl UpdateList {
    /// An empty update list over `root`.
    pub fn new(root: Array) -> UpdateList {
        UpdateList {
            root,
            head: None,
            len: 0,
        }
    }

    pub fn root(&self) -> &Array {
        &self.root
    }

    pub fn head(&self) -> Option<&RC<UpdateNode>> {
        self.head.as_ref()
    }

    /// The number of writes in this list.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over the writes in this list, newest first.
    pub fn iter(&self) -> UpdateIter {
        UpdateIter {
            node: self.head.as_ref(),
        }
    }

    /// Returns a new list with the given write layered on top of this one.
    ///
    /// A write identical to the newest write returns this list unchanged. A
    /// write to the same index as the newest write replaces it.
    pub fn extend(&self, index: Expression, value: Expression) -> Result<UpdateList, Error> {
        if index.bits() != ARRAY_INDEX_BITS || value.bits() != 8 {
            return Err(Error::Sort);
        }
        if let Some(head) = self.head.as_ref() {
            if head.index == index {
                if head.value == value {
                    return Ok(self.clone());
                }
                return Ok(UpdateList {
                    root: self.root.clone(),
                    head: Some(RC::new(UpdateNode::new(index, value, head.next.clone()))),
                    len: self.len,
                });
            }
        }
        Ok(UpdateList {
            root: self.root.clone(),
            head: Some(RC::new(UpdateNode::new(index, value, self.head.clone()))),
            len: self.len + 1,
        })
    }

    /// Build the expression for the byte at `index`.
    ///
    /// At a constant index, writes to other constant indices are skipped and
    /// a constant-index match folds to its value. The walk stops at the first
    /// symbolic-index write, and the resulting `Read` only carries the
    /// remaining list.
    pub fn read(&self, index: Expression) -> Result<Expression, Error> {
        if index.bits() != ARRAY_INDEX_BITS {
            return Err(Error::Sort);
        }

        let constant_index = index.get_constant().map(|c| c.value());

        let mut node = self.head.as_ref();
        let mut remaining = self.len;
        while let Some(n) = node {
            if n.index == index {
                return Ok(n.value.clone());
            }
            match (constant_index, n.index.get_constant()) {
                (Some(_), Some(_)) => {
                    node = n.next.as_ref();
                    remaining -= 1;
                }
                _ => {
                    return Ok(Expression::Read(
                        UpdateList {
                            root: self.root.clone(),
                            head: Some(n.clone()),
                            len: remaining,
                        },
                        Box::new(index),
                    ))
                }
            }
        }

        if let Some(offset) = constant_index {
            if let Some(byte) = self.root.constant_byte(offset)? {
                return Ok(expr_const(byte as u64, 8));
            }
        }

        Ok(Expression::Read(UpdateList::new(self.root.clone()), Box::new(index)))
    }
}

impl PartialEq for UpdateList {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self.root == other.root
            && nodes_eq(self.head.as_ref(), other.head.as_ref())
    }
}

impl Eq for UpdateList {}

impl Hash for UpdateList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
        self.len.hash(state);
        self.head.as_ref().map(|head| head.hash).hash(state);
    }
}

impl PartialOrd for UpdateList {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UpdateList {
    fn cmp(&self, other: &Self) -> Ordering {
        let ordering = self
            .root
            .cmp(&other.root)
            .then(self.len.cmp(&other.len));
        if ordering != Ordering::Equal {
            return ordering;
        }
        for ((li, lv), (ri, rv)) in self.iter().zip(other.iter()) {
            let ordering = li.cmp(ri).then_with(|| lv.cmp(rv));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for UpdateList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "{}", self.root.name());
        }
        write!(f, "{}{{", self.root.name())?;
        let mut first = true;
        for (index, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", index, value)?;
        }
        write!(f, "}}")
    }
}

/// Iterates over the writes of an `UpdateList`, newest first.
pub struct UpdateIter<'u> {
    node: Option<&'u RC<UpdateNode>>,
}

impl<'u> Iterator for UpdateIter<'u> {
    type Item = (&'u Expression, &'u Expression);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.node?;
        self.node = node.next.as_ref();
        Some((&node.index, &node.value))
    }
}
