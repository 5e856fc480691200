use crate::il::Expression;
use crate::memory::ObjectId;
use crate::{Error, RC};
use std::collections::BTreeMap;

/// One activation record.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    function: u64,
    return_address: Option<u64>,
    locals: BTreeMap<String, Expression>,
    allocas: Vec<ObjectId>,
    caller: Option<RC<Frame>>,
}

impl Frame {
    /// The entry address of the function this frame belongs to.
    pub fn function(&self) -> u64 {
        self.function
    }

    /// Where execution resumes when this frame returns.
    pub fn return_address(&self) -> Option<u64> {
        self.return_address
    }

    pub fn locals(&self) -> &BTreeMap<String, Expression> {
        &self.locals
    }

    pub fn local(&self, name: &str) -> Option<&Expression> {
        self.locals.get(name)
    }

    pub fn set_local<S: Into<String>>(&mut self, name: S, value: Expression) {
        self.locals.insert(name.into(), value);
    }

    /// Stack objects owned by this frame.
    pub fn allocas(&self) -> &[ObjectId] {
        &self.allocas
    }

    pub(crate) fn add_alloca(&mut self, id: ObjectId) {
        self.allocas.push(id);
    }
}

/// A persistent call stack.
///
/// Frames link to their caller through reference-counted pointers, so a
/// forked state shares every frame with its sibling. Mutating the top frame
/// copies only that frame.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    top: Option<RC<Frame>>,
    depth: usize,
}

impl Stack {
    pub fn new() -> Stack {
        Stack::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    pub fn push(&mut self, function: u64, return_address: Option<u64>) {
        self.top = Some(RC::new(Frame {
            function,
            return_address,
            locals: BTreeMap::new(),
            allocas: Vec::new(),
            caller: self.top.take(),
        }));
        self.depth += 1;
    }

    /// Pop the top frame, returning it.
    pub fn pop(&mut self) -> Option<Frame> {
        let top = self.top.take()?;
        let frame = RC::try_unwrap(top).unwrap_or_else(|shared| shared.as_ref().clone());
        self.top = frame.caller.clone();
        self.depth -= 1;
        Some(frame)
    }

    pub fn top(&self) -> Option<&Frame> {
        self.top.as_deref()
    }

    /// A writable top frame, copied first if another stack shares it.
    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.top.as_mut().map(RC::make_mut)
    }

    /// Iterate over the frames, innermost first.
    pub fn frames(&self) -> FrameIter {
        FrameIter {
            frame: self.top.as_deref(),
        }
    }

    pub fn local(&self, name: &str) -> Option<&Expression> {
        self.top().and_then(|frame| frame.local(name))
    }

    pub fn set_local<S: Into<String>>(&mut self, name: S, value: Expression) -> Result<(), Error> {
        self.top_mut()
            .ok_or_else(|| Error::Custom("set a local with an empty call stack".to_string()))?
            .set_local(name, value);
        Ok(())
    }

    /// Rebuild this stack from `frames`, innermost first.
    pub(crate) fn replace_frames(&mut self, frames: Vec<Frame>) {
        let mut top: Option<RC<Frame>> = None;
        let depth = frames.len();
        for mut frame in frames.into_iter().rev() {
            frame.caller = top;
            top = Some(RC::new(frame));
        }
        self.top = top;
        self.depth = depth;
    }

    /// True if both stacks share the same top frame.
    pub fn shares_top(&self, other: &Stack) -> bool {
        match (&self.top, &other.top) {
            (Some(lhs), Some(rhs)) => RC::ptr_eq(lhs, rhs),
            (None, None) => true,
            _ => false,
        }
    }
}

/// Iterates over the frames of a `Stack`, innermost first.
pub struct FrameIter<'s> {
    frame: Option<&'s Frame>,
}

impl<'s> Iterator for FrameIter<'s> {
    type Item = &'s Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.frame?;
        self.frame = frame.caller.as_deref();
        Some(frame)
    }
}
