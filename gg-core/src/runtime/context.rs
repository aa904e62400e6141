//! Run Context
//!
//! The run context tracks which node is being stepped right now. Facade
//! futures read it to learn whose wait set they are declaring.
//!
//! # Implementation
//!
//! We use a thread-local stack of node ids. Stepping a computation pushes
//! its id and the returned guard pops it, on every exit path including
//! unwinding. A computation is polled synchronously, start to finish on one
//! thread, so the stack stays balanced even when the steps of one tick are
//! interleaved.

use std::cell::RefCell;

use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<NodeId>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub struct RunContext {
    node: NodeId,
}

impl RunContext {
    /// Make `node` the current node until the guard is dropped.
    pub fn enter(node: NodeId) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(node));
        Self { node }
    }

    /// The node being stepped, if any.
    pub fn current() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().copied())
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.node),
                "RunContext mismatch: expected {}, got {:?}",
                self.node,
                popped
            );
        });
    }
}
