//! Single-reactor pending results.
//!
//! The commit pipeline suspends at two RPC boundaries (content flush and
//! checkpoint commit). A transaction creates an [`RpcFuture`] when it
//! reaches such a boundary, the surrounding service performs the call and
//! fulfills it, and the transaction picks the result up on its next pass.
//! No executor involved; everything happens on one task.

use std::{cell::RefCell, rc::Rc};

use crate::error::Error;

#[derive(Debug)]
pub struct RpcFuture<T> {
    inner: Rc<RefCell<Option<Result<T, Error>>>>,
}

impl<T> Clone for RpcFuture<T> {
    fn clone(&self) -> Self {
        RpcFuture {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for RpcFuture<T> {
    fn default() -> Self {
        RpcFuture::new()
    }
}

impl<T> RpcFuture<T> {
    pub fn new() -> Self {
        RpcFuture {
            inner: Rc::new(RefCell::new(None)),
        }
    }

    /// Complete the future. Fulfilling twice keeps the first result.
    pub fn fulfill(&self, result: Result<T, Error>) {
        let mut slot = self.inner.borrow_mut();
        if slot.is_none() {
            *slot = Some(result);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.borrow().is_some()
    }
}

impl<T: Clone> RpcFuture<T> {
    pub fn result(&self) -> Option<Result<T, Error>> {
        self.inner.borrow().clone()
    }
}
