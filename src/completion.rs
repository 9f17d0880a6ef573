//! Single-threaded completion values.
//!
//! A [`Completion`] is resolved exactly once by the connection and can be
//! observed either by awaiting it or by calling [`Completion::get`] after a
//! `receive`/`flush` round. It is a `futures` oneshot channel whose receiver
//! is shared between clones; no executor is needed to resolve it.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

pub use futures::channel::oneshot::Canceled;

/// A shared, `!Send` promise. Clones observe the same value.
pub struct Completion<T: Clone> {
    sender: Rc<RefCell<Option<oneshot::Sender<T>>>>,
    receiver: Shared<oneshot::Receiver<T>>,
}

impl<T: Clone> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Rc::clone(&self.sender),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl<T: Clone> Completion<T> {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Rc::new(RefCell::new(Some(sender))),
            receiver: receiver.shared(),
        }
    }

    /// Resolve with `value`. Returns `false` if already resolved; the first
    /// value wins.
    pub fn complete(&self, value: T) -> bool {
        let Some(sender) = self.sender.borrow_mut().take() else {
            return false;
        };
        if sender.send(value).is_err() {
            return false;
        }
        // Drive the shared receiver once so the value is visible to `get`
        // on every clone.
        self.receiver.clone().now_or_never();
        true
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.receiver.peek(), Some(Ok(_)))
    }

    /// The resolved value, if any.
    pub fn get(&self) -> Option<T> {
        self.receiver.peek()?.as_ref().ok().cloned()
    }
}

/// Resolves with the value, or [`Canceled`] if the connection dropped the
/// completion without resolving it.
impl<T: Clone> Future for Completion<T> {
    type Output = Result<T, Canceled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver.poll_unpin(cx)
    }
}
