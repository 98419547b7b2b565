//! Batch request: ordered subrequests paired with their callbacks.
//!
//! # Design
//! Correlation is positional. An entry's sequence index is its position in
//! the batch and the position of its part in both the request and the
//! response document, so entries are append-only and never reordered.
//!
//! `complete()` freezes the batch and moves its entries into a
//! `FrozenBatch`, which is what a `BatchClient` consumes. The frozen entries
//! are owned by the client from then on; any later `add` or `complete` on the
//! batch request fails with `AlreadyCompleted` and cannot touch them.

use std::fmt;

use crate::error::BatchError;
use crate::http::{Subrequest, Subresponse};

/// What a callback receives: the matched subresponse or why there is none.
pub type SubresponseResult = Result<Subresponse, BatchError>;

/// Completion callback of one subrequest. Invoked exactly once.
pub type Callback = Box<dyn FnOnce(SubresponseResult)>;

/// One subrequest, its sequence index, and its callback.
pub struct BatchEntry {
    index: usize,
    subrequest: Subrequest,
    callback: Callback,
}

impl BatchEntry {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn subrequest(&self) -> &Subrequest {
        &self.subrequest
    }

    /// Hand `result` to the callback, consuming the entry.
    pub(crate) fn deliver(self, result: SubresponseResult) {
        (self.callback)(result)
    }
}

impl fmt::Debug for BatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchEntry")
            .field("index", &self.index)
            .field("subrequest", &self.subrequest)
            .finish_non_exhaustive()
    }
}

/// Subrequests collected for one batch exchange.
#[derive(Debug, Default)]
pub struct BatchRequest {
    entries: Vec<BatchEntry>,
    completed: bool,
}

impl BatchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `subrequest`, returning its sequence index.
    ///
    /// Fails with `InvalidSubrequest` when the subrequest cannot be encoded
    /// verbatim (see `Subrequest::validate`); nothing is added then.
    ///
    /// `callback` is invoked exactly once, after the batch is completed, with
    /// the subresponse matched to this entry or the failure that prevented it.
    pub fn add<F>(&mut self, subrequest: Subrequest, callback: F) -> Result<usize, BatchError>
    where
        F: FnOnce(SubresponseResult) + 'static,
    {
        if self.completed {
            return Err(BatchError::AlreadyCompleted);
        }
        subrequest.validate()?;
        let index = self.entries.len();
        self.entries.push(BatchEntry {
            index,
            subrequest,
            callback: Box::new(callback),
        });
        Ok(index)
    }

    /// Freeze the batch and hand over its entries in sequence order.
    pub fn complete(&mut self) -> Result<FrozenBatch, BatchError> {
        if self.completed {
            return Err(BatchError::AlreadyCompleted);
        }
        self.completed = true;
        Ok(FrozenBatch {
            entries: std::mem::take(&mut self.entries),
        })
    }

    /// Entries added so far; zero once completed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// The immutable, ordered entries of a completed batch request.
#[derive(Debug)]
pub struct FrozenBatch {
    entries: Vec<BatchEntry>,
}

impl FrozenBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<BatchEntry> {
        self.entries
    }
}

/// Deliver the same failure to every entry, in sequence order.
pub(crate) fn broadcast(entries: Vec<BatchEntry>, error: &BatchError) {
    for entry in entries {
        entry.deliver(Err(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn add_assigns_sequential_indices() {
        let mut batch = BatchRequest::new();
        assert_eq!(batch.add(Subrequest::get("/a"), |_| {}).unwrap(), 0);
        assert_eq!(batch.add(Subrequest::get("/b"), |_| {}).unwrap(), 1);
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_completed());
    }

    #[test]
    fn complete_hands_over_entries_in_order() {
        let mut batch = BatchRequest::new();
        batch.add(Subrequest::get("/a"), |_| {}).unwrap();
        batch.add(Subrequest::get("/b"), |_| {}).unwrap();

        let frozen = batch.complete().unwrap();
        let targets: Vec<(usize, &str)> = frozen
            .entries()
            .iter()
            .map(|e| (e.index(), e.subrequest().target.as_str()))
            .collect();
        assert_eq!(targets, vec![(0, "/a"), (1, "/b")]);
        assert!(batch.is_completed());
    }

    #[test]
    fn add_after_complete_fails_without_touching_frozen_entries() {
        let mut batch = BatchRequest::new();
        batch.add(Subrequest::get("/a"), |_| {}).unwrap();
        let frozen = batch.complete().unwrap();

        let err = batch.add(Subrequest::get("/late"), |_| {}).unwrap_err();
        assert_eq!(err, BatchError::AlreadyCompleted);
        assert_eq!(frozen.len(), 1);
        assert!(batch.is_empty());
    }

    #[test]
    fn add_rejects_header_injection_without_consuming_an_index() {
        let mut batch = BatchRequest::new();
        let err = batch
            .add(Subrequest::get("/a").header("X-Note", "x\r\n\r\ninjected"), |_| {
                panic!("rejected subrequest must not be called back")
            })
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidSubrequest(_)));
        assert!(batch.is_empty());
        assert_eq!(batch.add(Subrequest::get("/b"), |_| {}).unwrap(), 0);
    }

    #[test]
    fn second_complete_fails() {
        let mut batch = BatchRequest::new();
        batch.complete().unwrap();
        assert_eq!(batch.complete().unwrap_err(), BatchError::AlreadyCompleted);
    }

    #[test]
    fn broadcast_reaches_every_callback_once_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut batch = BatchRequest::new();
        for target in ["/a", "/b", "/c"] {
            let seen = Rc::clone(&seen);
            batch
                .add(Subrequest::get(target), move |result| {
                    seen.borrow_mut().push((target, result.unwrap_err()))
                })
                .unwrap();
        }

        broadcast(batch.complete().unwrap().into_entries(), &BatchError::Cancelled);
        assert_eq!(
            *seen.borrow(),
            vec![
                ("/a", BatchError::Cancelled),
                ("/b", BatchError::Cancelled),
                ("/c", BatchError::Cancelled),
            ]
        );
    }
}
