use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Tracks users with a contribution in flight.
///
/// A second submission from the same user is refused until the permit of the
/// first one is dropped.
#[derive(Clone, Default)]
pub struct SubmissionGuard {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SubmissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, user_id: &str) -> Option<SubmissionPermit> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !inner.insert(user_id.to_string()) {
            return None;
        }

        Some(SubmissionPermit {
            inner: self.inner.clone(),
            user_id: user_id.to_string(),
        })
    }

    pub fn in_flight(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Releases the user's slot on drop, including when the request is abandoned.
pub struct SubmissionPermit {
    inner: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl Drop for SubmissionPermit {
    fn drop(&mut self) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.remove(&self.user_id);
    }
}
