//! On-demand, memoized issue field retrieval.
//!
//! One cache instance serves one issue for the duration of processing its
//! group. The memoized read is mutex-guarded so near-simultaneous callers
//! trigger at most one fetch; [`IssueFieldCache::reset`] forces a fresh
//! read after a mutation.

use std::sync::Mutex;

use crate::collaborators::TargetCollaborator;
use crate::errors::SyncError;
use crate::models::issue::{IssueLocator, IssueStateSnapshot};

pub struct IssueFieldCache<'a> {
    locator: IssueLocator,
    target: Option<&'a dyn TargetCollaborator>,
    cached: Mutex<Option<Option<IssueStateSnapshot>>>,
}

impl<'a> IssueFieldCache<'a> {
    /// Wrap a locator and an optional retriever. `None` models trackers
    /// that cannot be queried back.
    pub fn new(locator: IssueLocator, target: Option<&'a dyn TargetCollaborator>) -> Self {
        Self {
            locator,
            target,
            cached: Mutex::new(None),
        }
    }

    pub fn locator(&self) -> &IssueLocator {
        &self.locator
    }

    /// Whether a retriever is configured and the tracker supports reads.
    pub fn can_retrieve_fields(&self) -> bool {
        self.target.is_some_and(|t| t.can_retrieve_fields())
    }

    /// Current issue fields, fetched once and memoized.
    ///
    /// `None` when no retriever is configured or the tracker has no issue
    /// for the locator. Fetch errors are returned without being memoized,
    /// so a later call retries.
    pub fn fields(&self) -> Result<Option<IssueStateSnapshot>, SyncError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(snapshot) = cached.as_ref() {
            return Ok(snapshot.clone());
        }

        let fetched = match self.target.filter(|t| t.can_retrieve_fields()) {
            Some(target) => target
                .get_issue_fields(&self.locator)
                .map_err(SyncError::Target)?,
            None => None,
        };
        *cached = Some(fetched.clone());
        Ok(fetched)
    }

    /// Drop the memoized value; the next [`Self::fields`] call re-fetches.
    pub fn reset(&self) {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
