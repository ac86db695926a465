//! Cursor scans and guarded bulk deletion
//!
//! Deletion runs in this order and never skips a step:
//!
//! 1. [`DeletePlan::new`] rejects empty and full-wildcard patterns
//! 2. [`confirm_deletion`] requires the literal `DELETE` on the input
//! 3. only then is the endpoint connected
//! 4. [`BatchMutator::delete_matching`] scans and deletes in pipelined batches
//!
//! Batches that were already flushed stay deleted if a later one fails.

use crate::error::{ConfigError, LiveResult, MutationError, ScopeError};
use crate::live::endpoint::{KeySpace, ScanCursor};
use console::style;
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

/// Literal the operator must type to proceed
pub const CONFIRMATION_TOKEN: &str = "DELETE";

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const MAX_BATCH_SIZE: usize = 100_000;

/// SCAN COUNT hint while deleting
pub const DELETE_PAGE_HINT: usize = 100;

/// SCAN COUNT hint for the scan command
pub const SCAN_PAGE_HINT: usize = 10;

/// A validated delete request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePlan {
    pattern: String,
    batch_size: usize,
    page_hint: usize,
}

impl DeletePlan {
    /// Validate pattern and batch size; runs before any connection attempt
    pub fn new(pattern: &str, batch_size: usize) -> Result<Self, ConfigError> {
        // Empty, blank and all-star patterns match every key
        if pattern.trim().chars().all(|c| c == '*') {
            return Err(ConfigError::UnsafeDeletePattern {
                pattern: pattern.to_string(),
            });
        }
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(ConfigError::InvalidBatchSize {
                size: batch_size,
                min: 1,
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(Self {
            pattern: pattern.to_string(),
            batch_size,
            page_hint: DELETE_PAGE_HINT,
        })
    }

    pub fn with_page_hint(mut self, page_hint: usize) -> Self {
        self.page_hint = page_hint.max(1);
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn page_hint(&self) -> usize {
        self.page_hint
    }
}

/// Ask for the confirmation token; anything else, EOF or an I/O error aborts
pub fn confirm_deletion<R: BufRead, W: Write>(
    plan: &DeletePlan,
    target: &str,
    mut input: R,
    mut out: W,
) -> bool {
    let prompt = writeln!(
        out,
        "{} bulk deletion against {}\n  pattern:    {}\n  batch size: {}\n\
         Type {} to continue; any other input cancels.",
        style("Warning:").yellow().bold(),
        style(target).cyan(),
        style(plan.pattern()).bold(),
        plan.batch_size(),
        style(CONFIRMATION_TOKEN).red().bold(),
    )
    .and_then(|_| write!(out, "> "))
    .and_then(|_| out.flush());
    if let Err(e) = prompt {
        warn!(error = %e, "Could not write confirmation prompt, aborting");
        return false;
    }

    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) => {
            debug!("No confirmation input, aborting");
            false
        }
        Ok(_) => line.trim() == CONFIRMATION_TOKEN,
        Err(e) => {
            warn!(error = %e, "Could not read confirmation, aborting");
            false
        }
    }
}

/// Counters of a finished scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub pages: u64,
    pub keys: u64,
    /// True if the limit stopped the scan before the cursor was exhausted
    pub truncated: bool,
}

/// Result of one delete flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub batch: u64,
    pub keys: usize,
    pub deleted: u64,
    pub total_deleted: u64,
}

/// Final delete counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub total_scanned: u64,
    pub total_deleted: u64,
    pub batches_issued: u64,
}

/// Result of a guarded delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Confirmation was not given; nothing was scanned or deleted
    Aborted,
    Completed(DeleteSummary),
}

/// Scans and deletes against one endpoint, one call at a time
pub struct BatchMutator<'a, E: KeySpace + ?Sized> {
    endpoint: &'a mut E,
}

impl<'a, E: KeySpace + ?Sized> BatchMutator<'a, E> {
    pub fn new(endpoint: &'a mut E) -> Self {
        Self { endpoint }
    }

    /// Visit every key matching `pattern`, stopping after `limit` keys if set
    pub fn scan<F>(
        &mut self,
        pattern: &str,
        page_hint: usize,
        limit: Option<usize>,
        mut on_key: F,
    ) -> LiveResult<ScanSummary>
    where
        F: FnMut(&str),
    {
        let mut summary = ScanSummary::default();
        let mut cursor = ScanCursor::start();
        loop {
            let page = self.endpoint.scan(cursor, pattern, page_hint)?;
            summary.pages += 1;

            let mut keys = page.keys.as_slice();
            let mut capped = false;
            if let Some(limit) = limit {
                let remaining = limit.saturating_sub(summary.keys as usize);
                if keys.len() >= remaining {
                    keys = &keys[..remaining];
                    capped = true;
                }
            }
            for key in keys {
                on_key(key);
            }
            summary.keys += keys.len() as u64;

            match page.next {
                Some(_) if capped => {
                    summary.truncated = true;
                    break;
                }
                Some(next) => cursor = next,
                None => break,
            }
        }
        debug!(
            endpoint = %self.endpoint.name(),
            pages = summary.pages,
            keys = summary.keys,
            "Scan finished"
        );
        Ok(summary)
    }

    /// Collect matching keys, up to `limit`
    pub fn scan_keys(
        &mut self,
        pattern: &str,
        page_hint: usize,
        limit: Option<usize>,
    ) -> LiveResult<Vec<String>> {
        let mut keys = Vec::new();
        self.scan(pattern, page_hint, limit, |k| keys.push(k.to_string()))?;
        Ok(keys)
    }

    /// Scan for the plan's pattern and delete in batches
    ///
    /// A page is kept whole in one batch when it fits; the pending buffer is
    /// flushed first when adding the page would overflow the batch size.
    /// No batch ever holds more than `batch_size` keys.
    pub fn delete_matching<F>(
        &mut self,
        plan: &DeletePlan,
        mut on_batch: F,
    ) -> Result<DeleteSummary, ScopeError>
    where
        F: FnMut(&BatchReport),
    {
        let mut summary = DeleteSummary::default();
        let mut pending: Vec<String> = Vec::with_capacity(plan.batch_size());
        let mut cursor = ScanCursor::start();

        loop {
            let page = self.endpoint.scan(cursor, plan.pattern(), plan.page_hint())?;
            summary.total_scanned += page.keys.len() as u64;

            if !pending.is_empty() && pending.len() + page.keys.len() > plan.batch_size() {
                self.flush(&mut pending, &mut summary, &mut on_batch)?;
            }
            pending.extend(page.keys);
            while pending.len() >= plan.batch_size() {
                let rest = pending.split_off(plan.batch_size());
                self.flush(&mut pending, &mut summary, &mut on_batch)?;
                pending = rest;
            }

            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        if !pending.is_empty() {
            self.flush(&mut pending, &mut summary, &mut on_batch)?;
        }

        info!(
            endpoint = %self.endpoint.name(),
            pattern = plan.pattern(),
            scanned = summary.total_scanned,
            deleted = summary.total_deleted,
            batches = summary.batches_issued,
            "Delete finished"
        );
        Ok(summary)
    }

    fn flush<F>(
        &mut self,
        pending: &mut Vec<String>,
        summary: &mut DeleteSummary,
        on_batch: &mut F,
    ) -> Result<(), MutationError>
    where
        F: FnMut(&BatchReport),
    {
        let batch = summary.batches_issued + 1;
        let keys = pending.len();
        let counts = self
            .endpoint
            .delete(pending)
            .map_err(|e| MutationError::BatchFailed {
                addr: self.endpoint.name(),
                batch,
                keys,
                reason: e.to_string(),
            })?;
        if counts.len() != keys {
            return Err(MutationError::ReplyMismatch {
                addr: self.endpoint.name(),
                batch,
                expected: keys,
                got: counts.len(),
            });
        }

        // Keys already gone count as zero
        let deleted: u64 = counts.iter().sum();
        summary.batches_issued = batch;
        summary.total_deleted += deleted;
        pending.clear();

        debug!(batch, keys, deleted, "Batch flushed");
        on_batch(&BatchReport {
            batch,
            keys,
            deleted,
            total_deleted: summary.total_deleted,
        });
        Ok(())
    }
}

/// Confirm, connect, then delete
///
/// `connect` is only called after the operator typed the confirmation token,
/// so an aborted run never touches the deployment.
pub fn guarded_delete<E, R, W, C, F>(
    plan: &DeletePlan,
    target: &str,
    input: R,
    out: W,
    connect: C,
    on_batch: F,
) -> Result<DeleteOutcome, ScopeError>
where
    E: KeySpace,
    R: BufRead,
    W: Write,
    C: FnOnce() -> Result<E, ScopeError>,
    F: FnMut(&BatchReport),
{
    if !confirm_deletion(plan, target, input, out) {
        info!(pattern = plan.pattern(), "Deletion cancelled");
        return Ok(DeleteOutcome::Aborted);
    }
    let mut endpoint = connect()?;
    let summary = BatchMutator::new(&mut endpoint).delete_matching(plan, on_batch)?;
    Ok(DeleteOutcome::Completed(summary))
}
