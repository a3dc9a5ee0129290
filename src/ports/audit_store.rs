//! Audit store port: Trait for the append-only prediction log.

use serde::Serialize;

use crate::domain::AuditLogEntry;

/// A page of audit entries with pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    /// Entries in this page, in append order
    pub items: Vec<AuditLogEntry>,
    /// Total count of entries matching the filters
    pub total_count: usize,
    /// Current page offset
    pub offset: usize,
    /// Page size limit
    pub limit: usize,
    /// Whether there are more pages
    pub has_more: bool,
}

impl AuditPage {
    #[must_use]
    pub fn new(items: Vec<AuditLogEntry>, total_count: usize, offset: usize, limit: usize) -> Self {
        // A zero page size can never advance, so it never has more.
        let has_more = limit > 0 && offset + items.len() < total_count;
        Self {
            items,
            total_count,
            offset,
            limit,
            has_more,
        }
    }

    /// Get the next page offset.
    #[must_use]
    pub fn next_offset(&self) -> Option<usize> {
        if self.has_more {
            Some(self.offset + self.limit)
        } else {
            None
        }
    }
}

/// Trait for the audit log.
///
/// Entries are only ever appended; reads never mutate the store.
pub trait AuditStore: Send + Sync {
    /// Error type for audit operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append one entry as a single self-delimited unit.
    ///
    /// Creates the storage location if it does not exist yet.
    ///
    /// # Errors
    /// Returns error if the entry cannot be written.
    fn append(&self, entry: &AuditLogEntry) -> Result<(), Self::Error>;

    /// Entries matching both filters, in append order.
    ///
    /// `date` is `YYYY-MM-DD` and matches the date part of the timestamp
    /// only. Malformed entries are skipped.
    ///
    /// # Errors
    /// Returns error if the log exists but cannot be read.
    fn query(&self, date: Option<&str>, route: Option<&str>) -> Result<Vec<AuditLogEntry>, Self::Error>;

    /// First entry with this request id.
    ///
    /// # Errors
    /// Returns error if the log exists but cannot be read.
    fn get_by_id(&self, request_id: &str) -> Result<Option<AuditLogEntry>, Self::Error>;

    /// Number of well-formed entries.
    ///
    /// # Errors
    /// Returns error if the log exists but cannot be read.
    fn count(&self) -> Result<usize, Self::Error> {
        Ok(self.query(None, None)?.len())
    }

    /// Filtered entries with pagination.
    ///
    /// # Errors
    /// Returns error if the log exists but cannot be read.
    fn query_page(
        &self,
        date: Option<&str>,
        route: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<AuditPage, Self::Error> {
        let all = self.query(date, route)?;
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Ok(AuditPage::new(items, total, offset, limit))
    }
}
