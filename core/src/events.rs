//! Notifications fired after successful writes.

use crate::options::QueryOptions;
use crate::record::{ItemRef, Record};

/// Observer of repository writes. Both hooks default to doing nothing.
///
/// Hooks run synchronously on the calling task, after the server confirmed
/// the write and before the operation returns.
pub trait RepositoryListener: Send + Sync {
    /// A record was created or updated; `item` already holds the server's values.
    fn did_put_item(&self, _item: &dyn Record, _options: &QueryOptions) {}

    /// A record was removed.
    fn did_delete_item(&self, _item: &ItemRef, _options: &QueryOptions) {}
}
