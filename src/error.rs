//! Crate-wide error type (spec §7).
//!
//! Replaces the original's bare `-1`/`-2` return codes with a typed
//! hierarchy, while [`crate::migrate_raw`] still maps back onto that
//! three-way `{0, 1, -1, -2}` contract for ABI-style compatibility.

use core::fmt;

/// Everything that can go wrong during a checkpoint or resume attempt.
#[derive(Debug)]
pub enum MigrateError {
    /// A filesystem operation (open/read/write/lseek/close) failed or
    /// returned fewer bytes than requested. Always fatal.
    Io {
        stream: &'static str,
        detail: &'static str,
    },
    /// A paged area's bounds were not page-aligned.
    Unaligned { vaddr: usize, size: usize },
    /// The heap's recorded start address does not match the address the
    /// target reserved for it.
    HeapAddressMismatch { expected: usize, actual: usize },
    /// `FdTable::translate` found no entry for the given application fd.
    UnknownFd { app_fd: i32 },
    /// `FdTable::add` was called with no free slot remaining.
    FdTableFull,
    /// `FdTable::add` was called with a path longer than the table allows.
    FdPathTooLong,
    /// `StackSlots::get` was called with a thread id beyond the configured
    /// slot count.
    StackSlotsExhausted { tid: u32 },
    /// The heap reallocation on resume failed.
    OutOfMemory,
    /// Resume was attempted without ever having read a valid metadata
    /// record.
    MissingMetadata,
    /// `task_ids` named a thread id with no corresponding stack artifact.
    MissingThreadArtifact { tid: u32 },
    /// The lazy heap-fetch walker's `RemotePageSource` failed to deliver a
    /// missing page.
    RemoteFetch { vaddr: usize },
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateError::Io { stream, detail } => {
                write!(f, "I/O failure on stream '{stream}': {detail}")
            }
            MigrateError::Unaligned { vaddr, size } => {
                write!(f, "area [{vaddr:#x}, {size:#x}) is not page-aligned")
            }
            MigrateError::HeapAddressMismatch { expected, actual } => write!(
                f,
                "heap start mismatch: expected {expected:#x}, target reserved {actual:#x}"
            ),
            MigrateError::UnknownFd { app_fd } => write!(f, "unknown application fd {app_fd}"),
            MigrateError::FdTableFull => write!(f, "fd migration table is full"),
            MigrateError::FdPathTooLong => write!(f, "fd path exceeds migration table capacity"),
            MigrateError::StackSlotsExhausted { tid } => {
                write!(f, "no stack slot available for thread {tid}")
            }
            MigrateError::OutOfMemory => write!(f, "out of memory restoring heap"),
            MigrateError::MissingMetadata => write!(f, "no valid metadata record to resume from"),
            MigrateError::MissingThreadArtifact { tid } => {
                write!(f, "thread {tid} listed in task_ids but missing its stack/tls artifact")
            }
            MigrateError::RemoteFetch { vaddr } => {
                write!(f, "remote page source failed to fetch page at {vaddr:#x}")
            }
        }
    }
}

#[cfg(test)]
impl std::error::Error for MigrateError {}

/// Outcome of a successful `migrate()` call (spec §6): replaces the
/// original's `0`/`1` return values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// The process was checkpointed and has now resumed.
    Resumed,
    /// `should_migrate` was not set; no migration happened.
    NotMigrating,
}

/// The error half of a `migrate()` call, tagged by which side it failed on
/// (spec §6's `-1`/`-2`).
#[derive(Debug)]
pub enum MigrateSideError {
    /// Failed while still running as the source of migration.
    Source(MigrateError),
    /// Failed after control had already transferred to the target.
    Target(MigrateError),
}

impl fmt::Display for MigrateSideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateSideError::Source(e) => write!(f, "migration failed on source: {e}"),
            MigrateSideError::Target(e) => write!(f, "migration failed on target: {e}"),
        }
    }
}

#[cfg(test)]
impl std::error::Error for MigrateSideError {}
