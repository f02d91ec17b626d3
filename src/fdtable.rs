//! Shadow file-descriptor table (spec §4.3).
//!
//! Grounded end to end on `original_source/kernel/migration-fd.c`:
//! `MIG_FD_ARRAY_SIZE`/`MAX_FD_PATH_SIZE` constants, the `migration_fd_t`
//! record, `migration_fd_init`, `migrate_chkpt_fds`, `migrate_restore_fds`,
//! `migration_fd_add`, `migration_fd_del`, `get_real_fd`. The original's
//! `spinlock_irqsave_t` is replaced by `spin::Mutex`, the closest real
//! no_std equivalent used across the example pack.

use crate::area::{ChkptStorage, Whence};
use crate::error::MigrateError;
use spin::Mutex;

/// Capacity of the shadow fd table (`MIG_FD_ARRAY_SIZE` in the original).
pub const CAPACITY: usize = 128;
/// Maximum path length a shadow entry can hold (`MAX_FD_PATH_SIZE`).
pub const MAX_PATH: usize = 128;

#[derive(Clone, Copy)]
struct Entry {
    app_fd: i32,
    real_fd: i32,
    offset: u64,
    path: [u8; MAX_PATH],
    path_len: u8,
}

impl Entry {
    const EMPTY: Entry = Entry {
        app_fd: -1,
        real_fd: -1,
        offset: 0,
        path: [0; MAX_PATH],
        path_len: 0,
    };

    fn path_str(&self) -> &str {
        core::str::from_utf8(&self.path[..self.path_len as usize]).unwrap_or("")
    }
}

/// One on-the-wire record in the `fds.bin` stream, matching
/// `migration_fd_t`'s layout.
#[repr(C)]
#[derive(Clone, Copy)]
struct WireEntry {
    app_fd: i32,
    real_fd: i32,
    offset: u64,
    path: [u8; MAX_PATH],
}

impl From<&Entry> for WireEntry {
    fn from(e: &Entry) -> Self {
        WireEntry {
            app_fd: e.app_fd,
            real_fd: e.real_fd,
            offset: e.offset,
            path: e.path,
        }
    }
}

/// The shadow fd table: bounded, IRQ-safe-mutex-protected, one entry per
/// application file descriptor currently tracked for migration.
pub struct FdTable {
    entries: Mutex<[Entry; CAPACITY]>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new([Entry::EMPTY; CAPACITY]),
        }
    }

    /// Registers an application fd opened at `path` (`migration_fd_add`).
    pub fn add(&self, app_fd: i32, path: &str) -> Result<(), MigrateError> {
        if path.len() >= MAX_PATH {
            return Err(MigrateError::FdPathTooLong);
        }
        let mut entries = self.entries.lock();
        for e in entries.iter_mut() {
            if e.app_fd == -1 {
                e.app_fd = app_fd;
                e.real_fd = app_fd;
                e.path = [0; MAX_PATH];
                e.path[..path.len()].copy_from_slice(path.as_bytes());
                e.path_len = path.len() as u8;
                e.offset = 0;
                return Ok(());
            }
        }
        Err(MigrateError::FdTableFull)
    }

    /// Removes a previously registered fd (`migration_fd_del`).
    pub fn remove(&self, app_fd: i32) -> Result<(), MigrateError> {
        let mut entries = self.entries.lock();
        for e in entries.iter_mut() {
            if e.app_fd == app_fd {
                *e = Entry::EMPTY;
                return Ok(());
            }
        }
        Err(MigrateError::UnknownFd { app_fd })
    }

    /// Translates an application fd to its real host fd (`get_real_fd`).
    pub fn translate(&self, app_fd: i32) -> Result<i32, MigrateError> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| e.app_fd == app_fd)
            .map(|e| e.real_fd)
            .ok_or(MigrateError::UnknownFd { app_fd })
    }

    /// Serialises the table to `name`, skipping empty slots and the entry
    /// whose `real_fd` is currently the stream being written (the original's
    /// "filter out the fd corresponding to the file we are currently
    /// writing" comment in `migrate_chkpt_fds`).
    pub fn serialise<S: ChkptStorage>(
        &self,
        storage: &S,
        name: &str,
        writing_fd: i32,
        current_offset: impl Fn(i32) -> Result<u64, MigrateError>,
    ) -> Result<(), MigrateError> {
        let handle = storage.open_write(name)?;
        let mut entries = self.entries.lock();
        for e in entries.iter_mut() {
            if e.app_fd == -1 || e.real_fd == writing_fd {
                continue;
            }
            e.offset = current_offset(e.app_fd)?;
            let wire = WireEntry::from(&*e);
            let bytes = unsafe {
                core::slice::from_raw_parts(
                    &wire as *const WireEntry as *const u8,
                    core::mem::size_of::<WireEntry>(),
                )
            };
            let written = storage.write(handle, bytes)?;
            if written != bytes.len() {
                storage.close(handle)?;
                log::error!("fd table: short write serialising fd {}", e.app_fd);
                return Err(MigrateError::Io {
                    stream: "fds",
                    detail: "short write",
                });
            }
            log::debug!("fd table: saved fd {} ({}), offset {:#x}", e.app_fd, e.path_str(), e.offset);
        }
        storage.close(handle)
    }

    /// Restores the table from `name`: reopens each path and rebinds the
    /// app fd to point at the freshly opened real fd, then seeks it to the
    /// saved offset (`migrate_restore_fds`).
    pub fn deserialise<S: ChkptStorage>(
        &self,
        storage: &S,
        name: &str,
        reopen: impl Fn(&str) -> Result<i32, MigrateError>,
        seek: impl Fn(i32, u64) -> Result<(), MigrateError>,
    ) -> Result<(), MigrateError> {
        let handle = storage.open_read(name)?;
        let entry_size = core::mem::size_of::<WireEntry>();
        let mut entries = self.entries.lock();
        loop {
            let mut buf = alloc::vec![0u8; entry_size];
            let read = storage.read(handle, &mut buf)?;
            if read == 0 {
                break;
            }
            if read != entry_size {
                storage.close(handle)?;
                return Err(MigrateError::Io {
                    stream: "fds",
                    detail: "short read",
                });
            }
            let wire: WireEntry = unsafe { core::ptr::read(buf.as_ptr() as *const WireEntry) };
            let path_len = wire.path.iter().position(|&b| b == 0).unwrap_or(MAX_PATH);
            let path = core::str::from_utf8(&wire.path[..path_len]).unwrap_or("");

            let real_fd = reopen(path)?;

            let slot = entries
                .iter_mut()
                .find(|e| e.app_fd == -1)
                .ok_or(MigrateError::FdTableFull)?;
            slot.app_fd = wire.app_fd;
            slot.real_fd = real_fd;
            slot.offset = wire.offset;
            slot.path = wire.path;
            slot.path_len = path_len as u8;

            seek(wire.app_fd, wire.offset)?;
            log::debug!("fd table: restored fd {} ({path}), offset {:#x}", wire.app_fd, wire.offset);
        }
        storage.close(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::test_support::MemStorage;
    use core::cell::RefCell;

    #[test]
    fn add_translate_remove() {
        let table = FdTable::new();
        table.add(3, "/data/input.bin").unwrap();
        assert_eq!(table.translate(3).unwrap(), 3);
        table.remove(3).unwrap();
        assert!(matches!(table.translate(3), Err(MigrateError::UnknownFd { app_fd: 3 })));
    }

    #[test]
    fn table_full_rejects_further_adds() {
        let table = FdTable::new();
        for i in 0..CAPACITY as i32 {
            table.add(i, "/x").unwrap();
        }
        assert!(matches!(table.add(999, "/y"), Err(MigrateError::FdTableFull)));
    }

    #[test]
    fn path_too_long_is_rejected() {
        let table = FdTable::new();
        let long_path = "a".repeat(MAX_PATH);
        assert!(matches!(table.add(1, &long_path), Err(MigrateError::FdPathTooLong)));
    }

    #[test]
    fn serialise_skips_the_stream_being_written() {
        let table = FdTable::new();
        table.add(5, "/a").unwrap();
        table.add(6, "/b").unwrap();
        let storage = MemStorage::default();
        let offsets = RefCell::new(alloc::collections::BTreeMap::new());
        offsets.borrow_mut().insert(5, 10u64);
        offsets.borrow_mut().insert(6, 20u64);

        table
            .serialise(&storage, "fds.bin", 6, |fd| Ok(*offsets.borrow().get(&fd).unwrap()))
            .unwrap();

        let restore_table = FdTable::new();
        restore_table
            .deserialise(
                &storage,
                "fds.bin",
                |_path| Ok(42),
                |_fd, _off| Ok(()),
            )
            .unwrap();
        assert_eq!(restore_table.translate(5).unwrap(), 42);
        assert!(matches!(restore_table.translate(6), Err(MigrateError::UnknownFd { app_fd: 6 })));
    }

    #[test]
    fn deserialise_reseeks_to_saved_offset() {
        let table = FdTable::new();
        table.add(7, "/c").unwrap();
        let storage = MemStorage::default();
        table.serialise(&storage, "fds.bin", -1, |_| Ok(99)).unwrap();

        let seen_seeks = RefCell::new(alloc::vec::Vec::new());
        let restore_table = FdTable::new();
        restore_table
            .deserialise(
                &storage,
                "fds.bin",
                |_path| Ok(77),
                |fd, off| {
                    seen_seeks.borrow_mut().push((fd, off));
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(seen_seeks.into_inner(), alloc::vec![(7, 99)]);
    }
}
