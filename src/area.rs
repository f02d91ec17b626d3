//! Contiguous and page-wise memory-area serialisation (spec §4.2).
//!
//! Grounded on `migrate_chkpt_area`, `migrate_restore_area`,
//! `migrate_chkpt_area_not_contiguous` and
//! `migrate_restore_area_not_contiguous` in
//! `original_source/kernel/migration.c` /
//! `original_source/kernel/migration-chkpt.c`. The original's raw
//! `sys_open`/`sys_read`/`sys_write`/`sys_lseek`/`sys_close` calls are
//! replaced by the [`ChkptStorage`] trait so the filesystem — an explicit
//! external collaborator (spec §6) — can be swapped for a test double.

use crate::error::MigrateError;

/// Page size assumed by the paged codec paths. 4 KiB on both supported
/// ISAs at the base page-table level.
pub const PAGE_SIZE: usize = 4096;

/// Seek origin, mirroring `SEEK_SET`/`SEEK_CUR`/`SEEK_END` in
/// `original_source/kernel/migration-fd.c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

/// The narrow filesystem interface this core requires (spec §6).
pub trait ChkptStorage {
    type Handle: Copy;

    fn open_write(&self, name: &str) -> Result<Self::Handle, MigrateError>;
    fn open_read(&self, name: &str) -> Result<Self::Handle, MigrateError>;
    fn write(&self, handle: Self::Handle, buf: &[u8]) -> Result<usize, MigrateError>;
    fn read(&self, handle: Self::Handle, buf: &mut [u8]) -> Result<usize, MigrateError>;
    fn lseek(&self, handle: Self::Handle, offset: i64, whence: Whence) -> Result<u64, MigrateError>;
    fn close(&self, handle: Self::Handle) -> Result<(), MigrateError>;
}

/// A page-mapper collaborator (out of scope, spec §9): touches an address
/// to force it resident, and reports whether it already is.
pub trait PageMapper {
    /// Returns true if `vaddr`'s page is currently backed by a physical
    /// frame.
    fn is_resident(&self, vaddr: usize) -> bool;

    /// Touches `vaddr`'s page, forcing it to be mapped if it was demand
    /// paged. Grounded on `j = *((char*)i)` in `periodic_page_access`.
    fn touch(&self, vaddr: usize);
}

fn page_aligned(vaddr: usize, size: usize) -> bool {
    vaddr % PAGE_SIZE == 0 && size % PAGE_SIZE == 0
}

/// Persists and restores memory regions to/from named streams.
pub struct AreaCodec;

impl AreaCodec {
    /// Persists `data` verbatim to `name`. Short writes are fatal.
    pub fn save_contiguous<S: ChkptStorage>(
        storage: &S,
        name: &str,
        data: &[u8],
    ) -> Result<(), MigrateError> {
        let handle = storage.open_write(name)?;
        let written = storage.write(handle, data)?;
        storage.close(handle)?;
        if written != data.len() {
            log::error!("area codec: short write to '{name}' ({written}/{})", data.len());
            return Err(MigrateError::Io {
                stream: "area",
                detail: "short write",
            });
        }
        Ok(())
    }

    /// Reads exactly `out.len()` bytes from `name` into `out`. Short reads
    /// are fatal.
    pub fn restore_contiguous<S: ChkptStorage>(
        storage: &S,
        name: &str,
        out: &mut [u8],
    ) -> Result<(), MigrateError> {
        let handle = storage.open_read(name)?;
        let read = storage.read(handle, out)?;
        storage.close(handle)?;
        if read != out.len() {
            log::error!("area codec: short read from '{name}' ({read}/{})", out.len());
            return Err(MigrateError::Io {
                stream: "area",
                detail: "short read",
            });
        }
        Ok(())
    }

    /// Persists `[vaddr, vaddr+size)` page by page. When `demand` is set,
    /// each page is touched via `mapper` before being read, so demand-paged
    /// memory materialises first (the `mapped_on_demand` parameter in
    /// `migrate_chkpt_area_not_contiguous`).
    pub fn save_paged<S: ChkptStorage, M: PageMapper>(
        storage: &S,
        mapper: &M,
        name: &str,
        vaddr: usize,
        size: usize,
        demand: bool,
        read_page: impl Fn(usize, &mut [u8; PAGE_SIZE]),
    ) -> Result<(), MigrateError> {
        if !page_aligned(vaddr, size) {
            return Err(MigrateError::Unaligned { vaddr, size });
        }
        let handle = storage.open_write(name)?;
        let mut page = [0u8; PAGE_SIZE];
        let mut offset = 0usize;
        while offset < size {
            let addr = vaddr + offset;
            if demand && !mapper.is_resident(addr) {
                mapper.touch(addr);
            }
            read_page(addr, &mut page);
            let written = storage.write(handle, &page)?;
            if written != PAGE_SIZE {
                storage.close(handle)?;
                log::error!("area codec: short paged write to '{name}' at offset {offset:#x}");
                return Err(MigrateError::Io {
                    stream: "area",
                    detail: "short paged write",
                });
            }
            offset += PAGE_SIZE;
        }
        storage.close(handle)?;
        Ok(())
    }

    /// Restores `[vaddr, vaddr+size)` page by page from `name`.
    pub fn restore_paged<S: ChkptStorage>(
        storage: &S,
        name: &str,
        vaddr: usize,
        size: usize,
        mut write_page: impl FnMut(usize, &[u8; PAGE_SIZE]),
    ) -> Result<(), MigrateError> {
        if !page_aligned(vaddr, size) {
            return Err(MigrateError::Unaligned { vaddr, size });
        }
        let handle = storage.open_read(name)?;
        let mut page = [0u8; PAGE_SIZE];
        let mut offset = 0usize;
        while offset < size {
            let read = storage.read(handle, &mut page)?;
            if read != PAGE_SIZE {
                storage.close(handle)?;
                log::error!("area codec: short paged read from '{name}' at offset {offset:#x}");
                return Err(MigrateError::Io {
                    stream: "area",
                    detail: "short paged read",
                });
            }
            write_page(vaddr + offset, &page);
            offset += PAGE_SIZE;
        }
        storage.close(handle)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{AlwaysResident, MemStorage};
    use super::*;

    #[test]
    fn contiguous_round_trip() {
        let storage = MemStorage::default();
        let data = b"hello migration".to_vec();
        AreaCodec::save_contiguous(&storage, "bss", &data).unwrap();
        let mut out = alloc::vec![0u8; data.len()];
        AreaCodec::restore_contiguous(&storage, "bss", &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn paged_round_trip_two_pages() {
        let storage = MemStorage::default();
        let mapper = AlwaysResident;
        let vaddr = 0x1000;
        let size = PAGE_SIZE * 2;
        let source = alloc::vec![0xABu8; size];
        AreaCodec::save_paged(&storage, &mapper, "heap", vaddr, size, true, |addr, page| {
            let off = addr - vaddr;
            page.copy_from_slice(&source[off..off + PAGE_SIZE]);
        })
        .unwrap();

        let mut restored = alloc::vec![0u8; size];
        AreaCodec::restore_paged(&storage, "heap", vaddr, size, |addr, page| {
            let off = addr - vaddr;
            restored[off..off + PAGE_SIZE].copy_from_slice(page);
        })
        .unwrap();
        assert_eq!(restored, source);
    }

    #[test]
    fn paged_zero_size_writes_nothing_and_succeeds() {
        let storage = MemStorage::default();
        let mapper = AlwaysResident;
        AreaCodec::save_paged(&storage, &mapper, "empty", 0x2000, 0, false, |_, _| {
            panic!("should never be called for a zero-sized area")
        })
        .unwrap();
        assert_eq!(storage.contents("empty"), Some(alloc::vec![]));
    }

    #[test]
    fn unaligned_area_is_rejected() {
        let storage = MemStorage::default();
        let mapper = AlwaysResident;
        let err = AreaCodec::save_paged(&storage, &mapper, "x", 0x1001, PAGE_SIZE, false, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, MigrateError::Unaligned { .. }));
    }
}
