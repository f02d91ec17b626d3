//! Host transport: the narrow interface onto the embedding hypervisor's
//! byte-port mechanism (spec §6).
//!
//! Grounded on `UHYVE_PORT_MIGRATE` in
//! `original_source/kernel/migration.c` and the port declarations in
//! `original_source/include/hermit/migration.h`; the `MEM_USAGE` port is
//! supplemented from `original_source/include/hermit/memory-usage.h`
//! (SPEC_FULL.md §2b). Block-device ports are named for documentation only
//! — the filesystem collaborator they serve is out of scope for this core.

/// Payload sent to the host when a checkpoint completes on the source.
#[derive(Debug, Clone, Copy)]
pub struct MigratePayload {
    pub heap_size: usize,
    pub bss_size: usize,
}

/// Block-device ports consumed by the (out-of-scope) filesystem
/// collaborator. Named here only so the external-interface surface is
/// documented in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPort {
    Info,
    Read,
    Write,
    Stat,
}

/// The narrow interface this core requires from the embedding hypervisor.
/// A real unikernel implements this over `outl`/`UHYVE_PORT_*`; tests
/// implement it with an in-memory recorder.
pub trait HostTransport {
    /// Sends the `MIGRATE` port request. Expected never to return on a real
    /// host, since the VM image is serialised and control does not come
    /// back to this call — the trait still returns `()` so test doubles can
    /// observe the call.
    fn request_migrate(&self, payload: MigratePayload);

    /// Sends the informational `MEM_USAGE` port request.
    fn report_memory_usage(&self, bytes_used: usize);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use alloc::vec::Vec;
    use spin::Mutex;

    /// Records every call made against it; used by coordinator tests to
    /// assert the host was notified with the right sizes.
    #[derive(Default)]
    pub struct RecordingHostTransport {
        pub migrate_calls: Mutex<Vec<MigratePayload>>,
        pub mem_usage_calls: Mutex<Vec<usize>>,
    }

    impl HostTransport for RecordingHostTransport {
        fn request_migrate(&self, payload: MigratePayload) {
            self.migrate_calls.lock().push(payload);
        }

        fn report_memory_usage(&self, bytes_used: usize) {
            self.mem_usage_calls.lock().push(bytes_used);
        }
    }
}
