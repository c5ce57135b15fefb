//! Cpumask width probing.
//!
//! The width used for every mask in a context is the minimum size accepted
//! by the affinity syscall, bounded below by the highest CPU index visible
//! in sysfs. When sysfs knows more CPUs than the syscall will address, the
//! mismatch is an error unless the caller (or the
//! `LIBTOPOLOGY_CPUMASK_OVERRIDE` environment variable) opts into the wider
//! sysfs-derived mask — masks that wide cannot be fed back into
//! `sched_setaffinity`, so the override is intended for test environments
//! with a fake sysfs root.

use std::io;

use crate::sysfs::{Sysfs, CPU_DIR};

/// Environment variable permitting a sysfs-derived width above the affinity
/// syscall minimum.
pub(crate) const OVERRIDE_ENV: &str = "LIBTOPOLOGY_CPUMASK_OVERRIDE";

/// Errors from cpumask width probing.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The affinity syscall failed with something other than an undersized
    /// mask indication.
    #[error("sched_getaffinity probe failed: {0}")]
    Affinity(#[source] io::Error),

    /// Sysfs exposes more CPUs than the affinity syscall will address.
    #[error(
        "sysfs reports CPUs beyond the affinity mask ({sysfs} bytes needed, \
         {sched} accepted); set LIBTOPOLOGY_CPUMASK_OVERRIDE to proceed"
    )]
    WidthExceeded {
        /// Byte width required by the highest sysfs CPU index.
        sysfs: usize,
        /// Minimum byte width the syscall accepts.
        sched: usize,
    },
}

/// Round a CPU count up to a mask byte width.
///
/// Same unsigned-long granularity as glibc's `CPU_ALLOC_SIZE`.
pub(crate) fn width_for_cpus(count: usize) -> usize {
    count.div_ceil(64) * 8
}

/// Minimum mask width accepted by `sched_getaffinity`, found by doubling
/// from the smallest width until the kernel stops rejecting the size.
#[cfg(target_os = "linux")]
fn sched_width() -> Result<usize, ProbeError> {
    let mut size = width_for_cpus(1);
    loop {
        let mut buf = vec![0u8; size];
        // SAFETY: buf is a live allocation of `size` bytes and the kernel
        // writes at most `size` bytes of affinity mask into it.
        let rc = unsafe {
            libc::sched_getaffinity(0, size, buf.as_mut_ptr().cast::<libc::cpu_set_t>())
        };
        if rc == 0 {
            return Ok(size);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINVAL) {
            return Err(ProbeError::Affinity(err));
        }
        size *= 2;
    }
}

/// Without dynamically sized affinity masks, size for the visible CPUs.
#[cfg(not(target_os = "linux"))]
fn sched_width() -> Result<usize, ProbeError> {
    Ok(width_for_cpus(num_cpus::get().max(1)))
}

/// Width implied by the highest `cpu{N}` index in sysfs, or zero when the
/// CPU directory cannot be enumerated (the build reports that failure with
/// more context than the probe could).
fn sysfs_width(sysfs: &Sysfs) -> usize {
    match sysfs.list_indexed(CPU_DIR, "cpu") {
        Ok(cpus) => {
            let max = cpus.iter().max().copied().unwrap_or(0);
            width_for_cpus(max as usize + 1)
        }
        Err(_) => 0,
    }
}

/// Determine the cpumask byte width for a context.
pub(crate) fn probe_cpumask_size(sysfs: &Sysfs, allow_override: bool) -> Result<usize, ProbeError> {
    let sched = sched_width()?;
    let sys = sysfs_width(sysfs);

    if sys <= sched {
        return Ok(sched);
    }
    if allow_override {
        return Ok(sys);
    }
    Err(ProbeError::WidthExceeded { sysfs: sys, sched })
}
