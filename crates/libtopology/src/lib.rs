//! # libtopology
//!
//! Discovery of a Linux machine's CPU topology and cache devices from the
//! kernel's sysfs pseudo-filesystem.
//!
//! A [`Topology`] is built once by scanning sysfs and is immutable afterwards.
//! It models the processor hierarchy as a tree of entities at five levels
//! (system, NUMA node, package, core, hardware thread), coalescing the units
//! the kernel reports per-CPU but that are physically shared, and aggregates
//! cache descriptors that are visible from several CPUs into a single device
//! each.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use libtopology::{Level, Topology};
//!
//! let topo = Topology::new()?;
//!
//! let threads = topo.count_at_level(topo.system(), Level::Thread);
//! let cores = topo.count_at_level(topo.system(), Level::Core);
//! println!("{threads} hardware threads on {cores} cores");
//!
//! for dev in topo.devices_of_type("cache") {
//!     let level = topo.device_get_attribute(dev, "level").unwrap_or("?");
//!     let size = topo.device_get_attribute(dev, "size").unwrap_or("?");
//!     println!("L{level} cache, {size}");
//! }
//! # Ok::<(), libtopology::Error>(())
//! ```
//!
//! ## Sysfs input
//!
//! | Path (relative to the sysfs root)              | Interpretation |
//! |------------------------------------------------|----------------|
//! | `devices/system/node/node{N}/`                 | NUMA nodes; absent ⇒ one synthetic node |
//! | `devices/system/cpu/cpu{id}/`                  | per-CPU root |
//! | `cpu{id}/online`                               | `"0"` ⇒ skipped; absent ⇒ online |
//! | `cpu{id}/topology/{core,thread}_siblings`      | package/core coalescing signatures |
//! | `cpu{id}/cache/index{k}/…`                     | cache descriptors |
//!
//! ## Environment
//!
//! - `LIBTOPOLOGY_SYSFS_ROOT` overrides the default `/sys` root.
//! - `LIBTOPOLOGY_CPUMASK_OVERRIDE`, if set, permits a sysfs-derived cpumask
//!   width larger than the minimum width the affinity syscall accepts.
//!
//! Both can also be set programmatically through [`TopologyBuilder`], which
//! is the preferred route for embedding and for tests.
//!
//! ## Concurrency
//!
//! Construction is single-threaded and synchronous. After [`Topology::new`]
//! returns, the context is immutable; all queries take `&self` and may be
//! issued from any number of threads without synchronization.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// The affinity-size probe makes one raw libc call.
#![allow(unsafe_code)]

mod builder;
mod cpumask;
mod device;
mod entity;
mod probe;
mod sysfs;
mod topology;

pub use builder::BuildError;
pub use cpumask::{CpuMask, MaskParseError};
pub use device::{Device, DeviceId};
pub use entity::{EntityId, Level, ProcEnt};
pub use probe::ProbeError;
pub use topology::{EntitiesAt, Topology, TopologyBuilder};

/// Result type for topology construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by topology construction.
///
/// Construction is transactional: on error, nothing of the partially built
/// context survives. Query misses are conveyed as `None` returns, never as an
/// `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cpumask width could not be determined or is inconsistent.
    #[error("cpumask probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// A mandatory sysfs read failed during construction.
    #[error("topology build failed: {0}")]
    Build(#[from] BuildError),
}
