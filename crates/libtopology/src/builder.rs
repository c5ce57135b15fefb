//! Construction of the entity graph and device list from sysfs.
//!
//! The walk runs node by node, CPU by CPU. Packages and cores are coalesced
//! by their kernel sibling-mask strings: every CPU reports the mask of its
//! package and core siblings, and two CPUs with the same string at a given
//! level belong to the same physical unit. Cache discovery is best-effort;
//! an unreadable or malformed cache descriptor is dropped without failing
//! the build.

use std::io;
use std::path::PathBuf;

use fxhash::{FxBuildHasher, FxHashMap};
use tracing::{debug, trace, warn};

use crate::cpumask::{CpuMask, MaskParseError};
use crate::device::{Device, DeviceId};
use crate::entity::{EntityId, Level, ProcEnt};
use crate::sysfs::{Sysfs, CPU_DIR, NODE_DIR};

/// Errors that abort topology construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The CPU source directory could not be enumerated.
    #[error("cannot enumerate CPUs under {}: {source}", path.display())]
    CpuScan {
        /// Directory that failed to enumerate.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A NUMA node directory could not be enumerated.
    #[error("cannot enumerate NUMA node {node}: {source}")]
    NodeScan {
        /// The node id.
        node: u32,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A per-CPU topology attribute was unreadable (for a reason other than
    /// absence, which has a defined fallback).
    #[error("cannot read {}: {source}", path.display())]
    Attr {
        /// Path of the unreadable attribute.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Reasons a single cache descriptor is dropped. Never escapes the builder;
/// the build discards the instance and moves on.
#[derive(Debug, thiserror::Error)]
enum CacheSkip {
    #[error("missing attribute {0}")]
    MissingAttr(&'static str),

    #[error("unparsable shared_cpu_map: {0}")]
    BadMask(#[from] MaskParseError),

    #[error("shared_cpu_map does not contain the owning cpu")]
    ForeignMask,
}

/// Output of a successful build, moved into the context.
pub(crate) struct Built {
    pub(crate) entities: Vec<ProcEnt>,
    pub(crate) system: EntityId,
    pub(crate) devices: Vec<Device>,
}

/// Single-use graph builder. The signature tables live only as long as the
/// builder; they are gone once `build` returns, successfully or not.
pub(crate) struct Builder<'a> {
    sysfs: &'a Sysfs,
    mask_bytes: usize,
    entities: Vec<ProcEnt>,
    devices: Vec<Device>,
    packages: FxHashMap<String, EntityId>,
    cores: FxHashMap<(EntityId, String), EntityId>,
    caches: FxHashMap<String, DeviceId>,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(sysfs: &'a Sysfs, mask_bytes: usize) -> Self {
        Self {
            sysfs,
            mask_bytes,
            entities: Vec::new(),
            devices: Vec::new(),
            packages: FxHashMap::with_capacity_and_hasher(
                mask_bytes * 8,
                FxBuildHasher::default(),
            ),
            cores: FxHashMap::with_capacity_and_hasher(mask_bytes * 8, FxBuildHasher::default()),
            caches: FxHashMap::default(),
        }
    }

    pub(crate) fn build(mut self) -> Result<Built, BuildError> {
        let system = self.new_entity(Level::System, 0, None);

        match self.sysfs.list_indexed(NODE_DIR, "node") {
            Ok(nodes) => {
                for nid in nodes {
                    self.build_node(system, nid)?;
                }
            }
            Err(_) => {
                // Non-NUMA system: treat as a single node fed from the flat
                // CPU directory.
                self.build_node(system, 0)?;
            }
        }

        debug!(
            "built topology: {} entities, {} devices",
            self.entities.len(),
            self.devices.len()
        );

        Ok(Built {
            entities: self.entities,
            system,
            devices: self.devices,
        })
    }

    fn new_entity(&mut self, level: Level, cpu_id: u32, parent: Option<EntityId>) -> EntityId {
        debug_assert_eq!(parent.map(|p| self.entities[p.0].level()), level.parent());

        let id = EntityId(self.entities.len());
        self.entities
            .push(ProcEnt::new(level, cpu_id, parent, self.mask_bytes));

        if let Some(p) = parent {
            let prev_last = self.entities[p.0].children().last().copied();
            self.entities[p.0].add_child(id);
            if let Some(last) = prev_last {
                self.entities[last.0].set_sibling(id);
            }
        }

        id
    }

    fn build_node(&mut self, system: EntityId, nid: u32) -> Result<(), BuildError> {
        let node = self.new_entity(Level::Node, nid, Some(system));

        let node_dir = format!("{NODE_DIR}/node{nid}");
        let cpus = match self.sysfs.list_indexed(&node_dir, "cpu") {
            Ok(cpus) => cpus,
            Err(source) if nid == 0 => {
                // Synthetic node 0: the machine has no node directory, so
                // the flat CPU hierarchy is the source.
                trace!("no {node_dir}, using {CPU_DIR}: {source}");
                self.sysfs
                    .list_indexed(CPU_DIR, "cpu")
                    .map_err(|source| BuildError::CpuScan {
                        path: self.sysfs.path(CPU_DIR),
                        source,
                    })?
            }
            Err(source) => return Err(BuildError::NodeScan { node: nid, source }),
        };

        for cpu in cpus {
            if !self.cpu_online(cpu) {
                debug!("cpu{cpu} is offline, skipping");
                continue;
            }
            self.build_cpu(node, cpu)?;
        }

        Ok(())
    }

    /// Whether the CPU is online. Absent or unreadable `online` files mean
    /// online (the boot CPU on x86, or kernels without hotplug).
    fn cpu_online(&self, cpu: u32) -> bool {
        match self.sysfs.read_attr(format!("{CPU_DIR}/cpu{cpu}/online")) {
            Ok(text) => !matches!(text.trim().parse::<i32>(), Ok(0)),
            Err(_) => true,
        }
    }

    fn build_cpu(&mut self, node: EntityId, cpu: u32) -> Result<(), BuildError> {
        let pkg_sig = self.core_siblings(cpu)?;
        let pkg = match self.packages.get(&pkg_sig).copied() {
            Some(pkg) => pkg,
            None => {
                let pkg = self.new_entity(Level::Package, cpu, Some(node));
                debug!("cpu{cpu}: new package (signature {pkg_sig:?})");
                self.entities[pkg.0].set_signature(pkg_sig.clone());
                self.packages.insert(pkg_sig, pkg);
                pkg
            }
        };

        let core_sig = self.thread_siblings(cpu)?;
        let core_key = (pkg, core_sig);
        let core = match self.cores.get(&core_key).copied() {
            Some(core) => core,
            None => {
                let core = self.new_entity(Level::Core, cpu, Some(pkg));
                debug!("cpu{cpu}: new core (signature {:?})", core_key.1);
                self.entities[core.0].set_signature(core_key.1.clone());
                self.cores.insert(core_key, core);
                core
            }
        };

        let thread = self.new_entity(Level::Thread, cpu, Some(core));
        self.set_bit_upward(thread, cpu);

        // Cache information is nice to have, never required.
        self.discover_caches(cpu);

        Ok(())
    }

    /// The core-coalescing signature: the raw `thread_siblings` string, or
    /// the decimal CPU id when the kernel does not export the file
    /// (single-thread core).
    fn thread_siblings(&self, cpu: u32) -> Result<String, BuildError> {
        match self.topology_attr(cpu, "thread_siblings")? {
            Some(siblings) => Ok(siblings),
            None => Ok(cpu.to_string()),
        }
    }

    /// The package-coalescing signature: the raw `core_siblings` string.
    /// Thread siblings are a subset of core siblings, so an absent file
    /// falls back to the thread signature (one core per package).
    fn core_siblings(&self, cpu: u32) -> Result<String, BuildError> {
        match self.topology_attr(cpu, "core_siblings")? {
            Some(siblings) => Ok(siblings),
            None => self.thread_siblings(cpu),
        }
    }

    fn topology_attr(&self, cpu: u32, name: &str) -> Result<Option<String>, BuildError> {
        let rel = format!("{CPU_DIR}/cpu{cpu}/topology/{name}");
        self.sysfs
            .read_attr_opt(&rel)
            .map_err(|source| BuildError::Attr {
                path: self.sysfs.path(&rel),
                source,
            })
    }

    /// Set the thread's bit on itself and on every ancestor up to the
    /// system entity.
    fn set_bit_upward(&mut self, thread: EntityId, cpu: u32) {
        let mut cur = Some(thread);
        while let Some(id) = cur {
            let ent = &mut self.entities[id.0];
            ent.cpumask_mut().set(cpu as usize);
            cur = ent.parent();
        }
    }

    /// Register the caches visible from one CPU, deduplicating instances
    /// already seen from a sibling. Failures drop the one descriptor and
    /// never the build.
    fn discover_caches(&mut self, cpu: u32) {
        let cache_dir = format!("{CPU_DIR}/cpu{cpu}/cache");
        let Ok(indices) = self.sysfs.list_indexed(&cache_dir, "index") else {
            return;
        };

        for index in indices {
            match self.read_cache(cpu, index) {
                Ok(dev) => {
                    if self.caches.contains_key(dev.signature()) {
                        trace!("cpu{cpu} index{index}: cache already registered");
                        continue;
                    }
                    let id = DeviceId(self.devices.len());
                    self.caches.insert(dev.signature().to_string(), id);
                    debug!("cpu{cpu} index{index}: cache {}", dev.signature());
                    self.devices.push(dev);
                }
                Err(skip) => {
                    warn!("cpu{cpu} index{index}: dropping cache descriptor: {skip}");
                }
            }
        }
    }

    /// Read one `cache/index{k}` descriptor. All four attributes must be
    /// present and the shared map must contain the owning CPU.
    fn read_cache(&self, cpu: u32, index: u32) -> Result<Device, CacheSkip> {
        let dir = format!("{CPU_DIR}/cpu{cpu}/cache/index{index}");
        let attr = |name: &'static str| -> Result<String, CacheSkip> {
            self.sysfs
                .read_attr(format!("{dir}/{name}"))
                .map_err(|_| CacheSkip::MissingAttr(name))
        };

        let size = attr("size")?;
        let cache_type = attr("type")?;
        let level = attr("level")?;
        let shared = attr("shared_cpu_map")?;

        let mask = CpuMask::from_kernel_str(self.mask_bytes, &shared)?;
        if !mask.is_set(cpu as usize) {
            return Err(CacheSkip::ForeignMask);
        }

        let signature = format!("cache-L{level}-{cache_type}-{shared}");
        let mut dev = Device::new("cache", mask, signature);
        dev.push_attr("size", size);
        dev.push_attr("type", cache_type);
        dev.push_attr("level", level);
        dev.push_attr("shared_cpu_map", shared);
        Ok(dev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_cpu_online_parsing() {
        let dir = tempdir().unwrap();
        let sysfs = Sysfs::with_root(dir.path());
        let builder = Builder::new(&sysfs, 8);

        // Absent file means online.
        assert!(builder.cpu_online(0));

        let cpu0 = dir.path().join("devices/system/cpu/cpu0");
        fs::create_dir_all(&cpu0).unwrap();
        fs::write(cpu0.join("online"), "0\n").unwrap();
        assert!(!builder.cpu_online(0));

        fs::write(cpu0.join("online"), "1\n").unwrap();
        assert!(builder.cpu_online(0));

        // Unparsable content reads as online.
        fs::write(cpu0.join("online"), "maybe\n").unwrap();
        assert!(builder.cpu_online(0));
    }

    #[test]
    fn test_sibling_signature_fallback_chain() {
        let dir = tempdir().unwrap();
        let sysfs = Sysfs::with_root(dir.path());
        let builder = Builder::new(&sysfs, 8);

        // No topology directory at all: both levels synthesize the cpu id.
        assert_eq!(builder.thread_siblings(5).unwrap(), "5");
        assert_eq!(builder.core_siblings(5).unwrap(), "5");

        let topo = dir.path().join("devices/system/cpu/cpu5/topology");
        fs::create_dir_all(&topo).unwrap();
        fs::write(topo.join("thread_siblings"), "30\n").unwrap();

        // core_siblings still missing: falls back to the thread signature.
        assert_eq!(builder.core_siblings(5).unwrap(), "30");

        fs::write(topo.join("core_siblings"), "f0\n").unwrap();
        assert_eq!(builder.core_siblings(5).unwrap(), "f0");
        assert_eq!(builder.thread_siblings(5).unwrap(), "30");
    }
}
