//! The topology context: construction, traversal, and device queries.

use std::env;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::builder::Builder;
use crate::cpumask::CpuMask;
use crate::device::{Device, DeviceId};
use crate::entity::{EntityId, Level, ProcEnt};
use crate::probe;
use crate::sysfs::Sysfs;
use crate::{Error, Result};

/// Configuration for building a [`Topology`].
///
/// The defaults mirror [`Topology::new`]: the sysfs root comes from
/// `LIBTOPOLOGY_SYSFS_ROOT` (falling back to `/sys`) and the width override
/// from `LIBTOPOLOGY_CPUMASK_OVERRIDE`. Explicit settings take precedence
/// over the environment, which keeps tests independent of process-global
/// state.
#[derive(Debug, Clone, Default)]
pub struct TopologyBuilder {
    sysfs_root: Option<PathBuf>,
    cpumask_override: Option<bool>,
}

impl TopologyBuilder {
    /// Start from the environment-driven defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit sysfs root instead of `/sys` or the environment.
    #[must_use]
    pub fn sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = Some(root.into());
        self
    }

    /// Permit (or forbid) a sysfs-derived cpumask width larger than the
    /// affinity syscall accepts. See [`ProbeError`](crate::ProbeError).
    #[must_use]
    pub fn allow_cpumask_override(mut self, allow: bool) -> Self {
        self.cpumask_override = Some(allow);
        self
    }

    /// Probe the cpumask width and scan sysfs into an immutable context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Probe`] when the mask width cannot be determined and
    /// [`Error::Build`] when a mandatory sysfs read fails. Construction is
    /// transactional: on error, no partial state survives.
    pub fn build(self) -> Result<Topology> {
        let sysfs = match self.sysfs_root {
            Some(root) => Sysfs::with_root(root),
            None => Sysfs::from_env(),
        };
        let allow_override = self
            .cpumask_override
            .unwrap_or_else(|| env::var_os(probe::OVERRIDE_ENV).is_some());

        let mask_bytes = probe::probe_cpumask_size(&sysfs, allow_override).map_err(Error::Probe)?;
        let built = Builder::new(&sysfs, mask_bytes)
            .build()
            .map_err(Error::Build)?;

        Ok(Topology {
            sysfs,
            mask_bytes,
            entities: built.entities,
            system: built.system,
            devices: built.devices,
        })
    }
}

/// An immutable snapshot of the machine's processor and cache topology.
///
/// Everything reachable from a `Topology` is fixed at construction, so
/// queries take `&self` and are safe from any number of threads. Teardown is
/// `Drop`; the [`EntityId`]/[`DeviceId`] handles it hands out are only
/// meaningful against the context that produced them.
#[derive(Debug)]
pub struct Topology {
    sysfs: Sysfs,
    mask_bytes: usize,
    entities: Vec<ProcEnt>,
    system: EntityId,
    devices: Vec<Device>,
}

impl Topology {
    /// Build a topology from the environment-configured sysfs root.
    ///
    /// # Errors
    ///
    /// See [`TopologyBuilder::build`].
    pub fn new() -> Result<Self> {
        TopologyBuilder::new().build()
    }

    /// Start configuring a topology explicitly.
    #[must_use]
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    /// The sysfs root this context was built from.
    #[must_use]
    pub fn sysfs_root(&self) -> &Path {
        self.sysfs.root()
    }

    /// The byte width of every cpumask in this context. Caller-allocated
    /// masks passed to the copy operations must have exactly this width.
    #[must_use]
    pub fn sizeof_cpumask(&self) -> usize {
        self.mask_bytes
    }

    /// Allocate a zeroed cpumask of this context's width.
    #[must_use]
    pub fn alloc_cpumask(&self) -> CpuMask {
        CpuMask::new(self.mask_bytes)
    }

    /// The root system entity, from which every other entity is reachable.
    #[must_use]
    pub fn system(&self) -> EntityId {
        self.system
    }

    /// Borrow a processor entity.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not come from this context.
    #[must_use]
    pub fn entity(&self, ent: EntityId) -> &ProcEnt {
        &self.entities[ent.0]
    }

    /// Borrow a device.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not come from this context.
    #[must_use]
    pub fn device(&self, dev: DeviceId) -> &Device {
        &self.devices[dev.0]
    }

    /// Step to the next entity at level `to`, relative to `from` and
    /// continuing after `iter` (`None` starts fresh).
    ///
    /// - `to == from`'s level: `None` (self-iteration is undefined).
    /// - `to` one level up: the parent, regardless of `iter`.
    /// - `to` one level down: the first child, or the sibling after `iter`.
    /// - `to` further up: the single matching ancestor.
    /// - `to` further down: a flat enumeration of all matching descendants,
    ///   in the context's global insertion order.
    #[must_use]
    pub fn traverse(&self, from: EntityId, iter: Option<EntityId>, to: Level) -> Option<EntityId> {
        let ent = self.entities.get(from.0)?;

        if to == ent.level() {
            return None;
        }

        if ent.level().parent() == Some(to) {
            return ent.parent();
        }

        if ent.level().child() == Some(to) {
            return match iter {
                None => ent.children().first().copied(),
                Some(it) => self.entities.get(it.0)?.sibling(),
            };
        }

        if to > ent.level() {
            return self.traverse(ent.parent()?, None, to);
        }

        self.next_at_level(from, iter, to)
    }

    /// Scan the global entity list for the next descendant of `from` at the
    /// given level, starting after `iter`.
    fn next_at_level(&self, from: EntityId, iter: Option<EntityId>, to: Level) -> Option<EntityId> {
        let start = iter.map_or(0, |it| it.0 + 1);
        (start..self.entities.len())
            .find(|&i| self.entities[i].level() == to && self.is_descendant(from, EntityId(i)))
            .map(EntityId)
    }

    fn is_descendant(&self, from: EntityId, ent: EntityId) -> bool {
        let mut cur = self.entities[ent.0].parent();
        while let Some(p) = cur {
            if p == from {
                return true;
            }
            cur = self.entities[p.0].parent();
        }
        false
    }

    /// Iterate over the entities at `level` reachable from `from`, in
    /// [`Topology::traverse`] order.
    #[must_use]
    pub fn entities_at(&self, from: EntityId, level: Level) -> EntitiesAt<'_> {
        EntitiesAt {
            topo: self,
            from,
            level,
            cursor: None,
            done: false,
        }
    }

    /// Count the entities at `level` reachable from `from`.
    #[must_use]
    pub fn count_at_level(&self, from: EntityId, level: Level) -> usize {
        self.entities_at(from, level).count()
    }

    /// Copy an entity's cpumask into a caller-allocated mask of this
    /// context's width.
    ///
    /// # Panics
    ///
    /// Panics if `dst` was not sized with [`Topology::sizeof_cpumask`].
    pub fn procent_cpumask(&self, ent: EntityId, dst: &mut CpuMask) {
        dst.copy_from(self.entity(ent).cpumask());
    }

    /// Find the next device whose type tag equals `kind`, scanning after
    /// `prev` (`None` starts fresh). Enumeration order is unspecified.
    #[must_use]
    pub fn find_device_by_type(&self, prev: Option<DeviceId>, kind: &str) -> Option<DeviceId> {
        let start = prev.map_or(0, |d| d.0 + 1);
        (start..self.devices.len())
            .find(|&i| self.devices[i].kind() == kind)
            .map(DeviceId)
    }

    /// Iterate over every device whose type tag equals `kind`.
    pub fn devices_of_type<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = DeviceId> + 'a {
        self.devices
            .iter()
            .enumerate()
            .filter(move |(_, dev)| dev.kind() == kind)
            .map(|(i, _)| DeviceId(i))
    }

    /// Copy a device's cpumask into a caller-allocated mask of this
    /// context's width.
    ///
    /// # Panics
    ///
    /// Panics if `dst` was not sized with [`Topology::sizeof_cpumask`].
    pub fn device_cpumask(&self, dev: DeviceId, dst: &mut CpuMask) {
        dst.copy_from(self.device(dev).cpumask());
    }

    /// Look up a device attribute; the borrow is valid until the context is
    /// dropped.
    #[must_use]
    pub fn device_get_attribute(&self, dev: DeviceId, name: &str) -> Option<&str> {
        self.device(dev).attribute(name)
    }

    /// A human-readable rendering of the topology.
    #[must_use]
    pub fn summary(&self) -> String {
        use std::fmt::Write;

        let sys = self.system;
        let mut s = format!(
            "topology: {} nodes, {} packages, {} cores, {} threads, {} devices (cpumask {} bytes)",
            self.count_at_level(sys, Level::Node),
            self.count_at_level(sys, Level::Package),
            self.count_at_level(sys, Level::Core),
            self.count_at_level(sys, Level::Thread),
            self.devices.len(),
            self.mask_bytes,
        );
        for node in self.entities_at(sys, Level::Node) {
            let ent = self.entity(node);
            let _ = write!(
                s,
                "\n  node{}: {} threads, cpus {}",
                ent.cpu_id(),
                self.count_at_level(node, Level::Thread),
                ent.cpumask()
            );
        }
        s
    }

    /// Log the topology at info level.
    pub fn log_topology(&self) {
        let sys = self.system;
        info!(
            "topology: {} nodes, {} packages, {} cores, {} threads, {} devices",
            self.count_at_level(sys, Level::Node),
            self.count_at_level(sys, Level::Package),
            self.count_at_level(sys, Level::Core),
            self.count_at_level(sys, Level::Thread),
            self.devices.len(),
        );
        for node in self.entities_at(sys, Level::Node) {
            let ent = self.entity(node);
            info!(
                "  node{}: cpus {}",
                ent.cpu_id(),
                ent.cpumask()
            );
        }
    }
}

/// Iterator over the entities at a fixed level relative to a start entity.
///
/// Returned by [`Topology::entities_at`].
#[derive(Debug)]
pub struct EntitiesAt<'a> {
    topo: &'a Topology,
    from: EntityId,
    level: Level,
    cursor: Option<EntityId>,
    done: bool,
}

impl Iterator for EntitiesAt<'_> {
    type Item = EntityId;

    fn next(&mut self) -> Option<EntityId> {
        if self.done {
            return None;
        }
        match self.topo.traverse(self.from, self.cursor, self.level) {
            Some(id) => {
                // Upward traversal ignores the cursor and names a single
                // entity; yield it once.
                if self.level > self.topo.entity(self.from).level() {
                    self.done = true;
                }
                self.cursor = Some(id);
                Some(id)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
