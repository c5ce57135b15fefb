//! Hardware devices distinct from processor entities.
//!
//! The builder currently produces only `"cache"` devices, one per physical
//! cache instance regardless of how many CPUs expose it.

use smallvec::SmallVec;

use crate::cpumask::CpuMask;

/// Opaque handle to a device within its [`Topology`](crate::Topology).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub(crate) usize);

#[derive(Debug, Clone)]
struct Attr {
    name: &'static str,
    value: String,
}

/// A hardware resource associated with a set of CPUs.
#[derive(Debug, Clone)]
pub struct Device {
    kind: &'static str,
    cpumask: CpuMask,
    // Cache descriptors carry exactly four attributes.
    attrs: SmallVec<[Attr; 4]>,
    signature: String,
}

impl Device {
    pub(crate) fn new(kind: &'static str, cpumask: CpuMask, signature: String) -> Self {
        Self {
            kind,
            cpumask,
            attrs: SmallVec::new(),
            signature,
        }
    }

    /// The device's type tag, e.g. `"cache"`.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.kind
    }

    /// The set of CPUs sharing this device instance.
    #[must_use]
    pub fn cpumask(&self) -> &CpuMask {
        &self.cpumask
    }

    /// Look up a named attribute.
    ///
    /// The returned borrow lives as long as the owning context.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Iterate over `(name, value)` attribute pairs in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs
            .iter()
            .map(|attr| (attr.name, attr.value.as_str()))
    }

    /// The signature that deduplicated this device during construction,
    /// e.g. `cache-L2-Unified-00000003`.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub(crate) fn push_attr(&mut self, name: &'static str, value: String) {
        self.attrs.push(Attr { name, value });
    }
}
