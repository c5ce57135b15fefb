//! A fake sysfs tree on disk, shaped like the fragments the discovery
//! engine consumes.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use libtopology::{Result, Topology};
use tempfile::TempDir;

pub struct FakeSysfs {
    dir: TempDir,
}

impl FakeSysfs {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    fn cpu_dir(&self, cpu: u32) -> PathBuf {
        self.dir.path().join(format!("devices/system/cpu/cpu{cpu}"))
    }

    /// Add a CPU with its topology sibling masks (kernel hex strings).
    pub fn add_cpu(&self, cpu: u32, thread_siblings: &str, core_siblings: &str) {
        let topo = self.cpu_dir(cpu).join("topology");
        fs::create_dir_all(&topo).expect("create topology dir");
        fs::write(
            topo.join("thread_siblings"),
            format!("{thread_siblings}\n"),
        )
        .expect("write thread_siblings");
        fs::write(topo.join("core_siblings"), format!("{core_siblings}\n"))
            .expect("write core_siblings");
    }

    /// Add a CPU directory without any topology files.
    pub fn add_bare_cpu(&self, cpu: u32) {
        fs::create_dir_all(self.cpu_dir(cpu)).expect("create cpu dir");
    }

    /// Write the CPU's `online` file.
    pub fn set_online(&self, cpu: u32, online: bool) {
        fs::create_dir_all(self.cpu_dir(cpu)).expect("create cpu dir");
        fs::write(
            self.cpu_dir(cpu).join("online"),
            if online { "1\n" } else { "0\n" },
        )
        .expect("write online");
    }

    /// Add a NUMA node directory listing the given CPUs.
    pub fn add_node(&self, node: u32, cpus: &[u32]) {
        let node_dir = self
            .dir
            .path()
            .join(format!("devices/system/node/node{node}"));
        fs::create_dir_all(&node_dir).expect("create node dir");
        for &cpu in cpus {
            fs::create_dir_all(node_dir.join(format!("cpu{cpu}"))).expect("create node cpu dir");
        }
    }

    /// Add a cache descriptor under one CPU. `shared_cpu_map` is optional so
    /// tests can model kernels that do not export it.
    pub fn add_cache(
        &self,
        cpu: u32,
        index: u32,
        level: &str,
        cache_type: &str,
        size: &str,
        shared_cpu_map: Option<&str>,
    ) {
        let dir = self.cpu_dir(cpu).join(format!("cache/index{index}"));
        fs::create_dir_all(&dir).expect("create cache dir");
        fs::write(dir.join("level"), format!("{level}\n")).expect("write level");
        fs::write(dir.join("type"), format!("{cache_type}\n")).expect("write type");
        fs::write(dir.join("size"), format!("{size}\n")).expect("write size");
        if let Some(map) = shared_cpu_map {
            fs::write(dir.join("shared_cpu_map"), format!("{map}\n"))
                .expect("write shared_cpu_map");
        }
    }

    pub fn build(&self) -> Result<Topology> {
        Topology::builder()
            .sysfs_root(self.root())
            .allow_cpumask_override(false)
            .build()
    }
}
