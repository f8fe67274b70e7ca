use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::topology::CpuTopology;

/// Device nodes the media initializers hand to the filesystems. All of them
/// are destroyed by a run, so the defaults are placeholders the operator is
/// expected to override.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePaths {
    pub loop_dev: PathBuf,
    pub nvme: PathBuf,
    pub hdd: PathBuf,
    pub ssd: PathBuf,
    pub pmem: PathBuf,
    pub dm_stripe: PathBuf,
    pub pm_array: PathBuf,
    /// Candidates for dm-stripe and pm-array sets, one hop from each other.
    pub pmem_devices: Vec<PathBuf>,
}

impl Default for DevicePaths {
    fn default() -> Self {
        DevicePaths {
            loop_dev: PathBuf::from("/dev/loopX"),
            nvme: PathBuf::from("/dev/nvme0n1pX"),
            hdd: PathBuf::from("/dev/sdX"),
            ssd: PathBuf::from("/dev/sdY"),
            pmem: PathBuf::from("/dev/pmem0"),
            dm_stripe: PathBuf::from("/dev/mapper/dm-stripe"),
            pm_array: PathBuf::from("/dev/pmem_ar0"),
            pmem_devices: (0..8).map(|i| PathBuf::from(format!("/dev/pmem{}", i))).collect(),
        }
    }
}

impl DevicePaths {
    pub fn all(&self) -> Vec<&Path> {
        vec![
            &self.pm_array,
            &self.dm_stripe,
            &self.pmem,
            &self.hdd,
            &self.ssd,
            &self.nvme,
            &self.loop_dev,
        ]
        .into_iter()
        .map(PathBuf::as_path)
        .collect()
    }
}

/// Locations of the benchmark binaries and helper scripts. Relative paths
/// resolve against the directory of the running binary.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub fxmark: PathBuf,
    pub run_filebench: PathBuf,
    pub run_fio: PathBuf,
    pub run_dbench: PathBuf,
    pub perfmon: PathBuf,
    pub parradm: PathBuf,
    pub create_file: PathBuf,
    pub filebench_workloads: PathBuf,
    pub fio_workloads: PathBuf,
    pub test_root: PathBuf,
    pub tmp_dir: PathBuf,
    pub log_root: PathBuf,
    pub pid_file: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        ToolPaths {
            fxmark: PathBuf::from("fxmark"),
            run_filebench: PathBuf::from("run-filebench"),
            run_fio: PathBuf::from("run-fio"),
            run_dbench: PathBuf::from("run-dbench"),
            perfmon: PathBuf::from("perfmon.py"),
            parradm: PathBuf::from("parradm"),
            create_file: PathBuf::from("create-file"),
            filebench_workloads: PathBuf::from("filebench-workloads"),
            fio_workloads: PathBuf::from("fio-workloads"),
            test_root: PathBuf::from("root"),
            tmp_dir: PathBuf::from(".tmp"),
            log_root: PathBuf::from("../logs"),
            pid_file: PathBuf::from("pid.txt"),
        }
    }
}

/// Preload libraries for the two user-space filesystems.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LibfsPaths {
    pub splitfs_library_path: PathBuf,
    pub splitfs_tree_file: PathBuf,
    pub splitfs_preload: PathBuf,
    pub assise_preload: PathBuf,
}

impl Default for LibfsPaths {
    fn default() -> Self {
        LibfsPaths {
            splitfs_library_path: PathBuf::from("../splitfs/splitfs/"),
            splitfs_tree_file: PathBuf::from("../splitfs/splitfs/bin/nvp_nvp.tree"),
            splitfs_preload: PathBuf::from("../splitfs/splitfs/libnvp.so"),
            assise_preload: PathBuf::from("../assise/libfs/build/libmlfs.so"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub devices: DevicePaths,
    pub tools: ToolPaths,
    pub libfs: LibfsPaths,
    pub disk_size: String,
    pub ext_block_size: usize,
    pub ext_stride_size: usize,
    pub dm_stripe_chunk_size: usize,
    pub perfmon_level: u32,
    /// Overrides `/proc/cpuinfo` detection when present.
    pub topology: Option<CpuTopology>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            devices: DevicePaths::default(),
            tools: ToolPaths::default(),
            libfs: LibfsPaths::default(),
            disk_size: String::from("32G"),
            ext_block_size: 4096,
            ext_stride_size: 512,
            dm_stripe_chunk_size: 4096,
            perfmon_level: 0,
            topology: None,
        }
    }
}

impl HarnessConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let c = serde_json::from_reader(file)?;
        Ok(c)
    }

    pub fn topology(&self) -> Result<CpuTopology> {
        match self.topology {
            Some(ref topology) => Ok(topology.clone()),
            None => CpuTopology::detect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let tmp = tempdir::TempDir::new("fxrunner-config").expect("failed to create tempdir");
        let path = tmp.path().join("harness.json");
        let mut f = File::create(&path).expect("failed to create config");
        write!(
            f,
            r#"{{ "devices": {{ "pmem": "/dev/pmem3" }}, "disk_size": "8G",
                 "topology": {{ "model_name": "x", "physical_chips": 2, "cores_per_chip": 4,
                                "smt_level": 1, "seq_cores": [0,1,2,3,4,5,6,7] }} }}"#
        )
        .expect("failed to write config");
        drop(f);

        let config = HarnessConfig::load(&path).expect("failed to load config");
        assert_eq!(config.devices.pmem, PathBuf::from("/dev/pmem3"));
        assert_eq!(config.devices.nvme, PathBuf::from("/dev/nvme0n1pX"));
        assert_eq!(config.disk_size, "8G");
        assert_eq!(config.ext_stride_size, 512);
        assert_eq!(config.tools.fxmark, PathBuf::from("fxmark"));
        let topo = config.topology().expect("topology override");
        assert_eq!(topo.physical_cores(), 8);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempdir::TempDir::new("fxrunner-config").expect("failed to create tempdir");
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("failed to write config");
        assert!(HarnessConfig::load(&path).is_err());
    }
}
