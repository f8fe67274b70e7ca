use std::collections::HashMap;
use std::fs::{self, File};
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempdir::TempDir;

use crate::adapter::ProfileHooks;
use crate::error::{Error, Result};
use crate::topology::CpuTopology;
use crate::util;

/// Size of the file `create-file` lays out for every task.
pub const FILE_SIZE: u64 = 1 << 30;
const READ_WARMUPS: usize = 10;

/// Field names of a terse (version 3) fio record, in order.
pub const TERSE_FIELDS: &[&str] = &[
    "terse_version_3", "fio_version", "jobname", "groupid", "error",
    "read_kb", "read_bandwidth", "read_iops", "read_runtime_ms",
    "read_slat_min", "read_slat_max", "read_slat_mean", "read_slat_dev",
    "read_clat_min", "read_clat_max", "read_clat_mean", "read_clat_dev",
    // 1% 5% 10%
    "read_clat_pct01", "read_clat_pct02", "read_clat_pct03",
    // 20% 30% 40%
    "read_clat_pct04", "read_clat_pct05", "read_clat_pct06",
    // 50% 60% 70%
    "read_clat_pct07", "read_clat_pct08", "read_clat_pct09",
    // 80% 90% 95%
    "read_clat_pct10", "read_clat_pct11", "read_clat_pct12",
    // 99% 99.5% 99.9%
    "read_clat_pct13", "read_clat_pct14", "read_clat_pct15",
    // 99.95% 99.99%
    "read_clat_pct16", "read_clat_pct17", "read_clat_pct18",
    "read_clat_pct19", "read_clat_pct20",
    "read_tlat_min", "read_lat_max",
    "read_lat_mean", "read_lat_dev", "read_bw_min", "read_bw_max",
    "read_bw_agg_pct", "read_bw_mean", "read_bw_dev", "write_kb",
    "write_bandwidth", "write_iops", "write_runtime_ms", "write_slat_min",
    "write_slat_max", "write_slat_mean", "write_slat_dev",
    "write_clat_min", "write_clat_max", "write_clat_mean",
    "write_clat_dev",
    "write_clat_pct01", "write_clat_pct02", "write_clat_pct03",
    "write_clat_pct04", "write_clat_pct05", "write_clat_pct06",
    "write_clat_pct07", "write_clat_pct08", "write_clat_pct09",
    "write_clat_pct10", "write_clat_pct11", "write_clat_pct12",
    "write_clat_pct13", "write_clat_pct14", "write_clat_pct15",
    "write_clat_pct16", "write_clat_pct17", "write_clat_pct18",
    "write_clat_pct19", "write_clat_pct20",
    "write_tlat_min", "write_lat_max", "write_lat_mean", "write_lat_dev",
    "write_bw_min", "write_bw_max", "write_bw_agg_pct", "write_bw_mean",
    "write_bw_dev", "cpu_user", "cpu_sys", "cpu_csw", "cpu_mjf",
    "cpu_minf", "iodepth_1", "iodepth_2", "iodepth_4", "iodepth_8",
    "iodepth_16", "iodepth_32", "iodepth_64", "lat_2us", "lat_4us",
    "lat_10us", "lat_20us", "lat_50us", "lat_100us", "lat_250us",
    "lat_500us", "lat_750us", "lat_1000us", "lat_2ms", "lat_4ms",
    "lat_10ms", "lat_20ms", "lat_50ms", "lat_100ms", "lat_250ms",
    "lat_500ms", "lat_750ms", "lat_1000ms", "lat_2000ms",
    "lat_over_2000ms", "disk_name", "disk_read_iops", "disk_write_iops",
    "disk_read_merges", "disk_write_merges", "disk_read_ticks",
    "write_ticks", "disk_queue_time", "disk_util",
];

pub const REPORT_HEADER: &str = "# ncpu secs read_iops write_iops \
                                 read_bandwidth write_bandwidth \
                                 read_50_latency read_99_latency \
                                 write_50_latency write_99_latency";

/// The numbers kept from one terse record.
#[derive(Clone, Debug, PartialEq)]
pub struct TerseRecord {
    pub jobname: String,
    pub read_iops: u64,
    pub write_iops: u64,
    pub read_bandwidth: u64,
    pub write_bandwidth: u64,
    pub read_50_latency: String,
    pub read_99_latency: String,
    pub write_50_latency: String,
    pub write_99_latency: String,
}

impl TerseRecord {
    pub fn parse(line: &str) -> Result<Self> {
        let fields: HashMap<&str, &str> = TERSE_FIELDS
            .iter()
            .cloned()
            .zip(line.trim().split(';'))
            .collect();
        let text = |name: &str| -> Result<String> {
            fields
                .get(name)
                .map(|v| v.to_string())
                .ok_or_else(|| Error::parse("fio", format!("record has no {}", name)))
        };
        let number = |name: &str| -> Result<u64> {
            let value = text(name)?;
            value
                .parse()
                .map_err(|_| Error::parse("fio", format!("{} is not a number: {:?}", name, value)))
        };
        Ok(TerseRecord {
            jobname: text("jobname")?,
            read_iops: number("read_iops")?,
            write_iops: number("write_iops")?,
            read_bandwidth: number("read_bandwidth")?,
            write_bandwidth: number("write_bandwidth")?,
            read_50_latency: text("read_clat_pct07")?,
            read_99_latency: text("read_clat_pct13")?,
            write_50_latency: text("write_clat_pct07")?,
            write_99_latency: text("write_clat_pct13")?,
        })
    }
}

/// One fio run as requested by the dispatcher. `workload` is
/// `<global>_<task>[_<task>...]`, each naming a `.fio` fragment.
#[derive(Clone, Debug)]
pub struct FioJob {
    pub workload: String,
    pub ncore: usize,
    pub duration: u64,
    pub root: PathBuf,
    pub media: String,
    pub fs: String,
    pub bench: String,
    pub nfg: usize,
    pub dio: String,
    pub numa_cpu_node: i64,
    pub dthreads: usize,
    pub dsockets: usize,
    pub delegate: bool,
    pub topology: CpuTopology,
    pub workload_dir: PathBuf,
    pub create_file: PathBuf,
}

impl FioJob {
    pub fn global(&self) -> &str {
        self.workload.split('_').next().unwrap_or("")
    }

    pub fn tasks(&self) -> Vec<&str> {
        self.workload.split('_').skip(1).collect()
    }

    /// Cores fio jobs may run on, in sequential order.
    pub fn cores(&self) -> Vec<usize> {
        if self.delegate {
            self.topology.app_cores(self.dthreads, self.dsockets)
        } else {
            self.topology.seq_cores.clone()
        }
    }

    pub fn warmups(&self) -> usize {
        if self.bench.contains("read") {
            READ_WARMUPS
        } else {
            0
        }
    }

    fn fragment(&self, name: &str) -> Result<String> {
        let path = self.workload_dir.join(format!("{}.fio", name));
        if !path.is_file() {
            return Err(Error::MissingTemplate(path));
        }
        let mut text = fs::read_to_string(&path)?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }

    /// Builds the job file: per task the global fragment, the run settings
    /// and the task fragment. Jobs are split evenly and every task gets its
    /// own contiguous slice of the core list.
    pub fn generate_config(&self) -> Result<String> {
        let tasks = self.tasks();
        if tasks.is_empty() {
            return Err(Error::invalid_arg(format!("fio workload {} names no task", self.workload)));
        }
        let split_jobs = self.ncore / tasks.len();
        if split_jobs == 0 {
            return Err(Error::invalid_arg(format!(
                "{} cores cannot be split over {} fio tasks",
                self.ncore,
                tasks.len()
            )));
        }
        let cores = self.cores();
        let global = self.fragment(self.global())?;

        let mut config = String::from("# auto generated by fxrunner\n");
        for (idx, task) in tasks.iter().enumerate() {
            let body = self.fragment(task)?;
            let slice = cores.chunks(split_jobs).nth(idx).ok_or_else(|| {
                Error::invalid_arg(format!("not enough cores for fio task {}", task))
            })?;
            config.push_str(&global);
            config.push_str(&format!("directory={}\n", self.root.display()));
            config.push_str(&format!("runtime={}s\n", self.duration));
            config.push_str("time_based\n");
            config.push_str(&format!("numjobs={}\n", split_jobs));
            config.push_str(&format!("cpus_allowed={}\n", util::cpu_list(slice)));
            config.push_str(&body);
        }
        Ok(config)
    }

    /// Lays out the data file of every task before the run.
    pub fn create_files(&self) {
        for task in self.tasks() {
            let mut cmd = Command::new(&self.create_file);
            cmd.arg(self.root.join(task))
                .arg(FILE_SIZE.to_string())
                .arg(self.ncore.to_string())
                .arg(self.dthreads.to_string())
                .arg(self.dsockets.to_string());
            match util::run_quiet(&mut cmd) {
                Ok(true) => {}
                Ok(false) => warn!("create-file failed for task {}", task),
                Err(e) => warn!("failed to run {:?}: {}", self.create_file, e),
            }
        }
    }

    pub fn run(&self, hooks: &ProfileHooks) -> Result<Vec<TerseRecord>> {
        let config = self.generate_config()?;
        debug!("{} on {} (numa node {})", self.bench, self.media, self.numa_cpu_node);
        self.create_files();
        let tmp = TempDir::new("fxrunner-fio")?;
        let config_path = tmp.path().join(format!("{}.fio", self.workload));
        File::create(&config_path)?.write_all(config.as_bytes())?;

        hooks.begin();
        let result = self.run_fio(&config_path);
        hooks.end();
        result
    }

    fn fio(config: &Path) -> Command {
        let mut cmd = Command::new("fio");
        cmd.arg(config).args(&["--output-format", "terse"]);
        cmd
    }

    fn run_fio(&self, config: &Path) -> Result<Vec<TerseRecord>> {
        for i in 0..self.warmups() {
            debug!("fio warm-up {}/{}", i + 1, self.warmups());
            util::run_quiet(&mut Self::fio(config))?;
        }
        let mut cmd = Self::fio(config);
        debug!("exec: {}", util::describe(&cmd));
        let output = cmd.stderr(Stdio::inherit()).output()?;
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: util::describe(&cmd),
                status: output.status,
            });
        }
        parse_output(&String::from_utf8_lossy(&output.stdout))
    }

    /// Section marker, header and row for every record.
    pub fn report(&self, records: &[TerseRecord]) -> Vec<String> {
        let mut lines = Vec::with_capacity(records.len() * 3);
        for r in records {
            lines.push(format!(
                "## {}:{}:{}:{}:{}",
                self.media, self.fs, r.jobname, self.nfg, self.dio
            ));
            lines.push(String::from(REPORT_HEADER));
            lines.push(format!(
                "{} {} {} {} {} {} {} {} {} {}",
                self.ncore,
                self.duration,
                r.read_iops,
                r.write_iops,
                r.read_bandwidth,
                r.write_bandwidth,
                r.read_50_latency,
                r.read_99_latency,
                r.write_50_latency,
                r.write_99_latency
            ));
        }
        lines
    }
}

/// Terse records in fio output; anything else fio printed is logged.
pub fn parse_output(text: &str) -> Result<Vec<TerseRecord>> {
    let mut records = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("3;") {
            records.push(TerseRecord::parse(line)?);
        } else {
            warn!("fio: {}", line);
        }
    }
    Ok(records)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A terse record with the given throughput and latency fields, zeros
    /// elsewhere.
    pub(crate) fn terse_line(jobname: &str, read: (u64, u64), write: (u64, u64)) -> String {
        TERSE_FIELDS
            .iter()
            .map(|&name| match name {
                "terse_version_3" => String::from("3"),
                "fio_version" => String::from("fio-3.27"),
                "jobname" => jobname.to_string(),
                "read_bandwidth" => read.0.to_string(),
                "read_iops" => read.1.to_string(),
                "write_bandwidth" => write.0.to_string(),
                "write_iops" => write.1.to_string(),
                "read_clat_pct07" | "write_clat_pct07" => String::from("50.000000%=12"),
                "read_clat_pct13" | "write_clat_pct13" => String::from("99.000000%=40"),
                "disk_name" => String::from("pmem0"),
                _ => String::from("0"),
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    fn job(workload: &str, ncore: usize, dir: &Path) -> FioJob {
        FioJob {
            workload: workload.to_string(),
            ncore,
            duration: 30,
            root: PathBuf::from("/mnt/root"),
            media: String::from("pmem-local"),
            fs: String::from("ext4"),
            bench: format!("fio_{}", workload),
            nfg: ncore,
            dio: String::from("bufferedio"),
            numa_cpu_node: -1,
            dthreads: 0,
            dsockets: 0,
            delegate: false,
            topology: CpuTopology::uniform(2, 4, 1),
            workload_dir: dir.to_path_buf(),
            create_file: PathBuf::from("/nonexistent/create-file"),
        }
    }

    fn templates(dir: &Path) {
        fs::write(dir.join("global.fio"), "[global]\nioengine=sync\n").expect("write global");
        fs::write(dir.join("seq-read-2M.fio"), "[seq-read-2M]\nrw=read\n").expect("write task");
        fs::write(dir.join("seq-write-4K.fio"), "[seq-write-4K]\nrw=write").expect("write task");
    }

    #[test]
    fn two_tasks_split_jobs_and_cores() {
        let tmp = TempDir::new("fxrunner-fio").expect("failed to create tempdir");
        templates(tmp.path());
        let config = job("global_seq-read-2M_seq-write-4K", 8, tmp.path())
            .generate_config()
            .expect("config");
        assert_eq!(config.matches("numjobs=4\n").count(), 2);
        assert!(config.contains("cpus_allowed=0-3\n"));
        assert!(config.contains("cpus_allowed=4-7\n"));
        assert_eq!(config.matches("[global]").count(), 2);
        assert!(config.contains("runtime=30s\ntime_based\n"));
        assert!(config.find("rw=read").expect("first task") < config.find("rw=write").expect("second task"));
    }

    #[test]
    fn delegation_cores_are_left_out() {
        let tmp = TempDir::new("fxrunner-fio").expect("failed to create tempdir");
        templates(tmp.path());
        let mut j = job("global_seq-read-2M", 6, tmp.path());
        j.delegate = true;
        j.dthreads = 1;
        j.dsockets = 2;
        assert_eq!(j.cores(), vec![1, 2, 3, 5, 6, 7]);
        let config = j.generate_config().expect("config");
        assert!(config.contains("cpus_allowed=1-3,5-7\n"));
    }

    #[test]
    fn missing_fragment_is_reported() {
        let tmp = TempDir::new("fxrunner-fio").expect("failed to create tempdir");
        templates(tmp.path());
        match job("global_rand-read-4K", 4, tmp.path()).generate_config() {
            Err(Error::MissingTemplate(path)) => assert!(path.ends_with("rand-read-4K.fio")),
            other => panic!("expected a missing template, got {:?}", other),
        }
    }

    #[test]
    fn too_few_cores_for_tasks() {
        let tmp = TempDir::new("fxrunner-fio").expect("failed to create tempdir");
        templates(tmp.path());
        assert!(job("global_seq-read-2M_seq-write-4K", 1, tmp.path())
            .generate_config()
            .is_err());
    }

    #[test]
    fn only_read_workloads_warm_up() {
        let tmp = TempDir::new("fxrunner-fio").expect("failed to create tempdir");
        assert_eq!(job("global_seq-read-4K", 1, tmp.path()).warmups(), 10);
        assert_eq!(job("global_rand-write-4K", 1, tmp.path()).warmups(), 0);
    }

    #[test]
    fn terse_record_by_field_name() {
        let record = TerseRecord::parse(&terse_line("seq-read-2M", (5000, 1200), (0, 0)))
            .expect("record");
        assert_eq!(record.jobname, "seq-read-2M");
        assert_eq!(record.read_bandwidth, 5000);
        assert_eq!(record.read_iops, 1200);
        assert_eq!(record.read_50_latency, "50.000000%=12");
        assert_eq!(record.write_99_latency, "99.000000%=40");
    }

    #[test]
    fn short_or_garbled_records_fail() {
        assert!(TerseRecord::parse("3;fio-3.27;job").is_err());
        let line = terse_line("job", (1, 1), (1, 1)).replacen(";1;", ";x;", 1);
        assert!(TerseRecord::parse(&line).is_err());
    }

    #[test]
    fn non_terse_lines_are_skipped() {
        let text = format!(
            "fio: this platform does not support process shared mutexes\n{}\n",
            terse_line("a", (1, 2), (3, 4))
        );
        let records = parse_output(&text).expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].write_iops, 4);
    }

    #[test]
    fn report_lines_per_record() {
        let tmp = TempDir::new("fxrunner-fio").expect("failed to create tempdir");
        let j = job("global_seq-read-2M", 4, tmp.path());
        let record = TerseRecord::parse(&terse_line("seq-read-2M", (5000, 1200), (0, 0)))
            .expect("record");
        let lines = j.report(&[record]);
        assert_eq!(lines[0], "## pmem-local:ext4:seq-read-2M:4:bufferedio");
        assert_eq!(lines[1], REPORT_HEADER);
        assert_eq!(
            lines[2],
            "4 30 1200 0 5000 0 50.000000%=12 99.000000%=40 50.000000%=12 99.000000%=40"
        );
    }
}
