use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{self, Command, Stdio};
use std::time::Instant;

use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use rand::Rng;

use crate::benchmark::{Tool, BENCH_TYPES};
use crate::config::{DevicePaths, HarnessConfig};
use crate::enumerate::{core_counts, ConfigSpace, Delegation, IoMode, RunConfig, RunFilter};
use crate::error::{Error, Result};
use crate::filesystem::Filesystem;
use crate::media::Media;
use crate::mount::{Mounter, ASSISE_ROOT, SPLITFS_ROOT};
use crate::profiler::SharedState;
use crate::topology::CpuTopology;
use crate::util;

const DEFAULT_LOG_NAME: &str = "fxrunner.log";
const MAX_MAP_COUNT: &str = "262144";
const LOCK_STAT: &str = "/proc/sys/kernel/lock_stat";

/// NUMA nodes one hop away from each pmem node.
const ONE_HOP: [&[i64]; 8] = [
    &[1, 2, 4],
    &[0, 3, 5],
    &[0, 3, 6],
    &[1, 2, 7],
    &[0, 5, 7],
    &[1, 4, 6],
    &[2, 5, 7],
    &[3, 4, 6],
];

/// NUMA nodes two hops away from each pmem node.
const TWO_HOP: [&[i64]; 8] = [
    &[3, 5, 6, 7],
    &[2, 4, 6, 7],
    &[1, 4, 5, 7],
    &[0, 4, 5, 6],
    &[1, 2, 3, 6],
    &[0, 2, 3, 7],
    &[0, 1, 3, 4],
    &[0, 1, 2, 5],
];

/// What the operator asked the dispatcher to sweep.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub media: String,
    pub fs: String,
    pub workload: String,
    pub ncore: String,
    pub iotype: String,
    pub delegation: Delegation,
    pub duration: u64,
    pub directory_name: String,
    pub log_name: String,
    pub dry_run: bool,
    /// Harness config file, forwarded to the adapters.
    pub config_path: Option<PathBuf>,
}

impl RunOptions {
    pub fn filter(&self) -> Result<RunFilter> {
        RunFilter::new(
            &self.media,
            &self.fs,
            &self.workload,
            &self.ncore,
            &self.iotype,
            self.delegation,
        )
    }
}

/// CPU nodes the benchmark threads are placed on relative to the pmem device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NumaPlacement {
    pub local: i64,
    pub one_hop: i64,
    pub two_hop: i64,
}

impl NumaPlacement {
    /// The local node is the number the pmem device node ends in; the remote
    /// nodes are picked at random from its neighbours.
    pub fn choose(pmem: &Path) -> Result<Self> {
        let local = pmem
            .to_string_lossy()
            .chars()
            .last()
            .and_then(|c| c.to_digit(10))
            .map(|d| d as usize)
            .filter(|&d| d < ONE_HOP.len())
            .ok_or_else(|| Error::invalid_arg(format!("cannot tell the NUMA node of {:?}", pmem)))?;
        let mut rng = rand::thread_rng();
        Ok(NumaPlacement {
            local: local as i64,
            one_hop: *rng.choose(ONE_HOP[local]).unwrap_or(&-1),
            two_hop: *rng.choose(TWO_HOP[local]).unwrap_or(&-1),
        })
    }

    pub fn node_for(&self, media: Media) -> i64 {
        match media {
            Media::PmemLocal => self.local,
            Media::PmemRemote1Hop | Media::DmStripe1Remote => self.one_hop,
            Media::PmemRemote2Hop => self.two_hop,
            _ => -1,
        }
    }
}

/// The result log. Every line also goes to the diagnostic log.
pub struct RunLog {
    path: PathBuf,
    out: BufWriter<File>,
}

impl RunLog {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            util::mkdir(dir)?;
        }
        Ok(RunLog {
            path: path.to_path_buf(),
            out: BufWriter::new(File::create(path)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&mut self, text: &str) -> io::Result<()> {
        info!("{}", text);
        writeln!(self.out, "{}", text)?;
        self.out.flush()
    }
}

/// A fully resolved adapter or fxmark invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    fn new(program: PathBuf) -> Self {
        Invocation {
            program,
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    fn arg<S: ToString>(&mut self, name: &str, value: S) -> &mut Self {
        self.args.push(format!("--{}", name));
        self.args.push(value.to_string());
        self
    }

    pub fn value_of(&self, name: &str) -> Option<&str> {
        let flag = format!("--{}", name);
        self.args
            .iter()
            .position(|a| *a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Mutable state of a sweep. Dropping it runs the cleanup, however the
/// sweep ended.
pub struct RunContext {
    config: HarnessConfig,
    topology: CpuTopology,
    options: RunOptions,
    test_root: PathBuf,
    log_dir: PathBuf,
    log: Option<RunLog>,
    mounter: Mounter,
    state: SharedState,
    numa: NumaPlacement,
    active_ncore: Option<usize>,
}

pub struct Runner {
    space: ConfigSpace,
    ctx: RunContext,
}

impl Runner {
    pub fn new(
        config: HarnessConfig,
        topology: CpuTopology,
        options: RunOptions,
        state: SharedState,
    ) -> Result<Self> {
        let filter = options.filter()?;
        let counts = match core_counts(&topology, &options.ncore, &options.delegation) {
            Ok(counts) => counts,
            Err(e @ Error::InvalidCoreHint { .. }) => {
                error!("{}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let space = ConfigSpace::new(filter, counts);

        let test_root = match options.fs.as_str() {
            "splitfs" => PathBuf::from(SPLITFS_ROOT),
            "assise" => PathBuf::from(ASSISE_ROOT),
            _ => util::resolve(&config.tools.test_root),
        };
        let directory_name = if options.directory_name.is_empty() {
            chrono::Local::now().format("%Y-%m-%d-%H-%M-%S%.6f").to_string()
        } else {
            options.directory_name.clone()
        };
        let log_dir = util::resolve(&config.tools.log_root).join(directory_name);
        let numa = NumaPlacement::choose(&config.devices.pmem)?;
        let mounter = Mounter::new(config.clone(), options.delegation);

        Ok(Runner {
            space,
            ctx: RunContext {
                config,
                topology,
                options,
                test_root,
                log_dir,
                log: None,
                mounter,
                state,
                numa,
                active_ncore: None,
            },
        })
    }

    pub fn space(&self) -> &ConfigSpace {
        &self.space
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Runs every configuration of the sweep and returns how many ran.
    pub fn run(&mut self) -> Result<usize> {
        self.ctx.log_start(&self.space)?;
        let mut count = 0;
        for config in self.space.iter() {
            if self.ctx.state.interrupted() {
                warn!("sweep interrupted after {} configurations", count);
                break;
            }
            count += 1;
            if let Err(e) = self.ctx.run_one(&config) {
                warn!("{} on {}/{} failed: {}", config.bench, config.fs, config.media, e);
                let line = format!("# Fail to run {} on {} with {}.", config.bench, config.media, config.fs);
                if let Err(e) = self.ctx.log(&line) {
                    error!("failed to write the result log: {}", e);
                }
            }
        }
        self.ctx.log(&format!("### NUM_TEST_CONF  = {}", count))?;
        Ok(count)
    }
}

impl RunContext {
    pub fn test_root(&self) -> &Path {
        &self.test_root
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_path(&self) -> PathBuf {
        let name = if self.options.log_name.is_empty() {
            DEFAULT_LOG_NAME
        } else {
            &self.options.log_name
        };
        self.log_dir.join(name)
    }

    fn log(&mut self, text: &str) -> Result<()> {
        match self.log {
            Some(ref mut log) => log.line(text)?,
            None => info!("{}", text),
        }
        Ok(())
    }

    fn log_start(&mut self, space: &ConfigSpace) -> Result<()> {
        let log = RunLog::create(&self.log_path())?;
        info!("logging results to {:?}", log.path());
        self.log = Some(log);
        {
            let mut state = self.state.lock();
            state.profiler.env.level = self.config.perfmon_level;
            state.profiler.env.log_dir = self.log_dir.clone();
        }

        let uname = Command::new("uname").arg("-a").output()?;
        let system = String::from_utf8_lossy(&uname.stdout).trim().to_string();
        let join = |names: Vec<&str>| names.join(",");
        let ncores = space
            .core_counts()
            .iter()
            .map(|c| format!("({}, {})", c.ncore, c.nsocket))
            .collect::<Vec<_>>()
            .join(",");
        let seq = self
            .topology
            .seq_cores
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let lines = vec![
            format!("### SYSTEM         = {}", system),
            format!("### DISK_SIZE      = {}", self.config.disk_size),
            format!("### DURATION       = {}s", self.options.duration),
            format!("### DIRECTIO       = {}", join(IoMode::ALL.iter().map(|m| m.name()).collect())),
            format!("### MEDIA_TYPES    = {}", join(Media::ALL.iter().map(|m| m.name()).collect())),
            format!("### FS_TYPES       = {}", join(Filesystem::ALL.iter().map(|f| f.name()).collect())),
            format!("### BENCH_TYPES    = {}", join(BENCH_TYPES.to_vec())),
            format!("### NCORES         = {}", ncores),
            format!("### CORE_SEQ       = {}", seq),
            String::new(),
            format!("### MODEL_NAME     = {}", self.topology.model_name),
            format!("### PHYSICAL_CHIPS = {}", self.topology.physical_chips),
            format!("### CORE_PER_CHIP  = {}", self.topology.cores_per_chip),
            format!("### SMT_LEVEL      = {}", self.topology.smt_level),
            String::new(),
        ];
        for line in lines {
            self.log(&line)?;
        }
        Ok(())
    }

    fn run_one(&mut self, config: &RunConfig) -> Result<()> {
        info!("Running Configuration: {:?}", config);
        let (ncore, nfg, nbg) = config.workers(self.topology.hardware_threads());
        let marker = format!(
            "## {}:{}:{}:{}:{}",
            config.media, config.fs, config.bench, nfg, config.iomode
        );
        if self.options.dry_run {
            return self.log(&marker);
        }

        self.prepare();
        let root = self.test_root.clone();
        if let Err(e) = self.mounter.mount(config.media, config.fs, &root) {
            warn!("mount failed: {}", e);
            return self.log(&format!("# Fail to mount {} on {}.", config.fs, config.media));
        }

        let (tool, _) = Tool::classify(config.bench);
        if tool != Tool::Fio {
            // fio logs a marker per job on its own
            self.log(&marker)?;
        }
        if let Err(e) = util::drop_cache() {
            warn!("failed to drop caches: {}", e);
        }
        let invocation = self.invocation(config, ncore, nfg, nbg)?;
        self.execute(&invocation)
    }

    /// Settles the system before a mount: lock statistics off, enough map
    /// areas for the benchmarks, clean caches.
    fn prepare(&self) {
        if let Err(e) = util::write_proc(LOCK_STAT, "0") {
            debug!("cannot reset lock_stat: {}", e);
        }
        if let Err(e) = util::write_proc("/proc/sys/vm/max_map_count", MAX_MAP_COUNT) {
            warn!("cannot raise max_map_count: {}", e);
        }
        if let Err(e) = util::drop_cache() {
            warn!("failed to drop caches: {}", e);
        }
        util::sync_all();
    }

    fn profile_log(&self, config: &RunConfig, nfg: usize) -> PathBuf {
        self.log_dir.join(format!(
            "{}.{}.{}.{}.pm",
            config.media, config.fs, config.bench, nfg
        ))
    }

    fn check_path(path: &Path) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(Error::invalid_arg(format!("Please verify if {:?} exists", path)))
        }
    }

    fn libfs_env(&self, fs: Filesystem) -> Result<Vec<(String, String)>> {
        let libfs = &self.config.libfs;
        let env = match fs {
            Filesystem::Splitfs => {
                let paths = [
                    ("LD_LIBRARY_PATH", util::resolve(&libfs.splitfs_library_path)),
                    ("NVP_TREE_FILE", util::resolve(&libfs.splitfs_tree_file)),
                    ("LD_PRELOAD", util::resolve(&libfs.splitfs_preload)),
                ];
                let mut env = Vec::new();
                for (key, path) in paths.iter() {
                    Self::check_path(path)?;
                    env.push((key.to_string(), path.display().to_string()));
                }
                env
            }
            Filesystem::Assise => vec![
                (
                    String::from("LD_PRELOAD"),
                    util::resolve(&libfs.assise_preload).display().to_string(),
                ),
                (String::from("MLFS_PROFILE"), String::from("1")),
            ],
            _ => Vec::new(),
        };
        Ok(env)
    }

    /// Builds the command line and environment for one configuration.
    pub fn invocation(&self, config: &RunConfig, ncore: usize, nfg: usize, nbg: usize) -> Result<Invocation> {
        let (tool, kind) = Tool::classify(config.bench);
        let tools = &self.config.tools;
        let delegation = self.options.delegation;
        let proflog = self.profile_log(config, nfg);
        let (profbegin, profend, mut env) = {
            let mut state = self.state.lock();
            state.profiler.env.log_file = proflog.clone();
            let env: Vec<(String, String)> = state
                .profiler
                .env
                .vars()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            (state.profiler.start_command(), state.profiler.stop_command(), env)
        };
        env.extend(self.libfs_env(config.fs)?);

        let root = self.test_root.display().to_string();
        let mut inv = match tool {
            Tool::Fxmark => {
                let mut directio = config.iomode == IoMode::Direct;
                if directio && config.fs == Filesystem::Tmpfs {
                    info!("DirectIO under tmpfs disabled by default");
                    directio = false;
                } else if directio {
                    info!("DirectIO Enabled");
                }
                let mut inv = Invocation::new(util::resolve(&tools.fxmark));
                inv.arg("type", kind)
                    .arg("ncore", ncore)
                    .arg("nbg", nbg)
                    .arg("duration", self.options.duration)
                    .arg("directio", flag(directio))
                    .arg("root", &root)
                    .arg("profbegin", &profbegin)
                    .arg("profend", &profend)
                    .arg("proflog", proflog.display())
                    .arg("filesys", config.fs)
                    .arg("pid", process::id())
                    .arg("pidfile", util::resolve(&tools.pid_file).display())
                    .arg("delegation_threads", delegation.threads)
                    .arg("delegation_sockets", delegation.sockets)
                    .arg("delegate", flag(delegation.delegate));
                inv
            }
            Tool::Filebench => {
                let mut inv = Invocation::new(util::resolve(&tools.run_filebench));
                inv.arg("type", kind)
                    .arg("ncore", ncore)
                    .arg("nsocket", config.nsocket)
                    .arg("duration", self.options.duration)
                    .arg("root", &root)
                    .arg("profbegin", &profbegin)
                    .arg("profend", &profend)
                    .arg("proflog", proflog.display())
                    .arg("delegation_threads", delegation.threads)
                    .arg("delegate", flag(delegation.delegate));
                inv
            }
            Tool::Fio => {
                let mut inv = Invocation::new(util::resolve(&tools.run_fio));
                inv.arg("type", kind)
                    .arg("ncore", ncore)
                    .arg("duration", self.options.duration)
                    .arg("root", &root)
                    .arg("profbegin", &profbegin)
                    .arg("profend", &profend)
                    .arg("proflog", proflog.display())
                    .arg("media", config.media)
                    .arg("fs", config.fs)
                    .arg("bench", config.bench)
                    .arg("nfg", nfg)
                    .arg("dio", config.iomode)
                    .arg("numa_cpu_node", self.numa.node_for(config.media))
                    .arg("delegation_threads", delegation.threads)
                    .arg("delegation_sockets", delegation.sockets)
                    .arg("delegate", flag(delegation.delegate));
                inv
            }
            Tool::Dbench => {
                let mut inv = Invocation::new(util::resolve(&tools.run_dbench));
                inv.arg("type", kind)
                    .arg("ncore", ncore)
                    .arg("duration", self.options.duration)
                    .arg("root", &root)
                    .arg("profbegin", &profbegin)
                    .arg("profend", &profend)
                    .arg("proflog", proflog.display());
                inv
            }
        };
        if let (Tool::Filebench, Some(path)) | (Tool::Fio, Some(path)) = (tool, &self.options.config_path) {
            inv.arg("config", path.display());
        }
        inv.env = env;
        Ok(inv)
    }

    /// Runs the benchmark to completion and copies its output into the log.
    fn execute(&mut self, inv: &Invocation) -> Result<()> {
        let mut cmd = inv.command();
        debug!("exec: {}", util::describe(&cmd));
        let start = Instant::now();
        let child = cmd.stdout(Stdio::piped()).stderr(Stdio::inherit()).spawn()?;
        self.state
            .set_active_child(Some(Pid::from_raw(child.id() as i32)));
        let output = child.wait_with_output();
        self.state.set_active_child(None);
        let output = output?;
        let elapsed = start.elapsed();
        info!(
            "Execution Time={}.{:06}",
            elapsed.as_secs(),
            elapsed.subsec_micros()
        );
        if !output.status.success() {
            warn!("{:?} exited with {}", inv.program, output.status);
        }
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            self.log(line.trim())?;
        }
        Ok(())
    }

    /// Restricts this process to the first `ncore` cores of the sequential
    /// order; 0 means every hardware thread.
    pub fn set_cpus(&mut self, ncore: usize) -> Result<()> {
        if self.active_ncore == Some(ncore) {
            return Ok(());
        }
        let cores = if ncore == 0 {
            &self.topology.seq_cores[..]
        } else {
            let n = std::cmp::min(ncore, self.topology.seq_cores.len());
            &self.topology.seq_cores[..n]
        };
        let mut set = CpuSet::new();
        for &cpu in cores {
            set.set(cpu)?;
        }
        sched_setaffinity(Pid::from_raw(0), &set)?;
        self.active_ncore = Some(ncore);
        Ok(())
    }

    fn remove_profile_logs(&self) {
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
            if path.extension().map_or(false, |ext| ext == "pm") {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("failed to remove {:?}: {}", path, e);
                }
            }
        }
    }

    fn cleanup(&mut self) {
        self.state.shield_interrupts();
        if let Some(mut log) = self.log.take() {
            if let Err(e) = log.out.flush() {
                error!("failed to flush {:?}: {}", log.path(), e);
            }
        }
        if self.options.dry_run {
            return;
        }

        if let Err(e) = self.state.lock().profiler.stop() {
            warn!("failed to stop profiler: {}", e);
        }
        self.remove_profile_logs();
        if let Err(e) = util::write_proc(LOCK_STAT, "0") {
            debug!("cannot reset lock_stat: {}", e);
        }
        let pid_file = util::resolve(&self.config.tools.pid_file);
        if pid_file.exists() {
            if let Err(e) = fs::remove_file(&pid_file) {
                warn!("failed to remove {:?}: {}", pid_file, e);
            }
        }
        if self.options.fs != "assise" {
            info!("Umount a testing file system. Please wait.");
            let root = self.test_root.clone();
            if let Err(e) = self.mounter.umount(&root) {
                error!("failed to unmount {:?}: {}", root, e);
            }
        }
        if let Err(e) = self.set_cpus(0) {
            warn!("failed to reset cpu affinity: {}", e);
        }
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Asks the operator twice whether the configured devices may be wiped.
pub fn confirm_media_paths<R: BufRead, W: Write>(
    devices: &DevicePaths,
    input: &mut R,
    output: &mut W,
) -> io::Result<bool> {
    let banner = "%".repeat(80);
    writeln!(output, "{}", banner)?;
    writeln!(output, "%% WARNING! WARNING! WARNING! WARNING! WARNING!")?;
    writeln!(output, "{}", banner)?;
    let names: Vec<String> = devices
        .all()
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let prompts = [
        format!("All data in {} will be deleted. Is it ok? [Y,N]: ", names.join(", ")),
        String::from("Are you sure? [Y,N]: "),
    ];
    for prompt in prompts.iter() {
        write!(output, "{}", prompt)?;
        output.flush()?;
        let mut answer = String::new();
        input.read_line(&mut answer)?;
        if answer.trim() != "Y" {
            writeln!(output, "Please, check the device paths in the harness config")?;
            return Ok(false);
        }
    }
    writeln!(output, "{}\n\n", banner)?;
    Ok(true)
}
