use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use nix::sys::signal::{kill, SigSet, Signal};
use nix::unistd::Pid;

use crate::error::Result;

/// Environment the profiler scripts read their settings from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfileEnv {
    pub level: u32,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
}

impl ProfileEnv {
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PERFMON_LEVEL", self.level.to_string()),
            ("PERFMON_LDIR", self.log_dir.display().to_string()),
            ("PERFMON_LFILE", self.log_file.display().to_string()),
        ]
    }
}

/// The `perfmon` profiler, run as a child of this process between a start
/// and a stop request.
#[derive(Debug)]
pub struct Profiler {
    script: PathBuf,
    pub env: ProfileEnv,
    child: Option<Child>,
}

impl Profiler {
    pub fn new(script: PathBuf, env: ProfileEnv) -> Self {
        Profiler {
            script,
            env,
            child: None,
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Command lines handed to benchmarks that drive the profiler themselves.
    pub fn start_command(&self) -> String {
        format!("{} start", self.script.display())
    }

    pub fn stop_command(&self) -> String {
        format!("{} stop", self.script.display())
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    fn command(&self, action: &str) -> Command {
        let mut cmd = Command::new(&self.script);
        cmd.arg(action).stdout(Stdio::null()).envs(self.env.vars());
        cmd
    }

    pub fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            debug!("profiler already running");
            return Ok(());
        }
        let child = self.command("start").spawn()?;
        debug!("profiler started as {}", child.id());
        self.child = Some(child);
        Ok(())
    }

    /// Interrupts the running profiler, waits for it and runs `stop` so it
    /// flushes its log. Without a running profiler this does nothing.
    pub fn stop(&mut self) -> Result<()> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };
        let pid = Pid::from_raw(child.id() as i32);
        if let Err(e) = kill(pid, Signal::SIGINT) {
            // already gone; reaped below
            debug!("profiler {} did not take SIGINT: {}", pid, e);
        }
        child.wait()?;
        let status = self.command("stop").status()?;
        if !status.success() {
            warn!("`{}` exited with {}", self.stop_command(), status);
        }
        Ok(())
    }
}

/// State shared between the sweep and the signal watcher.
#[derive(Debug)]
pub struct RunState {
    pub profiler: Profiler,
    /// Benchmark process to acknowledge a profiler stop to.
    pub active_child: Option<Pid>,
    pub interrupted: bool,
    /// Set once cleanup starts; interrupts are only reported from then on.
    pub shielded: bool,
}

#[derive(Clone, Debug)]
pub struct SharedState(Arc<Mutex<RunState>>);

impl SharedState {
    pub fn new(profiler: Profiler) -> Self {
        SharedState(Arc::new(Mutex::new(RunState {
            profiler,
            active_child: None,
            interrupted: false,
            shielded: false,
        })))
    }

    pub fn lock(&self) -> MutexGuard<RunState> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn interrupted(&self) -> bool {
        self.lock().interrupted
    }

    pub fn set_active_child(&self, pid: Option<Pid>) {
        self.lock().active_child = pid;
    }

    pub fn shield_interrupts(&self) {
        self.lock().shielded = true;
    }

    /// Reacts to one signal received by the watcher.
    pub fn handle(&self, signal: Signal) {
        let mut state = self.lock();
        match signal {
            Signal::SIGUSR1 => {
                if let Err(e) = state.profiler.start() {
                    error!("failed to start profiler: {}", e);
                }
            }
            Signal::SIGUSR2 => {
                if let Err(e) = state.profiler.stop() {
                    error!("failed to stop profiler: {}", e);
                }
                if let Some(pid) = state.active_child {
                    if let Err(e) = kill(pid, Signal::SIGUSR2) {
                        warn!("failed to notify {}: {}", pid, e);
                    }
                }
            }
            Signal::SIGINT => {
                if state.shielded {
                    eprintln!("Umount a testing file system. Please wait.");
                } else {
                    warn!("interrupted, stopping after the current run");
                    state.interrupted = true;
                }
            }
            other => debug!("ignoring {:?}", other),
        }
    }
}

fn watched() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGUSR1);
    set.add(Signal::SIGUSR2);
    set.add(Signal::SIGINT);
    set
}

/// Blocks the profiler and interrupt signals in the calling thread (and the
/// threads it spawns afterwards) and hands them to a watcher thread instead.
/// Must run before any other thread is started.
pub fn spawn_signal_watcher(state: SharedState) -> Result<JoinHandle<()>> {
    let set = watched();
    set.thread_block()?;
    let handle = thread::Builder::new()
        .name(String::from("signal-watcher"))
        .spawn(move || loop {
            match set.wait() {
                Ok(signal) => state.handle(signal),
                Err(e) => {
                    error!("sigwait failed: {}", e);
                    return;
                }
            }
        })?;
    Ok(handle)
}
