//! Pieces shared by the `run-filebench` and `run-fio` adapters.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::util;

const PROFILE_VARS: &[&str] = &["PERFMON_LEVEL", "PERFMON_LDIR", "PERFMON_LFILE"];

/// Profiler start/stop command lines as handed over by the dispatcher,
/// run with the `PERFMON_*` settings inherited from it.
#[derive(Clone, Debug)]
pub struct ProfileHooks {
    pub begin: String,
    pub end: String,
    pub log: PathBuf,
    env: Vec<(&'static str, String)>,
}

impl ProfileHooks {
    pub fn new(begin: &str, end: &str, log: &Path) -> Self {
        let env = PROFILE_VARS
            .iter()
            .map(|&key| (key, env::var(key).unwrap_or_else(|_| String::from("x"))))
            .collect();
        ProfileHooks {
            begin: begin.to_string(),
            end: end.to_string(),
            log: log.to_path_buf(),
            env,
        }
    }

    pub fn begin(&self) {
        self.exec(&self.begin);
    }

    pub fn end(&self) {
        self.exec(&self.end);
    }

    fn exec(&self, line: &str) {
        match util::run_shell(line, &self.env) {
            Ok(true) => {}
            Ok(false) => warn!("profiler hook `{}` failed", line),
            Err(e) => warn!("failed to run profiler hook `{}`: {}", line, e),
        }
    }

    /// Column names and values the profiler left in its log, if it wrote
    /// both lines.
    pub fn report(&self) -> (String, String) {
        read_profile(&self.log)
    }
}

pub fn read_profile(path: &Path) -> (String, String) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return (String::new(), String::new()),
    };
    let mut lines = text.lines();
    match (lines.next(), lines.next()) {
        (Some(name), Some(data)) => (name.trim().to_string(), data.trim().to_string()),
        _ => (String::new(), String::new()),
    }
}

/// Space-joins the fields of a result line, leaving out empty ones.
pub fn row(fields: &[&str]) -> String {
    fields
        .iter()
        .filter(|f| !f.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `taskset -c` ranges for the first `nsocket` sockets, skipping the
/// `dthreads` delegation cores at the start of each.
pub fn cpu_ranges(cores_per_chip: usize, nsocket: usize, dthreads: usize) -> String {
    (1..=nsocket)
        .map(|i| {
            let begin = cores_per_chip * (i - 1) + dthreads;
            let end = cores_per_chip * i - 1;
            format!("{}-{}", begin, end)
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a numeric command line value, naming the option on failure.
pub fn parse_arg<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_arg(format!("--{} expects a number, got {:?}", name, value)))
}

/// `--delegate` and friends are passed as `0`/`1` or `True`/`False`.
pub fn parse_flag(value: &str) -> bool {
    match value.trim() {
        "1" | "True" | "true" => true,
        _ => false,
    }
}
