use std::fs::{self, File};
use std::io::prelude::*;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempdir::TempDir;

use crate::adapter::{self, ProfileHooks};
use crate::error::{Error, Result};
use crate::util;

const PERF_STR: &str = "IO Summary: ";
const VIDEO_READ_STR: &str = "vidreader";
const VIDEO_WRITE_STR: &str = "newvid";
const BANDWIDTH_UNIT: &str = "mb/s";
const PRE_SCRIPT: &str = "turnoff-aslr";

/// One filebench run as requested by the dispatcher.
#[derive(Clone, Debug)]
pub struct FilebenchJob {
    pub workload: String,
    pub ncore: usize,
    pub nsocket: usize,
    pub duration: u64,
    pub root: PathBuf,
    pub dthreads: usize,
    pub delegate: bool,
    pub cores_per_chip: usize,
    pub workload_dir: PathBuf,
}

/// What filebench reported, reduced to the numbers the harness keeps.
#[derive(Clone, Debug, PartialEq)]
pub enum Summary {
    Ops { work: String, work_sec: String },
    Video { read_bw: String, write_bw: String },
}

/// Watches filebench output for the summary markers of one workload.
#[derive(Debug)]
pub struct Scanner {
    video: bool,
    perf: Option<String>,
    video_read: Option<String>,
    video_write: Option<String>,
}

impl Scanner {
    pub fn new(workload: &str) -> Self {
        Scanner {
            video: workload == "videoserver",
            perf: None,
            video_read: None,
            video_write: None,
        }
    }

    /// Feeds one line of output; true once every marker has been seen.
    pub fn feed(&mut self, line: &str) -> bool {
        if self.done() {
            return true;
        }
        if self.video {
            let marker = if self.video_read.is_some() {
                VIDEO_WRITE_STR
            } else {
                VIDEO_READ_STR
            };
            if let Some(idx) = line.find(marker) {
                let msg = line[idx + marker.len()..].to_string();
                if self.video_read.is_some() {
                    self.video_write = Some(msg);
                } else {
                    self.video_read = Some(msg);
                }
            }
        } else if let Some(idx) = line.find(PERF_STR) {
            self.perf = Some(line[idx + PERF_STR.len()..].to_string());
        }
        self.done()
    }

    pub fn done(&self) -> bool {
        if self.video {
            self.video_read.is_some() && self.video_write.is_some()
        } else {
            self.perf.is_some()
        }
    }

    pub fn summary(&self) -> Result<Summary> {
        if self.video {
            match (&self.video_read, &self.video_write) {
                (Some(read), Some(write)) => Ok(Summary::Video {
                    read_bw: video_bandwidth(read)?,
                    write_bw: video_bandwidth(write)?,
                }),
                _ => Err(Error::parse("filebench", "missing videoserver summary")),
            }
        } else {
            match self.perf {
                Some(ref msg) => ops_summary(msg),
                None => Err(Error::parse("filebench", "missing IO Summary")),
            }
        }
    }
}

// 32.027: IO Summary: 9524462 ops 317409.718 ops/s 28855/57715 rd/wr 7608.5mb/s 0.470ms/op
fn ops_summary(msg: &str) -> Result<Summary> {
    let mut work = String::from("0");
    let mut work_sec = String::from("0");
    for item in msg.split(',') {
        let vk: Vec<&str> = item.split_whitespace().collect();
        if vk.len() < 4 {
            return Err(Error::parse("filebench", format!("short summary {:?}", item.trim())));
        }
        if vk[1] == "ops" {
            work = vk[0].to_string();
        }
        if vk[3] == "ops/s" {
            work_sec = vk[2].to_string();
        }
    }
    Ok(Summary::Ops { work, work_sec })
}

fn video_bandwidth(msg: &str) -> Result<String> {
    let mut bw = String::from("0");
    for item in msg.split(',') {
        let vk: Vec<&str> = item.split_whitespace().collect();
        let field = vk
            .get(2)
            .ok_or_else(|| Error::parse("filebench", format!("short video line {:?}", item.trim())))?;
        if field.ends_with(BANDWIDTH_UNIT) {
            bw = field[..field.len() - BANDWIDTH_UNIT.len()].to_string();
        }
    }
    Ok(bw)
}

impl FilebenchJob {
    pub fn template(&self) -> PathBuf {
        self.workload_dir.join(format!("{}.f", self.workload))
    }

    /// `set` lines sizing the workload and pointing it at the test root.
    pub fn workload_params(&self) -> Result<Vec<String>> {
        let mut params = match self.workload.as_str() {
            "fileserver" | "varmail" | "webserver" => vec![format!("set $nthreads={}", self.ncore)],
            "videoserver" => {
                let wthreads = self.nsocket;
                let rthreads = self.ncore.saturating_sub(wthreads);
                vec![
                    format!("set $wthreads={}", wthreads),
                    format!("set $rthreads={}", rthreads),
                ]
            }
            other => {
                return Err(Error::invalid_arg(format!("unknown filebench workload {}", other)))
            }
        };
        params.push(format!("set $dir={}", self.root.display()));
        Ok(params)
    }

    pub fn generate_config(&self) -> Result<String> {
        let template = self.template();
        if !template.is_file() {
            return Err(Error::MissingTemplate(template));
        }
        let mut config = String::from("# auto generated by fxrunner\n");
        for line in self.workload_params()? {
            config.push_str(&line);
            config.push('\n');
        }
        config.push_str(&fs::read_to_string(&template)?);
        if !config.ends_with('\n') {
            config.push('\n');
        }
        config.push_str(&format!("run {}\n", self.duration));
        Ok(config)
    }

    fn command(&self, config: &Path) -> Command {
        let mut cmd = if self.delegate {
            let ranges = adapter::cpu_ranges(self.cores_per_chip, self.nsocket, self.dthreads);
            info!("taskset -a -c {}", ranges);
            let mut cmd = Command::new("taskset");
            cmd.args(&["-a", "-c"]).arg(ranges).arg("filebench");
            cmd
        } else {
            Command::new("filebench")
        };
        cmd.arg("-f").arg(config);
        cmd
    }

    pub fn run(&self, hooks: &ProfileHooks) -> Result<Summary> {
        let config = self.generate_config()?;
        let tmp = TempDir::new("fxrunner-filebench")?;
        let config_path = tmp.path().join(format!("{}.f", self.workload));
        File::create(&config_path)?.write_all(config.as_bytes())?;

        if let Err(e) = util::run_quiet(&mut Command::new(util::resolve(PRE_SCRIPT))) {
            debug!("{} not run: {}", PRE_SCRIPT, e);
        }
        util::sync_all();

        hooks.begin();
        let result = self.run_filebench(&config_path);
        hooks.end();
        result
    }

    fn run_filebench(&self, config: &Path) -> Result<Summary> {
        let mut cmd = self.command(config);
        debug!("exec: {}", util::describe(&cmd));
        let mut child = cmd.stdout(Stdio::piped()).spawn()?;
        let mut scanner = Scanner::new(&self.workload);
        if let Some(stdout) = child.stdout.take() {
            // keep draining after the summary so filebench can shut down
            for line in BufReader::new(stdout).lines() {
                let line = line?;
                debug!("#@ {}", line);
                scanner.feed(&line);
            }
        }
        let status = child.wait()?;
        if !status.success() {
            warn!("filebench exited with {}", status);
        }
        scanner.summary()
    }

    /// The `# ncpu secs ...` header and result row for `summary`.
    pub fn report(&self, summary: &Summary, profile: &(String, String)) -> (String, String) {
        let ncore = self.ncore.to_string();
        let duration = self.duration.to_string();
        let profile_name = profile.0.as_str();
        let profile_data = profile.1.as_str();
        match *summary {
            Summary::Video {
                ref read_bw,
                ref write_bw,
            } => (
                adapter::row(&["# ncpu secs read_bw write_bw", profile_name]),
                adapter::row(&[
                    ncore.as_str(),
                    duration.as_str(),
                    read_bw.as_str(),
                    write_bw.as_str(),
                    profile_data,
                ]),
            ),
            Summary::Ops {
                ref work,
                ref work_sec,
            } => (
                adapter::row(&["# ncpu secs works works/sec", profile_name]),
                adapter::row(&[
                    ncore.as_str(),
                    duration.as_str(),
                    work.as_str(),
                    work_sec.as_str(),
                    profile_data,
                ]),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(workload: &str, dir: &Path) -> FilebenchJob {
        FilebenchJob {
            workload: workload.to_string(),
            ncore: 8,
            nsocket: 2,
            duration: 30,
            root: PathBuf::from("/mnt/root"),
            dthreads: 0,
            delegate: false,
            cores_per_chip: 4,
            workload_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn io_summary_is_parsed_by_position() {
        let mut scanner = Scanner::new("varmail");
        assert!(!scanner.feed("0.001: Allocated 177MB of shared memory"));
        assert!(scanner.feed(
            "32.027: IO Summary: 9524462 ops 317409.718 ops/s 28855/57715 rd/wr 7608.5mb/s 0.470ms/op"
        ));
        assert_eq!(
            scanner.summary().expect("summary"),
            Summary::Ops {
                work: String::from("9524462"),
                work_sec: String::from("317409.718"),
            }
        );
    }

    #[test]
    fn videoserver_needs_reader_then_writer() {
        let mut scanner = Scanner::new("videoserver");
        assert!(!scanner.feed("newvid 10ops 1ops/s 5.0mb/s 1.0ms/op"));
        assert!(!scanner.feed("vidreader 100ops 10ops/s 250.5mb/s 2.0ms/op"));
        assert!(scanner.feed("newvid 10ops 1ops/s 12.0mb/s 1.0ms/op"));
        assert_eq!(
            scanner.summary().expect("summary"),
            Summary::Video {
                read_bw: String::from("250.5"),
                write_bw: String::from("12.0"),
            }
        );
    }

    #[test]
    fn missing_summary_is_an_error() {
        let scanner = Scanner::new("fileserver");
        assert!(scanner.summary().is_err());
        let mut scanner = Scanner::new("fileserver");
        scanner.feed("IO Summary: garbage");
        assert!(scanner.summary().is_err());
    }

    #[test]
    fn config_wraps_template() {
        let tmp = TempDir::new("fxrunner-filebench").expect("failed to create tempdir");
        fs::write(tmp.path().join("videoserver.f"), "define fileset name=videos\n")
            .expect("failed to write template");
        let config = job("videoserver", tmp.path())
            .generate_config()
            .expect("config");
        assert_eq!(
            config,
            "# auto generated by fxrunner\n\
             set $wthreads=2\n\
             set $rthreads=6\n\
             set $dir=/mnt/root\n\
             define fileset name=videos\n\
             run 30\n"
        );
    }

    #[test]
    fn missing_template_is_reported() {
        let tmp = TempDir::new("fxrunner-filebench").expect("failed to create tempdir");
        match job("varmail", tmp.path()).generate_config() {
            Err(Error::MissingTemplate(path)) => assert!(path.ends_with("varmail.f")),
            other => panic!("expected a missing template, got {:?}", other),
        }
    }

    #[test]
    fn unknown_workload_is_rejected() {
        let tmp = TempDir::new("fxrunner-filebench").expect("failed to create tempdir");
        assert!(job("oltp", tmp.path()).workload_params().is_err());
    }

    #[test]
    fn report_appends_profile() {
        let tmp = TempDir::new("fxrunner-filebench").expect("failed to create tempdir");
        let job = job("varmail", tmp.path());
        let summary = Summary::Ops {
            work: String::from("100"),
            work_sec: String::from("3.3"),
        };
        let (header, row) = job.report(&summary, &(String::new(), String::new()));
        assert_eq!(header, "# ncpu secs works works/sec");
        assert_eq!(row, "8 30 100 3.3");
        let (header, row) = job.report(&summary, &(String::from("cycles"), String::from("42")));
        assert_eq!(header, "# ncpu secs works works/sec cycles");
        assert_eq!(row, "8 30 100 3.3 42");
    }
}
