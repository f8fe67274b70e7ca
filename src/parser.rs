use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::util;

/// Names of the five fields of a `##` section marker.
pub const KEY_FIELDS: [&str; 5] = ["media", "fs", "bench", "ncore", "iomode"];

/// One result row together with the section it was logged under.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub key: Vec<String>,
    pub values: HashMap<String, String>,
}

impl Record {
    pub fn get(&self, column: &str) -> Result<&str> {
        self.values
            .get(column)
            .map(String::as_str)
            .ok_or_else(|| Error::parse("log", format!("{} has no {} column", self.key.join(":"), column)))
    }

    pub fn float(&self, column: &str) -> Result<f64> {
        let value = self.get(column)?;
        value
            .parse()
            .map_err(|_| Error::parse("log", format!("{} is not a number: {:?}", column, value)))
    }
}

/// Reads result logs back into `###` settings and keyed records.
#[derive(Debug, Default)]
pub struct LogParser {
    config: HashMap<String, String>,
    records: Vec<Record>,
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a log file, or every regular file of a directory in name order.
    pub fn parse_path(&mut self, path: &Path) -> Result<()> {
        if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            for file in files {
                debug!("parsing {:?}", file);
                self.parse_str(&fs::read_to_string(&file)?);
            }
        } else {
            self.parse_str(&fs::read_to_string(path)?);
        }
        Ok(())
    }

    pub fn parse_str(&mut self, text: &str) {
        let mut key: Option<Vec<String>> = None;
        let mut header: Vec<String> = Vec::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.starts_with("###") {
                let setting = line.trim_start_matches('#');
                if let Some(idx) = setting.find('=') {
                    self.config.insert(
                        setting[..idx].trim().to_string(),
                        setting[idx + 1..].trim().to_string(),
                    );
                }
            } else if line.starts_with("##") {
                let fields: Vec<String> = line
                    .trim_start_matches('#')
                    .trim()
                    .split(':')
                    .map(String::from)
                    .collect();
                header.clear();
                if fields.len() == KEY_FIELDS.len() {
                    key = Some(fields);
                } else {
                    warn!("ignoring malformed section marker {:?}", line);
                    key = None;
                }
            } else if line.starts_with('#') {
                let rest = line.trim_start_matches('#').trim();
                if rest.starts_with("ncpu") {
                    header = rest.split_whitespace().map(String::from).collect();
                }
            } else if let Some(ref key) = key {
                if header.is_empty() {
                    continue;
                }
                let values = header
                    .iter()
                    .cloned()
                    .zip(line.split_whitespace().map(String::from))
                    .collect();
                self.records.push(Record {
                    key: key.clone(),
                    values,
                });
            }
        }
    }

    pub fn config(&self, name: &str) -> Option<&str> {
        self.config.get(name).map(String::as_str)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Records whose key matches `pattern` field by field; `*` matches
    /// anything. Log order is kept.
    pub fn search(&self, pattern: &[&str]) -> Vec<&Record> {
        self.records
            .iter()
            .filter(|r| {
                pattern
                    .iter()
                    .zip(r.key.iter())
                    .all(|(p, k)| *p == "*" || *p == k.as_str())
            })
            .collect()
    }
}

/// Parses `"50.000000%=12.3"`, insisting on the expected label.
pub fn parse_latency(field: &str, expected: &str) -> Result<f64> {
    let mut parts = field.splitn(2, '=');
    let name = parts.next().unwrap_or("");
    let value = parts
        .next()
        .ok_or_else(|| Error::parse("log", format!("latency without value: {:?}", field)))?;
    if name != expected {
        return Err(Error::LatencyLabel {
            expected: expected.to_string(),
            found: name.to_string(),
        });
    }
    value
        .parse()
        .map_err(|_| Error::parse("log", format!("latency is not a number: {:?}", value)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlotKind {
    Filebench,
    Fio,
    Fxmark,
}

impl FromStr for PlotKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "filebench" => PlotKind::Filebench,
            "fio" => PlotKind::Fio,
            _ => PlotKind::Fxmark,
        })
    }
}

/// Distinct values seen for each key field, sorted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeySpace {
    pub media: Vec<String>,
    pub fs: Vec<String>,
    pub bench: Vec<String>,
    pub ncore: Vec<String>,
    pub iomode: Vec<String>,
}

/// Turns a parsed log into one `.dat` file per (media, fs, bench, iomode).
pub struct Plotter {
    parser: LogParser,
    ncore: usize,
    pub excluded_fs: Vec<String>,
}

impl Plotter {
    pub fn new(parser: LogParser) -> Result<Self> {
        let setting = |name: &str| -> Result<usize> {
            let value = parser
                .config(name)
                .ok_or_else(|| Error::parse("log", format!("missing ### {}", name)))?;
            value
                .parse()
                .map_err(|_| Error::parse("log", format!("{} is not a number: {:?}", name, value)))
        };
        let ncore = setting("PHYSICAL_CHIPS")? * setting("CORE_PER_CHIP")?;
        Ok(Plotter {
            parser,
            ncore,
            excluded_fs: Vec::new(),
        })
    }

    pub fn key_space(&self) -> KeySpace {
        let mut sets: Vec<BTreeSet<&str>> = vec![BTreeSet::new(); KEY_FIELDS.len()];
        for record in self.parser.records() {
            for (set, field) in sets.iter_mut().zip(record.key.iter()) {
                set.insert(field.as_str());
            }
        }
        let mut lists = sets
            .into_iter()
            .map(|s| s.into_iter().map(String::from).collect::<Vec<_>>());
        let mut next = || lists.next().unwrap_or_default();
        KeySpace {
            media: next(),
            fs: next(),
            bench: next(),
            ncore: next(),
            iomode: next(),
        }
    }

    /// Filesystems with data for (media, bench, iomode), sorted.
    pub fn fs_list(&self, media: &str, bench: &str, iomode: &str) -> Vec<String> {
        let fs: BTreeSet<&str> = self
            .parser
            .search(&[media, "*", bench, "*", iomode])
            .into_iter()
            .map(|r| r.key[1].as_str())
            .filter(|fs| !self.excluded_fs.iter().any(|e| e.as_str() == *fs))
            .collect();
        fs.into_iter().map(String::from).collect()
    }

    pub fn format_row(kind: PlotKind, bench: &str, record: &Record) -> Result<String> {
        let ncpu = record.get("ncpu")?;
        let row = match kind {
            PlotKind::Filebench if bench == "filebench_videoserver" => format!(
                "{} {:?} {:?}",
                ncpu,
                record.float("read_bw")?,
                record.float("write_bw")?
            ),
            PlotKind::Fio => {
                let dir = if bench.contains("read") { "read" } else { "write" };
                format!(
                    "{} {:?} {:?} {:?}",
                    ncpu,
                    record.float(&format!("{}_bandwidth", dir))?,
                    parse_latency(record.get(&format!("{}_50_latency", dir))?, "50.000000%")?,
                    parse_latency(record.get(&format!("{}_99_latency", dir))?, "99.000000%")?
                )
            }
            PlotKind::Filebench | PlotKind::Fxmark => {
                format!("{} {:?}", ncpu, record.float("works/sec")?)
            }
        };
        Ok(row)
    }

    fn write_file(&self, path: &Path, key: [&str; 4], kind: PlotKind) -> Result<()> {
        let [media, fs, bench, iomode] = key;
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "# {}:{}:{}:{}:*", media, fs, bench, iomode)?;
        for record in self.parser.search(&[media, fs, bench, "*", iomode]) {
            let ncpu: usize = record
                .get("ncpu")?
                .parse()
                .map_err(|_| Error::parse("log", "ncpu is not a number"))?;
            if ncpu > self.ncore {
                break;
            }
            writeln!(out, "{}", Self::format_row(kind, bench, record)?)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Writes every data file into `out_dir` and returns their paths.
    pub fn write_data(&self, out_dir: &Path, kind: PlotKind) -> Result<Vec<PathBuf>> {
        util::mkdir(out_dir)?;
        let space = self.key_space();
        let mut written = Vec::new();
        for media in &space.media {
            for bench in &space.bench {
                for iomode in &space.iomode {
                    for fs in self.fs_list(media, bench, iomode) {
                        let path = out_dir.join(format!("{}:{}:{}:{}.dat", media, fs, bench, iomode));
                        self.write_file(&path, [media.as_str(), fs.as_str(), bench.as_str(), iomode.as_str()], kind)?;
                        debug!("wrote {:?}", path);
                        written.push(path);
                    }
                }
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
### SYSTEM = Linux test 5.1.0
### PHYSICAL_CHIPS = 1
### CORE_PER_CHIP = 4
## pmem-local:ext4:DRBL:4:bufferedio
# ncpu secs works works/sec real.sec user.sec
4 30 1000 33.3 30 1
## pmem-local:ext4:DRBL:2:bufferedio
# ncpu secs works works/sec real.sec user.sec
2 30 500 16.5 30 1
## pmem-local:nova:DRBL:8:bufferedio
# ncpu secs works works/sec real.sec user.sec
8 30 9000 300.0 30 1
## pmem-local:tmpfs:DRBL:1:directio
# Fail to mount tmpfs on pmem-local.
### NUM_TEST_CONF = 4
";

    fn parsed() -> LogParser {
        let mut parser = LogParser::new();
        parser.parse_str(LOG);
        parser
    }

    #[test]
    fn settings_and_records() {
        let parser = parsed();
        assert_eq!(parser.config("PHYSICAL_CHIPS"), Some("1"));
        assert_eq!(parser.config("NUM_TEST_CONF"), Some("4"));
        assert_eq!(parser.records().len(), 3);
        let first = &parser.records()[0];
        assert_eq!(first.key, vec!["pmem-local", "ext4", "DRBL", "4", "bufferedio"]);
        assert_eq!(first.get("works/sec").expect("column"), "33.3");
    }

    #[test]
    fn search_with_wildcards_keeps_log_order() {
        let parser = parsed();
        let found = parser.search(&["pmem-local", "ext4", "*", "*", "bufferedio"]);
        let ncpus: Vec<&str> = found.iter().map(|r| r.get("ncpu").expect("ncpu")).collect();
        assert_eq!(ncpus, vec!["4", "2"]);
        assert!(parser.search(&["nvme", "*", "*", "*", "*"]).is_empty());
    }

    #[test]
    fn key_space_is_sorted_and_distinct() {
        let plotter = Plotter::new(parsed()).expect("plotter");
        let space = plotter.key_space();
        assert_eq!(space.fs, vec!["ext4", "nova"]);
        assert_eq!(space.ncore, vec!["2", "4", "8"]);
        assert_eq!(space.iomode, vec!["bufferedio"]);
    }

    #[test]
    fn excluded_filesystems_are_dropped() {
        let mut plotter = Plotter::new(parsed()).expect("plotter");
        assert_eq!(plotter.fs_list("pmem-local", "DRBL", "bufferedio"), vec!["ext4", "nova"]);
        plotter.excluded_fs.push(String::from("nova"));
        assert_eq!(plotter.fs_list("pmem-local", "DRBL", "bufferedio"), vec!["ext4"]);
    }

    #[test]
    fn data_files_stop_past_physical_cores() {
        let tmp = tempdir::TempDir::new("fxrunner-parser").expect("failed to create tempdir");
        let plotter = Plotter::new(parsed()).expect("plotter");
        let written = plotter.write_data(tmp.path(), PlotKind::Fxmark).expect("data files");
        assert_eq!(written.len(), 2);

        let ext4 = fs::read_to_string(tmp.path().join("pmem-local:ext4:DRBL:bufferedio.dat"))
            .expect("ext4 data");
        assert_eq!(ext4, "# pmem-local:ext4:DRBL:bufferedio:*\n4 33.3\n2 16.5\n");

        // 8 cores on a 4-core machine: header only
        let nova = fs::read_to_string(tmp.path().join("pmem-local:nova:DRBL:bufferedio.dat"))
            .expect("nova data");
        assert_eq!(nova, "# pmem-local:nova:DRBL:bufferedio:*\n");
    }

    #[test]
    fn missing_topology_settings_are_an_error() {
        let mut parser = LogParser::new();
        parser.parse_str("## a:b:c:1:d\n# ncpu works/sec\n1 2\n");
        assert!(Plotter::new(parser).is_err());
    }

    #[test]
    fn latency_labels_are_checked() {
        assert_eq!(parse_latency("50.000000%=12.3", "50.000000%").expect("latency"), 12.3);
        match parse_latency("99.000000%=12.3", "50.000000%") {
            Err(Error::LatencyLabel { expected, found }) => {
                assert_eq!(expected, "50.000000%");
                assert_eq!(found, "99.000000%");
            }
            other => panic!("expected a label mismatch, got {:?}", other),
        }
        assert!(parse_latency("50.000000%", "50.000000%").is_err());
    }

    #[test]
    fn rows_per_plot_kind() {
        let mut parser = LogParser::new();
        parser.parse_str(
            "## m:f:filebench_videoserver:2:bufferedio\n\
             # ncpu secs read_bw write_bw\n\
             2 30 250.5 12\n\
             ## m:f:seq-write-4K:2:bufferedio\n\
             # ncpu secs read_iops write_iops read_bandwidth write_bandwidth read_50_latency read_99_latency write_50_latency write_99_latency\n\
             2 30 0 100 0 4000 0%=0 0%=0 50.000000%=7 99.000000%=21.5\n",
        );
        let records = parser.records();
        assert_eq!(
            Plotter::format_row(PlotKind::Filebench, "filebench_videoserver", &records[0])
                .expect("row"),
            "2 250.5 12.0"
        );
        assert_eq!(
            Plotter::format_row(PlotKind::Fio, "seq-write-4K", &records[1]).expect("row"),
            "2 4000.0 7.0 21.5"
        );
        assert!(Plotter::format_row(PlotKind::Fio, "seq-read-4K", &records[1]).is_err());
    }
}
