use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::benchmark::{BACKGROUND_SUFFIX, BENCH_TYPES, BLACKLIST};
use crate::error::{Error, Result};
use crate::filesystem::Filesystem;
use crate::media::Media;
use crate::topology::CpuTopology;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoMode {
    Buffered,
    Direct,
}

impl IoMode {
    pub const ALL: &'static [IoMode] = &[IoMode::Buffered, IoMode::Direct];

    pub fn name(self) -> &'static str {
        match self {
            IoMode::Buffered => "bufferedio",
            IoMode::Direct => "directio",
        }
    }
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IoMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        IoMode::ALL
            .iter()
            .cloned()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::invalid_arg(format!("unknown io mode {}", s)))
    }
}

/// One field of a run filter: `*`, or a pattern that matches a value when
/// it is equal to it or matches a prefix of it as a regex.
#[derive(Clone, Debug)]
pub enum FieldPattern {
    Any,
    Pattern { literal: String, regex: Regex },
}

impl FieldPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern == "*" {
            return Ok(FieldPattern::Any);
        }
        Ok(FieldPattern::Pattern {
            literal: pattern.to_string(),
            regex: Regex::new(&format!("^(?:{})", pattern))?,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        match *self {
            FieldPattern::Any => true,
            FieldPattern::Pattern {
                ref literal,
                ref regex,
            } => value == "*" || literal == value || regex.is_match(value),
        }
    }

    pub fn literal(&self) -> &str {
        match *self {
            FieldPattern::Any => "*",
            FieldPattern::Pattern { ref literal, .. } => literal,
        }
    }
}

/// Background delegation threads some filesystems run on reserved cores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delegation {
    /// Delegation threads per delegation socket.
    pub threads: usize,
    /// Sockets hosting delegation threads; also the pmem stripe width.
    pub sockets: usize,
    /// Shrink the application core counts by the reserved cores.
    pub rcore: bool,
    /// Keep application threads off the reserved cores.
    pub delegate: bool,
}

impl Delegation {
    /// The delegation footprint that core-count derivation accounts for.
    pub fn reserved(&self) -> (usize, usize) {
        if self.rcore {
            (self.threads, self.sockets)
        } else {
            (0, 0)
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunFilter {
    pub media: FieldPattern,
    pub fs: FieldPattern,
    pub bench: FieldPattern,
    pub ncore: FieldPattern,
    pub iomode: FieldPattern,
    pub delegation: Delegation,
}

impl RunFilter {
    pub fn new(
        media: &str,
        fs: &str,
        bench: &str,
        ncore: &str,
        iomode: &str,
        delegation: Delegation,
    ) -> Result<Self> {
        Ok(RunFilter {
            media: FieldPattern::new(media)?,
            fs: FieldPattern::new(fs)?,
            bench: FieldPattern::new(bench)?,
            ncore: FieldPattern::new(ncore)?,
            iomode: FieldPattern::new(iomode)?,
            delegation,
        })
    }

    pub fn any() -> Self {
        RunFilter {
            media: FieldPattern::Any,
            fs: FieldPattern::Any,
            bench: FieldPattern::Any,
            ncore: FieldPattern::Any,
            iomode: FieldPattern::Any,
            delegation: Delegation::default(),
        }
    }

    pub fn matches(&self, media: &str, fs: &str, bench: &str, ncore: &str, iomode: &str) -> bool {
        self.media.matches(media)
            && self.fs.matches(fs)
            && self.bench.matches(bench)
            && self.ncore.matches(ncore)
            && self.iomode.matches(iomode)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CoreCount {
    pub ncore: usize,
    pub nsocket: usize,
}

/// Core counts to sweep, ascending.
///
/// A numeric `hint` selects exactly that count. Otherwise socket 1
/// contributes powers of two up to its non-delegation cores, and every further
/// socket adds one count covering all sockets so far.
pub fn core_counts(topology: &CpuTopology, hint: &str, delegation: &Delegation) -> Result<Vec<CoreCount>> {
    if !hint.is_empty() && hint.chars().all(|c| c.is_ascii_digit()) {
        let max = topology.physical_cores();
        let invalid = || Error::InvalidCoreHint {
            hint: hint.to_string(),
            max,
        };
        let ncore: usize = hint.parse().map_err(|_| invalid())?;
        if ncore == 0 || ncore > max {
            return Err(invalid());
        }
        return Ok(vec![CoreCount { ncore, nsocket: 1 }]);
    }

    let (threads, sockets) = delegation.reserved();
    let per_chip = topology.cores_per_chip;
    let mut counts = Vec::new();
    for socket in 1..=topology.physical_chips {
        if socket == 1 {
            let remain = per_chip.saturating_sub(threads);
            let mut n = 1;
            while n < remain {
                counts.push(CoreCount { ncore: n, nsocket: socket });
                n *= 2;
            }
            counts.push(CoreCount { ncore: remain, nsocket: socket });
        } else if socket <= sockets {
            counts.push(CoreCount {
                ncore: socket * per_chip.saturating_sub(threads),
                nsocket: socket,
            });
        } else {
            counts.push(CoreCount {
                ncore: (socket * per_chip).saturating_sub(sockets * threads),
                nsocket: socket,
            });
        }
    }
    counts.sort();
    debug!(
        "delegation_threads={}, delegation_sockets={}, ncores={:?}",
        threads, sockets, counts
    );
    Ok(counts)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub media: Media,
    pub fs: Filesystem,
    pub bench: &'static str,
    pub ncore: usize,
    pub nsocket: usize,
    pub iomode: IoMode,
}

impl RunConfig {
    /// Foreground and background worker counts, bumping `ncore` for `_bg`
    /// workloads while staying within the hardware threads.
    pub fn workers(&self, hardware_threads: usize) -> (usize, usize, usize) {
        if self.bench.ends_with(BACKGROUND_SUFFIX) {
            let ncore = std::cmp::min(self.ncore + 1, hardware_threads);
            (ncore, ncore - 1, 1)
        } else {
            (self.ncore, self.ncore, 0)
        }
    }
}

pub fn in_blacklist(bench: &str, media: Media, fs: Filesystem) -> bool {
    BLACKLIST.iter().any(|entry| {
        entry.bench == bench
            && (entry.media == media.name() || entry.media == media.family())
            && entry.fs == fs.name()
    })
}

/// The sweep: every (core count, bench, media, io mode, fs) combination that
/// passes the filter, largest core count first.
pub struct ConfigSpace {
    filter: RunFilter,
    core_counts: Vec<CoreCount>,
}

impl ConfigSpace {
    pub fn new(filter: RunFilter, core_counts: Vec<CoreCount>) -> Self {
        ConfigSpace { filter, core_counts }
    }

    pub fn filter(&self) -> &RunFilter {
        &self.filter
    }

    pub fn core_counts(&self) -> &[CoreCount] {
        &self.core_counts
    }

    pub fn iter(&self) -> impl Iterator<Item = RunConfig> + '_ {
        let mut ncores = self.core_counts.clone();
        ncores.sort_by(|a, b| b.ncore.cmp(&a.ncore));
        ncores.into_iter().flat_map(move |cc| {
            BENCH_TYPES.iter().flat_map(move |&bench| {
                Media::ALL.iter().flat_map(move |&media| {
                    IoMode::ALL.iter().flat_map(move |&iomode| {
                        Filesystem::ALL.iter().filter_map(move |&fs| {
                            self.candidate(RunConfig {
                                media,
                                fs,
                                bench,
                                ncore: cc.ncore,
                                nsocket: cc.nsocket,
                                iomode,
                            })
                        })
                    })
                })
            })
        })
    }

    fn candidate(&self, config: RunConfig) -> Option<RunConfig> {
        if config.fs == Filesystem::Tmpfs && !config.media.is_memory() {
            return None;
        }
        if in_blacklist(config.bench, config.media, config.fs) {
            return None;
        }
        let ncore = config.ncore.to_string();
        if self.filter.matches(
            config.media.name(),
            config.fs.name(),
            config.bench,
            &ncore,
            config.iomode.name(),
        ) {
            Some(config)
        } else {
            None
        }
    }
}
