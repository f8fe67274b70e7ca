/// Every workload the sweep knows about. The prefix selects the tool:
/// `filebench_`, `dbench_` and `fio_` go to their adapters, everything else is
/// an fxmark microbenchmark.
pub const BENCH_TYPES: &[&str] = &[
    // write/write
    "DWAL",
    "DWOL",
    "DWOM",
    "DWSL",
    "MWRL",
    "MWRM",
    "MWCL",
    "MWCM",
    "MWUM",
    "MWUL",
    "DWTL",
    // filebench
    "filebench_varmail",
    "filebench_fileserver",
    "filebench_videoserver",
    "filebench_webserver",
    // dbench
    "dbench_client",
    // fio: fio_<global>_<task>[_<task>]
    "fio_global_seq-read-4K",
    "fio_global_seq-read-8K",
    "fio_global_seq-read-16K",
    "fio_global_seq-read-32K",
    "fio_global_seq-read-2M",
    "fio_global_seq-read-1G",
    "fio_global_seq-write-4K",
    "fio_global_seq-write-8K",
    "fio_global_seq-write-16K",
    "fio_global_seq-write-32K",
    "fio_global_seq-write-2M",
    "fio_global_seq-write-1G",
    "fio_global_rand-read-4K",
    "fio_global_rand-read-8K",
    "fio_global_rand-read-16K",
    "fio_global_rand-read-32K",
    "fio_global_rand-read-2M",
    "fio_global_rand-read-1G",
    "fio_global_rand-write-4K",
    "fio_global_rand-write-8K",
    "fio_global_rand-write-16K",
    "fio_global_rand-write-32K",
    "fio_global_rand-write-2M",
    "fio_global_rand-write-1G",
    "fio_global_seq-read-2M_seq-write-4K",
    "fio_global_seq-read-4K_seq-write-2M",
    // read/read
    "MRPL",
    "MRPM",
    "MRPH",
    "MRDM",
    "MRDL",
    "DRBH",
    "DRBM",
    "DRBL",
];

/// Workloads that run with one extra background writer.
pub const BACKGROUND_SUFFIX: &str = "_bg";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Fxmark,
    Filebench,
    Fio,
    Dbench,
}

impl Tool {
    /// Splits a benchmark name into the tool that runs it and the workload
    /// name that tool expects.
    pub fn classify(bench: &str) -> (Tool, &str) {
        const PREFIXES: &[(&str, Tool)] = &[
            ("filebench_", Tool::Filebench),
            ("dbench_", Tool::Dbench),
            ("fio_", Tool::Fio),
        ];
        for &(prefix, tool) in PREFIXES {
            if bench.starts_with(prefix) {
                return (tool, &bench[prefix.len()..]);
            }
        }
        (Tool::Fxmark, bench)
    }
}

/// Entry in the static exclusion list. `media` names a media or a media
/// family (see `Media::family`).
pub struct BlacklistEntry {
    pub bench: &'static str,
    pub media: &'static str,
    pub fs: &'static str,
}

/// Benchmarks excluded on a filesystem. The `pmem` entries cover every pmem
/// placement (local, one hop, two hops).
pub const BLACKLIST: &[BlacklistEntry] = &[
    BlacklistEntry { bench: "MWUM", media: "pmem", fs: "nova" },
    BlacklistEntry { bench: "MWUL", media: "pmem", fs: "nova" },
    BlacklistEntry { bench: "MWUM", media: "pmem", fs: "pmfs" },
    BlacklistEntry { bench: "MWUL", media: "pmem", fs: "pmfs" },
    BlacklistEntry { bench: "DWTL", media: "pmem", fs: "pmfs" },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_prefix() {
        assert_eq!(Tool::classify("filebench_varmail"), (Tool::Filebench, "varmail"));
        assert_eq!(Tool::classify("dbench_client"), (Tool::Dbench, "client"));
        assert_eq!(
            Tool::classify("fio_global_seq-read-4K"),
            (Tool::Fio, "global_seq-read-4K")
        );
        assert_eq!(Tool::classify("DRBL"), (Tool::Fxmark, "DRBL"));
    }

    #[test]
    fn bench_names_are_unique() {
        for (i, a) in BENCH_TYPES.iter().enumerate() {
            assert!(!BENCH_TYPES[i + 1..].contains(a), "{} listed twice", a);
        }
    }
}
