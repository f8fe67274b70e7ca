use std::fs;
use std::path::PathBuf;

use fxrunner::fio::{self, FioJob, TERSE_FIELDS};
use fxrunner::parser::{LogParser, PlotKind, Plotter};
use fxrunner::CpuTopology;

fn terse_line(jobname: &str, read_bw: u64, read_iops: u64) -> String {
    TERSE_FIELDS
        .iter()
        .map(|&name| match name {
            "terse_version_3" => String::from("3"),
            "fio_version" => String::from("fio-3.27"),
            "jobname" => jobname.to_string(),
            "read_bandwidth" => read_bw.to_string(),
            "read_iops" => read_iops.to_string(),
            "read_clat_pct07" | "write_clat_pct07" => String::from("50.000000%=12.3"),
            "read_clat_pct13" | "write_clat_pct13" => String::from("99.000000%=40"),
            "disk_name" => String::from("pmem0"),
            _ => String::from("0"),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn job(ncore: usize) -> FioJob {
    FioJob {
        workload: String::from("global_seq-read-4K"),
        ncore,
        duration: 30,
        root: PathBuf::from("/mnt/root"),
        media: String::from("pmem-local"),
        fs: String::from("ext4"),
        bench: String::from("fio_global_seq-read-4K"),
        nfg: ncore,
        dio: String::from("bufferedio"),
        numa_cpu_node: 0,
        dthreads: 0,
        dsockets: 0,
        delegate: false,
        topology: CpuTopology::uniform(1, 4, 1),
        workload_dir: PathBuf::from("fio-workloads"),
        create_file: PathBuf::from("create-file"),
    }
}

/// Result log as the dispatcher would write it for a two-point fio sweep.
fn sweep_log() -> String {
    let mut log = String::from("### PHYSICAL_CHIPS = 1\n### CORE_PER_CHIP  = 4\n\n");
    for &(ncore, bw) in &[(4, 8192), (2, 4096)] {
        let output = format!("fio: warming up\n{}\n", terse_line("seq-read-4K", bw, bw / 4));
        let records = fio::parse_output(&output).expect("terse output");
        for line in job(ncore).report(&records) {
            log.push_str(&line);
            log.push('\n');
        }
    }
    log
}

#[test]
fn adapter_rows_survive_the_parser() {
    let mut parser = LogParser::new();
    parser.parse_str(&sweep_log());
    let records = parser.search(&["pmem-local", "ext4", "seq-read-4K", "4", "bufferedio"]);
    assert_eq!(records.len(), 1);
    let record = records[0];
    assert_eq!(record.get("ncpu").expect("ncpu"), "4");
    assert_eq!(record.float("read_bandwidth").expect("bandwidth"), 8192.0);
    assert_eq!(record.get("read_iops").expect("iops"), "2048");
    assert_eq!(
        Plotter::format_row(PlotKind::Fio, "seq-read-4K", record).expect("row"),
        "4 8192.0 12.3 40.0"
    );
}

#[test]
fn plot_files_keep_log_order() {
    let tmp = tempdir::TempDir::new("fxrunner-fio-results").expect("failed to create tempdir");
    let log_path = tmp.path().join("fxrunner.log");
    fs::write(&log_path, sweep_log()).expect("failed to write log");

    let mut parser = LogParser::new();
    parser.parse_path(&log_path).expect("parse log");
    let plotter = Plotter::new(parser).expect("plotter");
    let out = tmp.path().join("out");
    let written = plotter.write_data(&out, PlotKind::Fio).expect("write data");
    assert_eq!(
        written,
        vec![out.join("pmem-local:ext4:seq-read-4K:bufferedio.dat")]
    );
    let data = fs::read_to_string(&written[0]).expect("data file");
    assert_eq!(
        data,
        "# pmem-local:ext4:seq-read-4K:bufferedio:*\n\
         4 8192.0 12.3 40.0\n\
         2 4096.0 12.3 40.0\n"
    );
}

#[test]
fn mislabelled_latency_fails_the_row() {
    let log = sweep_log().replace("50.000000%=12.3", "60.000000%=12.3");
    let mut parser = LogParser::new();
    parser.parse_str(&log);
    let record = parser.records()[0].clone();
    assert!(Plotter::format_row(PlotKind::Fio, "seq-read-4K", &record).is_err());
}
