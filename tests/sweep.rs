use std::fs;
use std::path::PathBuf;

use fxrunner::benchmark::BLACKLIST;
use fxrunner::enumerate::core_counts;
use fxrunner::parser::LogParser;
use fxrunner::profiler::{ProfileEnv, Profiler, SharedState};
use fxrunner::{ConfigSpace, CpuTopology, Delegation, HarnessConfig, RunFilter, RunOptions, Runner};

#[test]
fn full_sweep_respects_exclusions() {
    let topology = CpuTopology::uniform(2, 4, 1);
    let counts = core_counts(&topology, "*", &Delegation::default()).expect("core counts");
    let space = ConfigSpace::new(RunFilter::any(), counts);
    let mut total = 0;
    for config in space.iter() {
        total += 1;
        assert!(config.fs.name() != "tmpfs" || config.media.is_memory());
        assert!(!BLACKLIST.iter().any(|e| e.bench == config.bench
            && e.fs == config.fs.name()
            && (e.media == config.media.name() || e.media == config.media.family())));
    }
    assert!(total > 0);
    assert_eq!(space.iter().next().map(|c| c.ncore), Some(8));
}

#[test]
fn dry_run_log_reads_back() {
    let tmp = tempdir::TempDir::new("fxrunner-sweep").expect("failed to create tempdir");
    let mut config = HarnessConfig::default();
    config.tools.log_root = tmp.path().join("logs");
    config.tools.test_root = tmp.path().join("root");
    let options = RunOptions {
        media: String::from("mem"),
        fs: String::from("tmpfs"),
        workload: String::from("MWCM"),
        ncore: String::from("2"),
        iotype: String::from("*"),
        delegation: Delegation::default(),
        duration: 5,
        directory_name: String::from("dry"),
        log_name: String::from("sweep.log"),
        dry_run: true,
        config_path: None,
    };
    let state = SharedState::new(Profiler::new(PathBuf::from("perfmon.py"), ProfileEnv::default()));
    let log_path = {
        let mut runner = Runner::new(config, CpuTopology::uniform(2, 4, 1), options, state).expect("runner");
        assert_eq!(runner.run().expect("dry run"), 2);
        runner.context().log_path()
    };
    assert_eq!(log_path, tmp.path().join("logs/dry/sweep.log"));

    let text = fs::read_to_string(&log_path).expect("log written");
    assert!(text.contains("## mem:tmpfs:MWCM:2:bufferedio\n"));
    assert!(text.contains("## mem:tmpfs:MWCM:2:directio\n"));

    let mut parser = LogParser::new();
    parser.parse_path(&tmp.path().join("logs/dry")).expect("parse log dir");
    assert_eq!(parser.config("PHYSICAL_CHIPS"), Some("2"));
    assert_eq!(parser.config("CORE_PER_CHIP"), Some("4"));
    assert_eq!(parser.config("DURATION"), Some("5s"));
    assert_eq!(parser.config("NUM_TEST_CONF"), Some("2"));
    assert!(parser.records().is_empty());
}
