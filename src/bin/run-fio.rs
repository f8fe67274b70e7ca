#[macro_use]
extern crate log;

use std::path::{Path, PathBuf};
use std::process;

use clap::{App, Arg, ArgMatches};

use fxrunner::adapter::{parse_arg, parse_flag, ProfileHooks};
use fxrunner::fio::FioJob;
use fxrunner::{util, HarnessConfig};

fn required(name: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name).long(name).takes_value(true).required(true)
}

fn run(matches: &ArgMatches) -> fxrunner::Result<()> {
    let value = |name: &str| matches.value_of(name).unwrap_or("");
    let config = match matches.value_of("config") {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    let job = FioJob {
        workload: value("type").to_string(),
        ncore: parse_arg("ncore", value("ncore"))?,
        duration: parse_arg("duration", value("duration"))?,
        root: PathBuf::from(value("root")),
        media: value("media").to_string(),
        fs: value("fs").to_string(),
        bench: value("bench").to_string(),
        nfg: parse_arg("nfg", value("nfg"))?,
        dio: value("dio").to_string(),
        numa_cpu_node: parse_arg("numa_cpu_node", value("numa_cpu_node"))?,
        dthreads: parse_arg("delegation_threads", value("delegation_threads"))?,
        dsockets: parse_arg("delegation_sockets", value("delegation_sockets"))?,
        delegate: parse_flag(value("delegate")),
        topology: config.topology()?,
        workload_dir: util::resolve(&config.tools.fio_workloads),
        create_file: util::resolve(&config.tools.create_file),
    };
    let hooks = ProfileHooks::new(value("profbegin"), value("profend"), Path::new(value("proflog")));

    let records = job.run(&hooks)?;
    for line in job.report(&records) {
        println!("{}", line);
    }
    Ok(())
}

fn main() {
    let matches = App::new("run-fio")
        .version("0.1")
        .about("Runs one fio workload and prints a result row per job")
        .arg(required("type"))
        .arg(required("ncore"))
        .arg(required("duration"))
        .arg(required("root"))
        .arg(required("profbegin"))
        .arg(required("profend"))
        .arg(required("proflog"))
        .arg(required("media"))
        .arg(required("fs"))
        .arg(required("bench"))
        .arg(required("nfg"))
        .arg(required("dio"))
        .arg(required("numa_cpu_node"))
        .arg(required("delegation_threads"))
        .arg(required("delegation_sockets"))
        .arg(required("delegate"))
        .arg(Arg::with_name("config").long("config").takes_value(true))
        .arg(Arg::with_name("verbose").short("v").long("verbose"))
        .get_matches();

    if let Err(e) = fxrunner::setup_logger(fxrunner::level_for(matches.is_present("verbose"))) {
        eprintln!("failed to setup logger: {}", e);
        process::exit(1);
    }
    if let Err(e) = run(&matches) {
        error!("{}", e);
        process::exit(1);
    }
}
