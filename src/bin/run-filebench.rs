#[macro_use]
extern crate log;

use std::path::{Path, PathBuf};
use std::process;

use clap::{App, Arg, ArgMatches};

use fxrunner::adapter::{parse_arg, parse_flag, ProfileHooks};
use fxrunner::filebench::FilebenchJob;
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
    let topology = config.topology()?;
    let job = FilebenchJob {
        workload: value("type").to_string(),
        ncore: parse_arg("ncore", value("ncore"))?,
        nsocket: parse_arg("nsocket", value("nsocket"))?,
        duration: parse_arg("duration", value("duration"))?,
        root: PathBuf::from(value("root")),
        dthreads: parse_arg("delegation_threads", value("delegation_threads"))?,
        delegate: parse_flag(value("delegate")),
        cores_per_chip: topology.cores_per_chip,
        workload_dir: util::resolve(&config.tools.filebench_workloads),
    };
    let hooks = ProfileHooks::new(value("profbegin"), value("profend"), Path::new(value("proflog")));

    let summary = job.run(&hooks)?;
    let (header, row) = job.report(&summary, &hooks.report());
    println!("{}", header);
    println!("{}", row);
    Ok(())
}

fn main() {
    let matches = App::new("run-filebench")
        .version("0.1")
        .about("Runs one filebench workload and prints its result row")
        .arg(required("type"))
        .arg(required("ncore"))
        .arg(required("nsocket"))
        .arg(required("duration"))
        .arg(required("root"))
        .arg(required("profbegin"))
        .arg(required("profend"))
        .arg(required("proflog"))
        .arg(required("delegation_threads"))
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
