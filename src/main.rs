#[macro_use]
extern crate log;

use std::io;
use std::path::PathBuf;
use std::process;

use clap::{App, Arg, ArgMatches};

use fxrunner::adapter::{parse_arg, parse_flag};
use fxrunner::profiler::{spawn_signal_watcher, ProfileEnv, Profiler, SharedState};
use fxrunner::runner::confirm_media_paths;
use fxrunner::{util, Delegation, HarnessConfig, RunOptions, Runner};

fn required(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name)
        .long(name)
        .help(help)
        .takes_value(true)
        .required(true)
}

fn options(matches: &ArgMatches) -> fxrunner::Result<RunOptions> {
    let value = |name: &str| matches.value_of(name).unwrap_or("").to_string();
    let delegation = Delegation {
        threads: parse_arg("dthread", &value("dthread"))?,
        sockets: parse_arg("dsocket", &value("dsocket"))?,
        rcore: parse_flag(&value("rcore")),
        delegate: parse_flag(&value("delegate")),
    };
    Ok(RunOptions {
        media: value("media"),
        fs: value("fs"),
        workload: value("workload"),
        ncore: value("ncore"),
        iotype: value("iotype"),
        delegation,
        duration: parse_arg("duration", &value("duration"))?,
        directory_name: value("directory_name"),
        log_name: value("log_name"),
        dry_run: matches.is_present("dry-run"),
        config_path: matches.value_of("config").map(PathBuf::from),
    })
}

fn run(matches: &ArgMatches) -> fxrunner::Result<()> {
    let options = options(matches)?;
    let config = match options.config_path {
        Some(ref path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    let topology = config.topology()?;

    if !options.dry_run {
        if !nix::unistd::geteuid().is_root() {
            error!("Need to be root");
            process::exit(1);
        }
        if topology.smt_level > 1 {
            error!("Please disable hyperthreading in the BIOS");
            process::exit(1);
        }
        if matches.value_of("confirm") != Some("True") {
            let stdin = io::stdin();
            let stdout = io::stdout();
            if !confirm_media_paths(&config.devices, &mut stdin.lock(), &mut stdout.lock())? {
                process::exit(1);
            }
        }
    }

    let profiler = Profiler::new(
        util::resolve(&config.tools.perfmon),
        ProfileEnv {
            level: config.perfmon_level,
            ..ProfileEnv::default()
        },
    );
    let state = SharedState::new(profiler);
    spawn_signal_watcher(state.clone())?;

    let mut runner = Runner::new(config, topology, options, state)?;
    let count = runner.run()?;
    info!("finished {} configurations", count);
    Ok(())
}

fn main() {
    let matches = App::new("fxrunner")
        .version("0.1")
        .about("Sweeps filesystem benchmarks over media, filesystems and core counts")
        .arg(required("media", "Media type pattern, `*` for all"))
        .arg(required("fs", "Filesystem pattern, `*` for all"))
        .arg(required("workload", "Benchmark pattern, `*` for all"))
        .arg(required("ncore", "Core count, `*` for the default sweep"))
        .arg(required("iotype", "bufferedio, directio or `*`"))
        .arg(required("dthread", "Delegation threads per socket"))
        .arg(required("dsocket", "Sockets running delegation threads"))
        .arg(required("rcore", "Reserve delegation cores (True/False)"))
        .arg(required("delegate", "Run with delegation (True/False)"))
        .arg(required("confirm", "Skip the device wipe prompt with True"))
        .arg(required("duration", "Seconds per run"))
        .arg(required("directory_name", "Log directory under the log root"))
        .arg(required("log_name", "Result log file name"))
        .arg(
            Arg::with_name("config")
                .long("config")
                .help("Harness config (json)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("dry-run")
                .long("dry-run")
                .help("Log the sweep without mounting or running anything"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Debug logging"),
        )
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
