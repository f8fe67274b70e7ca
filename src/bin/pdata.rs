#[macro_use]
extern crate log;

use std::path::Path;
use std::process;

use clap::{App, Arg, ArgMatches};

use fxrunner::parser::{LogParser, PlotKind, Plotter};

fn run(matches: &ArgMatches) -> fxrunner::Result<()> {
    let value = |name: &str| matches.value_of(name).unwrap_or("");
    let kind: PlotKind = value("type").parse()?;
    let mut parser = LogParser::new();
    parser.parse_path(Path::new(value("log")))?;

    let mut plotter = Plotter::new(parser)?;
    if let Some(excluded) = matches.values_of("exclude") {
        plotter.excluded_fs = excluded.map(String::from).collect();
    }
    let written = plotter.write_data(Path::new(value("out")), kind)?;
    info!("wrote {} data files to {}", written.len(), value("out"));
    Ok(())
}

fn main() {
    let matches = App::new("pdata")
        .version("0.1")
        .about("Extracts plot data files from fxrunner result logs")
        .arg(
            Arg::with_name("log")
                .long("log")
                .help("Result log file or a directory of them")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("out")
                .long("out")
                .help("Directory for the .dat files")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("type")
                .long("type")
                .help("filebench, fio or fxmark")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("exclude")
                .long("exclude")
                .help("Filesystems to leave out")
                .takes_value(true)
                .multiple(true),
        )
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
