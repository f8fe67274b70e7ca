#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod adapter;
pub mod benchmark;
pub mod config;
pub mod enumerate;
mod error;
pub use error::{Error, Result};
pub mod filebench;
pub mod filesystem;
pub mod fio;
mod logger;
pub use logger::*;
pub mod media;
pub mod mount;
pub mod parser;
pub mod profiler;
pub mod runner;
pub mod topology;
pub mod util;

pub use config::HarnessConfig;
pub use enumerate::{ConfigSpace, Delegation, RunConfig, RunFilter};
pub use filesystem::Filesystem;
pub use media::Media;
pub use runner::{RunOptions, Runner};
pub use topology::CpuTopology;
