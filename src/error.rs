use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid filter pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("invalid ncore hint {hint}, expected 1..={max}")]
    InvalidCoreHint { hint: String, max: usize },
    #[error("workload template {0:?} does not exist")]
    MissingTemplate(PathBuf),
    #[error("`{command}` exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },
    #[error("media {0} is not available")]
    MediaUnavailable(String),
    #[error("malformed {tool} output: {detail}")]
    Parse { tool: &'static str, detail: String },
    #[error("latency label mismatch: expected {expected}, found {found}")]
    LatencyLabel { expected: String, found: String },
}

impl Error {
    pub(crate) fn invalid_arg(e: impl ToString) -> Self {
        Error::InvalidArg(e.to_string())
    }

    pub(crate) fn parse(tool: &'static str, detail: impl ToString) -> Self {
        Error::Parse {
            tool,
            detail: detail.to_string(),
        }
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
