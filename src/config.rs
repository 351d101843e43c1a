//! Command line handling.

use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3478";
pub const DEFAULT_HOME_ROOT: &str = "/home";

pub const HELP: &str = "ground - manage this host's files and users from a browser

Usage: ground <command> [--addr <host:port>]

Commands:
  run              Start the server (must run as root)
  help             Print this help
  version          Print the version

Options:
  --addr ADDR      Address to listen on (default: 0.0.0.0:3478)";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub addr: String,
    pub home_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            home_root: PathBuf::from(DEFAULT_HOME_ROOT),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Version,
    Run(Config),
}

// Parse --addr argument with validation
fn parse_addr_arg(args: &[String]) -> Result<Option<String>, String> {
    match args.iter().position(|arg| arg == "--addr") {
        Some(pos) => match args.get(pos + 1) {
            Some(value) if !value.starts_with("--") && !value.is_empty() => {
                Ok(Some(value.to_string()))
            }
            Some(value) if value.starts_with("--") => Err(format!(
                "Error: --addr requires a host:port argument, got '{}' instead",
                value
            )),
            _ => Err("Error: --addr requires a host:port argument".to_string()),
        },
        None => Ok(None),
    }
}

/// Parse `args` (without the program name). Commands may appear in any
/// order; help wins over version, version over run.
pub fn parse_args(args: &[String]) -> Result<Command, String> {
    let addr = parse_addr_arg(args)?;

    let mut help = false;
    let mut version = false;
    let mut run = false;
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        match arg.as_str() {
            "help" | "--help" | "-h" => help = true,
            "version" | "--version" | "-v" => version = true,
            "run" => run = true,
            "--addr" => skip_next = true,
            other => return Err(format!("Error: unknown argument '{other}'")),
        }
    }

    if help {
        Ok(Command::Help)
    } else if version {
        Ok(Command::Version)
    } else if run {
        let mut config = Config::default();
        if let Some(addr) = addr {
            config.addr = addr;
        }
        Ok(Command::Run(config))
    } else {
        Err("Error: no command given".to_string())
    }
}
