use std::env;
use std::path::PathBuf;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "prosumer.toml";

pub struct CliOptions {
    pub config: PathBuf,
    /// Log publications instead of connecting to a broker.
    pub dry_run: bool,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    if args.len() == 1 && (args[0] == "--help" || args[0] == "-h") {
        print_usage();
        std::process::exit(0);
    }
    parse_options(&args)
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut config = None;
    let mut dry_run = false;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let path =
                    args.next_or_err(i, "missing value for --config (expected a TOML file path)")?;
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--dry-run" => dry_run = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    Ok(CliOptions {
        config: config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
        dry_run,
    })
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("prosumer-sim: simulated prosumer site publishing to an MQTT broker");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  prosumer-sim [--config <path>] [--dry-run]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <path>   Site configuration (default: {DEFAULT_CONFIG})");
    eprintln!("      --dry-run         Log publications instead of connecting to the broker");
    eprintln!("  -h, --help            Show this help message");
}
