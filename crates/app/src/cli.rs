use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};

const USAGE: &str = "Usage: app [--config <path>] [--listen <addr>] [--verbose]\n\n\
  --config <path>   TOML configuration file (defaults apply when omitted)\n\
  --listen <addr>   Override the configured listen address\n\
  --verbose         Default the log filter to debug";

/// Command-line overrides layered on top of the TOML configuration.
#[derive(Clone, Debug, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub listen_addr: Option<String>,
    pub verbose: bool,
}

impl CliArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = Self::default();

        let mut idx = 1;
        while idx < args.len() {
            match args[idx].as_str() {
                "--config" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--config requires a value"))?;
                    parsed.config_path = Some(PathBuf::from(value));
                    idx += 1;
                }
                "--listen" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--listen requires a value"))?;
                    parsed.listen_addr = Some(value.clone());
                    idx += 1;
                }
                "--verbose" => {
                    parsed.verbose = true;
                    idx += 1;
                }
                "--help" | "-h" => {
                    bail!(USAGE);
                }
                other => {
                    bail!("Unrecognised argument: {other}\n\n{USAGE}");
                }
            }
        }

        Ok(parsed)
    }
}
