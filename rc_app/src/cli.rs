use std::path::PathBuf;

use thiserror::Error;

pub const USAGE: &str = "usage: rc_probe [--config <path>] [--log-dir <dir>] <url>...";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    #[error("Missing value for {0}")]
    MissingValue(String),

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("No URLs given")]
    NoUrls,
}

/// Arguments of the `rc_probe` binary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeArgs {
    pub config: Option<PathBuf>,
    pub log_dir: Option<String>,
    pub urls: Vec<String>,
}

/// Parse arguments, excluding the program name
pub fn parse_args<I>(args: I) -> Result<ProbeArgs, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = ProbeArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => parsed.config = Some(PathBuf::from(args.next().ok_or_else(|| CliError::MissingValue(arg.clone()))?)),
            "--log-dir" => parsed.log_dir = Some(args.next().ok_or_else(|| CliError::MissingValue(arg.clone()))?),
            flag if flag.starts_with('-') => return Err(CliError::UnknownOption(flag.to_string())),
            url => parsed.urls.push(url.to_string()),
        }
    }

    if parsed.urls.is_empty() {
        return Err(CliError::NoUrls);
    }
    Ok(parsed)
}

/// Parse the process command line
pub fn probe_args() -> Result<ProbeArgs, CliError> {
    parse_args(std::env::args().skip(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full() {
        let parsed = parse_args(args(&["--config", "rc.toml", "--log-dir", "./logs", "https://a.example.com", "/health"])).unwrap();

        assert_eq!(parsed.config, Some(PathBuf::from("rc.toml")));
        assert_eq!(parsed.log_dir.as_deref(), Some("./logs"));
        assert_eq!(parsed.urls, vec!["https://a.example.com", "/health"]);
    }

    #[test]
    fn test_parse_urls_only() {
        let parsed = parse_args(args(&["https://a.example.com"])).unwrap();

        assert!(parsed.config.is_none());
        assert!(parsed.log_dir.is_none());
        assert_eq!(parsed.urls.len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_args(args(&[])), Err(CliError::NoUrls));
        assert_eq!(parse_args(args(&["--config"])), Err(CliError::MissingValue("--config".into())));
        assert_eq!(parse_args(args(&["--verbose", "x"])), Err(CliError::UnknownOption("--verbose".into())));
    }
}
