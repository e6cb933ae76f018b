//! Command-line arguments and configuration loading.

use std::path::PathBuf;

use chrome_debug_mcp_core::{Error, Result, ServerConfig};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "CHROME_DEBUG_MCP_CONFIG";

/// Parsed command-line arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// `--config <path>`
    pub config_path: Option<PathBuf>,
    /// `--headless`: launch browsers headless unless a tool call says otherwise
    pub headless: bool,
}

impl CliArgs {
    /// Parse arguments (without the program name). Unknown arguments are ignored.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            if arg == "--headless" {
                parsed.headless = true;
            } else if arg == "--config" {
                let path = args
                    .next()
                    .ok_or_else(|| Error::InvalidInput("--config requires a path".to_string()))?;
                parsed.config_path = Some(PathBuf::from(path));
            } else if let Some(path) = arg.strip_prefix("--config=") {
                parsed.config_path = Some(PathBuf::from(path));
            }
        }

        Ok(parsed)
    }

    /// Load configuration from `--config`, else from `CHROME_DEBUG_MCP_CONFIG`,
    /// else defaults; `--headless` is applied on top.
    pub fn load_config(&self) -> Result<ServerConfig> {
        let path = self
            .config_path
            .clone()
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        self.load_config_from(path)
    }

    fn load_config_from(&self, path: Option<PathBuf>) -> Result<ServerConfig> {
        let mut config = match path {
            Some(path) => ServerConfig::from_file(&path).map_err(|e| {
                Error::Config(format!("failed to load {}: {e}", path.display()))
            })?,
            None => ServerConfig::default(),
        };
        if self.headless {
            config.launch.headless = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_flags() {
        let parsed = CliArgs::parse(args(&["--headless", "--config", "/etc/cdm.yaml"])).unwrap();
        assert!(parsed.headless);
        assert_eq!(parsed.config_path, Some(PathBuf::from("/etc/cdm.yaml")));

        let parsed = CliArgs::parse(args(&["--config=/tmp/a.yaml", "--verbose"])).unwrap();
        assert!(!parsed.headless);
        assert_eq!(parsed.config_path, Some(PathBuf::from("/tmp/a.yaml")));
    }

    #[test]
    fn test_config_flag_requires_value() {
        assert!(matches!(
            CliArgs::parse(args(&["--config"])),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_load_config_file_with_headless_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "connection:\n  default_port: 9333\nextensions:\n  cache_ttl_ms: 500"
        )
        .unwrap();

        let cli = CliArgs {
            config_path: None,
            headless: true,
        };
        let config = cli
            .load_config_from(Some(file.path().to_path_buf()))
            .unwrap();
        assert_eq!(config.connection.default_port, 9333);
        assert_eq!(config.extensions.cache_ttl_ms, 500);
        assert_eq!(config.server.reconcile_interval_ms, 1000);
        assert!(config.launch.headless);
    }

    #[test]
    fn test_load_missing_config_file() {
        let cli = CliArgs::default();
        let err = cli
            .load_config_from(Some(PathBuf::from("/nonexistent/chrome-debug-mcp.yaml")))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_defaults_without_file() {
        let config = CliArgs::default().load_config_from(None).unwrap();
        assert!(!config.launch.headless);
        assert_eq!(config.connection.default_port, 9222);
    }
}
