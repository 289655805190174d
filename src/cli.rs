//! Command line options shared by the pipeline binaries.

use crate::config::{ConfigError, PipelineConfig};
use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Firmware project directory
    #[arg(short = 'C', long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Config file [default: <PROJECT_DIR>/upload-pipeline.json]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Serial port to use instead of scanning for one
    #[arg(long, env = "PLATFORMIO_UPLOAD_PORT")]
    pub port: Option<PathBuf>,

    /// PlatformIO environment
    #[arg(short = 'e', long, env = "PIOENV")]
    pub pio_env: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl CommonArgs {
    /// Build the pipeline configuration: defaults, config file, then flags.
    pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load_from(&self.project_dir, path)?,
            None => PipelineConfig::load(&self.project_dir)?,
        };

        if let Some(port) = &self.port {
            config.port = Some(port.clone());
        }
        if let Some(env) = &self.pio_env {
            config.pio_env = env.clone();
        }
        config.validate()?;

        config.search_path = std::env::var_os("PATH");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE_NAME;
    use clap::Parser;
    use std::fs;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,
    }

    fn parse(args: &[&str]) -> CommonArgs {
        TestCli::try_parse_from(std::iter::once("test").chain(args.iter().copied()))
            .unwrap()
            .common
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "pio_env": "from-file", "chip": "esp32s3" }"#,
        )
        .unwrap();
        let project = dir.path().to_string_lossy().into_owned();

        let args = parse(&["-C", &project, "-e", "from-flag", "--port", "/dev/ttyUSB3"]);
        let config = args.load_config().unwrap();

        assert_eq!(config.project_dir, dir.path());
        assert_eq!(config.pio_env, "from-flag");
        assert_eq!(config.chip, "esp32s3");
        assert_eq!(config.port, Some(PathBuf::from("/dev/ttyUSB3")));
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("board.json");
        fs::write(&file, r#"{ "baud_rate": 921600 }"#).unwrap();
        let project = dir.path().to_string_lossy().into_owned();
        let file_arg = file.to_string_lossy().into_owned();

        let config = parse(&["-C", &project, "--config", &file_arg])
            .load_config()
            .unwrap();
        assert_eq!(config.baud_rate, 921_600);
    }

    #[test]
    fn test_port_env_is_namespaced() {
        use clap::CommandFactory;

        let command = TestCli::command();
        let port = command
            .get_arguments()
            .find(|arg| arg.get_id() == "port")
            .unwrap();
        // A dev server's PORT=3000 must never become the upload port
        assert_eq!(port.get_env(), Some(std::ffi::OsStr::new("PLATFORMIO_UPLOAD_PORT")));
    }

    #[test]
    fn test_empty_env_flag_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().to_string_lossy().into_owned();
        let result = parse(&["-C", &project, "-e", ""]).load_config();
        assert!(matches!(result, Err(ConfigError::EmptyField)));
    }
}
