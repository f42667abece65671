/// Benchmark configuration and environment document loading.

use std::path::Path;

use anyhow::Context;
use fwbench_control::SessionSettings;
use fwbench_protocol::env::ServerEnv;
use fwbench_protocol::options::BenchmarkOptions;
use serde::{Deserialize, Serialize};

/// Top-level config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub options: BenchmarkOptions,
    #[serde(default)]
    pub control: SessionSettings,
}

/// Load the benchmark config. A missing path yields defaults; a `.json` file
/// holds the options alone, as printed by `fwbench options`.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<BenchConfig> {
    let Some(path) = path else {
        return Ok(BenchConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&contents, path.extension().is_some_and(|e| e == "json"))
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

pub fn parse_config(contents: &str, json_options: bool) -> anyhow::Result<BenchConfig> {
    if json_options {
        let options: BenchmarkOptions = serde_json::from_str(contents)?;
        return Ok(BenchConfig { options, ..Default::default() });
    }
    Ok(toml::from_str(contents)?)
}

/// Load the server environment document (`env.json`).
pub fn load_env(path: &Path) -> anyhow::Result<ServerEnv> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read environment file {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse environment file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwbench_protocol::options::{FaceScheme, ProducerKind};

    #[test]
    fn empty_config_is_default() {
        let config = parse_config("", false).unwrap();
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.options.n_fwds, 4);
        assert_eq!(config.control.poll_interval_ms, 1000);
    }

    #[test]
    fn toml_sections() {
        let config = parse_config(
            r#"
            [options]
            faceAScheme = "vxlan"
            nFwds = 8
            producerKind = "fileserver"

            [control]
            max_trials = 10

            [control.restart]
            max_attempts = 5
            "#,
            false,
        )
        .unwrap();
        assert_eq!(config.options.face_a_scheme, FaceScheme::Vxlan);
        assert_eq!(config.options.face_b_scheme, FaceScheme::Ether);
        assert_eq!(config.options.n_fwds, 8);
        assert_eq!(config.options.producer_kind, ProducerKind::Fileserver);
        assert_eq!(config.control.max_trials, Some(10));
        assert_eq!(config.control.restart.max_attempts, 5);
        assert_eq!(config.control.restart.settle_ms, 20_000);
    }

    #[test]
    fn json_options_document() {
        let config = parse_config(r#"{"nFlows": 16, "trafficDir": 1}"#, true).unwrap();
        assert_eq!(config.options.n_flows, 16);
        assert!(!config.options.bidirectional());
        assert_eq!(config.control, SessionSettings::default());
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(parse_config("[options]\nfaceAScheme = \"tcp\"\n", false).is_err());
    }
}
