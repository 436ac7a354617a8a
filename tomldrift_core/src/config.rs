use crate::adapter::{CommandAdapter, CommandAdapterConfig, InputDelivery};
use crate::corpus::DEFAULT_DENYLIST;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables naming the two decoder executables.
pub const ENV_DECODER_A: &str = "TOML_A";
pub const ENV_DECODER_B: &str = "TOML_B";

/// Which payload the decoders emit and how the oracle compares it.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMode {
    /// Decoders emit the tagged interchange JSON; compared structurally.
    #[default]
    Structured,
    /// Decoders emit the format's own re-serialization; both sides are
    /// re-parsed before the same structural comparison, which also washes
    /// out quoting style and insignificant whitespace.
    Roundtrip,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

/// Settings for one decoder binding. `path` may be omitted in the config
/// file, in which case the environment variable supplies it.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct AdapterSettings {
    pub path: Option<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorpusSettings {
    /// Root of an external conformance-test tree; literals are always
    /// seeded even when this is absent.
    pub tree_path: Option<PathBuf>,
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

fn default_denylist() -> Vec<String> {
    DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect()
}

impl Default for CorpusSettings {
    fn default() -> Self {
        Self {
            tree_path: None,
            denylist: default_denylist(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    2000
}

/// Bytes whose presence in an input suppresses an error-mismatch verdict:
/// NUL, carriage return and 0xFF, the historically ambiguous control bytes
/// decoders are known to disagree on for adapter-level reasons.
fn default_suppress_bytes() -> Vec<u8> {
    vec![0x00, b'\r', 0xFF]
}

/// Top-level harness configuration, loaded from a TOML file or assembled
/// from defaults plus the environment. Constructed once at startup; the
/// adapter bindings built from it are read-only for the rest of the run.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub decoder_a: AdapterSettings,
    #[serde(default)]
    pub decoder_b: AdapterSettings,
    #[serde(default)]
    pub corpus: CorpusSettings,
    #[serde(default)]
    pub compare_mode: CompareMode,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_suppress_bytes")]
    pub suppress_bytes: Vec<u8>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            decoder_a: AdapterSettings::default(),
            decoder_b: AdapterSettings::default(),
            corpus: CorpusSettings::default(),
            compare_mode: CompareMode::default(),
            timeout_ms: default_timeout_ms(),
            suppress_bytes: default_suppress_bytes(),
        }
    }
}

impl HarnessConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: HarnessConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// Builds the two decoder bindings. A missing executable path (neither
    /// configured nor in the environment) or a path that does not exist on
    /// disk is a fatal startup error.
    pub fn build_adapters(&self) -> Result<(CommandAdapter, CommandAdapter), anyhow::Error> {
        let a = self.build_adapter("A", &self.decoder_a, ENV_DECODER_A)?;
        let b = self.build_adapter("B", &self.decoder_b, ENV_DECODER_B)?;
        Ok((a, b))
    }

    fn build_adapter(
        &self,
        name: &str,
        settings: &AdapterSettings,
        env_var: &str,
    ) -> Result<CommandAdapter, anyhow::Error> {
        let path = match &settings.path {
            Some(path) => path.clone(),
            None => std::env::var(env_var).map_err(|_| {
                anyhow::anyhow!(
                    "decoder {} has no configured path and {} is unset or empty",
                    name,
                    env_var
                )
            })?,
        };
        if path.is_empty() {
            anyhow::bail!("decoder {} path (from {}) is empty", name, env_var);
        }
        if !std::path::Path::new(&path).exists() {
            anyhow::bail!("decoder {} executable {:?} does not exist", name, path);
        }

        let mut command = vec![path];
        command.extend(settings.extra_args.iter().cloned());

        let input_delivery = match &settings.input_delivery {
            ConfigInputDelivery::StdIn => InputDelivery::Stdin,
            ConfigInputDelivery::File { template } => InputDelivery::File(template.clone()),
        };

        Ok(CommandAdapter::new(
            name,
            CommandAdapterConfig {
                command,
                input_delivery,
                timeout: Duration::from_millis(self.timeout_ms),
                working_dir: settings.working_dir.clone(),
            },
        ))
    }
}
