//! Harness configuration.
//!
//! Configuration is read once at startup from a TOML file and passed by
//! reference to the components that need it. Every field has a default, so a
//! missing file (or a file that only sets a few keys) is valid.
//!
//! ```toml
//! [paths]
//! dataset = "feabench-data/repo_data_oracle_lite"
//! repos = "repos_all"
//! ledger = "oracle_results.jsonl"
//!
//! [git]
//! clone_attempts = 3
//!
//! [environment]
//! extras = ["pytest<9", "wcag-contrast-ratio"]
//! extras_fatal = false
//!
//! [llm]
//! provider = "gemini"
//! model = "gemini-2.5-flash"
//! ```

use std::{
    collections::BTreeMap,
    env,
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::{
    Result, Section, SectionExt,
    eyre::{Context, bail},
};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tap::Tap;

use crate::llm::Provider;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "FEABENCH_CONFIG";

/// File name searched for in the working directory and the user config dir.
pub const CONFIG_FILE: &str = "feabench.toml";

/// Get the project directories for the application.
#[tracing::instrument]
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "feabench", "feabench")
}

/// Top level configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub git: GitConfig,
    pub environment: EnvironmentConfig,
    pub tests: TestConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// Resolution order:
    /// 1. `path` if given (it must exist).
    /// 2. `./feabench.toml` if it exists.
    /// 3. `feabench.toml` in the user config directory if it exists.
    /// 4. Defaults.
    #[tracing::instrument]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path)?
                .ok_or_else(|| color_eyre::eyre::eyre!("config file not found: {path:?}"));
        }

        let local = PathBuf::from(CONFIG_FILE);
        if let Some(config) = Self::load_from(&local)? {
            return Ok(config);
        }

        if let Some(dirs) = project_dirs() {
            let user = dirs.config_dir().join(CONFIG_FILE);
            if let Some(config) = Self::load_from(&user)? {
                return Ok(config);
            }
        }

        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a single file; `None` if it does not exist.
    #[tracing::instrument]
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        let content = match read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("read config file: {path:?}")),
        };

        toml::from_str::<Self>(&content)
            .with_context(|| format!("parse config file: {path:?}"))
            .with_section(|| content.clone().header("File content:"))
            .tap(|config| tracing::debug!(?config, "parsed config file"))
            .map(Some)
    }
}

/// Filesystem locations.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Dataset root containing `index.csv`.
    pub dataset: PathBuf,

    /// Directory holding one clone per repository.
    pub repos: PathBuf,

    /// Validation ledger (JSON lines).
    pub ledger: PathBuf,

    /// Root directory for generated patches and documents.
    pub output: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("feabench-data/repo_data_oracle_lite"),
            repos: PathBuf::from("repos_all"),
            ledger: PathBuf::from("oracle_results.jsonl"),
            output: PathBuf::from("generated"),
        }
    }
}

/// How repositories are cloned and reset.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Base URL repositories are cloned from; `<base>/<owner>/<name>`.
    pub remote_base: String,

    /// Append `.git` to clone URLs.
    pub remote_suffix: bool,

    /// Total clone attempts (1 disables retry).
    pub clone_attempts: u32,

    pub clone_backoff_ms: u64,

    pub clone_backoff_max_ms: u64,

    /// Zero disables the timeout.
    pub clone_timeout_secs: u64,

    /// Timeout for reset, clean and apply. Zero disables the timeout.
    pub command_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote_base: String::from("https://github.com"),
            remote_suffix: true,
            clone_attempts: 3,
            clone_backoff_ms: 2_000,
            clone_backoff_max_ms: 30_000,
            clone_timeout_secs: 1_800,
            command_timeout_secs: 600,
        }
    }
}

impl GitConfig {
    pub fn clone_timeout(&self) -> Option<Duration> {
        seconds(self.clone_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        seconds(self.command_timeout_secs)
    }

    /// Delay before retry number `attempt` (zero based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.min(16);
        let delay = self.clone_backoff_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.clone_backoff_max_ms))
    }
}

/// How dependencies for the repository under test are isolated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// A fresh Python virtual environment inside the working copy.
    #[default]
    Venv,

    /// No provisioning; tests run with whatever the host provides.
    None,
}

/// How the isolated environment is built.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub isolation: Isolation,

    /// Interpreter used to create the environment.
    pub python: String,

    /// Environment directory, relative to the working copy.
    pub directory: PathBuf,

    /// Packages upgraded right after the environment is created.
    pub upgrade: Vec<String>,

    /// Install the working copy itself with `pip install -e .`.
    pub editable: bool,

    /// Test runner dependencies installed last.
    pub extras: Vec<String>,

    /// Whether a failed install of `extras` fails the build.
    pub extras_fatal: bool,

    /// Timeout per step. Zero disables the timeout.
    pub step_timeout_secs: u64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::Venv,
            python: String::from("python3"),
            directory: PathBuf::from(".venv"),
            upgrade: vec![
                String::from("pip"),
                String::from("wheel"),
                String::from("setuptools"),
            ],
            editable: true,
            extras: vec![String::from("pytest<9"), String::from("wcag-contrast-ratio")],
            extras_fatal: false,
            step_timeout_secs: 1_800,
        }
    }
}

impl EnvironmentConfig {
    pub fn step_timeout(&self) -> Option<Duration> {
        seconds(self.step_timeout_secs)
    }
}

/// How test commands are run.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    /// Zero disables the timeout.
    pub timeout_secs: u64,

    /// Extra environment variables for the test command.
    pub env: BTreeMap<String, String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1_800,
            env: BTreeMap::new(),
        }
    }
}

impl TestConfig {
    pub fn timeout(&self) -> Option<Duration> {
        seconds(self.timeout_secs)
    }
}

/// Model used by the generation commands.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: Provider,

    /// Model name; defaults to the provider's default model.
    pub model: Option<String>,

    /// API key; falls back to the provider's environment variable.
    pub api_key: Option<String>,

    /// Override for the provider's API base URL.
    pub base_url: Option<String>,

    pub temperature: f32,

    pub timeout_secs: u64,

    /// Total attempts per request (1 disables retry).
    pub attempts: u32,

    pub backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: None,
            api_key: None,
            base_url: None,
            temperature: 0.2,
            timeout_secs: 300,
            attempts: 1,
            backoff_ms: 5_000,
        }
    }
}

impl LlmConfig {
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    /// Resolve the API key for the configured provider.
    ///
    /// Called when a generation command starts so that a missing key is
    /// reported before any task is processed.
    pub fn credentials(&self) -> Result<Credentials> {
        let var = self.provider.api_key_env();
        let key = self
            .api_key
            .clone()
            .or_else(|| env::var(var).ok())
            .map(|key| key.trim().to_string())
            .unwrap_or_default();

        if key.is_empty() {
            return Err(color_eyre::eyre::eyre!(
                "no API key configured for provider {}",
                self.provider
            ))
            .suggestion(format!(
                "Set `{var}` or `llm.api_key` in {CONFIG_FILE}, e.g. `export {var}='your-api-key'`"
            ));
        }
        if key.chars().any(char::is_whitespace) {
            bail!("API key for provider {} contains whitespace", self.provider);
        }

        Ok(Credentials { api_key: key })
    }
}

/// Validated credentials for a model provider.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
