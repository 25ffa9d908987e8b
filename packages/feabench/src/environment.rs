//! Isolated Python environments for the repository under test.
//!
//! An environment is never updated in place: [`EnvironmentBuilder::build`]
//! deletes whatever is in the environment directory and provisions it again,
//! so a stage can never observe packages installed for a previous stage.

use std::{
    env,
    ffi::OsString,
    fmt::{self, Display, Formatter},
    fs::remove_dir_all,
    path::{Path, PathBuf},
};

use crate::{
    config::{EnvironmentConfig, Isolation},
    outcome::Failure,
    process::Invocation,
    repo::WorkingCopy,
};

/// Lines of installer output kept in failure details.
const DETAIL_LINES: usize = 20;

/// One provisioning command, run in the working copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    /// Short name used in logs and failure details.
    pub name: &'static str,

    pub program: String,

    pub args: Vec<String>,

    /// Whether a failure of this step fails the build.
    pub required: bool,
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// A provisioned environment that test commands run inside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    dir: Option<PathBuf>,
}

impl Environment {
    /// No isolation: commands see the host's `PATH` unchanged.
    pub fn host() -> Self {
        Self { dir: None }
    }

    /// Run `invocation` inside this environment: its `bin` directory first on
    /// `PATH` and `VIRTUAL_ENV` set.
    pub fn activate(&self, invocation: Invocation) -> Invocation {
        let Some(dir) = &self.dir else {
            return invocation;
        };

        let mut path = OsString::from(dir.join("bin"));
        if let Some(host) = env::var_os("PATH")
            && !host.is_empty()
        {
            path.push(":");
            path.push(host);
        }
        invocation
            .env("PATH", path.to_string_lossy())
            .env("VIRTUAL_ENV", dir.to_string_lossy())
    }
}

/// Builds a fresh isolated environment for a working copy.
#[derive(Clone, Debug)]
pub struct EnvironmentBuilder {
    config: EnvironmentConfig,
}

impl EnvironmentBuilder {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self { config }
    }

    /// The steps that provision an environment for the working copy at
    /// `root`, in order. Empty when isolation is disabled.
    pub fn plan(&self, root: &Path) -> Vec<Step> {
        if self.config.isolation == Isolation::None {
            return Vec::new();
        }

        let dir = root.join(&self.config.directory);
        let python = dir.join("bin").join("python").to_string_lossy().into_owned();
        let pip = |name: &'static str, args: &[&str], packages: &[String], required: bool| Step {
            name,
            program: python.clone(),
            args: ["-m", "pip", "install"]
                .iter()
                .chain(args)
                .map(|arg| arg.to_string())
                .chain(packages.iter().cloned())
                .collect(),
            required,
        };

        let mut steps = vec![Step {
            name: "create",
            program: self.config.python.clone(),
            args: vec![
                String::from("-m"),
                String::from("venv"),
                dir.to_string_lossy().into_owned(),
            ],
            required: true,
        }];
        if !self.config.upgrade.is_empty() {
            steps.push(pip("upgrade", &["-U"], &self.config.upgrade, true));
        }
        if self.config.editable {
            steps.push(pip("install", &["-e", "."], &[], true));
        }
        if !self.config.extras.is_empty() {
            steps.push(pip(
                "extras",
                &[],
                &self.config.extras,
                self.config.extras_fatal,
            ));
        }
        steps
    }

    /// Delete any existing environment in the working copy and provision a
    /// new one.
    #[tracing::instrument(skip(self, copy), fields(repo = %copy.repo()))]
    pub fn build(&self, copy: &WorkingCopy) -> Result<Environment, Failure> {
        self.build_in(copy.path())
    }

    fn build_in(&self, root: &Path) -> Result<Environment, Failure> {
        if self.config.isolation == Isolation::None {
            tracing::debug!("isolation disabled, using host environment");
            return Ok(Environment::host());
        }

        let root = std::path::absolute(root).map_err(|e| Failure::EnvFailed {
            detail: format!("resolve {root:?}: {e}"),
        })?;
        let dir = root.join(&self.config.directory);
        if dir.exists() {
            remove_dir_all(&dir).map_err(|e| Failure::EnvFailed {
                detail: format!("remove {dir:?}: {e}"),
            })?;
        }

        for step in self.plan(&root) {
            tracing::info!(step = step.name, command = %step, "provisioning environment");
            let result = Invocation::new(&step.program, &root)
                .args(step.args.iter().cloned())
                .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
                .timeout(self.config.step_timeout())
                .run();

            let detail = match result {
                Ok(output) if output.success() => continue,
                Ok(output) => format!(
                    "{}: {}: {}",
                    step.name,
                    output.describe(),
                    output.tail(DETAIL_LINES)
                ),
                Err(error) => format!("{}: {error:#}", step.name),
            };

            if step.required {
                tracing::error!(%detail, "environment step failed");
                return Err(Failure::EnvFailed { detail });
            }
            tracing::warn!(%detail, "optional environment step failed, continuing");
        }

        Ok(Environment { dir: Some(dir) })
    }
}
