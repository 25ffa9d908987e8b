//! Integration tests against throwaway git repositories.
//!
//! Every test builds its own "remote" repositories in a temporary directory
//! and points the harness at them with `git.remote_base`, so nothing here
//! touches the network:
//! - Repository provisioning: cloning, reset idempotence, clone failures
//! - Patch application against a real index
//! - Full validation runs through the production sandbox
//! - The command line interface

mod cli;
mod patch;
mod repo;
mod validate;

use std::path::{Path, PathBuf};

use feabench::{
    config::{EnvironmentConfig, GitConfig, Isolation, TestConfig},
    dataset::Task,
    environment::EnvironmentBuilder,
    patch::Patch,
    repo::{Registry, RepoId, Revision},
    runner::{TestCommand, TestRunner},
};
use indoc::indoc;
use tempfile::TempDir;
use xshell::{Shell, cmd};

/// Adds a test for `src/foo.txt`.
pub const TEST_PATCH: &str = indoc! {"
    diff --git a/tests/test_foo.txt b/tests/test_foo.txt
    new file mode 100644
    --- /dev/null
    +++ b/tests/test_foo.txt
    @@ -0,0 +1 @@
    +src/foo.txt must exist
"};

/// Adds `src/foo.txt`.
pub const FIX_PATCH: &str = indoc! {"
    diff --git a/src/foo.txt b/src/foo.txt
    new file mode 100644
    --- /dev/null
    +++ b/src/foo.txt
    @@ -0,0 +1 @@
    +foo
"};

/// Modifies a line the fixture does not have.
pub const CONFLICTING_PATCH: &str = indoc! {"
    diff --git a/README.md b/README.md
    --- a/README.md
    +++ b/README.md
    @@ -1 +1 @@
    -this line does not exist
    +replacement
"};

/// Passes unless the test file exists without the implementation.
pub const TEST_COMMAND: &str = "test ! -f tests/test_foo.txt || test -f src/foo.txt";

/// A temporary directory holding remotes and the clones made from them.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create fixture directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn remotes(&self) -> PathBuf {
        self.path().join("remotes")
    }

    pub fn repos(&self) -> PathBuf {
        self.path().join("repos")
    }

    /// Create a remote repository `<remotes>/<repo>` with one commit.
    pub fn remote(&self, repo: &str) -> Revision {
        let dir = self.remotes().join(repo);
        let sh = Shell::new().expect("create shell");
        sh.create_dir(&dir).expect("create remote directory");
        sh.change_dir(&dir);

        sh.create_dir("src").expect("create src");
        sh.write_file("README.md", "# lib\n").expect("write README");
        sh.write_file("src/__init__.py", "").expect("write module");
        sh.write_file(".gitignore", ".venv/\n").expect("write .gitignore");

        cmd!(sh, "git init --quiet").run().expect("git init");
        cmd!(sh, "git add .").run().expect("git add");
        commit(&sh, "initial");
        cmd!(sh, "git rev-parse HEAD")
            .read()
            .expect("git rev-parse")
            .parse()
            .expect("valid revision")
    }

    pub fn git(&self) -> GitConfig {
        GitConfig {
            remote_base: self.remotes().display().to_string(),
            remote_suffix: false,
            clone_attempts: 1,
            clone_backoff_ms: 0,
            clone_timeout_secs: 60,
            command_timeout_secs: 60,
            ..GitConfig::default()
        }
    }

    pub fn registry(&self) -> Registry {
        Registry::new(self.repos(), self.git())
    }
}

/// Commit everything staged with a fixed identity.
pub fn commit(sh: &Shell, message: &str) {
    cmd!(
        sh,
        "git -c user.name=feabench -c user.email=feabench@example.com commit --quiet -m {message}"
    )
    .run()
    .expect("git commit");
}

/// Environments that reuse the host toolchain.
pub fn host_environments() -> EnvironmentBuilder {
    EnvironmentBuilder::new(EnvironmentConfig {
        isolation: Isolation::None,
        ..EnvironmentConfig::default()
    })
}

pub fn runner() -> TestRunner {
    TestRunner::new(TestConfig {
        timeout_secs: 60,
        ..TestConfig::default()
    })
}

/// A task using the fixture patches and [`TEST_COMMAND`].
pub fn task(repo: &str, base: &Revision, fix: &str) -> Task {
    let mut task = Task::new(
        repo.parse::<RepoId>().expect("valid repo id"),
        base.clone(),
        Patch::new(TEST_PATCH),
        Patch::new(fix),
    );
    task.test_command = TestCommand::new(TEST_COMMAND);
    task
}
