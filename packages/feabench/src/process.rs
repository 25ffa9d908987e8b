//! Subprocess invocation with captured output and an optional wall-clock limit.
//!
//! Every external step of the harness (git, venv, pip, the test command) goes
//! through [`Invocation`]. Output of both streams is captured; the child is
//! placed in its own process group so that a timeout can kill the whole tree
//! (e.g. `sh -c` plus the `pytest` it spawned).

use std::{
    fmt::{self, Display, Formatter},
    io::{Read, pipe},
    path::PathBuf,
    process::{Child, ExitStatus, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

/// How often a running child is polled while waiting on a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A single external command to run in a directory.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    envs: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Invocation {
    /// Run `program` in `cwd`.
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            envs: Vec::new(),
            timeout: None,
        }
    }

    /// Run `script` with `sh -c` in `cwd`.
    pub fn shell(script: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self::new("sh", cwd).arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Kill the process (group) if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command to completion (or until the timeout fires).
    ///
    /// Returns `Err` only if the process could not be started or waited on;
    /// a non-zero exit or a timeout is reported through [`Output`].
    #[tracing::instrument(skip(self), fields(command = %self, cwd = ?self.cwd))]
    pub fn run(&self) -> Result<Output> {
        let started = Instant::now();

        // Both streams share one pipe so the output keeps the order it was
        // written in. The command holds the write ends; dropping it at the end
        // of this block lets the reader observe EOF once the child exits.
        let (reader, writer) = pipe().context("create output pipe")?;
        let mut child = {
            let mut command = std::process::Command::new(&self.program);
            command
                .args(&self.args)
                .current_dir(&self.cwd)
                .envs(self.envs.iter().map(|(k, v)| (k, v)))
                .stdin(Stdio::null())
                .stdout(writer.try_clone().context("clone output pipe")?)
                .stderr(writer);

            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt as _;
                command.process_group(0);
            }

            command.spawn().with_context(|| format!("spawn `{self}`"))?
        };

        let reader = drain(reader);
        let (status, timed_out) = wait(&mut child, self.timeout)?;
        let combined = collect(reader)?;

        let output = Output {
            status: status.code(),
            timed_out,
            combined,
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            status = ?output.status,
            timed_out,
            elapsed = ?output.elapsed,
            output = %output.combined,
            "command finished"
        );
        Ok(output)
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The result of running an [`Invocation`].
#[derive(Debug, Clone)]
pub struct Output {
    /// Exit code, if the process exited normally.
    pub status: Option<i32>,

    /// Whether the process was killed because it exceeded its timeout.
    pub timed_out: bool,

    /// Standard output and standard error, interleaved in write order.
    pub combined: String,

    pub elapsed: Duration,
}

impl Output {
    /// Exited with status zero before the deadline.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// The last `lines` lines of output, for failure notes and error sections.
    pub fn tail(&self, lines: usize) -> String {
        tail(&self.combined, lines)
    }

    /// Short human description of how the process ended.
    pub fn describe(&self) -> String {
        match (self.timed_out, self.status) {
            (true, _) => format!("timed out after {:?}", self.elapsed),
            (false, Some(code)) => format!("exit status {code}"),
            (false, None) => String::from("terminated by signal"),
        }
    }
}

/// The last `lines` lines of `text`.
pub fn tail(text: &str, lines: usize) -> String {
    let all = text.lines().collect::<Vec<_>>();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<String> {
    let bytes = handle
        .join()
        .map_err(|_| eyre!("output reader thread panicked"))?
        .context("read process output")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        return Ok((child.wait().context("wait for child")?, false));
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("poll child")? {
            return Ok((status, false));
        }
        if Instant::now() >= deadline {
            kill_tree(child);
            let status = child.wait().context("wait for child after kill")?;
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_tree(child: &mut Child) {
    tracing::warn!(pid = child.id(), "deadline exceeded, killing process group");

    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = std::process::Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
        if killed {
            return;
        }
    }

    if let Err(error) = child.kill() {
        tracing::warn!(?error, "kill child");
    }
}
