//! Command execution
//!
//! External tools are described as a small tree of [`CommandNode`]s (a
//! single invocation, a pipe between two nodes, or a redirection of a node's
//! stdout into a file) and evaluated by one recursive interpreter.
//!
//! # Modes
//!
//! An [`ExecContext`] decides how a tree is evaluated:
//!
//! | Mode       | Behaviour |
//! |------------|-----------|
//! | `Live`     | Spawns real processes, each in its own process group |
//! | `Simulate` | Logs the command line, spawns nothing, opens no files |
//!
//! A simulated run always succeeds. A captured stdout is `{}` so JSON
//! consumers keep working; callers that need realistic data supply a fixture.
//!
//! # Pipelines
//!
//! Every stage of a pipe runs concurrently, connected by OS pipes. The exit
//! status of the last stage decides success, like a shell without
//! `pipefail`. All stage codes are kept in [`Outcome::pipeline`].

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};

/// Placeholder stdout of a simulated run with captured stdout.
pub const SIMULATED_STDOUT: &str = "{}";

/// A tree of external command invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandNode {
    /// A single program with its arguments
    Leaf { program: String, args: Vec<String> },
    /// `left | right`
    Pipe(Box<CommandNode>, Box<CommandNode>),
    /// `inner > path`
    Redirect { inner: Box<CommandNode>, path: PathBuf },
}

impl CommandNode {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Leaf {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Feed this node's stdout into `next`.
    pub fn pipe(self, next: CommandNode) -> Self {
        pipe(self, next)
    }

    /// Write this node's stdout to `path` instead of returning it.
    pub fn redirect(self, path: impl Into<PathBuf>) -> Self {
        redirect(self, path)
    }

    /// Argument vector of the stage whose exit status decides the outcome.
    pub fn final_argv(&self) -> Vec<String> {
        match self {
            Self::Leaf { program, args } => {
                std::iter::once(program.clone()).chain(args.iter().cloned()).collect()
            }
            Self::Pipe(_, right) => right.final_argv(),
            Self::Redirect { inner, .. } => inner.final_argv(),
        }
    }

    /// Number of processes this tree spawns in live mode.
    pub fn stage_count(&self) -> usize {
        match self {
            Self::Leaf { .. } => 1,
            Self::Pipe(left, right) => left.stage_count() + right.stage_count(),
            Self::Redirect { inner, .. } => inner.stage_count(),
        }
    }
}

/// Build a pipe node. Nothing is executed.
pub fn pipe(left: CommandNode, right: CommandNode) -> CommandNode {
    CommandNode::Pipe(Box::new(left), Box::new(right))
}

/// Build a redirect node. Nothing is executed.
pub fn redirect(inner: CommandNode, path: impl Into<PathBuf>) -> CommandNode {
    CommandNode::Redirect {
        inner: Box::new(inner),
        path: path.into(),
    }
}

impl fmt::Display for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf { program, args } => {
                let argv = std::iter::once(program.as_str()).chain(args.iter().map(String::as_str));
                write!(f, "{}", shell_words::join(argv))
            }
            Self::Pipe(left, right) => write!(f, "{} | {}", left, right),
            Self::Redirect { inner, path } => {
                write!(f, "{} > {}", inner, shell_words::quote(&path.display().to_string()))
            }
        }
    }
}

/// What to connect to the first stage's stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Input {
    /// `/dev/null`; tools run non-interactively
    #[default]
    Null,
    Inherit,
    /// Written to the stdin of the first stage, then closed
    Bytes(Vec<u8>),
}

/// Where an output stream of the final stage goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Output {
    #[default]
    Inherit,
    Null,
    /// Collected into the [`Outcome`]
    Capture,
}

impl Output {
    fn stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Null => Stdio::null(),
            Self::Capture => Stdio::piped(),
        }
    }

    /// stderr binding for stages before the last one, which nobody reads.
    fn upstream(self) -> Self {
        match self {
            Self::Capture => Self::Inherit,
            other => other,
        }
    }
}

/// Stream bindings for one evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Streams {
    pub stdin: Input,
    pub stdout: Output,
    pub stderr: Output,
}

impl Streams {
    /// Capture both stdout and stderr of the final stage.
    pub fn captured() -> Self {
        Self {
            stdin: Input::Null,
            stdout: Output::Capture,
            stderr: Output::Capture,
        }
    }

    pub fn with_stdin(mut self, input: Input) -> Self {
        self.stdin = input;
        self
    }
}

/// Result of evaluating a command tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Exit code of the final stage (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Captured stdout of the final stage, empty unless requested
    pub stdout: String,
    /// Captured stderr of the final stage, empty unless requested
    pub stderr: String,
    /// Exit codes of every stage, left to right
    pub pipeline: Vec<Option<i32>>,
    /// Whether the outcome was synthesized by simulation mode
    pub simulated: bool,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a failed outcome of `node` into a `CommandFailure`.
    pub fn ensure_success(&self, node: &CommandNode) -> Result<()> {
        if self.success() {
            return Ok(());
        }
        Err(ProvisionError::CommandFailure {
            command: node.to_string(),
            argv: node.final_argv(),
            code: self.exit_code.unwrap_or(-1),
            stderr: self.stderr.trim().to_string(),
        })
    }

    fn simulated(node: &CommandNode, stdout: Output) -> Self {
        let stdout = match stdout {
            Output::Capture => SIMULATED_STDOUT.to_string(),
            _ => String::new(),
        };
        Self {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
            pipeline: vec![Some(0); node.stage_count()],
            simulated: true,
        }
    }
}

/// Live or simulated evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecMode {
    #[default]
    Live,
    Simulate,
}

/// Execution context shared by every component of a provisioning run.
///
/// Cloning is cheap; clones share the command journal.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    mode: ExecMode,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ExecContext {
    pub fn new(mode: ExecMode) -> Self {
        Self {
            mode,
            journal: Arc::default(),
        }
    }

    pub fn live() -> Self {
        Self::new(ExecMode::Live)
    }

    pub fn simulated() -> Self {
        Self::new(ExecMode::Simulate)
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn is_simulated(&self) -> bool {
        self.mode == ExecMode::Simulate
    }

    /// Rendered command lines of every `run` so far, in order.
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    fn record(&self, line: &str) {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(line.to_string());
        }
    }

    /// Evaluate `node`. A non-zero exit status is not an error here.
    pub fn run(&self, node: &CommandNode, streams: Streams) -> Result<Outcome> {
        let line = node.to_string();
        self.record(&line);

        if self.is_simulated() {
            info!("[DRY RUN] {}", line);
            return Ok(Outcome::simulated(node, streams.stdout));
        }

        debug!("exec: {}", line);
        let outcome = run_live(node, streams)?;
        debug!(code = ?outcome.exit_code, pipeline = ?outcome.pipeline, "exec finished: {}", line);
        Ok(outcome)
    }

    /// Evaluate `node` with stderr captured and fail on a non-zero exit status.
    pub fn raise_run(&self, node: &CommandNode, streams: Streams) -> Result<Outcome> {
        let streams = Streams {
            stderr: Output::Capture,
            ..streams
        };
        let outcome = self.run(node, streams)?;
        outcome.ensure_success(node)?;
        if !outcome.stderr.trim().is_empty() {
            debug!("{}: {}", node, outcome.stderr.trim());
        }
        Ok(outcome)
    }

    /// Opaque single invocation: run `program args...` and fail on non-zero exit.
    pub fn execute<I, S>(&self, program: &str, args: I) -> Result<Outcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raise_run(&CommandNode::new(program, args), Streams::default())
    }
}

/// A spawned stage of a live evaluation.
struct Stage {
    child: Child,
}

#[derive(Default)]
struct Running {
    stages: Vec<Stage>,
    stdin: Option<ChildStdin>,
}

impl Running {
    /// Kill and reap everything spawned so far.
    fn abort(self) {
        for mut stage in self.stages {
            let pid = stage.child.id();
            let _ = stage.child.kill();
            let _ = stage.child.wait();
            ChildRegistry::untrack(pid);
        }
    }
}

fn run_live(node: &CommandNode, streams: Streams) -> Result<Outcome> {
    let stdin = match &streams.stdin {
        Input::Null => Stdio::null(),
        Input::Inherit => Stdio::inherit(),
        Input::Bytes(_) => Stdio::piped(),
    };

    let mut running = Running::default();
    if let Err(e) = spawn(node, stdin, streams.stdout.stdio(), streams.stderr, &mut running) {
        running.abort();
        return Err(e);
    }

    let feeder = match (streams.stdin, running.stdin.take()) {
        (Input::Bytes(data), Some(pipe)) => Some(feed(pipe, data)),
        _ => None,
    };

    let mut stages = running.stages;
    let last = stages
        .pop()
        .ok_or_else(|| ProvisionError::parse("command tree spawned no process"))?;
    let last_pid = last.child.id();
    let output = last.child.wait_with_output();
    ChildRegistry::untrack(last_pid);
    let output = output?;

    let mut pipeline = Vec::with_capacity(stages.len() + 1);
    for mut stage in stages {
        let pid = stage.child.id();
        let status = stage.child.wait();
        ChildRegistry::untrack(pid);
        pipeline.push(status?.code());
    }
    pipeline.push(output.status.code());

    if let Some(handle) = feeder {
        // a stage that exits without reading its input is not an error
        let _ = handle.join();
    }

    Ok(Outcome {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        pipeline,
        simulated: false,
    })
}

fn feed(mut pipe: ChildStdin, data: Vec<u8>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = pipe.write_all(&data) {
            debug!("stdin feed ended early: {}", e);
        }
    })
}

/// Spawn every stage of `node`, left to right, without waiting.
///
/// The output stage of a subtree is always the last stage it pushes.
fn spawn(
    node: &CommandNode,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Output,
    running: &mut Running,
) -> Result<()> {
    match node {
        CommandNode::Leaf { program, args } => {
            let mut child = std::process::Command::new(program)
                .args(args)
                .stdin(stdin)
                .stdout(stdout)
                .stderr(stderr.stdio())
                .in_new_process_group()
                .spawn()
                .map_err(|source| ProvisionError::Spawn {
                    program: program.clone(),
                    source,
                })?;
            ChildRegistry::track(child.id());
            if running.stdin.is_none() {
                running.stdin = child.stdin.take();
            }
            running.stages.push(Stage { child });
            Ok(())
        }
        CommandNode::Pipe(left, right) => {
            spawn(left, stdin, Stdio::piped(), stderr.upstream(), running)?;
            let upstream = running
                .stages
                .last_mut()
                .and_then(|stage| stage.child.stdout.take())
                .map(Stdio::from)
                .unwrap_or_else(Stdio::null);
            spawn(right, upstream, stdout, stderr, running)
        }
        CommandNode::Redirect { inner, path } => {
            let file = create_target(path)?;
            spawn(inner, stdin, Stdio::from(file), stderr, running)
        }
    }
}

/// Create or truncate a redirect target.
fn create_target(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| {
        ProvisionError::Io(std::io::Error::new(
            e.kind(),
            format!("cannot open redirect target {}: {}", path.display(), e),
        ))
    })
}
