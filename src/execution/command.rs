//! Query service backed by an external command.
//!
//! [`CommandQueryService`] runs a configured program for every query, for
//! example a database CLI:
//!
//! ```rust
//! use dagrun::CommandQueryService;
//!
//! // psql -At -c "<query>"
//! let psql = CommandQueryService::builder("psql")
//!     .args(["-At", "-c"])
//!     .env("PGDATABASE", "warehouse")
//!     .build();
//!
//! // sqlite3 analytics.db < "<query>"
//! let sqlite = CommandQueryService::builder("sqlite3")
//!     .arg("analytics.db")
//!     .query_on_stdin(true)
//!     .build();
//! ```
//!
//! Exit status 0 is success and the row count is derived from stdout (see
//! [`RowCount`]). A non-zero exit is a [`QueryError::Failed`] carrying stderr.
//! A program that cannot be started is a [`QueryError::Fault`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::query::{QueryError, QueryService};

/// How a row count is derived from a successful command's stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowCount {
    /// Count non-empty output lines.
    #[default]
    NonEmptyLines,
    /// Parse an integer from the last non-empty output line.
    LastLine,
}

impl RowCount {
    fn count(&self, stdout: &str) -> Result<u64, QueryError> {
        let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        match self {
            RowCount::NonEmptyLines => Ok(lines.count() as u64),
            RowCount::LastLine => {
                let last = lines.next_back().unwrap_or_default();
                last.parse().map_err(|_| {
                    QueryError::Failed(format!("could not read row count from output: {:?}", last))
                })
            }
        }
    }
}

/// A query service that shells out to an external program.
#[derive(Debug, Clone)]
pub struct CommandQueryService {
    program: String,
    args: Vec<String>,
    query_on_stdin: bool,
    row_count: RowCount,
    environment: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl CommandQueryService {
    /// Create a new builder for the given program.
    pub fn builder(program: impl Into<String>) -> CommandQueryServiceBuilder {
        CommandQueryServiceBuilder::new(program)
    }

    /// Get the program being executed.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the fixed arguments placed before the query.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether the query is written to stdin instead of passed as an argument.
    pub fn query_on_stdin(&self) -> bool {
        self.query_on_stdin
    }

    fn command(&self, query: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if !self.query_on_stdin {
            cmd.arg(query);
        }
        cmd.envs(&self.environment);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(if self.query_on_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl QueryService for CommandQueryService {
    async fn execute(&self, query: &str) -> Result<u64, QueryError> {
        let mut child = self
            .command(query)
            .spawn()
            .map_err(|e| QueryError::Fault(format!("failed to start '{}': {}", self.program, e)))?;

        // fed from its own task so a chatty child cannot fill stdout while
        // we are still blocked on its stdin
        let writer = child.stdin.take().map(|mut stdin| {
            let query = query.to_owned();
            tokio::spawn(async move {
                stdin.write_all(query.as_bytes()).await
                // dropping stdin closes it and signals end of query
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| QueryError::Fault(e.to_string()))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // the child exited without reading all of its input
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => {
                    return Err(QueryError::Fault(format!("failed to write query: {}", e)));
                }
                Err(e) => {
                    return Err(QueryError::Fault(format!("query writer failed: {}", e)));
                }
            }
        }

        if output.status.success() {
            self.row_count
                .count(&String::from_utf8_lossy(&output.stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                match output.status.code() {
                    Some(code) => format!("'{}' exited with code {}", self.program, code),
                    None => format!("'{}' was terminated by a signal", self.program),
                }
            } else {
                stderr
            };
            Err(QueryError::Failed(message))
        }
    }
}

/// Builder for [`CommandQueryService`].
#[derive(Debug, Clone)]
pub struct CommandQueryServiceBuilder {
    program: String,
    args: Vec<String>,
    query_on_stdin: bool,
    row_count: RowCount,
    environment: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl CommandQueryServiceBuilder {
    /// Create a new builder with the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            query_on_stdin: false,
            row_count: RowCount::default(),
            environment: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Write the query to stdin rather than appending it as the last argument.
    pub fn query_on_stdin(mut self, enabled: bool) -> Self {
        self.query_on_stdin = enabled;
        self
    }

    /// Set how the row count is derived.
    pub fn row_count(mut self, row_count: RowCount) -> Self {
        self.row_count = row_count;
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build the service.
    pub fn build(self) -> CommandQueryService {
        CommandQueryService {
            program: self.program,
            args: self.args,
            query_on_stdin: self.query_on_stdin,
            row_count: self.row_count,
            environment: self.environment,
            working_dir: self.working_dir,
        }
    }
}
