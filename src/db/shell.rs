//! Line-oriented command shell over a Git-backed session.

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;

use super::api::{Session, SessionError};
use crate::storage::{GitRepository, GitTransaction, InvalidNameError, Row, RowKey, StorageError, StorageResult, TableName};
use crate::transaction::TransactionError;

pub type ShellResult<T> = Result<T, ShellError>;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<StorageError> for ShellError {
    fn from(err: StorageError) -> Self {
        Self::Session(err.into())
    }
}

impl From<TransactionError> for ShellError {
    fn from(err: TransactionError) -> Self {
        Self::Session(err.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("invalid JSON row: {0}")]
    InvalidJson(String),
}

/// One shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Begin,
    Commit,
    Rollback,
    CreateTable(TableName),
    Insert {
        table: TableName,
        key: RowKey,
        data: Value,
    },
    Delete {
        table: TableName,
        key: RowKey,
    },
    Select(TableName),
    Status,
    Ping,
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(input: &str) -> Result<Self, ParseError> {
        let input = input.trim().trim_end_matches(';').trim();
        let (head, rest) = split_word(input);

        match head.to_ascii_uppercase().as_str() {
            "BEGIN" => Ok(Self::Begin),
            "COMMIT" => Ok(Self::Commit),
            "ROLLBACK" => Ok(Self::Rollback),
            "STATUS" => Ok(Self::Status),
            "PING" => Ok(Self::Ping),
            ".HELP" | ".H" | ".?" => Ok(Self::Help),
            ".EXIT" | ".QUIT" | ".Q" => Ok(Self::Exit),
            "CREATE" => {
                let (kw, rest) = split_word(rest);
                let (name, extra) = split_word(rest);
                if !kw.eq_ignore_ascii_case("TABLE") || name.is_empty() || !extra.is_empty() {
                    return Err(ParseError::Usage("CREATE TABLE <table>"));
                }
                Ok(Self::CreateTable(TableName::new(name)?))
            }
            "INSERT" => {
                let (table, rest) = split_word(rest);
                let (key, json) = split_word(rest);
                if table.is_empty() || key.is_empty() {
                    return Err(ParseError::Usage("INSERT <table> <key> [json]"));
                }
                let data = if json.is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(json).map_err(|e| ParseError::InvalidJson(e.to_string()))?
                };
                if !data.is_object() {
                    return Err(ParseError::InvalidJson("row must be a JSON object".into()));
                }
                Ok(Self::Insert {
                    table: TableName::new(table)?,
                    key: RowKey::new(key)?,
                    data,
                })
            }
            "DELETE" => {
                let (table, rest) = split_word(rest);
                let (key, extra) = split_word(rest);
                if table.is_empty() || key.is_empty() || !extra.is_empty() {
                    return Err(ParseError::Usage("DELETE <table> <key>"));
                }
                Ok(Self::Delete {
                    table: TableName::new(table)?,
                    key: RowKey::new(key)?,
                })
            }
            "SELECT" => {
                let (table, extra) = split_word(rest);
                if table.is_empty() || !extra.is_empty() {
                    return Err(ParseError::Usage("SELECT <table>"));
                }
                Ok(Self::Select(TableName::new(table)?))
            }
            _ => Err(ParseError::Unknown(head.to_string())),
        }
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(pos) => (&input[..pos], input[pos..].trim_start()),
        None => (input, ""),
    }
}

/// Split a script on `;`, ignoring semicolons inside JSON strings.
pub fn split_commands(script: &str) -> Vec<&str> {
    let mut commands = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in script.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => {
                commands.push(script[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    commands.push(script[start..].trim());
    commands.retain(|c| !c.is_empty());
    commands
}

/// Shell configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Prompt string; empty disables the prompt.
    pub prompt: String,
    /// Print each command before its result.
    pub echo: bool,
    /// Show timing information.
    pub timing: bool,
    /// Max rows to display.
    pub max_rows: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "gitnest> ".into(),
            echo: false,
            timing: false,
            max_rows: 100,
        }
    }
}

impl ShellConfig {
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn echo(mut self, value: bool) -> Self {
        self.echo = value;
        self
    }

    pub fn timing(mut self, value: bool) -> Self {
        self.timing = value;
        self
    }
}

/// What a command produced.
#[derive(Debug)]
enum Reply {
    Message(String),
    Rows(Vec<Row>),
    Exit,
}

pub struct Shell {
    session: Session<GitRepository>,
    config: ShellConfig,
}

impl Shell {
    pub fn new(session: Session<GitRepository>) -> Self {
        Self::with_config(session, ShellConfig::default())
    }

    pub fn with_config(session: Session<GitRepository>, config: ShellConfig) -> Self {
        Self { session, config }
    }

    pub fn session(&self) -> &Session<GitRepository> {
        &self.session
    }

    pub fn into_session(self) -> Session<GitRepository> {
        self.session
    }

    /// Run commands from `input` until EOF or `.exit`. Errors are reported
    /// and the loop continues.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut out: W) -> ShellResult<()> {
        let mut lines = input.lines();
        loop {
            if !self.config.prompt.is_empty() {
                write!(out, "{}", self.config.prompt)?;
                out.flush()?;
            }
            let Some(line) = lines.next() else {
                break;
            };
            let line = line?;

            for cmd in split_commands(&line) {
                match self.execute(cmd, &mut out) {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    Err(ShellError::Io(e)) => return Err(e.into()),
                    Err(e) => writeln!(out, "Error: {}", e)?,
                }
            }
        }
        Ok(())
    }

    /// Run a `;`-separated script, stopping at the first error.
    pub fn run_script<W: Write>(&mut self, script: &str, mut out: W) -> ShellResult<()> {
        for cmd in split_commands(script) {
            if self.execute(cmd, &mut out)? {
                break;
            }
        }
        Ok(())
    }

    /// Execute one command. Returns `true` when the shell should exit.
    pub fn execute<W: Write>(&mut self, input: &str, out: &mut W) -> ShellResult<bool> {
        if self.config.echo {
            writeln!(out, "> {}", input)?;
        }
        let start = Instant::now();
        let reply = self.dispatch(input.parse()?)?;

        match reply {
            Reply::Exit => return Ok(true),
            Reply::Message(msg) => writeln!(out, "{}", msg)?,
            Reply::Rows(rows) => self.print_rows(&rows, out)?,
        }
        if self.config.timing {
            writeln!(out, "Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0)?;
        }
        Ok(false)
    }

    fn dispatch(&mut self, command: Command) -> ShellResult<Reply> {
        let reply = match command {
            Command::Begin => {
                self.session.begin()?;
                Reply::Message(format!("BEGIN (depth {})", self.session.transactions().depth()))
            }
            Command::Commit => {
                self.session.commit()?;
                if self.session.transactions().is_open() {
                    Reply::Message(format!(
                        "COMMIT vote recorded ({} of {})",
                        self.session.transactions().votes(),
                        self.session.transactions().depth()
                    ))
                } else {
                    Reply::Message("COMMIT".into())
                }
            }
            Command::Rollback => {
                self.session.rollback()?;
                Reply::Message("ROLLBACK".into())
            }
            Command::CreateTable(table) => {
                self.write(|tx| tx.create_table(&table))?;
                Reply::Message(format!("CREATE TABLE {}", table))
            }
            Command::Insert { table, key, data } => {
                let row = Row::from_value(key, data)?;
                self.write(|tx| tx.insert(&table, row))?;
                Reply::Message("INSERT 1".into())
            }
            Command::Delete { table, key } => {
                self.write(|tx| tx.delete(&table, &key))?;
                Reply::Message("DELETE 1".into())
            }
            Command::Select(table) => Reply::Rows(self.session.scan(&table)?),
            Command::Status => Reply::Message(self.status()),
            Command::Ping => {
                self.session.ping()?;
                Reply::Message("PONG".into())
            }
            Command::Help => Reply::Message(HELP.trim_end().to_string()),
            Command::Exit => Reply::Exit,
        };
        Ok(reply)
    }

    /// Run a write on the open transaction, or autocommit it in a scope of
    /// its own when none is open.
    fn write<F>(&mut self, f: F) -> ShellResult<()>
    where
        F: FnOnce(&mut GitTransaction) -> StorageResult<()>,
    {
        if let Some(tx) = self.session.tx_mut() {
            f(tx)?;
            return Ok(());
        }
        self.session.with_transaction(|s| {
            let tx = s.tx_mut().ok_or(TransactionError::NotInTransaction)?;
            Ok(f(tx)?)
        })?;
        Ok(())
    }

    fn status(&self) -> String {
        let txs = self.session.transactions();
        match self.session.tx() {
            Some(tx) => {
                let savepoints: Vec<&str> = txs.savepoints().iter().map(|s| s.as_str()).collect();
                format!(
                    "transaction {} open: depth={} votes={} tip={} savepoints=[{}]",
                    tx.id(),
                    txs.depth(),
                    txs.votes(),
                    tx.tip().short(),
                    savepoints.join(", ")
                )
            }
            None => "no transaction".into(),
        }
    }

    fn print_rows<W: Write>(&self, rows: &[Row], out: &mut W) -> io::Result<()> {
        if rows.is_empty() {
            return writeln!(out, "(0 rows)");
        }

        let columns: Vec<&String> = rows
            .iter()
            .flat_map(|row| row.data.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut widths: Vec<usize> = std::iter::once(3).chain(columns.iter().map(|c| c.len())).collect();
        for row in rows {
            widths[0] = widths[0].max(row.key.as_str().len());
            for (i, col) in columns.iter().enumerate() {
                if let Some(val) = row.get(col) {
                    widths[i + 1] = widths[i + 1].max(format_value(val).len());
                }
            }
        }

        let header: Vec<String> = std::iter::once("key")
            .chain(columns.iter().map(|c| c.as_str()))
            .enumerate()
            .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
            .collect();
        writeln!(out, "{}", header.join(" | ").trim_end())?;

        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(out, "{}", sep.join("-+-"))?;

        let limit = rows.len().min(self.config.max_rows);
        for row in rows.iter().take(limit) {
            let values: Vec<String> = std::iter::once(row.key.as_str().to_string())
                .chain(columns.iter().map(|col| row.get(col).map(format_value).unwrap_or_default()))
                .enumerate()
                .map(|(i, val)| format!("{:width$}", val, width = widths[i]))
                .collect();
            writeln!(out, "{}", values.join(" | ").trim_end())?;
        }

        if rows.len() > limit {
            writeln!(out, "... ({} more rows)", rows.len() - limit)?;
        }
        writeln!(out, "({} rows)", rows.len())
    }
}

const HELP: &str = "\
Commands:
  BEGIN                       Enter a nested transaction scope
  COMMIT                      Vote to commit the innermost scope
  ROLLBACK                    Undo the innermost scope
  CREATE TABLE <table>        Create a table
  INSERT <table> <key> [json] Insert a row (JSON object)
  DELETE <table> <key>        Delete a row
  SELECT <table>              List rows (sees the open transaction)
  STATUS                      Show nesting depth, votes and savepoints
  PING                        Check the database
  .help                       Show this help message
  .exit                       Exit the shell
";

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
