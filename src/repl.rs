use crate::auth::AccountDirectory;
use crate::core::db::{ConnectionDescriptor, Connector, TabularResult, Value};
use crate::core::{ConsoleError, Result};
use crate::gateway::{Gateway, Operation, OperationKind, Role};
use crate::results_grid::{ExportFormat, ResultsGrid};
use crate::sql;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{self, BufRead, Write};
use tracing::info;

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+\.\d*|\.\d+|\d+)([eE][+-]?\d+)?$").expect("number pattern is valid")
});

static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^(?:call\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*;?\s*$")
        .expect("call pattern is valid")
});

/// Separates statement text from its bind values: `SELECT ... WHERE id = ? <| 3`.
const PARAMS_MARKER: &str = "<|";

/// Represents a parsed console command.
#[derive(Debug, PartialEq)]
pub enum Command {
    Login { username: String, secret: String },
    Logout,
    WhoAmI,
    Ping,
    Read { sql: String, params: Vec<Value> },
    Exec { sql: String, params: Vec<Value> },
    Call { procedure: String, params: Vec<Value> },
    Sql { sql: String, params: Vec<Value> },
    Procs,
    Export { format: String, path: Option<String> },
    Help,
    Quit,
    Unknown(String),
}

/// Parses a user input string into a corresponding `Command`.
///
/// Input starting with a colon (`:`) is a command; anything else is SQL
/// whose kind is decided by `sql::classify`.
///
/// # Errors
///
/// `ConsoleError::Command` when a parameter list or a procedure call is malformed.
pub fn parse_command(input: &str) -> Result<Command> {
    let input = input.trim();
    if !input.starts_with(':') {
        let (sql, params) = split_statement(input)?;
        return Ok(Command::Sql { sql, params });
    }

    let trimmed = &input[1..];
    let (name, rest) = match trimmed.find(char::is_whitespace) {
        Some(i) => (&trimmed[..i], trimmed[i..].trim()),
        None => (trimmed, ""),
    };
    let parts: Vec<&str> = rest.split_whitespace().collect();

    let command = match name {
        "login" => match parts.as_slice() {
            [username, secret] => Command::Login {
                username: username.to_string(),
                secret: secret.to_string(),
            },
            [username] => Command::Login {
                username: username.to_string(),
                secret: String::new(),
            },
            _ => Command::Unknown(input.to_string()),
        },
        "logout" => Command::Logout,
        "whoami" => Command::WhoAmI,
        "ping" | "reconnect" => Command::Ping,
        "read" | "exec" if rest.is_empty() => Command::Unknown(input.to_string()),
        "read" => {
            let (sql, params) = split_statement(rest)?;
            Command::Read { sql, params }
        }
        "exec" => {
            let (sql, params) = split_statement(rest)?;
            Command::Exec { sql, params }
        }
        "call" => {
            let (procedure, params) = parse_call(rest)?;
            Command::Call { procedure, params }
        }
        "procs" => Command::Procs,
        "export" => match parts.as_slice() {
            [format] => Command::Export {
                format: format.to_string(),
                path: None,
            },
            [format, path] => Command::Export {
                format: format.to_string(),
                path: Some(path.to_string()),
            },
            _ => Command::Unknown(input.to_string()),
        },
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(input.to_string()),
    };
    Ok(command)
}

/// Splits `sql <| p1, p2` into the statement and its parsed parameters.
///
/// Only a marker outside single-quoted literals counts; the last one wins.
fn split_statement(text: &str) -> Result<(String, Vec<Value>)> {
    let marker = quote_aware(text)
        .filter(|&(i, _, quoted)| !quoted && text[i..].starts_with(PARAMS_MARKER))
        .map(|(i, _, _)| i)
        .last();
    match marker {
        Some(i) => {
            let params = parse_params(&text[i + PARAMS_MARKER.len()..])?;
            Ok((text[..i].trim().to_string(), params))
        }
        None => Ok((text.trim().to_string(), Vec::new())),
    }
}

/// Yields each character with whether it sits inside a single-quoted
/// literal. Quote characters count as quoted; `''` escapes need no special
/// case because they toggle twice.
fn quote_aware(text: &str) -> impl Iterator<Item = (usize, char, bool)> + '_ {
    let mut in_quote = false;
    text.char_indices().map(move |(i, c)| {
        if c == '\'' {
            in_quote = !in_quote;
            return (i, c, true);
        }
        (i, c, in_quote)
    })
}

/// Parses `Name(arg, ...)`, with or without a leading `CALL`.
pub fn parse_call(text: &str) -> Result<(String, Vec<Value>)> {
    let caps = CALL
        .captures(text.trim())
        .ok_or_else(|| ConsoleError::Command(format!("cannot parse procedure call '{}'", text.trim())))?;
    let procedure = caps[1].to_string();
    let params = match caps.get(2) {
        Some(args) => parse_params(args.as_str())?,
        None => Vec::new(),
    };
    Ok((procedure, params))
}

/// Parses a comma-separated list of literals. Commas inside quotes do not split.
pub fn parse_params(text: &str) -> Result<Vec<Value>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    for (_, c, quoted) in quote_aware(text) {
        match c {
            ',' if !quoted => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if text.matches('\'').count() % 2 == 1 {
        return Err(ConsoleError::Command(format!("unterminated quote in '{}'", text.trim())));
    }
    tokens.push(current);

    tokens.iter().map(|t| parse_literal(t)).collect()
}

/// Parses one literal: `NULL`, an integer, a real, `'quoted text'` or a bare word.
pub fn parse_literal(token: &str) -> Result<Value> {
    let t = token.trim();
    if t.is_empty() {
        return Err(ConsoleError::Command("empty parameter".to_string()));
    }
    if t.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    if let Some(inner) = t.strip_prefix('\'') {
        return match inner.strip_suffix('\'') {
            Some(body) => Ok(Value::Text(body.replace("''", "'"))),
            None => Err(ConsoleError::Command(format!("unterminated quote in {}", t))),
        };
    }
    if let Ok(i) = t.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    if NUMBER.is_match(t) {
        if let Ok(f) = t.parse::<f64>() {
            return Ok(Value::Real(f));
        }
    }
    Ok(Value::Text(t.to_string()))
}

/// What the console has to say about one line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Output(String),
    /// Non-fatal notice, e.g. an operation the role may not run
    Warning(String),
    Error(String),
    Quit,
}

impl Reply {
    /// Text to print, with `warning:`/`error:` prefixes.
    pub fn render(&self) -> String {
        match self {
            Reply::Output(text) => text.clone(),
            Reply::Warning(text) => format!("warning: {}\n", text),
            Reply::Error(text) => format!("error: {}\n", text),
            Reply::Quit => String::new(),
        }
    }
}

const HELP: &str = "\
Available commands:
  :login <user> <secret> - Log in and take on that account's role
  :logout - Forget the current role
  :whoami - Show the current role
  :ping - Check that the database is reachable
  :read <sql> [<| params] - Run a query
  :exec <sql> [<| params] - Run a statement and commit it
  :call <Name>(args) - Invoke a stored procedure
  :procs - List the stored procedures and functions of the embedded driver
  :export <csv|json|markdown> [path] - Export the last result
  :help - List all available commands
  :quit - Leave the console

Or enter SQL directly; queries run as reads, everything else as changes.
Parameters: NULL, 42, 3.5, 'quoted text' or bare words, comma-separated.
";

/// Operator console: holds the login state and the last result, and sends
/// every operation through the gateway with the current role.
pub struct Console<C: Connector> {
    gateway: Gateway<C>,
    descriptor: ConnectionDescriptor,
    accounts: AccountDirectory,
    procedure_names: Vec<String>,
    function_names: Vec<String>,
    role: Option<Role>,
    last_result: Option<TabularResult>,
}

impl<C: Connector> Console<C> {
    pub fn new(gateway: Gateway<C>, descriptor: ConnectionDescriptor, accounts: AccountDirectory) -> Self {
        Console {
            gateway,
            descriptor,
            accounts,
            procedure_names: Vec::new(),
            function_names: Vec::new(),
            role: None,
            last_result: None,
        }
    }

    pub fn with_procedure_names(mut self, names: Vec<String>) -> Self {
        self.procedure_names = names;
        self
    }

    pub fn with_function_names(mut self, names: Vec<String>) -> Self {
        self.function_names = names;
        self
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn last_result(&self) -> Option<&TabularResult> {
        self.last_result.as_ref()
    }

    /// Parses and handles one line of input.
    pub fn handle_line(&mut self, line: &str) -> Reply {
        match parse_command(line) {
            Ok(command) => self.handle(command),
            Err(e) => Reply::Error(e.to_string()),
        }
    }

    pub fn handle(&mut self, command: Command) -> Reply {
        match command {
            Command::Help => Reply::Output(HELP.to_string()),
            Command::Quit => Reply::Quit,
            Command::Login { username, secret } => self.login(&username, &secret),
            Command::Logout => {
                self.role = None;
                self.last_result = None;
                Reply::Output("Logged out.\n".to_string())
            }
            Command::WhoAmI => match self.role {
                Some(Role::Administrator) => Reply::Output("Logged in as: Admin\n".to_string()),
                Some(Role::ReadOnly) => Reply::Output("Logged in as: Limited User (View Only)\n".to_string()),
                None => Reply::Output("Not logged in.\n".to_string()),
            },
            Command::Ping => match self.gateway.ping(&self.descriptor) {
                Ok(()) => Reply::Output(format!("Connected to database: {}\n", self.descriptor.database)),
                Err(e) => Reply::Error(e.to_string()),
            },
            Command::Read { sql, params } => self.run(Operation::read(sql, params)),
            Command::Exec { sql, params } => self.run(Operation::mutate(sql, params)),
            Command::Call { procedure, params } => self.run(Operation::invoke(procedure, params)),
            Command::Sql { sql, params } => {
                if sql.is_empty() {
                    return Reply::Output(String::new());
                }
                match sql::classify(&sql) {
                    OperationKind::Read => self.run(Operation::read(sql, params)),
                    OperationKind::Mutate => self.run(Operation::mutate(sql, params)),
                    OperationKind::Invoke => match parse_call(&sql) {
                        Ok((procedure, mut args)) => {
                            args.extend(params);
                            self.run(Operation::invoke(procedure, args))
                        }
                        Err(e) => Reply::Error(e.to_string()),
                    },
                }
            }
            Command::Procs => Reply::Output(self.routines()),
            Command::Export { format, path } => match self.export(&format, path.as_deref()) {
                Ok(text) => Reply::Output(text),
                Err(e) => Reply::Error(e.to_string()),
            },
            Command::Unknown(text) => Reply::Error(format!("unknown command '{}', try :help", text)),
        }
    }

    fn routines(&self) -> String {
        if self.procedure_names.is_empty() && self.function_names.is_empty() {
            return "No stored procedures or functions configured.\n".to_string();
        }
        let mut text = String::new();
        for name in &self.procedure_names {
            text.push_str(&format!("{} (procedure)\n", name));
        }
        for name in &self.function_names {
            text.push_str(&format!("{} (function)\n", name));
        }
        text
    }

    fn login(&mut self, username: &str, secret: &str) -> Reply {
        let Some(role) = self.accounts.authenticate(username, secret) else {
            return Reply::Error("Invalid credentials".to_string());
        };
        self.role = Some(role);
        let label = match role {
            Role::Administrator => "ADMIN",
            Role::ReadOnly => "READONLY",
        };
        match self.gateway.ping(&self.descriptor) {
            Ok(()) => Reply::Output(format!(
                "Logged in as {}\nConnected to database: {}\n",
                label, self.descriptor.database
            )),
            Err(e) => Reply::Error(format!("logged in as {}, but {}", label, e)),
        }
    }

    fn run(&mut self, operation: Operation) -> Reply {
        let Some(role) = self.role else {
            return Reply::Warning("please :login first".to_string());
        };
        let kind = operation.kind();
        match self.gateway.execute(&operation, role, &self.descriptor) {
            Ok(result) => {
                let text = match kind {
                    OperationKind::Mutate => "Query OK, change committed.\n".to_string(),
                    _ => ResultsGrid::new(&result).render(),
                };
                self.last_result = Some(result);
                Reply::Output(text)
            }
            Err(e) if e.is_warning() => Reply::Warning(e.to_string()),
            Err(e) => Reply::Error(e.to_string()),
        }
    }

    fn export(&self, format: &str, path: Option<&str>) -> Result<String> {
        let format: ExportFormat = format.parse()?;
        let result = self
            .last_result
            .as_ref()
            .ok_or_else(|| ConsoleError::Command("nothing to export yet".to_string()))?;
        let text = ResultsGrid::new(result).export(format)?;
        match path {
            Some(path) => {
                std::fs::write(path, &text)?;
                info!(path, rows = result.row_count(), "exported result");
                Ok(format!("Exported {} rows to {}\n", result.row_count(), path))
            }
            None => Ok(format!("{}\n", text.trim_end())),
        }
    }
}

/// Runs the console loop on stdin/stdout until `:quit` or end of input.
pub fn run_repl<C: Connector>(console: &mut Console<C>) -> Result<()> {
    println!("Welcome to the marketgate console! Type :help for commands, :quit to exit.");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        stdout.flush()?;
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = console.handle_line(&line);
        if reply == Reply::Quit {
            break;
        }
        print!("{}", reply.render());
    }
    println!();
    Ok(())
}
