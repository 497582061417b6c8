//! Argument vectors that keep shell control tokens apart from data.

use std::fmt;

/// Shell operators that may appear unquoted in a stage command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlToken {
    /// `;`
    Sequence,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `|`
    Pipe,
    /// `>`
    Redirect,
    /// `>>`
    Append,
    /// `2>&1`
    MergeStderr,
}

impl ControlToken {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequence => ";",
            Self::And => "&&",
            Self::Or => "||",
            Self::Pipe => "|",
            Self::Redirect => ">",
            Self::Append => ">>",
            Self::MergeStderr => "2>&1",
        }
    }
}

impl fmt::Display for ControlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Emitted verbatim.
    Control(ControlToken),
    /// Always quoted into a single shell word.
    Data(String),
}

impl Token {
    fn render(&self) -> String {
        match self {
            Self::Control(control) => control.as_str().to_string(),
            Self::Data(data) => shell_quote(data),
        }
    }
}

/// An ordered command line made of data and control tokens.
///
/// Data tokens never gain shell meaning: a file name containing `;` or spaces
/// stays a single argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgVector {
    tokens: Vec<Token>,
}

impl ArgVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a vector from a program name and its arguments.
    pub fn command<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().args(args)
    }

    /// Appends one data token.
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.tokens.push(Token::Data(value.into()));
        self
    }

    /// Appends several data tokens.
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens
            .extend(values.into_iter().map(|v| Token::Data(v.into())));
        self
    }

    /// Appends one control token.
    pub fn control(mut self, token: ControlToken) -> Self {
        self.tokens.push(Token::Control(token));
        self
    }

    /// Appends `;` followed by another command.
    pub fn then(self, next: ArgVector) -> Self {
        self.control(ControlToken::Sequence).extend(next)
    }

    /// Appends `&&` followed by another command.
    pub fn and_then(self, next: ArgVector) -> Self {
        self.control(ControlToken::And).extend(next)
    }

    /// Appends all tokens of another vector.
    pub fn extend(mut self, other: ArgVector) -> Self {
        self.tokens.extend(other.tokens);
        self
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Renders the command line for `sh -c`.
    pub fn to_shell_string(&self) -> String {
        self.tokens
            .iter()
            .map(Token::render)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ArgVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c)
}

/// Quotes a string into one POSIX shell word.
///
/// Strings made only of safe characters are returned unchanged; everything
/// else is wrapped in single quotes, with embedded single quotes spliced in
/// as `'"'"'`.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value.chars().all(is_safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}
