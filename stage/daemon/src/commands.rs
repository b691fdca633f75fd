//! Line commands read from stdin

use std::str::FromStr;

use thiserror::Error;

/// One controller command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `activate <persona>`
    Activate(String),
    /// `dismiss`
    Dismiss,
    /// `reset`
    Reset,
    /// `speech`
    Speech,
    /// `response`
    Response,
    /// `status`: print the current snapshot
    Status,
    /// `personas`: print the persona list
    Personas,
    /// `help`
    Help,
    /// `quit` / `exit`
    Quit,
}

/// Why a line is not a command
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Blank line
    #[error("empty command")]
    Empty,

    /// `activate` without a persona
    #[error("usage: activate <persona>")]
    MissingPersona,

    /// Unknown verb
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
}

pub const HELP: &str = "\
commands:
  activate <persona>   bring a persona on stage
  dismiss              send the persona away
  reset                return to idle immediately
  speech               user started speaking
  response             persona started responding
  status               print the current snapshot
  personas             list configured personas
  quit                 shut down";

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseError::Empty);
        };

        match verb.to_ascii_lowercase().as_str() {
            "activate" | "a" => words
                .next()
                .map(|id| Command::Activate(id.to_string()))
                .ok_or(ParseError::MissingPersona),
            "dismiss" | "d" => Ok(Command::Dismiss),
            "reset" | "r" => Ok(Command::Reset),
            "speech" | "s" => Ok(Command::Speech),
            "response" => Ok(Command::Response),
            "status" => Ok(Command::Status),
            "personas" | "ls" => Ok(Command::Personas),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}
