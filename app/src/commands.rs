//! Terminal command parsing. Anything that is not a slash command is a
//! message for the assistant.

use std::str::FromStr;

use her_os_core::game::Choice;
use her_os_core::orchestrator::Mode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Listen,
    Persona,
    Mode(Mode),
    Topic,
    Play(Choice),
    Key(String),
    Export,
    Clear,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>                      talk to the assistant
  /listen                     start voice capture
  /persona                    switch between wendy and liz
  /mode <home|cohost|game>    change mode
  /topic                      pick a new co-host topic
  /play <rock|paper|scissors> play a round
  /key <api key>              save your API key (empty clears it)
  /export                     save the transcript as JSON
  /clear                      forget the conversation
  /quit                       exit";

/// `Ok(None)` for blank input.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match name.to_ascii_lowercase().as_str() {
        "listen" | "mic" => Command::Listen,
        "persona" => Command::Persona,
        "mode" => Command::Mode(parse_mode(arg)?),
        "topic" => Command::Topic,
        "play" => Command::Play(Choice::from_str(arg).map_err(|err| err.to_string())?),
        "key" => Command::Key(arg.to_string()),
        "export" => Command::Export,
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Some(command))
}

fn parse_mode(arg: &str) -> Result<Mode, String> {
    match arg.to_ascii_lowercase().as_str() {
        "home" => Ok(Mode::Home),
        "cohost" | "co-host" => Ok(Mode::CoHost),
        "game" => Ok(Mode::Game),
        other => Err(format!("unknown mode '{other}', expected home, cohost or game")),
    }
}
