//! Line-oriented host commands.

use std::str::FromStr;

use anyhow::{anyhow, bail};
use parley_core::CaptureErrorCode;

pub const HELP: &str = "\
commands:
  listen | stop                 start / stop a capture attempt
  partial <text>                simulate a partial recognition result
  say <text>                    simulate a final recognition result
  nomatch                       simulate a no-match capture error
  capture-error <code>          simulate any capture error (e.g. network)
  post <text>                   post a request directly
  reset                         forget the session and reconnect
  mute on|off                   mute / unmute spoken responses
  permissions on|off            record the microphone permission
  online | offline              flip network reachability
  lang <tag>                    set the preferred capture language
  announce <text>               speak a priority announcement
  state                         print the current snapshot
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Listen,
    Stop,
    Partial(String),
    Say(String),
    NoMatch,
    CaptureError(CaptureErrorCode),
    Post(String),
    Reset,
    Mute(bool),
    Permissions(bool),
    Online,
    Offline,
    Lang(String),
    Announce(String),
    State,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let text = || {
            if rest.is_empty() {
                Err(anyhow!("`{word}` needs an argument"))
            } else {
                Ok(rest.to_owned())
            }
        };
        let command = match word {
            "listen" => Command::Listen,
            "stop" => Command::Stop,
            "partial" => Command::Partial(text()?),
            "say" => Command::Say(text()?),
            "nomatch" => Command::NoMatch,
            "capture-error" => Command::CaptureError(CaptureErrorCode::from_name(&text()?)),
            "post" => Command::Post(text()?),
            "reset" => Command::Reset,
            "mute" => Command::Mute(on_off(rest)?),
            "permissions" => Command::Permissions(on_off(rest)?),
            "online" => Command::Online,
            "offline" => Command::Offline,
            "lang" => Command::Lang(text()?),
            "announce" => Command::Announce(text()?),
            "state" => Command::State,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "" => bail!("empty command"),
            other => bail!("unknown command `{other}` (try `help`)"),
        };
        Ok(command)
    }
}

fn on_off(arg: &str) -> anyhow::Result<bool> {
    match arg {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => bail!("expected on|off, got `{other}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!("listen".parse::<Command>().unwrap(), Command::Listen);
        assert_eq!(
            "say  what time is it ".parse::<Command>().unwrap(),
            Command::Say("what time is it".into())
        );
        assert_eq!("mute on".parse::<Command>().unwrap(), Command::Mute(true));
        assert_eq!(
            "capture-error error_network".parse::<Command>().unwrap(),
            Command::CaptureError(CaptureErrorCode::Network)
        );
        assert_eq!(
            "capture-error gibberish".parse::<Command>().unwrap(),
            Command::CaptureError(CaptureErrorCode::Unknown)
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!("".parse::<Command>().is_err());
        assert!("say".parse::<Command>().is_err());
        assert!("mute maybe".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }
}
