use shared::{Envelope, MAX_NAME_LEN, valid_name};
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  <text>              send to the current channel
  /msg <a,b> <text>   send to one or more channels
  /join <channel>     join (or create) a channel and make it current
  /leave [channel]    leave a channel (default: current)
  /switch <channel>   change the current channel
  /list               list every channel
  /mine               list the channels you are in
  /members [channel]  list the members of a channel (default: current)
  /quit               disconnect
  /help               show this help";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown command /{0}. Type /help for a list of commands.")]
    Unknown(String),

    #[error(
        "Invalid channel name {0:?}: use 1-{max} characters without commas or spaces.",
        max = MAX_NAME_LEN
    )]
    InvalidChannel(String),
}

/// What the client should do with one line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Send(Envelope),
    /// Nothing to send; show this text locally.
    Show(String),
    Quit,
    Nothing,
}

/// Client-side state: who we are and where plain text goes.
#[derive(Debug)]
pub struct Session {
    pub nickname: String,
    pub channel: String,
}

impl Session {
    pub fn new(nickname: impl Into<String>, channel: impl Into<String>) -> Self {
        Session {
            nickname: nickname.into(),
            channel: channel.into(),
        }
    }

    pub fn hello(&self) -> Envelope {
        Envelope::Hello {
            nickname: self.nickname.clone(),
            channel: self.channel.clone(),
        }
    }

    pub fn interpret(&mut self, line: &str) -> Result<Action, InputError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Action::Nothing);
        }

        let Some(command) = line.strip_prefix('/') else {
            return Ok(Action::Send(Envelope::Send {
                channel: self.channel.clone(),
                payload: line.to_string(),
            }));
        };

        let (name, rest) = match command.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (command, ""),
        };

        let action = match name.to_lowercase().as_str() {
            "msg" => {
                let Some((targets, payload)) = rest.split_once(char::is_whitespace) else {
                    return Err(InputError::Usage("/msg <channel[,channel...]> <text>"));
                };
                Action::Send(Envelope::Send {
                    channel: targets.to_string(),
                    payload: payload.trim().to_string(),
                })
            }
            "join" => {
                if rest.is_empty() {
                    return Err(InputError::Usage("/join <channel>"));
                }
                self.set_current(rest)?;
                Action::Send(Envelope::Join {
                    channel: rest.to_string(),
                })
            }
            "leave" => Action::Send(Envelope::Leave {
                channel: self.or_current(rest),
            }),
            "switch" => {
                if rest.is_empty() {
                    return Err(InputError::Usage("/switch <channel>"));
                }
                self.set_current(rest)?;
                Action::Show(format!("Now talking in {rest}."))
            }
            "list" => Action::Send(Envelope::ListChannels),
            "mine" => Action::Send(Envelope::ListMyChannels),
            "members" => Action::Send(Envelope::ListMembers {
                channel: self.or_current(rest),
            }),
            "quit" | "exit" => Action::Quit,
            "help" => Action::Show(HELP.to_string()),
            other => return Err(InputError::Unknown(other.to_string())),
        };

        Ok(action)
    }

    /// The server accepts any valid name on JOIN, so checking here means the
    /// current channel never points at a name it would refuse.
    fn set_current(&mut self, channel: &str) -> Result<(), InputError> {
        if !valid_name(channel) {
            return Err(InputError::InvalidChannel(channel.to_string()));
        }
        self.channel = channel.to_string();
        Ok(())
    }

    fn or_current(&self, channel: &str) -> String {
        if channel.is_empty() {
            self.channel.clone()
        } else {
            channel.to_string()
        }
    }
}
