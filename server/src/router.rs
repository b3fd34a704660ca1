use crate::{
    channel::{ChannelRegistry, JoinOutcome, LeaveOutcome},
    connection::{Connection, ConnectionRegistry},
};
use log::{debug, info, warn};
use mio::Token;
use shared::{Envelope, Roster, valid_name};
use std::{collections::BTreeSet, io::Write};

/// What the event loop should do with a connection after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
}

/// Applies decoded commands to the registries and writes the resulting
/// replies and broadcasts.
pub struct Router<'a, S> {
    connections: &'a mut ConnectionRegistry<S>,
    channels: &'a ChannelRegistry,
    server_name: &'a str,
}

impl<'a, S: Write> Router<'a, S> {
    pub fn new(
        connections: &'a mut ConnectionRegistry<S>,
        channels: &'a ChannelRegistry,
        server_name: &'a str,
    ) -> Self {
        Router {
            connections,
            channels,
            server_name,
        }
    }

    pub fn dispatch(&mut self, token: Token, envelope: Envelope) -> Disposition {
        debug!("{token:?} -> {:?}", envelope.opcode());

        // Only HELLO and QUIT are allowed before the connection has a nickname
        let Some(identity) = self.connections.identity_of(token).map(str::to_string) else {
            match envelope {
                Envelope::Hello { nickname, channel } => self.hello(token, &nickname, &channel),
                Envelope::Quit => return Disposition::Close,
                _ => self.reply(token, Envelope::error("You have not registered.")),
            }
            return Disposition::Continue;
        };

        match envelope {
            Envelope::Hello { .. } => {
                self.reply(token, Envelope::error("You are already registered."));
            }
            Envelope::Join { channel } => self.join(token, &identity, &channel),
            Envelope::Leave { channel } => self.leave(token, &identity, &channel),
            Envelope::Send { channel, payload } => self.send(token, &identity, &channel, &payload),
            Envelope::ListChannels => {
                let channels = self.channels.all_channel_names().into_iter().collect();
                self.reply(token, Envelope::ChannelList { channels });
            }
            Envelope::ListMyChannels => {
                let channels = self.channels.channels_of(&identity).into_iter().collect();
                self.reply(token, Envelope::MyChannels { channels });
            }
            Envelope::ListMembers { channel } => {
                let roster = match self.channels.members_of(&channel) {
                    Some(members) => Roster::Members(members.into_iter().collect()),
                    None => Roster::Error(format!("No such channel: {channel}")),
                };
                self.reply(token, Envelope::MemberList { channel, roster });
            }
            Envelope::Quit => return Disposition::Close,
            Envelope::Message { .. }
            | Envelope::Joined { .. }
            | Envelope::Created { .. }
            | Envelope::Error { .. }
            | Envelope::ChannelList { .. }
            | Envelope::MyChannels { .. }
            | Envelope::MemberList { .. } => {
                self.reply(token, Envelope::error("Unknown command."));
            }
        }

        Disposition::Continue
    }

    /// Tear down whatever the connection at `token` holds: leave every channel
    /// (announcing each departure), drop its nickname and hand back the stream.
    pub fn disconnect(&mut self, token: Token) -> Option<Connection<S>> {
        if let Some(identity) = self.connections.identity_of(token).map(str::to_string) {
            for channel in self.channels.channels_of(&identity) {
                self.depart(&identity, &channel);
            }
            self.connections.unregister(&identity);
            info!("{identity} disconnected.");
        }
        let connection = self.connections.remove(token);
        debug!("{} active connections.", self.connections.len());
        connection
    }

    fn hello(&mut self, token: Token, nickname: &str, channel: &str) {
        if !valid_name(nickname) {
            self.reply(token, Envelope::error(format!("Invalid nickname: {nickname:?}")));
            return;
        }
        if !valid_name(channel) {
            self.reply(token, Envelope::error(format!("Invalid channel name: {channel:?}")));
            return;
        }
        if self.connections.lookup(nickname).is_some() {
            self.reply(token, Envelope::error("Nickname is already in use."));
            return;
        }

        self.connections.register(nickname, token);
        info!("{token:?} registered as {nickname}.");

        self.enter(token, nickname, channel);
        self.reply(
            token,
            Envelope::notice(format!(
                "Connected to {} as {nickname} in {channel}.",
                self.server_name
            )),
        );
    }

    fn join(&mut self, token: Token, identity: &str, channel: &str) {
        if !valid_name(channel) {
            self.reply(token, Envelope::error(format!("Invalid channel name: {channel:?}")));
            return;
        }
        self.enter(token, identity, channel);
    }

    /// Join, confirm to the requester, and announce the arrival to the others.
    fn enter(&mut self, token: Token, identity: &str, channel: &str) {
        let already_member = self.channels.is_member(channel, identity);
        let confirmation = match self.channels.join(channel, identity) {
            JoinOutcome::Created => {
                info!("{identity} created {channel}.");
                Envelope::Created {
                    channel: channel.to_string(),
                }
            }
            JoinOutcome::Joined => Envelope::Joined {
                channel: channel.to_string(),
            },
        };
        self.reply(token, confirmation);

        if !already_member {
            self.announce(
                channel,
                identity,
                format!("{identity} has joined {channel}."),
            );
        }
    }

    fn leave(&mut self, token: Token, identity: &str, channel: &str) {
        match self.depart(identity, channel) {
            LeaveOutcome::Left => {}
            LeaveOutcome::NotAMember => {
                self.reply(token, Envelope::error(format!("You are not in {channel}.")));
            }
            LeaveOutcome::NoSuchChannel => {
                self.reply(token, Envelope::error(format!("No such channel: {channel}")));
            }
        }
    }

    /// Leave `channel` and tell the remaining members.
    fn depart(&mut self, identity: &str, channel: &str) -> LeaveOutcome {
        let outcome = self.channels.leave(identity, channel);
        if outcome == LeaveOutcome::Left {
            info!("{identity} left {channel}.");
            self.announce(channel, identity, format!("{identity} has left {channel}."));
        }
        outcome
    }

    /// Relay a chat line to every listed channel once. Unknown channels are
    /// reported back without stopping delivery to the others.
    fn send(&mut self, token: Token, identity: &str, targets: &str, payload: &str) {
        let targets: BTreeSet<&str> = targets
            .split(',')
            .map(str::trim)
            .filter(|target| !target.is_empty())
            .collect();
        if targets.is_empty() {
            self.reply(token, Envelope::error("No channel was given."));
            return;
        }

        let mut too_long = false;
        for channel in targets {
            let Some(members) = self.channels.members_of(channel) else {
                self.reply(token, Envelope::error(format!("No such channel: {channel}")));
                continue;
            };
            let message = Envelope::relayed(channel, format!("{identity}: {payload}"));
            if let Err(err) = self.connections.broadcast(&members, identity, &message) {
                debug!("Not relaying {identity}'s message to {channel}: {err}");
                too_long = true;
            }
        }
        if too_long {
            self.reply(token, Envelope::error("Message too long."));
        }
    }

    fn announce(&mut self, channel: &str, actor: &str, text: String) {
        let Some(members) = self.channels.members_of(channel) else {
            return;
        };
        let notice = Envelope::relayed(channel, text);
        if let Err(err) = self.connections.broadcast(&members, actor, &notice) {
            warn!("Failed to announce in {channel}: {err}");
        }
    }

    fn reply(&mut self, token: Token, envelope: Envelope) {
        self.connections.send_to_token(token, &envelope);
    }
}
