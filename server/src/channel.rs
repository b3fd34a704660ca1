use dashmap::{DashMap, mapref::entry::Entry};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Created,
    Joined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    NotAMember,
    NoSuchChannel,
}

/// Channel name -> member nicknames.
///
/// Every mutation runs under the map's lock for that channel, so a channel is
/// never observed empty: the leave that empties it also removes it.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, HashSet<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity` to `channel`, creating the channel if it does not exist.
    /// Joining a channel twice is a no-op that still reports `Joined`.
    pub fn join(&self, channel: &str, identity: &str) -> JoinOutcome {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(identity.to_string());
                JoinOutcome::Joined
            }
            Entry::Vacant(entry) => {
                entry.insert(HashSet::from([identity.to_string()]));
                JoinOutcome::Created
            }
        }
    }

    /// Remove `identity` from `channel`, deleting the channel once it is empty.
    pub fn leave(&self, identity: &str, channel: &str) -> LeaveOutcome {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get_mut().remove(identity) {
                    return LeaveOutcome::NotAMember;
                }
                if entry.get().is_empty() {
                    entry.remove();
                }
                LeaveOutcome::Left
            }
            Entry::Vacant(_) => LeaveOutcome::NoSuchChannel,
        }
    }

    /// Members of `channel`, or `None` if no such channel exists.
    pub fn members_of(&self, channel: &str) -> Option<BTreeSet<String>> {
        self.channels
            .get(channel)
            .map(|members| members.iter().cloned().collect())
    }

    pub fn channels_of(&self, identity: &str) -> BTreeSet<String> {
        self.channels
            .iter()
            .filter(|entry| entry.value().contains(identity))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn all_channel_names(&self) -> BTreeSet<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_member(&self, channel: &str, identity: &str) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|members| members.contains(identity))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
