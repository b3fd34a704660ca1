use shared::{Envelope, Roster};

/// Turn a server envelope into a line of terminal output.
pub fn render(envelope: &Envelope) -> String {
    match envelope {
        Envelope::Message {
            payload,
            channel: Some(channel),
        } => format!("[{channel}] {payload}"),
        Envelope::Message {
            payload,
            channel: None,
        } => format!("* {payload}"),
        Envelope::Joined { channel } => format!("* Joined {channel}."),
        Envelope::Created { channel } => format!("* Created {channel}."),
        Envelope::Error { payload } => format!("! {payload}"),
        Envelope::ChannelList { channels } if channels.is_empty() => "* No channels.".to_string(),
        Envelope::ChannelList { channels } => format!("* Channels: {}", channels.join(", ")),
        Envelope::MyChannels { channels } if channels.is_empty() => {
            "* You are not in any channel.".to_string()
        }
        Envelope::MyChannels { channels } => format!("* You are in: {}", channels.join(", ")),
        Envelope::MemberList {
            channel,
            roster: Roster::Members(members),
        } => format!("* Members of {channel}: {}", members.join(", ")),
        Envelope::MemberList {
            roster: Roster::Error(reason),
            ..
        } => format!("! {reason}"),
        other => format!("! Unexpected {:?} from server.", other.opcode()),
    }
}
