use serde::{Deserialize, Serialize};

/// Numeric tag carried in every frame header.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Client -> server
    Hello = 0,
    Send = 1,
    Join = 2,
    Leave = 3,
    ListChannels = 4,
    ListMyChannels = 5,
    ListMembers = 6,
    Quit = -1,

    // Server -> client
    Message = 10,
    Joined = 20,
    Created = 21,
    Error = 404,
    ChannelList = 40,
    MyChannels = 50,
    MemberList = 60,
}

impl Opcode {
    /// Convert from the wire value, returns None for unknown opcodes
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Opcode::Hello),
            1 => Some(Opcode::Send),
            2 => Some(Opcode::Join),
            3 => Some(Opcode::Leave),
            4 => Some(Opcode::ListChannels),
            5 => Some(Opcode::ListMyChannels),
            6 => Some(Opcode::ListMembers),
            -1 => Some(Opcode::Quit),
            10 => Some(Opcode::Message),
            20 => Some(Opcode::Joined),
            21 => Some(Opcode::Created),
            404 => Some(Opcode::Error),
            40 => Some(Opcode::ChannelList),
            50 => Some(Opcode::MyChannels),
            60 => Some(Opcode::MemberList),
            _ => None,
        }
    }

    /// Variant name used by the JSON body encoding.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Hello => "HELLO",
            Opcode::Send => "SEND",
            Opcode::Join => "JOIN",
            Opcode::Leave => "LEAVE",
            Opcode::ListChannels => "LIST_CHANNELS",
            Opcode::ListMyChannels => "LIST_MY_CHANNELS",
            Opcode::ListMembers => "LIST_MEMBERS",
            Opcode::Quit => "QUIT",
            Opcode::Message => "MESSAGE",
            Opcode::Joined => "JOINED",
            Opcode::Created => "CREATED",
            Opcode::Error => "ERROR",
            Opcode::ChannelList => "CHANNEL_LIST",
            Opcode::MyChannels => "MY_CHANNELS",
            Opcode::MemberList => "MEMBER_LIST",
        }
    }

    /// Whether envelopes with this opcode carry a body.
    pub fn has_fields(self) -> bool {
        !matches!(
            self,
            Opcode::ListChannels | Opcode::ListMyChannels | Opcode::Quit
        )
    }

    /// Client requests are the non-negative opcodes below 10, plus QUIT.
    pub fn is_request(self) -> bool {
        (self as i16) < 10
    }
}

/// Roster carried by MEMBER_LIST: either the members or why there are none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Roster {
    Members(Vec<String>),
    Error(String),
}

/// One complete protocol message. The fields of a variant are its frame body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    Hello {
        nickname: String,
        channel: String,
    },
    /// `channel` may name several channels separated by commas.
    Send {
        channel: String,
        payload: String,
    },
    Join {
        channel: String,
    },
    Leave {
        channel: String,
    },
    ListChannels,
    ListMyChannels,
    ListMembers {
        channel: String,
    },
    Quit,

    Message {
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    Joined {
        channel: String,
    },
    Created {
        channel: String,
    },
    Error {
        payload: String,
    },
    ChannelList {
        channels: Vec<String>,
    },
    MyChannels {
        channels: Vec<String>,
    },
    MemberList {
        channel: String,
        roster: Roster,
    },
}

impl Envelope {
    pub fn opcode(&self) -> Opcode {
        match self {
            Envelope::Hello { .. } => Opcode::Hello,
            Envelope::Send { .. } => Opcode::Send,
            Envelope::Join { .. } => Opcode::Join,
            Envelope::Leave { .. } => Opcode::Leave,
            Envelope::ListChannels => Opcode::ListChannels,
            Envelope::ListMyChannels => Opcode::ListMyChannels,
            Envelope::ListMembers { .. } => Opcode::ListMembers,
            Envelope::Quit => Opcode::Quit,
            Envelope::Message { .. } => Opcode::Message,
            Envelope::Joined { .. } => Opcode::Joined,
            Envelope::Created { .. } => Opcode::Created,
            Envelope::Error { .. } => Opcode::Error,
            Envelope::ChannelList { .. } => Opcode::ChannelList,
            Envelope::MyChannels { .. } => Opcode::MyChannels,
            Envelope::MemberList { .. } => Opcode::MemberList,
        }
    }

    /// Informational text not tied to a channel.
    pub fn notice(payload: impl Into<String>) -> Self {
        Envelope::Message {
            payload: payload.into(),
            channel: None,
        }
    }

    /// Chat text or a membership notice relayed from `channel`.
    pub fn relayed(channel: &str, payload: impl Into<String>) -> Self {
        Envelope::Message {
            payload: payload.into(),
            channel: Some(channel.to_string()),
        }
    }

    pub fn error(payload: impl Into<String>) -> Self {
        Envelope::Error {
            payload: payload.into(),
        }
    }
}

/// Longest accepted nickname or channel name.
pub const MAX_NAME_LEN: usize = 64;

/// Nicknames and channel names: non-empty, bounded, and free of the comma
/// that separates SEND targets.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.chars().any(|c| c == ',' || c.is_whitespace() || c.is_control())
}
