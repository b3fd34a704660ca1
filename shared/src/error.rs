use thiserror::Error;

/// A frame that cannot be trusted. The connection it arrived on must be closed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame declares {0} bytes, shorter than its opcode")]
    Truncated(usize),

    #[error("frame declares {len} bytes, larger than the {max} byte limit")]
    TooLarge { len: usize, max: usize },

    #[error("unknown opcode {0}")]
    UnknownOpcode(i16),

    #[error("malformed body for {opcode:?}: {source}")]
    Body {
        opcode: crate::Opcode,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {opcode:?}: {source}")]
    Encode {
        opcode: crate::Opcode,
        #[source]
        source: serde_json::Error,
    },
}
