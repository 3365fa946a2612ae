//! Gateway close codes and their recovery policy.

use crate::error::Error;

/// Close codes the gateway uses when dropping a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding
    DecodeError = 4002,
    /// Sent a payload before Identify
    NotAuthenticated = 4003,
    /// Invalid token
    AuthenticationFailed = 4004,
    /// Sent Identify twice
    AlreadyAuthenticated = 4005,
    /// Invalid sequence number on Resume
    InvalidSequence = 4007,
    /// Payloads sent too fast
    RateLimited = 4008,
    /// Session timed out
    SessionTimeout = 4009,
    /// Invalid shard descriptor
    InvalidShard = 4010,
    /// Sharding is required for this bot
    ShardingRequired = 4011,
    /// Invalid API version
    InvalidApiVersion = 4012,
    /// Invalid intent bits
    InvalidIntents = 4013,
    /// Disallowed intent bits
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Decode a raw close code.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    /// The permanent failure this code maps to, if reconnecting is futile.
    #[must_use]
    pub fn as_fatal_error(self) -> Option<Error> {
        match self {
            Self::AuthenticationFailed => Some(Error::Auth { code: 4004 }),
            Self::InvalidShard => Some(Error::Shard { code: 4010 }),
            Self::ShardingRequired => Some(Error::Shard { code: 4011 }),
            Self::InvalidApiVersion => Some(Error::Protocol { code: 4012 }),
            Self::InvalidIntents => Some(Error::Protocol { code: 4013 }),
            Self::DisallowedIntents => Some(Error::Protocol { code: 4014 }),
            _ => None,
        }
    }
}
