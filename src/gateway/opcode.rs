//! Gateway opcodes.

/// Opcodes on the gateway control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Receive: a named event was dispatched.
    Dispatch = 0,
    /// Send/Receive: keepalive carrying the last seen sequence.
    Heartbeat = 1,
    /// Send: start a new session.
    Identify = 2,
    /// Send: update presence.
    StatusUpdate = 3,
    /// Send: join, leave or move between voice channels.
    VoiceStateUpdate = 4,
    /// Send: voice server ping.
    VoiceServerPing = 5,
    /// Send: resume a previous session.
    Resume = 6,
    /// Receive: the server wants us to reconnect.
    Reconnect = 7,
    /// Send: request offline guild members.
    RequestGuildMembers = 8,
    /// Receive: the session was invalidated.
    InvalidSession = 9,
    /// Receive: sent right after connecting.
    Hello = 10,
    /// Receive: heartbeat acknowledged.
    HeartbeatAck = 11,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            3 => Ok(Self::StatusUpdate),
            4 => Ok(Self::VoiceStateUpdate),
            5 => Ok(Self::VoiceServerPing),
            6 => Ok(Self::Resume),
            7 => Ok(Self::Reconnect),
            8 => Ok(Self::RequestGuildMembers),
            9 => Ok(Self::InvalidSession),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        assert_eq!(Opcode::try_from(0), Ok(Opcode::Dispatch));
        assert_eq!(Opcode::try_from(11), Ok(Opcode::HeartbeatAck));
        assert_eq!(Opcode::try_from(12), Err(12));
        assert_eq!(Opcode::Resume as u8, 6);
    }
}
