use crate::error::SessionError;
use crate::net::ClientMessage;

/// Lifecycle of one client slot.
///
/// `Free -> Connected -> Primed -> Active`, any state but `Free` may drop to
/// `Zombie`, and a zombie returns to `Free` once its quarantine elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Free,
    Connected,
    Primed,
    Active,
    Zombie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    HandshakeComplete,
    GameStateAcknowledged,
    UserCommand,
    Disconnect,
    Timeout,
    QuarantineElapsed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Free => "free",
            SessionState::Connected => "connected",
            SessionState::Primed => "primed",
            SessionState::Active => "active",
            SessionState::Zombie => "zombie",
        }
    }

    /// A slot holding a live session, as opposed to free or quarantined.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Primed | SessionState::Active
        )
    }

    /// Resulting state for `event`. Illegal transitions leave the caller's
    /// state untouched and report a `ProtocolViolation`.
    pub fn transition(self, event: SessionEvent) -> Result<SessionState, SessionError> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (Free, HandshakeComplete) => Connected,
            (Connected, GameStateAcknowledged) => Primed,
            (Primed, UserCommand) => Active,
            (Active, UserCommand) => Active,
            (Connected | Primed | Active, Disconnect | Timeout) => Zombie,
            (Zombie, QuarantineElapsed) => Free,
            (state, event) => {
                return Err(SessionError::ProtocolViolation {
                    state,
                    message: event.as_str(),
                });
            }
        };
        Ok(next)
    }

    /// Whether a client message of this kind may be processed in this state.
    /// Acks and disconnects are always heard from a live session; user input
    /// and downloads wait for the game state to be acknowledged.
    pub fn permits(&self, message: &ClientMessage) -> bool {
        match message {
            ClientMessage::Ack { .. } | ClientMessage::Disconnect => self.is_live(),
            ClientMessage::ReliableCommands(_) => self.is_live(),
            ClientMessage::UserCommands(_) | ClientMessage::DownloadAck { .. } => {
                matches!(self, SessionState::Primed | SessionState::Active)
            }
        }
    }
}

impl SessionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::HandshakeComplete => "handshake",
            SessionEvent::GameStateAcknowledged => "game state ack",
            SessionEvent::UserCommand => "user command",
            SessionEvent::Disconnect => "disconnect",
            SessionEvent::Timeout => "timeout",
            SessionEvent::QuarantineElapsed => "quarantine expiry",
        }
    }
}
