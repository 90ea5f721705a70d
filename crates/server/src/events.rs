use snapnet::SessionHostEvent;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Session(SessionHostEvent),
    Error { message: String },
}

impl From<SessionHostEvent> for ServerEvent {
    fn from(event: SessionHostEvent) -> Self {
        ServerEvent::Session(event)
    }
}
