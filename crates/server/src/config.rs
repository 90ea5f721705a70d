use std::path::PathBuf;

use snapnet::{PacketLossSimulation, SessionConfig};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub session: SessionConfig,
    /// Root of the tree served to `download` requests. `None` refuses all.
    pub files_root: Option<PathBuf>,
    pub map_name: String,
    pub global_packet_loss: Option<PacketLossSimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            session: SessionConfig::default(),
            files_root: None,
            map_name: "arena".to_string(),
            global_packet_loss: None,
        }
    }
}
