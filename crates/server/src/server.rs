use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use snapnet::{
    DisconnectReason, NetworkEndpoint, NetworkStats, PacketLossSimulation, SessionHost,
    SessionHostEvent, SessionState,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::files::DirectoryFiles;
use crate::world::World;

const CS_SERVER_INFO: u16 = 0;
const CS_MAP: u16 = 1;

pub struct GameServer {
    endpoint: NetworkEndpoint,
    host: SessionHost,
    files: DirectoryFiles,
    world: World,
    config: ServerConfig,
    tick: u32,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
    start_time: Instant,
    packet_loss: PacketLossSimulation,
    dropped_outgoing: u64,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> Result<Self> {
        let endpoint = NetworkEndpoint::bind(bind_addr)?;
        let now = Instant::now();
        let mut host = SessionHost::new(config.session.clone(), now)?;
        host.set_config_string(
            CS_SERVER_INFO,
            format!("snapnet {}", env!("CARGO_PKG_VERSION")),
            now,
        );
        host.set_config_string(CS_MAP, config.map_name.clone(), now);

        Ok(Self {
            endpoint,
            host,
            files: DirectoryFiles::new(config.files_root.clone()),
            world: World::new(),
            tick: 0,
            tick_duration: Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64),
            last_tick_time: now,
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
            start_time: now,
            packet_loss: config.global_packet_loss.clone().unwrap_or_default(),
            dropped_outgoing: 0,
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.pending_events.drain(..) {
                log_event(&event);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown_connections();
    }

    /// Sends every live client a disconnect before the socket goes away.
    pub fn shutdown_connections(&mut self) {
        let now = Instant::now();
        let live: Vec<u16> = self
            .host
            .slots()
            .iter()
            .filter(|c| c.state().is_live())
            .map(|c| c.slot)
            .collect();
        for slot in live {
            self.host.disconnect(slot, DisconnectReason::Kicked, now);
        }
        self.flush();
    }

    pub fn kick_client(&mut self, slot: u16) {
        self.host
            .disconnect(slot, DisconnectReason::Kicked, Instant::now());
        self.collect_session_events();
    }

    pub fn set_packet_loss_sim(&mut self, sim: PacketLossSimulation) {
        self.packet_loss = sim;
    }

    pub fn packet_loss_sim(&self) -> &PacketLossSimulation {
        &self.packet_loss
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        match self.endpoint.receive() {
            Ok(datagrams) => {
                for datagram in datagrams {
                    self.host.handle_datagram(datagram.addr, &datagram.data, now);
                }
            }
            Err(e) => self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            }),
        }
        self.collect_session_events();

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick(now);
        }
    }

    fn tick(&mut self, now: Instant) {
        self.world.simulate(self.tick_duration.as_secs_f32());
        self.tick = self.tick.wrapping_add(1);

        self.host.tick(&self.world, &self.files, now);
        self.collect_session_events();
        self.flush();
    }

    /// Routes host events into the world before queueing them for display.
    fn collect_session_events(&mut self) {
        for event in self.host.drain_events() {
            match &event {
                SessionHostEvent::ClientEnteredGame { slot } => self.world.spawn_player(*slot),
                SessionHostEvent::UserCommand { slot, cmd } => self.world.apply_usercmd(*slot, cmd),
                SessionHostEvent::ClientDisconnected { slot, .. } => {
                    self.world.despawn_player(*slot)
                }
                SessionHostEvent::ClientCommand { slot, text } => {
                    log::debug!("slot {} sent unknown command {:?}", slot, text);
                }
                _ => {}
            }
            if !matches!(event, SessionHostEvent::UserCommand { .. }) {
                self.pending_events.push_back(event.into());
            }
        }
    }

    fn flush(&mut self) {
        for datagram in self.host.take_outgoing() {
            if self.packet_loss.should_drop() {
                self.dropped_outgoing += 1;
                continue;
            }
            if let Err(e) = self.endpoint.send(&datagram) {
                self.pending_events.push_back(ServerEvent::Error {
                    message: format!("Failed to send to {}: {}", datagram.addr, e),
                });
            }
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.tick,
            uptime_secs: self.start_time.elapsed().as_secs(),
            client_count: self.host.live_count(),
            max_clients: self.config.session.max_clients,
            entity_count: self.world.entity_count(),
            dropped_outgoing: self.dropped_outgoing,
            network_stats: self.endpoint.stats().clone(),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        self.host
            .slots()
            .iter()
            .filter(|c| c.state() != SessionState::Free)
            .map(|c| ClientInfo {
                slot: c.slot,
                name: c.name.clone(),
                addr: c.addr.map(|a| a.to_string()).unwrap_or_default(),
                state: c.state(),
                rate: c.rate,
                frame: c.ring.latest().map(|s| s.frame()),
                frame_ack: c.frame_ack,
                reliable_backlog: c.reliable.pending_count(),
                rtt_ms: c.rtt.srtt(),
                choked: c.choked,
                download: c.download.as_ref().map(|d| DownloadProgress {
                    name: d.window.name().to_string(),
                    acked: d.window.acked_count(),
                    blocks: d.window.block_count() as usize,
                }),
            })
            .collect()
    }
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Session(SessionHostEvent::ClientConnected { slot, addr, name }) => {
            log::info!("{} connected from {} (slot {})", name, addr, slot);
        }
        ServerEvent::Session(SessionHostEvent::ClientEnteredGame { slot }) => {
            log::info!("slot {} entered the game", slot);
        }
        ServerEvent::Session(SessionHostEvent::ClientDisconnected { slot, reason }) => {
            log::info!("slot {} {}", slot, reason.as_str());
        }
        ServerEvent::Session(SessionHostEvent::ConnectionDenied { addr, reason }) => {
            log::warn!("denied {}: {}", addr, reason);
        }
        ServerEvent::Session(SessionHostEvent::DownloadStarted { slot, name, blocks }) => {
            log::info!("slot {} downloading {} ({} blocks)", slot, name, blocks);
        }
        ServerEvent::Session(SessionHostEvent::DownloadFinished { slot, name }) => {
            log::info!("slot {} finished {}", slot, name);
        }
        ServerEvent::Session(_) => {}
        ServerEvent::Error { message } => log::error!("{}", message),
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u32,
    pub uptime_secs: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub dropped_outgoing: u64,
    pub network_stats: NetworkStats,
}

#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub name: String,
    pub acked: usize,
    pub blocks: usize,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub slot: u16,
    pub name: String,
    pub addr: String,
    pub state: SessionState,
    pub rate: u32,
    pub frame: Option<u32>,
    pub frame_ack: Option<u32>,
    pub reliable_backlog: usize,
    pub rtt_ms: f32,
    pub choked: u64,
    pub download: Option<DownloadProgress>,
}
