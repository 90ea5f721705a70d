mod config;
mod events;
mod files;
mod server;
mod tui;
mod world;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;
use snapnet::{PacketLossSimulation, SessionConfig, SessionHostEvent};
use tui::TuiState;

#[derive(Parser)]
#[command(name = "snapnet-server")]
#[command(about = "Snapshot session server with a demo arena")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = snapnet::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = snapnet::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32, value_parser = clap::value_parser!(u16).range(1..=64))]
    max_clients: u16,

    #[arg(long, default_value_t = 20, help = "Snapshots per second")]
    snapshot_rate: u32,

    #[arg(long, help = "Directory served to download requests")]
    files: Option<PathBuf>,

    #[arg(long, default_value = "arena")]
    map: String,

    #[arg(long)]
    headless: bool,

    #[arg(long, help = "Enable outgoing packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let global_packet_loss = args.simulate_packet_loss.then(|| PacketLossSimulation {
        enabled: true,
        loss_percent: args.loss_percent.clamp(0.0, 100.0),
    });

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        session: SessionConfig {
            max_clients: args.max_clients as usize,
            snapshot_interval: Duration::from_secs_f64(1.0 / args.snapshot_rate.max(1) as f64),
            ..Default::default()
        },
        files_root: args.files,
        map_name: args.map,
        global_packet_loss,
    };

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        let mut server = GameServer::new(&bind_addr, config)?;
        log::info!("Server started on {}", server.local_addr());
        server.run();
        log::info!("Server shutting down");
    } else {
        let mut server = GameServer::new(&bind_addr, config)?;
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn describe(event: ServerEvent, tui_state: &mut TuiState) {
    match event {
        ServerEvent::Session(SessionHostEvent::ClientConnected { slot, addr, name }) => {
            tui_state.log_info(format!("{} connected from {} (slot {})", name, addr, slot));
        }
        ServerEvent::Session(SessionHostEvent::ClientEnteredGame { slot }) => {
            tui_state.log_info(format!("Slot {} entered the game", slot));
        }
        ServerEvent::Session(SessionHostEvent::ClientDisconnected { slot, reason }) => {
            tui_state.log_info(format!("Slot {} {}", slot, reason.as_str()));
        }
        ServerEvent::Session(SessionHostEvent::ConnectionDenied { addr, reason }) => {
            tui_state.log_warn(format!("Connection denied to {}: {}", addr, reason));
        }
        ServerEvent::Session(SessionHostEvent::DownloadStarted { slot, name, blocks }) => {
            tui_state.log_info(format!("Slot {} downloading {} ({} blocks)", slot, name, blocks));
        }
        ServerEvent::Session(SessionHostEvent::DownloadFinished { slot, name }) => {
            tui_state.log_info(format!("Slot {} finished {}", slot, name));
        }
        ServerEvent::Session(SessionHostEvent::ClientCommand { slot, text }) => {
            tui_state.log_warn(format!("Slot {} sent unknown command: {}", slot, text));
        }
        ServerEvent::Session(SessionHostEvent::UserCommand { .. }) => {}
        ServerEvent::Error { message } => tui_state.log_error(message),
    }
}

fn run_with_tui(server: &mut GameServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();
    tui_state.log_info(format!("Server started on {}", server.local_addr()));

    // toggled from the keyboard; remembers the configured percentage
    let mut loss_percent = match server.packet_loss_sim().loss_percent {
        p if p > 0.0 => p,
        _ => 10.0,
    };

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        let events: Vec<ServerEvent> = server.drain_events().collect();
        for event in events {
            describe(event, &mut tui_state);
        }

        if let Some(slot) = tui_state.take_pending_kick() {
            server.kick_client(slot);
        }

        let clients = server.client_infos();
        if event::poll(Duration::from_millis(1))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => running.store(false, Ordering::SeqCst),
                KeyCode::Up => tui_state.select_prev(clients.len()),
                KeyCode::Down => tui_state.select_next(clients.len()),
                KeyCode::Char('k') | KeyCode::Char('K') => tui_state.request_kick(&clients),
                KeyCode::Char('l') | KeyCode::Char('L') => {
                    let mut sim = server.packet_loss_sim().clone();
                    sim.enabled = !sim.enabled;
                    if sim.enabled {
                        sim.loss_percent = loss_percent;
                    } else {
                        loss_percent = sim.loss_percent.max(1.0);
                    }
                    tui_state.log_info(if sim.enabled {
                        format!("Packet loss simulation on ({:.1}%)", sim.loss_percent)
                    } else {
                        "Packet loss simulation off".to_string()
                    });
                    server.set_packet_loss_sim(sim);
                }
                _ => {}
            }
        }

        let stats = server.stats();
        let sim = server.packet_loss_sim();
        let loss = sim.enabled.then_some(sim.loss_percent);
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients, loss);
        })?;
    }

    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
