use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Row, Table};
use snapnet::SessionState;

use crate::server::{ClientInfo, ServerStats};

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

pub struct TuiState {
    log: VecDeque<(LogLevel, String)>,
    selected: usize,
    pending_kick: Option<u16>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            log: VecDeque::with_capacity(MAX_LOG_LINES),
            selected: 0,
            pending_kick: None,
        }
    }

    fn push_log(&mut self, level: LogLevel, line: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, line));
    }

    pub fn log_info(&mut self, line: impl Into<String>) {
        self.push_log(LogLevel::Info, line.into());
    }

    pub fn log_warn(&mut self, line: impl Into<String>) {
        self.push_log(LogLevel::Warn, line.into());
    }

    pub fn log_error(&mut self, line: impl Into<String>) {
        self.push_log(LogLevel::Error, line.into());
    }

    pub fn select_prev(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + count - 1) % count;
        }
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn request_kick(&mut self, clients: &[ClientInfo]) {
        if let Some(client) = clients.get(self.selected)
            && client.state.is_live()
        {
            self.pending_kick = Some(client.slot);
        }
    }

    pub fn take_pending_kick(&mut self) -> Option<u16> {
        self.pending_kick.take()
    }
}

pub fn render(
    frame: &mut Frame,
    state: &TuiState,
    stats: &ServerStats,
    clients: &[ClientInfo],
    loss_percent: Option<f32>,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_capacity(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats, loss_percent);
    render_clients(frame, chunks[3], state, clients);
    render_log(frame, chunks[4], state);
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let title = format!(
        " snapnet server - Uptime: {} ",
        format_duration(stats.uptime_secs)
    );
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Tick: {}  |  Clients: {}  |  Entities: {}",
        stats.tick, stats.client_count, stats.entity_count
    );
    frame.render_widget(
        Paragraph::new(text)
            .block(block)
            .style(Style::default().fg(Color::White)),
        area,
    );
}

fn render_capacity(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let block = Block::default()
        .title(" Slots ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let ratio = stats.client_count as f64 / stats.max_clients.max(1) as f64;
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio.min(1.0))
        .label(format!("{}/{} clients", stats.client_count, stats.max_clients));
    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &ServerStats, loss: Option<f32>) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network_stats;
    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Gray));
    let value = |text: String| Span::styled(text, Style::default().fg(Color::White));
    let lines = vec![
        Line::from(vec![
            label("Packets: "),
            value(format!(
                "{} sent / {} recv",
                net.packets_sent, net.packets_received
            )),
        ]),
        Line::from(vec![
            label("Bytes: "),
            value(format!(
                "{} sent / {} recv",
                format_bytes(net.bytes_sent),
                format_bytes(net.bytes_received)
            )),
        ]),
        Line::from(vec![
            label("Fragments: "),
            value(format!(
                "{} sent / {} discarded",
                net.fragments_sent, net.fragments_discarded
            )),
        ]),
        Line::from(vec![
            label("Simulated loss: "),
            match loss {
                Some(percent) => Span::styled(
                    format!("{:.1}% ({} dropped)", percent, stats.dropped_outgoing),
                    Style::default().fg(Color::Red),
                ),
                None => value("off".to_string()),
            },
        ]),
    ];
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn state_color(state: SessionState) -> Color {
    match state {
        SessionState::Active => Color::Green,
        SessionState::Connected | SessionState::Primed => Color::Yellow,
        SessionState::Zombie => Color::DarkGray,
        SessionState::Free => Color::Gray,
    }
}

fn render_clients(frame: &mut Frame, area: Rect, state: &TuiState, clients: &[ClientInfo]) {
    let header = Row::new([
        "Slot", "Name", "Address", "State", "Frame", "Ack", "Rel", "RTT", "Rate", "Choke",
        "Download",
    ])
    .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = clients.iter().enumerate().map(|(i, c)| {
        let download = c
            .download
            .as_ref()
            .map(|d| format!("{} {}/{}", d.name, d.acked, d.blocks))
            .unwrap_or_default();
        let mut style = Style::default().fg(state_color(c.state));
        if i == state.selected {
            style = style.add_modifier(Modifier::REVERSED);
        }
        Row::new([
            c.slot.to_string(),
            c.name.clone(),
            c.addr.clone(),
            c.state.as_str().to_string(),
            c.frame.map(|f| f.to_string()).unwrap_or_else(|| "-".into()),
            c.frame_ack
                .map(|f| f.to_string())
                .unwrap_or_else(|| "-".into()),
            c.reliable_backlog.to_string(),
            format!("{:.0}ms", c.rtt_ms),
            c.rate.to_string(),
            c.choked.to_string(),
            download,
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Length(12),
            Constraint::Length(22),
            Constraint::Length(10),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(4),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(6),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(" Connections ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(state.log.len().saturating_sub(visible))
        .map(|(level, text)| {
            let color = match level {
                LogLevel::Info => Color::White,
                LogLevel::Warn => Color::Yellow,
                LogLevel::Error => Color::Red,
            };
            Line::from(Span::styled(text.clone(), Style::default().fg(color)))
        })
        .collect();

    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("Up/Down select  |  k kick  |  l toggle loss  |  q or ESC quit")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );
    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_bounded() {
        let mut state = TuiState::new();
        for i in 0..(MAX_LOG_LINES + 5) {
            state.log_info(format!("line {i}"));
        }
        assert_eq!(state.log.len(), MAX_LOG_LINES);
        assert_eq!(state.log.front().map(|(_, l)| l.as_str()), Some("line 5"));
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KB");
        assert_eq!(format_duration(3725), "01:02:05");
    }
}
