//! InkRoom snapshot client.
//!
//! Connects to a relay, joins a room, replays whatever the room holds onto a
//! raster surface and writes it out as PNG.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use inkroom_core::{
    ChannelEvent, DrawingSession, NativeWebSocket, ProtocolError, SessionEvent,
};
use inkroom_render::{PixmapSurface, RenderError};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Disconnected before joining {0}")]
    Disconnected(String),
    #[error("Timed out waiting to join {0}")]
    Timeout(String),
}

/// Command-line arguments for inkroom-snapshot.
#[derive(Debug, Clone, Parser)]
#[command(name = "inkroom-snapshot")]
#[command(about = "Render an InkRoom canvas to a PNG file")]
#[command(version)]
pub struct SnapshotArgs {
    /// Relay WebSocket URL
    #[arg(long, env = "INKROOM_URL", default_value = "ws://127.0.0.1:3030/ws")]
    pub url: String,

    /// Room to capture
    #[arg(long)]
    pub room: String,

    /// Output PNG path
    #[arg(long, default_value = "canvas.png")]
    pub out: PathBuf,

    /// Canvas width in pixels
    #[arg(long, default_value = "800")]
    pub width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value = "600")]
    pub height: u32,

    /// Give up if the room has not been joined by then
    #[arg(long, default_value = "5")]
    pub timeout_secs: u64,

    /// After joining, stop once the room has been quiet this long
    #[arg(long, default_value = "250")]
    pub linger_ms: u64,
}

/// What was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotReport {
    pub room: String,
    pub peer_id: String,
    pub actions: usize,
    pub participants: usize,
}

/// Join the room and replay it. Returns the session and the rendered surface.
pub fn capture(args: &SnapshotArgs) -> Result<(DrawingSession, PixmapSurface, SnapshotReport), AppError> {
    let mut surface = PixmapSurface::new(args.width, args.height)?;
    let mut session = DrawingSession::new();
    let mut ws = NativeWebSocket::new();
    ws.connect(&args.url)?;

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let linger = Duration::from_millis(args.linger_ms);
    let mut report: Option<SnapshotReport> = None;
    let mut last_message = Instant::now();

    loop {
        for event in ws.poll_events() {
            match event {
                ChannelEvent::Connected => {
                    log::info!("Connected to {}", args.url);
                    session.join_room(&args.room);
                }
                ChannelEvent::Disconnected => {
                    log::info!("Disconnected from {}", args.url);
                    session.connection_lost();
                    return match report {
                        Some(report) => Ok((session, surface, report)),
                        None => Err(AppError::Disconnected(args.room.clone())),
                    };
                }
                ChannelEvent::Error { message } => {
                    return Err(AppError::Connection(message));
                }
                ChannelEvent::Message(msg) => {
                    last_message = Instant::now();
                    match session.handle_server_message(&mut surface, msg) {
                        SessionEvent::Joined {
                            room,
                            peer_id,
                            peer_count,
                        } => {
                            report = Some(SnapshotReport {
                                room,
                                peer_id,
                                actions: session.log().len(),
                                participants: peer_count,
                            });
                        }
                        SessionEvent::HistoryReplaced { len } => {
                            log::debug!("History replaced ({} actions)", len);
                        }
                        SessionEvent::Error { message } => {
                            log::warn!("Server error: {}", message);
                        }
                        _ => {}
                    }
                }
            }
        }

        for msg in session.take_outgoing() {
            ws.send(&msg)?;
        }

        if let Some(report) = report.as_mut() {
            if last_message.elapsed() >= linger {
                report.actions = session.log().len();
                break;
            }
        } else if Instant::now() >= deadline {
            ws.disconnect();
            return Err(AppError::Timeout(args.room.clone()));
        }

        thread::sleep(POLL_INTERVAL);
    }

    session.leave_room();
    for msg in session.take_outgoing() {
        let _ = ws.send(&msg);
    }
    ws.disconnect();

    match report {
        Some(report) => Ok((session, surface, report)),
        None => Err(AppError::Timeout(args.room.clone())),
    }
}

/// Capture the room and write the PNG.
pub fn run(args: &SnapshotArgs) -> Result<SnapshotReport, AppError> {
    let (_, surface, report) = capture(args)?;
    surface.save_png(&args.out)?;
    log::info!(
        "Wrote {} ({} actions from room {})",
        args.out.display(),
        report.actions,
        report.room
    );
    Ok(report)
}
