//! Snapshot client against a live relay.

use std::net::SocketAddr;

use inkroom_app::{SnapshotArgs, capture, run};
use inkroom_core::{Action, BrushStyle, Point, Rgba, Tool};
use inkroom_server::{AppState, RoomRegistry};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn start_server() -> (SocketAddr, RoomRegistry) {
    let state = AppState::default();
    let registry = state.registry.clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(inkroom_server::serve(listener, state));
    (addr, registry)
}

fn args(addr: SocketAddr, room: &str, extra: &[&str]) -> SnapshotArgs {
    let url = format!("ws://{addr}/ws");
    let mut argv = vec![
        "inkroom-snapshot",
        "--url",
        url.as_str(),
        "--room",
        room,
        "--width",
        "64",
        "--height",
        "64",
        "--linger-ms",
        "100",
    ];
    argv.extend_from_slice(extra);
    <SnapshotArgs as clap::Parser>::try_parse_from(argv).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn captures_existing_drawing() {
    let (addr, registry) = start_server().await;

    // An author stays in the room so it is not torn down.
    let (author, _inbox) = mpsc::unbounded_channel();
    registry.join("gallery", "author", author).await.unwrap();
    let style = BrushStyle::new("#ff0000", 8.0, Tool::Pen);
    registry.append("gallery", "author", Action::start(Point::new(10.0, 32.0), &style));
    registry.append("gallery", "author", Action::draw(Point::new(50.0, 32.0)));

    let args = args(addr, "gallery", &[]);
    let (session, surface, report) = tokio::task::spawn_blocking(move || capture(&args))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.room, "gallery");
    assert_eq!(report.actions, 2);
    assert_eq!(report.participants, 2);
    assert!(!session.is_in_room());
    assert_eq!(surface.pixel(30, 32), Some(Rgba::new(255, 0, 0, 255)));
    assert_eq!(surface.pixel(30, 5), Some(Rgba::white()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_png_for_empty_room() {
    let (addr, registry) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("empty.png");
    let out_arg = out.to_string_lossy().into_owned();

    let args = args(addr, "blank", &["--out", out_arg.as_str()]);
    let report = tokio::task::spawn_blocking(move || run(&args))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.actions, 0);
    assert_eq!(report.participants, 1);
    let bytes = std::fs::read(&out).unwrap();
    assert_eq!(&bytes[0..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);

    // The client left, so the room is gone again.
    for _ in 0..100 {
        if registry.room_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(registry.room_count(), 0);
}
