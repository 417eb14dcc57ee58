#![allow(dead_code)]

use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Once;
use std::thread;
use std::time::Duration;

use jenga_core::{load_tower_config_from_env, ServerHandle, TowerConfig};
use jenga_protocol::{parse_game_event, ControlClient, GameEvent};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_tower_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test tower config at {}",
            config_path.display()
        );

        std::env::set_var("JENGA_CONFIG_PATH", &config_path);
    });
}

pub fn test_config() -> TowerConfig {
    ensure_test_config();
    let (config, path) = load_tower_config_from_env();
    assert!(path.is_some(), "fixture config should be loaded from disk");
    config
}

/// Stand-in controller event port collecting pushed lines.
pub struct EventSink {
    addr: SocketAddr,
    events: Receiver<GameEvent>,
}

impl EventSink {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind event sink");
        let addr = listener.local_addr().expect("event sink addr");
        let (sender, events) = mpsc::channel();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let mut line = String::new();
                if BufReader::new(stream).read_line(&mut line).is_err() {
                    continue;
                }
                if let Ok(event) = parse_game_event(&line) {
                    if sender.send(event).is_err() {
                        break;
                    }
                }
            }
        });
        Self { addr, events }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn next(&self) -> Option<GameEvent> {
        self.events.recv_timeout(Duration::from_secs(3)).ok()
    }

    pub fn drain(&self) -> Vec<GameEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.recv_timeout(Duration::from_millis(200)) {
            drained.push(event);
        }
        drained
    }
}

pub struct TestServer {
    pub server: ServerHandle,
    pub client: ControlClient,
    pub events: EventSink,
}

pub fn spawn_server() -> TestServer {
    let events = EventSink::bind();
    let mut config = test_config();
    config.event_target = events.addr();
    let server = ServerHandle::spawn(config).expect("server starts");
    let client = ControlClient::new(server.command_addr()).with_timeout(Duration::from_secs(3));
    TestServer {
        server,
        client,
        events,
    }
}
