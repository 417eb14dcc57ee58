//! Simulation thread and the server that wires it to the sockets.

use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use bevy::prelude::*;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use jenga_protocol::{BlockColor, GameEvent, PlayerType};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    build_headless_app,
    config::TowerConfig,
    dispatch::Dispatcher,
    listener::CommandListener,
    registry::TowerRegistry,
    resources::{Outbox, ScreenshotSettings},
    router::{execute, submit_human_move, touches_tower, CommandRouter, PublishedState, SimRequest},
    run_tick,
    stability::StabilityMonitor,
    turn::TurnOrchestrator,
};

/// Owns the Bevy app and serialises every request against it.
pub struct SimulationHost {
    app: App,
    requests: Receiver<SimRequest>,
    events: Sender<GameEvent>,
    published: Arc<PublishedState>,
}

impl SimulationHost {
    pub fn new(
        config: TowerConfig,
        requests: Receiver<SimRequest>,
        events: Sender<GameEvent>,
        published: Arc<PublishedState>,
    ) -> Self {
        let mut host = Self {
            app: build_headless_app(config),
            requests,
            events,
            published,
        };
        host.tick();
        host
    }

    pub fn world(&self) -> &World {
        &self.app.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.app.world
    }

    /// Advance one tick, then publish state and flush side effects.
    pub fn tick(&mut self) {
        run_tick(&mut self.app);
        let world = &mut self.app.world;
        self.published
            .publish(world.resource::<StabilityMonitor>().is_collapsed());
        let captures = world.resource_mut::<ScreenshotSettings>().take_pending();
        if captures > 0 {
            let settings = world.resource::<ScreenshotSettings>();
            debug!(
                target: "jenga::server",
                captures,
                width = settings.width,
                height = settings.height,
                "screenshot.requested"
            );
        }
        self.flush_events();
    }

    /// Run ticks until the registry reflects the last structural change.
    pub fn settle(&mut self) {
        while self.app.world.resource::<TowerRegistry>().rebuild_pending() {
            self.tick();
        }
    }

    pub fn handle(&mut self, request: SimRequest) {
        match request {
            SimRequest::Apply(command) => {
                if touches_tower(&command) {
                    self.settle();
                }
                execute(&mut self.app.world, &command);
            }
            SimRequest::Query { command, reply } => {
                if touches_tower(&command) {
                    self.settle();
                }
                let response = execute(&mut self.app.world, &command);
                if reply.send(response).is_err() {
                    debug!(
                        target: "jenga::server",
                        verb = %command.verb(),
                        "query.abandoned"
                    );
                }
            }
            SimRequest::StartGame { players, rounds } => self.start_game(players, rounds),
            SimRequest::HumanMove { level, color } => {
                submit_human_move(&mut self.app.world, level, color);
            }
        }
        self.flush_events();
    }

    fn start_game(&mut self, players: Vec<PlayerType>, rounds: u32) {
        let event = match players.as_slice() {
            [player1, player2, ..] => GameEvent::Start {
                player1: *player1,
                player2: *player2,
                rounds,
            },
            [solo] => GameEvent::Start {
                player1: *solo,
                player2: *solo,
                rounds,
            },
            [] => {
                warn!(target: "jenga::turn", "game.rejected=no_players");
                return;
            }
        };
        let started = self
            .app
            .world
            .resource_mut::<TurnOrchestrator>()
            .start_game(players, rounds);
        match started {
            Ok(()) => {
                info!(target: "jenga::turn", %event, "game.started");
                self.app.world.resource_mut::<Outbox>().push(event);
            }
            Err(err) => warn!(target: "jenga::turn", error = %err, "game.rejected"),
        }
    }

    fn flush_events(&mut self) {
        for event in self.app.world.resource_mut::<Outbox>().drain() {
            if self.events.send(event).is_err() {
                warn!(target: "jenga::dispatch", "dispatch.dropped=worker_stopped");
            }
        }
    }

    /// Serve requests between ticks until `running` clears or every request
    /// sender is gone.
    pub fn run(&mut self, running: &AtomicBool) {
        let interval = self.app.world.resource::<TowerConfig>().tick_interval();
        let mut next_tick = Instant::now() + interval;
        while running.load(Ordering::Acquire) {
            if Instant::now() >= next_tick {
                self.tick();
                next_tick = Instant::now() + interval;
            }
            match self.requests.recv_deadline(next_tick) {
                Ok(request) => self.handle(request),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(target: "jenga::server", "simulation.stopped");
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind command listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to start {role} thread: {source}")]
    Thread {
        role: &'static str,
        #[source]
        source: io::Error,
    },
}

/// A running server: command listener, simulation thread, and dispatcher.
pub struct ServerHandle {
    command_addr: SocketAddr,
    requests: Sender<SimRequest>,
    published: Arc<PublishedState>,
    running: Arc<AtomicBool>,
    listener: Option<CommandListener>,
    simulation: Option<JoinHandle<()>>,
    dispatcher: Option<Dispatcher>,
}

impl ServerHandle {
    pub fn spawn(config: TowerConfig) -> Result<Self, ServerError> {
        let published = Arc::new(PublishedState::default());
        let running = Arc::new(AtomicBool::new(true));
        let (request_tx, request_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let dispatcher = Dispatcher::spawn(config.event_target, config.dispatch, event_rx)
            .map_err(|source| ServerError::Thread {
                role: "dispatch",
                source,
            })?;

        let simulation = {
            let config = config.clone();
            let published = Arc::clone(&published);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("jenga-sim".to_string())
                .spawn(move || {
                    let mut host = SimulationHost::new(config, request_rx, event_tx, published);
                    host.run(&running);
                })
                .map_err(|source| ServerError::Thread {
                    role: "simulation",
                    source,
                })?
        };

        let router = CommandRouter::new(
            request_tx.clone(),
            Arc::clone(&published),
            config.query_timeout(),
        );
        let listener = CommandListener::bind(config.command_bind, router, config.listener)
            .map_err(|source| ServerError::Bind {
                addr: config.command_bind,
                source,
            });
        let listener = match listener {
            Ok(listener) => listener,
            Err(err) => {
                running.store(false, Ordering::Release);
                let _ = simulation.join();
                return Err(err);
            }
        };

        info!(
            target: "jenga::server",
            command_addr = %listener.local_addr(),
            event_target = %config.event_target,
            levels = config.levels,
            "server.ready"
        );

        Ok(Self {
            command_addr: listener.local_addr(),
            requests: request_tx,
            published,
            running,
            listener: Some(listener),
            simulation: Some(simulation),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn published(&self) -> &PublishedState {
        &self.published
    }

    pub fn requests(&self) -> Sender<SimRequest> {
        self.requests.clone()
    }

    /// Start a game; the `start` event is pushed to the controller.
    pub fn start_game(&self, players: Vec<PlayerType>, rounds: u32) {
        self.post(SimRequest::StartGame { players, rounds });
    }

    /// Signal that the human player finished removing a block.
    pub fn complete_human_move(&self, level: i32, color: BlockColor) {
        self.post(SimRequest::HumanMove { level, color });
    }

    fn post(&self, request: SimRequest) {
        if self.requests.send(request).is_err() {
            warn!(target: "jenga::server", "request.dropped=simulation_stopped");
        }
    }

    /// Block until the simulation thread exits.
    pub fn wait(mut self) {
        if let Some(simulation) = self.simulation.take() {
            if simulation.join().is_err() {
                warn!(target: "jenga::server", "simulation.panicked");
            }
        }
        self.shutdown_parts();
    }

    pub fn shutdown(mut self) {
        self.shutdown_parts();
    }

    fn shutdown_parts(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
        self.running.store(false, Ordering::Release);
        if let Some(simulation) = self.simulation.take() {
            if simulation.join().is_err() {
                warn!(target: "jenga::server", "simulation.panicked");
            }
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.join();
        }
        info!(target: "jenga::server", "server.stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.simulation.is_some() || self.listener.is_some() {
            self.shutdown_parts();
        }
    }
}
