//! Inbound command listener.
//!
//! One accept thread polls a non-blocking socket; every accepted connection
//! gets its own handler thread that answers commands strictly in arrival
//! order. Handlers poll with a read timeout so they notice a stop request.

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{config::ListenerTimings, router::CommandRouter};

const READ_BUFFER: usize = 1024;

type ClientTable = Arc<Mutex<HashMap<u64, TcpStream>>>;
type WorkerList = Arc<Mutex<Vec<JoinHandle<()>>>>;

pub struct CommandListener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    timings: ListenerTimings,
    clients: ClientTable,
    workers: WorkerList,
    accept_thread: Option<JoinHandle<()>>,
}

impl CommandListener {
    pub fn bind(addr: SocketAddr, router: CommandRouter, timings: ListenerTimings) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Self::start(listener, router, timings)
    }

    /// Serve an already bound socket.
    pub fn start(listener: TcpListener, router: CommandRouter, timings: ListenerTimings) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let clients: ClientTable = Arc::new(Mutex::new(HashMap::new()));
        let workers: WorkerList = Arc::new(Mutex::new(Vec::new()));

        let accept_thread = {
            let running = Arc::clone(&running);
            let clients = Arc::clone(&clients);
            let workers = Arc::clone(&workers);
            thread::Builder::new()
                .name("jenga-listener".to_string())
                .spawn(move || accept_loop(listener, router, timings, running, clients, workers))?
        };

        info!(target: "jenga::listener", addr = %local_addr, "listener.started");
        Ok(Self {
            local_addr,
            running,
            timings,
            clients,
            workers,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn active_connections(&self) -> usize {
        self.clients
            .lock()
            .map(|clients| clients.len())
            .unwrap_or_default()
    }

    /// Stop accepting, close open connections, and join handler threads
    /// within the configured shutdown wait.
    pub fn stop(&mut self) {
        let Some(accept_thread) = self.accept_thread.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        let deadline = Instant::now() + self.timings.shutdown_wait();
        let poll = self.timings.read_poll().min(self.timings.accept_idle().max(Duration::from_millis(1)));

        // No new handlers are registered once the accept thread is gone.
        let mut stuck = join_until(vec![accept_thread], deadline, poll);

        match self.clients.lock() {
            Ok(clients) => {
                for stream in clients.values() {
                    let _ = stream.shutdown(Shutdown::Both);
                }
            }
            Err(_) => warn!(target: "jenga::listener", "listener.clients_lock_poisoned"),
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => {
                warn!(target: "jenga::listener", "listener.workers_lock_poisoned");
                Vec::new()
            }
        };
        stuck.extend(join_until(workers, deadline, poll));

        if stuck.is_empty() {
            info!(target: "jenga::listener", addr = %self.local_addr, "listener.stopped");
        } else {
            warn!(
                target: "jenga::listener",
                addr = %self.local_addr,
                stuck = stuck.len(),
                "listener.shutdown_timeout"
            );
        }
    }
}

/// Join every handle that finishes before `deadline`; return the rest.
fn join_until(mut pending: Vec<JoinHandle<()>>, deadline: Instant, poll: Duration) -> Vec<JoinHandle<()>> {
    loop {
        let (finished, still_running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|handle| handle.is_finished());
        for handle in finished {
            if handle.join().is_err() {
                warn!(target: "jenga::listener", "listener.thread_panicked");
            }
        }
        pending = still_running;
        if pending.is_empty() || Instant::now() >= deadline {
            return pending;
        }
        thread::sleep(poll);
    }
}

impl Drop for CommandListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_transient_accept_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
    )
}

fn accept_loop(
    listener: TcpListener,
    router: CommandRouter,
    timings: ListenerTimings,
    running: Arc<AtomicBool>,
    clients: ClientTable,
    workers: WorkerList,
) {
    let next_id = AtomicU64::new(0);
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = spawn_handler(id, stream, peer, &router, &timings, &running, &clients, &workers) {
                    warn!(
                        target: "jenga::listener",
                        %peer,
                        error = %err,
                        "connection.setup_failed"
                    );
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(timings.accept_idle());
            }
            Err(err) if is_transient_accept_error(err.kind()) => {
                debug!(target: "jenga::listener", error = %err, "accept.retry");
                thread::sleep(timings.accept_idle());
            }
            Err(err) => {
                error!(target: "jenga::listener", error = %err, "accept.failed");
                running.store(false, Ordering::Release);
                break;
            }
        }
    }
    debug!(target: "jenga::listener", "accept.stopped");
}

#[allow(clippy::too_many_arguments)]
fn spawn_handler(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    router: &CommandRouter,
    timings: &ListenerTimings,
    running: &Arc<AtomicBool>,
    clients: &ClientTable,
    workers: &WorkerList,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timings.read_poll()))?;
    if let Err(err) = stream.set_nodelay(true) {
        debug!(target: "jenga::listener", %peer, error = %err, "connection.nodelay_failed");
    }
    let registered = stream.try_clone()?;
    if let Ok(mut clients) = clients.lock() {
        clients.insert(id, registered);
    }

    let router = router.clone();
    let running = Arc::clone(running);
    let table = Arc::clone(clients);
    let handle = thread::Builder::new()
        .name(format!("jenga-conn-{id}"))
        .spawn(move || {
            debug!(target: "jenga::listener", %peer, "connection.opened");
            if let Err(err) = serve_connection(stream, &router, &running) {
                debug!(target: "jenga::listener", %peer, error = %err, "connection.error");
            }
            if let Ok(mut clients) = table.lock() {
                clients.remove(&id);
            }
            debug!(target: "jenga::listener", %peer, "connection.closed");
        })?;

    match workers.lock() {
        Ok(mut workers) => {
            workers.retain(|worker| !worker.is_finished());
            workers.push(handle);
        }
        Err(_) => warn!(target: "jenga::listener", "listener.workers_lock_poisoned"),
    }
    Ok(())
}

/// Answer every non-empty line of each read before reading again.
/// Splits a connection's byte stream into command lines.
///
/// Controllers either send one command per write with no terminator, or
/// newline-terminate every command. Until a newline shows up, a read that
/// ends on a character boundary is taken as a whole command. After the first
/// newline, a trailing fragment waits for the rest of its line.
#[derive(Debug, Default)]
struct LineFramer {
    pending: Vec<u8>,
    newline_framed: bool,
}

impl LineFramer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();

        if let Some(last_newline) = self.pending.iter().rposition(|byte| *byte == b'\n') {
            self.newline_framed = true;
            let rest = self.pending.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            lines.extend(
                complete
                    .split(|byte| *byte == b'\n')
                    .filter_map(decode_line),
            );
        }

        if !self.newline_framed && !ends_mid_character(&self.pending) {
            let fragment = std::mem::take(&mut self.pending);
            lines.extend(decode_line(&fragment));
        }
        lines
    }

    /// Whatever is left once the peer has closed its side.
    fn finish(&mut self) -> Option<String> {
        let fragment = std::mem::take(&mut self.pending);
        decode_line(&fragment)
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(bytes);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

fn ends_mid_character(bytes: &[u8]) -> bool {
    matches!(std::str::from_utf8(bytes), Err(err) if err.error_len().is_none())
}

fn answer(stream: &mut TcpStream, router: &CommandRouter, line: &str) -> io::Result<()> {
    let response = router.handle_line(line);
    debug!(target: "jenga::listener", command = line, %response, "command.answered");
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

fn serve_connection(mut stream: TcpStream, router: &CommandRouter, running: &AtomicBool) -> io::Result<()> {
    let mut buffer = [0u8; READ_BUFFER];
    let mut framer = LineFramer::default();
    while running.load(Ordering::Acquire) {
        let read = match stream.read(&mut buffer) {
            Ok(0) => {
                if let Some(line) = framer.finish() {
                    answer(&mut stream, router, &line)?;
                }
                return Ok(());
            }
            Ok(read) => read,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(err) => return Err(err),
        };

        for line in framer.push(&buffer[..read]) {
            answer(&mut stream, router, &line)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{PublishedState, SimRequest};
    use crossbeam_channel::unbounded;

    fn quick_timings() -> ListenerTimings {
        ListenerTimings {
            accept_idle_ms: 5,
            read_poll_ms: 20,
            shutdown_wait_ms: 1000,
        }
    }

    fn roundtrip(addr: SocketAddr, line: &str) -> String {
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");
        stream.write_all(line.as_bytes()).expect("write");
        let mut buffer = [0u8; READ_BUFFER];
        let read = stream.read(&mut buffer).expect("read");
        String::from_utf8_lossy(&buffer[..read]).to_string()
    }

    #[test]
    fn answers_on_same_connection_and_stops() {
        let (sender, _requests) = unbounded::<SimRequest>();
        let router = CommandRouter::new(
            sender,
            Arc::new(PublishedState::default()),
            Duration::from_millis(50),
        );
        let mut listener = CommandListener::bind(
            "127.0.0.1:0".parse().expect("addr"),
            router,
            quick_timings(),
        )
        .expect("bind");
        let addr = listener.local_addr();

        assert_eq!(roundtrip(addr, "foo bar\n"), "Unknown command");
        assert_eq!(roundtrip(addr, "  isfallen  "), "false");

        let _idle = TcpStream::connect(addr).expect("idle client");
        std::thread::sleep(Duration::from_millis(50));
        listener.stop();
        assert!(!listener.is_running());
        assert_eq!(listener.active_connections(), 0);
    }

    #[test]
    fn unterminated_writes_are_whole_commands() {
        let mut framer = LineFramer::default();
        assert_eq!(framer.push(b"isfallen"), vec!["isfallen"]);
        assert_eq!(framer.push(b"  remove 1 y "), vec!["remove 1 y"]);
        assert!(framer.push(b"   ").is_empty());
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn newline_framed_commands_survive_split_reads() {
        let mut framer = LineFramer::default();
        assert_eq!(framer.push(b"toggle_menu\nremo"), vec!["toggle_menu"]);
        assert_eq!(framer.push(b"ve 1 "), Vec::<String>::new());
        assert_eq!(
            framer.push(b"y\r\nisfallen\n"),
            vec!["remove 1 y", "isfallen"]
        );
        assert_eq!(framer.push(b"reset"), Vec::<String>::new());
        assert_eq!(framer.finish().as_deref(), Some("reset"));
    }

    #[test]
    fn split_utf8_character_waits_for_its_tail() {
        let bytes = "remove 1 \u{00e9}".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);
        let mut framer = LineFramer::default();
        assert!(framer.push(head).is_empty());
        assert_eq!(framer.push(tail), vec!["remove 1 \u{00e9}"]);
    }
}
