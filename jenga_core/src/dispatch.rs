//! Outbound event push to the controller.
//!
//! Every event goes out on its own short-lived connection: connect, write one
//! line, optionally read one reply, close. Connection failures are retried
//! with a fixed backoff; anything else drops the event.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    thread::{self, JoinHandle},
};

use crossbeam_channel::Receiver;
use jenga_protocol::GameEvent;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DispatchPolicy;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("event target {addr} unreachable after {attempts} attempts: {source}")]
    Unreachable {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to deliver event to {addr}: {source}")]
    Delivery {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

fn is_connection_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
    )
}

fn deliver_once(addr: SocketAddr, policy: &DispatchPolicy, line: &str) -> io::Result<Option<String>> {
    let mut stream = TcpStream::connect_timeout(&addr, policy.connect_timeout())?;
    stream.set_nodelay(true)?;
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    stream.set_read_timeout(Some(policy.reply_timeout()))?;
    let mut buffer = [0u8; 1024];
    let reply = match stream.read(&mut buffer) {
        Ok(0) => None,
        Ok(read) => Some(String::from_utf8_lossy(&buffer[..read]).trim().to_string()),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::ConnectionReset
            ) =>
        {
            None
        }
        Err(err) => return Err(err),
    };
    let _ = stream.shutdown(Shutdown::Both);
    Ok(reply)
}

/// Push one event, blocking through any retries. Returns the controller's
/// reply when it sent one.
pub fn dispatch_blocking(
    addr: SocketAddr,
    policy: &DispatchPolicy,
    event: &GameEvent,
) -> Result<Option<String>, DispatchError> {
    let line = event.to_string();
    deliver_with_retry(addr, policy, &line, || deliver_once(addr, policy, &line))
}

fn deliver_with_retry<F>(
    addr: SocketAddr,
    policy: &DispatchPolicy,
    line: &str,
    mut deliver: F,
) -> Result<Option<String>, DispatchError>
where
    F: FnMut() -> io::Result<Option<String>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match deliver() {
            Ok(reply) => {
                debug!(
                    target: "jenga::dispatch",
                    %addr,
                    event = %line,
                    attempt,
                    reply = reply.as_deref().unwrap_or(""),
                    "dispatch.delivered"
                );
                return Ok(reply);
            }
            Err(err) if is_connection_error(err.kind()) => {
                if attempt >= attempts {
                    return Err(DispatchError::Unreachable {
                        addr,
                        attempts,
                        source: err,
                    });
                }
                debug!(
                    target: "jenga::dispatch",
                    %addr,
                    attempt,
                    error = %err,
                    "dispatch.retrying"
                );
                attempt += 1;
                thread::sleep(policy.backoff());
            }
            Err(err) => return Err(DispatchError::Delivery { addr, source: err }),
        }
    }
}

/// Background worker that drains queued events in order.
pub struct Dispatcher {
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the worker. It exits once every sender for `events` is gone.
    pub fn spawn(target: SocketAddr, policy: DispatchPolicy, events: Receiver<GameEvent>) -> io::Result<Self> {
        let worker = thread::Builder::new()
            .name("jenga-dispatch".to_string())
            .spawn(move || {
                for event in events.iter() {
                    if let Err(err) = dispatch_blocking(target, &policy, &event) {
                        warn!(
                            target: "jenga::dispatch",
                            event = %event,
                            error = %err,
                            "dispatch.failed"
                        );
                    }
                }
                info!(target: "jenga::dispatch", "dispatch.stopped");
            })?;
        Ok(Self {
            worker: Some(worker),
        })
    }

    /// Wait for queued events to drain. Callers drop their senders first.
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(target: "jenga::dispatch", "dispatch.worker_panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jenga_protocol::BlockColor;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::time::Instant;

    fn quick_policy(max_attempts: u32) -> DispatchPolicy {
        DispatchPolicy {
            max_attempts,
            backoff_ms: 10,
            connect_timeout_ms: 200,
            reply_timeout_ms: 50,
        }
    }

    #[test]
    fn delivers_line_and_reads_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let controller = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            reader.read_line(&mut line).expect("read");
            let mut stream = stream;
            stream.write_all(b"ok").expect("reply");
            line
        });

        let event = GameEvent::FinishedMove {
            level: 4,
            color: BlockColor::Blue,
        };
        let reply = dispatch_blocking(addr, &quick_policy(1), &event).expect("delivered");
        assert_eq!(reply.as_deref(), Some("ok"));
        assert_eq!(controller.join().expect("controller").trim(), "finished_move 4 b");
    }

    #[test]
    fn refused_connection_exhausts_attempts() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr")
        };
        let started = Instant::now();
        let err = dispatch_blocking(addr, &quick_policy(3), &GameEvent::EndGame)
            .expect_err("nobody listening");
        match err {
            DispatchError::Unreachable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error {other}"),
        }
        assert!(started.elapsed() >= std::time::Duration::from_millis(20));
    }

    #[test]
    fn only_connection_failures_are_retryable() {
        for kind in [
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
            io::ErrorKind::TimedOut,
        ] {
            assert!(is_connection_error(kind), "{kind:?}");
        }
        for kind in [
            io::ErrorKind::InvalidData,
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::WriteZero,
        ] {
            assert!(!is_connection_error(kind), "{kind:?}");
        }
    }

    #[test]
    fn other_failures_give_up_after_one_attempt() {
        let addr: SocketAddr = "127.0.0.1:9".parse().expect("addr");
        let mut calls = 0;
        let err = deliver_with_retry(addr, &quick_policy(5), "end_game", || {
            calls += 1;
            Err(io::Error::new(io::ErrorKind::InvalidData, "garbled"))
        })
        .expect_err("not retried");
        assert_eq!(calls, 1);
        match err {
            DispatchError::Delivery { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidData)
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn retry_stops_once_delivery_succeeds() {
        let addr: SocketAddr = "127.0.0.1:9".parse().expect("addr");
        let mut calls = 0;
        let reply = deliver_with_retry(addr, &quick_policy(5), "end_game", || {
            calls += 1;
            if calls < 3 {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            } else {
                Ok(None)
            }
        })
        .expect("third attempt lands");
        assert_eq!(reply, None);
        assert_eq!(calls, 3);
    }
}
