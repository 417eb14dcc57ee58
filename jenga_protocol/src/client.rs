//! Blocking controller-side client.
//!
//! Each call opens a fresh connection, writes one command, reads one
//! response, and closes. Commands are written without a terminator.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::{responses, BlockColor, ControlCommand};

const RESPONSE_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct ControlClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send a raw command line and return the trimmed response.
    pub fn send_line(&self, line: &str) -> io::Result<String> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;
        stream.write_all(line.as_bytes())?;

        let mut buffer = [0u8; RESPONSE_BUFFER];
        let read = stream.read(&mut buffer)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before a response arrived",
            ));
        }
        Ok(String::from_utf8_lossy(&buffer[..read]).trim().to_string())
    }

    pub fn send(&self, command: &ControlCommand) -> io::Result<String> {
        self.send_line(&command.to_string())
    }

    pub fn remove(&self, level: i32, color: BlockColor) -> io::Result<String> {
        self.send(&ControlCommand::Remove { level, color })
    }

    pub fn reset(&self) -> io::Result<String> {
        self.send(&ControlCommand::Reset)
    }

    pub fn is_fallen(&self) -> io::Result<bool> {
        let response = self.send(&ControlCommand::IsFallen)?;
        Ok(response.eq_ignore_ascii_case(responses::TRUE))
    }

    pub fn blocks_in_level(&self, level: i32) -> io::Result<Option<usize>> {
        let response = self.send(&ControlCommand::GetNumOfBlocksInLevel { level })?;
        Ok(response.parse().ok())
    }

    pub fn average_max_tilt(&self) -> io::Result<Option<f32>> {
        let response = self.send(&ControlCommand::GetAverageMaxTiltAngle)?;
        Ok(response.parse().ok())
    }

    pub fn most_max_tilt(&self) -> io::Result<Option<f32>> {
        let response = self.send(&ControlCommand::GetMostMaxTiltAngle)?;
        Ok(response.parse().ok())
    }

    /// Returns `true` when the simulation confirmed the revert.
    pub fn revert_step(&self) -> io::Result<bool> {
        let response = self.send(&ControlCommand::RevertStep)?;
        Ok(response == responses::STEP_REVERTED)
    }
}
