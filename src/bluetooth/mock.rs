//! Scripted in-memory transport for exercising the session without a radio.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{Connector, FrameSink};
use crate::error::ConnectError;

#[derive(Debug, Clone, Copy)]
pub enum OpenOutcome {
    Ok,
    Fail,
    NotFound,
    AdapterOff,
    /// Never completes; relies on the session's connect timeout.
    Hang,
}

#[derive(Debug, Clone, Copy)]
pub enum WriteOutcome {
    Ok,
    Fail,
    /// Never completes; relies on the session's write timeout.
    Hang,
}

#[derive(Default)]
struct LinkState {
    opens: VecDeque<OpenOutcome>,
    writes: VecDeque<WriteOutcome>,
    open_calls: usize,
    write_calls: usize,
    identifiers: Vec<String>,
    wire: Vec<u8>,
    frames: Vec<Vec<u8>>,
}

/// Shared view of everything the fake link saw. Unscripted calls succeed.
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(MockConnector { link: self.clone() })
    }

    pub fn script_opens(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        self.state.lock().unwrap().opens.extend(outcomes);
    }

    pub fn script_writes(&self, outcomes: impl IntoIterator<Item = WriteOutcome>) {
        self.state.lock().unwrap().writes.extend(outcomes);
    }

    pub fn open_calls(&self) -> usize {
        self.state.lock().unwrap().open_calls
    }

    pub fn write_calls(&self) -> usize {
        self.state.lock().unwrap().write_calls
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.state.lock().unwrap().identifiers.clone()
    }

    /// Frames whose every byte reached the wire.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().frames.clone()
    }

    /// Raw bytes in arrival order.
    pub fn wire(&self) -> Vec<u8> {
        self.state.lock().unwrap().wire.clone()
    }
}

struct MockConnector {
    link: MockLink,
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &mut self,
        identifier: &str,
        _service: bluer::Uuid,
    ) -> Result<Box<dyn FrameSink>, ConnectError> {
        let outcome = {
            let mut state = self.link.state.lock().unwrap();
            state.open_calls += 1;
            if state.identifiers.last().map(String::as_str) != Some(identifier) {
                state.identifiers.push(identifier.to_string());
            }
            state.opens.pop_front().unwrap_or(OpenOutcome::Ok)
        };

        match outcome {
            OpenOutcome::Ok => Ok(Box::new(MockSink {
                link: self.link.clone(),
            })),
            OpenOutcome::Fail => Err(ConnectError::ConnectFailed(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock connect refused",
            ))),
            OpenOutcome::NotFound => Err(ConnectError::DeviceNotFound(identifier.to_string())),
            OpenOutcome::AdapterOff => {
                Err(ConnectError::AdapterUnavailable("mock adapter off".into()))
            }
            OpenOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hung open outlived the test")
            }
        }
    }
}

struct MockSink {
    link: MockLink,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let outcome = {
            let mut state = self.link.state.lock().unwrap();
            state.write_calls += 1;
            state.writes.pop_front().unwrap_or(WriteOutcome::Ok)
        };

        match outcome {
            WriteOutcome::Ok => {
                // One byte per poll so any concurrent writer would interleave
                for &byte in frame {
                    self.link.state.lock().unwrap().wire.push(byte);
                    tokio::task::yield_now().await;
                }
                self.link.state.lock().unwrap().frames.push(frame.to_vec());
                Ok(())
            }
            WriteOutcome::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failed")),
            WriteOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                unreachable!("hung write outlived the test")
            }
        }
    }
}
