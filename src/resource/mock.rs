//! Scripted in-memory instruments
//!
//! Used by the test suites to drive the scanner and the runner without
//! hardware. Each instrument answers known queries, can be told to fail
//! specific commands, refuse connections or add latency to every call
//! (latency uses tokio timers, so paused-time tests stay instantaneous).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Error, Result};

use super::address::ResourceAddress;
use super::endpoint::{Connection, Endpoint};
use super::enumerator::{filter_unique, ResourceEnumerator};
use super::pattern::ResourcePattern;

/// Behaviour of one scripted instrument
#[derive(Debug, Clone, Default)]
pub struct MockInstrument {
    replies: HashMap<String, String>,
    failures: HashMap<String, String>,
    timeouts: HashSet<String>,
    connect_error: Option<String>,
    latency: Duration,
}

impl MockInstrument {
    /// An instrument that identifies itself as `identity`
    pub fn new(identity: &str) -> Self {
        Self::default().reply("*IDN?", identity)
    }

    /// Answer `query` with `reply`
    #[must_use]
    pub fn reply(mut self, query: &str, reply: &str) -> Self {
        self.replies.insert(query.to_string(), reply.to_string());
        self
    }

    /// Fail `command` with a transport error carrying `message`
    #[must_use]
    pub fn fail_on(mut self, command: &str, message: &str) -> Self {
        self.failures.insert(command.to_string(), message.to_string());
        self
    }

    /// Never answer `command`; the call runs into the I/O timeout
    #[must_use]
    pub fn timeout_on(mut self, command: &str) -> Self {
        self.timeouts.insert(command.to_string());
        self
    }

    /// Refuse every connection attempt
    #[must_use]
    pub fn refuse_connect(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    /// Delay every connect, write and read by `latency`
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Default)]
struct Activity {
    connects: usize,
    closes: usize,
    writes: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockState {
    instruments: HashMap<String, MockInstrument>,
    activity: HashMap<String, Activity>,
}

/// Endpoint backed by scripted instruments, keyed by address text
#[derive(Debug, Clone, Default)]
pub struct MockEndpoint {
    state: Arc<Mutex<MockState>>,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument at `address`
    #[must_use]
    pub fn with_instrument(self, address: &str, instrument: MockInstrument) -> Self {
        self.lock()
            .instruments
            .insert(address.to_string(), instrument);
        self
    }

    /// Number of successful connects to `address`
    pub fn connects(&self, address: &str) -> usize {
        self.lock().activity.get(address).map_or(0, |a| a.connects)
    }

    /// Number of connection closes for `address`
    pub fn closes(&self, address: &str) -> usize {
        self.lock().activity.get(address).map_or(0, |a| a.closes)
    }

    /// Raw bytes written to `address`, including terminations
    pub fn writes(&self, address: &str) -> Vec<Vec<u8>> {
        self.lock()
            .activity
            .get(address)
            .map(|a| a.writes.clone())
            .unwrap_or_default()
    }

    /// Addresses that saw at least one connect attempt
    pub fn attempted(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lock().activity.keys().cloned().collect();
        out.sort();
        out
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn connect(
        &self,
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>> {
        let key = address.as_str().to_string();
        let instrument = {
            let mut state = self.lock();
            state.activity.entry(key.clone()).or_default();
            state.instruments.get(&key).cloned()
        };

        let Some(instrument) = instrument else {
            return Err(Error::Transport(format!("no instrument at '{}'", key)));
        };

        pause(instrument.latency, timeout).await?;

        if let Some(message) = &instrument.connect_error {
            return Err(Error::Transport(message.clone()));
        }

        self.lock()
            .activity
            .entry(key.clone())
            .or_default()
            .connects += 1;

        Ok(Box::new(MockConnection {
            endpoint: self.clone(),
            address: key,
            instrument,
            timeout,
            pending: None,
        }))
    }
}

async fn pause(latency: Duration, timeout: Duration) -> Result<()> {
    if latency > timeout {
        tokio::time::sleep(timeout).await;
        return Err(Error::Timeout(timeout.as_millis() as u64));
    }
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
    Ok(())
}

struct MockConnection {
    endpoint: MockEndpoint,
    address: String,
    instrument: MockInstrument,
    timeout: Duration,
    pending: Option<String>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        pause(self.instrument.latency, self.timeout).await?;

        self.endpoint
            .lock()
            .activity
            .entry(self.address.clone())
            .or_default()
            .writes
            .push(data.to_vec());

        let command = String::from_utf8_lossy(data).trim_end().to_string();

        if let Some(message) = self.instrument.failures.get(&command) {
            return Err(Error::Transport(message.clone()));
        }
        if self.instrument.timeouts.contains(&command) {
            tokio::time::sleep(self.timeout).await;
            return Err(Error::Timeout(self.timeout.as_millis() as u64));
        }

        self.pending = if command.ends_with('?') {
            self.instrument.replies.get(&command).cloned()
        } else {
            None
        };
        Ok(())
    }

    async fn read(&mut self, termination: Option<u8>) -> Result<Vec<u8>> {
        pause(self.instrument.latency, self.timeout).await?;

        match self.pending.take() {
            Some(reply) => {
                let mut data = reply.into_bytes();
                data.push(termination.unwrap_or(b'\n'));
                Ok(data)
            }
            None => {
                tokio::time::sleep(self.timeout).await;
                Err(Error::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.endpoint
            .lock()
            .activity
            .entry(self.address.clone())
            .or_default()
            .closes += 1;
        Ok(())
    }
}

/// Enumerator returning a fixed list, or failing outright
#[derive(Debug, Clone, Default)]
pub struct MockEnumerator {
    addresses: Vec<String>,
    error: Option<String>,
}

impl MockEnumerator {
    pub fn new<S: AsRef<str>>(addresses: &[S]) -> Self {
        Self {
            addresses: addresses.iter().map(|s| s.as_ref().to_string()).collect(),
            error: None,
        }
    }

    /// An enumerator whose backend is unavailable
    pub fn failing(message: &str) -> Self {
        Self {
            addresses: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl ResourceEnumerator for MockEnumerator {
    async fn enumerate(&self, pattern: &str) -> Result<Vec<String>> {
        if let Some(message) = &self.error {
            return Err(Error::Enumeration(message.clone()));
        }
        let pattern = ResourcePattern::new(pattern)?;
        Ok(filter_unique(self.addresses.clone(), &pattern))
    }
}
