//! Mock SCPI instrument for integration testing
//!
//! Serves a raw SCPI socket (one command per line, replies terminated by
//! `\n`) that behaves like a small bench power supply, so the probe can be
//! tested without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Parser, Debug)]
#[command(name = "mock-instrument", about = "Raw-socket SCPI instrument simulator")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: String,

    /// Identification string returned by *IDN?
    #[arg(long, default_value = "MOCK,PSU-1,00000001,1.0")]
    idn: String,

    /// Delay before every reply in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Close each connection after this many commands
    #[arg(long)]
    drop_after: Option<usize>,
}

#[derive(Debug, Default)]
struct Supply {
    voltage: f64,
    current: f64,
    output: bool,
    errors: VecDeque<(i32, &'static str)>,
}

impl Supply {
    fn push_error(&mut self, code: i32, message: &'static str) {
        if self.errors.len() < 16 {
            self.errors.push_back((code, message));
        }
    }

    /// Execute one command, returning the reply for queries
    fn execute(&mut self, idn: &str, line: &str) -> Option<String> {
        let (header, argument) = match line.split_once(char::is_whitespace) {
            Some((h, a)) => (h, a.trim()),
            None => (line, ""),
        };
        let header = normalize(header);

        match header.as_str() {
            "*IDN?" => Some(idn.to_string()),
            "*OPC?" => Some("1".to_string()),
            "*RST" => {
                let errors = std::mem::take(&mut self.errors);
                *self = Self {
                    errors,
                    ..Self::default()
                };
                None
            }
            "*CLS" => {
                self.errors.clear();
                None
            }
            "VOLT" => {
                self.set_number(argument, |s, v| s.voltage = v);
                None
            }
            "VOLT?" => Some(format!("{:.3}", self.voltage)),
            "CURR" => {
                self.set_number(argument, |s, v| s.current = v);
                None
            }
            "CURR?" => Some(format!("{:.3}", self.current)),
            "OUTP" => {
                match argument.to_ascii_uppercase().as_str() {
                    "ON" | "1" => self.output = true,
                    "OFF" | "0" => self.output = false,
                    _ => self.push_error(-224, "Illegal parameter value"),
                }
                None
            }
            "OUTP?" => Some(if self.output { "1" } else { "0" }.to_string()),
            "MEAS:VOLT?" => Some(format!("{:.3}", self.measured_voltage())),
            "MEAS:CURR?" => Some(format!("{:.3}", self.measured_current())),
            "MEAS:POW?" => Some(format!(
                "{:.3}",
                self.measured_voltage() * self.measured_current()
            )),
            "SYST:ERR?" => Some(match self.errors.pop_front() {
                Some((code, message)) => format!("{},\"{}\"", code, message),
                None => "0,\"No error\"".to_string(),
            }),
            _ => {
                // Unknown queries get no reply, like a real instrument
                self.push_error(-113, "Undefined header");
                None
            }
        }
    }

    fn set_number(&mut self, argument: &str, apply: impl FnOnce(&mut Self, f64)) {
        match argument.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => apply(self, value),
            _ => self.push_error(-224, "Illegal parameter value"),
        }
    }

    fn measured_voltage(&self) -> f64 {
        if self.output {
            self.voltage
        } else {
            0.0
        }
    }

    fn measured_current(&self) -> f64 {
        if self.output {
            self.current / 2.0
        } else {
            0.0
        }
    }
}

/// Reduce long-form mnemonics to their short form and drop the optional
/// SOURce prefix
fn normalize(header: &str) -> String {
    let upper = header.trim().to_ascii_uppercase();
    let upper = upper
        .strip_prefix("SOURCE:")
        .or_else(|| upper.strip_prefix("SOUR:"))
        .unwrap_or(&upper);

    upper
        .split(':')
        .map(|part| {
            let (name, query) = match part.strip_suffix('?') {
                Some(name) => (name, "?"),
                None => (part, ""),
            };
            let short = match name {
                "VOLTAGE" => "VOLT",
                "CURRENT" => "CURR",
                "OUTPUT" => "OUTP",
                "MEASURE" => "MEAS",
                "POWER" => "POW",
                "SYSTEM" => "SYST",
                "ERROR" => "ERR",
                other => other,
            };
            format!("{}{}", short, query)
        })
        .collect::<Vec<_>>()
        .join(":")
}

struct Server {
    idn: String,
    delay: Duration,
    drop_after: Option<usize>,
    supply: Mutex<Supply>,
}

async fn handle(server: Arc<Server>, stream: TcpStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut handled = 0usize;

    while let Some(line) = lines.next_line().await? {
        for command in line.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            if server.drop_after.is_some_and(|limit| handled >= limit) {
                return Ok(());
            }
            handled += 1;

            let reply = server
                .supply
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .execute(&server.idn, command);

            if let Some(reply) = reply {
                if !server.delay.is_zero() {
                    tokio::time::sleep(server.delay).await;
                }
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    let listener = TcpListener::bind(&args.listen).await?;
    println!("mock instrument listening at: {}", listener.local_addr()?);

    let server = Arc::new(Server {
        idn: args.idn,
        delay: Duration::from_millis(args.delay_ms),
        drop_after: args.drop_after,
        supply: Mutex::new(Supply::default()),
    });

    loop {
        let (stream, peer) = listener.accept().await?;
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = handle(server, stream).await {
                eprintln!("connection {} ended: {}", peer, e);
            }
        });
    }
}
