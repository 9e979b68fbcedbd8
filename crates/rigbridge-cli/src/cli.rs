//! Command-line flags.  Every flag is optional; a flag that is given
//! overrides the config file and the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::Config;

/// Bridge a CAT-controlled transceiver onto a pub/sub broker.
#[derive(Parser, Debug)]
#[command(name = "rigbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.rigbridge/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Broker URL
    #[arg(short = 'u', long)]
    pub broker_url: Option<String>,

    /// Broker port
    #[arg(short = 'p', long)]
    pub broker_port: Option<u16>,

    /// Broker username
    #[arg(short = 'U', long)]
    pub username: Option<String>,

    /// Broker password
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// Client id ("rigbridge-svr" gets a random suffix)
    #[arg(short = 'C', long)]
    pub client_id: Option<String>,

    /// Your station callsign
    #[arg(short = 'X', long)]
    pub station: Option<String>,

    /// Radio id
    #[arg(short = 'Y', long)]
    pub radio: Option<String>,

    /// Meter polling period, e.g. 100ms (0 = disabled)
    #[arg(short = 't', long, value_parser = parse_interval)]
    pub polling_interval: Option<Duration>,

    /// Full state sync period, e.g. 3s (0 = disabled)
    #[arg(short = 'k', long, value_parser = parse_interval)]
    pub sync_interval: Option<Duration>,

    /// Rig model id
    #[arg(short = 'm', long)]
    pub rig_model: Option<u32>,

    /// Baudrate
    #[arg(short = 'b', long)]
    pub baudrate: Option<u32>,

    /// Portname / device path
    #[arg(short = 'o', long)]
    pub portname: Option<String>,

    /// Databits
    #[arg(short = 'd', long)]
    pub databits: Option<u8>,

    /// Stopbits
    #[arg(short = 's', long)]
    pub stopbits: Option<u8>,

    /// Parity (none, even, odd)
    #[arg(short = 'r', long)]
    pub parity: Option<String>,

    /// Handshake (none, RTSCTS)
    #[arg(short = 'a', long)]
    pub handshake: Option<String>,

    /// Device debug level (0=ERROR, ..., 5=TRACE)
    #[arg(short = 'D', long = "hl-debug-level")]
    pub debug_level: Option<u8>,

    /// Run against an in-process broker instead of the network
    #[arg(long)]
    pub loopback: bool,
}

impl Cli {
    /// Overwrite every field of `cfg` for which a flag was given.
    pub fn apply(&self, cfg: &mut Config) {
        fn set<T: Clone>(field: &mut T, flag: &Option<T>) {
            if let Some(v) = flag {
                *field = v.clone();
            }
        }
        let m = &mut cfg.mqtt;
        set(&mut m.broker_url, &self.broker_url);
        set(&mut m.broker_port, &self.broker_port);
        set(&mut m.username, &self.username);
        set(&mut m.password, &self.password);
        set(&mut m.client_id, &self.client_id);
        set(&mut m.station, &self.station);
        set(&mut m.radio, &self.radio);

        let r = &mut cfg.radio;
        set(&mut r.rig_model, &self.rig_model);
        set(&mut r.baudrate, &self.baudrate);
        set(&mut r.portname, &self.portname);
        set(&mut r.databits, &self.databits);
        set(&mut r.stopbits, &self.stopbits);
        set(&mut r.parity, &self.parity);
        set(&mut r.handshake, &self.handshake);
        set(&mut r.hl_debug_level, &self.debug_level);
        if let Some(d) = self.polling_interval {
            r.polling_interval_ms = d.as_millis() as u64;
        }
        if let Some(d) = self.sync_interval {
            r.sync_interval_ms = d.as_millis() as u64;
        }
    }
}

/// Parse `250us`, `100ms`, `3s`, `1m`; a bare number is milliseconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    match unit {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "us" | "µs" => Ok(Duration::from_micros(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        other => Err(format!("unknown duration unit {other:?} in {s:?}")),
    }
}

/// [`parse_duration`] restricted to whole milliseconds, the unit the
/// device intervals are stored in.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let d = parse_duration(s)?;
    if d.subsec_nanos() % 1_000_000 != 0 {
        return Err(format!("interval {s:?} must be a whole number of milliseconds"));
    }
    Ok(d)
}
