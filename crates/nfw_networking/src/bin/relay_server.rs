//! # Relay Server
//!
//! Accepts connections and relays every packet body to all other
//! connected clients.
//!
//! ## Usage
//!
//! ```bash
//! relay_server [CONFIG.toml] [--duration SECS]
//! ```
//!
//! ```toml
//! [server]
//! address = "0.0.0.0"
//! port = 9000
//! tick_rate = 60
//!
//! [network]
//! worker_threads = 2
//! ```

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{error, info, warn};

use nfw_networking::{
    packet_payload, ConnectionEstablisher, NetError, NetResult, Network, NetworkConfig,
    SocketContainer, TickLoop, DEFAULT_TICK_RATE,
};

/// `[server]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerConfig {
    address: String,
    port: u16,
    tick_rate: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 9000,
            tick_rate: DEFAULT_TICK_RATE,
        }
    }
}

/// Whole configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RelayConfig {
    server: ServerConfig,
    network: NetworkConfig,
}

impl RelayConfig {
    fn load(path: Option<&str>) -> NetResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let source = std::fs::read_to_string(path).map_err(|e| NetError::Config(format!("{path}: {e}")))?;
        let config: Self = toml::from_str(&source).map_err(|e| NetError::Config(e.to_string()))?;
        config.network.validate()?;
        Ok(config)
    }
}

struct Options {
    config_path: Option<String>,
    duration: Option<Duration>,
}

fn parse_args() -> Option<Options> {
    let mut options = Options {
        config_path: None,
        duration: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--duration" | "-d" => {
                options.duration = args.next().and_then(|s| s.parse().ok()).map(Duration::from_secs);
            }
            "--help" | "-h" => {
                println!("Usage: relay_server [CONFIG.toml] [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --duration <SECS>      Run for N seconds then exit");
                println!("  -h, --help                 Show this help");
                return None;
            }
            path => options.config_path = Some(path.to_owned()),
        }
    }
    Some(options)
}

fn run(options: &Options) -> NetResult<()> {
    let config = RelayConfig::load(options.config_path.as_deref())?;
    info!(
        "Relay configuration: {}:{} at {} Hz, {} workers",
        config.server.address, config.server.port, config.server.tick_rate, config.network.worker_threads
    );

    let network = Network::start(config.network.clone())?;
    let mut container = SocketContainer::new(network.backend());
    let mut establisher = ConnectionEstablisher::new(network.backend());
    establisher.listen(&config.server.address, config.server.port)?;

    let fresh = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&fresh);
    establisher.on_established(move |index| sink.borrow_mut().push(*index));

    let mut ticks = TickLoop::new(config.server.tick_rate);
    let stats_interval = u64::from(config.server.tick_rate) * 5;
    let mut last_stats_tick = 0;
    let start = Instant::now();

    loop {
        if options.duration.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }
        ticks.wait_for_next_tick();

        while ticks.should_tick() {
            let tick_start = ticks.begin_tick();

            establisher.synchronise(&mut container);
            for index in fresh.borrow_mut().drain(..) {
                let relay = container.handle();
                let Some(socket) = container.get_mut(index) else {
                    continue;
                };
                info!("Client in slot {} connected from {:?}", index, socket.remote_addr());
                socket.on_packet(move |body| relay.broadcast_except(packet_payload(body), index));
                socket.on_disconnect(move |status| info!("Client in slot {} left: {}", index, status));
            }
            container.synchronise();

            ticks.end_tick(tick_start);

            let current_tick = ticks.tick_count();
            if current_tick - last_stats_tick >= stats_interval {
                last_stats_tick = current_tick;
                let stats = ticks.stats();
                info!(
                    "Tick {}: {} clients, avg {} us, {} late",
                    current_tick,
                    container.len(),
                    stats.avg_tick_us,
                    stats.late_ticks
                );
            }
        }
    }

    let stats = ticks.stats();
    info!(
        "Relay stopped after {} ticks (min {} us, max {} us)",
        stats.total_ticks, stats.min_tick_us, stats.max_tick_us
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();

    let Some(options) = parse_args() else {
        return ExitCode::SUCCESS;
    };
    if options.config_path.is_none() {
        warn!("No configuration file given, using defaults");
    }

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Relay server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
