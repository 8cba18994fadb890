//! Loopback server and client harness shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Once;
use std::time::{Duration, Instant};

use nfw_networking::{
    CloseStatus, ConnectionEstablisher, IoSocket, Network, NetworkConfig, SocketContainer,
};

static INIT_LOGGING: Once = Once::new();

/// Upper bound for any wait on the network.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize test logging.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Starts an engine with the default configuration.
pub fn start_network() -> Network {
    init_test_logging();
    Network::start(NetworkConfig::default()).expect("network starts")
}

/// Calls `step` until it returns true or [`TIMEOUT`] passes.
pub fn wait_until(mut step: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if step() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Calls `step` repeatedly for `duration`.
pub fn keep_running(duration: Duration, mut step: impl FnMut()) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        step();
        std::thread::sleep(Duration::from_millis(2));
    }
}

type Log<T> = Rc<RefCell<Vec<T>>>;

/// Establisher plus container, recording every event by slot.
pub struct Server {
    pub container: SocketContainer,
    pub establisher: ConnectionEstablisher,
    pub established: Log<usize>,
    pub packets: Log<(usize, Vec<u8>)>,
    pub disconnects: Log<(usize, CloseStatus)>,
    fresh: Log<usize>,
    pub network: Network,
}

impl Server {
    /// Listens on an ephemeral loopback port.
    pub fn start() -> Self {
        let network = start_network();
        let container = SocketContainer::new(network.backend());
        let mut establisher = ConnectionEstablisher::new(network.backend());
        establisher.listen("127.0.0.1", 0).expect("listen");

        let established = Log::default();
        let fresh = Log::default();
        let (all, new) = (Rc::clone(&established), Rc::clone(&fresh));
        establisher.on_established(move |index| {
            all.borrow_mut().push(*index);
            new.borrow_mut().push(*index);
        });

        Self {
            container,
            establisher,
            established,
            packets: Log::default(),
            disconnects: Log::default(),
            fresh,
            network,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.establisher.local_addr().expect("bound")
    }

    /// Accepts pending connections, wiring recorders onto them.
    pub fn accept(&mut self) {
        self.establisher.synchronise(&mut self.container);
        let fresh: Vec<usize> = self.fresh.borrow_mut().drain(..).collect();
        for index in fresh {
            let socket = self.container.get_mut(index).expect("established slot is active");
            let packets = Rc::clone(&self.packets);
            socket.on_packet(move |body| packets.borrow_mut().push((index, body.to_vec())));
            let disconnects = Rc::clone(&self.disconnects);
            socket.on_disconnect(move |status| disconnects.borrow_mut().push((index, *status)));
        }
    }

    /// One server tick.
    pub fn tick(&mut self) {
        self.accept();
        self.container.synchronise();
    }

    pub fn packet_count(&self) -> usize {
        self.packets.borrow().len()
    }
}

/// Standalone client socket recording what it receives.
pub struct Client {
    pub socket: IoSocket,
    pub packets: Log<Vec<u8>>,
    pub disconnects: Log<CloseStatus>,
}

impl Client {
    pub fn connect(network: &Network, addr: SocketAddr) -> Self {
        let mut socket = IoSocket::tcp(network.backend());
        socket
            .connect(&addr.ip().to_string(), addr.port())
            .expect("connect");

        let packets = Log::default();
        let sink = Rc::clone(&packets);
        socket.on_packet(move |body| sink.borrow_mut().push(body.to_vec()));
        let disconnects = Log::default();
        let sink = Rc::clone(&disconnects);
        socket.on_disconnect(move |status| sink.borrow_mut().push(*status));

        Self {
            socket,
            packets,
            disconnects,
        }
    }

    pub fn tick(&mut self) {
        self.socket.synchronise();
    }

    pub fn packet_count(&self) -> usize {
        self.packets.borrow().len()
    }
}
