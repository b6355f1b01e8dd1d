//! # Network Module
//!
//! Networking between the drive executable and its control clients uses ZMQ. This module wraps
//! ZMQ sockets so that the software can tell whether a peer is actually connected, which ZMQ
//! itself hides.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use serde::Deserialize;
use zmq::{Context, Socket, SocketEvent, SocketType};
use log::{debug, trace, warn};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

/// Apply each `(setter, value)` pair to the socket, returning the name of the first that fails.
macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+ $(,)?) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout of the monitor socket, bounds how long dropping a [`MonitoredSocket`] waits for
/// the monitor thread to exit.
///
/// Units: milliseconds
const MONITOR_RECV_TIMEOUT_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Used to give each monitor a unique inproc endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters, loaded from `net.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetParams {
    /// Endpoint the drive executable binds its request socket to, e.g. `tcp://*:5000`.
    pub drive_server_endpoint: String,

    /// Endpoint control clients connect to, e.g. `tcp://raspberrypi.local:5000`.
    pub drive_client_endpoint: String,
}

/// A zmq socket which knows whether it has any connected peers.
///
/// A background thread reads the socket's monitor events and keeps a count of connected peers.
/// The socket itself is reached through `Deref`, so it is used exactly like a plain
/// [`zmq::Socket`].
pub struct MonitoredSocket {
    socket: Socket,

    monitor_thread: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    num_peers: Arc<AtomicUsize>,
}

/// Options applied to a [`MonitoredSocket`].
///
/// Apart from `bind` and `block_on_first_connect` these are the options of the same name in
/// [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt).
#[derive(Debug, Clone)]
pub struct SocketOptions {

    /// Bind to the endpoint rather than connecting to it. Servers bind, clients connect.
    ///
    /// Default: `false`
    pub bind: bool,

    /// For connecting sockets, wait in [`MonitoredSocket::new`] until the connection is made.
    /// If `connect_timeout` is positive and passes first, `CouldNotConnect` is returned.
    ///
    /// Default: `true`
    pub block_on_first_connect: bool,

    /// `ZMQ_REQ_CORRELATE`, REQ sockets only
    pub req_correlate: bool,

    /// `ZMQ_REQ_RELAXED`, REQ sockets only
    pub req_relaxed: bool,

    /// `ZMQ_LINGER`, milliseconds
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`, milliseconds
    pub reconnect_ivl: i32,

    /// `ZMQ_CONNECT_TIMEOUT`, milliseconds, 0 to use the OS timeout
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`, milliseconds, -1 to block forever
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`, milliseconds, -1 to block forever
    pub send_timeout: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not bind or connect the socket to {0}: {1:?}")]
    CouldNotConnect(String, Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),

    #[error("Could not start the monitor thread: {0}")]
    MonitorThreadError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a new monitored socket, bound or connected to `endpoint` as set in the options.
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        socket_options: SocketOptions,
        endpoint: &str
    ) -> Result<Self, MonitoredSocketError> {
        let socket = ctx.socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // The monitor must be connected before the socket is, or the first events are lost
        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );
        socket.monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;

        let monitor = ctx.socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor.connect(&monitor_endpoint)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        set_sockopts!(monitor, (set_rcvtimeo, MONITOR_RECV_TIMEOUT_MS));

        socket_options.set(&socket)?;

        let num_peers = Arc::new(AtomicUsize::new(0));

        if socket_options.bind {
            socket.bind(endpoint)
                .map_err(|e| MonitoredSocketError::CouldNotConnect(endpoint.into(), Some(e)))?;
        }
        else {
            socket.connect(endpoint)
                .map_err(|e| MonitoredSocketError::CouldNotConnect(endpoint.into(), Some(e)))?;

            if socket_options.block_on_first_connect {
                wait_for_connection(&monitor, endpoint, socket_options.connect_timeout)?;
                num_peers.store(1, Ordering::Relaxed);
            }
        }

        let shutdown = Arc::new(AtomicBool::new(false));

        let monitor_thread = {
            let shutdown = shutdown.clone();
            let num_peers = num_peers.clone();

            thread::Builder::new()
                .name(format!("monitor_{}", endpoint))
                .spawn(move || monitor_socket(monitor, monitor_endpoint, shutdown, num_peers))
                .map_err(MonitoredSocketError::MonitorThreadError)?
        };

        Ok(Self {
            socket,
            monitor_thread: Some(monitor_thread),
            shutdown,
            num_peers,
        })
    }

    /// Return if the socket has at least one connected peer.
    pub fn connected(&self) -> bool {
        self.num_peers() > 0
    }

    /// Number of peers currently connected.
    pub fn num_peers(&self) -> usize {
        self.num_peers.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.monitor_thread.take() {
            handle.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for MonitoredSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        set_sockopts!(
            socket,
            (set_connect_timeout, self.connect_timeout),
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout),
        );

        if let Ok(SocketType::REQ) = socket.get_socket_type() {
            set_sockopts!(
                socket,
                (set_req_correlate, self.req_correlate),
                (set_req_relaxed, self.req_relaxed),
            );
        }

        Ok(())
    }
}

impl Default for SocketOptions {
    /// The zmq defaults, with `block_on_first_connect` set.
    fn default() -> Self {
        Self {
            bind: false,
            block_on_first_connect: true,
            connect_timeout: 0,
            linger: 30_000,
            reconnect_ivl: 100,
            recv_timeout: -1,
            req_correlate: false,
            req_relaxed: false,
            send_timeout: -1
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an event from a monitor socket.
fn read_event(monitor: &Socket) -> Result<SocketEvent, zmq::Error> {
    // [event id (u16), value (u32)], [address]
    let msg = monitor.recv_msg(0)?;
    if msg.len() < 2 {
        return Err(zmq::Error::EINVAL)
    }
    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    while monitor.get_rcvmore()? {
        monitor.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

/// Block until the monitor reports a connection, or the timeout passes if positive.
fn wait_for_connection(
    monitor: &Socket,
    endpoint: &str,
    timeout_ms: i32
) -> Result<(), MonitoredSocketError> {
    let deadline = match timeout_ms > 0 {
        true => Some(Instant::now() + Duration::from_millis(timeout_ms as u64)),
        false => None
    };

    loop {
        if deadline.map_or(false, |d| Instant::now() >= d) {
            return Err(MonitoredSocketError::CouldNotConnect(endpoint.into(), None))
        }

        match read_event(monitor) {
            Ok(SocketEvent::CONNECTED) => return Ok(()),
            Ok(SocketEvent::CLOSED) | Ok(SocketEvent::MONITOR_STOPPED) => {
                return Err(MonitoredSocketError::CouldNotConnect(endpoint.into(), None))
            },
            Ok(e) => trace!("Waiting for {}, got event {}", endpoint, e as u16),
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => return Err(MonitoredSocketError::EventReadError(e))
        }
    }
}

/// Monitor thread, counts peers until shutdown is requested.
fn monitor_socket(
    monitor: Socket,
    monitor_endpoint: String,
    shutdown: Arc<AtomicBool>,
    num_peers: Arc<AtomicUsize>
) {
    while !shutdown.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Error reading event from monitor {}: {}", monitor_endpoint, e);
                break
            }
        };

        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => {
                num_peers.fetch_add(1, Ordering::Relaxed);
            },
            SocketEvent::DISCONNECTED => {
                // Never goes below zero
                num_peers
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                    .ok();
            },
            _ => ()
        }
    }

    debug!("Monitor {} exited", monitor_endpoint);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let ctx = Context::new();

        // Bind on a free local port
        let server_options = SocketOptions {
            bind: true,
            linger: 0,
            ..Default::default()
        };
        let server = MonitoredSocket::new(&ctx, zmq::REP, server_options, "tcp://127.0.0.1:*")
            .unwrap();
        let endpoint = server.get_last_endpoint().unwrap().unwrap();
        assert!(!server.connected());

        let client_options = SocketOptions {
            linger: 0,
            connect_timeout: 2000,
            ..Default::default()
        };
        let client = MonitoredSocket::new(&ctx, zmq::REQ, client_options, &endpoint).unwrap();
        assert!(client.connected());

        // The server sees the connection on its monitor thread
        let start = Instant::now();
        while !server.connected() && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.num_peers(), 1);

        client.send("ping", 0).unwrap();
        assert_eq!(server.recv_string(0).unwrap().unwrap(), "ping");
    }

    #[test]
    fn test_unreachable_endpoint() {
        let ctx = Context::new();

        // Nothing listens on the discard port
        let options = SocketOptions {
            linger: 0,
            connect_timeout: 200,
            reconnect_ivl: 50,
            ..Default::default()
        };
        assert!(matches!(
            MonitoredSocket::new(&ctx, zmq::REQ, options, "tcp://127.0.0.1:9"),
            Err(MonitoredSocketError::CouldNotConnect(..))
        ));
    }

    #[test]
    fn test_non_blocking_client() {
        let ctx = Context::new();
        let options = SocketOptions {
            block_on_first_connect: false,
            linger: 0,
            ..Default::default()
        };
        let client = MonitoredSocket::new(&ctx, zmq::REQ, options, "tcp://127.0.0.1:9").unwrap();

        assert!(!client.connected());
    }
}
