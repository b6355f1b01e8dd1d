//! # Telecommand Server Module
//!
//! This module abstracts over the networking side of the drive executable. Clients connect to a
//! ROUTER socket, and each request they send is handed to an idle worker thread which executes it
//! and sends back the response. Workers announce themselves on an internal ROUTER socket, so the
//! server always knows which of them are free.
//!
//! A timed action occupies its worker for the whole duration of the action, so there must be at
//! least one other worker free to reject the requests that arrive in the meantime.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;

use comms_if::net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions};
use comms_if::tc::TcResponse;
use log::{debug, info, warn};

use crate::actuator::Actuator;
use crate::tc_processor::TcProcessor;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Minimum number of workers the server needs.
pub const MIN_NUM_WORKERS: usize = 2;

/// Receive timeout of the worker sockets, bounds how long stopping the workers takes.
///
/// Units: milliseconds
const WORKER_RECV_TIMEOUT_MS: i32 = 200;

/// Sent by a worker when it starts.
const READY: &str = "READY";

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Number of servers created, used to give each server unique inproc endpoints.
static NUM_SERVERS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the drive executable.
pub struct TcServer {
    /// ROUTER socket clients connect to
    frontend: MonitoredSocket,

    /// ROUTER socket the workers connect to
    backend: zmq::Socket,

    /// PAIR socket used to stop the server
    control: zmq::Socket,

    num_workers: usize,

    stop_handle: Option<StopHandle>,

    workers: Vec<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,
}

/// Stops a running [`TcServer`] from another thread.
pub struct StopHandle {
    socket: zmq::Socket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`TcServer`]
#[derive(thiserror::Error, Debug)]
pub enum TcServerError {
    #[error("Socket error: {0}")]
    SocketError(#[from] MonitoredSocketError),

    #[error("Could not set up the internal {0} socket: {1}")]
    InternalSocketError(&'static str, zmq::Error),

    #[error("At least {} workers are required, found {0}", MIN_NUM_WORKERS)]
    TooFewWorkers(usize),

    #[error("Could not spawn worker {0}: {1}")]
    SpawnError(usize, std::io::Error),

    #[error("Could not pass messages between clients and workers: {0}")]
    BrokerError(zmq::Error),

    #[error("Could not stop the server: {0}")]
    StopError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcServer {

    /// Create a new instance of the server and start its workers.
    ///
    /// Requests are not forwarded to the workers until [`TcServer::run`] is called.
    pub fn new<A: Actuator + 'static>(
        ctx: &zmq::Context,
        params: &NetParams,
        num_workers: usize,
        processor: Arc<TcProcessor<A>>
    ) -> Result<Self, TcServerError> {

        if num_workers < MIN_NUM_WORKERS {
            return Err(TcServerError::TooFewWorkers(num_workers))
        }

        let id = NUM_SERVERS.fetch_add(1, Ordering::Relaxed);
        let backend_endpoint = format!("inproc://tc_workers_{}", id);
        let control_endpoint = format!("inproc://tc_control_{}", id);

        // Create the client facing socket
        let frontend_options = SocketOptions {
            bind: true,
            block_on_first_connect: false,
            linger: 0,
            ..Default::default()
        };
        let frontend = MonitoredSocket::new(
            ctx,
            zmq::ROUTER,
            frontend_options,
            &params.drive_server_endpoint
        )?;

        // Create the internal sockets
        let backend = internal_socket(ctx, zmq::ROUTER, "backend")?;
        backend.bind(&backend_endpoint)
            .map_err(|e| TcServerError::InternalSocketError("backend", e))?;

        let control = internal_socket(ctx, zmq::PAIR, "control")?;
        control.bind(&control_endpoint)
            .map_err(|e| TcServerError::InternalSocketError("control", e))?;

        let stop_socket = internal_socket(ctx, zmq::PAIR, "stop")?;
        stop_socket.connect(&control_endpoint)
            .map_err(|e| TcServerError::InternalSocketError("stop", e))?;

        // Spawn the workers
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(num_workers);

        for i in 0..num_workers {
            let socket = internal_socket(ctx, zmq::REQ, "worker")?;
            socket.set_rcvtimeo(WORKER_RECV_TIMEOUT_MS)
                .map_err(|e| TcServerError::InternalSocketError("worker", e))?;
            socket.connect(&backend_endpoint)
                .map_err(|e| TcServerError::InternalSocketError("worker", e))?;

            let processor = processor.clone();
            let shutdown = shutdown.clone();

            let handle = thread::Builder::new()
                .name(format!("tc_worker_{}", i))
                .spawn(move || worker(socket, processor, shutdown))
                .map_err(|e| TcServerError::SpawnError(i, e))?;

            workers.push(handle);
        }

        debug!("Started {} workers on {}", num_workers, backend_endpoint);

        Ok(Self {
            frontend,
            backend,
            control,
            num_workers,
            stop_handle: Some(StopHandle { socket: stop_socket }),
            workers,
            shutdown,
        })
    }

    /// Take the handle used to stop the server.
    ///
    /// Only one handle exists, later calls return `None`.
    pub fn stop_handle(&mut self) -> Option<StopHandle> {
        self.stop_handle.take()
    }

    /// Whether any client is connected.
    pub fn connected(&self) -> bool {
        self.frontend.connected()
    }

    /// Forward requests to the workers until the server is stopped.
    ///
    /// Requests are only given to idle workers, so a worker busy with a timed action never holds
    /// up other requests.
    pub fn run(&self) -> Result<(), TcServerError> {
        info!("Serving requests");

        // Identities of the workers waiting for a request
        let mut idle: VecDeque<Vec<u8>> = VecDeque::with_capacity(self.num_workers);

        loop {
            let frontend_events = match idle.is_empty() {
                true => zmq::PollEvents::empty(),
                false => zmq::POLLIN
            };

            let (worker_ready, client_ready, stop) = {
                let mut items = [
                    self.backend.as_poll_item(zmq::POLLIN),
                    self.frontend.as_poll_item(frontend_events),
                    self.control.as_poll_item(zmq::POLLIN),
                ];
                match zmq::poll(&mut items, -1) {
                    Ok(_) => (),
                    // A signal arrived, the stop request follows on the control socket
                    Err(zmq::Error::EINTR) => continue,
                    Err(e) => return Err(TcServerError::BrokerError(e)),
                }

                (items[0].is_readable(), items[1].is_readable(), items[2].is_readable())
            };

            if stop {
                self.control.recv_bytes(0).map_err(TcServerError::BrokerError)?;
                break
            }

            // Either [worker, "", READY] or [worker, "", client, "", response]
            if worker_ready {
                let mut parts = self.backend.recv_multipart(0)
                    .map_err(TcServerError::BrokerError)?;

                if parts.len() == 5 {
                    let reply = parts.split_off(2);
                    self.frontend.send_multipart(reply, 0)
                        .map_err(TcServerError::BrokerError)?;
                }
                else if parts.len() != 3 {
                    warn!("Worker sent a message with {} parts", parts.len());
                }

                idle.extend(parts.into_iter().next());
            }

            // [client, "", request]
            if client_ready {
                let parts = self.frontend.recv_multipart(0)
                    .map_err(TcServerError::BrokerError)?;

                match (idle.pop_front(), parts.len()) {
                    (Some(worker), 3) => {
                        let mut msg = vec![worker, Vec::new()];
                        msg.extend(parts);
                        self.backend.send_multipart(msg, 0)
                            .map_err(TcServerError::BrokerError)?;
                    },
                    (worker, n) => {
                        warn!("Dropping client message with {} parts", n);
                        idle.extend(worker);
                    }
                }
            }
        }

        info!("Server stopped");

        Ok(())
    }
}

impl Drop for TcServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // Workers in the middle of a timed action finish it first
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("A worker panicked");
            }
        }
    }
}

impl StopHandle {
    /// Stop the server, making [`TcServer::run`] return.
    pub fn stop(&self) -> Result<(), TcServerError> {
        self.socket.send("", 0).map_err(TcServerError::StopError)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn internal_socket(
    ctx: &zmq::Context,
    socket_type: zmq::SocketType,
    name: &'static str
) -> Result<zmq::Socket, TcServerError> {
    let socket = ctx.socket(socket_type)
        .map_err(|e| TcServerError::InternalSocketError(name, e))?;
    socket.set_linger(0)
        .map_err(|e| TcServerError::InternalSocketError(name, e))?;

    Ok(socket)
}

/// Worker thread, answers requests until shutdown is requested.
fn worker<A: Actuator>(
    socket: zmq::Socket,
    processor: Arc<TcProcessor<A>>,
    shutdown: Arc<AtomicBool>
) {
    if let Err(e) = socket.send(READY, 0) {
        warn!("Could not register worker with the server: {}", e);
        return
    }

    while !shutdown.load(Ordering::Relaxed) {
        // [client, "", request]
        let mut parts = match socket.recv_multipart(0) {
            Ok(p) if p.len() == 3 => p,
            Ok(p) => {
                // The REQ socket must reply before it can recieve again. The broker can't route
                // this reply to a client and only marks the worker idle.
                warn!("Recieved a message with {} parts", p.len());
                if let Err(e) = socket.send(TcResponse::Error.to_wire().as_str(), 0) {
                    warn!("Could not reply to the malformed message: {}", e);
                }
                continue
            },
            Err(zmq::Error::EAGAIN) => continue,
            Err(zmq::Error::ETERM) => break,
            Err(e) => {
                warn!("Could not recieve request: {}", e);
                continue
            }
        };

        let request = String::from_utf8_lossy(&parts[2]).into_owned();
        let response = processor.handle_request(&request);

        debug!("\"{}\" -> \"{}\"", request, response);

        parts[2] = response.into_bytes();
        if let Err(e) = socket.send_multipart(parts, 0) {
            warn!("Could not send response: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::actuator::mock::{Cmd, MockActuator};
    use crate::actuator::{duty_percent, Motion};
    use crate::calib::{CalibParams, CalibrationConverter};
    use crate::scheduler::ActionScheduler;

    fn request(ctx: &zmq::Context, endpoint: &str, req: &str) -> String {
        let socket = ctx.socket(zmq::REQ).unwrap();
        socket.set_linger(0).unwrap();
        socket.set_rcvtimeo(5000).unwrap();
        socket.connect(endpoint).unwrap();
        socket.send(req, 0).unwrap();
        socket.recv_string(0).unwrap().unwrap()
    }

    fn processor() -> Arc<TcProcessor<MockActuator>> {
        let (mock, _) = MockActuator::new();
        let converter = CalibrationConverter::new(CalibParams::default()).unwrap();
        Arc::new(TcProcessor::new(ActionScheduler::new(mock, 200), converter))
    }

    fn params(name: &str) -> NetParams {
        NetParams {
            drive_server_endpoint: format!("inproc://{}", name),
            drive_client_endpoint: format!("inproc://{}", name),
        }
    }

    #[test]
    fn test_too_few_workers() {
        let ctx = zmq::Context::new();
        assert!(matches!(
            TcServer::new(&ctx, &params("test_too_few"), 1, processor()),
            Err(TcServerError::TooFewWorkers(1))
        ));
    }

    #[test]
    fn test_stop_during_timed_action() {
        let ctx = zmq::Context::new();
        let params = params("test_stop_timed");

        let (mock, log) = MockActuator::new();
        let converter = CalibrationConverter::new(CalibParams::default()).unwrap();
        let processor = Arc::new(TcProcessor::new(ActionScheduler::new(mock, 200), converter));

        let mut server = TcServer::new(&ctx, &params, 2, processor.clone()).unwrap();
        let stop = server.stop_handle().unwrap();

        let client = ctx.socket(zmq::REQ).unwrap();
        client.set_linger(0).unwrap();
        client.connect(&params.drive_client_endpoint).unwrap();
        client.send("timed_forward?t=0.5", 0).unwrap();

        let start = Instant::now();
        let server_thread = thread::spawn(move || {
            let result = server.run();
            (result, server)
        });

        while !processor.scheduler().status().busy {
            thread::yield_now();
        }

        // The broker stops without waiting for the action to end
        stop.stop().unwrap();
        let (result, server) = server_thread.join().unwrap();
        result.unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));

        processor.scheduler().shutdown();
        assert_eq!(
            log.lock().unwrap()[..],
            [
                Cmd::Motion(Motion::Forward),
                Cmd::Duty(duty_percent(200)),
                Cmd::Motion(Motion::Stop),
                Cmd::Duty(0.0),
            ]
        );

        drop(server);
    }

    #[test]
    fn test_worker_answers_malformed_message() {
        let ctx = zmq::Context::new();
        let endpoint = "inproc://test_worker_malformed";

        let backend = ctx.socket(zmq::ROUTER).unwrap();
        backend.set_rcvtimeo(5000).unwrap();
        backend.bind(endpoint).unwrap();

        let socket = ctx.socket(zmq::REQ).unwrap();
        socket.set_linger(0).unwrap();
        socket.set_rcvtimeo(WORKER_RECV_TIMEOUT_MS).unwrap();
        socket.connect(endpoint).unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let shutdown = shutdown.clone();
            let processor = processor();
            thread::spawn(move || worker(socket, processor, shutdown))
        };

        let ready = backend.recv_multipart(0).unwrap();
        assert_eq!(ready[2], READY.as_bytes());
        let id = ready[0].clone();

        // No client envelope, so the worker answers without executing anything
        backend.send_multipart(vec![id.clone(), Vec::new(), b"status".to_vec()], 0).unwrap();
        let reply = backend.recv_multipart(0).unwrap();
        assert_eq!(reply, vec![id.clone(), Vec::new(), b"error".to_vec()]);

        // The worker still serves well formed requests afterwards
        let request = vec![
            id.clone(), Vec::new(), b"client".to_vec(), Vec::new(), b"set_speed?val=10".to_vec()
        ];
        backend.send_multipart(request, 0).unwrap();
        let reply = backend.recv_multipart(0).unwrap();
        assert_eq!(reply.len(), 5);
        assert_eq!(reply[2], b"client");
        assert_eq!(reply[4], b"speed_ok");

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_concurrent_requests() {
        let ctx = zmq::Context::new();
        let params = params("test_concurrent");

        let mut server = TcServer::new(&ctx, &params, 2, processor()).unwrap();
        let stop = server.stop_handle().unwrap();
        assert!(server.stop_handle().is_none());

        let server_thread = thread::spawn(move || server.run());

        // Start a timed action from one client
        let start = Instant::now();
        let timed = {
            let ctx = ctx.clone();
            let endpoint = params.drive_client_endpoint.clone();
            thread::spawn(move || request(&ctx, &endpoint, "timed_forward?t=0.5"))
        };

        // Give the action time to start, then check another client is served but rejected
        thread::sleep(Duration::from_millis(150));
        let endpoint = &params.drive_client_endpoint;
        assert_eq!(request(&ctx, endpoint, "set_speed?val=100"), "locked");
        assert_eq!(request(&ctx, endpoint, "timed_turn?dir=left&t=1"), "busy");
        assert!(start.elapsed() < Duration::from_millis(500));

        assert_eq!(timed.join().unwrap(), "forward_complete");
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(request(&ctx, endpoint, "set_speed?val=100"), "speed_ok");

        stop.stop().unwrap();
        server_thread.join().unwrap().unwrap();
    }
}
