//! # Drive Client

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    tc::{Tc, TcParseError, TcResponse},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time allowed for the executable to respond, on top of the duration of any timed action.
///
/// Units: milliseconds
pub const RESPONSE_TIMEOUT_MS: i32 = 2000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sends telecommands to the drive executable.
pub struct DriveClient {
    socket: MonitoredSocket
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DriveClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not set the response timeout: {0}")]
    TimeoutError(zmq::Error),

    #[error("Could not send the request to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("No response from the server")]
    NoResponse,

    #[error("The server sent a message which was not valid UTF-8")]
    NonUtf8Response,

    #[error("Could not parse the response: {0}")]
    ResponseParseError(TcParseError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DriveClient {

    /// Create a new client connected to the given endpoint.
    ///
    /// This function will not block until the server connects.
    pub fn new(ctx: &zmq::Context, endpoint: &str) -> Result<Self, DriveClientError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            connect_timeout: 1000,
            linger: 1,
            send_timeout: RESPONSE_TIMEOUT_MS,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            socket_options,
            endpoint
        ).map_err(DriveClientError::SocketError)?;

        Ok(Self {
            socket
        })
    }

    /// Check if the client is connected to the server
    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    /// Send a telecommand and wait for the response.
    ///
    /// `expected_duration_s` is how long the request is expected to take to execute, which is
    /// added to the normal response timeout.
    pub fn send(
        &self,
        tc: &Tc,
        expected_duration_s: f64
    ) -> Result<TcResponse, DriveClientError> {
        let timeout_ms = RESPONSE_TIMEOUT_MS
            .saturating_add((expected_duration_s.max(0.0) * 1000.0).min(i32::MAX as f64) as i32);
        self.socket.set_rcvtimeo(timeout_ms)
            .map_err(DriveClientError::TimeoutError)?;

        self.socket.send(&tc.to_query(), 0)
            .map_err(DriveClientError::SendError)?;

        let msg = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(DriveClientError::NonUtf8Response),
            Err(zmq::Error::EAGAIN) => return Err(DriveClientError::NoResponse),
            Err(e) => return Err(DriveClientError::RecvError(e)),
        };

        TcResponse::from_wire(&msg).map_err(DriveClientError::ResponseParseError)
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    #[test]
    fn test_send() {
        let ctx = zmq::Context::new();
        let endpoint = "inproc://test_drive_client";

        let server = ctx.socket(zmq::REP).unwrap();
        server.bind(endpoint).unwrap();

        let server_thread = thread::spawn(move || {
            let req = server.recv_string(0).unwrap().unwrap();
            server.send("turn_complete", 0).unwrap();
            req
        });

        let client = DriveClient::new(&ctx, endpoint).unwrap();
        let tc = Tc::TimedTurn { dir: comms_if::tc::TurnDirection::Left, duration_s: 0.5 };

        assert_eq!(client.send(&tc, 0.5).unwrap(), TcResponse::TurnComplete);
        assert_eq!(server_thread.join().unwrap(), "timed_turn?dir=left&t=0.5");
    }

    #[test]
    fn test_no_response() {
        let ctx = zmq::Context::new();
        let endpoint = "inproc://test_drive_client_silent";

        let server = ctx.socket(zmq::REP).unwrap();
        server.bind(endpoint).unwrap();

        let client = DriveClient::new(&ctx, endpoint).unwrap();

        // A negative expected duration doesn't shorten the timeout
        assert!(matches!(
            client.send(&Tc::Status, -10.0),
            Err(DriveClientError::NoResponse)
        ));
    }
}
