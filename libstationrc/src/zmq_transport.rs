use std::time::Duration;

use super::error::HardwareError;
use super::remote_control::{Reply, Request, Transport};

/// ZeroMQ REQ socket to the station daemon.
///
/// Every request is one JSON message answered by one JSON reply. A REQ socket
/// that missed its reply can not send again, so it is rebuilt before the error
/// is handed back.
pub struct ZmqTransport {
    context: zmq::Context,
    socket: zmq::Socket,
    endpoint: String,
    timeout: Duration,
}

fn open_socket(
    context: &zmq::Context,
    endpoint: &str,
    timeout: Duration,
) -> Result<zmq::Socket, HardwareError> {
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let socket = context.socket(zmq::REQ)?;
    socket.set_linger(0)?;
    socket.set_rcvtimeo(millis)?;
    socket.set_sndtimeo(millis)?;
    socket.connect(endpoint)?;
    Ok(socket)
}

impl ZmqTransport {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, HardwareError> {
        let endpoint = format!("tcp://{host}:{port}");
        spdlog::info!("Connect to socket: '{endpoint}'");
        let context = zmq::Context::new();
        let socket = open_socket(&context, &endpoint, timeout)?;
        Ok(Self {
            context,
            socket,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn exchange(&mut self, message: &[u8]) -> Result<Vec<u8>, zmq::Error> {
        self.socket.send(message, 0)?;
        self.socket.recv_bytes(0)
    }
}

impl Transport for ZmqTransport {
    fn request(&mut self, request: &Request) -> Result<Reply, HardwareError> {
        let message = serde_json::to_vec(request)?;
        match self.exchange(&message) {
            Ok(reply) => Ok(serde_json::from_slice(&reply)?),
            Err(e) => {
                spdlog::warn!(
                    "No reply from {} to {} {}: {e}",
                    self.endpoint,
                    request.device,
                    request.cmd
                );
                self.reconnect()?;
                Err(e.into())
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), HardwareError> {
        spdlog::info!("Reconnect to socket: '{}'", self.endpoint);
        self.socket = open_socket(&self.context, &self.endpoint, self.timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_control::Device;

    /// Bind a REP socket on a free loopback port
    fn bind_station(context: &zmq::Context) -> (zmq::Socket, u16) {
        let socket = context.socket(zmq::REP).unwrap();
        socket.bind("tcp://127.0.0.1:*").unwrap();
        let endpoint = socket.get_last_endpoint().unwrap().unwrap();
        let port = endpoint.rsplit(':').next().unwrap().parse().unwrap();
        (socket, port)
    }

    #[test]
    fn test_round_trip_over_loopback() {
        let context = zmq::Context::new();
        let (station, port) = bind_station(&context);
        let server = std::thread::spawn(move || {
            let message = station.recv_bytes(0).unwrap();
            let request: Request = serde_json::from_slice(&message).unwrap();
            assert_eq!(request.device, Device::RadiantCalram);
            assert_eq!(request.cmd, "numRolls");
            station
                .send(&b"{\"status\":\"OK\",\"data\":384}"[..], 0)
                .unwrap();
        });

        let mut transport =
            ZmqTransport::connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        assert_eq!(transport.endpoint(), format!("tcp://127.0.0.1:{port}"));
        let reply = transport
            .request(&Request {
                device: Device::RadiantCalram,
                cmd: String::from("numRolls"),
                data: None,
            })
            .unwrap();
        server.join().unwrap();
        assert_eq!(reply, Reply::ok(Some(serde_json::json!(384))));
    }

    #[test]
    fn test_missing_reply_times_out_and_socket_recovers() {
        let context = zmq::Context::new();
        // a ROUTER may leave a request unanswered and still take the next one
        let station = context.socket(zmq::ROUTER).unwrap();
        station.bind("tcp://127.0.0.1:*").unwrap();
        let endpoint = station.get_last_endpoint().unwrap().unwrap();
        let port: u16 = endpoint.rsplit(':').next().unwrap().parse().unwrap();
        let server = std::thread::spawn(move || {
            let _ = station.recv_multipart(0).unwrap();
            let mut frames = station.recv_multipart(0).unwrap();
            let message = frames.pop().unwrap();
            let request: Request = serde_json::from_slice(&message).unwrap();
            assert_eq!(request.cmd, "numRolls");
            frames.push(b"{\"status\":\"OK\",\"data\":1}".to_vec());
            station.send_multipart(frames, 0).unwrap();
        });

        let mut transport =
            ZmqTransport::connect("127.0.0.1", port, Duration::from_millis(200)).unwrap();
        let status = Request {
            device: Device::Station,
            cmd: String::from("status"),
            data: None,
        };
        assert!(matches!(
            transport.request(&status),
            Err(HardwareError::Zmq(zmq::Error::EAGAIN))
        ));

        transport.timeout = Duration::from_secs(5);
        transport.reconnect().unwrap();
        let reply = transport
            .request(&Request {
                device: Device::RadiantCalram,
                cmd: String::from("numRolls"),
                data: None,
            })
            .unwrap();
        server.join().unwrap();
        assert_eq!(reply, Reply::ok(Some(serde_json::json!(1))));
    }
}
