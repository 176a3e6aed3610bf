//! Daemon Client
//!
//! Talks to the privileged thermgovd daemon over its Unix socket, one
//! newline-delimited JSON envelope per request.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use tg_protocol::{
    GovernorStatus, Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope,
    MAX_MESSAGE_SIZE,
};

use crate::error::{GovernorError, Result};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking daemon connection
pub struct DaemonClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    /// Connect to the daemon listening on `socket_path`
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                GovernorError::DaemonNotAvailable
            }
            _ => GovernorError::DaemonConnection(format!("{}: {}", socket_path.display(), e)),
        })?;

        stream.set_read_timeout(Some(TIMEOUT))?;
        stream.set_write_timeout(Some(TIMEOUT))?;
        let reader_stream = stream.try_clone()?;

        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    /// Send a request and return the payload of a successful response
    ///
    /// Error responses from the daemon become [`GovernorError::DaemonResponse`].
    pub fn request(&mut self, req: Request) -> Result<ResponseData> {
        req.validate()
            .map_err(|reason| GovernorError::validation(req.type_name(), reason))?;

        let envelope = RequestEnvelope::new(req.clone());
        let request_id = envelope.id;

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(GovernorError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        self.writer
            .write_all(&json)
            .map_err(|e| GovernorError::DaemonConnection(format!("send failed: {}", e)))?;

        let mut buf = Vec::with_capacity(512);
        let read = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                    GovernorError::Timeout("waiting for daemon response".into())
                }
                _ => GovernorError::DaemonConnection(format!("read failed: {}", e)),
            })?;
        if read == 0 {
            return Err(GovernorError::DaemonConnection("daemon closed connection".into()));
        }
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(GovernorError::MessageTooLarge {
                size: buf.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
        }

        let response: ResponseEnvelope = serde_json::from_slice(&buf)
            .map_err(|e| GovernorError::IpcProtocol(format!("malformed response: {}", e)))?;
        if response.id != request_id {
            return Err(GovernorError::IpcProtocol(format!(
                "response id mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        match response.response {
            Response::Ok(data) => {
                verify_response_type(&req, &data)?;
                Ok(data)
            }
            Response::Error { message } => Err(GovernorError::daemon(message)),
        }
    }

    pub fn ping(&mut self) -> Result<String> {
        expect(self.request(Request::Ping)?.value, "value")
    }

    pub fn version(&mut self) -> Result<String> {
        expect(self.request(Request::Version)?.value, "value")
    }

    pub fn status(&mut self) -> Result<GovernorStatus> {
        expect(self.request(Request::GetStatus)?.status, "status")
    }

    pub fn hotplug_enabled(&mut self) -> Result<bool> {
        expect(self.request(Request::GetHotplugEnabled)?.enabled, "enabled")
    }

    pub fn set_hotplug_enabled(&mut self, enabled: bool) -> Result<()> {
        self.request(Request::SetHotplugEnabled { enabled }).map(|_| ())
    }

    pub fn threshold(&mut self) -> Result<i32> {
        expect(self.request(Request::GetThreshold)?.celsius, "celsius")
    }

    pub fn set_threshold(&mut self, celsius: i32) -> Result<()> {
        self.request(Request::SetThreshold { celsius }).map(|_| ())
    }

    pub fn warm_frequency(&mut self) -> Result<u32> {
        expect(self.request(Request::GetWarmFrequency)?.khz, "khz")
    }

    pub fn set_warm_frequency(&mut self, khz: u32) -> Result<()> {
        self.request(Request::SetWarmFrequency { khz }).map(|_| ())
    }

    pub fn core0_permission(&mut self) -> Result<u8> {
        expect(self.request(Request::GetCore0Permission)?.permission, "permission")
    }

    pub fn set_core0_permission(&mut self, value: u8) -> Result<()> {
        self.request(Request::SetCore0Permission { value }).map(|_| ())
    }
}

fn expect<T>(field: Option<T>, name: &str) -> Result<T> {
    field.ok_or_else(|| GovernorError::IpcProtocol(format!("response missing '{}'", name)))
}

fn verify_response_type(req: &Request, data: &ResponseData) -> Result<()> {
    let valid = match req {
        Request::Ping | Request::Version => data.value.is_some(),
        Request::GetStatus => data.status.is_some(),
        Request::GetHotplugEnabled => data.enabled.is_some(),
        Request::GetThreshold => data.celsius.is_some(),
        Request::GetWarmFrequency => data.khz.is_some(),
        Request::GetCore0Permission => data.permission.is_some(),
        Request::SetHotplugEnabled { .. }
        | Request::SetThreshold { .. }
        | Request::SetWarmFrequency { .. }
        | Request::SetCore0Permission { .. } => true,
    };
    if valid {
        Ok(())
    } else {
        Err(GovernorError::IpcProtocol(format!(
            "response type mismatch for {}",
            req.type_name()
        )))
    }
}

/// Whether a daemon answers on `socket_path`
pub fn is_daemon_running(socket_path: &Path) -> bool {
    DaemonClient::connect(socket_path)
        .and_then(|mut client| client.ping())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::tempdir;

    /// Answer one request per line with `respond`
    fn fake_daemon<F>(listener: UnixListener, respond: F) -> thread::JoinHandle<()>
    where
        F: Fn(Request) -> Response + Send + 'static,
    {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                let envelope: RequestEnvelope = serde_json::from_str(line.trim()).unwrap();
                let reply = ResponseEnvelope::new(envelope.id, respond(envelope.request));
                let mut out = serde_json::to_vec(&reply).unwrap();
                out.push(b'\n');
                writer.write_all(&out).unwrap();
                line.clear();
            }
        })
    }

    #[test]
    fn test_request_roundtrip_over_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tg.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = fake_daemon(listener, |req| match req {
            Request::Ping => Response::ok_string("pong"),
            Request::GetThreshold => Response::ok_temp(62),
            Request::SetWarmFrequency { .. } => Response::error("Warm frequency is fixed after startup"),
            _ => Response::ok(),
        });

        let mut client = DaemonClient::connect(&path).unwrap();
        assert_eq!(client.ping().unwrap(), "pong");
        assert_eq!(client.threshold().unwrap(), 62);
        assert!(matches!(
            client.set_warm_frequency(800_000),
            Err(GovernorError::DaemonResponse(_))
        ));
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn test_invalid_request_never_leaves_the_client() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tg.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let mut client = DaemonClient::connect(&path).unwrap();
        let err = client.set_threshold(120).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_missing_socket_is_not_available() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            DaemonClient::connect(&dir.path().join("absent.sock")),
            Err(GovernorError::DaemonNotAvailable)
        ));
        assert!(!is_daemon_running(&dir.path().join("absent.sock")));
    }
}
