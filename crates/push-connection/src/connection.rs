//! TLS connection to a gateway service.

use crate::{ConnectionError, ConnectionResult, Transport};
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
use openssl::x509::X509;
use push_config_and_utils::{ClientConfig, ConfigError, Endpoint, Service, SharedLogger};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One TLS socket to the notification gateway or the feedback service.
///
/// Certificates are loaded when the connection is built, so a bad
/// certificate path or passphrase fails here rather than on first connect.
pub struct Connection {
    service: Service,
    endpoint: Endpoint,
    connector: SslConnector,
    verify_peer: bool,
    connect_timeout: Duration,
    retry_times: u32,
    retry_interval: Duration,
    stream: Option<SslStream<TcpStream>>,
    logger: SharedLogger,
}

impl Connection {
    pub fn new(
        service: Service,
        config: &ClientConfig,
        logger: SharedLogger,
    ) -> ConnectionResult<Self> {
        let endpoint = config.endpoint(service)?;
        let certificate_path = config
            .certificate_path
            .as_deref()
            .ok_or(ConfigError::MissingCertificate)?;

        let mut builder = SslConnector::builder(SslMethod::tls_client())?;

        let pem = read_file("certificate", certificate_path)?;
        let mut chain = X509::stack_from_pem(&pem)
            .map_err(|source| certificate_error("certificate", certificate_path, source))?
            .into_iter();
        let leaf = chain.next().ok_or_else(|| {
            ConnectionError::Config(ConfigError::InvalidValue {
                field: "certificate_path",
                reason: format!("{} holds no certificate", certificate_path.display()),
            })
        })?;
        builder.set_certificate(&leaf)?;
        for extra in chain {
            builder.add_extra_chain_cert(extra)?;
        }

        let key = load_private_key(&pem, config.certificate_passphrase.as_deref())
            .map_err(|source| certificate_error("private key", certificate_path, source))?;
        builder.set_private_key(&key)?;
        builder
            .check_private_key()
            .map_err(|source| certificate_error("private key", certificate_path, source))?;

        let verify_peer = match &config.root_ca_path {
            Some(ca) => {
                read_file("root CA", ca)?;
                builder
                    .set_ca_file(ca)
                    .map_err(|source| certificate_error("root CA", ca, source))?;
                builder.set_verify(SslVerifyMode::PEER);
                true
            }
            None => {
                builder.set_verify(SslVerifyMode::NONE);
                false
            }
        };

        Ok(Self {
            service,
            endpoint,
            connector: builder.build(),
            verify_peer,
            connect_timeout: config.connect_timeout(),
            retry_times: config.connect_retry_times,
            retry_interval: config.connect_retry_interval(),
            stream: None,
            logger,
        })
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// One TCP connect + TLS handshake.
    fn open(&self) -> ConnectionResult<SslStream<TcpStream>> {
        let addrs = (self.endpoint.host.as_str(), self.endpoint.port).to_socket_addrs()?;

        let mut last_error = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let tcp = match tcp {
            Some(stream) => stream,
            None => {
                return Err(ConnectionError::Io(last_error.unwrap_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no address resolved")
                })))
            }
        };

        // Bound the handshake, then hand over a non-blocking socket.
        tcp.set_read_timeout(Some(self.connect_timeout))?;
        tcp.set_write_timeout(Some(self.connect_timeout))?;

        let stream = self
            .connector
            .configure()?
            .verify_hostname(self.verify_peer)
            .connect(&self.endpoint.host, tcp)
            .map_err(|e| ConnectionError::Handshake {
                endpoint: self.endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let socket = stream.get_ref();
        socket.set_read_timeout(None)?;
        socket.set_write_timeout(None)?;
        socket.set_nodelay(true)?;
        socket.set_nonblocking(true)?;
        Ok(stream)
    }

    fn stream_mut(&mut self) -> io::Result<&mut SslStream<TcpStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))
    }
}

impl Transport for Connection {
    fn connect(&mut self) -> ConnectionResult<()> {
        self.disconnect();

        let attempts = self.retry_times + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.logger.info(&format!(
                    "Retry to connect ({}/{})...",
                    attempt - 1,
                    self.retry_times
                ));
                std::thread::sleep(self.retry_interval);
            }

            self.logger
                .info(&format!("Trying {} ({})...", self.endpoint, self.service));
            match self.open() {
                Ok(stream) => {
                    self.logger
                        .info(&format!("Connected to {}.", self.endpoint));
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.logger.error(&format!(
                        "Unable to connect to {}: {}",
                        self.endpoint, last_error
                    ));
                }
            }
        }

        self.logger.error(&format!(
            "Giving up on {} after {} attempts",
            self.endpoint, attempts
        ));
        Err(ConnectionError::RetriesExhausted {
            endpoint: self.endpoint.to_string(),
            attempts,
            last_error,
        })
    }

    fn disconnect(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                self.logger.info("Disconnected.");
                // close_notify is best effort on a non-blocking socket
                let _ = stream.shutdown();
                true
            }
            None => false,
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        let timeout = self.connect_timeout;
        let stream = self.stream_mut()?;

        let mut written = 0;
        while written < frame.len() {
            match stream.write(&frame[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !wait_fd(stream.get_ref().as_raw_fd(), libc::POLLOUT, timeout)? {
                        break;
                    }
                }
                Err(e) if written > 0 => {
                    tracing::debug!(error = %e, written, "write stopped early");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        let _ = stream.flush();
        Ok(written)
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let stream = self.stream_mut()?;
        // Decrypted bytes already buffered inside the TLS session
        if stream.ssl().pending() > 0 {
            return Ok(true);
        }
        wait_fd(stream.get_ref().as_raw_fd(), libc::POLLIN, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream_mut()?.read(buf)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Wait for `events` on `fd`. Interrupted waits count as "not ready".
fn wait_fd(fd: libc::c_int, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // pollfd lives on the stack for the duration of the call
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}

fn read_file(kind: &'static str, path: &Path) -> ConnectionResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| {
        ConnectionError::Config(ConfigError::UnreadableFile {
            kind,
            path: path.to_path_buf(),
            source,
        })
    })
}

fn load_private_key(
    pem: &[u8],
    passphrase: Option<&str>,
) -> Result<PKey<Private>, openssl::error::ErrorStack> {
    match passphrase {
        Some(passphrase) => PKey::private_key_from_pem_passphrase(pem, passphrase.as_bytes()),
        None => PKey::private_key_from_pem(pem),
    }
}

fn certificate_error(
    kind: &'static str,
    path: &Path,
    source: openssl::error::ErrorStack,
) -> ConnectionError {
    ConnectionError::Certificate {
        kind,
        path: PathBuf::from(path),
        source,
    }
}
