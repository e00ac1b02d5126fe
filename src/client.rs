//! TCP stream client for M-series sensors
//!
//! Owns the connection to the sensor, reassembles complete packets from the
//! byte stream and publishes each one to subscribers. Framing is driven by
//! the packet header's size field; with failover enabled, a buffer whose
//! leading bytes lack the magic signature is completed to the fixed legacy
//! size and published unframed.
//!
//! The read loop is meant to run on its own thread; [`StreamClient::stop`]
//! may be called from any other thread and wakes the blocking read by
//! shutting the socket down.

use crate::error::{Error, Result};
use crate::protocol::{FAILOVER_PACKET_SIZE, HEADER_SIZE, MAX_PACKET_SIZE, PacketHeader, SIGNATURE};
use crate::signal::{Signal, Subscription};
use parking_lot::Mutex;
use std::io::Read;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// First delay after a lost connection
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Reconnect delays double up to this cap
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Streaming TCP client publishing raw packet buffers
pub struct StreamClient {
    host: String,
    port: u16,
    failover: bool,
    read_timeout: Option<Duration>,
    running: AtomicBool,
    /// Cloned handle of the live socket, kept so `stop()` can wake the read
    shutdown_handle: Mutex<Option<TcpStream>>,
    /// Socket opened by `connect()` awaiting `run()`
    pending: Mutex<Option<TcpStream>>,
    packet_signal: Signal<Vec<u8>>,
    packet_count: AtomicU64,
}

impl StreamClient {
    /// Create a client for the sensor at `host:port`. Failover framing is
    /// accepted by default; reads have no deadline.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            failover: true,
            read_timeout: None,
            running: AtomicBool::new(false),
            shutdown_handle: Mutex::new(None),
            pending: Mutex::new(None),
            packet_signal: Signal::new(),
            packet_count: AtomicU64::new(0),
        }
    }

    /// Whether header-less legacy buffers are accepted (default true).
    /// When disabled, a bad signature drops the connection instead.
    pub fn set_failover(&mut self, failover: bool) {
        self.failover = failover;
    }

    /// Deadline for socket reads; `None` (the default) blocks indefinitely.
    /// An expired deadline is treated like any other read error: the client
    /// reconnects.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Register a sink receiving every complete raw packet buffer
    pub fn subscribe<F>(&self, sink: F) -> Subscription
    where
        F: Fn(&Vec<u8>) + Send + Sync + 'static,
    {
        self.packet_signal.connect(sink)
    }

    /// Number of packets published so far
    pub fn packets_received(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Establish the connection ahead of [`run`](Self::run)
    pub fn connect(&self) -> Result<()> {
        let stream = self.open_stream()?;
        *self.pending.lock() = Some(stream);
        Ok(())
    }

    /// Blocking read loop.
    ///
    /// Fails if no connection can be established at all; once streaming,
    /// read errors and framing sanity failures drop the connection and
    /// reconnect with bounded backoff until [`stop`](Self::stop) is called.
    pub fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let mut stream = match self.pending.lock().take() {
            Some(stream) => stream,
            None => self.open_stream()?,
        };

        let mut backoff = INITIAL_BACKOFF;
        let mut buffer: Vec<u8> = Vec::with_capacity(MAX_PACKET_SIZE);

        loop {
            match self.read_loop(&mut stream, &mut buffer) {
                Ok(()) => break,
                Err(e) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    log::warn!("Stream error: {e}; reconnecting");
                }
            }

            loop {
                thread::sleep(backoff);
                if !self.running.load(Ordering::Relaxed) {
                    return Ok(());
                }
                match self.open_stream() {
                    Ok(reconnected) => {
                        stream = reconnected;
                        backoff = INITIAL_BACKOFF;
                        break;
                    }
                    Err(e) => {
                        log::warn!("Reconnect failed: {e}");
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        *self.shutdown_handle.lock() = None;
        log::info!(
            "Stream client stopped after {} packets",
            self.packet_count.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Request termination; safe to call from any thread, idempotent
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.shutdown_handle.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn open_stream(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_nodelay(true)?;
        *self.shutdown_handle.lock() = Some(stream.try_clone()?);
        log::info!("Connected to sensor at {}:{}", self.host, self.port);
        Ok(stream)
    }

    /// Read framed packets until stopped or the connection fails
    fn read_loop(&self, stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE];

        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = stream.read_exact(&mut header) {
                if !self.running.load(Ordering::Relaxed) {
                    return Ok(());
                }
                return Err(e.into());
            }

            let parsed = PacketHeader::from_bytes(&header);
            if parsed.signature == SIGNATURE {
                let total = parsed.size as usize;
                if !(HEADER_SIZE..=MAX_PACKET_SIZE).contains(&total) {
                    return Err(Error::MalformedPacket(format!(
                        "implausible packet size {total}"
                    )));
                }
                buffer.clear();
                buffer.resize(total, 0);
            } else if self.failover {
                // Legacy stream: the bytes just consumed are the head of a
                // fixed-size header-less buffer
                buffer.clear();
                buffer.resize(FAILOVER_PACKET_SIZE, 0);
            } else {
                return Err(Error::MalformedPacket(format!(
                    "bad signature {:#010x}",
                    parsed.signature
                )));
            }

            buffer[..HEADER_SIZE].copy_from_slice(&header);
            stream.read_exact(&mut buffer[HEADER_SIZE..])?;
            self.publish(buffer);
        }

        Ok(())
    }

    fn publish(&self, buffer: &Vec<u8>) {
        let count = self.packet_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 1000 == 0 {
            log::debug!("Received {count} packets");
        }
        self.packet_signal.emit(buffer);
    }
}
