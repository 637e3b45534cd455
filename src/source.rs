use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use crossbeam::channel::{Receiver, TryRecvError};

use crate::error::TransportError;

/// Non-blocking byte producer polled once per tick
pub trait ByteSource {
    /// Everything that has arrived since the last call; empty when idle.
    /// Must never wait for more data.
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Release the underlying transport
    fn close(&mut self);

    /// True once a finite source (file, closed channel) has nothing left
    fn is_exhausted(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        (**self).read_available()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_exhausted(&self) -> bool {
        (**self).is_exhausted()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

// ─── Serial port ─────────────────────────────────────────────────────────────

pub const DEFAULT_BAUD_RATE: u32 = 9600;

pub struct SerialSource {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialSource {
    /// Open the port. Failure here is the one fatal transport error.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| TransportError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;

        log::info!("Opened serial port {} at {} baud", port_name, baud_rate);

        Ok(SerialSource {
            port_name: port_name.to_string(),
            baud_rate,
            port: Some(port),
        })
    }
}

impl ByteSource for SerialSource {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;

        let pending = port
            .bytes_to_read()
            .map_err(|e| TransportError::Serial(e.to_string()))? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(TransportError::Read(e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed serial port {}", self.port_name);
        }
    }

    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.port_name, self.baud_rate)
    }
}

// ─── In-process channel ──────────────────────────────────────────────────────

/// Chunks pushed from another thread (stdin bridge, tests)
pub struct ChannelSource {
    rx: Option<Receiver<Vec<u8>>>,
    disconnected: bool,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx: Some(rx), disconnected: false }
    }
}

impl ByteSource for ChannelSource {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let rx = self.rx.as_ref().ok_or(TransportError::Closed)?;
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        Ok(out)
    }

    fn close(&mut self) {
        self.rx = None;
    }

    fn is_exhausted(&self) -> bool {
        self.disconnected
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}

// ─── Reader (capture replay) ─────────────────────────────────────────────────

/// Reads a bounded chunk per tick from any `Read`, e.g. a capture file
pub struct ReaderSource<R: Read> {
    reader: Option<R>,
    chunk_size: usize,
    label: String,
    eof: bool,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R, chunk_size: usize, label: &str) -> Self {
        Self {
            reader: Some(reader),
            chunk_size: chunk_size.max(1),
            label: label.to_string(),
            eof: false,
        }
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.eof {
            return Ok(Vec::new());
        }
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; self.chunk_size];
        let n = reader.read(&mut buf)?;
        if n == 0 {
            self.eof = true;
        }
        buf.truncate(n);
        Ok(buf)
    }

    fn close(&mut self) {
        self.reader = None;
    }

    fn is_exhausted(&self) -> bool {
        self.eof
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

// ─── Capture tee ─────────────────────────────────────────────────────────────

/// Wraps a source and records every byte it yields, for later replay
pub struct CaptureSource<S: ByteSource> {
    inner: S,
    writer: Option<BufWriter<File>>,
    captured_bytes: u64,
}

impl<S: ByteSource> CaptureSource<S> {
    pub fn create(inner: S, path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        log::info!("Capturing raw stream to {}", path.display());
        Ok(Self {
            inner,
            writer: Some(BufWriter::new(file)),
            captured_bytes: 0,
        })
    }

    pub fn captured_bytes(&self) -> u64 {
        self.captured_bytes
    }
}

impl<S: ByteSource> ByteSource for CaptureSource<S> {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let data = self.inner.read_available()?;
        if !data.is_empty() {
            if let Some(writer) = self.writer.as_mut() {
                // A failing capture must not take the live stream down
                if let Err(e) = writer.write_all(&data) {
                    log::warn!("Capture write failed, disabling capture: {}", e);
                    self.writer = None;
                } else {
                    self.captured_bytes += data.len() as u64;
                }
            }
        }
        Ok(data)
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                log::warn!("Capture flush failed: {}", e);
            }
        }
        self.inner.close();
    }

    fn is_exhausted(&self) -> bool {
        self.inner.is_exhausted()
    }

    fn describe(&self) -> String {
        format!("{} (capturing)", self.inner.describe())
    }
}
