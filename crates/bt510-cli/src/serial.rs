//! Async adapter for the dongle's serial port
//!
//! The `serialport` crate is blocking, so two pump threads sit between the
//! port and the async transport: one forwards reads into a channel-backed
//! `AsyncRead`, the other drains a channel-backed `AsyncWrite` into the
//! port. Read timeouts just re-arm the loop; they keep the pump responsive
//! to shutdown without treating silence as an error.

use std::io::{Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serialport::SerialPort;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Open the port and return async reader/writer halves.
pub fn open(port_name: &str, baud_rate: u32) -> Result<(SerialReader, SerialWriter)> {
    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(500));
    // Some USB serial adapters need explicit settings.
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let port = builder
        .open()
        .with_context(|| format!("failed to open serial port {port_name}"))?;
    let writer_port = port
        .try_clone()
        .context("failed to clone the serial port for writing")?;

    let (read_tx, read_rx) = mpsc::unbounded_channel();
    let (write_tx, write_rx) = mpsc::unbounded_channel();

    std::thread::Builder::new()
        .name("serial-read".to_string())
        .spawn(move || read_pump(port, read_tx))
        .context("failed to spawn the serial read thread")?;
    std::thread::Builder::new()
        .name("serial-write".to_string())
        .spawn(move || write_pump(writer_port, write_rx))
        .context("failed to spawn the serial write thread")?;

    Ok((
        SerialReader {
            rx: read_rx,
            pending: Vec::new(),
        },
        SerialWriter { tx: write_tx },
    ))
}

fn read_pump(mut port: Box<dyn SerialPort>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; 512];
    loop {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(err) => {
                warn!("serial read failed: {err}");
                break;
            }
        }
    }
    debug!("serial read pump stopped");
}

fn write_pump(mut port: Box<dyn SerialPort>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = rx.blocking_recv() {
        if let Err(err) = port.write_all(&chunk).and_then(|_| port.flush()) {
            warn!("serial write failed: {err}");
            break;
        }
    }
    debug!("serial write pump stopped");
}

// ----------------------------------------------------------------------------
// Async Halves
// ----------------------------------------------------------------------------

/// Read half: bytes pumped off the blocking port.
pub struct SerialReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl AsyncRead for SerialReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                buf.put_slice(&self.pending[..n]);
                self.pending.drain(..n);
                return Poll::Ready(Ok(()));
            }
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.pending = chunk,
                // Pump thread gone: surface EOF.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Write half: bytes queued for the blocking port.
pub struct SerialWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl AsyncWrite for SerialWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.tx.send(data.to_vec()) {
            Ok(()) => Poll::Ready(Ok(data.len())),
            Err(_) => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "serial write pump stopped",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
