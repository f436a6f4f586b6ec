//! Serial link to the controller board.
//!
//! Protocol framing:
//! - Baud: 115200, 8N1, NO flow control
//! - Command terminator: LF (\n)
//! - Response terminator: CR+LF (Arduino `println`), trimmed on receipt
//!
//! The stream is split in two. Writes go through a mutex-guarded write half on the
//! caller's task. A reader task owns the read half, frames lines and queues them; the
//! [`Inbound`] half of the link drains that queue and calls the [`LineHandler`] for
//! every line, in order, on its own task.
//!
//! Discarding input bumps an epoch published on a watch channel. The reader wakes on the
//! change, drops the bytes it holds at that moment (including the rest of a torn line), and
//! the dispatcher skips lines that were queued under an older epoch. Lines that start after
//! the discard are delivered.

use super::{LineHandler, Link};
use crate::error::BenchResult;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[cfg(feature = "serial")]
use crate::config::LinkSettings;

/// Any byte stream a [`SerialLink`] can run over.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Boxed stream owned by a [`SerialLink`].
pub type DynSerial = Box<dyn SerialPortIO>;

/// A line tagged with the discard epoch it was read under.
type QueuedLine = (u64, String);

/// Outbound half of a serial connection.
pub struct SerialLink {
    name: String,
    writer: Mutex<WriteHalf<DynSerial>>,
    line_terminator: String,
    epoch: watch::Sender<u64>,
    shutdown: watch::Sender<bool>,
}

/// Inbound half of a serial connection: the queue of received lines.
pub struct Inbound {
    lines: mpsc::UnboundedReceiver<QueuedLine>,
    epoch: watch::Receiver<u64>,
}

impl SerialLink {
    /// Wrap an open byte stream and start its reader task.
    ///
    /// Must be called from within a Tokio runtime. Lines received before a handler is
    /// attached to the returned [`Inbound`] are queued, not lost.
    pub fn new(
        name: impl Into<String>,
        io: DynSerial,
        line_terminator: impl Into<String>,
    ) -> (Self, Inbound) {
        let name = name.into();
        let (read_half, write_half) = tokio::io::split(io);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (epoch, epoch_rx) = watch::channel(0u64);

        tokio::spawn(read_lines(
            name.clone(),
            BufReader::new(read_half),
            tx,
            epoch.subscribe(),
            shutdown_rx,
        ));

        let link = Self {
            name,
            writer: Mutex::new(write_half),
            line_terminator: line_terminator.into(),
            epoch,
            shutdown,
        };
        (
            link,
            Inbound {
                lines: rx,
                epoch: epoch_rx,
            },
        )
    }

    /// Open the configured serial port.
    #[cfg(feature = "serial")]
    pub async fn open(settings: &LinkSettings) -> BenchResult<(Self, Inbound)> {
        use tokio::task::spawn_blocking;
        use tokio_serial::{SerialPort, SerialPortBuilderExt};

        let port_path = settings.port.clone();
        let baud_rate = settings.baud_rate;

        // Use spawn_blocking to avoid blocking the async runtime
        let port = spawn_blocking(move || {
            let port = tokio_serial::new(&port_path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .with_context(|| format!("Failed to open serial port: {port_path}"))?;
            port.clear(tokio_serial::ClearBuffer::All)
                .context("Failed to clear serial buffers")?;
            anyhow::Ok(port)
        })
        .await
        .context("spawn_blocking for serial port opening failed")??;

        debug!(port = %settings.port, baud_rate, "Serial port opened");
        Ok(Self::new(
            format!("{} @ {} baud", settings.port, baud_rate),
            Box::new(port),
            settings.line_terminator.clone(),
        ))
    }

    #[cfg(not(feature = "serial"))]
    pub async fn open(_settings: &crate::config::LinkSettings) -> BenchResult<(Self, Inbound)> {
        Err(crate::error::BenchError::SerialFeatureDisabled)
    }

    /// Stop the reader task. Queued lines are still delivered.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn send(&self, line: &str) -> BenchResult<()> {
        let framed = format!("{line}{}", self.line_terminator);
        let mut writer = self.writer.lock().await;
        writer
            .write_all(framed.as_bytes())
            .await
            .with_context(|| format!("Failed to write '{line}' to {}", self.name))?;
        writer.flush().await.context("Serial flush failed")?;
        debug!(port = %self.name, command = line, "Sent command");
        Ok(())
    }

    async fn discard_input(&self) -> BenchResult<()> {
        self.epoch.send_modify(|epoch| *epoch += 1);
        let epoch = *self.epoch.borrow();
        trace!(port = %self.name, epoch, "Discarding buffered input");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("SerialLink({})", self.name)
    }
}

impl Inbound {
    /// Deliver every received line to `handler` on a new task.
    pub fn spawn_dispatch(self, handler: Arc<dyn LineHandler>) -> JoinHandle<()> {
        tokio::spawn(self.dispatch(handler))
    }

    /// Deliver every received line to `handler` until the link closes.
    pub async fn dispatch(mut self, handler: Arc<dyn LineHandler>) {
        while let Some((epoch, line)) = self.lines.recv().await {
            if epoch < *self.epoch.borrow() {
                trace!(line, "Dropping line received before discard");
                continue;
            }
            handler.on_line(line).await;
        }
        debug!("Link receiver closed");
    }
}

async fn read_lines(
    name: String,
    mut reader: BufReader<ReadHalf<DynSerial>>,
    tx: mpsc::UnboundedSender<QueuedLine>,
    mut epoch: watch::Receiver<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending = Vec::new();
    let mut seen = *epoch.borrow_and_update();
    // The next completed line began before the last discard.
    let mut torn = false;

    loop {
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            changed = epoch.changed() => {
                if changed.is_err() {
                    break;
                }
                seen = *epoch.borrow_and_update();
                let buffered = reader.buffer();
                let held = buffered.len();
                torn = match buffered.last() {
                    Some(&last) => last != b'\n',
                    None => !pending.is_empty(),
                };
                let dropped = held + pending.len();
                reader.consume(held);
                pending.clear();
                trace!(port = %name, epoch = seen, dropped, torn, "Dropped buffered input");
                continue;
            }
            read = reader.read_until(b'\n', &mut pending) => read,
        };

        match read {
            Ok(0) => {
                debug!(port = %name, "Serial stream reached EOF");
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&pending).trim().to_string();
                pending.clear();
                if std::mem::take(&mut torn) {
                    trace!(port = %name, line, "Dropping tail of a discarded line");
                    continue;
                }
                if line.is_empty() {
                    continue;
                }
                trace!(port = %name, line, "Received line");
                if tx.send((seen, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(port = %name, error = %e, "Serial read failed");
                break;
            }
        }
    }
}

/// Describe every serial port the OS reports.
#[cfg(feature = "serial")]
pub fn available_ports() -> BenchResult<Vec<String>> {
    use tokio_serial::SerialPortType;

    let ports = tokio_serial::available_ports()
        .map_err(|e| crate::error::BenchError::Link(format!("Failed to enumerate ports: {e}")))?;

    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "{}  USB {:04x}:{:04x} {} {}",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.manufacturer.as_deref().unwrap_or(""),
                usb.product.as_deref().unwrap_or(""),
            )
            .trim_end()
            .to_string(),
            SerialPortType::PciPort => format!("{}  PCI", port.port_name),
            SerialPortType::BluetoothPort => format!("{}  Bluetooth", port.port_name),
            SerialPortType::Unknown => port.port_name,
        })
        .collect())
}

#[cfg(not(feature = "serial"))]
pub fn available_ports() -> BenchResult<Vec<String>> {
    Err(crate::error::BenchError::SerialFeatureDisabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn send_appends_terminator() {
        let (mut host, device) = tokio::io::duplex(64);
        let (link, _inbound) = SerialLink::new("test", Box::new(device), "\n");

        link.send("PR+kp=1.5").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = host.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PR+kp=1.5\n");
    }

    #[tokio::test]
    async fn describe_names_the_port() {
        let (_host, device) = tokio::io::duplex(64);
        let (link, _inbound) = SerialLink::new("COM9 @ 115200 baud", Box::new(device), "\n");
        assert!(link.describe().contains("COM9"));
    }
}
