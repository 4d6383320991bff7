//! Mount client: the link-layer engine and the typed command façade.
//!
//! One background receiver thread owns the read half of the serial port,
//! reassembles delimited blocks, and routes decoded frames either to the
//! pending-ACK table or to event subscribers. Callers issue commands from
//! any thread; each command blocks on its own completion handle until the
//! matching ACK arrives or every retry attempt has been spent.

use crate::error::MountError;
use crate::frame::{self, Frame, MsgIdGen};
use crate::types::{Axis, MountEvent, MountStatus};
use crate::{cobs, serial, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Per-attempt window for the mount to ACK a command.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(2000);
/// Total transmission attempts per command, first send included.
pub const MAX_ATTEMPTS: u32 = 3;
/// Pause between attempts.
pub const RETRY_DELAY: Duration = Duration::from_millis(50);
/// Largest stuffed block the receiver will buffer before declaring the
/// stream garbage and resynchronizing on the next delimiter.
pub const MAX_BLOCK: usize = 256;

const EVENT_QUEUE: usize = 256;

/// A poisoned lock only means some thread panicked while holding it; the
/// tables guarded here are updated atomically per operation and stay
/// coherent, so keep going rather than propagate the panic.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    writer: Mutex<Box<dyn Write + Send>>,
    pending: Mutex<HashMap<u8, Sender<()>>>,
    subscribers: Mutex<Vec<Sender<MountEvent>>>,
    ids: Mutex<MsgIdGen>,
    stop: AtomicBool,
}

impl Shared {
    /// Write one packet. The whole delimited packet goes out under the
    /// lock so concurrent commands and ACKs never interleave on the wire.
    fn write_packet(&self, packet: &[u8]) -> std::io::Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(packet)?;
        writer.flush()
    }

    /// Fire-and-forget acknowledgement of a received frame. ACKs are
    /// never themselves acknowledged.
    fn send_ack(&self, acked_id: u8) {
        let id = lock(&self.ids).next_id();
        let packet = frame::build_packet(frame::CMD_ACK, id, &[acked_id]);
        if let Err(e) = self.write_packet(&packet) {
            log::warn!("failed to send ACK for id {}: {}", acked_id, e);
        }
    }

    /// Fan an event out to every live subscriber. Never called while the
    /// serial write lock is held.
    fn emit(&self, event: MountEvent) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("event queue full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Decode and route one delimited block from the wire.
    fn dispatch_block(&self, block: &[u8]) {
        let raw = match cobs::decode(block) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("dropping unframeable block ({} bytes): {}", block.len(), e);
                return;
            }
        };

        // Runt blocks are line noise, not worth a log line.
        if raw.len() < frame::HEADER_AND_CRC {
            log::trace!("dropping short block: {} bytes", raw.len());
            return;
        }

        let frame = match frame::parse_frame(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("dropping frame: {}", e);
                return;
            }
        };

        if !frame.len_consistent() {
            // Known firmware quirk: some messages carry trailing fields
            // the LEN byte does not advertise. Parse what is actually
            // there, but say so every time.
            log::warn!(
                "frame 0x{:02x} id {} declared LEN {} but carried {} payload bytes; using observed size",
                frame.cmd,
                frame.id,
                frame.declared_len,
                frame.payload.len()
            );
        }

        self.dispatch_frame(frame);
    }

    fn dispatch_frame(&self, frame: Frame) {
        if frame.cmd == frame::CMD_ACK {
            match frame.payload.first() {
                Some(&acked_id) => match lock(&self.pending).remove(&acked_id) {
                    Some(done) => {
                        let _ = done.send(());
                    }
                    None => log::warn!("ACK for unknown id {}", acked_id),
                },
                None => log::warn!("ACK frame without payload (id {})", frame.id),
            }
            return;
        }

        match frame.cmd {
            frame::EVT_STATUS if frame.payload.len() >= 20 => {
                self.emit(MountEvent::Status(parse_status(&frame.payload)));
            }
            frame::EVT_POSITION if frame.payload.len() >= 12 => {
                let p = &frame.payload;
                self.emit(MountEvent::Position {
                    x: i32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                    y: i32::from_le_bytes([p[4], p[5], p[6], p[7]]),
                    z: i32::from_le_bytes([p[8], p[9], p[10], p[11]]),
                });
            }
            frame::EVT_REFLOST => {
                log::warn!("mount reported reference lost");
                self.emit(MountEvent::ReferenceLost);
            }
            cmd => {
                log::debug!(
                    "unhandled frame 0x{:02x} id {} ({} payload bytes)",
                    cmd,
                    frame.id,
                    frame.payload.len()
                );
            }
        }

        // Every validly received non-ACK frame is acknowledged so the
        // firmware can stop retransmitting it.
        self.send_ack(frame.id);
    }

    /// Fail every in-flight command. Dropping the completion handles
    /// wakes the waiters with a disconnect.
    fn fail_pending(&self) {
        lock(&self.pending).clear();
    }
}

fn parse_status(p: &[u8]) -> MountStatus {
    MountStatus {
        temperature_c: f32::from_le_bytes([p[0], p[1], p[2], p[3]]),
        x: i32::from_le_bytes([p[4], p[5], p[6], p[7]]),
        y: i32::from_le_bytes([p[8], p[9], p[10], p[11]]),
        z: i32::from_le_bytes([p[12], p[13], p[14], p[15]]),
        enabled: p[16] != 0,
        paused: p[17] != 0,
        celestial_tracking: p[18] != 0,
        fan_pct: p[19],
    }
}

/// The receiver loop runs in a dedicated thread and owns the read half.
///
/// Bytes accumulate until a `0x00` delimiter closes the block. Read
/// timeouts are swallowed so the loop can poll its stop flag; a block
/// that outgrows `MAX_BLOCK` is discarded wholesale and the loop
/// resynchronizes on the next delimiter.
fn reader_loop<R: Read>(mut reader: R, shared: Arc<Shared>) {
    let mut acc: Vec<u8> = Vec::with_capacity(MAX_BLOCK);
    let mut overflowed = false;
    let mut buf = [0u8; 256];

    log::info!("mount receiver started");

    while !shared.stop.load(Ordering::Relaxed) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            Ok(n) => n,
            Err(e)
                if e.kind() == ErrorKind::TimedOut
                    || e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::Interrupted =>
            {
                continue;
            }
            Err(e) => {
                log::error!("serial read failed, receiver stopping: {}", e);
                break;
            }
        };

        for &b in &buf[..n] {
            if b == 0 {
                if !overflowed && !acc.is_empty() {
                    shared.dispatch_block(&acc);
                }
                acc.clear();
                overflowed = false;
            } else if overflowed {
                // Still inside a garbage run; wait for the delimiter.
            } else {
                acc.push(b);
                if acc.len() > MAX_BLOCK {
                    log::warn!(
                        "no delimiter after {} bytes, discarding buffer",
                        MAX_BLOCK
                    );
                    acc.clear();
                    overflowed = true;
                }
            }
        }
    }

    shared.fail_pending();
    log::info!("mount receiver stopped");
}

/// An opened mount connection.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Exactly one
/// client should own a given serial device at a time.
pub struct MountClient {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl MountClient {
    /// Discover a serial port, open it, and start the receiver.
    pub fn connect() -> Result<MountClient> {
        let port = serial::open_default()?;
        let reader = port.try_clone()?;
        Self::over(reader, port)
    }

    /// Open a specific serial device.
    pub fn open(path: &str) -> Result<MountClient> {
        let port = serial::open_port(path)?;
        let reader = port.try_clone()?;
        Self::over(reader, port)
    }

    /// Build a client over arbitrary stream halves.
    ///
    /// The read half should return `ErrorKind::TimedOut` periodically
    /// rather than blocking forever, so shutdown can complete. This is
    /// the seam tests use to substitute an in-memory firmware double.
    pub fn over<R, W>(reader: R, writer: W) -> Result<MountClient>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            ids: Mutex::new(MsgIdGen::new()),
            stop: AtomicBool::new(false),
        });

        let shared_rx = shared.clone();
        let thread = std::thread::Builder::new()
            .name("altair-rx".into())
            .spawn(move || reader_loop(reader, shared_rx))
            .map_err(|e| {
                MountError::Protocol(format!("failed to spawn receiver thread: {}", e))
            })?;

        Ok(MountClient {
            shared,
            reader: Some(thread),
        })
    }

    /// Register an event subscriber. Every subscriber sees every event,
    /// in wire order; a subscriber that falls `EVENT_QUEUE` events behind
    /// starts losing the newest ones.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = bounded(EVENT_QUEUE);
        lock(&self.shared.subscribers).push(tx);
        EventStream { receiver: rx }
    }

    /// Send a command and wait for its ACK, retrying on timeout.
    ///
    /// The message ID is chosen once and reused across attempts so the
    /// firmware can deduplicate; the completion handle is re-armed per
    /// attempt. An ACK that arrives after its attempt timed out is logged
    /// as unknown and ignored.
    pub fn send_command(
        &self,
        cmd: u8,
        payload: &[u8],
        timeout: Duration,
        attempts: u32,
    ) -> Result<()> {
        if self.shared.stop.load(Ordering::Relaxed) {
            return Err(MountError::Shutdown);
        }

        let id = lock(&self.shared.ids).next_id();
        let packet = frame::build_packet(cmd, id, payload);

        for attempt in 1..=attempts {
            if attempt > 1 {
                std::thread::sleep(RETRY_DELAY);
                log::debug!(
                    "no ACK for 0x{:02x} id {}, attempt {}/{}",
                    cmd,
                    id,
                    attempt,
                    attempts
                );
            }

            let (done, wait) = bounded(1);
            lock(&self.shared.pending).insert(id, done);

            if let Err(e) = self.shared.write_packet(&packet) {
                lock(&self.shared.pending).remove(&id);
                return Err(e.into());
            }

            match wait.recv_timeout(timeout) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {
                    lock(&self.shared.pending).remove(&id);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    lock(&self.shared.pending).remove(&id);
                    return Err(MountError::Shutdown);
                }
            }
        }

        Err(MountError::CommandFailed { cmd, attempts })
    }

    // -- Typed operations --

    /// Fire-and-forget liveness probe; no ACK is awaited.
    pub fn ping(&self) -> Result<()> {
        let id = lock(&self.shared.ids).next_id();
        let packet = frame::build_packet(frame::CMD_PING, id, &[]);
        self.shared.write_packet(&packet)?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.send_command(frame::CMD_STOP, &[], ACK_TIMEOUT, MAX_ATTEMPTS)
    }

    pub fn pause(&self) -> Result<()> {
        self.send_command(frame::CMD_PAUSE, &[], ACK_TIMEOUT, MAX_ATTEMPTS)
    }

    pub fn resume(&self) -> Result<()> {
        self.send_command(frame::CMD_RESUME, &[], ACK_TIMEOUT, MAX_ATTEMPTS)
    }

    /// Ask the mount to report encoder positions; the reply arrives as a
    /// position event.
    pub fn get_positions(&self) -> Result<()> {
        self.send_command(frame::CMD_GET_POSITIONS, &[], ACK_TIMEOUT, MAX_ATTEMPTS)
    }

    /// Slew one axis to an absolute encoder position in arcseconds.
    pub fn move_static(&self, axis: Axis, position_arcsec: i32) -> Result<()> {
        let mut payload = [0u8; 5];
        payload[0] = axis as u8;
        payload[1..5].copy_from_slice(&position_arcsec.to_le_bytes());
        self.send_command(frame::CMD_MOVE_STATIC, &payload, ACK_TIMEOUT, MAX_ATTEMPTS)
    }

    /// Move one axis by a signed delta in arcseconds.
    pub fn move_relative(&self, axis: Axis, delta_arcsec: i32) -> Result<()> {
        let mut payload = [0u8; 5];
        payload[0] = axis as u8;
        payload[1..5].copy_from_slice(&delta_arcsec.to_le_bytes());
        self.send_command(frame::CMD_MOVE_RELATIVE, &payload, ACK_TIMEOUT, MAX_ATTEMPTS)
    }

    /// Drive all three axes at constant rates in arcseconds per second.
    pub fn move_linear(&self, x_rate: f32, y_rate: f32, z_rate: f32) -> Result<()> {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&x_rate.to_le_bytes());
        payload[4..8].copy_from_slice(&y_rate.to_le_bytes());
        payload[8..12].copy_from_slice(&z_rate.to_le_bytes());
        self.send_command(frame::CMD_MOVE_LINEAR, &payload, ACK_TIMEOUT, MAX_ATTEMPTS)
    }

    /// Start firmware-side celestial tracking.
    ///
    /// `matrix` is the row-major 3x3 sky-to-mount rotation; `ref_time` is
    /// the Unix epoch second the matrix was anchored at. 56-byte payload:
    /// RA, Dec, nine matrix cells, reference time, latitude.
    pub fn track_celestial(
        &self,
        ra_hours: f32,
        dec_degrees: f32,
        matrix: &[f32],
        ref_time_unix: u64,
        latitude_deg: f32,
    ) -> Result<()> {
        if matrix.len() != 9 {
            return Err(MountError::InvalidArgument(format!(
                "rotation matrix must have 9 elements, got {}",
                matrix.len()
            )));
        }

        let mut payload = Vec::with_capacity(56);
        payload.extend_from_slice(&ra_hours.to_le_bytes());
        payload.extend_from_slice(&dec_degrees.to_le_bytes());
        for cell in matrix {
            payload.extend_from_slice(&cell.to_le_bytes());
        }
        payload.extend_from_slice(&ref_time_unix.to_le_bytes());
        payload.extend_from_slice(&latitude_deg.to_le_bytes());

        self.send_command(
            frame::CMD_TRACK_CELESTIAL,
            &payload,
            ACK_TIMEOUT,
            MAX_ATTEMPTS,
        )
    }

    /// Stop the receiver and close the connection.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.reader.take() {
            let _ = thread.join();
        }
        self.shared.fail_pending();
    }
}

impl Drop for MountClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to the mount's event feed.
///
/// Obtained from [`MountClient::subscribe`]; dropping it unsubscribes.
pub struct EventStream {
    receiver: Receiver<MountEvent>,
}

impl EventStream {
    /// Receive the next event (blocks until available).
    pub fn recv(&self) -> Result<MountEvent> {
        self.receiver
            .recv()
            .map_err(|_| MountError::StreamDisconnected)
    }

    /// Receive an event without blocking.
    pub fn try_recv(&self) -> Option<MountEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive an event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<MountEvent> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => MountError::Timeout,
            RecvTimeoutError::Disconnected => MountError::StreamDisconnected,
        })
    }
}

/// In-memory byte pipes standing in for the serial port, shared by the
/// engine and tracker tests.
#[cfg(test)]
pub(crate) mod testpipe {
    use super::*;
    use crate::frame::{build_packet, parse_frame, Frame};
    use crossbeam_channel::unbounded;
    use std::time::Instant;

    pub type ByteTx = Sender<u8>;
    pub type ByteRx = Receiver<u8>;

    /// Read half of an in-memory pipe. Times out like a serial port so
    /// the receiver loop keeps polling its stop flag.
    pub struct PipeReader {
        pub rx: ByteRx,
    }

    impl Read for PipeReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.rx.recv_timeout(Duration::from_millis(20)) {
                Ok(b) => {
                    buf[0] = b;
                    let mut n = 1;
                    while n < buf.len() {
                        match self.rx.try_recv() {
                            Ok(b) => {
                                buf[n] = b;
                                n += 1;
                            }
                            Err(_) => break,
                        }
                    }
                    Ok(n)
                }
                Err(RecvTimeoutError::Timeout) => Err(std::io::Error::new(
                    ErrorKind::TimedOut,
                    "pipe read timeout",
                )),
                Err(RecvTimeoutError::Disconnected) => Ok(0),
            }
        }
    }

    pub struct PipeWriter {
        pub tx: ByteTx,
    }

    impl Write for PipeWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            for &b in buf {
                let _ = self.tx.send(b);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Client wired to an in-memory firmware double. Returns the client,
    /// the firmware's transmit handle, and its receive handle.
    pub fn pipes() -> (MountClient, ByteTx, ByteRx) {
        let (host_tx, fw_rx) = unbounded();
        let (fw_tx, host_rx) = unbounded();
        let client =
            MountClient::over(PipeReader { rx: host_rx }, PipeWriter { tx: host_tx }).unwrap();
        (client, fw_tx, fw_rx)
    }

    /// Collect one delimited packet the client wrote and parse it.
    pub fn recv_frame(rx: &ByteRx, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut block = Vec::new();
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match rx.recv_timeout(remaining) {
                Ok(0) => {
                    if block.is_empty() {
                        continue;
                    }
                    let raw = cobs::decode(&block).expect("client wrote invalid COBS");
                    return Some(parse_frame(&raw).expect("client wrote invalid frame"));
                }
                Ok(b) => block.push(b),
                Err(_) => return None,
            }
        }
    }

    pub fn send_packet(tx: &ByteTx, cmd: u8, id: u8, payload: &[u8]) {
        for b in build_packet(cmd, id, payload) {
            tx.send(b).unwrap();
        }
    }

    pub fn send_bytes(tx: &ByteTx, bytes: &[u8]) {
        for &b in bytes {
            tx.send(b).unwrap();
        }
    }
}
