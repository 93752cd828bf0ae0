use crate::error::{Result, SqLinkError};
use crate::framing::{FrameFormat, Framer, Packet};
use log::{debug, info, warn};
use std::time::Duration;

pub type TimerId = u32;

/// Timer armed while a packet is partially received
pub const RECEIVE_TIMER: TimerId = 1;

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Byte pipe to the reader (BLE, USB or audio)
pub trait ReaderTransport {
    fn send_data_to_reader(&mut self, data: &[u8]) -> Result<()>;
}

/// Host scheduling hooks. Expiry is reported back through
/// [`LinkSession::on_timer_expired`].
pub trait TimerApi {
    fn start_timer(&mut self, id: TimerId, timeout: Duration);
    fn stop_timer(&mut self, id: TimerId);
}

/// Packet-level session with one reader.
///
/// Outgoing packets are framed and handed to the transport. Incoming bytes
/// are framed back into packets; a receive timer runs while a packet is
/// partially assembled and abandons it on expiry.
pub struct LinkSession<T: ReaderTransport, M: TimerApi> {
    transport: T,
    timers: M,
    framer: Framer,
    receive_timeout: Duration,
    timer_armed: bool,
    connected: bool,
}

impl<T: ReaderTransport, M: TimerApi> LinkSession<T, M> {
    pub fn new(transport: T, timers: M, format: FrameFormat) -> Self {
        Self {
            transport,
            timers,
            framer: Framer::new(format),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            timer_armed: false,
            connected: true,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timers(&self) -> &M {
        &self.timers
    }

    pub fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if !self.connected {
            return Err(SqLinkError::Transport("reader disconnected".to_string()));
        }
        let framed = packet.encode(self.framer.format())?;
        debug!(
            "Sending {} packet type {} ({} bytes framed)",
            packet.header.tag_str(),
            packet.header.packet_type,
            framed.len()
        );
        self.transport.send_data_to_reader(&framed)
    }

    /// Consume bytes received from the reader and return completed packets.
    pub fn recv_raw_data_from_reader(&mut self, data: &[u8]) -> Vec<Packet> {
        if !self.connected {
            warn!("Ignoring {} bytes received after disconnect", data.len());
            return Vec::new();
        }

        let packets = self.framer.feed(data);
        self.update_receive_timer();
        packets
    }

    /// Receive timeout: give up on the partial packet. Packets that were
    /// hidden behind its header are returned.
    pub fn on_timer_expired(&mut self, id: TimerId) -> Vec<Packet> {
        if id != RECEIVE_TIMER {
            debug!("Ignoring expiry of unknown timer {}", id);
            return Vec::new();
        }
        self.timer_armed = false;
        if self.framer.in_packet() {
            warn!("Receive timeout, abandoning partial packet");
        }
        let packets = self.framer.flush();
        self.update_receive_timer();
        packets
    }

    /// Drop any partial packet and stop accepting data.
    pub fn on_disconnect(&mut self) {
        info!("Reader disconnected");
        self.stop_receive_timer();
        self.framer.reset();
        self.connected = false;
    }

    /// Accept data again after [`LinkSession::on_disconnect`].
    pub fn on_connect(&mut self) {
        info!("Reader connected");
        self.framer.reset();
        self.connected = true;
    }

    fn update_receive_timer(&mut self) {
        if self.framer.in_packet() {
            // restart on every chunk so the timeout measures inactivity
            self.timers.start_timer(RECEIVE_TIMER, self.receive_timeout);
            self.timer_armed = true;
        } else {
            self.stop_receive_timer();
        }
    }

    fn stop_receive_timer(&mut self) {
        if self.timer_armed {
            self.timers.stop_timer(RECEIVE_TIMER);
            self.timer_armed = false;
        }
    }
}
