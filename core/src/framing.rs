use crate::error::{Result, SqLinkError};
use crate::{
    CRC_LENGTH, DEFAULT_MAX_PAYLOAD_LEN, PACKET_HEADER_TAG_LENGTH, READER_ID_LENGTH, TAG_SQUAREM1,
    TAG_SQUARER6,
};
use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;

/// CRC-32 (zlib polynomial) over a packet's header and payload
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Wire width of the packed `packet_type` enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTypeWidth {
    U8,
    U16,
    U32,
}

impl PacketTypeWidth {
    pub fn bytes(&self) -> usize {
        match self {
            PacketTypeWidth::U8 => 1,
            PacketTypeWidth::U16 => 2,
            PacketTypeWidth::U32 => 4,
        }
    }

    fn max_value(&self) -> u32 {
        match self {
            PacketTypeWidth::U8 => u8::MAX as u32,
            PacketTypeWidth::U16 => u16::MAX as u32,
            PacketTypeWidth::U32 => u32::MAX,
        }
    }

    fn read(&self, bytes: &[u8]) -> u32 {
        bytes[..self.bytes()]
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32)
    }

    fn write(&self, value: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_le_bytes()[..self.bytes()]);
    }
}

/// Packet type code. The set of types is owned by the feature layer, so any
/// value that fits the configured wire width is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub u32);

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Wire-format parameters shared by encoder and framer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    pub packet_type_width: PacketTypeWidth,
    pub max_payload_len: u16,
    /// Accepted packet-header tags
    pub tags: Vec<[u8; PACKET_HEADER_TAG_LENGTH]>,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            packet_type_width: PacketTypeWidth::U8,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            tags: vec![TAG_SQUAREM1, TAG_SQUARER6],
        }
    }
}

impl FrameFormat {
    /// tag + reader id + 2 revision bytes + packet type + payload size
    pub fn header_len(&self) -> usize {
        PACKET_HEADER_TAG_LENGTH + READER_ID_LENGTH + 2 + self.packet_type_width.bytes() + 2
    }

    /// Total bytes on the wire for a payload of `payload_len` bytes
    pub fn framed_len(&self, payload_len: usize) -> usize {
        self.header_len() + payload_len + CRC_LENGTH
    }

    pub fn accepts_tag(&self, tag: &[u8]) -> bool {
        self.tags.iter().any(|t| t[..] == *tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// ASCII product family tag, e.g. "SQUAREM1"
    pub tag: [u8; PACKET_HEADER_TAG_LENGTH],
    /// UUID programmed into the reader at manufacture
    pub reader_id: [u8; READER_ID_LENGTH],
    /// A=0, B=1 ...
    pub hw_major_rev: u8,
    pub hw_minor_rev: u8,
    pub packet_type: PacketType,
    pub payload_size: u16,
}

impl PacketHeader {
    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }

    /// Major revision as the letter printed on the board
    pub fn hw_major_rev_letter(&self) -> char {
        if self.hw_major_rev < 26 {
            (b'A' + self.hw_major_rev) as char
        } else {
            '?'
        }
    }

    pub fn encode_into(&self, format: &FrameFormat, out: &mut Vec<u8>) -> Result<()> {
        if self.packet_type.0 > format.packet_type_width.max_value() {
            return Err(SqLinkError::HeaderInvalid(format!(
                "packet type {} does not fit {} byte(s)",
                self.packet_type,
                format.packet_type_width.bytes()
            )));
        }

        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.reader_id);
        out.push(self.hw_major_rev);
        out.push(self.hw_minor_rev);
        format.packet_type_width.write(self.packet_type.0, out);
        out.extend_from_slice(&self.payload_size.to_le_bytes());
        Ok(())
    }

    /// Parse and validate a complete header.
    pub fn parse(data: &[u8], format: &FrameFormat) -> Result<Self> {
        let header_len = format.header_len();
        if data.len() < header_len {
            return Err(SqLinkError::Truncated);
        }

        let mut tag = [0u8; PACKET_HEADER_TAG_LENGTH];
        tag.copy_from_slice(&data[..PACKET_HEADER_TAG_LENGTH]);
        if !format.accepts_tag(&tag) {
            return Err(SqLinkError::HeaderInvalid(format!(
                "unknown tag {:?}",
                String::from_utf8_lossy(&tag)
            )));
        }

        let mut offset = PACKET_HEADER_TAG_LENGTH;
        let mut reader_id = [0u8; READER_ID_LENGTH];
        reader_id.copy_from_slice(&data[offset..offset + READER_ID_LENGTH]);
        offset += READER_ID_LENGTH;

        let hw_major_rev = data[offset];
        let hw_minor_rev = data[offset + 1];
        offset += 2;

        let packet_type = PacketType(format.packet_type_width.read(&data[offset..]));
        offset += format.packet_type_width.bytes();

        let payload_size = u16::from_le_bytes([data[offset], data[offset + 1]]);
        if payload_size > format.max_payload_len {
            return Err(SqLinkError::PayloadTooLarge {
                size: payload_size as usize,
                max: format.max_payload_len as usize,
            });
        }

        Ok(Self {
            tag,
            reader_id,
            hw_major_rev,
            hw_minor_rev,
            packet_type,
            payload_size,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(
        tag: [u8; PACKET_HEADER_TAG_LENGTH],
        reader_id: [u8; READER_ID_LENGTH],
        packet_type: PacketType,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let payload_size = u16::try_from(payload.len()).map_err(|_| SqLinkError::PayloadTooLarge {
            size: payload.len(),
            max: u16::MAX as usize,
        })?;

        Ok(Self {
            header: PacketHeader {
                tag,
                reader_id,
                hw_major_rev: 0,
                hw_minor_rev: 0,
                packet_type,
                payload_size,
            },
            payload,
        })
    }

    pub fn with_hw_rev(mut self, major: u8, minor: u8) -> Self {
        self.header.hw_major_rev = major;
        self.header.hw_minor_rev = minor;
        self
    }

    /// Frame the packet: header, payload, little-endian CRC-32 trailer.
    pub fn encode(&self, format: &FrameFormat) -> Result<Vec<u8>> {
        if self.payload.len() > format.max_payload_len as usize {
            return Err(SqLinkError::PayloadTooLarge {
                size: self.payload.len(),
                max: format.max_payload_len as usize,
            });
        }
        if self.header.payload_size as usize != self.payload.len() {
            return Err(SqLinkError::HeaderInvalid(format!(
                "payload_size {} but payload has {} bytes",
                self.header.payload_size,
                self.payload.len()
            )));
        }

        let mut encoded = Vec::with_capacity(format.framed_len(self.payload.len()));
        self.header.encode_into(format, &mut encoded)?;
        encoded.extend_from_slice(&self.payload);

        let crc = crc32(&encoded);
        encoded.extend_from_slice(&crc.to_le_bytes());

        Ok(encoded)
    }

    /// Parse one complete framed packet starting at `data[0]`.
    /// Trailing bytes after the CRC are ignored.
    pub fn decode(data: &[u8], format: &FrameFormat) -> Result<Self> {
        let header = PacketHeader::parse(data, format)?;
        let payload_start = format.header_len();
        let payload_end = payload_start + header.payload_size as usize;

        if data.len() < payload_end + CRC_LENGTH {
            return Err(SqLinkError::Truncated);
        }

        let received = read_crc(&data[payload_end..payload_end + CRC_LENGTH]);
        let computed = crc32(&data[..payload_end]);
        if received != computed {
            return Err(SqLinkError::BadCrc { received, computed });
        }

        Ok(Self {
            header,
            payload: data[payload_start..payload_end].to_vec(),
        })
    }
}

fn read_crc(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    SeekingHeader,
    ReadingHeader,
    ReadingPayload,
    ReadingCrc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub packets: usize,
    pub crc_errors: usize,
    pub header_errors: usize,
    /// Bytes dropped while searching for a tag
    pub discarded_bytes: usize,
}

/// Incremental SqLink packet assembler.
///
/// Bytes must be pushed in arrival order. When a header or CRC check fails,
/// the bytes buffered after the failed tag start are scanned again, so a
/// packet hidden behind a corrupted header is still recovered.
pub struct Framer {
    format: FrameFormat,
    state: FramerState,
    window: [u8; PACKET_HEADER_TAG_LENGTH],
    window_len: usize,
    buf: Vec<u8>,
    header: Option<PacketHeader>,
    payload_end: usize,
    stats: FramerStats,
}

impl Framer {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            state: FramerState::SeekingHeader,
            window: [0u8; PACKET_HEADER_TAG_LENGTH],
            window_len: 0,
            buf: Vec::new(),
            header: None,
            payload_end: 0,
            stats: FramerStats::default(),
        }
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    pub fn format(&self) -> &FrameFormat {
        &self.format
    }

    pub fn stats(&self) -> &FramerStats {
        &self.stats
    }

    /// True once a tag has been matched and the packet is not yet complete
    pub fn in_packet(&self) -> bool {
        self.state != FramerState::SeekingHeader
    }

    /// Abandon any partially received packet.
    pub fn reset(&mut self) {
        if self.in_packet() {
            debug!("Abandoning partial packet ({} bytes buffered)", self.buf.len());
        }
        self.clear();
    }

    fn clear(&mut self) {
        self.state = FramerState::SeekingHeader;
        self.window_len = 0;
        self.buf.clear();
        self.header = None;
        self.payload_end = 0;
    }

    /// Push one byte.
    ///
    /// Returns every packet completed and every framing error hit while
    /// consuming it, in stream order. Usually that is nothing; a failure can
    /// be followed by packets recovered from the rescanned bytes.
    pub fn push(&mut self, byte: u8) -> Vec<Result<Packet>> {
        let mut outcomes = Vec::new();
        self.run(vec![byte], &mut outcomes);
        outcomes
    }

    /// Push a run of bytes, returning every packet completed.
    /// Framing errors are logged and counted in [`FramerStats`].
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Packet> {
        let mut outcomes = Vec::new();
        self.run(bytes.to_vec(), &mut outcomes);
        Self::keep_packets(outcomes)
    }

    /// Give up on the partial packet and rescan its bytes for later tags.
    ///
    /// Used when no more bytes are coming for the current packet, e.g. after
    /// a receive timeout. Returns packets found in the rescanned bytes.
    pub fn flush(&mut self) -> Vec<Packet> {
        if !self.in_packet() {
            return Vec::new();
        }
        debug!("Flushing partial packet ({} bytes buffered)", self.buf.len());
        let rescan = self.abandon();
        let mut outcomes = Vec::new();
        self.run(rescan, &mut outcomes);
        Self::keep_packets(outcomes)
    }

    fn keep_packets(outcomes: Vec<Result<Packet>>) -> Vec<Packet> {
        outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(packet) => Some(packet),
                Err(e) => {
                    warn!("Dropping SqLink packet: {}", e);
                    None
                }
            })
            .collect()
    }

    fn run(&mut self, bytes: Vec<u8>, outcomes: &mut Vec<Result<Packet>>) {
        let mut pending = VecDeque::from(bytes);
        while let Some(byte) = pending.pop_front() {
            match self.step(byte) {
                Ok(Some(packet)) => outcomes.push(Ok(packet)),
                Ok(None) => {}
                Err(e) => {
                    // rescanned bytes come before anything not yet consumed
                    let mut rescan = VecDeque::from(self.abandon());
                    rescan.append(&mut pending);
                    pending = rescan;
                    outcomes.push(Err(e));
                }
            }
        }
    }

    /// Reset to seeking and hand back the bytes after the failed tag start.
    fn abandon(&mut self) -> Vec<u8> {
        let rescan = self.buf.get(1..).map(<[u8]>::to_vec).unwrap_or_default();
        self.reset();
        rescan
    }

    fn step(&mut self, byte: u8) -> Result<Option<Packet>> {
        match self.state {
            FramerState::SeekingHeader => {
                self.seek(byte);
                Ok(None)
            }
            FramerState::ReadingHeader => {
                self.buf.push(byte);
                if self.buf.len() == self.format.header_len() {
                    self.start_payload()?;
                }
                Ok(None)
            }
            FramerState::ReadingPayload => {
                self.buf.push(byte);
                if self.buf.len() == self.payload_end {
                    self.state = FramerState::ReadingCrc;
                }
                Ok(None)
            }
            FramerState::ReadingCrc => {
                self.buf.push(byte);
                if self.buf.len() == self.payload_end + CRC_LENGTH {
                    return self.finish().map(Some);
                }
                Ok(None)
            }
        }
    }

    fn seek(&mut self, byte: u8) {
        if self.window_len == PACKET_HEADER_TAG_LENGTH {
            self.stats.discarded_bytes += 1;
            self.window.copy_within(1.., 0);
            self.window[PACKET_HEADER_TAG_LENGTH - 1] = byte;
        } else {
            self.window[self.window_len] = byte;
            self.window_len += 1;
        }

        if self.window_len == PACKET_HEADER_TAG_LENGTH && self.format.accepts_tag(&self.window) {
            debug!("Found tag {:?}", String::from_utf8_lossy(&self.window));
            self.buf.clear();
            self.buf.extend_from_slice(&self.window);
            self.window_len = 0;
            self.state = FramerState::ReadingHeader;
        }
    }

    /// Header complete. On error the buffer is left for [`Framer::abandon`].
    fn start_payload(&mut self) -> Result<()> {
        let header = PacketHeader::parse(&self.buf, &self.format).map_err(|e| {
            self.stats.header_errors += 1;
            e
        })?;

        self.payload_end = self.format.header_len() + header.payload_size as usize;
        self.buf.reserve(header.payload_size as usize + CRC_LENGTH);
        self.state = if header.payload_size == 0 {
            FramerState::ReadingCrc
        } else {
            FramerState::ReadingPayload
        };
        self.header = Some(header);
        Ok(())
    }

    fn finish(&mut self) -> Result<Packet> {
        let received = read_crc(&self.buf[self.payload_end..]);
        let computed = crc32(&self.buf[..self.payload_end]);

        match self.header.take() {
            Some(header) if received == computed => {
                self.stats.packets += 1;
                let packet = Packet {
                    payload: self.buf[self.format.header_len()..self.payload_end].to_vec(),
                    header,
                };
                self.clear();
                Ok(packet)
            }
            Some(_) => {
                self.stats.crc_errors += 1;
                Err(SqLinkError::BadCrc { received, computed })
            }
            None => Err(SqLinkError::HeaderInvalid("missing header".to_string())),
        }
    }
}
