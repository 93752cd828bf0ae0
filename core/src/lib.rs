//! SqLink link layer for card-reader accessories
//!
//! Binary FSK over an audio-coupled link, Hamming(n,k) block FEC and the
//! SqLink packet framer (tag, reader id, hardware revision, packet type,
//! payload, CRC-32 trailer).

pub mod error;
pub mod filter;
pub mod framing;
pub mod fsk;
pub mod hamming;
pub mod link;
pub mod math_util;
pub mod modem;
pub mod session;
pub mod stats;
pub mod sync;

pub use error::{DecodeStatus, Result, SqLinkError};
pub use framing::{
    FrameFormat, Framer, FramerState, Packet, PacketHeader, PacketType, PacketTypeWidth,
};
pub use link::{LinkEncoding, LinkProfile, LinkType};
pub use modem::{DecodeOutput, LinkClassification, Modem, ModemConfig};
pub use session::{LinkSession, ReaderTransport, TimerApi, TimerId};
pub use stats::DemodStats;

// Audio configuration
pub const SAMPLE_RATE: usize = 48000;
pub const FILTER_TAPS: usize = 129;
/// Samples the low-pass filter trims from the head of its output
pub const FILTER_DELAY: usize = FILTER_TAPS - 1;
pub const GUARD_SAMPLES: usize = 128;
pub const TX_AMPLITUDE: f32 = 0.5;

// Bit synchronisation
pub const PREAMBLE_BITS: usize = 32;
pub const SYNC_WORD: u16 = 0x2DD4;
pub const SYNC_WORD_BITS: usize = 16;
pub const TAIL_BITS: usize = 8;

// SqLink packet layout
pub const PACKET_HEADER_TAG_LENGTH: usize = 8;
pub const READER_ID_LENGTH: usize = 8;
pub const CRC_LENGTH: usize = 4;
pub const TAG_SQUAREM1: [u8; PACKET_HEADER_TAG_LENGTH] = *b"SQUAREM1";
pub const TAG_SQUARER6: [u8; PACKET_HEADER_TAG_LENGTH] = *b"SQUARER6";
pub const DEFAULT_MAX_PAYLOAD_LEN: u16 = 1024;

// Hamming block configuration
pub const HAMMING_MAX_DATA_TO_ENCODE_LENGTH: usize = 30;
pub const HAMMING_MAX_ENCODED_DATA_LENGTH: usize = 31;
