use crate::SAMPLE_RATE;
use std::fmt;
use std::str::FromStr;

/// Audio link variants spoken by SqLink readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    SqLinkFast,
    SqLinkSlow,
}

/// How packet bytes are protected on the air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEncoding {
    Raw,
    /// Header block followed by 30-byte Hamming blocks
    Hamming,
}

/// Demodulation profile selected by [`LinkType`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkProfile {
    pub samples_per_bit: usize,
    /// Whole cycles of the `0` tone in one bit period
    pub tone0_cycles: usize,
    /// Whole cycles of the `1` tone in one bit period
    pub tone1_cycles: usize,
    /// Low-pass cutoff applied ahead of demodulation
    pub cutoff_hz: f32,
    pub encoding: LinkEncoding,
    /// Largest payload the link can carry in one packet
    pub max_payload_len: u16,
}

impl LinkProfile {
    pub fn tone0_hz(&self) -> f32 {
        (self.tone0_cycles * SAMPLE_RATE) as f32 / self.samples_per_bit as f32
    }

    pub fn tone1_hz(&self) -> f32 {
        (self.tone1_cycles * SAMPLE_RATE) as f32 / self.samples_per_bit as f32
    }

    pub fn bit_rate(&self) -> f32 {
        SAMPLE_RATE as f32 / self.samples_per_bit as f32
    }
}

impl LinkType {
    pub fn profile(&self) -> LinkProfile {
        match self {
            // 4 kbit/s, 8 kHz / 12 kHz
            LinkType::SqLinkFast => LinkProfile {
                samples_per_bit: 12,
                tone0_cycles: 2,
                tone1_cycles: 3,
                cutoff_hz: 16000.0,
                encoding: LinkEncoding::Hamming,
                max_payload_len: 512,
            },
            // 1 kbit/s, 2 kHz / 4 kHz
            LinkType::SqLinkSlow => LinkProfile {
                samples_per_bit: 48,
                tone0_cycles: 2,
                tone1_cycles: 4,
                cutoff_hz: 8000.0,
                encoding: LinkEncoding::Raw,
                max_payload_len: 256,
            },
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::SqLinkFast => write!(f, "sqlink-fast"),
            LinkType::SqLinkSlow => write!(f, "sqlink-slow"),
        }
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "sqlink-fast" => Ok(LinkType::SqLinkFast),
            "slow" | "sqlink-slow" => Ok(LinkType::SqLinkSlow),
            other => Err(format!("unknown link type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles() {
        let fast = LinkType::SqLinkFast.profile();
        assert_eq!(fast.tone0_hz(), 8000.0);
        assert_eq!(fast.tone1_hz(), 12000.0);
        assert_eq!(fast.bit_rate(), 4000.0);
        assert!(fast.tone1_hz() < fast.cutoff_hz);

        let slow = LinkType::SqLinkSlow.profile();
        assert_eq!(slow.tone0_hz(), 2000.0);
        assert_eq!(slow.tone1_hz(), 4000.0);
        assert!(slow.tone1_hz() < slow.cutoff_hz);
    }

    #[test]
    fn test_parse_link_type() {
        assert_eq!("fast".parse::<LinkType>().unwrap(), LinkType::SqLinkFast);
        assert_eq!("SqLink-Slow".parse::<LinkType>().unwrap(), LinkType::SqLinkSlow);
        assert!("gen2".parse::<LinkType>().is_err());
        assert_eq!(LinkType::SqLinkFast.to_string(), "sqlink-fast");
    }
}
