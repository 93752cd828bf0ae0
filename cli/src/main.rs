use clap::{Args, Parser, Subcommand};
use hound::WavSpec;
use serde::Serialize;
use sqlink_core::{
    DecodeOutput, FrameFormat, Framer, LinkType, Modem, ModemConfig, Packet, PacketType,
    PacketTypeWidth, SqLinkError, DEFAULT_MAX_PAYLOAD_LEN, PACKET_HEADER_TAG_LENGTH,
    READER_ID_LENGTH, SAMPLE_RATE, TAG_SQUAREM1,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Link(#[from] SqLinkError),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedWav(String),
}

type Result<T> = std::result::Result<T, CliError>;

#[derive(Parser)]
#[command(name = "sqlink")]
#[command(about = "SqLink audio link encoder, decoder and framer")]
struct Cli {
    #[command(flatten)]
    format: FormatArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FormatArgs {
    /// Width of the packet type field in bytes (1, 2 or 4)
    #[arg(long, global = true, default_value = "1", value_parser = parse_width)]
    packet_type_width: PacketTypeWidth,

    /// Largest payload accepted by the framer
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_PAYLOAD_LEN)]
    max_payload: u16,

    /// 8-character packet tag, accepted alongside the built-in tags and
    /// used for encoded packets (default SQUAREM1)
    #[arg(long, global = true, value_parser = parse_tag)]
    tag: Option<[u8; PACKET_HEADER_TAG_LENGTH]>,
}

impl FormatArgs {
    fn frame_format(&self) -> FrameFormat {
        let mut format = FrameFormat {
            packet_type_width: self.packet_type_width,
            max_payload_len: self.max_payload,
            ..FrameFormat::default()
        };
        if let Some(tag) = self.tag {
            if !format.accepts_tag(&tag) {
                format.tags.push(tag);
            }
        }
        format
    }

    fn tag(&self) -> [u8; PACKET_HEADER_TAG_LENGTH] {
        self.tag.unwrap_or(TAG_SQUAREM1)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Frame a payload and write the modulated packet to a WAV file
    Encode {
        /// Payload file
        #[arg(value_name = "PAYLOAD")]
        input: PathBuf,

        /// Output WAV file
        #[arg(value_name = "OUT.WAV")]
        output: PathBuf,

        /// Link type: fast or slow
        #[arg(short, long, default_value = "fast")]
        link: LinkType,

        /// Reader id as 16 hex digits
        #[arg(long, default_value = "0000000000000000", value_parser = parse_reader_id)]
        reader_id: [u8; READER_ID_LENGTH],

        #[arg(long, default_value_t = 0)]
        packet_type: u32,

        #[arg(long, default_value_t = 0)]
        hw_major: u8,

        #[arg(long, default_value_t = 0)]
        hw_minor: u8,
    },

    /// Demodulate and decode one packet from a WAV file
    Decode {
        /// Input WAV file
        #[arg(value_name = "IN.WAV")]
        input: PathBuf,

        /// Link type: fast or slow
        #[arg(short, long, default_value = "fast")]
        link: LinkType,

        /// Print a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run the framer over a raw byte capture
    Frame {
        /// Captured bytes
        #[arg(value_name = "IN.BIN")]
        input: PathBuf,
    },
}

fn parse_width(s: &str) -> std::result::Result<PacketTypeWidth, String> {
    match s {
        "1" => Ok(PacketTypeWidth::U8),
        "2" => Ok(PacketTypeWidth::U16),
        "4" => Ok(PacketTypeWidth::U32),
        _ => Err(format!("packet type width must be 1, 2 or 4, got {}", s)),
    }
}

fn parse_tag(s: &str) -> std::result::Result<[u8; PACKET_HEADER_TAG_LENGTH], String> {
    if !s.is_ascii() {
        return Err("tag must be ASCII".to_string());
    }
    s.as_bytes()
        .try_into()
        .map_err(|_| format!("tag must be {} characters", PACKET_HEADER_TAG_LENGTH))
}

fn parse_reader_id(s: &str) -> std::result::Result<[u8; READER_ID_LENGTH], String> {
    if s.len() != READER_ID_LENGTH * 2 || !s.is_ascii() {
        return Err(format!("reader id must be {} hex digits", READER_ID_LENGTH * 2));
    }
    let mut id = [0u8; READER_ID_LENGTH];
    for (i, byte) in id.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|e| e.to_string())?;
    }
    Ok(id)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    let format = cli.format.frame_format();
    let tag = cli.format.tag();

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            link,
            reader_id,
            packet_type,
            hw_major,
            hw_minor,
        } => {
            let packet = std::fs::read(&input)
                .map_err(CliError::from)
                .and_then(|payload| {
                    Ok(Packet::new(tag, reader_id, PacketType(packet_type), payload)?
                        .with_hw_rev(hw_major, hw_minor))
                });
            packet.and_then(|packet| encode_command(format, link, &packet, &output))
        }
        Commands::Decode { input, link, json } => decode_command(format, link, &input, json),
        Commands::Frame { input } => frame_command(format, &input),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn encode_command(
    format: FrameFormat,
    link: LinkType,
    packet: &Packet,
    output: &Path,
) -> Result<()> {
    let modem = Modem::init(ModemConfig {
        frame_format: format,
        ..ModemConfig::default()
    })?;
    let samples = modem.modulate(link, packet)?;
    info!(
        "Modulated {} payload bytes for {} into {} samples",
        packet.payload.len(),
        link,
        samples.len()
    );

    write_wav(output, &samples)?;
    println!(
        "Encoded {} bytes as {} ({:.3} s) to {}",
        packet.payload.len(),
        link,
        samples.len() as f32 / SAMPLE_RATE as f32,
        output.display()
    );
    modem.shutdown();
    Ok(())
}

fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let file = File::create(path)?;
    let mut writer = hound::WavWriter::new(file, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV capture as 16-bit samples, keeping the first channel only.
fn read_wav(path: &Path) -> Result<Vec<i16>> {
    let file = File::open(path)?;
    let mut reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    debug!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    if spec.sample_rate != SAMPLE_RATE as u32 {
        return Err(CliError::UnsupportedWav(format!(
            "sample rate {} Hz, expected {} Hz",
            spec.sample_rate, SAMPLE_RATE
        )));
    }

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect::<std::result::Result<_, _>>()?,
        (format, bits) => {
            return Err(CliError::UnsupportedWav(format!("{:?} {}-bit samples", format, bits)))
        }
    };

    Ok(interleaved
        .into_iter()
        .step_by(spec.channels.max(1) as usize)
        .collect())
}

#[derive(Serialize)]
struct PacketSummary {
    tag: String,
    reader_id: String,
    hw_rev: String,
    packet_type: u32,
    payload_size: u16,
    payload: String,
}

impl From<&Packet> for PacketSummary {
    fn from(packet: &Packet) -> Self {
        let header = &packet.header;
        Self {
            tag: header.tag_str(),
            reader_id: to_hex(&header.reader_id),
            hw_rev: format!("{}{}", header.hw_major_rev_letter(), header.hw_minor_rev),
            packet_type: header.packet_type.0,
            payload_size: header.payload_size,
            payload: to_hex(&packet.payload),
        }
    }
}

#[derive(Serialize)]
struct DecodeSummary {
    status: String,
    link: String,
    error: Option<String>,
    packet: Option<PacketSummary>,
    num_samples: usize,
    variance: f32,
    peak_amplitude: f32,
    classified_link: Option<String>,
    fast_score: f32,
    slow_score: f32,
    sync_index: Option<usize>,
    sync_score: f32,
    sync_bit_errors: u32,
    reference_distance: f32,
    preamble_frequency_hz: f32,
    hamming_corrections: usize,
    bit_confidence_median: f32,
    runtime_us: u128,
}

impl From<&DecodeOutput> for DecodeSummary {
    fn from(output: &DecodeOutput) -> Self {
        let stats = &output.stats;
        Self {
            status: format!("{:?}", output.status()),
            link: stats.link().to_string(),
            error: output.result.as_ref().err().map(|e| e.to_string()),
            packet: output.packet().map(PacketSummary::from),
            num_samples: stats.num_samples(),
            variance: stats.variance(),
            peak_amplitude: stats.peak_amplitude(),
            classified_link: stats.classified_link().map(|link| link.to_string()),
            fast_score: stats.fast_score(),
            slow_score: stats.slow_score(),
            sync_index: stats.sync_index(),
            sync_score: stats.sync_score(),
            sync_bit_errors: stats.sync_bit_errors(),
            reference_distance: stats.reference_distance(),
            preamble_frequency_hz: stats.preamble_frequency_hz(),
            hamming_corrections: stats.hamming_corrections(),
            bit_confidence_median: stats.bit_confidence_median(),
            runtime_us: stats.runtime().as_micros(),
        }
    }
}

fn print_packet(packet: &Packet) {
    let summary = PacketSummary::from(packet);
    println!("Tag:         {}", summary.tag);
    println!("Reader id:   {}", summary.reader_id);
    println!("HW revision: {}", summary.hw_rev);
    println!("Packet type: {}", summary.packet_type);
    println!("Payload:     {} bytes {}", summary.payload_size, summary.payload);
}

fn decode_command(format: FrameFormat, link: LinkType, input: &Path, json: bool) -> Result<()> {
    let samples = read_wav(input)?;
    let mut modem = Modem::init(ModemConfig {
        frame_format: format,
        ..ModemConfig::default()
    })?;

    let output = modem.demod_and_decode(link, &samples);
    modem.shutdown();

    if json {
        println!("{}", serde_json::to_string_pretty(&DecodeSummary::from(&output))?);
    } else {
        let stats = &output.stats;
        println!("Status:      {:?}", output.status());
        if let Some(packet) = output.packet() {
            print_packet(packet);
        }
        println!(
            "Signal:      variance {:.5}, sync at {:?} (score {:.2}, {} bit errors)",
            stats.variance(),
            stats.sync_index(),
            stats.sync_score(),
            stats.sync_bit_errors()
        );
        println!("Corrections: {}", stats.hamming_corrections());
        match stats.classified_link() {
            Some(classified) => println!("Looks like:  {}", classified),
            None => println!("Looks like:  noise"),
        }
    }

    output.result.map(|_| ()).map_err(CliError::from)
}

fn frame_command(format: FrameFormat, input: &Path) -> Result<()> {
    let data = std::fs::read(input)?;
    let mut framer = Framer::new(format);
    let packets = framer.feed(&data);

    for (i, packet) in packets.iter().enumerate() {
        println!("Packet {}:", i + 1);
        print_packet(packet);
    }
    if framer.in_packet() {
        warn!("Capture ends inside a packet");
    }

    let stats = framer.stats();
    println!(
        "Framed {} packets from {} bytes ({} CRC errors, {} header errors, {} bytes discarded)",
        stats.packets,
        data.len(),
        stats.crc_errors,
        stats.header_errors,
        stats.discarded_bytes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reader_id() {
        assert_eq!(
            parse_reader_id("0102030405a6b7c8").unwrap(),
            [1, 2, 3, 4, 5, 0xa6, 0xb7, 0xc8]
        );
        assert!(parse_reader_id("0102").is_err());
        assert!(parse_reader_id("zz02030405060708").is_err());
    }

    #[test]
    fn test_parse_tag_and_width() {
        assert_eq!(parse_tag("SQUAREM1").unwrap(), TAG_SQUAREM1);
        assert!(parse_tag("SHORT").is_err());
        assert_eq!(parse_width("2").unwrap(), PacketTypeWidth::U16);
        assert!(parse_width("3").is_err());
    }

    #[test]
    fn test_global_tag_is_accepted() {
        let cli = Cli::try_parse_from(["sqlink", "decode", "in.wav", "--tag", "FOOBAR12"]).unwrap();
        assert_eq!(cli.format.tag(), *b"FOOBAR12");
        assert!(cli.format.frame_format().accepts_tag(b"FOOBAR12"));

        let cli = Cli::try_parse_from(["sqlink", "frame", "in.bin"]).unwrap();
        assert_eq!(cli.format.tag(), TAG_SQUAREM1);
        assert_eq!(cli.format.frame_format(), FrameFormat::default());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
