//! Integrity verification: streaming SHA-256 and WAV container checks.
//!
//! Hashing is the authority — a hash mismatch always fails an upload. The
//! WAV header check is advisory: the service is content-agnostic at the byte
//! level, so a malformed header surfaces as a quality warning, never a
//! rejection.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Buffer size for streaming hash computation.
const HASH_BUF: usize = 32 * 1024;

/// The canonical RIFF/WAVE/fmt/data preamble is 44 bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Hash a full stream with constant memory. Returns lowercase hex.
pub async fn hash_stream<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an in-memory buffer. Returns lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compare two hex hashes, tolerating case differences.
pub fn compare(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}

/// Parsed PCM parameters from a WAV header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavInfo {
    /// 1 = PCM, 3 = IEEE float
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_depth: u16,
    /// Payload length declared by the data chunk
    pub data_size: u32,
}

impl WavInfo {
    /// Human-readable quality tag, e.g. "48kHz/24bit/2ch".
    pub fn quality_label(&self) -> String {
        format!(
            "{}kHz/{}bit/{}ch",
            self.sample_rate / 1000,
            self.bit_depth,
            self.channels
        )
    }
}

/// WAV header diagnostics. Advisory only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavError {
    #[error("header too short: {0} bytes, need {WAV_HEADER_LEN}")]
    TooShort(usize),

    #[error("missing RIFF signature")]
    MissingRiff,

    #[error("missing WAVE signature")]
    MissingWave,

    #[error("invalid fmt chunk")]
    InvalidFmt,

    #[error("unsupported codec: format tag {0}")]
    UnsupportedCodec(u16),

    #[error("missing data chunk")]
    MissingData,
}

/// Validate the 44-byte WAV preamble. Only the canonical layout is parsed —
/// RIFF, WAVE, a 16-byte PCM fmt chunk, then data. Anything else is reported
/// as a diagnostic for the quality alert path.
pub fn parse_wav_header(header: &[u8]) -> Result<WavInfo, WavError> {
    if header.len() < WAV_HEADER_LEN {
        return Err(WavError::TooShort(header.len()));
    }
    if &header[0..4] != b"RIFF" {
        return Err(WavError::MissingRiff);
    }
    if &header[8..12] != b"WAVE" {
        return Err(WavError::MissingWave);
    }
    if &header[12..16] != b"fmt " {
        return Err(WavError::InvalidFmt);
    }

    let fmt_size = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
    if fmt_size != 16 {
        return Err(WavError::InvalidFmt);
    }

    let audio_format = u16::from_le_bytes([header[20], header[21]]);
    if audio_format != 1 && audio_format != 3 {
        return Err(WavError::UnsupportedCodec(audio_format));
    }

    if &header[36..40] != b"data" {
        return Err(WavError::MissingData);
    }

    Ok(WavInfo {
        audio_format,
        channels: u16::from_le_bytes([header[22], header[23]]),
        sample_rate: u32::from_le_bytes([header[24], header[25], header[26], header[27]]),
        bit_depth: u16::from_le_bytes([header[34], header[35]]),
        data_size: u32::from_le_bytes([header[40], header[41], header[42], header[43]]),
    })
}

/// Read just the header from a stream and validate it. Consumes at most 44
/// bytes — never the file body.
pub async fn verify_wav_header<R: AsyncRead + Unpin>(mut reader: R) -> Result<WavInfo, WavError> {
    let mut header = [0u8; WAV_HEADER_LEN];
    let mut filled = 0;
    while filled < WAV_HEADER_LEN {
        match reader.read(&mut header[filled..]).await {
            Ok(0) => return Err(WavError::TooShort(filled)),
            Ok(n) => filled += n,
            Err(_) => return Err(WavError::TooShort(filled)),
        }
    }
    parse_wav_header(&header)
}
