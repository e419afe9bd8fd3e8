//! pkt-line framing for the smart HTTP transport.
//!
//! Only the write side is exercised by the request path: the advertisement
//! preamble is framed here and everything else is produced by the git
//! subprocess. The decoder exists for tests and diagnostics.

use crate::service::Service;

pub const PKT_FLUSH: &[u8] = b"0000";

pub const PKT_DELIM: &[u8] = b"0001";

/// Largest value the 4-digit length header can carry.
pub const MAX_PKT_LEN: usize = 0xffff;

/// Largest payload that still fits in a single packet.
pub const MAX_PKT_PAYLOAD: usize = MAX_PKT_LEN - 4;

const HEX: &[u8; 16] = b"0123456789abcdef";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkt {
    Data(Vec<u8>),
    Flush,
    Delim,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PktError {
    #[error("pkt-line payload of {0} bytes exceeds the protocol limit")]
    TooLong(usize),
    #[error("truncated pkt-line length")]
    TruncatedHeader,
    #[error("invalid pkt-line length header {0:?}")]
    InvalidHeader(String),
    #[error("pkt-line declares {declared} payload bytes but only {available} remain")]
    TruncatedData { declared: usize, available: usize },
}

/// Length header for `payload`: `len + 4` as four lowercase hex digits.
pub fn encode_length(payload: &[u8]) -> Result<[u8; 4], PktError> {
    let len = payload.len() + 4;
    if len > MAX_PKT_LEN {
        return Err(PktError::TooLong(payload.len()));
    }
    Ok([
        HEX[(len >> 12) & 0xf],
        HEX[(len >> 8) & 0xf],
        HEX[(len >> 4) & 0xf],
        HEX[len & 0xf],
    ])
}

pub fn encode_pkt_line(data: &[u8]) -> Result<Vec<u8>, PktError> {
    let header = encode_length(data)?;
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(data);
    Ok(out)
}

/// `<len>"# service=<service>\n"` followed by a flush packet and the raw
/// `--advertise-refs` output.
pub fn build_advertisement(service: Service, refs: &[u8]) -> Result<Vec<u8>, PktError> {
    let banner = encode_pkt_line(format!("# service={}\n", service.as_str()).as_bytes())?;
    let mut out = Vec::with_capacity(banner.len() + PKT_FLUSH.len() + refs.len());
    out.extend_from_slice(&banner);
    out.extend_from_slice(PKT_FLUSH);
    out.extend_from_slice(refs);
    Ok(out)
}

fn decode_length(header: &[u8]) -> Result<usize, PktError> {
    let text = std::str::from_utf8(header)
        .map_err(|_| PktError::InvalidHeader(String::from_utf8_lossy(header).into_owned()))?;
    if !text.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err(PktError::InvalidHeader(text.to_string()));
    }
    usize::from_str_radix(text, 16).map_err(|_| PktError::InvalidHeader(text.to_string()))
}

pub fn decode_pkt_lines(mut buf: &[u8]) -> Result<Vec<Pkt>, PktError> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 4 {
            return Err(PktError::TruncatedHeader);
        }
        let len = decode_length(&buf[..4])?;
        buf = &buf[4..];
        match len {
            0 => out.push(Pkt::Flush),
            1 => out.push(Pkt::Delim),
            2 | 3 => {
                return Err(PktError::InvalidHeader(format!("{len:04x}")));
            }
            _ => {
                let data_len = len - 4;
                if buf.len() < data_len {
                    return Err(PktError::TruncatedData {
                        declared: data_len,
                        available: buf.len(),
                    });
                }
                out.push(Pkt::Data(buf[..data_len].to_vec()));
                buf = &buf[data_len..];
            }
        }
    }
    Ok(out)
}
