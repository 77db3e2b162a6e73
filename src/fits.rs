//! A minimal reader for FITS-encoded scientific data.
//!
//! This is not a general FITS implementation. It reads exactly what the
//! engine needs from an observation file: the optional `T_OBS` observation
//! timestamp card and a floating point payload array. Headers are walked HDU
//! by HDU and the first HDU carrying data is used, which selects the image
//! extension on files whose primary HDU is header-only (the usual layout for
//! instrument data) and the primary HDU on single-HDU files.
//!
//! Only floating point payloads (BITPIX -32 and -64, big-endian per the FITS
//! standard) are supported; elements are widened to `f64`.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use ndarray::Array1;

use crate::error::ParseError;

/// Size in bytes of a FITS header or data block.
const BLOCK_SIZE: usize = 2880;

/// Size in bytes of one header card.
const CARD_SIZE: usize = 80;

/// A parsed object payload: the optional observation timestamp and the
/// numeric data array handed to the compute step.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload {
    /// Observation timestamp from the `T_OBS` header card, if present.
    pub timestamp: Option<DateTime<Utc>>,
    /// Payload elements, flattened in file order.
    pub data: Array1<f64>,
}

/// Trait for parsers that turn raw object bytes into a [Payload].
///
/// This forms the contract between the item processor and the file format.
pub trait PayloadParser: Send + Sync {
    /// Parse raw object bytes.
    fn parse(&self, data: &Bytes) -> Result<Payload, ParseError>;
}

/// [PayloadParser] for FITS-encoded objects.
pub struct FitsParser;

impl PayloadParser for FitsParser {
    fn parse(&self, data: &Bytes) -> Result<Payload, ParseError> {
        read_fits(data)
    }
}

/// Header cards of one HDU.
struct Header {
    cards: Vec<(String, String)>,
}

impl Header {
    /// Returns the value of a card, if present.
    fn get(&self, card: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|(key, _)| key == card)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the integer value of a required card.
    fn get_i64(&self, card: &'static str) -> Result<i64, ParseError> {
        let value = self.get(card).ok_or(ParseError::MissingCard { card })?;
        value.parse().map_err(|_| ParseError::InvalidCard {
            card,
            value: value.to_string(),
        })
    }
}

/// Parse the value field of a header card.
///
/// String values are quoted with single quotes; other values run until an
/// optional `/` comment.
fn parse_card_value(field: &str) -> String {
    let field = field.trim_start();
    if let Some(quoted) = field.strip_prefix('\'') {
        match quoted.split_once('\'') {
            Some((value, _)) => value.trim_end().to_string(),
            None => quoted.trim_end().to_string(),
        }
    } else {
        let value = match field.split_once('/') {
            Some((value, _)) => value,
            None => field,
        };
        value.trim().to_string()
    }
}

/// Parse one header starting at `offset`.
///
/// Returns the header and the offset of the data section following it.
fn parse_header(bytes: &[u8], offset: usize) -> Result<(Header, usize), ParseError> {
    let mut cards = Vec::new();
    let mut block_start = offset;
    loop {
        let block_end = block_start + BLOCK_SIZE;
        if bytes.len() < block_end {
            return Err(ParseError::Truncated {
                offset: block_start,
            });
        }
        let mut end_seen = false;
        for card in bytes[block_start..block_end].chunks_exact(CARD_SIZE) {
            let keyword = String::from_utf8_lossy(&card[..8]).trim_end().to_string();
            if keyword == "END" {
                end_seen = true;
                break;
            }
            // Value cards carry "= " in columns 9-10; anything else
            // (COMMENT, HISTORY, blank) is skipped.
            if keyword.is_empty() || card[8..10] != *b"= " {
                continue;
            }
            let value = parse_card_value(&String::from_utf8_lossy(&card[10..]));
            cards.push((keyword, value));
        }
        if end_seen {
            return Ok((Header { cards }, block_end));
        }
        block_start = block_end;
    }
}

/// Number of payload elements described by a header.
fn element_count(header: &Header) -> Result<usize, ParseError> {
    let naxis = header.get_i64("NAXIS")?;
    if naxis < 0 {
        return Err(ParseError::InvalidCard {
            card: "NAXIS",
            value: naxis.to_string(),
        });
    }
    let mut count: usize = 1;
    for axis in 1..=naxis {
        // NAXISn cards are static names for the handful of axes we accept.
        let card = match axis {
            1 => "NAXIS1",
            2 => "NAXIS2",
            3 => "NAXIS3",
            4 => "NAXIS4",
            _ => {
                return Err(ParseError::InvalidCard {
                    card: "NAXIS",
                    value: naxis.to_string(),
                })
            }
        };
        let length = header.get_i64(card)?;
        let length = usize::try_from(length).map_err(|_| ParseError::InvalidCard {
            card,
            value: length.to_string(),
        })?;
        count = count.saturating_mul(length);
    }
    if naxis == 0 {
        count = 0;
    }
    Ok(count)
}

/// Parse a `T_OBS` style timestamp.
///
/// Accepts RFC 3339 as well as the zone-less form some instruments write.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ParseError::InvalidCard {
            card: "T_OBS",
            value: value.to_string(),
        })
}

/// Decode a big-endian floating point data section into f64 elements.
fn decode_payload(bitpix: i64, data: &[u8], count: usize) -> Result<Vec<f64>, ParseError> {
    let element_size = match bitpix {
        -32 => 4,
        -64 => 8,
        other => return Err(ParseError::UnsupportedBitpix(other)),
    };
    // A corrupt header can claim an axis product near usize::MAX; the byte
    // count must not wrap.
    let expected = match count.checked_mul(element_size) {
        Some(expected) if expected <= data.len() => expected,
        _ => {
            return Err(ParseError::PayloadTooShort {
                expected: count.saturating_mul(element_size),
                actual: data.len(),
            })
        }
    };
    let elements = match bitpix {
        -32 => data[..expected]
            .chunks_exact(4)
            .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
            .collect(),
        _ => data[..expected]
            .chunks_exact(8)
            .map(|chunk| {
                f64::from_be_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ])
            })
            .collect(),
    };
    Ok(elements)
}

/// Read the first data-carrying HDU of a FITS file.
fn read_fits(data: &Bytes) -> Result<Payload, ParseError> {
    let bytes = data.as_ref();
    let mut offset = 0;
    while offset < bytes.len() {
        let (header, data_offset) = parse_header(bytes, offset)?;
        let count = element_count(&header)?;
        if count == 0 {
            // Header-only HDU; move on to the next one.
            offset = data_offset;
            continue;
        }
        let bitpix = header.get_i64("BITPIX")?;
        let elements = decode_payload(bitpix, &bytes[data_offset..], count)?;
        let timestamp = match header.get("T_OBS") {
            Some(value) => Some(parse_timestamp(value)?),
            None => None,
        };
        return Ok(Payload {
            timestamp,
            data: Array1::from_vec(elements),
        });
    }
    Err(ParseError::NoPayload)
}
