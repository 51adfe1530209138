//! `CSI_DATA` record line format.
//!
//! One record per accepted frame:
//!
//! ```text
//! CSI_DATA,<index>,<mac>,<rssi>,<rate>,<sig_mode>,<mcs>,<cwb>,<len>,"[<s0>,<s1>,...]"
//! ```
//!
//! Downstream tooling splits on the first nine commas and treats the quoted
//! remainder as the sample list, so the layout must not change.

use super::frame::CsiFrame;
use crate::radio::MacAddr;
use std::fmt;
use std::str::FromStr;

/// Line prefix identifying a CSI record.
pub const RECORD_PREFIX: &str = "CSI_DATA";

/// An indexed frame ready for emission.
#[derive(Debug, Clone, Copy)]
pub struct CsiRecord<'a> {
    pub index: u32,
    pub frame: CsiFrame<'a>,
}

impl fmt::Display for CsiRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = &self.frame;
        write!(
            f,
            "{},{},{},{},{},{},{},{},{},\"[",
            RECORD_PREFIX,
            self.index,
            frame.mac,
            frame.rssi,
            frame.rate,
            frame.sig_mode,
            frame.mcs,
            frame.cwb,
            frame.data.len()
        )?;
        for (i, sample) in frame.data.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", sample)?;
        }
        f.write_str("]\"")
    }
}

/// A record parsed back from its line form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub index: u32,
    pub mac: MacAddr,
    pub rssi: i8,
    pub rate: u8,
    pub sig_mode: u8,
    pub mcs: u8,
    pub cwb: u8,
    pub data: Vec<i8>,
}

impl ParsedRecord {
    pub fn as_frame(&self) -> CsiFrame<'_> {
        CsiFrame {
            mac: self.mac,
            rssi: self.rssi,
            rate: self.rate,
            sig_mode: self.sig_mode,
            mcs: self.mcs,
            cwb: self.cwb,
            data: &self.data,
        }
    }
}

/// Why a line is not a valid record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    /// Line does not start with `CSI_DATA`.
    NotARecord,
    /// A header field is missing.
    MissingField(&'static str),
    /// A header field does not parse.
    InvalidField(&'static str),
    /// Sample list is not a quoted bracketed list.
    MalformedSamples,
    /// Declared length differs from the sample count.
    LengthMismatch { declared: usize, actual: usize },
}

impl fmt::Display for RecordParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotARecord => write!(f, "not a {} line", RECORD_PREFIX),
            Self::MissingField(name) => write!(f, "missing field: {}", name),
            Self::InvalidField(name) => write!(f, "invalid field: {}", name),
            Self::MalformedSamples => write!(f, "malformed sample list"),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "declared {} samples, found {}", declared, actual)
            }
        }
    }
}

impl std::error::Error for RecordParseError {}

const HEADER_FIELDS: [&str; 8] = ["index", "mac", "rssi", "rate", "sig_mode", "mcs", "cwb", "len"];

fn field<T: FromStr>(value: &str, name: &'static str) -> Result<T, RecordParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| RecordParseError::InvalidField(name))
}

impl FromStr for ParsedRecord {
    type Err = RecordParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let rest = line
            .strip_prefix(RECORD_PREFIX)
            .and_then(|r| r.strip_prefix(','))
            .ok_or(RecordParseError::NotARecord)?;

        let mut parts = rest.splitn(HEADER_FIELDS.len() + 1, ',');
        let mut header = [""; 8];
        for (slot, name) in header.iter_mut().zip(HEADER_FIELDS) {
            *slot = parts.next().ok_or(RecordParseError::MissingField(name))?;
        }
        let samples = parts.next().ok_or(RecordParseError::MissingField("data"))?;

        let declared: usize = field(header[7], "len")?;
        let inner = samples
            .trim()
            .strip_prefix("\"[")
            .and_then(|s| s.strip_suffix("]\""))
            .ok_or(RecordParseError::MalformedSamples)?;
        let data = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|s| s.trim().parse::<i8>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| RecordParseError::MalformedSamples)?
        };
        if data.len() != declared {
            return Err(RecordParseError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }

        Ok(Self {
            index: field(header[0], "index")?,
            mac: header[1]
                .trim()
                .parse()
                .map_err(|_| RecordParseError::InvalidField("mac"))?,
            rssi: field(header[2], "rssi")?,
            rate: field(header[3], "rate")?,
            sig_mode: field(header[4], "sig_mode")?,
            mcs: field(header[5], "mcs")?,
            cwb: field(header[6], "cwb")?,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(data: &[i8]) -> CsiFrame<'_> {
        CsiFrame {
            mac: MacAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]),
            rssi: -52,
            rate: 11,
            sig_mode: 1,
            mcs: 0,
            cwb: 1,
            data,
        }
    }

    #[test]
    fn test_record_line_format() {
        let record = CsiRecord {
            index: 7,
            frame: sample_frame(&[3, -1, 0, 12]),
        };
        assert_eq!(
            record.to_string(),
            "CSI_DATA,7,aa:bb:cc:dd:ee:01,-52,11,1,0,1,4,\"[3,-1,0,12]\""
        );
    }

    #[test]
    fn test_parse_emitted_line() {
        let samples = [5i8, -128, 127];
        let line = CsiRecord {
            index: 42,
            frame: sample_frame(&samples),
        }
        .to_string();

        let parsed: ParsedRecord = line.parse().unwrap();
        assert_eq!(parsed.index, 42);
        assert_eq!(parsed.rssi, -52);
        assert_eq!(parsed.as_frame(), sample_frame(&samples));
    }

    #[test]
    fn test_parse_tolerates_trailing_newline() {
        let line = "CSI_DATA,0,01:02:03:04:05:06,-60,0,1,0,0,2,\"[1,2]\"\r\n";
        let parsed: ParsedRecord = line.parse().unwrap();
        assert_eq!(parsed.data, vec![1, 2]);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert_eq!(
            "I (123) csi_recv: CSI RX Started".parse::<ParsedRecord>(),
            Err(RecordParseError::NotARecord)
        );
        assert_eq!(
            "CSI_DATA,1,01:02:03:04:05:06,-60".parse::<ParsedRecord>(),
            Err(RecordParseError::MissingField("rate"))
        );
        assert_eq!(
            "CSI_DATA,1,01:02:03:04:05:06,-60,0,1,0,0,3,\"[1,2]\"".parse::<ParsedRecord>(),
            Err(RecordParseError::LengthMismatch {
                declared: 3,
                actual: 2
            })
        );
        assert_eq!(
            "CSI_DATA,1,01:02:03:04:05:06,-60,0,1,0,0,2,[1,2]".parse::<ParsedRecord>(),
            Err(RecordParseError::MalformedSamples)
        );
        assert_eq!(
            "CSI_DATA,x,01:02:03:04:05:06,-60,0,1,0,0,1,\"[1]\"".parse::<ParsedRecord>(),
            Err(RecordParseError::InvalidField("index"))
        );
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use csi_radio_esp32_macros::tap_test;

    #[tap_test]
    fn record_line_parses_on_device() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let samples = [1i8, 2, 3];
        let line = CsiRecord {
            index: 0,
            frame: CsiFrame::new(MacAddr::BROADCAST, &samples),
        }
        .to_string();
        let parsed: ParsedRecord = line.parse()?;
        assert_eq!(parsed.data, samples);
        Ok(())
    }
}
