//! Compression modes negotiated per link
//!
//! The relay never compresses anything itself. It only derives the codec pair
//! from a client's configured mode and hands it to the remote side in the link.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown compression mode: {0}")]
pub struct UnknownCompressMode(pub String);

/// Compression configured on a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressMode {
    #[default]
    None,
    Snappy,
}

/// Codec applied by one side of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Codec {
    NoneEncode = 0,
    NoneDecode = 1,
    SnappyEncode = 2,
    SnappyDecode = 3,
}

impl CompressMode {
    /// Derive the (encode, decode) codec pair for a new link
    pub fn codecs(self) -> (Codec, Codec) {
        match self {
            CompressMode::None => (Codec::NoneEncode, Codec::NoneDecode),
            CompressMode::Snappy => (Codec::SnappyEncode, Codec::SnappyDecode),
        }
    }
}

impl FromStr for CompressMode {
    type Err = UnknownCompressMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(CompressMode::None),
            "snappy" => Ok(CompressMode::Snappy),
            other => Err(UnknownCompressMode(other.to_string())),
        }
    }
}

impl fmt::Display for CompressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressMode::None => write!(f, "none"),
            CompressMode::Snappy => write!(f, "snappy"),
        }
    }
}
