//! Hex digests used to mask column values

use crate::error::{Result, SluiceError};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Supported digest methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMethod {
    Md5,
    Sha256,
}

impl DigestMethod {
    /// Lowercase hex digest of `bytes`
    pub fn hex_digest(self, bytes: &[u8]) -> String {
        match self {
            DigestMethod::Md5 => format!("{:x}", md5::compute(bytes)),
            DigestMethod::Sha256 => hex::encode(Sha256::digest(bytes)),
        }
    }
}

impl FromStr for DigestMethod {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(DigestMethod::Md5),
            "sha256" => Ok(DigestMethod::Sha256),
            other => Err(SluiceError::UnsupportedDigest(other.to_string())),
        }
    }
}

impl fmt::Display for DigestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestMethod::Md5 => f.write_str("md5"),
            DigestMethod::Sha256 => f.write_str("sha256"),
        }
    }
}

/// Digest `bytes` with the method named by `method`
pub fn hex_digest(method: &str, bytes: &[u8]) -> Result<String> {
    Ok(method.parse::<DigestMethod>()?.hex_digest(bytes))
}
