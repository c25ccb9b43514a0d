//! Versioned, length-framed wire encoding.
//!
//! Frame layout: `version: u16 LE | length: u32 LE | bincode payload`.
//! Any change to the field order or types of a framed structure is a
//! breaking wire change and must come with a new version tag.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Version tag carried by every frame this build produces.
pub const CODEC_VERSION: u16 = 1;

/// Default upper bound on a single frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

const HEADER_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),
    #[error("Unsupported codec version: expected {expected}, got {found}")]
    VersionMismatch { expected: u16, found: u16 },
    #[error("Frame length mismatch: header says {declared}, payload has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Serialization table shared by the components that put bytes on the wire
/// or into storage. Built once at startup and handed to whoever needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    version: u16,
    max_frame_size: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::new(CODEC_VERSION, DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Codec {
    pub fn new(version: u16, max_frame_size: usize) -> Self {
        Codec { version, max_frame_size }
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let payload = bincode::serialize(value)?;
        let size = payload.len() + HEADER_LEN;
        if size > self.max_frame_size || payload.len() > u32::MAX as usize {
            return Err(CodecError::TooLarge { size, limit: self.max_frame_size });
        }

        let mut frame = Vec::with_capacity(size);
        frame.extend_from_slice(&self.version.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        if data.len() > self.max_frame_size {
            return Err(CodecError::TooLarge { size: data.len(), limit: self.max_frame_size });
        }
        if data.len() < HEADER_LEN {
            return Err(CodecError::FrameTooShort(data.len()));
        }

        let version = u16::from_le_bytes([data[0], data[1]]);
        if version != self.version {
            return Err(CodecError::VersionMismatch { expected: self.version, found: version });
        }

        let declared = u32::from_le_bytes([data[2], data[3], data[4], data[5]]) as usize;
        let payload = &data[HEADER_LEN..];
        if payload.len() != declared {
            return Err(CodecError::LengthMismatch { declared, actual: payload.len() });
        }

        // Same layout as `bincode::serialize`, but one value must fill the payload.
        let options = bincode::DefaultOptions::new().with_fixint_encoding().reject_trailing_bytes();
        Ok(options.deserialize(payload)?)
    }
}
