//! Payload Analyzer: size and cost metrics for a processing request
//!
//! Pure functions over the attachment list and prompt. The estimated
//! payload accounts for base64 inflation of the raw bytes on the wire.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, ProcessingResult};

/// Base64 inflation plus JSON framing, applied to raw attachment bytes.
pub const ENCODING_OVERHEAD: f64 = 1.4;

/// Any single file above this size marks the request as carrying large files.
pub const LARGE_FILE_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Attachment payload as received from the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "content", rename_all = "snake_case")]
pub enum AttachmentData {
    /// Raw file bytes
    Raw(Vec<u8>),
    /// Already base64-encoded file content
    Base64(String),
}

/// A file attached to a processing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    pub mime_type: String,
    pub data: AttachmentData,
}

/// Wire representation of an attachment: always base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFile {
    pub name: String,
    pub mime_type: String,
    pub data: String,
}

impl FileAttachment {
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: AttachmentData::Raw(bytes.into()),
        }
    }

    pub fn from_base64(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        encoded: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: AttachmentData::Base64(encoded.into()),
        }
    }

    /// Raw (decoded) size in bytes.
    ///
    /// Base64 content is sized arithmetically without decoding; returns
    /// `None` when the encoded length cannot be valid base64.
    pub fn byte_len(&self) -> Option<u64> {
        match &self.data {
            AttachmentData::Raw(bytes) => Some(bytes.len() as u64),
            AttachmentData::Base64(encoded) => base64_decoded_len(encoded),
        }
    }

    /// Same attachment with base64 content, the form jobs persist.
    pub fn into_base64(self) -> Self {
        match self.data {
            AttachmentData::Raw(bytes) => Self {
                name: self.name,
                mime_type: self.mime_type,
                data: AttachmentData::Base64(STANDARD.encode(bytes)),
            },
            AttachmentData::Base64(_) => self,
        }
    }

    /// Encode for transmission to the remote analysis service.
    pub fn encoded(&self) -> EncodedFile {
        let data = match &self.data {
            AttachmentData::Raw(bytes) => STANDARD.encode(bytes),
            AttachmentData::Base64(encoded) => encoded.trim().to_string(),
        };
        EncodedFile {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            data,
        }
    }
}

fn base64_decoded_len(encoded: &str) -> Option<u64> {
    let trimmed = encoded.trim();
    if trimmed.len() % 4 != 0 {
        return None;
    }
    let padding = trimmed.bytes().rev().take_while(|b| *b == b'=').count();
    if padding > 2 {
        return None;
    }
    Some((trimmed.len() / 4 * 3 - padding) as u64)
}

/// Size and cost metrics for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadAnalysis {
    pub file_count: usize,
    /// Sum of raw attachment sizes in bytes
    pub total_size: u64,
    /// Prompt size in UTF-8 bytes
    pub prompt_size: u64,
    /// `total_size × ENCODING_OVERHEAD + prompt_size`
    pub estimated_payload_size: u64,
    pub has_large_files: bool,
    pub average_file_size: f64,
}

impl PayloadAnalysis {
    /// Analyze an attachment list and prompt.
    pub fn analyze(files: &[FileAttachment], prompt: &str) -> ProcessingResult<Self> {
        let sizes = files
            .iter()
            .map(|file| {
                file.byte_len().ok_or_else(|| {
                    ProcessingError::invalid_input(format!(
                        "attachment '{}' is not valid base64",
                        file.name
                    ))
                })
            })
            .collect::<ProcessingResult<Vec<u64>>>()?;

        if let Some(idx) = sizes.iter().position(|size| *size == 0) {
            return Err(ProcessingError::invalid_input(format!(
                "attachment '{}' is empty",
                files[idx].name
            )));
        }

        Ok(Self::from_sizes(&sizes, prompt.len() as u64))
    }

    /// Build metrics from pre-computed file sizes.
    pub fn from_sizes(sizes: &[u64], prompt_size: u64) -> Self {
        let total_size: u64 = sizes.iter().sum();
        let file_count = sizes.len();
        let estimated_payload_size =
            (total_size as f64 * ENCODING_OVERHEAD).ceil() as u64 + prompt_size;

        Self {
            file_count,
            total_size,
            prompt_size,
            estimated_payload_size,
            has_large_files: sizes.iter().any(|size| *size > LARGE_FILE_THRESHOLD),
            average_file_size: if file_count > 0 {
                total_size as f64 / file_count as f64
            } else {
                0.0
            },
        }
    }

    pub fn total_kb(&self) -> f64 {
        self.total_size as f64 / 1024.0
    }

    pub fn total_mb(&self) -> f64 {
        self.total_size as f64 / (1024.0 * 1024.0)
    }
}
