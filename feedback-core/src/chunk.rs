//! Chunk reassembler: collect indexed base64 slices of an inline file transfer, merge on completion.

use std::collections::HashMap;

use base64::Engine;

/// Name used when a transfer completes without any announced file name.
pub const DEFAULT_FILE_NAME: &str = "downloaded_file";

/// Largest `total_chunks` accepted for one transfer. Slots are allocated up front.
pub const MAX_TOTAL_CHUNKS: u32 = 1 << 20;

/// Per-transfer state: one slot per chunk index; `None` until that index arrives.
#[derive(Debug, Default)]
struct TransferState {
    name: Option<String>,
    slots: Vec<Option<Vec<u8>>>,
}

impl TransferState {
    fn grow_to(&mut self, total: usize) {
        if self.slots.len() < total {
            self.slots.resize(total, None);
        }
    }

    fn received(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Concatenate slots in index order. Call only when every slot is populated.
    fn reassemble_into_bytes(self) -> Vec<u8> {
        let len = self.slots.iter().flatten().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for payload in self.slots.into_iter().flatten() {
            out.extend_from_slice(&payload);
        }
        out
    }
}

/// A merged transfer ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub file_id: String,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Tracks all in-flight inline transfers, keyed by file id.
#[derive(Debug, Default)]
pub struct Reassembler {
    transfers: HashMap<String, TransferState>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the announced name (and size in chunks, if known) of a transfer.
    pub fn on_start(
        &mut self,
        file_id: &str,
        name: Option<String>,
        total_chunks: Option<u32>,
    ) -> Result<(), ChunkError> {
        if let Some(total) = total_chunks {
            check_total(file_id, total)?;
        }
        let state = self.transfers.entry(file_id.to_owned()).or_default();
        if name.is_some() {
            state.name = name;
        }
        if let Some(total) = total_chunks {
            state.grow_to(total as usize);
        }
        Ok(())
    }

    /// Store one chunk (overwrite by index). Returns download progress in percent.
    pub fn on_chunk(
        &mut self,
        file_id: &str,
        index: u32,
        total: u32,
        payload: Vec<u8>,
    ) -> Result<u8, ChunkError> {
        check_total(file_id, total)?;
        if index >= total {
            return Err(ChunkError::IndexOutOfRange {
                file_id: file_id.to_owned(),
                index,
                total,
            });
        }
        let state = self.transfers.entry(file_id.to_owned()).or_default();
        state.grow_to(total as usize);
        state.slots[index as usize] = Some(payload);
        Ok(progress(index, total))
    }

    /// Like `on_chunk`, decoding standard base64 first.
    pub fn on_chunk_base64(
        &mut self,
        file_id: &str,
        index: u32,
        total: u32,
        content: &str,
    ) -> Result<u8, ChunkError> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| ChunkError::Base64 {
                file_id: file_id.to_owned(),
                reason: e.to_string(),
            })?;
        self.on_chunk(file_id, index, total, payload)
    }

    /// Merge a finished transfer. The entry is discarded whether or not the merge succeeds.
    pub fn on_complete(&mut self, file_id: &str) -> Result<CompletedFile, ChunkError> {
        let state = self
            .transfers
            .remove(file_id)
            .ok_or_else(|| ChunkError::UnknownTransfer(file_id.to_owned()))?;
        let total = state.slots.len();
        let received = state.received();
        if total == 0 || received < total {
            return Err(ChunkError::Incomplete {
                file_id: file_id.to_owned(),
                received,
                total,
            });
        }
        let name = state
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_owned());
        Ok(CompletedFile {
            file_id: file_id.to_owned(),
            name,
            bytes: state.reassemble_into_bytes(),
        })
    }

    /// Drop every in-flight transfer (client teardown).
    pub fn clear(&mut self) {
        self.transfers.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.transfers.len()
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.transfers.contains_key(file_id)
    }
}

fn check_total(file_id: &str, total: u32) -> Result<(), ChunkError> {
    if total == 0 {
        return Err(ChunkError::InvalidTotal {
            file_id: file_id.to_owned(),
        });
    }
    if total > MAX_TOTAL_CHUNKS {
        return Err(ChunkError::TooManyChunks {
            file_id: file_id.to_owned(),
            total,
        });
    }
    Ok(())
}

/// `round((index + 1) / total * 100)`, clamped to 100.
pub fn progress(index: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = ((index as f64 + 1.0) / total as f64 * 100.0).round();
    pct.min(100.0) as u8
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("unknown transfer {0}")]
    UnknownTransfer(String),
    #[error("transfer {file_id}: total_chunks must be positive")]
    InvalidTotal { file_id: String },
    #[error("transfer {file_id}: too many chunks ({total})")]
    TooManyChunks { file_id: String, total: u32 },
    #[error("transfer {file_id}: chunk index {index} out of range for {total} chunks")]
    IndexOutOfRange {
        file_id: String,
        index: u32,
        total: u32,
    },
    #[error("transfer {file_id}: invalid base64 chunk: {reason}")]
    Base64 { file_id: String, reason: String },
    #[error("transfer {file_id} incomplete: {received} of {total} chunks received")]
    Incomplete {
        file_id: String,
        received: usize,
        total: usize,
    },
}
