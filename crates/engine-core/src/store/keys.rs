use model::core::identifiers::{DatasetId, TaskId};

/// Composite keys use big-endian integer suffixes so the natural sled
/// key order is ascending row id / chunk index within one prefix.
#[inline]
pub(crate) fn record_key(dataset: DatasetId, row_id: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(dataset.as_bytes());
    key[16..].copy_from_slice(&row_id.to_be_bytes());
    key
}

#[inline]
pub(crate) fn result_key(task: TaskId, chunk_index: u32) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..16].copy_from_slice(task.as_bytes());
    key[16..].copy_from_slice(&chunk_index.to_be_bytes());
    key
}

#[inline]
pub(crate) fn row_counter_key(dataset: DatasetId) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + 16);
    key.extend_from_slice(b"rows:");
    key.extend_from_slice(dataset.as_bytes());
    key
}

#[inline]
pub(crate) fn encode_u64(n: u64) -> [u8; 8] {
    n.to_be_bytes()
}

#[inline]
pub(crate) fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}
