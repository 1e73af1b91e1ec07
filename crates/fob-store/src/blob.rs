//! Blob chunking and reassembly.
//!
//! A blob's on-wire payload is scattered over one head chunk and as many
//! body chunks as needed; the head chunk pays extra overhead for the blob
//! metadata, so its capacity depends on the name length.

use fob_proto::StoreParams;

use crate::StoreImage;

/// Number of chunks needed to hold `payload_len` payload bytes.
///
/// Always at least one: even an empty blob owns a head chunk.
pub fn chunk_count(params: &StoreParams, name_len: usize, payload_len: usize) -> usize {
    let head = params.head_capacity(name_len);
    if payload_len <= head {
        1
    } else {
        1 + (payload_len - head).div_ceil(params.body_capacity())
    }
}

/// Splits `payload` into the per-chunk slices for a `count`-chunk chain.
///
/// The head slice comes first. Every slice fills its chunk's capacity except
/// possibly the last.
pub fn split_payload<'a>(
    params: &StoreParams,
    name_len: usize,
    payload: &'a [u8],
    count: usize,
) -> Vec<&'a [u8]> {
    let mut slices = Vec::with_capacity(count);
    let mut offset = payload.len().min(params.head_capacity(name_len));
    slices.push(&payload[..offset]);

    for _ in 1..count {
        let end = payload.len().min(offset + params.body_capacity());
        slices.push(&payload[offset..end]);
        offset = end;
    }
    slices
}

/// Concatenates the chain's chunk payloads and trims the zero padding,
/// yielding the blob's on-wire payload.
pub fn assemble(image: &StoreImage, head: usize) -> Vec<u8> {
    let stored_size = image
        .record(head)
        .meta()
        .map(|meta| meta.stored_size as usize)
        .unwrap_or(0);

    let mut payload = Vec::with_capacity(stored_size);
    for index in image.chain_indices(head) {
        if let Some(chunk) = image.record(index).payload() {
            payload.extend_from_slice(chunk);
        }
    }
    payload.truncate(stored_size);
    payload
}
