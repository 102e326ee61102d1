//! Fixed-size PCM16 audio framing.
//!
//! The broker never inspects sample values; it only validates alignment and
//! slices the raw byte stream into chunks sized for one `input_audio_buffer.append`
//! frame each.

use crate::error::{GatewayError, Result};

/// Default chunk size in bytes for one `input_audio_buffer.append` frame.
pub const DEFAULT_CHUNK_SIZE: usize = 12_288;

/// Returns true if `bytes` has a length that is a positive, even number —
/// the minimum bar for "could plausibly be PCM16 samples".
pub fn looks_like_pcm16(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.len() % 2 == 0
}

/// Split a raw PCM16 buffer into contiguous chunks of at most `chunk_size`
/// bytes, preserving order. An empty buffer yields an empty list. A
/// non-empty buffer whose length is not a multiple of 2 is rejected.
pub fn chunk(bytes: &[u8], chunk_size: usize) -> Result<Vec<Vec<u8>>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    if bytes.len() % 2 != 0 {
        return Err(GatewayError::audio(format!(
            "PCM16 buffer length {} is not a multiple of 2",
            bytes.len()
        )));
    }
    Ok(bytes.chunks(chunk_size).map(|c| c.to_vec()).collect())
}

/// Split a raw PCM16 buffer into base64-encoded chunks of at most
/// [`DEFAULT_CHUNK_SIZE`] bytes each, in order.
pub fn to_base64_chunks(bytes: &[u8], chunk_size: usize) -> Result<Vec<String>> {
    use base64::Engine;
    let encoder = base64::engine::general_purpose::STANDARD;
    Ok(chunk(bytes, chunk_size)?
        .into_iter()
        .map(|c| encoder.encode(&c))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_yields_no_chunks() {
        assert!(chunk(&[], DEFAULT_CHUNK_SIZE).unwrap().is_empty());
    }

    #[test]
    fn odd_length_buffer_is_rejected() {
        assert!(chunk(&[0, 1, 2], DEFAULT_CHUNK_SIZE).is_err());
    }

    #[test]
    fn chunks_are_contiguous_and_size_bounded() {
        let data: Vec<u8> = (0..24_577u32).map(|i| (i % 256) as u8).collect();
        let chunks = chunk(&data, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), DEFAULT_CHUNK_SIZE);
        assert_eq!(chunks[1].len(), DEFAULT_CHUNK_SIZE);
        assert_eq!(chunks[2].len(), 1);
        let reassembled: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(reassembled, data);
    }

    #[test]
    fn base64_chunks_roundtrip() {
        use base64::Engine;
        let data = vec![0u8, 1, 2, 3, 4, 5];
        let encoded = to_base64_chunks(&data, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(encoded.len(), 1);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&encoded[0])
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn looks_like_pcm16_rejects_empty_and_odd() {
        assert!(!looks_like_pcm16(&[]));
        assert!(!looks_like_pcm16(&[0]));
        assert!(looks_like_pcm16(&[0, 0]));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn chunking_preserves_bytes_and_chunk_bounds(data in proptest::collection::vec(any::<u8>(), 0..20_000)) {
            let data = if data.len() % 2 == 1 {
                let mut d = data;
                d.push(0);
                d
            } else {
                data
            };
            let chunks = chunk(&data, DEFAULT_CHUNK_SIZE).unwrap();
            let reassembled: Vec<u8> = chunks.iter().cloned().flatten().collect();
            prop_assert_eq!(reassembled, data);
            for (i, c) in chunks.iter().enumerate() {
                if i + 1 < chunks.len() {
                    prop_assert_eq!(c.len(), DEFAULT_CHUNK_SIZE);
                } else {
                    prop_assert!(c.len() <= DEFAULT_CHUNK_SIZE);
                }
            }
        }
    }
}
