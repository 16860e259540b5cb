//! Property tests for offsets, chunks and record codecs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Cursor;

use binrw::BinRead;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use sqpack_formats::chunk::{CHUNK_ALIGNMENT, CHUNK_HEADER_SIZE, ChunkHeader};
use sqpack_formats::record::{LodBuffers, MeshMetadata};
use sqpack_formats::{
    DatOffset, GenericRecord, MAX_CHUNK_SIZE, MeshRecord, RecordFormat, TextureRecord,
    compress_chunk, compress_stream, decompress_chunks,
};

fn stream_round_trip(data: &[u8]) -> Vec<u8> {
    let chunks = compress_stream(data, MAX_CHUNK_SIZE).expect("compress");
    let joined = chunks.concat();
    decompress_chunks(&mut Cursor::new(&joined), chunks.len(), 0).expect("decompress")
}

fn mixed_bytes(len: usize) -> Vec<u8> {
    // Half compressible runs, half noise
    let mut state = 0x9E37_79B9_u32;
    (0..len)
        .map(|i| {
            if (i / 4096) % 2 == 0 {
                (i / 64) as u8
            } else {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            }
        })
        .collect()
}

#[test]
fn stream_round_trip_at_boundaries() {
    for len in [0, 1, 15_999, 16_000, 16_001, 32_000, 1_000_000] {
        let data = mixed_bytes(len);
        assert_eq!(stream_round_trip(&data), data, "length {len}");
    }
}

#[test]
fn every_chunk_is_padded_and_bounded() {
    let data = mixed_bytes(100_000);
    for chunk in compress_stream(&data, MAX_CHUNK_SIZE).expect("compress") {
        assert_eq!(chunk.len() % CHUNK_ALIGNMENT, 0);

        let header = ChunkHeader::read_le(&mut Cursor::new(&chunk)).expect("chunk header");
        assert!(header.uncompressed_size as usize <= MAX_CHUNK_SIZE);
        let used = CHUNK_HEADER_SIZE + header.payload_len();
        assert!(chunk[used..].iter().all(|&b| b == 0));
    }
}

#[test]
fn mesh_and_texture_round_trip() {
    let texture = TextureRecord::new(vec![0x10; 80], vec![mixed_bytes(20_000), mixed_bytes(5000)]);
    let bytes = texture.to_bytes().expect("encode");
    assert_eq!(TextureRecord::from_bytes(&bytes).expect("decode"), texture);

    let mesh = MeshRecord {
        meta: MeshMetadata {
            version: 5,
            mesh_count: 1,
            material_count: 1,
            lod_count: 1,
            ..MeshMetadata::default()
        },
        metadata: mixed_bytes(300),
        lods: [
            LodBuffers {
                vertex: mixed_bytes(40_000),
                edge: Vec::new(),
                index: mixed_bytes(9000),
            },
            LodBuffers::default(),
            LodBuffers::default(),
        ],
    };
    let bytes = mesh.to_bytes().expect("encode");
    assert_eq!(MeshRecord::from_bytes(&bytes).expect("decode"), mesh);
}

proptest! {
    /// Packing then unpacking returns the inputs for every packable position
    #[test]
    fn offset_pack_unpack_inverse(container in 0u8..=7, units in 1u64..(1 << 28)) {
        let position = units * 128;
        let offset = DatOffset::pack(container, position)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(offset.raw() % 8, 0);
        prop_assert_eq!(
            offset.unpack().map_err(|e| TestCaseError::fail(e.to_string()))?,
            (container, position)
        );
    }

    /// Single chunks round-trip and stay padded
    #[test]
    fn chunk_round_trip(data in prop::collection::vec(any::<u8>(), 0..=MAX_CHUNK_SIZE)) {
        let chunk = compress_chunk(&data).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(chunk.len() % CHUNK_ALIGNMENT, 0);
        let decoded = decompress_chunks(&mut Cursor::new(&chunk), 1, 0)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded, data);
    }

    /// Generic records decode back to their payload
    #[test]
    fn generic_record_round_trip(data in prop::collection::vec(any::<u8>(), 0..50_000)) {
        let record = GenericRecord::new(data);
        let bytes = record.to_bytes().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(bytes.len() % CHUNK_ALIGNMENT, 0);
        let decoded = GenericRecord::from_bytes(&bytes)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(decoded, record);
    }
}
