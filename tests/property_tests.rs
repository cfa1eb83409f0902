//! Property-based tests for Skiff
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Election Properties
// ============================================================================

mod election_properties {
    use super::*;
    use skiff_core::{Role, elect};

    proptest! {
        /// Exactly one side of a distinct pair initiates
        #[test]
        fn exactly_one_initiator(a in "[a-z0-9]{1,16}", b in "[a-z0-9]{1,16}") {
            prop_assume!(a != b);
            prop_assert_ne!(elect(&a, &b), elect(&b, &a));
            prop_assert_ne!(Role::elect(&a, &b), Role::elect(&b, &a));
        }

        /// Nobody initiates towards itself
        #[test]
        fn never_initiates_to_self(a in "[a-z0-9]{1,16}") {
            prop_assert!(!elect(&a, &a));
        }
    }
}

// ============================================================================
// Chunking Properties
// ============================================================================

mod chunk_properties {
    use super::*;
    use skiff_files::{CHUNK_SIZE, FileChunker};

    proptest! {
        /// Chunks cover the file exactly; only the last may be short
        #[test]
        fn chunk_lengths_cover_file(size in 0u64..(8 * CHUNK_SIZE as u64), chunk_size in 1usize..=CHUNK_SIZE) {
            let chunker = FileChunker::with_chunk_size(chunk_size);
            let lengths: Vec<usize> = chunker.chunk_lengths(size).collect();

            prop_assert_eq!(lengths.len() as u64, chunker.chunk_count(size));
            prop_assert_eq!(lengths.iter().map(|&l| l as u64).sum::<u64>(), size);
            if let Some((last, full)) = lengths.split_last() {
                prop_assert!(full.iter().all(|&l| l == chunk_size));
                prop_assert!(*last >= 1 && *last <= chunk_size);
            }
        }

        /// Oversized chunk sizes are capped at 64 KiB
        #[test]
        fn chunk_size_capped(chunk_size in 1usize..(4 * CHUNK_SIZE)) {
            let chunker = FileChunker::with_chunk_size(chunk_size);
            prop_assert!(chunker.chunk_size() <= CHUNK_SIZE);
            prop_assert!(chunker.chunk_size() >= 1);
        }
    }
}

// ============================================================================
// Transfer Session Properties
// ============================================================================

mod session_properties {
    use super::*;
    use skiff_files::{FileChunker, Frame, OutgoingFile, OutgoingTransfer, Reassembler};

    proptest! {
        /// Sender progress never decreases and ends at 100
        #[test]
        fn progress_is_monotone(size in 1u64..500_000, chunk_size in 1024usize..=65_536) {
            let file = OutgoingFile::from_bytes("p.bin", "application/octet-stream", vec![0u8; size as usize]);
            let mut session = OutgoingTransfer::new(&file);

            let mut last = 0.0;
            for len in FileChunker::with_chunk_size(chunk_size).chunk_lengths(size) {
                let progress = session.record_chunk(len);
                prop_assert!(progress >= last);
                prop_assert!(progress <= 100.0);
                last = progress;
            }
            prop_assert_eq!(last, 100.0);
            prop_assert!(session.is_finished());
        }

        /// The receiver rebuilds exactly the bytes that were sent
        #[test]
        fn reassembly_is_exact(data in prop::collection::vec(any::<u8>(), 0..200_000), chunk_size in 1024usize..=65_536) {
            let file = OutgoingFile::from_bytes("r.bin", "application/octet-stream", data.clone());
            let session = OutgoingTransfer::new(&file);
            let mut reassembler = Reassembler::new();

            let mut delivered = reassembler.handle(Frame::Metadata(session.metadata().clone()));
            for chunk in data.chunks(FileChunker::with_chunk_size(chunk_size).chunk_size()) {
                prop_assert!(delivered.is_none());
                delivered = reassembler.handle(Frame::Chunk(chunk.to_vec()));
            }

            let received = delivered.expect("file completes on its last chunk");
            prop_assert_eq!(received.size, data.len() as u64);
            prop_assert_eq!(received.payload, data);
            prop_assert!(reassembler.in_progress().is_none());
        }
    }
}
