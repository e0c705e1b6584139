//! Property coverage for the access-granularity rules.
//!
//! Every size argument must be a positive multiple of the region
//! alignment, and every address must be aligned. Violations are rejected
//! up front and never corrupt committed state.

use proptest::prelude::*;
use txmem::prelude::*;

proptest! {
    /// Region creation accepts exactly the positive multiples of a
    /// power-of-two alignment. Alignments below the pointer width are
    /// clamped up to it, and the size rule applies to the clamped value.
    #[test]
    fn region_creation_enforces_the_size_rule(
        size in 0usize..4096,
        align_log in 0u32..7,
    ) {
        let requested = 1usize << align_log;
        let align = requested.max(std::mem::size_of::<*const ()>());
        let region = Region::new(size, requested);
        if size > 0 && size % align == 0 {
            prop_assert!(region.is_ok());
        } else {
            prop_assert!(matches!(region, Err(Error::InvalidArgument(_))));
        }
    }

    /// Non-power-of-two alignments are always rejected.
    #[test]
    fn region_creation_rejects_crooked_alignments(align in 1usize..256) {
        prop_assume!(!align.is_power_of_two());
        prop_assert!(matches!(
            Region::new(align * 4, align),
            Err(Error::InvalidArgument(_))
        ));
    }

    /// A misaligned or mis-sized read is refused and the transaction is
    /// doomed, but committed memory is untouched.
    #[test]
    fn bad_reads_never_corrupt_committed_state(
        offset in 0u64..64,
        len in 0usize..64,
    ) {
        let region = Region::new(64, 8).unwrap();

        // Commit a known pattern first.
        let mut seed = region.begin();
        seed.write(&[0x5A; 64], region.start()).unwrap();
        prop_assert!(seed.end());

        let addr = region.start().checked_add(offset).unwrap();
        let aligned = offset % 8 == 0 && len > 0 && len % 8 == 0;
        let in_range = offset as usize + len <= 64;

        let mut tx = region.begin();
        let mut buf = vec![0u8; len];
        let read = tx.read(addr, &mut buf);
        if aligned && in_range {
            prop_assert!(read.is_ok());
            prop_assert!(buf.iter().all(|&b| b == 0x5A));
            prop_assert!(tx.end());
        } else {
            prop_assert!(matches!(read, Err(Error::InvalidArgument(_))));
            prop_assert!(!tx.end());
        }

        // The pattern survived whatever the doomed transaction did.
        let mut check = region.begin();
        let mut all = [0u8; 64];
        check.read(region.start(), &mut all).unwrap();
        prop_assert_eq!(all, [0x5A; 64]);
        prop_assert!(check.end());
    }

    /// Aligned multi-word writes round-trip exactly, at any aligned
    /// offset and length inside the segment.
    #[test]
    fn aligned_writes_round_trip(
        word_offset in 0u64..8,
        words in proptest::collection::vec(any::<u64>(), 1..8),
    ) {
        prop_assume!(word_offset as usize + words.len() <= 8);
        let region = Region::new(64, 8).unwrap();
        let addr = region.start().checked_add(word_offset * 8).unwrap();

        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut tx = region.begin();
        tx.write(&bytes, addr).unwrap();

        // Read-your-own-writes inside the same transaction.
        let mut echo = vec![0u8; bytes.len()];
        tx.read(addr, &mut echo).unwrap();
        prop_assert_eq!(&echo, &bytes);
        prop_assert!(tx.end());

        // And after commit.
        let mut tx2 = region.begin();
        let mut out = vec![0u8; bytes.len()];
        tx2.read(addr, &mut out).unwrap();
        prop_assert_eq!(&out, &bytes);
        prop_assert!(tx2.end());
    }

    /// Allocation sizes obey the same rule as region creation.
    #[test]
    fn alloc_enforces_the_size_rule(size in 0usize..1024) {
        let region = Region::new(64, 8).unwrap();
        let mut tx = region.begin();
        let result = tx.alloc(size);
        if size > 0 && size % 8 == 0 {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
    }
}
