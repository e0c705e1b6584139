//! End-to-end lifecycle coverage: commit visibility, abort rollback,
//! allocation and free semantics, and the non-freeable first segment.

use txmem::prelude::*;

#[test]
fn committed_write_is_visible_to_later_transactions() {
    let region = Region::new(64, 8).unwrap();

    let mut tx1 = region.begin();
    tx1.write(&0xDEAD_BEEFu64.to_le_bytes(), region.start()).unwrap();
    assert!(tx1.end());

    let mut tx2 = region.begin();
    let mut buf = [0u8; 8];
    tx2.read(region.start(), &mut buf).unwrap();
    assert_eq!(u64::from_le_bytes(buf), 0xDEAD_BEEF);
    assert!(tx2.end());
}

#[test]
fn aborted_transaction_has_no_visible_effect() {
    let region = Region::new(64, 8).unwrap();

    let mut tx = region.begin();
    tx.write(&[0xAB; 8], region.start()).unwrap();
    // A caller error dooms the transaction before commit.
    let mut bad = [0u8; 4];
    assert!(tx.read(region.start(), &mut bad).is_err());
    assert!(!tx.end());

    // Nothing leaked: the region still reads as zero, including to the
    // same thread's next transaction.
    let mut check = region.begin();
    let mut buf = [0u8; 8];
    check.read(region.start(), &mut buf).unwrap();
    assert_eq!(buf, [0u8; 8]);
    assert!(check.end());
}

#[test]
fn region_reports_its_geometry() {
    let region = Region::new(128, 16).unwrap();
    assert_eq!(region.size(), 128);
    assert_eq!(region.alignment(), 16);
    // The first segment's base is a fixed, non-null address.
    assert_ne!(region.start(), Address::NULL);
}

#[test]
fn fresh_region_reads_as_zero() {
    let region = Region::new(64, 8).unwrap();
    let mut tx = region.begin();
    let mut buf = [0u8; 64];
    tx.read(region.start(), &mut buf).unwrap();
    assert_eq!(buf, [0u8; 64]);
    assert!(tx.end());
}

#[test]
fn first_segment_free_always_fails() {
    let region = Region::new(64, 8).unwrap();
    let mut tx = region.begin();
    assert!(matches!(
        tx.free(region.start()),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!tx.end());
}

#[test]
fn exhausted_allocator_is_recoverable_within_the_transaction() {
    // Segment budget of 1: the first segment exists, every alloc fails.
    let region = Region::builder(64, 8).max_segments(1).build().unwrap();

    let mut tx = region.begin();
    let err = tx.alloc(16).unwrap_err();
    assert!(err.is_out_of_memory());
    assert!(!err.is_transaction_fatal());

    // The transaction continues and commits against existing memory.
    let mut buf = [0u8; 8];
    tx.read(region.start(), &mut buf).unwrap();
    tx.write(&[1u8; 8], region.start()).unwrap();
    assert!(tx.end());
}

#[test]
fn aborted_allocation_is_never_observable() {
    let region = Region::new(64, 8).unwrap();

    let mut tx = region.begin();
    let fresh = tx.alloc(16).unwrap();
    tx.write(&[5u8; 16], fresh).unwrap();
    // Force an abort after the allocation succeeded.
    let mut bad = [0u8; 4];
    assert!(tx.read(region.start(), &mut bad).is_err());
    assert!(!tx.end());

    // The address never names a valid segment again.
    let mut tx2 = region.begin();
    let mut buf = [0u8; 16];
    assert!(matches!(
        tx2.read(fresh, &mut buf),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!tx2.end());
}

#[test]
fn alloc_write_free_lifecycle() {
    let region = Region::new(64, 8).unwrap();

    // Allocate and publish.
    let mut tx = region.begin();
    let addr = tx.alloc(32).unwrap();
    tx.write(&[0x11; 32], addr).unwrap();
    assert!(tx.end());

    // Visible to a later transaction.
    let mut tx2 = region.begin();
    let mut buf = [0u8; 32];
    tx2.read(addr, &mut buf).unwrap();
    assert_eq!(buf, [0x11; 32]);
    // Free it in the same transaction.
    tx2.free(addr).unwrap();
    assert!(tx2.end());

    // Gone for good.
    let mut tx3 = region.begin();
    assert!(matches!(
        tx3.read(addr, &mut buf),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!tx3.end());
}

#[test]
fn aborted_free_leaves_segment_live() {
    let region = Region::new(64, 8).unwrap();

    let mut tx = region.begin();
    let addr = tx.alloc(16).unwrap();
    assert!(tx.end());

    let mut tx2 = region.begin();
    tx2.free(addr).unwrap();
    // Doom the transaction after the tentative free.
    let mut bad = [0u8; 4];
    assert!(tx2.read(region.start(), &mut bad).is_err());
    assert!(!tx2.end());

    // The tentative free was discarded; the segment is still there.
    let mut tx3 = region.begin();
    let mut buf = [0u8; 16];
    tx3.read(addr, &mut buf).unwrap();
    assert_eq!(buf, [0u8; 16]);
    assert!(tx3.end());
}

#[test]
fn no_locks_leak_across_commit_and_abort_cycles() {
    let region = Region::new(64, 8).unwrap();

    for round in 0..100u64 {
        // One committing writer.
        let mut writer = region.begin();
        writer.write(&round.to_le_bytes(), region.start()).unwrap();
        assert!(writer.end());

        // One aborting transaction (caller error).
        let mut loser = region.begin();
        let mut bad = [0u8; 4];
        let _ = loser.read(region.start(), &mut bad);
        assert!(!loser.end());
    }

    // If any lock had leaked, this would abort or hang; it must commit.
    let mut tx = region.begin();
    tx.write(&[7u8; 64], region.start()).unwrap();
    assert!(tx.end());
    assert_eq!(region.active_transactions(), 0);
}

#[test]
fn addresses_are_never_reissued() {
    let region = Region::new(64, 8).unwrap();

    let mut tx = region.begin();
    let first = tx.alloc(16).unwrap();
    assert!(tx.end());

    let mut tx2 = region.begin();
    tx2.free(first).unwrap();
    assert!(tx2.end());

    // A new allocation must not reuse the freed range.
    let mut tx3 = region.begin();
    let second = tx3.alloc(16).unwrap();
    assert_ne!(first, second);
    assert!(tx3.end());
}

#[test]
fn multiple_regions_are_independent() {
    let a = Region::new(64, 8).unwrap();
    let b = Region::new(64, 8).unwrap();

    let mut ta = a.begin();
    ta.write(&[1u8; 8], a.start()).unwrap();
    assert!(ta.end());

    let mut tb = b.begin();
    let mut buf = [0u8; 8];
    tb.read(b.start(), &mut buf).unwrap();
    assert_eq!(buf, [0u8; 8]);
    assert!(tb.end());
}
