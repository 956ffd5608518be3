//! Round-trip law for the delta codec: applying a generated delta to the
//! previous content always reproduces the new content exactly.

use std::io::Cursor;

use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

use delta::{FileSignature, apply_delta, generate_delta, metadata_digest};

fn signature_of(data: &[u8]) -> FileSignature {
    let meta = metadata_digest(0o100644, 1000, 1000, data.len() as u64, 1_700_000_000, None);
    FileSignature::generate(Cursor::new(data), data.len() as u64, meta).expect("signature")
}

fn round_trip(prev: &[u8], new: &[u8]) -> Vec<u8> {
    let sig = signature_of(prev);
    let mut encoded = Vec::new();
    generate_delta(&sig, Cursor::new(new), new.len() as u64, &mut encoded).expect("generate");
    let mut rebuilt = Vec::new();
    apply_delta(prev, &encoded, &mut rebuilt).expect("apply");
    rebuilt
}

#[test]
fn identical_content_round_trips_as_copies() {
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let sig = signature_of(&data);
    let mut encoded = Vec::new();
    generate_delta(&sig, Cursor::new(&data), data.len() as u64, &mut encoded).expect("generate");

    // Unchanged content should compress to almost nothing: a header plus a
    // handful of coalesced copy references.
    assert!(encoded.len() < 64, "delta was {} bytes", encoded.len());

    let mut rebuilt = Vec::new();
    apply_delta(&data, &encoded, &mut rebuilt).expect("apply");
    assert_eq!(rebuilt, data);
}

#[test]
fn append_round_trips() {
    let prev: Vec<u8> = (0..8_192u32).map(|i| (i % 17) as u8).collect();
    let mut new = prev.clone();
    new.extend_from_slice(b"appended tail that did not exist before");
    assert_eq!(round_trip(&prev, &new), new);
}

#[test]
fn prepend_round_trips() {
    let prev: Vec<u8> = (0..8_192u32).map(|i| (i % 23) as u8).collect();
    let mut new = b"inserted header".to_vec();
    new.extend_from_slice(&prev);
    assert_eq!(round_trip(&prev, &new), new);
}

#[test]
fn middle_edit_round_trips() {
    let mut rng = StdRng::seed_from_u64(7);
    let prev: Vec<u8> = (0..50_000).map(|_| rng.r#gen()).collect();
    let mut new = prev.clone();
    new.splice(20_000..20_010, b"EDITED-REGION".iter().copied());
    assert_eq!(round_trip(&prev, &new), new);
}

#[test]
fn disjoint_content_round_trips() {
    let prev = vec![0xAAu8; 4_096];
    let new = vec![0x55u8; 6_000];
    assert_eq!(round_trip(&prev, &new), new);
}

#[test]
fn empty_previous_round_trips() {
    let new = b"entirely new content".to_vec();
    assert_eq!(round_trip(&[], &new), new);
}

#[test]
fn empty_new_round_trips() {
    let prev = b"content that disappears".to_vec();
    assert_eq!(round_trip(&prev, &[]), Vec::<u8>::new());
}

#[test]
fn both_empty_round_trips() {
    assert_eq!(round_trip(&[], &[]), Vec::<u8>::new());
}

#[test]
fn block_shuffle_round_trips() {
    // Swap two distant regions so copies must reference out-of-order blocks.
    let mut rng = StdRng::seed_from_u64(99);
    let prev: Vec<u8> = (0..40_960).map(|_| rng.r#gen()).collect();
    let mut new = Vec::with_capacity(prev.len());
    new.extend_from_slice(&prev[20_480..]);
    new.extend_from_slice(&prev[..20_480]);
    assert_eq!(round_trip(&prev, &new), new);
}

#[test]
fn short_tail_block_is_reused() {
    // Length chosen so the final block is partial; the tail must match as a
    // copy rather than being re-sent literally.
    let mut rng = StdRng::seed_from_u64(3);
    let prev: Vec<u8> = (0..10_000).map(|_| rng.r#gen()).collect();
    let mut new = b"prefix".to_vec();
    new.extend_from_slice(&prev);
    let sig = signature_of(&prev);
    let mut encoded = Vec::new();
    generate_delta(&sig, Cursor::new(&new), new.len() as u64, &mut encoded).expect("generate");
    // Everything except the prefix should arrive as copies.
    assert!(encoded.len() < 256, "delta was {} bytes", encoded.len());
    let mut rebuilt = Vec::new();
    apply_delta(&prev, &encoded, &mut rebuilt).expect("apply");
    assert_eq!(rebuilt, new);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn round_trip_law(
        prev in proptest::collection::vec(any::<u8>(), 0..20_000),
        new in proptest::collection::vec(any::<u8>(), 0..20_000),
    ) {
        prop_assert_eq!(round_trip(&prev, &new), new);
    }

    #[test]
    fn round_trip_law_on_related_content(
        base in proptest::collection::vec(any::<u8>(), 1024..16_384),
        edit_at in 0usize..1024,
        edit in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let prev = base.clone();
        let mut new = base;
        let at = edit_at.min(new.len());
        new.splice(at..at, edit);
        prop_assert_eq!(round_trip(&prev, &new), new);
    }
}
