#![no_main]
use hambits::{BlockPerm, LinearScan, SimpleIndex, TriangleIndex};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (Vec<u64>, u64, u8, u8)| {
    let (keys, q, errors_raw, id_raw) = data;
    if keys.len() > 4096 {
        return;
    }
    let errors = errors_raw % 4;
    let perm = BlockPerm::new(4, 3, id_raw % 4);

    let simple = SimpleIndex::build(perm, &keys);
    let triangle = TriangleIndex::build(perm, &keys);
    let exhaustive = LinearScan::new(&keys).search(q, errors);

    let sr = simple.search(q, errors);
    let tr = triangle.search(q, errors);

    assert!(sr.candidates >= sr.matches.len() as u64);
    assert!(tr.candidates >= tr.matches.len() as u64);
    assert_eq!(simple.count_candidates(q, errors), sr.candidates);
    assert_eq!(triangle.count_candidates(q, errors), tr.candidates);

    // Every reported match really is within the error bound, and nothing
    // the triangle index reports escapes the exhaustive scan.
    let mut pool = exhaustive.matches.clone();
    for m in sr.matches.iter().chain(tr.matches.iter()) {
        assert!((m ^ q).count_ones() <= u32::from(errors));
    }
    for m in &tr.matches {
        let pos = pool.iter().position(|y| y == m).expect("match not in corpus");
        pool.swap_remove(pos);
    }

    // The simple variant's matches are a sub-multiset of the triangle's.
    let mut pool = tr.matches.clone();
    for m in &sr.matches {
        let pos = pool.iter().position(|y| y == m).expect("simple exceeded triangle");
        pool.swap_remove(pos);
    }

    // Round trips answer identically.
    let loaded = SimpleIndex::from_bytes(&simple.to_bytes()).unwrap();
    let lr = loaded.search(q, errors);
    assert_eq!(lr.matches, sr.matches);
    assert_eq!(lr.candidates, sr.candidates);

    let loaded = TriangleIndex::from_bytes(&triangle.to_bytes()).unwrap();
    let lr = loaded.search(q, errors);
    assert_eq!(lr.matches, tr.matches);
    assert_eq!(lr.candidates, tr.candidates);
});
