use std::sync::Arc;
use std::thread;

use knownface::{Embedding, Gallery, GalleryStore, Matcher, Recognition};

fn emb(values: &[f32]) -> Embedding {
    Embedding::from_vec(values.to_vec())
}

#[test]
fn concurrent_adds_are_not_lost() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(GalleryStore::new(dir.path().join("known_faces.bin")));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    let name = format!("person-{}-{}", t, i);
                    store.add(&name, emb(&[t as f32, i as f32])).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let gallery = store.load();
    assert_eq!(gallery.len(), 80);
    assert_eq!(gallery["person-3-7"], emb(&[3.0, 7.0]));
}

#[test]
fn concurrent_renames_and_adds() {
    let dir = tempfile::tempdir().unwrap();
    let store = GalleryStore::new(dir.path().join("known_faces.bin"));
    for i in 0..20 {
        store.add(&format!("old-{}", i), emb(&[i as f32])).unwrap();
    }

    let renamer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..20 {
                assert!(store
                    .rename(&format!("old-{}", i), &format!("new-{}", i))
                    .unwrap());
            }
        })
    };
    let adder = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..20 {
                store.add(&format!("extra-{}", i), emb(&[100.0 + i as f32])).unwrap();
            }
        })
    };
    renamer.join().unwrap();
    adder.join().unwrap();

    let gallery = store.load();
    assert_eq!(gallery.len(), 40);
    assert!(gallery.keys().all(|k| !k.starts_with("old-")));
    assert_eq!(gallery["new-5"], emb(&[5.0]));
}

#[test]
fn persisted_gallery_drives_matching() {
    let dir = tempfile::tempdir().unwrap();
    let store = GalleryStore::new(dir.path().join("known_faces.bin"));
    let matcher = Matcher::default();

    assert_eq!(
        matcher.recognize(&store.load(), &emb(&[0.0, 0.0])),
        Recognition::EmptyGallery
    );

    store.add("Alice", emb(&[0.1, 0.2])).unwrap();
    store.add("Bob", emb(&[0.9, 0.8])).unwrap();

    let first = store.load();
    let second = store.load();
    assert_eq!(first, second);

    let r = matcher.recognize(&first, &emb(&[0.1, 0.32]));
    assert_eq!(r.label(), "Alice");
    assert!((r.confidence() - 0.88).abs() < 1e-4);

    assert_eq!(
        matcher.recognize(&first, &emb(&[-0.6, 0.2])),
        Recognition::Unknown
    );
}

#[test]
fn corrupt_store_recovers_on_next_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("known_faces.bin");
    std::fs::write(&path, b"\x00\x01garbage\xff").unwrap();

    let store = GalleryStore::new(&path);
    assert_eq!(store.load(), Gallery::new());

    store.add("Alice", emb(&[1.0, 2.0])).unwrap();
    assert_eq!(store.names(), vec!["Alice".to_string()]);
}
