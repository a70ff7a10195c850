mod common;

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use common::{FakeEmbedder, long_text, open_manager, rewrite, touch, write};
use docweave::{
    Error,
    FlatIndex,
    Manifest,
    VectorIndex,
    config::FusionWeights,
    keyword_index::KeywordIndex,
    manager::{CleanupOutcome, IndexAction},
    search::HybridRetriever,
    slot::IndexSlot,
};

fn docs_with(files: &[(&str, &str)]) -> tempfile::TempDir {
    let docs = tempfile::tempdir().unwrap();
    for (name, content) in files {
        write(docs.path(), name, content);
    }
    docs
}

fn chunks_from(index: &FlatIndex, source: &str) -> usize {
    index
        .live_chunks()
        .iter()
        .filter(|c| c.source_file == Path::new(source))
        .count()
}

fn slot_dir(data: &Path, docs: &Path) -> PathBuf {
    let slot = IndexSlot::for_directory(&docs.canonicalize().unwrap());
    data.join("indices").join(slot.as_str())
}

#[test]
fn second_call_without_changes_reuses_index() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[
        ("a.md", &long_text("alpha", 4)),
        ("notes/b.txt", "beta gamma"),
    ]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);

    let first = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(first.action, IndexAction::Rebuilt);
    assert_eq!(first.modified_files.len(), 2);
    assert!(first.document_count > 2);

    let embedded = embedder.embedded();
    let second = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(second.action, IndexAction::Reused);
    assert!(second.modified_files.is_empty());
    assert_eq!(second.document_count, first.document_count);
    assert_eq!(embedder.embedded(), embedded);
}

#[test]
fn state_survives_a_new_manager() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "persistent content")]);
    let embedder = FakeEmbedder::new("fake-a");

    let first = open_manager(data.path(), &embedder)
        .get_or_create_index(docs.path(), false)
        .unwrap();
    let again = open_manager(data.path(), &embedder)
        .get_or_create_index(docs.path(), false)
        .unwrap();

    assert_eq!(again.action, IndexAction::Reused);
    assert_eq!(again.document_count, first.document_count);
    assert_eq!(again.index.live_chunks(), first.index.live_chunks());
}

#[test]
fn fingerprint_change_rebuilds_every_directory() {
    let data = tempfile::tempdir().unwrap();
    let docs_a = docs_with(&[("a.md", "first directory")]);
    let docs_b = docs_with(&[("b.md", "second directory")]);

    let old = FakeEmbedder::new("model-old");
    let manager = open_manager(data.path(), &old);
    manager.get_or_create_index(docs_a.path(), false).unwrap();
    manager.get_or_create_index(docs_b.path(), false).unwrap();
    let old_fingerprint = manager.fingerprint().to_string();
    drop(manager);

    let new = FakeEmbedder::new("model-new");
    let manager = open_manager(data.path(), &new);
    assert_ne!(manager.fingerprint(), old_fingerprint);

    // The new fingerprint is persisted before any rebuild runs.
    let on_disk = Manifest::load(&data.path().join("index_manifest.json"));
    assert_eq!(on_disk.config_fingerprint, manager.fingerprint());
    assert_eq!(on_disk.embedding_model, "model-new");
    assert_eq!(on_disk.directories.len(), 2);
    assert!(on_disk.directories.values().all(|e| e.stale));

    for docs in [&docs_a, &docs_b] {
        let outcome = manager.get_or_create_index(docs.path(), false).unwrap();
        assert_eq!(outcome.action, IndexAction::Rebuilt);
    }
    drop(manager);

    // Restarting with the same configuration does not rebuild again.
    let manager = open_manager(data.path(), &new);
    for docs in [&docs_a, &docs_b] {
        let outcome = manager.get_or_create_index(docs.path(), false).unwrap();
        assert_eq!(outcome.action, IndexAction::Reused);
    }
}

#[test]
fn touching_one_file_reembeds_only_that_file() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[
        ("a.md", &long_text("apples", 5)),
        ("b.md", &long_text("bananas", 5)),
        ("c.md", &long_text("cherries", 5)),
    ]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);

    let first = manager.get_or_create_index(docs.path(), false).unwrap();
    let b_chunks = chunks_from(&first.index, "b.md");
    assert!(b_chunks > 1);

    touch(docs.path(), "b.md");
    let embedded = embedder.embedded();
    let second = manager.get_or_create_index(docs.path(), false).unwrap();

    assert_eq!(second.action, IndexAction::Updated);
    assert_eq!(second.modified_files, vec![PathBuf::from("b.md")]);
    assert_eq!(embedder.embedded() - embedded, b_chunks);
    assert_eq!(second.index.len(), first.index.len() + b_chunks);
    assert_eq!(second.document_count, first.document_count);
    assert_eq!(chunks_from(&second.index, "b.md"), b_chunks);

    let third = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(third.action, IndexAction::Reused);
}

#[test]
fn modified_content_replaces_old_chunks() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "old wording here"), ("b.md", "untouched")]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    manager.get_or_create_index(docs.path(), false).unwrap();

    rewrite(docs.path(), "a.md", "new wording here");
    let outcome = manager.get_or_create_index(docs.path(), false).unwrap();

    let contents: Vec<String> = outcome
        .index
        .live_chunks()
        .into_iter()
        .map(|c| c.content)
        .collect();
    assert!(contents.contains(&"new wording here".to_string()));
    assert!(!contents.contains(&"old wording here".to_string()));

    let hits = outcome
        .index
        .search(&FakeEmbedder::vector("old wording here"), 10)
        .unwrap();
    assert!(hits.iter().all(|(c, _)| c.content != "old wording here"));
}

#[test]
fn deleted_file_is_removed_from_index_and_manifest() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("keep.md", "keep me"), ("gone.md", "delete me")]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    let first = manager.get_or_create_index(docs.path(), false).unwrap();

    std::fs::remove_file(docs.path().join("gone.md")).unwrap();
    let second = manager.get_or_create_index(docs.path(), false).unwrap();

    assert_eq!(second.action, IndexAction::Updated);
    assert!(second.modified_files.is_empty());
    assert_eq!(second.removed_files, vec![PathBuf::from("gone.md")]);
    assert_eq!(second.document_count, first.document_count - 1);
    assert_eq!(chunks_from(&second.index, "gone.md"), 0);

    let manifest = manager.manifest();
    let entry = manifest.directories.values().next().unwrap();
    assert!(!entry.last_indexed_per_file.contains_key("gone.md"));
    assert_eq!(entry.document_count, second.document_count);
}

#[test]
fn empty_index_search_returns_nothing() {
    let index = FlatIndex::create_from_chunks(common::DIMENSION, Vec::new()).unwrap();
    assert!(index.search(&FakeEmbedder::vector("q"), 5).unwrap().is_empty());

    let dir = tempfile::tempdir().unwrap();
    index.save(dir.path()).unwrap();
    let loaded = FlatIndex::load(dir.path()).unwrap();
    assert!(loaded.search(&FakeEmbedder::vector("q"), 5).unwrap().is_empty());
}

#[test]
fn pure_vector_weights_reproduce_dense_ranking() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[
        ("rust.md", "rust ownership borrowing lifetimes"),
        ("go.md", "go goroutines channels"),
        ("py.md", "python generators decorators"),
        ("mixed.md", "rust channels and python decorators"),
    ]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    let outcome = manager.get_or_create_index(docs.path(), false).unwrap();

    let query = "rust channels";
    let dense: Vec<PathBuf> = outcome
        .index
        .search(&FakeEmbedder::vector(query), 4)
        .unwrap()
        .into_iter()
        .map(|(c, _)| c.source_file)
        .collect();

    let retriever =
        HybridRetriever::new(embedder.clone(), FusionWeights::new(1.0, 0.0)).unwrap();
    let fused: Vec<PathBuf> = retriever
        .retrieve(query, &outcome.index, &outcome.index.live_chunks(), 4)
        .unwrap()
        .into_iter()
        .map(|r| r.chunk.source_file)
        .collect();

    assert_eq!(fused, dense);
}

#[test]
fn keyword_scorer_ranks_matching_chunk_only() {
    let chunks = vec![
        docweave::Chunk::new("the cat sat", "one.md"),
        docweave::Chunk::new("the dog ran", "two.md"),
    ];
    let scores = KeywordIndex::build(&chunks).unwrap().score("cat").unwrap();

    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].0.content, "the cat sat");
    assert!(scores[0].1 > 0.0);
}

#[test]
fn deleted_artifact_triggers_full_rebuild() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "some text"), ("b.md", "more text")]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    let first = manager.get_or_create_index(docs.path(), false).unwrap();

    std::fs::remove_dir_all(slot_dir(data.path(), docs.path())).unwrap();
    let second = manager.get_or_create_index(docs.path(), false).unwrap();

    assert_eq!(second.action, IndexAction::Rebuilt);
    assert_eq!(second.document_count, first.document_count);
    assert!(FlatIndex::exists(&slot_dir(data.path(), docs.path())));
}

#[test]
fn corrupt_artifact_is_rebuilt_once() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "some text")]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    let first = manager.get_or_create_index(docs.path(), false).unwrap();

    let artifact = FlatIndex::artifact_path(&slot_dir(data.path(), docs.path()));
    std::fs::write(&artifact, b"definitely not a database").unwrap();

    let second = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(second.action, IndexAction::Rebuilt);
    assert_eq!(second.document_count, first.document_count);

    let third = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(third.action, IndexAction::Reused);
}

#[test]
fn hand_deleted_manifest_triggers_rebuild() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "some text")]);
    let embedder = FakeEmbedder::new("fake-a");
    open_manager(data.path(), &embedder)
        .get_or_create_index(docs.path(), false)
        .unwrap();

    std::fs::remove_file(data.path().join("index_manifest.json")).unwrap();
    let outcome = open_manager(data.path(), &embedder)
        .get_or_create_index(docs.path(), false)
        .unwrap();
    assert_eq!(outcome.action, IndexAction::Rebuilt);
    assert_eq!(outcome.document_count, 1);
}

#[test]
fn embedding_failure_keeps_previous_state() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "stable text"), ("b.md", "will change")]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    let first = manager.get_or_create_index(docs.path(), false).unwrap();
    let manifest_before = manager.manifest();

    rewrite(docs.path(), "b.md", "changed text");
    embedder.set_failing(true);
    let err = manager.get_or_create_index(docs.path(), false).unwrap_err();
    assert!(matches!(err, Error::EmbeddingProvider(_)));
    assert_eq!(manager.manifest(), manifest_before);
    assert_eq!(
        Manifest::load(&data.path().join("index_manifest.json")),
        manifest_before
    );

    let on_disk = FlatIndex::load(&slot_dir(data.path(), docs.path())).unwrap();
    assert_eq!(on_disk.len(), first.index.len());

    embedder.set_failing(false);
    let retry = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(retry.action, IndexAction::Updated);
    assert_eq!(retry.modified_files, vec![PathBuf::from("b.md")]);
}

#[test]
fn forced_rebuild_drops_retired_entries() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "text one"), ("b.md", "text two")]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    manager.get_or_create_index(docs.path(), false).unwrap();

    touch(docs.path(), "a.md");
    let updated = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(updated.index.len(), 3);

    let rebuilt = manager.get_or_create_index(docs.path(), true).unwrap();
    assert_eq!(rebuilt.action, IndexAction::Rebuilt);
    assert_eq!(rebuilt.index.len(), 2);
    assert_eq!(rebuilt.document_count, 2);
}

#[test]
fn concurrent_directories_keep_independent_entries() {
    let data = tempfile::tempdir().unwrap();
    let docs_a = docs_with(&[("a1.md", "first"), ("a2.md", "second")]);
    let docs_b = docs_with(&[("b1.md", &long_text("bees", 6))]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| manager.get_or_create_index(docs_a.path(), false));
        let b = s.spawn(|| manager.get_or_create_index(docs_b.path(), false));
        (a.join().unwrap().unwrap(), b.join().unwrap().unwrap())
    });

    let manifest = Manifest::load(&data.path().join("index_manifest.json"));
    assert_eq!(manifest.directories.len(), 2);

    let key_a = docs_a.path().canonicalize().unwrap().to_string_lossy().into_owned();
    let key_b = docs_b.path().canonicalize().unwrap().to_string_lossy().into_owned();
    let entry_a = &manifest.directories[&key_a];
    let entry_b = &manifest.directories[&key_b];

    assert_eq!(
        entry_a.last_indexed_per_file.keys().collect::<Vec<_>>(),
        vec!["a1.md", "a2.md"]
    );
    assert_eq!(
        entry_b.last_indexed_per_file.keys().collect::<Vec<_>>(),
        vec!["b1.md"]
    );
    assert_eq!(entry_a.document_count, a.document_count);
    assert_eq!(entry_b.document_count, b.document_count);
    assert_ne!(entry_a.index_location, entry_b.index_location);
}

#[test]
fn cleanup_removes_expired_indexes_once_per_day() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[("a.md", "text")]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = open_manager(data.path(), &embedder);
    manager.get_or_create_index(docs.path(), false).unwrap();

    let orphan = data.path().join("indices").join("index_00000000ff");
    std::fs::create_dir_all(&orphan).unwrap();

    let now = Utc::now();
    match manager.cleanup_at(now, false).unwrap() {
        CleanupOutcome::Ran(report) => {
            assert!(report.removed_directories.is_empty());
            assert!(report.removed_orphans.is_empty());
        }
        other => panic!("expected cleanup to run, got {other:?}"),
    }
    assert!(matches!(
        manager.cleanup_at(now, false).unwrap(),
        CleanupOutcome::Skipped { .. }
    ));

    let later = now + Duration::days(31);
    match manager.cleanup_at(later, false).unwrap() {
        CleanupOutcome::Ran(report) => {
            assert_eq!(
                report.removed_directories,
                vec![docs.path().canonicalize().unwrap()]
            );
            assert_eq!(report.removed_orphans, vec![orphan.clone()]);
        }
        other => panic!("expected cleanup to run, got {other:?}"),
    }
    assert!(manager.status().is_empty());
    assert!(!orphan.exists());
    assert!(!slot_dir(data.path(), docs.path()).exists());
}

#[test]
fn ignored_and_binary_files_are_not_indexed() {
    let data = tempfile::tempdir().unwrap();
    let docs = docs_with(&[
        ("src/lib.rs", "fn main() {}"),
        ("node_modules/pkg/index.js", "module.exports = 1"),
        ("image.png", "not really a png"),
        (".hidden.md", "secret"),
        ("scratch/tmp.md", "scratch notes"),
    ]);
    let embedder = FakeEmbedder::new("fake-a");
    let manager = docweave::IndexManager::<FlatIndex>::open(
        docweave::DataDir::resolve(Some(data.path())).unwrap(),
        embedder.clone(),
        docweave::config::IndexerConfig {
            extra_ignore: vec!["scratch/**".into()],
            ..common::small_chunks()
        },
    )
    .unwrap();

    let outcome = manager.get_or_create_index(docs.path(), false).unwrap();
    assert_eq!(outcome.modified_files, vec![PathBuf::from("src/lib.rs")]);
}
