use next_cache::backend::{CacheBackend, FileBackend, Lookup, SharedMemoryBackend};
use next_cache::options::FileOptionsLayer;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn memory_add_then_load_returns_value(
        key in "[a-zA-Z0-9:_./-]{1,48}",
        value in proptest::collection::btree_map(".{0,16}", any::<i64>(), 0..8),
    ) {
        let rt = runtime();
        let loaded: Lookup<BTreeMap<String, i64>> = rt.block_on(async {
            let backend = SharedMemoryBackend::new();
            assert!(backend.add(&key, &value, None).await);
            backend.load_value(&key).await
        });
        prop_assert_eq!(loaded, Lookup::Hit(value));
    }

    #[test]
    fn file_add_then_load_returns_value(
        key in ".{1,64}",
        value in proptest::collection::vec(any::<u8>(), 0..512),
        compress in any::<bool>(),
    ) {
        prop_assume!(!key.contains('\0'));

        let rt = runtime();
        let dir = tempfile::tempdir().unwrap();
        let layer = FileOptionsLayer::default()
            .output_directory(dir.path())
            .compression(compress, 6);

        let loaded: Lookup<Vec<u8>> = rt.block_on(async {
            let backend = FileBackend::new(&layer).await.unwrap();
            assert!(backend.add(&key, &value, None).await);
            backend.load_value(&key).await
        });
        prop_assert_eq!(loaded, Lookup::Hit(value));
    }
}
