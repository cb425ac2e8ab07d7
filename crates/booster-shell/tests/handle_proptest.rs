//! Property tests: arbitrary tokens never reach a shell they do not name.

use proptest::prelude::*;

use booster_shell::{BoosterHandle, ErrorCode, HandleRegistry, HandleTag};

proptest! {
    #[test]
    fn arbitrary_tokens_never_panic(raw in any::<u64>(), n_live in 0usize..8) {
        let mut registry = HandleRegistry::new();
        let live: Vec<_> = (0..n_live).map(|_| registry.create()).collect();
        let handle = BoosterHandle::from_raw(raw);

        let tag = registry.status(handle);
        if live.contains(&handle) {
            prop_assert_eq!(tag, HandleTag::Live);
        } else {
            prop_assert_ne!(tag, HandleTag::Live);
            let result = registry.fill_allocations(handle);
            prop_assert_eq!(ErrorCode::from_result(&result), ErrorCode::InvalidHandle);
            prop_assert!(registry.free(handle).is_err());
        }
        prop_assert_eq!(registry.len(), n_live);
    }

    #[test]
    fn freed_handles_stay_freed_across_reuse(rounds in 1usize..20) {
        let mut registry = HandleRegistry::new();
        let mut stale = Vec::new();
        for _ in 0..rounds {
            let h = registry.create();
            registry.free(h).unwrap();
            stale.push(h);
        }
        let current = registry.create();
        for h in stale {
            prop_assert_eq!(registry.status(h), HandleTag::Freed);
        }
        prop_assert_eq!(registry.status(current), HandleTag::Live);
    }
}
