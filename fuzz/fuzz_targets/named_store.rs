#![no_main]

use libfuzzer_sys::fuzz_target;
use metacache_core::{
    Dialect, IdentifierRules, MetadataObject, NameRules, NamedObjectStore, ObjectHandle,
};
use std::sync::Arc;

struct Object(String);

impl MetadataObject for Object {
    fn name(&self) -> &str {
        &self.0
    }
}

// Each input line is one operation: `+name` inserts, `-name` removes.
fuzz_target!(|data: &[u8]| {
    let Ok(script) = std::str::from_utf8(data) else {
        return;
    };
    let rules = Arc::new(IdentifierRules::new(Dialect::Postgres));
    let mut store = NamedObjectStore::new(rules.clone());

    for line in script.lines() {
        let mut chars = line.chars();
        let op = chars.next();
        let name = chars.as_str();
        // remote names arrive unquoted
        if rules.is_quoted_identifier(name) {
            continue;
        }
        match op {
            Some('+') => {
                let _ = store.insert(ObjectHandle::new(Object(name.to_string())));
            }
            Some('-') => {
                if let Some(handle) = store.get_by_name(name) {
                    store.remove(&handle, false);
                    assert!(handle.is_removed());
                    assert!(store.get_by_name(name).is_none());
                }
            }
            _ => {}
        }
        assert_eq!(store.iter().count(), store.len());
        for handle in store.iter() {
            assert!(store.get_by_name(&handle.name()).is_some());
        }
    }
});
