#![no_main]

use libfuzzer_sys::fuzz_target;
use metacache_core::{Dialect, IdentifierRules, NameRules};

const DIALECTS: [Dialect; 4] = [
    Dialect::Postgres,
    Dialect::Mysql,
    Dialect::Mssql,
    Dialect::Snowflake,
];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(name) = std::str::from_utf8(rest) else {
        return;
    };
    let rules = IdentifierRules::new(DIALECTS[selector as usize % DIALECTS.len()]);

    let key = rules.lookup_key(name);
    // folding is idempotent
    assert_eq!(rules.fold_case(&key), key.as_str());
    let _ = rules.names_match(name, &key);
});
