//! Interned singletons for the cheap runtime values.
//!
//! Canonical empties are built once on first access and shared by `Arc`
//! clone thereafter, so hot paths (empty list accumulators, defaulted string
//! fields) never reallocate. All of them are read-only at rest and safe to
//! share across threads.

use std::sync::{Arc, LazyLock};

use crate::value::{MapValue, Value};

static EMPTY_STRING: LazyLock<Arc<str>> = LazyLock::new(|| Arc::from(""));
static EMPTY_BYTES: LazyLock<Arc<[u8]>> = LazyLock::new(|| Arc::from(&[][..]));
static EMPTY_LIST: LazyLock<Arc<[Value]>> = LazyLock::new(|| Arc::from(&[][..]));
static EMPTY_MAP: LazyLock<Arc<MapValue>> = LazyLock::new(|| Arc::new(MapValue::default()));

#[must_use]
pub fn empty_string() -> Arc<str> {
    EMPTY_STRING.clone()
}

#[must_use]
pub fn empty_bytes() -> Arc<[u8]> {
    EMPTY_BYTES.clone()
}

#[must_use]
pub fn empty_list() -> Arc<[Value]> {
    EMPTY_LIST.clone()
}

#[must_use]
pub fn empty_map() -> Arc<MapValue> {
    EMPTY_MAP.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empties_are_shared() {
        assert!(Arc::ptr_eq(&empty_string(), &empty_string()));
        assert!(Arc::ptr_eq(&empty_list(), &empty_list()));
        assert!(Arc::ptr_eq(&empty_map(), &empty_map()));
        assert_eq!(empty_bytes().len(), 0);
    }
}
