//! Process-wide cache of compiled models.
//!
//! Keyed by `(graph identity, target name)`. Rewrites always mint a new
//! graph identity, so a stale artifact can never be observed; a graph
//! evicts its own entries when it is dropped, keeping the map bounded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use super::program::CompiledModel;

type Key = (u64, String);

static COMPILED: OnceLock<Mutex<HashMap<Key, Arc<CompiledModel>>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<Key, Arc<CompiledModel>>> {
    COMPILED.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn lookup(graph_id: u64, fn_name: &str) -> Option<Arc<CompiledModel>> {
    let map = cache().lock().ok()?;
    map.get(&(graph_id, fn_name.to_string())).cloned()
}

pub(crate) fn store(graph_id: u64, fn_name: &str, model: Arc<CompiledModel>) {
    if let Ok(mut map) = cache().lock() {
        map.insert((graph_id, fn_name.to_string()), model);
    }
}

pub(crate) fn evict(graph_id: u64) {
    if let Some(lock) = COMPILED.get() {
        if let Ok(mut map) = lock.lock() {
            map.retain(|(id, _), _| *id != graph_id);
        }
    }
}
