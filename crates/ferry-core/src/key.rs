use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Stable identifier for a (pipeline, destination) pair. Equal keys refer to
/// the same logical queue across config reloads; the integer stays valid
/// until the queue is garbage-collected and the key released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey(u64);

impl QueueKey {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
impl QueueKey {
    /// Fabricate a key without an allocator. Tests only.
    pub(crate) fn test(raw: u64) -> Self {
        QueueKey(raw)
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct AllocatorState {
    by_name: HashMap<String, QueueKey>,
    names: HashMap<QueueKey, String>,
    /// Keys released by queue GC, reissued before `next` is advanced.
    free: Vec<QueueKey>,
    next: u64,
}

/// Interns (pipeline-id, destination-id) pairs into integer [`QueueKey`]s.
///
/// Shared between the composition root (which binds flushers to keys) and
/// the queue registry (whose GC returns keys once a queue is destroyed).
#[derive(Default)]
pub struct KeyAllocator {
    state: Mutex<AllocatorState>,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a (pipeline, destination) pair. The same pair maps to the same
    /// key for as long as the binding is alive.
    pub fn acquire(&self, pipeline_id: &str, destination_id: &str) -> QueueKey {
        let name = Self::binding_name(pipeline_id, destination_id);
        let mut state = self.state.lock().unwrap();
        if let Some(key) = state.by_name.get(&name) {
            return *key;
        }
        let key = match state.free.pop() {
            Some(key) => key,
            None => {
                let key = QueueKey(state.next);
                state.next += 1;
                key
            }
        };
        state.by_name.insert(name.clone(), key);
        state.names.insert(key, name);
        key
    }

    /// The interned pair for a key, for diagnostics.
    pub fn name(&self, key: QueueKey) -> Option<String> {
        self.state.lock().unwrap().names.get(&key).cloned()
    }

    /// Release a key back to the free list. Returns false if the key was not
    /// bound. The integer may be reissued by a later `acquire`.
    pub fn release(&self, key: QueueKey) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(name) = state.names.remove(&key) else {
            return false;
        };
        state.by_name.remove(&name);
        state.free.push(key);
        true
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn binding_name(pipeline_id: &str, destination_id: &str) -> String {
        format!("{pipeline_id}/{destination_id}")
    }
}
