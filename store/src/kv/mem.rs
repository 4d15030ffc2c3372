//! An in-process `Kv` backed by a `BTreeMap`, used by tests and by any
//! deployment that doesn't need cross-process durability.

use super::Kv;
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemKv {
    inner: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Kv for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_prefix_stops_at_boundary() {
        let kv = MemKv::new();
        kv.put(b"c\x01aaa", b"1").unwrap();
        kv.put(b"c\x01bbb", b"2").unwrap();
        kv.put(b"d\x01ccc", b"3").unwrap();
        let found = kv.scan_prefix(b"c\x01").unwrap();
        assert_eq!(found.len(), 2);
    }
}
