//! Per-key striped locks.
//!
//! Used only when the backend cannot make conditional writes atomic. The
//! locks serialize touches of the same ticket within this process; they give
//! no guarantee across processes sharing a backend.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use tokio::sync::{Mutex, MutexGuard};

const STRIPES: usize = 64;

#[derive(Debug)]
pub(crate) struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self { stripes: (0..STRIPES).map(|_| Mutex::new(())).collect() }
    }

    pub(crate) async fn lock(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        self.stripes[Self::stripe(key)].lock().await
    }

    fn stripe(key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % STRIPES
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[test]
    fn same_key_maps_to_same_stripe() {
        assert_eq!(KeyLocks::stripe(b"ST-abc"), KeyLocks::stripe(b"ST-abc"));
        assert!(KeyLocks::stripe(b"ST-abc") < STRIPES);
    }

    #[tokio::test]
    async fn holders_of_one_key_are_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock(b"TGT-1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(b"TGT-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }
}
