//! Stable hashing for stream names.
//!
//! The hash must be deterministic across runs and processes because it is
//! persisted as the key of the non-collision submaps. We do not use `DefaultHasher`.

#[cfg(not(any(feature = "hash-xxh3", feature = "hash-xxh64")))]
compile_error!("Enable a hash feature: `hash-xxh3` (default) or `hash-xxh64`.");

/// Hashes a key into a 64-bit value
pub trait LongHasher<K: ?Sized>: Send + Sync {
    /// Hash the key (deterministic)
    fn hash(&self, key: &K) -> u64;
}

/// Hash raw bytes into a 64-bit value (deterministic).
#[inline]
pub fn hash64(bytes: &[u8]) -> u64 {
    #[cfg(feature = "hash-xxh3")]
    {
        xxhash_rust::xxh3::xxh3_64(bytes)
    }

    #[cfg(all(not(feature = "hash-xxh3"), feature = "hash-xxh64"))]
    {
        xxhash_rust::xxh64::xxh64(bytes, 0)
    }
}

/// Default stream hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3Hasher;

impl<K: AsRef<[u8]> + ?Sized> LongHasher<K> for Xxh3Hasher {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        hash64(key.as_ref())
    }
}

impl<K: ?Sized, F> LongHasher<K> for F
where
    F: Fn(&K) -> u64 + Send + Sync,
{
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        self(key)
    }
}
