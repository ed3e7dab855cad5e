/*!
 * Process-wide PBKDF2 memoization cache (distilled spec §4.4).
 *
 * PBKDF2 at default iteration counts dominates SCRAM authentication cost,
 * and reconnects to the same server commonly hit the same
 * `(password, salt, iterations)` tuple.
 */

use std::sync::{Mutex, OnceLock};

use hmac::Hmac;
use lru::LruCache;
use pbkdf2::pbkdf2;
use sha1::Sha1;
use std::num::NonZeroUsize;

const CACHE_CAPACITY: usize = 64;
const SALTED_PASSWORD_LEN: usize = 20; // SHA-1 output size

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    password_digest: [u8; 16],
    salt: Vec<u8>,
    iterations: u32,
}

fn cache() -> &'static Mutex<LruCache<CacheKey, [u8; SALTED_PASSWORD_LEN]>> {
    static CACHE: OnceLock<Mutex<LruCache<CacheKey, [u8; SALTED_PASSWORD_LEN]>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())))
}

/// Computes `PBKDF2(HMAC-SHA1, password, salt, iterations, 20)`, memoized by
/// `(password, salt, iterations)`. `password` here is already the
/// pre-digested `H_MD5(username ":mongo:" password)` the caller derives
/// before salting, so the cache key never stores a plaintext password.
pub fn salted_password(password_digest: &[u8; 16], salt: &[u8], iterations: u32) -> [u8; SALTED_PASSWORD_LEN] {
    let key = CacheKey {
        password_digest: *password_digest,
        salt: salt.to_vec(),
        iterations,
    };

    if let Some(hit) = cache().lock().unwrap().get(&key) {
        return *hit;
    }

    let mut out = [0u8; SALTED_PASSWORD_LEN];
    pbkdf2::<Hmac<Sha1>>(password_digest, salt, iterations, &mut out)
        .expect("PBKDF2 output length is statically correct for SHA-1");

    cache().lock().unwrap().put(key, out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_calls_with_same_key_hit_cache() {
        let digest = [1u8; 16];
        let salt = b"somesalt";
        let a = salted_password(&digest, salt, 4096);
        let b = salted_password(&digest, salt, 4096);
        assert_eq!(a, b);
    }

    #[test]
    fn different_salts_produce_different_output() {
        let digest = [1u8; 16];
        let a = salted_password(&digest, b"salt-a", 4096);
        let b = salted_password(&digest, b"salt-b", 4096);
        assert_ne!(a, b);
    }
}
