/*!
 * Legacy MONGODB-CR challenge-response (distilled spec §4.4).
 */

fn hex_md5(input: &str) -> String {
    format!("{:x}", md5::compute(input))
}

/// `hex(MD5(nonce + username + hex(MD5(username ":mongo:" password))))`.
pub fn compute_key(nonce: &str, username: &str, password: &str) -> String {
    let password_digest = hex_md5(&format!("{username}:mongo:{password}"));
    hex_md5(&format!("{nonce}{username}{password_digest}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_32_hex_characters() {
        let key = compute_key("abc123", "alice", "hunter2");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_is_deterministic() {
        let a = compute_key("nonce", "u", "p");
        let b = compute_key("nonce", "u", "p");
        assert_eq!(a, b);
    }

    #[test]
    fn key_changes_with_nonce() {
        let a = compute_key("nonce-a", "u", "p");
        let b = compute_key("nonce-b", "u", "p");
        assert_ne!(a, b);
    }
}
