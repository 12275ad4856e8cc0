//! MD5 content hashing
//!
//! MD5 here is used for change detection and cache-key disambiguation only,
//! never for security.

/// Compute the MD5 checksum of a byte slice as a lowercase hex string
pub fn compute_md5(data: &[u8]) -> String {
    let digest = md5::compute(data);
    format!("{:x}", digest)
}

/// Verify an MD5 checksum matches the expected value
pub fn verify_md5(data: &[u8], expected_md5: &str) -> bool {
    compute_md5(data).eq_ignore_ascii_case(expected_md5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_md5() {
        let data = b"Hello, world!";
        let md5 = compute_md5(data);
        // MD5 of "Hello, world!"
        assert_eq!(md5, "6cd3556deb0da54bca060b4c39479839");
    }

    #[test]
    fn test_verify_md5() {
        let data = b"test data";
        assert!(verify_md5(data, "eb733a00c0c9d336e65691a37ab54293"));
        assert!(!verify_md5(data, "wrong_md5_hash"));
    }

    #[test]
    fn test_case_insensitive() {
        let data = b"test";
        assert!(verify_md5(data, "098f6bcd4621d373cade4e832627b4f6"));
        assert!(verify_md5(data, "098F6BCD4621D373CADE4E832627B4F6"));
    }
}
