//! Native-password scramble math, grounded on the teacher's
//! `server/auth/mod.rs` sha1/xor helpers. §8 invariant 7:
//! `SHA1(s ‖ hash2) XOR hash1 = transmitted` where `hash1 = SHA1(pw)`,
//! `hash2 = SHA1(hash1)`.

use sha1::{Digest, Sha1};

pub fn sha1_once(input: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(input);
    hasher.finalize().into()
}

fn xor20(a: &[u8; 20], b: &[u8; 20]) -> [u8; 20] {
    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// `password_sha1` is `hash1 = SHA1(real_password)` as stored in the
/// credentials envelope. Returns the 20-byte scramble to transmit.
pub fn native_password_scramble(password_sha1: &[u8], server_scramble: &[u8; 20]) -> [u8; 20] {
    let mut hash1 = [0u8; 20];
    hash1.copy_from_slice(&password_sha1[..20.min(password_sha1.len())]);
    let hash2 = sha1_once(&hash1);

    let mut salted = Vec::with_capacity(40);
    salted.extend_from_slice(server_scramble);
    salted.extend_from_slice(&hash2);
    let new_sha = sha1_once(&salted);

    xor20(&new_sha, &hash1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scramble_satisfies_invariant_7() {
        let pw = b"correct horse battery staple";
        let hash1 = sha1_once(pw);
        let hash2 = sha1_once(&hash1);
        let server_scramble: [u8; 20] = *b"01234567890123456789";

        let transmitted = native_password_scramble(&hash1, &server_scramble);

        let mut salted = Vec::new();
        salted.extend_from_slice(&server_scramble);
        salted.extend_from_slice(&hash2);
        let check = sha1_once(&salted);
        let mut expected = [0u8; 20];
        for i in 0..20 {
            expected[i] = check[i] ^ hash1[i];
        }
        assert_eq!(transmitted, expected);
    }

    #[test]
    fn same_inputs_produce_same_scramble() {
        let hash1 = sha1_once(b"pw");
        let scramble: [u8; 20] = *b"aaaaaaaaaaaaaaaaaaaa";
        assert_eq!(
            native_password_scramble(&hash1, &scramble),
            native_password_scramble(&hash1, &scramble)
        );
    }
}
