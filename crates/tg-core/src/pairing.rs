//! Ephemeral pairing codes handed out by `POST /generate-code`.
//!
//! A code is 6 characters from an unambiguous alphabet, valid for ten
//! minutes, case-insensitive, and single-use.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

/// Codes expire after this long.
pub const PAIRING_TTL: Duration = Duration::from_secs(10 * 60);

/// Characters used in codes. 0/O and 1/I are excluded — codes get typed on
/// phones.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

struct Issued {
    code: String,
    issued_at: Instant,
}

/// In-memory store of outstanding pairing codes.
#[derive(Default)]
pub struct PairingCodes {
    issued: Mutex<Vec<Issued>>,
}

impl PairingCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh code and remember it.
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let code: String = (0..6)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();

        let mut issued = self.issued.lock().unwrap();
        issued.retain(|c| c.issued_at.elapsed() < PAIRING_TTL);
        issued.push(Issued {
            code: code.clone(),
            issued_at: Instant::now(),
        });
        code
    }

    /// Consume `attempt` if it matches a live code. Case-insensitive;
    /// a successful redeem removes the code.
    pub fn redeem(&self, attempt: &str) -> bool {
        let attempt = attempt.trim().to_ascii_uppercase();
        let mut issued = self.issued.lock().unwrap();
        issued.retain(|c| c.issued_at.elapsed() < PAIRING_TTL);

        if let Some(pos) = issued.iter().position(|c| c.code == attempt) {
            issued.remove(pos);
            return true;
        }
        false
    }

    /// Number of live codes (test hook).
    pub fn outstanding(&self) -> usize {
        let mut issued = self.issued.lock().unwrap();
        issued.retain(|c| c.issued_at.elapsed() < PAIRING_TTL);
        issued.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_redeems_once() {
        let codes = PairingCodes::new();
        let code = codes.generate();
        assert_eq!(code.len(), 6);
        assert!(codes.redeem(&code));
        assert!(!codes.redeem(&code), "second redeem must fail");
    }

    #[test]
    fn redeem_is_case_insensitive() {
        let codes = PairingCodes::new();
        let code = codes.generate();
        assert!(codes.redeem(&code.to_ascii_lowercase()));
    }

    #[test]
    fn unknown_code_fails() {
        let codes = PairingCodes::new();
        codes.generate();
        assert!(!codes.redeem("NOPE99"));
        assert_eq!(codes.outstanding(), 1);
    }

    #[test]
    fn alphabet_avoids_ambiguous_chars() {
        let codes = PairingCodes::new();
        for _ in 0..50 {
            let code = codes.generate();
            assert!(!code.contains('0') && !code.contains('O'));
            assert!(!code.contains('1') && !code.contains('I'));
        }
    }
}
