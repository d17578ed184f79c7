//! SCRAM-SHA-256 authentication exchange.
//!
//! Implements the client side of RFC 5802 (SCRAM) with the SHA-256
//! parameters of RFC 7677, as used by PostgreSQL's SASL authentication.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{PgError, PgResult};

type HmacSha256 = Hmac<Sha256>;

/// Channel-binding header for "no channel binding": base64("n,,").
const GS2_HEADER: &str = "biws";

/// Client side of one SCRAM-SHA-256 exchange.
///
/// Flow: `client_first()` → server challenge → `handle_server_first()` →
/// server signature → `verify_server_final()`.
pub struct ScramExchange {
    username: String,
    password: String,
    client_nonce: String,
    /// Auth message and salted password, retained after the second step for
    /// the final server-signature check.
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramExchange {
    pub fn new(username: &str, password: &str) -> Self {
        // 18 random bytes base64-encode to a 24-character printable nonce.
        let nonce_bytes: [u8; 18] = rand::thread_rng().gen();
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: BASE64.encode(nonce_bytes),
            auth_message: None,
            salted_password: None,
        }
    }

    /// client-first-message: `n,,n=<user>,r=<client-nonce>`.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    fn client_first_bare(&self) -> String {
        // PostgreSQL ignores the SASL username in favor of the startup
        // user, so no SASLprep normalization is applied here.
        format!("n={},r={}", self.username, self.client_nonce)
    }

    /// Process server-first-message (`r=<nonce>,s=<salt>,i=<iterations>`)
    /// and produce client-final-message.
    pub fn handle_server_first(&mut self, server_msg: &[u8]) -> PgResult<Vec<u8>> {
        let server_first = std::str::from_utf8(server_msg)
            .map_err(|_| PgError::Auth("SCRAM server message is not UTF-8".to_string()))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            if let Some(v) = attr.strip_prefix("r=") {
                nonce = Some(v.to_string());
            } else if let Some(v) = attr.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(v)
                        .map_err(|_| PgError::Auth("invalid SCRAM salt".to_string()))?,
                );
            } else if let Some(v) = attr.strip_prefix("i=") {
                iterations = Some(
                    v.parse::<u32>()
                        .map_err(|_| PgError::Auth("invalid SCRAM iteration count".to_string()))?,
                );
            }
        }

        let combined_nonce =
            nonce.ok_or_else(|| PgError::Auth("SCRAM server message lacks nonce".to_string()))?;
        let salt =
            salt.ok_or_else(|| PgError::Auth("SCRAM server message lacks salt".to_string()))?;
        let iterations = iterations
            .ok_or_else(|| PgError::Auth("SCRAM server message lacks iterations".to_string()))?;

        // The combined nonce must extend ours, or we are talking to a replay.
        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(PgError::Auth(
                "SCRAM nonce verification failed".to_string(),
            ));
        }

        let salted_password = hi(&self.password, &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        let client_final_without_proof = format!("c={},r={}", GS2_HEADER, combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof = xor(&client_key, &client_signature);

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);

        let client_final = format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        );
        Ok(client_final.into_bytes())
    }

    /// Verify the server's final message (`v=<signature>`), proving the
    /// server also knows the password derivation.
    pub fn verify_server_final(&self, server_msg: &[u8]) -> PgResult<()> {
        let server_final = std::str::from_utf8(server_msg)
            .map_err(|_| PgError::Auth("SCRAM server message is not UTF-8".to_string()))?;

        let verifier = server_final
            .strip_prefix("v=")
            .ok_or_else(|| PgError::Auth("SCRAM server final lacks signature".to_string()))?;
        let server_signature = BASE64
            .decode(verifier)
            .map_err(|_| PgError::Auth("invalid SCRAM server signature".to_string()))?;

        let (salted_password, auth_message) =
            match (&self.salted_password, &self.auth_message) {
                (Some(p), Some(m)) => (p, m),
                _ => {
                    return Err(PgError::Auth(
                        "SCRAM exchange is out of order".to_string(),
                    ))
                }
            };

        let server_key = hmac_sha256(salted_password, b"Server Key");
        let expected = hmac_sha256(&server_key, auth_message.as_bytes());

        if server_signature != expected {
            return Err(PgError::Auth(
                "SCRAM server signature verification failed".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Hi() per RFC 5802: PBKDF2 with HMAC-SHA-256.
fn hi(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut output = [0u8; 32];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut output)
        .expect("valid output length");
    output
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn xor(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_first_has_gs2_header_and_nonce() {
        let ex = ScramExchange::new("user", "pencil");
        let first = String::from_utf8(ex.client_first()).unwrap();
        assert!(first.starts_with("n,,n=user,r="));
        // 18 random bytes base64-encode to 24 characters.
        let nonce = first.rsplit("r=").next().unwrap();
        assert_eq!(nonce.len(), 24);
    }

    #[test]
    fn rejects_server_nonce_that_does_not_extend_ours() {
        let mut ex = ScramExchange::new("user", "pencil");
        ex.client_first();
        let server_first = "r=completely-different,s=c2FsdA==,i=4096";
        assert!(matches!(
            ex.handle_server_first(server_first.as_bytes()),
            Err(PgError::Auth(_))
        ));
    }

    #[test]
    fn rejects_final_message_before_challenge() {
        let ex = ScramExchange::new("user", "pencil");
        assert!(matches!(
            ex.verify_server_final(b"v=AAAA"),
            Err(PgError::Auth(_))
        ));
    }

    /// Drive a full exchange, verifying the client proof server-side from
    /// the same password derivation (RFC 5802 section 3).
    #[test]
    fn full_exchange_produces_a_verifiable_proof() {
        let password = "pencil";
        let salt = b"QSXCR+Q6sek8bf92";
        let iterations = 4096;

        let mut ex = ScramExchange::new("user", password);
        let first = String::from_utf8(ex.client_first()).unwrap();
        let bare = first.strip_prefix("n,,").unwrap().to_string();
        let client_nonce = bare.rsplit("r=").next().unwrap();

        let combined_nonce = format!("{}3rfcNHYJY1ZVvWVs7j", client_nonce);
        let server_first = format!(
            "r={},s={},i={}",
            combined_nonce,
            BASE64.encode(salt),
            iterations
        );
        let client_final =
            String::from_utf8(ex.handle_server_first(server_first.as_bytes()).unwrap()).unwrap();

        let (without_proof, proof_b64) = client_final.rsplit_once(",p=").unwrap();
        assert_eq!(
            without_proof,
            format!("c={},r={}", GS2_HEADER, combined_nonce)
        );

        // Server-side check: ClientKey = ClientProof XOR ClientSignature.
        let salted = hi(password, salt, iterations);
        let client_key = hmac_sha256(&salted, b"Client Key");
        let stored_key = sha256(&client_key);
        let auth_message = format!("{},{},{}", bare, server_first, without_proof);
        let signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let expected_proof = xor(&client_key, &signature);
        assert_eq!(proof_b64, BASE64.encode(expected_proof));

        // And the client must accept the matching server signature.
        let server_key = hmac_sha256(&salted, b"Server Key");
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());
        let server_final = format!("v={}", BASE64.encode(server_signature));
        ex.verify_server_final(server_final.as_bytes()).unwrap();

        // A tampered signature is rejected.
        let mut bad = server_signature;
        bad[0] ^= 0xFF;
        let server_final = format!("v={}", BASE64.encode(bad));
        assert!(ex.verify_server_final(server_final.as_bytes()).is_err());
    }
}
