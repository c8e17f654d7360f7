//! Authentication messages and the SCRAM-SHA-256 exchange.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// SASL mechanism name for SCRAM-SHA-256.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header for "client does not support channel binding".
const GS2_HEADER: &str = "n,,";

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute the MD5 password response.
///
/// Format: `"md5" + md5_hex(md5_hex(password + username) + salt)`.
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC error: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// SCRAM-SHA-256 client without channel binding.
///
/// Flow: [`client_first_message`](Self::client_first_message) goes out in
/// SASLInitialResponse, [`process_server_first`](Self::process_server_first)
/// answers AuthenticationSASLContinue, and
/// [`verify_server_final`](Self::verify_server_final) checks the signature
/// carried by AuthenticationSASLFinal.
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    /// Create a client with a random 24-byte nonce.
    ///
    /// The SCRAM username is left empty: PostgreSQL takes the user from the
    /// StartupMessage and ignores this one.
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce("", password, &BASE64.encode(nonce_bytes))
    }

    /// Create a client with a fixed username and nonce.
    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            nonce: nonce.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    fn client_first_message_bare(&self) -> String {
        format!("n={},r={}", self.username, self.nonce)
    }

    /// Generate the client-first-message.
    pub fn client_first_message(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_message_bare())
    }

    /// Process server-first-message and generate client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse::<u32>().ok();
            }
        }

        let combined_nonce = combined_nonce
            .ok_or_else(|| Error::Auth("Missing nonce in server-first-message".into()))?;
        let salt_b64 =
            salt_b64.ok_or_else(|| Error::Auth("Missing salt in server-first-message".into()))?;
        let iterations = iterations
            .filter(|&i| i > 0)
            .ok_or_else(|| Error::Auth("Missing iterations in server-first-message".into()))?;

        if !combined_nonce.starts_with(&self.nonce) || combined_nonce.len() == self.nonce.len() {
            return Err(Error::Auth(
                "Server nonce does not extend the client nonce".into(),
            ));
        }

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| Error::Auth(format!("Invalid salt: {}", e)))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let client_final_without_proof =
            format!("c={},r={}", BASE64.encode(GS2_HEADER), combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_message_bare(),
            server_first,
            client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let mut client_proof = client_key;
        for (proof, sig) in client_proof.iter_mut().zip(client_signature) {
            *proof ^= sig;
        }

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        ))
    }

    /// Verify server-final-message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::Auth(format!("SCRAM error from server: {}", err)));
        }

        let server_signature_b64 = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| Error::Auth("Invalid server-final-message".into()))?;
        let server_signature = BASE64
            .decode(server_signature_b64)
            .map_err(|e| Error::Auth(format!("Invalid server signature: {}", e)))?;

        let (Some(salted_password), Some(auth_message)) =
            (&self.salted_password, &self.auth_message)
        else {
            return Err(Error::Auth(
                "server-final-message before server-first-message".into(),
            ));
        };

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if server_signature.as_slice() != expected.as_slice() {
            return Err(Error::Auth("Server signature verification failed".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7677 section 3 test vector.
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn md5_known_answer() {
        assert_eq!(
            md5_password("postgres", "secret", &[1, 2, 3, 4]),
            "md5bb41a296aab6baccb36ff243a562abff"
        );
    }

    #[test]
    fn password_message_layout() {
        let mut buf = Vec::new();
        write_password(&mut buf, "secret");
        assert_eq!(buf[0], b'p');
        assert_eq!(&buf[1..5], &11_i32.to_be_bytes());
        assert_eq!(&buf[5..], b"secret\0");
    }

    #[test]
    fn sasl_initial_response_layout() {
        let mut buf = Vec::new();
        write_sasl_initial_response(&mut buf, SCRAM_SHA_256, b"n,,n=,r=abc");
        assert_eq!(buf[0], b'p');
        assert_eq!(&buf[5..19], b"SCRAM-SHA-256\0");
        assert_eq!(&buf[19..23], &11_i32.to_be_bytes());
        assert_eq!(&buf[23..], b"n,,n=,r=abc");
    }

    #[test]
    fn scram_rfc7677_exchange() {
        let mut client = ScramClient::with_nonce("user", "pencil", CLIENT_NONCE);
        assert_eq!(
            client.client_first_message(),
            "n,,n=user,r=rOprNGfwEbeRWgbNEkqO"
        );
        assert_eq!(client.process_server_first(SERVER_FIRST).unwrap(), CLIENT_FINAL);
        client.verify_server_final(SERVER_FINAL).unwrap();
    }

    #[test]
    fn scram_rejects_wrong_server_signature() {
        let mut client = ScramClient::with_nonce("user", "pencil", CLIENT_NONCE);
        client.process_server_first(SERVER_FIRST).unwrap();
        let err = client
            .verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn scram_rejects_foreign_nonce() {
        let mut client = ScramClient::with_nonce("user", "pencil", "abc");
        let err = client
            .process_server_first("r=xyz123,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn scram_random_nonce_has_empty_username() {
        let client = ScramClient::new("pencil");
        let first = client.client_first_message();
        assert!(first.starts_with("n,,n=,r="));
        assert!(first.len() > "n,,n=,r=".len());
    }
}
