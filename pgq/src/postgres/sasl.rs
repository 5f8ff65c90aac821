//! SCRAM-SHA-256 client conversation (RFC 7677).
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::{Rng, distributions::Alphanumeric};
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 24;

/// Client side of a SCRAM-SHA-256 conversation.
///
/// Three steps: [`client_first`](Self::client_first) produces the
/// SASLInitialResponse payload, [`server_first`](Self::server_first)
/// turns the server challenge into the client-final message, and
/// [`server_final`](Self::server_final) verifies the server signature.
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,

    salted_password: Option<[u8; 32]>,
    auth_message: Option<String>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::with_nonce(username, password, nonce)
    }

    pub(crate) fn with_nonce(username: &str, password: &str, nonce: String) -> Self {
        Self {
            username: username.to_owned(),
            password: password.to_owned(),
            nonce,
            salted_password: None,
            auth_message: None,
        }
    }

    /// The first client message.
    pub fn client_first(&self) -> String {
        // gs2 header "n,,": no channel binding, no authzid
        format!("n,,n={},r={}", self.username, self.nonce)
    }

    /// Consume the server-first message, producing the client-final
    /// message carrying the proof.
    pub fn server_first(&mut self, data: &[u8]) -> Result<String, ProtocolError> {
        let msg = std::str::from_utf8(data).map_err(|_| sasl("server-first message is not utf-8"))?;

        // r=<nonce>,s=<salt>,i=<iterations>
        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in msg.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                server_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(BASE64.decode(value).map_err(|_| sasl("salt is not valid base64"))?);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations =
                    Some(value.parse::<u32>().map_err(|_| sasl("invalid iteration count"))?);
            }
        }
        let server_nonce = server_nonce.ok_or_else(|| sasl("missing server nonce"))?;
        let salt = salt.ok_or_else(|| sasl("missing salt"))?;
        let iterations = iterations.ok_or_else(|| sasl("missing iteration count"))?;

        if !server_nonce.starts_with(&self.nonce) {
            return Err(sasl("server nonce does not extend the client nonce"));
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|_| sasl("pbkdf2 failed"))?;

        let client_first_bare = format!("n={},r={}", self.username, self.nonce);
        // biws = base64("n,,")
        let client_final_bare = format!("c=biws,r={server_nonce}");
        let auth_message = format!("{client_first_bare},{msg},{client_final_bare}");

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);
        let client_signature = hmac(stored_key.as_slice(), auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature)
            .map(|(key, sig)| key ^ sig)
            .collect();

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);

        Ok(format!("{client_final_bare},p={}", BASE64.encode(proof)))
    }

    /// Verify the server-final signature.
    pub fn server_final(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let msg = std::str::from_utf8(data).map_err(|_| sasl("server-final message is not utf-8"))?;
        let signature = msg.strip_prefix("v=").ok_or_else(|| sasl("missing server signature"))?;
        let signature =
            BASE64.decode(signature).map_err(|_| sasl("server signature is not valid base64"))?;

        let salted_password =
            self.salted_password.as_ref().ok_or_else(|| sasl("conversation out of order"))?;
        let auth_message =
            self.auth_message.as_ref().ok_or_else(|| sasl("conversation out of order"))?;

        let server_key = hmac(salted_password, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;
        if signature.as_slice() != expected.as_slice() {
            return Err(sasl("server signature mismatch"));
        }
        Ok(())
    }
}

fn sasl(msg: &str) -> ProtocolError {
    ProtocolError::Sasl(msg.to_owned())
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], ProtocolError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| sasl("hmac init failed"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    // the example conversation from RFC 7677 section 3
    const USER: &str = "user";
    const PASSWORD: &str = "pencil";
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str = "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                                p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc_7677_example_conversation() {
        let mut client = ScramClient::with_nonce(USER, PASSWORD, CLIENT_NONCE.to_owned());
        assert_eq!(client.client_first(), format!("n,,n=user,r={CLIENT_NONCE}"));

        let client_final = client.server_first(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(client_final, CLIENT_FINAL);

        client.server_final(SERVER_FINAL.as_bytes()).unwrap();
    }

    #[test]
    fn rejects_a_tampered_server_signature() {
        let mut client = ScramClient::with_nonce(USER, PASSWORD, CLIENT_NONCE.to_owned());
        client.server_first(SERVER_FIRST.as_bytes()).unwrap();
        let err = client.server_final(b"v=AAAAVGVzdFRlc3RUZXN0VGVzdDEyMzQ1Njc4OTAxMg==").unwrap_err();
        assert!(matches!(err, ProtocolError::Sasl(_)));
    }

    #[test]
    fn rejects_a_foreign_nonce() {
        let mut client = ScramClient::with_nonce(USER, PASSWORD, CLIENT_NONCE.to_owned());
        let err = client
            .server_first(b"r=somebodyelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Sasl(_)));
    }
}
