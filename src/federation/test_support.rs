//! Shared fixtures for federation unit tests

use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde_json::{Value, json};
use std::sync::OnceLock;

fn generate_keypair() -> (String, String) {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("generate private key");
    let public_key = private_key.to_public_key();

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode private key")
        .to_string();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public key");

    (private_pem, public_pem)
}

/// `(private_pem, public_pem)`, generated once per test binary.
pub fn test_keypair() -> &'static (String, String) {
    static KEYPAIR: OnceLock<(String, String)> = OnceLock::new();
    KEYPAIR.get_or_init(generate_keypair)
}

/// A second, unrelated key pair.
pub fn other_keypair() -> &'static (String, String) {
    static KEYPAIR: OnceLock<(String, String)> = OnceLock::new();
    KEYPAIR.get_or_init(generate_keypair)
}

/// Minimal actor document publishing `{actor}#main-key`.
pub fn actor_document(actor: &str, public_pem: &str) -> Value {
    json!({
        "id": actor,
        "type": "Person",
        "inbox": format!("{actor}/inbox"),
        "publicKey": {
            "id": format!("{actor}#main-key"),
            "owner": actor,
            "publicKeyPem": public_pem,
        }
    })
}

/// Actor document with explicit inboxes and no key.
pub fn actor_with_inboxes(actor: &str, inbox: &str, shared_inbox: Option<&str>) -> Value {
    let mut document = json!({
        "id": actor,
        "type": "Person",
        "inbox": inbox,
    });
    if let Some(shared_inbox) = shared_inbox {
        document["endpoints"] = json!({ "sharedInbox": shared_inbox });
    }
    document
}
