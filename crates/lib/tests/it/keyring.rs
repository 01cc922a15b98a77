use std::sync::Arc;

use contextdb::keyring::{KEY_LENGTH, KeyType, Keyring, Seed, SymKey, crypto};
use serde_json::{Value, json};

#[test]
fn test_same_seed_same_keys() {
    let a = Keyring::new("a1b2c3");
    let b = Keyring::new("a1b2c3");
    let other = Keyring::new("d4e5f6");

    assert_eq!(a.public_keys(), b.public_keys());
    assert_eq!(a.get_keys().sym_key.hex, b.get_keys().sym_key.hex);
    assert_ne!(a.public_keys(), other.public_keys());
    assert_eq!(a.sign_public_key().len(), KEY_LENGTH + 1);
    assert_eq!(a.sign_public_key()[0], 0);
}

#[test]
fn test_symmetric_round_trip() {
    let keyring = Keyring::new("seed");
    let data = json!({"title": "groceries", "items": ["milk", "eggs"]});

    let encrypted = keyring.sym_encrypt(&data).unwrap();
    assert!(!encrypted.contains("groceries"));
    let decrypted: Value = keyring.sym_decrypt(&encrypted).unwrap();
    assert_eq!(decrypted, data);

    let err = Keyring::new("other seed")
        .sym_decrypt::<Value>(&encrypted)
        .unwrap_err();
    assert!(err.is_decryption_error());
    assert_eq!(err.module(), "keyring");
}

#[test]
fn test_encryption_is_randomized() {
    let key = SymKey::from_bytes([9; KEY_LENGTH]);
    let first = crypto::sym_encrypt("same", &key).unwrap();
    let second = crypto::sym_encrypt("same", &key).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_shared_key_agreement() {
    let bob = Keyring::new("bob");
    let ephemeral = Keyring::build_key(&Seed::new("ephemeral"), KeyType::Asym);
    let ephemeral_public = <[u8; KEY_LENGTH]>::try_from(ephemeral.public_key()).unwrap();

    // The sender holds the ephemeral secret; bob only sees its public half
    let sender_key = bob.build_shared_key_start(ephemeral.private_key()).unwrap();
    let bob_key = bob.build_shared_key_end(&ephemeral_public).unwrap();
    assert_eq!(sender_key, bob_key);

    let sealed = bob.asym_encrypt(&json!("hello bob"), &sender_key).unwrap();
    let opened: Value = bob.asym_decrypt(&sealed, &bob_key).unwrap();
    assert_eq!(opened, json!("hello bob"));

    let stranger = Keyring::new("mallory").build_shared_key_end(&ephemeral_public).unwrap();
    assert_ne!(stranger, bob_key);
    assert!(bob.asym_decrypt::<Value>(&sealed, &stranger).unwrap_err().is_decryption_error());
}

#[test]
fn test_signatures() {
    let keyring = Keyring::new("signer");
    let message = json!({"action": "share", "with": "did:key:z6Mk"});
    let signature = keyring.sign(&message);

    assert!(keyring.verify_sig(&message, &signature));
    assert!(Keyring::verify_signature(
        keyring.sign_public_key(),
        &message,
        &signature
    ));
    assert!(Keyring::verify_signature(
        &keyring.sign_public_key()[1..],
        &message,
        &signature
    ));

    let tampered = json!({"action": "share", "with": "did:key:z6Mx"});
    assert!(!keyring.verify_sig(&tampered, &signature));
    assert!(!Keyring::new("someone else").verify_sig(&message, &signature));
    assert!(!keyring.verify_sig(&message, "not hex"));
}

#[test]
fn test_storage_context_keys_memoized() {
    let keyring = Keyring::new("seed");
    let first = keyring.get_storage_context_key("notes");
    let again = keyring.get_storage_context_key("notes");
    let other = keyring.get_storage_context_key("photos");

    assert!(Arc::ptr_eq(&first, &again));
    assert_ne!(*first, *other);
    assert_eq!(*first, *Keyring::new("seed").get_storage_context_key("notes"));
}
