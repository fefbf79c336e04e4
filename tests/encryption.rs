//! Encrypted-document round trips through the full writer/reader stack.

use pdforge::encryption::{EncryptionConfig, Permissions};
use pdforge::filters::Filter;
use pdforge::{dictionary, CryptError, Error, Object, Reader, Writer, WriterOptions};
use std::io::Write as _;

fn write_secret(version: &str, config: EncryptionConfig) -> (Vec<u8>, pdforge::ObjectId, pdforge::ObjectId) {
    let mut writer = Writer::encrypted(Vec::new(), version, WriterOptions::default(), &config).unwrap();
    for _ in 0..2 {
        writer.alloc();
    }
    let three = writer.alloc();
    assert_eq!(three, (3, 0));
    writer.put(three, Object::string_literal("secret")).unwrap();

    let stream_id = writer.alloc();
    let mut sink = writer.open_stream(stream_id, dictionary! {}, &[Filter::Flate]).unwrap();
    sink.write_all(b"confidential stream body").unwrap();
    sink.finish().unwrap();

    let catalog = writer
        .add(dictionary! { "Type" => Object::name("Catalog") })
        .unwrap();
    writer.set_root(catalog);
    (writer.close().unwrap(), three, stream_id)
}

#[test]
fn aes128_round_trip_with_passwords() {
    let config = EncryptionConfig::Aes128 {
        owner_password: "admin",
        user_password: "u",
        permissions: Permissions::default(),
    };
    let (bytes, secret, stream_id) = write_secret("1.6", config);

    // The plaintext never appears in the file.
    assert!(find(&bytes, b"secret").is_none());
    assert!(find(&bytes, b"confidential").is_none());

    let reader = Reader::open_encrypted(bytes.clone(), Default::default(), "u").unwrap();
    assert_eq!(reader.get_object(secret).unwrap().as_string().unwrap(), b"secret");
    let stream = reader.get_stream(&Object::Reference(stream_id)).unwrap();
    assert_eq!(stream.decoded_content().unwrap(), b"confidential stream body");

    // Owner password works too.
    assert!(Reader::open_encrypted(bytes.clone(), Default::default(), "admin").is_ok());

    // A wrong password is a recoverable error.
    match Reader::open_encrypted(bytes.clone(), Default::default(), "x") {
        Err(Error::Encryption(CryptError::WrongPassword)) => {}
        other => panic!("unexpected {other:?}"),
    }

    // And the reader can retry in place.
    let mut reader = Reader::open(bytes).unwrap();
    assert!(reader.authenticate("nope").is_err());
    reader.authenticate("u").unwrap();
    assert_eq!(reader.get_object(secret).unwrap().as_string().unwrap(), b"secret");
}

#[test]
fn rc4_40_round_trip() {
    let config = EncryptionConfig::Rc4_40 {
        owner_password: "o",
        user_password: "user pw",
        permissions: Permissions::PRINT | Permissions::COPY,
    };
    let (bytes, secret, _) = write_secret("1.4", config);
    assert!(find(&bytes, b"secret").is_none());

    let reader = Reader::open_encrypted(bytes, Default::default(), "user pw").unwrap();
    assert_eq!(reader.get_object(secret).unwrap().as_string().unwrap(), b"secret");
}

#[test]
fn aes256_round_trip_requires_pdf_2() {
    let config = EncryptionConfig::Aes256 {
        owner_password: "o",
        user_password: "u",
        permissions: Permissions::default(),
    };
    assert!(matches!(
        Writer::encrypted(Vec::new(), "1.7", WriterOptions::default(), &config),
        Err(Error::VersionTooLow { .. })
    ));

    let (bytes, secret, stream_id) = write_secret("2.0", config);
    let reader = Reader::open_encrypted(bytes, Default::default(), "u").unwrap();
    assert_eq!(reader.get_object(secret).unwrap().as_string().unwrap(), b"secret");
    let stream = reader.get_stream(&Object::Reference(stream_id)).unwrap();
    assert_eq!(stream.decoded_content().unwrap(), b"confidential stream body");
}

#[test]
fn empty_user_password_opens_transparently() {
    let config = EncryptionConfig::Aes128 {
        owner_password: "owner-only",
        user_password: "",
        permissions: Permissions::default(),
    };
    let (bytes, secret, _) = write_secret("1.6", config);
    // open() probes the empty password by itself.
    let reader = Reader::open(bytes).unwrap();
    assert_eq!(reader.get_object(secret).unwrap().as_string().unwrap(), b"secret");
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
