//! Standard security handler: encryption-dictionary codec, password
//! handshake and the object encrypt/decrypt walkers.
//!
//! Strings and streams are transformed in place; everything else passes
//! through. The xref stream, the encryption dictionary itself and the file
//! identifier stay plaintext.

mod crypt;
mod keys;

pub use crypt::{AesV2Filter, AesV3Filter, CryptFilter, IdentityFilter, Rc4Filter};

use crate::{Dictionary, Object, ObjectId};
use bitflags::bitflags;
use keys::{sanitize_password_legacy, sanitize_password_r6, PasswordCore};
use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptError {
    #[error("the document declares no /Encrypt dictionary")]
    NotEncrypted,
    #[error("security handler /{0} is not supported")]
    UnsupportedHandler(String),
    #[error("encryption version {0} is not supported")]
    UnsupportedVersion(i64),
    #[error("encryption revision {0} is not supported")]
    UnsupportedRevision(i64),
    #[error("the encryption dictionary is malformed")]
    MalformedDictionary,
    #[error("the document has no file identifier")]
    MissingFileId,
    #[error("the supplied password is incorrect")]
    WrongPassword,
    #[error("the password cannot be encoded for this revision")]
    UnencodablePassword,
    #[error("wrong key length for the selected cipher")]
    KeyLength,
    #[error("ciphertext is not a whole number of cipher blocks")]
    CipherTextLength,
    #[error("bad block padding; the key is probably wrong")]
    Padding,
}

bitflags! {
    /// User-access bits of the `P` entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Permissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY = 1 << 3;
        const COPY = 1 << 4;
        const ANNOTATE = 1 << 5;
        const FILL_FORMS = 1 << 8;
        const COPY_FOR_ACCESSIBILITY = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_HIGH_QUALITY = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

impl Permissions {
    /// Raw `P` bits: reserved-one bits set, reserved-zero bits cleared.
    pub fn to_p_bits(self) -> u32 {
        (self.bits() | 0xFFFF_F0C0) & !0x0003
    }

    pub fn from_p_bits(bits: u32) -> Self {
        Permissions::from_bits_truncate(bits)
    }
}

/// Writer-side encryption selection.
pub enum EncryptionConfig<'a> {
    /// V1/R2, 40-bit RC4.
    Rc4_40 {
        owner_password: &'a str,
        user_password: &'a str,
        permissions: Permissions,
    },
    /// V2/R3 RC4 with `key_bits` in 40..=128.
    Rc4_128 {
        owner_password: &'a str,
        user_password: &'a str,
        permissions: Permissions,
    },
    /// V4/R4 AES-128 (AESV2).
    Aes128 {
        owner_password: &'a str,
        user_password: &'a str,
        permissions: Permissions,
    },
    /// V5/R6 AES-256 (AESV3).
    Aes256 {
        owner_password: &'a str,
        user_password: &'a str,
        permissions: Permissions,
    },
}

/// Ready-to-use state of the standard security handler: the validated file
/// key plus the crypt-filter selectors.
#[derive(Clone)]
pub struct SecurityHandler {
    version: i64,
    core: PasswordCore,
    file_key: Vec<u8>,
    crypt_filters: BTreeMap<Vec<u8>, Arc<dyn CryptFilter>>,
    stream_filter: Vec<u8>,
    string_filter: Vec<u8>,
}

impl std::fmt::Debug for SecurityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityHandler")
            .field("version", &self.version)
            .field("revision", &self.core.revision)
            .finish_non_exhaustive()
    }
}

const STD_CF: &[u8] = b"StdCF";

impl SecurityHandler {
    pub fn revision(&self) -> i64 {
        self.core.revision
    }

    pub fn encrypt_metadata(&self) -> bool {
        self.core.encrypt_metadata
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_p_bits(self.core.permission_bits)
    }

    /// Build a handler for writing a new document.
    ///
    /// `file_id` is the first element of the trailer `ID` pair; R≤4 key
    /// derivation bakes it into the file key. `encrypt_metadata` is the
    /// writer's EncryptMetadata option and only matters for V4 and V5.
    pub fn for_writing(
        config: &EncryptionConfig,
        file_id: &[u8],
        encrypt_metadata: bool,
    ) -> Result<SecurityHandler, CryptError> {
        match *config {
            EncryptionConfig::Rc4_40 {
                owner_password,
                user_password,
                permissions,
            } => Self::legacy(1, 2, 5, true, owner_password, user_password, permissions, file_id, None),
            EncryptionConfig::Rc4_128 {
                owner_password,
                user_password,
                permissions,
            } => Self::legacy(2, 3, 16, true, owner_password, user_password, permissions, file_id, None),
            EncryptionConfig::Aes128 {
                owner_password,
                user_password,
                permissions,
            } => Self::legacy(
                4,
                4,
                16,
                encrypt_metadata,
                owner_password,
                user_password,
                permissions,
                file_id,
                Some(Arc::new(AesV2Filter)),
            ),
            EncryptionConfig::Aes256 {
                owner_password,
                user_password,
                permissions,
            } => {
                let mut core = PasswordCore {
                    revision: 6,
                    key_bytes: 32,
                    encrypt_metadata,
                    permission_bits: permissions.to_p_bits(),
                    ..Default::default()
                };
                let user_password = sanitize_password_r6(user_password)?;
                let owner_password = sanitize_password_r6(owner_password)?;

                let mut file_key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut file_key);

                let (user_value, user_encrypted) = core.user_value_r6(&file_key, &user_password)?;
                core.user_value = user_value;
                core.user_encrypted = user_encrypted;
                let (owner_value, owner_encrypted) = core.owner_value_r6(&file_key, &owner_password)?;
                core.owner_value = owner_value;
                core.owner_encrypted = owner_encrypted;
                core.perms_encrypted = core.perms_r6(&file_key)?;

                let mut crypt_filters: BTreeMap<Vec<u8>, Arc<dyn CryptFilter>> = BTreeMap::new();
                crypt_filters.insert(STD_CF.to_vec(), Arc::new(AesV3Filter));

                Ok(SecurityHandler {
                    version: 5,
                    core,
                    file_key,
                    crypt_filters,
                    stream_filter: STD_CF.to_vec(),
                    string_filter: STD_CF.to_vec(),
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn legacy(
        version: i64,
        revision: i64,
        key_bytes: usize,
        encrypt_metadata: bool,
        owner_password: &str,
        user_password: &str,
        permissions: Permissions,
        file_id: &[u8],
        aes: Option<Arc<dyn CryptFilter>>,
    ) -> Result<SecurityHandler, CryptError> {
        let mut core = PasswordCore {
            revision,
            key_bytes,
            encrypt_metadata,
            permission_bits: permissions.to_p_bits(),
            ..Default::default()
        };
        let owner_password = sanitize_password_legacy(owner_password)?;
        let user_password = sanitize_password_legacy(user_password)?;

        core.owner_value = core.owner_value_legacy(&owner_password, &user_password)?;
        core.user_value = core.user_value_legacy(&user_password, file_id)?;
        let file_key = core.file_key_legacy(&user_password, file_id)?;

        let mut crypt_filters: BTreeMap<Vec<u8>, Arc<dyn CryptFilter>> = BTreeMap::new();
        let (stream_filter, string_filter) = if let Some(aes) = aes {
            crypt_filters.insert(STD_CF.to_vec(), aes);
            (STD_CF.to_vec(), STD_CF.to_vec())
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(SecurityHandler {
            version,
            core,
            file_key,
            crypt_filters,
            stream_filter,
            string_filter,
        })
    }

    /// Validate a password against a parsed encryption dictionary and
    /// recover the file key.
    pub fn from_dict(dict: &Dictionary, file_id: &[u8], password: &str) -> Result<SecurityHandler, CryptError> {
        let filter = dict
            .get(b"Filter")
            .and_then(Object::as_name)
            .map_err(|_| CryptError::MalformedDictionary)?;
        if filter != b"Standard" {
            return Err(CryptError::UnsupportedHandler(
                String::from_utf8_lossy(filter).into_owned(),
            ));
        }

        let int = |key: &[u8]| dict.get(key).and_then(Object::as_i64);
        let bytes = |key: &[u8]| dict.get(key).and_then(Object::as_string).map(<[u8]>::to_vec);

        let version = int(b"V").map_err(|_| CryptError::MalformedDictionary)?;
        let revision = int(b"R").map_err(|_| CryptError::MalformedDictionary)?;
        match (version, revision) {
            (1, 2) | (2, 3) | (4, 4) | (5, 5) | (5, 6) => {}
            (1 | 2 | 4 | 5, _) => return Err(CryptError::UnsupportedRevision(revision)),
            _ => return Err(CryptError::UnsupportedVersion(version)),
        }

        let length_bits = int(b"Length").unwrap_or(if version == 1 { 40 } else { 128 });
        if length_bits % 8 != 0 || length_bits <= 0 {
            return Err(CryptError::MalformedDictionary);
        }
        let key_bytes = if version == 5 { 32 } else { (length_bits / 8) as usize };

        let core = PasswordCore {
            revision,
            key_bytes,
            encrypt_metadata: dict
                .get(b"EncryptMetadata")
                .and_then(Object::as_bool)
                .unwrap_or(true),
            owner_value: bytes(b"O").map_err(|_| CryptError::MalformedDictionary)?,
            user_value: bytes(b"U").map_err(|_| CryptError::MalformedDictionary)?,
            owner_encrypted: bytes(b"OE").unwrap_or_default(),
            user_encrypted: bytes(b"UE").unwrap_or_default(),
            permission_bits: int(b"P").map_err(|_| CryptError::MalformedDictionary)? as u32,
            perms_encrypted: bytes(b"Perms").unwrap_or_default(),
        };

        let file_key = if version == 5 {
            core.authenticate_r6(&sanitize_password_r6(password)?)?
        } else {
            core.authenticate_legacy(&sanitize_password_legacy(password)?, file_id)?
        };

        let mut handler = SecurityHandler {
            version,
            core,
            file_key,
            crypt_filters: BTreeMap::new(),
            stream_filter: Vec::new(),
            string_filter: Vec::new(),
        };

        // CF/StmF/StrF only mean something for V4 and V5.
        if version >= 4 {
            if let Ok(cf) = dict.get(b"CF").and_then(Object::as_dict) {
                for (name, entry) in cf.iter() {
                    let method = entry
                        .as_dict()
                        .and_then(|d| d.get(b"CFM"))
                        .and_then(Object::as_name)
                        .unwrap_or(b"Identity");
                    handler.crypt_filters.insert(name.clone(), instantiate(method)?);
                }
            }
            if let Ok(name) = dict.get(b"StmF").and_then(Object::as_name) {
                handler.stream_filter = name.to_vec();
            }
            if let Ok(name) = dict.get(b"StrF").and_then(Object::as_name) {
                handler.string_filter = name.to_vec();
            }
        }

        Ok(handler)
    }

    /// The encryption dictionary for the trailer.
    pub fn to_dict(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("Standard"));
        dict.set("V", self.version);
        dict.set("R", self.core.revision);
        dict.set("Length", (self.core.key_bytes * 8) as i64);
        dict.set("O", Object::string_literal(self.core.owner_value.clone()));
        dict.set("U", Object::string_literal(self.core.user_value.clone()));
        dict.set("P", i64::from(self.core.permission_bits as i32));
        if self.version >= 4 {
            dict.set("EncryptMetadata", self.core.encrypt_metadata);
            let mut cf = Dictionary::new();
            for (name, filter) in &self.crypt_filters {
                let mut entry = Dictionary::new();
                entry.set("Type", Object::name("CryptFilter"));
                entry.set("CFM", Object::Name(filter.method().to_vec()));
                cf.set(name.clone(), entry);
            }
            dict.set("CF", cf);
            dict.set("StmF", Object::Name(self.stream_filter.clone()));
            dict.set("StrF", Object::Name(self.string_filter.clone()));
        }
        if self.core.revision >= 5 {
            dict.set("OE", Object::string_literal(self.core.owner_encrypted.clone()));
            dict.set("UE", Object::string_literal(self.core.user_encrypted.clone()));
            dict.set("Perms", Object::string_literal(self.core.perms_encrypted.clone()));
        }
        dict
    }

    fn stream_filter(&self) -> Arc<dyn CryptFilter> {
        self.crypt_filters
            .get(&self.stream_filter)
            .cloned()
            .unwrap_or_else(|| Arc::new(Rc4Filter))
    }

    fn string_filter(&self) -> Arc<dyn CryptFilter> {
        self.crypt_filters
            .get(&self.string_filter)
            .cloned()
            .unwrap_or_else(|| Arc::new(Rc4Filter))
    }

    /// Encrypt every string and stream inside `obj` in place.
    pub fn encrypt_object(&self, id: ObjectId, obj: &mut Object) -> Result<(), CryptError> {
        self.apply(id, obj, true)
    }

    /// Decrypt every string and stream inside `obj` in place.
    pub fn decrypt_object(&self, id: ObjectId, obj: &mut Object) -> Result<(), CryptError> {
        self.apply(id, obj, false)
    }

    fn apply(&self, id: ObjectId, obj: &mut Object, encrypting: bool) -> Result<(), CryptError> {
        if let Object::Stream(stream) = obj {
            // The xref stream is never encrypted; metadata only when asked.
            if stream.dict.has_type(b"XRef") {
                return Ok(());
            }
            if stream.dict.has_type(b"Metadata") && !self.core.encrypt_metadata {
                return Ok(());
            }
        }

        // A stream may route itself through a named Crypt filter; Identity
        // is the fallback when the name is unknown.
        let override_filter = obj
            .as_stream()
            .ok()
            .filter(|stream| {
                stream
                    .filters()
                    .map(|filters| filters.contains(&b"Crypt".as_slice()))
                    .unwrap_or(false)
            })
            .map(|stream| {
                stream
                    .dict
                    .get(b"DecodeParms")
                    .and_then(Object::as_dict)
                    .and_then(|parms| parms.get(b"Name"))
                    .and_then(Object::as_name)
                    .ok()
                    .and_then(|name| self.crypt_filters.get(name).cloned())
                    .unwrap_or_else(|| Arc::new(IdentityFilter))
            });

        let (filter, input) = match obj {
            Object::Array(items) => {
                for item in items {
                    self.apply(id, item, encrypting)?;
                }
                return Ok(());
            }
            Object::Dictionary(dict) => {
                for (_, value) in dict.iter_mut() {
                    self.apply(id, value, encrypting)?;
                }
                return Ok(());
            }
            Object::String(content, _) => (self.string_filter(), &*content),
            Object::Stream(stream) => (override_filter.unwrap_or_else(|| self.stream_filter()), &stream.content),
            _ => return Ok(()),
        };

        let key = filter.object_key(&self.file_key, id)?;
        let output = if encrypting {
            filter.encrypt(&key, input)?
        } else {
            filter.decrypt(&key, input)?
        };

        match obj {
            Object::String(content, _) => *content = output,
            Object::Stream(stream) => stream.set_content(output),
            _ => {}
        }
        Ok(())
    }
}

fn instantiate(method: &[u8]) -> Result<Arc<dyn CryptFilter>, CryptError> {
    match method {
        b"Identity" | b"None" => Ok(Arc::new(IdentityFilter)),
        b"V2" => Ok(Arc::new(Rc4Filter)),
        b"AESV2" => Ok(Arc::new(AesV2Filter)),
        b"AESV3" => Ok(Arc::new(AesV3Filter)),
        other => Err(CryptError::UnsupportedHandler(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    const FILE_ID: &[u8] = b"\x01\x02\x03\x04\x05\x06\x07\x08";

    fn round_trip(config: EncryptionConfig) {
        let writing = SecurityHandler::for_writing(&config, FILE_ID, true).unwrap();
        let dict = writing.to_dict();

        let mut obj = Object::Dictionary(dictionary! {
            "Message" => Object::string_literal("secret"),
            "Number" => 42,
        });
        writing.encrypt_object((3, 0), &mut obj).unwrap();
        assert_ne!(obj.as_dict().unwrap().get(b"Message").unwrap().as_string().unwrap(), b"secret");

        let reading = SecurityHandler::from_dict(&dict, FILE_ID, "u").unwrap();
        reading.decrypt_object((3, 0), &mut obj).unwrap();
        assert_eq!(obj.as_dict().unwrap().get(b"Message").unwrap().as_string().unwrap(), b"secret");
        assert_eq!(obj.as_dict().unwrap().get(b"Number").unwrap().as_i64().unwrap(), 42);

        assert!(matches!(
            SecurityHandler::from_dict(&dict, FILE_ID, "x"),
            Err(CryptError::WrongPassword)
        ));
        assert!(SecurityHandler::from_dict(&dict, FILE_ID, "o").is_ok());
    }

    #[test]
    fn rc4_40_round_trip() {
        round_trip(EncryptionConfig::Rc4_40 {
            owner_password: "o",
            user_password: "u",
            permissions: Permissions::default(),
        });
    }

    #[test]
    fn rc4_128_round_trip() {
        round_trip(EncryptionConfig::Rc4_128 {
            owner_password: "o",
            user_password: "u",
            permissions: Permissions::default(),
        });
    }

    #[test]
    fn aes128_round_trip() {
        round_trip(EncryptionConfig::Aes128 {
            owner_password: "o",
            user_password: "u",
            permissions: Permissions::default(),
        });
    }

    #[test]
    fn aes256_round_trip() {
        round_trip(EncryptionConfig::Aes256 {
            owner_password: "o",
            user_password: "u",
            permissions: Permissions::default(),
        });
    }

    #[test]
    fn xref_streams_stay_plaintext() {
        let handler = SecurityHandler::for_writing(
            &EncryptionConfig::Aes128 {
                owner_password: "o",
                user_password: "u",
                permissions: Permissions::default(),
            },
            FILE_ID,
            true,
        )
        .unwrap();
        let body = b"xref body".to_vec();
        let mut obj = Object::Stream(crate::Stream::new(
            dictionary! { "Type" => Object::name("XRef") },
            body.clone(),
        ));
        handler.encrypt_object((9, 0), &mut obj).unwrap();
        assert_eq!(obj.as_stream().unwrap().content, body);
    }

    #[test]
    fn permission_bits_pattern() {
        let p = Permissions::PRINT | Permissions::COPY;
        let raw = p.to_p_bits();
        assert_eq!(raw & 0x3, 0);
        assert_eq!(raw & 0xFFFF_F000, 0xFFFF_F000);
        assert!(Permissions::from_p_bits(raw).contains(Permissions::PRINT));
        assert!(!Permissions::from_p_bits(raw).contains(Permissions::MODIFY));
    }
}
