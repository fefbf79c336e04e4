//! Password validation and file-key derivation for the standard security
//! handler, revisions 2 through 6.

use super::crypt::Rc4;
use super::CryptError;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use md5::{Digest, Md5};
use rand::RngCore;
use sha2::{Sha256, Sha384, Sha512};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256EcbEnc = ecb::Encryptor<aes::Aes256>;
type Aes256EcbDec = ecb::Decryptor<aes::Aes256>;

/// Passwords shorter than 32 bytes borrow the remainder from this string.
const PAD_BYTES: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E, 0x00,
    0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// The password-relevant slice of an encryption dictionary.
#[derive(Clone, Debug, Default)]
pub(crate) struct PasswordCore {
    pub revision: i64,
    pub key_bytes: usize,
    pub encrypt_metadata: bool,
    pub owner_value: Vec<u8>,
    pub owner_encrypted: Vec<u8>,
    pub user_value: Vec<u8>,
    pub user_encrypted: Vec<u8>,
    /// Raw `P` bits as stored in the dictionary.
    pub permission_bits: u32,
    pub perms_encrypted: Vec<u8>,
}

/// R≤4 passwords are codepage bytes; we accept the Latin-1 subset.
pub(crate) fn sanitize_password_legacy(password: &str) -> Result<Vec<u8>, CryptError> {
    password
        .chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| CryptError::UnencodablePassword))
        .collect()
}

/// R6 passwords run through SASLprep and truncate to 127 UTF-8 bytes.
pub(crate) fn sanitize_password_r6(password: &str) -> Result<Vec<u8>, CryptError> {
    let prepared = stringprep::saslprep(password).map_err(|_| CryptError::UnencodablePassword)?;
    let mut bytes = prepared.as_bytes().to_vec();
    bytes.truncate(127);
    Ok(bytes)
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let len = password.len().min(32);
    let mut padded = [0u8; 32];
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PAD_BYTES[..32 - len]);
    padded
}

impl PasswordCore {
    /// Algorithm 2: the R≤4 file encryption key.
    pub fn file_key_legacy(&self, password: &[u8], file_id: &[u8]) -> Result<Vec<u8>, CryptError> {
        let n = self.key_bytes;
        if n > 16 || n == 0 {
            return Err(CryptError::KeyLength);
        }

        let mut hasher = Md5::new();
        hasher.update(pad_password(password));
        hasher.update(&self.owner_value);
        hasher.update(self.permission_bits.to_le_bytes());
        hasher.update(file_id);
        if self.revision >= 4 && !self.encrypt_metadata {
            hasher.update(b"\xff\xff\xff\xff");
        }
        let mut hash = hasher.finalize();

        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..n]);
            }
        }
        Ok(hash[..n].to_vec())
    }

    /// Algorithm 3: the `O` entry for R≤4.
    pub fn owner_value_legacy(&self, owner_password: &[u8], user_password: &[u8]) -> Result<Vec<u8>, CryptError> {
        let rc4_key = self.owner_rc4_key(owner_password)?;
        let mut result = Rc4::new(&rc4_key).apply(&pad_password(user_password));
        if self.revision >= 3 {
            for i in 1..=19u8 {
                let key: Vec<u8> = rc4_key.iter().map(|b| b ^ i).collect();
                result = Rc4::new(&key).apply(&result);
            }
        }
        Ok(result)
    }

    fn owner_rc4_key(&self, owner_password: &[u8]) -> Result<Vec<u8>, CryptError> {
        let n = self.key_bytes;
        if n > 16 || n == 0 {
            return Err(CryptError::KeyLength);
        }
        let mut hash = Md5::digest(pad_password(owner_password));
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(hash);
            }
        }
        Ok(hash[..n].to_vec())
    }

    /// Algorithms 4 and 5: the `U` entry for R≤4.
    pub fn user_value_legacy(&self, password: &[u8], file_id: &[u8]) -> Result<Vec<u8>, CryptError> {
        let file_key = self.file_key_legacy(password, file_id)?;
        if self.revision == 2 {
            return Ok(Rc4::new(&file_key).apply(&PAD_BYTES));
        }

        let mut hasher = Md5::new();
        hasher.update(PAD_BYTES);
        hasher.update(file_id);
        let mut result = Rc4::new(&file_key).apply(&hasher.finalize());
        for i in 1..=19u8 {
            let key: Vec<u8> = file_key.iter().map(|b| b ^ i).collect();
            result = Rc4::new(&key).apply(&result);
        }
        // The trailing 16 bytes are arbitrary padding.
        result.resize(32, 0);
        rand::thread_rng().fill_bytes(&mut result[16..]);
        Ok(result)
    }

    /// Algorithms 6 and 7: R≤4 password checks. Returns the file key.
    pub fn authenticate_legacy(&self, password: &[u8], file_id: &[u8]) -> Result<Vec<u8>, CryptError> {
        // User password first (comparing 16 bytes for R3+).
        let candidate = self.user_value_legacy(password, file_id)?;
        let len = if self.revision >= 3 { 16 } else { candidate.len() };
        if self.user_value.len() >= len && candidate[..len] == self.user_value[..len] {
            return self.file_key_legacy(password, file_id);
        }

        // Owner password: undo the RC4 cascade over O to recover the user
        // password, then re-check.
        let rc4_key = self.owner_rc4_key(password)?;
        let mut recovered = self.owner_value.clone();
        if self.revision >= 3 {
            for i in (1..=19u8).rev() {
                let key: Vec<u8> = rc4_key.iter().map(|b| b ^ i).collect();
                recovered = Rc4::new(&key).apply(&recovered);
            }
        }
        recovered = Rc4::new(&rc4_key).apply(&recovered);

        let candidate = self.user_value_legacy(&recovered, file_id)?;
        if self.user_value.len() >= len && candidate[..len] == self.user_value[..len] {
            return self.file_key_legacy(&recovered, file_id);
        }
        Err(CryptError::WrongPassword)
    }

    /// Algorithm 2.B: the R5/R6 password hash.
    fn hash_r6(&self, password: &[u8], salt: &[u8], user_key: Option<&[u8]>) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        if let Some(user_key) = user_key {
            hasher.update(user_key);
        }
        let mut k = hasher.finalize().to_vec();
        if self.revision == 5 {
            return k;
        }

        let mut round = 0u32;
        loop {
            round += 1;
            let mut k1 = Vec::with_capacity(64 * (password.len() + k.len() + user_key.map_or(0, <[u8]>::len)));
            for _ in 0..64 {
                k1.extend_from_slice(password);
                k1.extend_from_slice(&k);
                if let Some(user_key) = user_key {
                    k1.extend_from_slice(user_key);
                }
            }
            let mut encryptor = Aes128CbcEnc::new((&k[..16]).into(), (&k[16..32]).into());
            for block in k1.chunks_exact_mut(16) {
                encryptor.encrypt_block_mut(block.into());
            }
            let modulo = k1[..16].iter().map(|&v| u32::from(v)).sum::<u32>() % 3;
            k = match modulo {
                0 => Sha256::digest(&k1).to_vec(),
                1 => Sha384::digest(&k1).to_vec(),
                _ => Sha512::digest(&k1).to_vec(),
            };
            if round >= 64 && u32::from(*k1.last().unwrap_or(&0)) <= round - 32 {
                break;
            }
        }
        k.truncate(32);
        k
    }

    /// Algorithm 8: generate `U`/`UE` for a fresh R5/R6 file key.
    pub fn user_value_r6(&self, file_key: &[u8], password: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptError> {
        let mut user_value = [0u8; 48];
        rand::thread_rng().fill_bytes(&mut user_value[32..]);
        let hash = self.hash_r6(password, &user_value[32..40], None);
        user_value[..32].copy_from_slice(&hash);

        let wrap_key = self.hash_r6(password, &user_value[40..48], None);
        let user_encrypted = aes256_cbc_zero_iv(&wrap_key, file_key, true)?;
        Ok((user_value.to_vec(), user_encrypted))
    }

    /// Algorithm 9: generate `O`/`OE`; requires `user_value` to be set.
    pub fn owner_value_r6(&self, file_key: &[u8], password: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptError> {
        let mut owner_value = [0u8; 48];
        rand::thread_rng().fill_bytes(&mut owner_value[32..]);
        let hash = self.hash_r6(password, &owner_value[32..40], Some(&self.user_value));
        owner_value[..32].copy_from_slice(&hash);

        let wrap_key = self.hash_r6(password, &owner_value[40..48], Some(&self.user_value));
        let owner_encrypted = aes256_cbc_zero_iv(&wrap_key, file_key, true)?;
        Ok((owner_value.to_vec(), owner_encrypted))
    }

    /// Algorithm 10: the encrypted `Perms` block.
    pub fn perms_r6(&self, file_key: &[u8]) -> Result<Vec<u8>, CryptError> {
        if file_key.len() != 32 {
            return Err(CryptError::KeyLength);
        }
        let mut block = [0u8; 16];
        // P is a signed 32-bit value; the 8-byte field sign-extends it.
        let extended = i64::from(self.permission_bits as i32) as u64;
        block[..8].copy_from_slice(&extended.to_le_bytes());
        block[8] = if self.encrypt_metadata { b'T' } else { b'F' };
        block[9..12].copy_from_slice(b"adb");
        rand::thread_rng().fill_bytes(&mut block[12..]);

        let mut encryptor = Aes256EcbEnc::new(file_key.into());
        encryptor.encrypt_block_mut((&mut block).into());
        Ok(block.to_vec())
    }

    /// Algorithms 2.A, 11, 12 and 13: R5/R6 password check, file-key
    /// recovery and permission validation.
    pub fn authenticate_r6(&self, password: &[u8]) -> Result<Vec<u8>, CryptError> {
        if self.owner_value.len() < 48 || self.user_value.len() < 48 {
            return Err(CryptError::MalformedDictionary);
        }

        // Owner check: hash with the owner validation salt and the U block.
        let owner_hash = self.hash_r6(password, &self.owner_value[32..40], Some(&self.user_value[..48]));
        if owner_hash == self.owner_value[..32] {
            let wrap_key = self.hash_r6(password, &self.owner_value[40..48], Some(&self.user_value[..48]));
            let file_key = aes256_cbc_zero_iv(&wrap_key, &self.owner_encrypted, false)?;
            self.validate_perms(&file_key)?;
            return Ok(file_key);
        }

        // User check.
        let user_hash = self.hash_r6(password, &self.user_value[32..40], None);
        if user_hash == self.user_value[..32] {
            let wrap_key = self.hash_r6(password, &self.user_value[40..48], None);
            let file_key = aes256_cbc_zero_iv(&wrap_key, &self.user_encrypted, false)?;
            self.validate_perms(&file_key)?;
            return Ok(file_key);
        }

        Err(CryptError::WrongPassword)
    }

    fn validate_perms(&self, file_key: &[u8]) -> Result<(), CryptError> {
        if file_key.len() != 32 {
            return Err(CryptError::KeyLength);
        }
        if self.perms_encrypted.len() != 16 {
            // Absent Perms happens in the wild for R5; skip the check.
            return Ok(());
        }
        let mut block = [0u8; 16];
        block.copy_from_slice(&self.perms_encrypted);
        let mut decryptor = Aes256EcbDec::new(file_key.into());
        decryptor.decrypt_block_mut((&mut block).into());

        if &block[9..12] != b"adb" {
            return Err(CryptError::MalformedDictionary);
        }
        let declared = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        if declared != self.permission_bits {
            return Err(CryptError::MalformedDictionary);
        }
        Ok(())
    }
}

fn aes256_cbc_zero_iv(key: &[u8], data: &[u8], encrypt: bool) -> Result<Vec<u8>, CryptError> {
    if key.len() != 32 {
        return Err(CryptError::KeyLength);
    }
    if data.len() % 16 != 0 {
        return Err(CryptError::CipherTextLength);
    }
    let iv = [0u8; 16];
    let mut buffer = data.to_vec();
    if encrypt {
        let mut encryptor = Aes256CbcEnc::new(key.into(), (&iv).into());
        for block in buffer.chunks_exact_mut(16) {
            encryptor.encrypt_block_mut(block.into());
        }
    } else {
        let mut decryptor = Aes256CbcDec::new(key.into(), (&iv).into());
        for block in buffer.chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(block.into());
        }
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_core(revision: i64, key_bytes: usize) -> PasswordCore {
        PasswordCore {
            revision,
            key_bytes,
            encrypt_metadata: true,
            permission_bits: 0xFFFF_F0C0,
            ..Default::default()
        }
    }

    #[test]
    fn r2_authentication_round_trip() {
        let file_id = b"0123456789abcdef";
        let mut core = legacy_core(2, 5);
        core.owner_value = core.owner_value_legacy(b"owner", b"user").unwrap();
        core.user_value = core.user_value_legacy(b"user", file_id).unwrap();

        let key = core.authenticate_legacy(b"user", file_id).unwrap();
        assert_eq!(key.len(), 5);
        assert_eq!(core.authenticate_legacy(b"owner", file_id).unwrap(), key);
        assert!(matches!(
            core.authenticate_legacy(b"nope", file_id),
            Err(CryptError::WrongPassword)
        ));
    }

    #[test]
    fn r4_authentication_round_trip() {
        let file_id = b"fedcba9876543210";
        let mut core = legacy_core(4, 16);
        core.owner_value = core.owner_value_legacy(b"admin", b"u").unwrap();
        core.user_value = core.user_value_legacy(b"u", file_id).unwrap();

        let key = core.authenticate_legacy(b"u", file_id).unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(core.authenticate_legacy(b"admin", file_id).unwrap(), key);
        assert!(core.authenticate_legacy(b"x", file_id).is_err());
    }

    #[test]
    fn r6_authentication_round_trip() {
        let mut file_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut file_key);

        let mut core = PasswordCore {
            revision: 6,
            key_bytes: 32,
            encrypt_metadata: true,
            permission_bits: 0xFFFF_F0C0,
            ..Default::default()
        };
        let (user_value, user_encrypted) = core.user_value_r6(&file_key, b"user").unwrap();
        core.user_value = user_value;
        core.user_encrypted = user_encrypted;
        let (owner_value, owner_encrypted) = core.owner_value_r6(&file_key, b"owner").unwrap();
        core.owner_value = owner_value;
        core.owner_encrypted = owner_encrypted;
        core.perms_encrypted = core.perms_r6(&file_key).unwrap();

        assert_eq!(core.authenticate_r6(b"user").unwrap(), file_key);
        assert_eq!(core.authenticate_r6(b"owner").unwrap(), file_key);
        assert!(matches!(core.authenticate_r6(b"bad"), Err(CryptError::WrongPassword)));
    }

    #[test]
    fn saslprep_is_applied() {
        // NFKC: U+2126 OHM SIGN normalises to U+03A9 GREEK CAPITAL OMEGA.
        assert_eq!(
            sanitize_password_r6("\u{2126}").unwrap(),
            "\u{03A9}".as_bytes().to_vec()
        );
        assert!(sanitize_password_legacy("ascii pass").is_ok());
        assert!(sanitize_password_legacy("т").is_err());
    }
}
