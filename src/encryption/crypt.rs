//! Crypt filters: the per-object cipher algorithms of the standard
//! security handler.

use super::CryptError;
use crate::ObjectId;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use rand::RngCore;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// One concrete cipher, selected through the encryption dictionary's
/// `CF`/`StmF`/`StrF` machinery (or implied by `V` for V≤2 files).
pub trait CryptFilter: std::fmt::Debug + Send + Sync {
    /// The `CFM` name this filter is registered under.
    fn method(&self) -> &'static [u8];
    /// Derive the per-object key from the file key and the object id.
    fn object_key(&self, file_key: &[u8], id: ObjectId) -> Result<Vec<u8>, CryptError>;
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptError>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptError>;
}

/// MD5 of file key ∥ low 3 bytes of the object number ∥ low 2 bytes of the
/// generation, plus the AES salt when `salted`; truncated to n+5 bytes
/// (16 max).
fn derive_object_key(file_key: &[u8], id: ObjectId, salted: bool) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(file_key);
    hasher.update(&id.0.to_le_bytes()[..3]);
    hasher.update(&id.1.to_le_bytes()[..2]);
    if salted {
        hasher.update(b"sAlT");
    }
    let len = (file_key.len() + 5).min(16);
    hasher.finalize()[..len].to_vec()
}

#[derive(Clone, Copy, Debug)]
pub struct IdentityFilter;

impl CryptFilter for IdentityFilter {
    fn method(&self) -> &'static [u8] {
        b"Identity"
    }

    fn object_key(&self, file_key: &[u8], _id: ObjectId) -> Result<Vec<u8>, CryptError> {
        Ok(file_key.to_vec())
    }

    fn encrypt(&self, _key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptError> {
        Ok(ciphertext.to_vec())
    }
}

/// `V2`: RC4 with a per-object MD5 key.
#[derive(Clone, Copy, Debug)]
pub struct Rc4Filter;

impl CryptFilter for Rc4Filter {
    fn method(&self) -> &'static [u8] {
        b"V2"
    }

    fn object_key(&self, file_key: &[u8], id: ObjectId) -> Result<Vec<u8>, CryptError> {
        Ok(derive_object_key(file_key, id, false))
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        Ok(Rc4::new(key).apply(plaintext))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptError> {
        Ok(Rc4::new(key).apply(ciphertext))
    }
}

/// `AESV2`: AES-128-CBC, PKCS#5 padding, random IV prefixed to the body.
#[derive(Clone, Copy, Debug)]
pub struct AesV2Filter;

impl CryptFilter for AesV2Filter {
    fn method(&self) -> &'static [u8] {
        b"AESV2"
    }

    fn object_key(&self, file_key: &[u8], id: ObjectId) -> Result<Vec<u8>, CryptError> {
        Ok(derive_object_key(file_key, id, true))
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if key.len() != 16 {
            return Err(CryptError::KeyLength);
        }
        let (iv, mut buffer) = stage_cbc(plaintext);
        let written = Aes128CbcEnc::new(key.into(), &iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
            .map_err(|_| CryptError::Padding)?
            .len();
        buffer.truncate(written);
        let mut out = iv.to_vec();
        out.append(&mut buffer);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if key.len() != 16 {
            return Err(CryptError::KeyLength);
        }
        let (iv, mut body) = split_cbc(ciphertext)?;
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let len = Aes128CbcDec::new(key.into(), &iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut body)
            .map_err(|_| CryptError::Padding)?
            .len();
        body.truncate(len);
        Ok(body)
    }
}

/// `AESV3`: AES-256-CBC with the file key used directly.
#[derive(Clone, Copy, Debug)]
pub struct AesV3Filter;

impl CryptFilter for AesV3Filter {
    fn method(&self) -> &'static [u8] {
        b"AESV3"
    }

    fn object_key(&self, file_key: &[u8], _id: ObjectId) -> Result<Vec<u8>, CryptError> {
        Ok(file_key.to_vec())
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if key.len() != 32 {
            return Err(CryptError::KeyLength);
        }
        let (iv, mut buffer) = stage_cbc(plaintext);
        let written = Aes256CbcEnc::new(key.into(), &iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
            .map_err(|_| CryptError::Padding)?
            .len();
        buffer.truncate(written);
        let mut out = iv.to_vec();
        out.append(&mut buffer);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if key.len() != 32 {
            return Err(CryptError::KeyLength);
        }
        let (iv, mut body) = split_cbc(ciphertext)?;
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let len = Aes256CbcDec::new(key.into(), &iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut body)
            .map_err(|_| CryptError::Padding)?
            .len();
        body.truncate(len);
        Ok(body)
    }
}

fn stage_cbc(plaintext: &[u8]) -> ([u8; 16], Vec<u8>) {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let padded = (plaintext.len() / 16 + 1) * 16;
    let mut buffer = vec![0u8; padded];
    buffer[..plaintext.len()].copy_from_slice(plaintext);
    (iv, buffer)
}

fn split_cbc(ciphertext: &[u8]) -> Result<([u8; 16], Vec<u8>), CryptError> {
    if ciphertext.len() < 16 || ciphertext.len() % 16 != 0 {
        return Err(CryptError::CipherTextLength);
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&ciphertext[..16]);
    Ok((iv, ciphertext[16..].to_vec()))
}

/// Plain RC4. Key schedule is computed once; the keystream restarts for
/// every `apply`.
pub struct Rc4 {
    state: [u8; 256],
}

impl Rc4 {
    pub fn new<K: AsRef<[u8]>>(key: K) -> Self {
        let key = key.as_ref();
        debug_assert!(!key.is_empty() && key.len() <= 256);
        let mut state = [0u8; 256];
        for (i, slot) in state.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }
        Self { state }
    }

    /// RC4 is symmetric; this both encrypts and decrypts.
    pub fn apply(&self, input: &[u8]) -> Vec<u8> {
        let mut state = self.state;
        let mut output = Vec::with_capacity(input.len());
        let mut i = 0u8;
        let mut j = 0u8;
        for &byte in input {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            let keystream = state[state[i as usize].wrapping_add(state[j as usize]) as usize];
            output.push(byte ^ keystream);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc4_test_vectors() {
        // Known vectors from the original cypherpunks posting.
        let cases: &[(&[u8], &[u8], &[u8])] = &[
            (
                b"\x01\x23\x45\x67\x89\xab\xcd\xef",
                b"\x01\x23\x45\x67\x89\xab\xcd\xef",
                b"\x75\xb7\x87\x80\x99\xe0\xc5\x96",
            ),
            (
                b"\x01\x23\x45\x67\x89\xab\xcd\xef",
                b"\x00\x00\x00\x00\x00\x00\x00\x00",
                b"\x74\x94\xc2\xe7\x10\x4b\x08\x79",
            ),
            (
                b"\x00\x00\x00\x00\x00\x00\x00\x00",
                b"\x00\x00\x00\x00\x00\x00\x00\x00",
                b"\xde\x18\x89\x41\xa3\x37\x5d\x3a",
            ),
        ];
        for (key, plain, cipher) in cases {
            let rc4 = Rc4::new(key);
            assert_eq!(rc4.apply(plain), *cipher);
            assert_eq!(rc4.apply(cipher), *plain);
        }
    }

    #[test]
    fn aes_filters_round_trip() {
        let plaintext = b"per-object body bytes, longer than one block".as_slice();

        let v2 = AesV2Filter;
        let key = v2.object_key(&[7u8; 16], (12, 0)).unwrap();
        assert_eq!(key.len(), 16);
        let sealed = v2.encrypt(&key, plaintext).unwrap();
        assert_ne!(&sealed[16..], plaintext);
        assert_eq!(v2.decrypt(&key, &sealed).unwrap(), plaintext);

        let v3 = AesV3Filter;
        let key = v3.object_key(&[9u8; 32], (12, 0)).unwrap();
        assert_eq!(key, vec![9u8; 32]);
        let sealed = v3.encrypt(&key, plaintext).unwrap();
        assert_eq!(v3.decrypt(&key, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn object_keys_differ_per_object() {
        let rc4 = Rc4Filter;
        let a = rc4.object_key(&[1u8; 16], (1, 0)).unwrap();
        let b = rc4.object_key(&[1u8; 16], (2, 0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_aes_body_is_rejected() {
        let v2 = AesV2Filter;
        assert!(matches!(
            v2.decrypt(&[0u8; 16], &[1, 2, 3]),
            Err(CryptError::CipherTextLength)
        ));
    }
}
