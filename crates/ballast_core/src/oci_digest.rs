use digest::{Digest, DynDigest};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use sha2::Sha512;

use crate::{Error, Result};

// https://github.com/opencontainers/image-spec/blob/main/descriptor.md#digests
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OciDigest {
    algorithm: RegisteredImageSpecAlgorithm,
    encoded: String,
}

impl TryFrom<&str> for OciDigest {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self> {
        let i = match s.find(':') {
            Some(i) => i,
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let algo: &str = match s.get(..i) {
            Some(a) => a,
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let encoded: &str = match s.get(i + 1..) {
            Some(e) if !e.is_empty() => e,
            Some(_) => return Err(Error::InvalidDigest(s.to_string())),
            None => return Err(Error::InvalidDigest(s.to_string())),
        };
        let algorithm: RegisteredImageSpecAlgorithm = algo.try_into()?;

        if encoded.len() != algorithm.encoded_len()
            || !encoded.bytes().all(|b| b.is_ascii_hexdigit())
            || encoded.bytes().any(|b| b.is_ascii_uppercase())
        {
            return Err(Error::InvalidDigest(s.to_string()));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl From<&[u8]> for OciDigest {
    fn from(bs: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, bs);
        let s = hasher.finalize();

        Self {
            algorithm: RegisteredImageSpecAlgorithm::Sha256,
            encoded: format!("{:x}", s),
        }
    }
}

impl From<OciDigest> for String {
    fn from(d: OciDigest) -> String {
        format!("{}:{}", d.algorithm.as_str(), d.encoded)
    }
}

impl From<&OciDigest> for String {
    fn from(d: &OciDigest) -> String {
        format!("{}:{}", d.algorithm.as_str(), d.encoded)
    }
}

impl std::fmt::Display for OciDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.encoded)
    }
}

impl Serialize for OciDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from(self))
    }
}

impl<'de> Deserialize<'de> for OciDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OciDigest::try_from(s.as_str()).map_err(de::Error::custom)
    }
}

impl OciDigest {
    pub fn algorithm(&self) -> &RegisteredImageSpecAlgorithm {
        &self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn digester(&self) -> Digester {
        self.algorithm.digester()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisteredImageSpecAlgorithm {
    Sha256,
    Sha512,
}

impl RegisteredImageSpecAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisteredImageSpecAlgorithm::Sha512 => "sha512",
            RegisteredImageSpecAlgorithm::Sha256 => "sha256",
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            RegisteredImageSpecAlgorithm::Sha256 => 64,
            RegisteredImageSpecAlgorithm::Sha512 => 128,
        }
    }

    pub fn digester(&self) -> Digester {
        match self {
            RegisteredImageSpecAlgorithm::Sha256 => {
                Digester::new(*self, Box::new(Sha256::new()))
            }
            RegisteredImageSpecAlgorithm::Sha512 => {
                Digester::new(*self, Box::new(Sha512::new()))
            }
        }
    }
}

impl TryFrom<&str> for RegisteredImageSpecAlgorithm {
    type Error = Error;

    fn try_from(a: &str) -> Result<Self> {
        match a {
            "sha512" => Ok(RegisteredImageSpecAlgorithm::Sha512),
            "sha256" => Ok(RegisteredImageSpecAlgorithm::Sha256),
            s => Err(Error::UnsupportedDigestAlgorithm(String::from(s))),
        }
    }
}

impl From<&RegisteredImageSpecAlgorithm> for String {
    fn from(a: &RegisteredImageSpecAlgorithm) -> String {
        String::from(a.as_str())
    }
}

/// Incrementally calculates the digest of a byte sequence fed to it in
/// arbitrarily-sized chunks, counting bytes along the way.
pub struct Digester {
    algorithm: RegisteredImageSpecAlgorithm,
    digester: Box<dyn DynDigest + 'static + Send>,
    bytes: u64,
}

impl Digester {
    pub fn new(
        algorithm: RegisteredImageSpecAlgorithm,
        digester: Box<dyn DynDigest + 'static + Send>,
    ) -> Self {
        Self {
            algorithm,
            digester,
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digester.update(data);
        self.bytes += data.len() as u64;
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn algorithm(&self) -> RegisteredImageSpecAlgorithm {
        self.algorithm
    }

    /// Digest of the bytes seen so far without consuming the digester; more
    /// bytes may still be fed afterwards.
    pub fn peek(&self) -> OciDigest {
        let clone = self.digester.box_clone();
        let encoded = hex_encode(&clone.finalize());
        OciDigest {
            algorithm: self.algorithm,
            encoded,
        }
    }

    pub fn finalize(self) -> OciDigest {
        let encoded = hex_encode(&self.digester.finalize());
        OciDigest {
            algorithm: self.algorithm,
            encoded,
        }
    }
}

fn hex_encode(bs: &[u8]) -> String {
    let mut s = String::with_capacity(bs.len() * 2);
    for b in bs {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

impl Default for Digester {
    fn default() -> Self {
        RegisteredImageSpecAlgorithm::Sha256.digester()
    }
}

impl From<&Digester> for DigestState {
    fn from(d: &Digester) -> DigestState {
        DigestState {
            algorithm: String::from(d.algorithm.as_str()),
            bytes: d.bytes,
        }
    }
}

/// Persistable record of how far through an upload a [`Digester`] has read.
///
/// The hash internals themselves are not serializable, so resuming an upload
/// re-reads stored bytes up to `bytes` to rebuild the digester.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DigestState {
    pub algorithm: String,
    pub bytes: u64,
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[rstest]
    #[case::no_colon("sha256meow", false)]
    #[case::empty_encoded("sha256:", false)]
    #[case::empty_algorithm(":meow", false)]
    #[case::unregistered_algorithm(
        "sha666:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        false
    )]
    #[case::not_hex("sha256:meow", false)]
    #[case::wrong_length("sha256:abcd", false)]
    #[case::uppercase_hex(
        "sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
        false
    )]
    #[case::valid_sha256(EMPTY_SHA256, true)]
    #[case::valid_sha512(
        "sha512:cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e",
        true
    )]
    fn validate_try_from(#[case] input: &str, #[case] ok: bool) {
        let actual: Result<OciDigest> = input.try_into();
        assert_eq!(actual.is_ok(), ok, "{input}: {actual:?}");
        if ok {
            assert_eq!(String::from(&actual.unwrap()), input);
        }
    }

    #[test]
    fn digester_matches_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let expected = OciDigest::from(data.as_ref());

        let mut digester = Digester::default();
        for chunk in data.chunks(7) {
            digester.update(chunk);
        }
        assert_eq!(digester.bytes(), data.len() as u64);
        assert_eq!(digester.peek(), expected);
        assert_eq!(digester.finalize(), expected);
    }

    #[test]
    fn empty_digest() {
        let digester = Digester::default();
        assert_eq!(String::from(&digester.finalize()), EMPTY_SHA256);
    }

    #[test]
    fn serde_round_trip() {
        let d: OciDigest = EMPTY_SHA256.try_into().unwrap();
        let s = serde_json::to_string(&d).unwrap();
        assert_eq!(s, format!("\"{EMPTY_SHA256}\""));
        let back: OciDigest = serde_json::from_str(&s).unwrap();
        assert_eq!(back, d);
    }
}
