use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::Digest;

use crate::error::TypeError;
use crate::kind::ObjectKind;
use crate::object::ObjectId;

/// Hash function naming every object in a repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-1, 20-byte identifiers.
    #[default]
    Sha1,
    /// SHA-256, 32-byte identifiers.
    Sha256,
}

impl HashAlgorithm {
    /// Length of a raw identifier in bytes.
    pub const fn raw_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Length of a hex identifier in characters.
    pub const fn hex_len(self) -> usize {
        self.raw_len() * 2
    }

    /// The algorithm whose raw identifiers have `len` bytes.
    pub fn from_raw_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// The algorithm whose hex identifiers have `len` characters.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// A fresh streaming hasher for this algorithm.
    pub fn hasher(self) -> ObjectHasher {
        ObjectHasher::new(self)
    }

    /// Hash raw bytes without object framing (pack trailers, index checksums).
    pub fn digest(self, data: &[u8]) -> ObjectId {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "sha1"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(TypeError::InvalidIdentifier(format!(
                "unknown hash algorithm: {other}"
            ))),
        }
    }
}

enum HasherState {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

/// Streaming hasher producing an [`ObjectId`].
pub struct ObjectHasher {
    state: HasherState,
}

impl ObjectHasher {
    /// Create a hasher for `algorithm`.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha1 => HasherState::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(sha2::Sha256::new()),
        };
        Self { state }
    }

    /// Create a hasher already fed with the git object header for
    /// `kind` and `size`.
    pub fn for_object(algorithm: HashAlgorithm, kind: ObjectKind, size: u64) -> Self {
        let mut hasher = Self::new(algorithm);
        hasher.update(&object_header(kind, size));
        hasher
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
        }
    }

    /// Finish and return the identifier.
    pub fn finish(self) -> ObjectId {
        let raw: Vec<u8> = match self.state {
            HasherState::Sha1(h) => h.finalize().to_vec(),
            HasherState::Sha256(h) => h.finalize().to_vec(),
        };
        ObjectId::from_digest(&raw)
    }
}

/// The canonical `"<type> <size>\0"` header that frames object content.
pub fn object_header(kind: ObjectKind, size: u64) -> Vec<u8> {
    let mut header = format!("{} {size}", kind.name()).into_bytes();
    header.push(0);
    header
}

/// Compute the identifier of an object with the given kind and content.
pub fn hash_object(algorithm: HashAlgorithm, kind: ObjectKind, data: &[u8]) -> ObjectId {
    let mut hasher = ObjectHasher::for_object(algorithm, kind, data.len() as u64);
    hasher.update(data);
    hasher.finish()
}
