//! Identification et vérification des images

use crc32fast::Hasher;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{RelocError, Result};

/// Empreintes d'une image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDigest {
    pub size: usize,
    pub crc32: u32,
    pub md5: String,
    pub sha256: String,
}

impl ImageDigest {
    pub fn compute(data: &[u8]) -> Self {
        Self {
            size: data.len(),
            crc32: Self::calculate_crc32(data),
            md5: Self::calculate_md5(data),
            sha256: Self::calculate_sha256(data),
        }
    }

    /// Calcule le CRC32 d'un buffer
    pub fn calculate_crc32(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Calcule le hash MD5 d'un buffer
    pub fn calculate_md5(data: &[u8]) -> String {
        let mut hasher = md5::Context::new();
        hasher.consume(data);
        format!("{:x}", hasher.finalize())
    }

    /// Calcule le hash SHA256 d'un buffer
    pub fn calculate_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for ImageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes, CRC32 {:08x}, MD5 {}, SHA256 {}",
            self.size, self.crc32, self.md5, self.sha256
        )
    }
}

/// Ordre des octets d'une image N64, déduit des 4 premiers octets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageByteOrder {
    /// `.z64`, big-endian natif
    BigEndian,
    /// `.v64`, octets permutés par paires
    ByteSwapped,
    /// `.n64`, mots little-endian
    LittleEndian,
}

impl ImageByteOrder {
    /// Détecte l'ordre des octets d'après l'en-tête PI (0x80371240)
    pub fn detect(data: &[u8]) -> Option<Self> {
        match data.get(..4)? {
            [0x80, 0x37, 0x12, 0x40] => Some(Self::BigEndian),
            [0x37, 0x80, 0x40, 0x12] => Some(Self::ByteSwapped),
            [0x40, 0x12, 0x37, 0x80] => Some(Self::LittleEndian),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::BigEndian => "z64",
            Self::ByteSwapped => "v64",
            Self::LittleEndian => "n64",
        }
    }

    /// Refuse les images qui ne sont pas en big-endian.
    ///
    /// Un en-tête inconnu est seulement signalé : les images de test
    /// synthétiques n'en ont pas.
    pub fn require_big_endian(data: &[u8]) -> Result<()> {
        match Self::detect(data) {
            Some(Self::BigEndian) => Ok(()),
            Some(order) => Err(RelocError::format(
                "image header",
                format!(
                    "image is in .{} byte order, convert it to big-endian .z64 first",
                    order.extension()
                ),
            )),
            None => {
                log::warn!("Unrecognized image header, assuming big-endian byte order");
                Ok(())
            }
        }
    }
}
