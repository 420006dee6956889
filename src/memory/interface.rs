//! Accès big-endian aux buffers de fichiers
//!
//! Les tables de l'image N64 sont stockées en big-endian. Ce trait fournit
//! les lectures/écritures bornées utilisées par tous les codecs.

use crate::error::{RelocError, Result};

/// Longueur maximale d'une chaîne embarquée (garde-fou)
pub const MAX_STRING_LEN: usize = 100;

/// Trait définissant les accès bornés à un buffer d'octets
pub trait BufferInterface {
    /// Lit un bloc de `size` octets
    fn read_block(&self, offset: usize, size: usize) -> Result<&[u8]>;

    /// Écrit un bloc de données
    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.read_block(offset, 1)?[0])
    }

    fn read_i8(&self, offset: usize) -> Result<i8> {
        Ok(self.read_u8(offset)? as i8)
    }

    fn read_u16(&self, offset: usize) -> Result<u16> {
        let b = self.read_block(offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&self, offset: usize) -> Result<u32> {
        let b = self.read_block(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.write_block(offset, &[value])
    }

    fn write_i8(&mut self, offset: usize, value: i8) -> Result<()> {
        self.write_u8(offset, value as u8)
    }

    fn write_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write_block(offset, &value.to_be_bytes())
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write_block(offset, &value.to_be_bytes())
    }

    /// Lit une chaîne ASCII terminée par un zéro.
    ///
    /// Retourne la chaîne et l'offset du zéro terminal.
    fn read_c_string(&self, offset: usize, max_len: usize) -> Result<(String, usize)>;
}

impl BufferInterface for [u8] {
    fn read_block(&self, offset: usize, size: usize) -> Result<&[u8]> {
        offset
            .checked_add(size)
            .and_then(|end| self.get(offset..end))
            .ok_or(RelocError::OutOfBounds {
                offset,
                size,
                len: self.len(),
            })
    }

    fn write_block(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let len = self.len();
        let target = offset
            .checked_add(data.len())
            .and_then(|end| self.get_mut(offset..end))
            .ok_or(RelocError::OutOfBounds {
                offset,
                size: data.len(),
                len,
            })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_c_string(&self, offset: usize, max_len: usize) -> Result<(String, usize)> {
        if offset >= self.len() {
            return Err(RelocError::OutOfBounds {
                offset,
                size: 1,
                len: self.len(),
            });
        }

        let mut end = offset;
        while self[end] != 0 {
            end += 1;
            if end >= self.len() {
                return Err(RelocError::format(
                    format!("offset {:#x}", offset),
                    "string runs past the end of the buffer",
                ));
            }
            if end - offset >= max_len {
                return Err(RelocError::format(
                    format!("offset {:#x}", offset),
                    format!("string longer than {} bytes", max_len),
                ));
            }
        }

        let bytes = &self[offset..end];
        if !bytes.is_ascii() {
            return Err(RelocError::format(
                format!("offset {:#x}", offset),
                "string is not ASCII",
            ));
        }

        Ok((String::from_utf8_lossy(bytes).into_owned(), end))
    }
}
