//! Pools de chaînes embarquées dans `boot` et `code`
//!
//! Les noms (fichiers DMA, overlays d'acteurs) sont des chaînes C stockées
//! dans les buffers `boot` et `code`, référencées par adresse VRAM. Le
//! décodage consomme ces chaînes ; une fois tous les décodages terminés,
//! l'espace consommé est rendu à l'allocateur du buffer, puis les codecs
//! réinternent leurs chaînes au moment du pack.

use log::debug;
use std::collections::HashMap;

use super::allocator::{AddrRange, RangeAllocator};
use super::interface::{BufferInterface, MAX_STRING_LEN};
use crate::error::{RelocError, Result};

/// Nombre maximal d'octets de bourrage nuls entre deux brins fusionnés
pub const STRAND_PADDING_MAX: u32 = 3;

/// Libère les plages de chaînes consommées.
///
/// Les plages sont triées puis fusionnées en brins ; jusqu'à
/// `STRAND_PADDING_MAX` octets nuls entre deux brins sont absorbés
/// (bourrage d'alignement). Retourne les brins libérés.
pub fn free_strings(
    allocator: &mut RangeAllocator,
    ranges: &[AddrRange],
    data: &[u8],
) -> Vec<AddrRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort();

    let mut strands: Vec<AddrRange> = Vec::new();
    for range in sorted.into_iter().filter(|r| !r.is_empty()) {
        if let Some(last) = strands.last_mut() {
            if range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }

            let gap = range.start - last.end;
            let padding = data.get(last.end as usize..range.start as usize);
            if gap <= STRAND_PADDING_MAX && padding.map_or(false, |p| p.iter().all(|&b| b == 0)) {
                last.end = range.end;
                continue;
            }
        }
        strands.push(range);
    }

    for strand in &strands {
        allocator.free(strand.start, strand.end);
    }

    strands
}

/// État d'un pool de chaînes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    /// Les décodages consomment des chaînes
    Collecting,
    /// L'espace consommé a été rendu, les codecs peuvent allouer
    Reclaimed,
}

/// Pool de chaînes attaché à un buffer mutable
#[derive(Debug, Clone)]
pub struct StringPool {
    /// Adresse VRAM du début du buffer
    vram_start: u32,

    /// Espace libre dans le buffer (offsets)
    allocator: RangeAllocator,

    /// Plages consommées par les décodages
    consumed: Vec<AddrRange>,

    state: PoolState,

    /// Chaînes déjà écrites, par contenu
    interned: HashMap<String, u32>,
}

impl StringPool {
    /// Pool sans queue : les réinternements ne disposent que de l'espace
    /// réclamé, le buffer ne grandit jamais.
    pub fn new(vram_start: u32) -> Self {
        Self {
            vram_start,
            allocator: RangeAllocator::new(),
            consumed: Vec::new(),
            state: PoolState::Collecting,
            interned: HashMap::new(),
        }
    }

    pub fn vram_start(&self) -> u32 {
        self.vram_start
    }

    pub fn allocator(&self) -> &RangeAllocator {
        &self.allocator
    }

    pub fn consumed(&self) -> &[AddrRange] {
        &self.consumed
    }

    pub fn is_reclaimed(&self) -> bool {
        self.state == PoolState::Reclaimed
    }

    /// Convertit une adresse VRAM en offset dans un buffer de `len` octets
    pub fn vram_to_offset(&self, vram: u32, len: usize) -> Result<usize> {
        let offset = vram.checked_sub(self.vram_start).map(|o| o as usize);
        match offset {
            Some(offset) if offset < len => Ok(offset),
            _ => Err(RelocError::format(
                format!("VRAM {:#010x}", vram),
                format!(
                    "address outside of buffer 0x{:08X}-0x{:08X}",
                    self.vram_start,
                    self.vram_start as u64 + len as u64
                ),
            )),
        }
    }

    pub fn offset_to_vram(&self, offset: u32) -> u32 {
        self.vram_start.wrapping_add(offset)
    }

    /// Enregistre une plage consommée par un décodage
    pub fn consume(&mut self, range: AddrRange) -> Result<()> {
        if self.state == PoolState::Reclaimed {
            return Err(RelocError::config(format!(
                "string range {} consumed after the pool was reclaimed",
                range
            )));
        }
        self.consumed.push(range);
        Ok(())
    }

    /// Lit la chaîne à l'adresse VRAM `vram` et la marque comme consommée
    /// (zéro terminal inclus)
    pub fn read_string(&mut self, data: &[u8], vram: u32) -> Result<String> {
        let offset = self.vram_to_offset(vram, data.len())?;
        let (value, end) = data
            .read_c_string(offset, MAX_STRING_LEN)
            .map_err(|e| e.context(format!("string at VRAM {:#010x}", vram)))?;
        self.consume(AddrRange::new(offset as u32, end as u32 + 1))?;
        Ok(value)
    }

    /// Rend l'espace consommé à l'allocateur. Sans effet si déjà fait.
    pub fn reclaim(&mut self, data: &[u8]) -> Vec<AddrRange> {
        if self.state == PoolState::Reclaimed {
            return Vec::new();
        }
        self.state = PoolState::Reclaimed;

        let consumed = std::mem::take(&mut self.consumed);
        let strands = free_strings(&mut self.allocator, &consumed, data);
        debug!(
            "String pool @0x{:08X}: {} ranges reclaimed into {} strands, {} bytes free",
            self.vram_start,
            consumed.len(),
            strands.len(),
            self.allocator.total_free()
        );
        strands
    }

    /// Écrit `value` dans le buffer (une seule copie par contenu) et
    /// retourne son adresse VRAM
    pub fn intern(&mut self, data: &mut [u8], value: &str) -> Result<u32> {
        if self.state == PoolState::Collecting && !self.consumed.is_empty() {
            return Err(RelocError::config(format!(
                "string pool @0x{:08X} written before its consumed strings were reclaimed",
                self.vram_start
            )));
        }
        self.state = PoolState::Reclaimed;

        if let Some(&offset) = self.interned.get(value) {
            return Ok(self.offset_to_vram(offset));
        }

        if !value.is_ascii() || value.as_bytes().contains(&0) {
            return Err(RelocError::format(
                format!("string {:?}", value),
                "embedded strings must be ASCII without NUL bytes",
            ));
        }

        let size = value.len() as u32 + 1;
        let range = self
            .allocator
            .alloc(size, 1)
            .map_err(|e| e.context(format!("interning {:?} @0x{:08X}", value, self.vram_start)))?;

        let mut bytes = Vec::with_capacity(size as usize);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        data.write_block(range.start as usize, &bytes)?;

        self.interned.insert(value.to_string(), range.start);
        Ok(self.offset_to_vram(range.start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_strings_padding() {
        let mut data = vec![0xFFu8; 16];
        data[5..8].fill(0);

        let mut allocator = RangeAllocator::new();
        let strands = free_strings(
            &mut allocator,
            &[AddrRange::new(8, 12), AddrRange::new(0, 5)],
            &data,
        );
        assert_eq!(strands, vec![AddrRange::new(0, 12)]);
        assert_eq!(allocator.free_ranges(), &[AddrRange::new(0, 12)]);
    }

    #[test]
    fn test_free_strings_large_gap() {
        let data = vec![0u8; 16];
        let mut allocator = RangeAllocator::new();
        let strands = free_strings(
            &mut allocator,
            &[AddrRange::new(0, 5), AddrRange::new(9, 12)],
            &data,
        );
        assert_eq!(strands, vec![AddrRange::new(0, 5), AddrRange::new(9, 12)]);
    }

    #[test]
    fn test_free_strings_nonzero_padding() {
        let mut data = vec![0u8; 16];
        data[6] = b'x';
        let mut allocator = RangeAllocator::new();
        let strands = free_strings(
            &mut allocator,
            &[AddrRange::new(0, 5), AddrRange::new(8, 12), AddrRange::new(8, 10)],
            &data,
        );
        assert_eq!(strands, vec![AddrRange::new(0, 5), AddrRange::new(8, 12)]);
    }

    #[test]
    fn test_pool_read_reclaim_intern() -> Result<()> {
        let mut data = b"En_A\0\0\0\0En_B\0\0\0\0\0\0\0".to_vec();
        let mut pool = StringPool::new(0x8000_1000);

        assert_eq!(pool.read_string(&data, 0x8000_1000)?, "En_A");
        assert_eq!(pool.read_string(&data, 0x8000_1008)?, "En_B");
        assert_eq!(
            pool.consumed(),
            &[AddrRange::new(0, 5), AddrRange::new(8, 13)]
        );

        pool.reclaim(&data);
        assert_eq!(pool.allocator().free_ranges(), &[AddrRange::new(0, 13)]);

        let first = pool.intern(&mut data, "En_B")?;
        let again = pool.intern(&mut data, "En_B")?;
        assert_eq!(first, 0x8000_1000);
        assert_eq!(first, again);
        assert_eq!(&data[..5], b"En_B\0");

        let second = pool.intern(&mut data, "En_A")?;
        assert_eq!(second, 0x8000_1005);
        assert_eq!(&data[5..10], b"En_A\0");
        Ok(())
    }

    #[test]
    fn test_pool_intern_before_reclaim() {
        let mut data = b"abc\0....".to_vec();
        let mut pool = StringPool::new(0);
        pool.read_string(&data, 0).unwrap();
        assert!(matches!(pool.intern(&mut data, "x"), Err(RelocError::Config(_))));

        pool.reclaim(&data);
        assert!(pool.intern(&mut data, "x").is_ok());
        assert!(pool.consume(AddrRange::new(0, 1)).is_err());
    }

    #[test]
    fn test_pool_out_of_space() {
        let mut data = b"ab\0".to_vec();
        let mut pool = StringPool::new(0);
        assert_eq!(pool.allocator().tail(), None);
        pool.read_string(&data, 0).unwrap();
        pool.reclaim(&data);
        assert!(pool.intern(&mut data, "abcd").is_err());
        assert!(pool.intern(&mut data, "xy").is_ok());
    }

    #[test]
    fn test_vram_to_offset_bounds() {
        let pool = StringPool::new(0x8000_0000);
        assert_eq!(pool.vram_to_offset(0x8000_0010, 0x20).unwrap(), 0x10);
        assert!(pool.vram_to_offset(0x7FFF_FFFF, 0x20).is_err());
        assert!(pool.vram_to_offset(0x8000_0020, 0x20).is_err());
    }
}
