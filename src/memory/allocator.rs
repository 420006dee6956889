//! Allocateur de plages libres
//!
//! Gère un ensemble de plages `[start, end)` libres sur un espace d'adresses
//! à une dimension (VROM, ROM, ou offsets dans un buffer). Les plages sont
//! gardées triées par adresse, disjointes et jamais contiguës : deux plages
//! qui se touchent sont toujours fusionnées.
//!
//! Une limite de queue optionnelle représente un espace extensible : au-delà
//! de `tail`, tout est considéré libre.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RelocError, Result};

/// Plage d'adresses `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddrRange {
    pub start: u32,
    pub end: u32,
}

impl AddrRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Taille de la plage en octets
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end
    }

    pub fn overlaps(&self, other: &AddrRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}-0x{:08X}", self.start, self.end)
    }
}

/// Arrondit `value` au multiple de `align` supérieur
pub fn align_up(value: u32, align: u32) -> Option<u32> {
    if align <= 1 {
        return Some(value);
    }
    match value % align {
        0 => Some(value),
        rem => value.checked_add(align - rem),
    }
}

/// Allocateur de plages libres
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeAllocator {
    /// Plages libres triées par adresse
    free_ranges: Vec<AddrRange>,

    /// Début de l'espace illimité, s'il existe
    tail: Option<u32>,
}

impl RangeAllocator {
    /// Crée un allocateur vide, sans queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Crée un allocateur vide dont tout l'espace à partir de `tail` est libre
    pub fn with_tail(tail: u32) -> Self {
        Self {
            free_ranges: Vec::new(),
            tail: Some(tail),
        }
    }

    /// Crée un allocateur à partir de plages libres quelconques
    pub fn from_ranges(ranges: impl IntoIterator<Item = (u32, u32)>, tail: Option<u32>) -> Self {
        let mut allocator = Self {
            free_ranges: Vec::new(),
            tail,
        };
        for (start, end) in ranges {
            allocator.free(start, end);
        }
        allocator
    }

    /// Plages libres, triées par adresse
    pub fn free_ranges(&self) -> &[AddrRange] {
        &self.free_ranges
    }

    pub fn tail(&self) -> Option<u32> {
        self.tail
    }

    /// Nombre total d'octets libres (hors queue)
    pub fn total_free(&self) -> u64 {
        self.free_ranges.iter().map(|r| r.len() as u64).sum()
    }

    /// Vérifie que `[start, end)` est entièrement libre
    pub fn is_free(&self, start: u32, end: u32) -> bool {
        if start >= end {
            return true;
        }
        let i = self.free_ranges.partition_point(|r| r.end <= start);
        self.free_ranges
            .get(i)
            .map_or(false, |r| r.start <= start && r.end >= end)
    }

    /// Marque `[start, end)` comme libre, en fusionnant avec les plages
    /// contiguës ou chevauchantes
    pub fn free(&mut self, start: u32, end: u32) {
        if start >= end {
            return;
        }

        // ranges[i-1].end < start <= ranges[i].end
        let i = self.free_ranges.partition_point(|r| r.end < start);

        let mut merged = AddrRange::new(start, end);
        let mut j = i;
        while j < self.free_ranges.len() && self.free_ranges[j].start <= merged.end {
            merged.start = merged.start.min(self.free_ranges[j].start);
            merged.end = merged.end.max(self.free_ranges[j].end);
            j += 1;
        }

        self.free_ranges.splice(i..j, std::iter::once(merged));
    }

    /// Retire de force `[start, end)` de l'espace libre.
    ///
    /// Les portions déjà occupées sont ignorées.
    pub fn alloc_range(&mut self, start: u32, end: u32) {
        if start >= end {
            return;
        }

        // ranges[i-1].end <= start < ranges[i].end
        let i = self.free_ranges.partition_point(|r| r.end <= start);

        let mut remains = Vec::with_capacity(2);
        let mut j = i;
        while j < self.free_ranges.len() && self.free_ranges[j].start < end {
            let range = self.free_ranges[j];
            if range.start < start {
                remains.push(AddrRange::new(range.start, start));
            }
            if range.end > end {
                remains.push(AddrRange::new(end, range.end));
            }
            j += 1;
        }

        self.free_ranges.splice(i..j, remains);
    }

    /// Alloue `size` octets alignés sur `align`.
    ///
    /// La plus petite plage libre pouvant contenir l'allocation alignée est
    /// choisie (à taille égale, la plus basse). Sinon l'allocation se fait en
    /// queue si elle existe.
    pub fn alloc(&mut self, size: u32, align: u32) -> Result<AddrRange> {
        if align == 0 {
            return Err(RelocError::config("allocation alignment must be non-zero"));
        }

        let mut best: Option<(usize, u32)> = None;
        for (i, range) in self.free_ranges.iter().enumerate() {
            let Some(aligned) = align_up(range.start, align) else {
                continue;
            };
            match aligned.checked_add(size) {
                Some(end) if end <= range.end => {}
                _ => continue,
            }
            match best {
                Some((b, _)) if self.free_ranges[b].len() <= range.len() => {}
                _ => best = Some((i, aligned)),
            }
        }

        if let Some((i, aligned)) = best {
            let range = self.free_ranges[i];
            let granted = AddrRange::new(aligned, aligned + size);
            if granted.is_empty() {
                // la plage reste entière, sans deux moitiés contiguës
                return Ok(granted);
            }

            let mut remains = Vec::with_capacity(2);
            if range.start < granted.start {
                remains.push(AddrRange::new(range.start, granted.start));
            }
            if granted.end < range.end {
                remains.push(AddrRange::new(granted.end, range.end));
            }
            self.free_ranges.splice(i..=i, remains);

            return Ok(granted);
        }

        if let Some(tail) = self.tail {
            let out_of_space = RelocError::OutOfSpace { size, align };
            let aligned = align_up(tail, align).ok_or(out_of_space)?;
            let end = aligned
                .checked_add(size)
                .ok_or(RelocError::OutOfSpace { size, align })?;

            self.tail = Some(end);
            self.free(tail, aligned);

            return Ok(AddrRange::new(aligned, end));
        }

        Err(RelocError::OutOfSpace { size, align })
    }
}

impl fmt::Display for RangeAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeAllocator [")?;
        for (i, range) in self.free_ranges.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", range)?;
        }
        write!(f, "]")?;
        if let Some(tail) = self.tail {
            write!(f, " tail 0x{:08X}", tail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(allocator: &RangeAllocator) -> Vec<(u32, u32)> {
        allocator
            .free_ranges()
            .iter()
            .map(|r| (r.start, r.end))
            .collect()
    }

    #[test]
    fn test_free_merges() {
        let mut a = RangeAllocator::new();
        a.free(0, 1);
        assert_eq!(ranges(&a), vec![(0, 1)]);
        a.free(2, 3);
        assert_eq!(ranges(&a), vec![(0, 1), (2, 3)]);
        a.free(1, 2);
        assert_eq!(ranges(&a), vec![(0, 3)]);
        a.free(8, 10);
        assert_eq!(ranges(&a), vec![(0, 3), (8, 10)]);
        a.free(7, 9);
        assert_eq!(ranges(&a), vec![(0, 3), (7, 10)]);
        a.free(2, 11);
        assert_eq!(ranges(&a), vec![(0, 11)]);
    }

    #[test]
    fn test_free_either_order() {
        let mut forward = RangeAllocator::new();
        forward.free(10, 20);
        forward.free(20, 30);

        let mut backward = RangeAllocator::new();
        backward.free(20, 30);
        backward.free(10, 20);

        assert_eq!(ranges(&forward), vec![(10, 30)]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_alloc_range_splits() {
        let mut a = RangeAllocator::from_ranges([(0, 100)], None);
        a.alloc_range(10, 20);
        assert_eq!(ranges(&a), vec![(0, 10), (20, 100)]);

        // portion déjà occupée : ignorée
        a.alloc_range(5, 25);
        assert_eq!(ranges(&a), vec![(0, 5), (25, 100)]);

        a.alloc_range(0, 5);
        assert_eq!(ranges(&a), vec![(25, 100)]);

        a.alloc_range(90, 200);
        assert_eq!(ranges(&a), vec![(25, 90)]);
        assert!(a.is_free(30, 90));
        assert!(!a.is_free(20, 30));
    }

    #[test]
    fn test_alloc_notail() -> Result<()> {
        let mut a = RangeAllocator::from_ranges([(0, 20), (30, 90)], None);
        assert_eq!(a.alloc(10, 1)?, AddrRange::new(0, 10));
        assert_eq!(ranges(&a), vec![(10, 20), (30, 90)]);
        assert_eq!(a.alloc(10, 16)?, AddrRange::new(32, 42));
        assert_eq!(ranges(&a), vec![(10, 20), (30, 32), (42, 90)]);

        assert!(matches!(a.alloc(50, 1), Err(RelocError::OutOfSpace { size: 50, .. })));
        assert!(matches!(a.alloc(49, 1), Err(RelocError::OutOfSpace { .. })));

        assert_eq!(a.alloc(48, 1)?, AddrRange::new(42, 90));
        assert_eq!(ranges(&a), vec![(10, 20), (30, 32)]);
        Ok(())
    }

    #[test]
    fn test_alloc_withtail() -> Result<()> {
        let mut a = RangeAllocator::from_ranges([(0, 20), (30, 90)], Some(100));
        assert_eq!(a.alloc(10, 1)?, AddrRange::new(0, 10));
        assert_eq!(a.alloc(10, 16)?, AddrRange::new(32, 42));
        assert_eq!(a.alloc(50, 1)?, AddrRange::new(100, 150));
        assert_eq!(a.tail(), Some(150));
        assert_eq!(a.alloc(100, 16)?, AddrRange::new(160, 260));
        assert_eq!(a.tail(), Some(260));
        assert_eq!(
            ranges(&a),
            vec![(10, 20), (30, 32), (42, 90), (150, 160)]
        );
        Ok(())
    }

    #[test]
    fn test_alloc_prefers_smallest_range() -> Result<()> {
        let mut a = RangeAllocator::from_ranges([(0, 100), (200, 216), (300, 340)], None);
        assert_eq!(a.alloc(16, 16)?, AddrRange::new(200, 216));
        assert_eq!(a.alloc(20, 1)?, AddrRange::new(300, 320));
        assert_eq!(ranges(&a), vec![(0, 100), (320, 340)]);
        Ok(())
    }

    #[test]
    fn test_alloc_alignment_and_disjointness() -> Result<()> {
        let mut a = RangeAllocator::from_ranges([(3, 500)], None);
        let mut granted = Vec::new();
        for size in [7, 33, 1, 64, 15, 2] {
            let range = a.alloc(size, 16)?;
            assert_eq!(range.start % 16, 0);
            assert_eq!(range.len(), size);
            for other in &granted {
                assert!(!range.overlaps(other));
            }
            for free in a.free_ranges() {
                assert!(!range.overlaps(free));
            }
            granted.push(range);
        }
        Ok(())
    }

    #[test]
    fn test_alloc_empty_keeps_range_whole() -> Result<()> {
        let mut a = RangeAllocator::from_ranges([(0x61, 0x100)], None);
        let granted = a.alloc(0, 0x10)?;
        assert_eq!(granted, AddrRange::new(0x70, 0x70));
        assert_eq!(a.free_ranges(), &[AddrRange::new(0x61, 0x100)]);

        // toujours fusionnées après une allocation non vide
        a.alloc(0x10, 0x10)?;
        for pair in a.free_ranges().windows(2) {
            assert!(pair[0].end < pair[1].start, "{} touches {}", pair[0], pair[1]);
        }
        Ok(())
    }

    #[test]
    fn test_alloc_zero_alignment_rejected() {
        let mut a = RangeAllocator::with_tail(0);
        assert!(matches!(a.alloc(4, 0), Err(RelocError::Config(_))));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), Some(0));
        assert_eq!(align_up(1, 16), Some(16));
        assert_eq!(align_up(17, 1), Some(17));
        assert_eq!(align_up(u32::MAX, 16), None);
    }
}
