// Priority bands for every rule category.
//
// Each category owns a disjoint, contiguous range of priorities so features
// can be toggled independently without shifting anything else. The firewall
// evaluates rules in ascending priority and ALLOW/BLOCK short-circuit, so this
// table is the evaluation order contract:
//
//   pre-custom  < 10 (caller-supplied)
//   block-v4    1-2      block-v6   3-4
//   allow-path  10       allow-v4   11-12    allow-v6  13-14   allow-ua  15
//   managed     20-26
//   rate-limit  30
//   post-custom > 30 (caller-supplied)
//
// The blocklist bands sit inside the pre-custom range. Their slots are
// reserved even when the blocklists are disabled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;

use crate::compile_error::CompileError;

// ============================================================================
// Band table
// ============================================================================

/// A reserved range of priorities assigned to one rule category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityBand {
    /// Caller pre-rules, evaluated before everything generated
    PreCustom,
    /// IPv4 blocklist (forwarded-IP rule, source-IP rule)
    BlockV4,
    /// IPv6 blocklist (forwarded-IP rule, source-IP rule)
    BlockV6,
    /// URI path allowlist
    AllowPath,
    /// IPv4 allowlist
    AllowV4,
    /// IPv6 allowlist
    AllowV6,
    /// User-Agent allowlist
    AllowUserAgent,
    /// Vendor managed rule groups
    Managed,
    /// Rate-based rule
    RateLimit,
    /// Caller post-rules, evaluated after everything generated
    PostCustom,
}

impl PriorityBand {
    /// All bands in table order
    pub fn all() -> [PriorityBand; 10] {
        [
            PriorityBand::PreCustom,
            PriorityBand::BlockV4,
            PriorityBand::BlockV6,
            PriorityBand::AllowPath,
            PriorityBand::AllowV4,
            PriorityBand::AllowV6,
            PriorityBand::AllowUserAgent,
            PriorityBand::Managed,
            PriorityBand::RateLimit,
            PriorityBand::PostCustom,
        ]
    }

    /// Bands whose slots are assigned by the compiler
    pub fn fixed() -> impl Iterator<Item = PriorityBand> {
        Self::all().into_iter().filter(|band| band.is_fixed())
    }

    /// Inclusive priority range owned by the band
    pub fn range(&self) -> RangeInclusive<u32> {
        match self {
            PriorityBand::PreCustom => 0..=9,
            PriorityBand::BlockV4 => 1..=2,
            PriorityBand::BlockV6 => 3..=4,
            PriorityBand::AllowPath => 10..=10,
            PriorityBand::AllowV4 => 11..=12,
            PriorityBand::AllowV6 => 13..=14,
            PriorityBand::AllowUserAgent => 15..=15,
            PriorityBand::Managed => 20..=26,
            PriorityBand::RateLimit => 30..=30,
            PriorityBand::PostCustom => 31..=u32::MAX,
        }
    }

    /// Number of slots in a fixed band
    pub fn width(&self) -> usize {
        let range = self.range();
        (*range.end() - *range.start()) as usize + 1
    }

    /// Caller-supplied bands are open ranges validated rather than allocated
    pub fn is_custom(&self) -> bool {
        matches!(self, PriorityBand::PreCustom | PriorityBand::PostCustom)
    }

    pub fn is_fixed(&self) -> bool {
        !self.is_custom()
    }

    pub fn contains(&self, priority: u32) -> bool {
        self.range().contains(&priority)
    }

    /// Fixed band owning the priority, if any
    pub fn fixed_band_of(priority: u32) -> Option<PriorityBand> {
        Self::fixed().find(|band| band.contains(priority))
    }

    /// Band a compiled rule with this priority belongs to.
    ///
    /// Fixed bands win over the custom range they sit inside. Gaps between
    /// bands (16-19, 27-29) belong to nothing.
    pub fn classify(priority: u32) -> Option<PriorityBand> {
        Self::fixed_band_of(priority).or_else(|| {
            [PriorityBand::PreCustom, PriorityBand::PostCustom]
                .into_iter()
                .find(|band| band.contains(priority))
        })
    }
}

impl fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityBand::PreCustom => write!(f, "pre-custom"),
            PriorityBand::BlockV4 => write!(f, "block-v4"),
            PriorityBand::BlockV6 => write!(f, "block-v6"),
            PriorityBand::AllowPath => write!(f, "allow-path"),
            PriorityBand::AllowV4 => write!(f, "allow-v4"),
            PriorityBand::AllowV6 => write!(f, "allow-v6"),
            PriorityBand::AllowUserAgent => write!(f, "allow-ua"),
            PriorityBand::Managed => write!(f, "managed"),
            PriorityBand::RateLimit => write!(f, "rate-limit"),
            PriorityBand::PostCustom => write!(f, "post-custom"),
        }
    }
}

// ============================================================================
// Allocator
// ============================================================================

/// Hands out slots within fixed bands for one compilation.
///
/// Each fixed band has a cursor pointing at its next free slot. A fresh
/// allocator is created per compile, so no state leaks between policies.
#[derive(Debug, Clone)]
pub struct PriorityAllocator {
    next_free: HashMap<PriorityBand, u32>,
}

impl PriorityAllocator {
    pub fn new() -> Self {
        let next_free = PriorityBand::fixed()
            .map(|band| (band, *band.range().start()))
            .collect();
        Self { next_free }
    }

    /// Slots still free in a fixed band
    pub fn available(&self, band: PriorityBand) -> usize {
        match self.next_free.get(&band) {
            Some(next) if next <= band.range().end() => (band.range().end() - next) as usize + 1,
            _ => 0,
        }
    }

    /// Take the next `count` consecutive slots of a fixed band
    pub fn allocate(&mut self, band: PriorityBand, count: usize) -> Result<Vec<u32>, CompileError> {
        let next = self.cursor(band)?;
        let available = self.available(band);
        if count > available {
            return Err(CompileError::BandExhausted {
                band,
                requested: count,
                available,
            });
        }

        let slots: Vec<u32> = (next..next + count as u32).collect();
        self.next_free.insert(band, next + count as u32);
        Ok(slots)
    }

    /// Take one specific slot of a fixed band.
    ///
    /// Used where the position inside a band is itself part of the contract
    /// (managed groups keep their slot even when earlier groups are off).
    /// Claims must move forward through the band.
    pub fn claim(&mut self, band: PriorityBand, priority: u32) -> Result<u32, CompileError> {
        let next = self.cursor(band)?;
        if !band.contains(priority) {
            return Err(CompileError::InternalInvariant(format!(
                "priority {} requested outside band {} ({:?})",
                priority,
                band,
                band.range()
            )));
        }
        if priority < next {
            return Err(CompileError::InternalInvariant(format!(
                "priority {} in band {} already allocated",
                priority, band
            )));
        }

        self.next_free.insert(band, priority + 1);
        Ok(priority)
    }

    /// Check a caller-supplied priority against its custom band.
    ///
    /// The priority must fall inside the band's open range and must not land
    /// on a slot reserved by a fixed band.
    pub fn check_custom(
        &self,
        band: PriorityBand,
        rule_name: &str,
        priority: u32,
    ) -> Result<(), CompileError> {
        if !band.is_custom() {
            return Err(CompileError::InternalInvariant(format!(
                "band {} is not a custom band",
                band
            )));
        }

        if !band.contains(priority) {
            let reason = match band {
                PriorityBand::PreCustom => "pre-rules must use a priority below 10",
                _ => "post-rules must use a priority above 30",
            };
            return Err(CompileError::PriorityCollision {
                rule_name: rule_name.to_string(),
                priority,
                reason: reason.to_string(),
            });
        }

        if let Some(reserved) = PriorityBand::fixed_band_of(priority) {
            return Err(CompileError::PriorityCollision {
                rule_name: rule_name.to_string(),
                priority,
                reason: format!("priority is reserved by the {} band", reserved),
            });
        }

        Ok(())
    }

    fn cursor(&self, band: PriorityBand) -> Result<u32, CompileError> {
        self.next_free.get(&band).copied().ok_or_else(|| {
            CompileError::InternalInvariant(format!(
                "band {} is caller-supplied and cannot be allocated",
                band
            ))
        })
    }
}

impl Default for PriorityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
