use std::fmt::{self, Display};

use rand::distributions::{Distribution, Standard};
use rand::Rng;

use crate::error::{Error, Result};

/// Byte width of one randomized element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Width {
    #[default]
    Byte = 1,
    Word = 2,
    DWord = 4,
    QWord = 8,
}

impl Width {
    pub fn bytes(self) -> usize {
        self as usize
    }
}

impl TryFrom<u64> for Width {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            1 => Ok(Width::Byte),
            2 => Ok(Width::Word),
            4 => Ok(Width::DWord),
            8 => Ok(Width::QWord),
            other => Err(Error::InvalidWidth(other)),
        }
    }
}

impl Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Mask(pub u64);

impl Mask {
    pub const NONE: Mask = Mask(u64::MAX);

    /// Parses a hex mask, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        // from_str_radix tolerates a leading '+', a mask should not.
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidMask(s.to_string()));
        }
        u64::from_str_radix(digits, 16)
            .map(Mask)
            .map_err(|_| Error::InvalidMask(s.to_string()))
    }

    pub fn truncated(self, width: Width) -> u64 {
        match width {
            Width::QWord => self.0,
            w => self.0 & ((1u64 << (w.bytes() * 8)) - 1),
        }
    }
}

impl Default for Mask {
    fn default() -> Self {
        Mask::NONE
    }
}

impl Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

trait Element: Copy + std::ops::BitAnd<Output = Self> {
    const SIZE: usize;

    fn from_mask(mask: u64) -> Self;
    fn store(self, dst: &mut [u8]);
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const SIZE: usize = size_of::<$t>();

                #[inline]
                fn from_mask(mask: u64) -> Self {
                    mask as $t
                }

                #[inline]
                fn store(self, dst: &mut [u8]) {
                    dst.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_element!(u8, u16, u32, u64);

#[inline]
fn fill_as<T, R>(rng: &mut R, region: &mut [u8], mask: u64)
where
    T: Element,
    R: Rng + ?Sized,
    Standard: Distribution<T>,
{
    let mask = T::from_mask(mask);
    for chunk in region.chunks_exact_mut(T::SIZE) {
        let value: T = rng.gen();
        (value & mask).store(chunk);
    }
}

/// Overwrites `region` with `region.len() / width` random elements ANDed with
/// `mask`. Trailing bytes that do not form a whole element are left alone.
pub fn fill<R: Rng + ?Sized>(rng: &mut R, region: &mut [u8], width: Width, mask: Mask) {
    match width {
        Width::Byte => fill_as::<u8, R>(rng, region, mask.0),
        Width::Word => fill_as::<u16, R>(rng, region, mask.0),
        Width::DWord => fill_as::<u32, R>(rng, region, mask.0),
        Width::QWord => fill_as::<u64, R>(rng, region, mask.0),
    }
}
