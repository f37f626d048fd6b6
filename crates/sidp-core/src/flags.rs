//! Typed flag sets.
//!
//! A connection tracks three independent sets: features it supports,
//! features agreed with the peer, and milestones reached. Features and
//! milestones are different enums, so a [`FlagSet<Status>`] can never hold a
//! [`Feature`] and vice versa.

use std::fmt;
use std::marker::PhantomData;

use sidp_crypto::CipherKind;

use crate::compression::CompressionKind;

/// An enumeration usable as a bit position in a [`FlagSet`].
pub trait Flag: Copy + Eq + fmt::Debug + 'static {
    /// Every variant, in bit order.
    const ALL: &'static [Self];

    /// Bit position of this flag (0..32).
    fn bit(self) -> u32;
}

/// Negotiable capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// AES-256-GCM cipher
    CipherAes256,
    /// XSalsa20-Poly1305 cipher
    CipherXSalsa20,
    /// LZO-class fast compression
    CompressLzo,
    /// zlib compression
    CompressZlib,
    /// Default session encapsulation
    EncapDefault,
}

impl Feature {
    /// Cipher features in preference order.
    pub const CIPHERS: [Self; 2] = [Self::CipherAes256, Self::CipherXSalsa20];

    /// Compression features in preference order.
    pub const COMPRESSIONS: [Self; 2] = [Self::CompressZlib, Self::CompressLzo];

    /// Whether this is a cipher feature.
    #[must_use]
    pub fn is_cipher(self) -> bool {
        matches!(self, Self::CipherAes256 | Self::CipherXSalsa20)
    }

    /// Whether this is a compression feature.
    #[must_use]
    pub fn is_compression(self) -> bool {
        matches!(self, Self::CompressLzo | Self::CompressZlib)
    }

    /// The cipher this feature selects, if it is a cipher feature.
    #[must_use]
    pub fn cipher_kind(self) -> Option<CipherKind> {
        match self {
            Self::CipherAes256 => Some(CipherKind::Aes256),
            Self::CipherXSalsa20 => Some(CipherKind::XSalsa20),
            _ => None,
        }
    }

    /// The compression this feature selects, if it is a compression feature.
    #[must_use]
    pub fn compression_kind(self) -> Option<CompressionKind> {
        match self {
            Self::CompressLzo => Some(CompressionKind::Lzo),
            Self::CompressZlib => Some(CompressionKind::Zlib),
            _ => None,
        }
    }
}

impl From<CipherKind> for Feature {
    fn from(kind: CipherKind) -> Self {
        match kind {
            CipherKind::Aes256 => Self::CipherAes256,
            CipherKind::XSalsa20 => Self::CipherXSalsa20,
        }
    }
}

impl From<CompressionKind> for Feature {
    fn from(kind: CompressionKind) -> Self {
        match kind {
            CompressionKind::Lzo => Self::CompressLzo,
            CompressionKind::Zlib => Self::CompressZlib,
        }
    }
}

impl Flag for Feature {
    const ALL: &'static [Self] = &[
        Self::CipherAes256,
        Self::CipherXSalsa20,
        Self::CompressLzo,
        Self::CompressZlib,
        Self::EncapDefault,
    ];

    fn bit(self) -> u32 {
        match self {
            Self::CipherAes256 => 0,
            Self::CipherXSalsa20 => 1,
            Self::CompressLzo => 2,
            Self::CompressZlib => 3,
            Self::EncapDefault => 4,
        }
    }
}

/// Protocol milestones. Monotonic within a connection's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Init sequence completed
    Initiated,
    /// Negotiation completed
    Negotiated,
    /// Authentication completed
    Authenticated,
}

impl Flag for Status {
    const ALL: &'static [Self] = &[Self::Initiated, Self::Negotiated, Self::Authenticated];

    fn bit(self) -> u32 {
        match self {
            Self::Initiated => 0,
            Self::Negotiated => 1,
            Self::Authenticated => 2,
        }
    }
}

/// A set of flags of one kind.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagSet<F: Flag> {
    bits: u32,
    _kind: PhantomData<F>,
}

impl<F: Flag> FlagSet<F> {
    /// Empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bits: 0,
            _kind: PhantomData,
        }
    }

    /// Set containing every variant.
    #[must_use]
    pub fn all() -> Self {
        F::ALL.iter().copied().collect()
    }

    /// Build from raw wire bits, dropping bits with no matching flag.
    #[must_use]
    pub fn from_bits_truncate(bits: u32) -> Self {
        F::ALL
            .iter()
            .copied()
            .filter(|f| bits & (1 << f.bit()) != 0)
            .collect()
    }

    /// Raw bits for the wire.
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Add a flag. Adding a present flag is a no-op.
    pub fn insert(&mut self, flag: F) {
        self.bits |= 1 << flag.bit();
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, flag: F) -> Self {
        self.insert(flag);
        self
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, flag: F) -> bool {
        self.bits & (1 << flag.bit()) != 0
    }

    /// Whether every flag in `other` is also in `self`.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Flags present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            bits: self.bits & other.bits,
            _kind: PhantomData,
        }
    }

    /// Flags present in either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            bits: self.bits | other.bits,
            _kind: PhantomData,
        }
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of flags present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Iterate present flags in bit order.
    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL.iter().copied().filter(|f| self.contains(*f))
    }
}

impl<F: Flag> Default for FlagSet<F> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<F: Flag> FromIterator<F> for FlagSet<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut set = Self::empty();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}

impl<F: Flag> fmt::Debug for FlagSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
