//! Marker model - the ordered checkpoints of a tutorial stage.
//!
//! A stage declares its markers once with [`markers!`](crate::markers). The
//! declaration order is the ordinal order, and every comparison between two
//! markers is a comparison of their ordinals.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

/// Error type for marker lookups.
pub type Result<T> = std::result::Result<T, MarkerError>;

/// Errors raised when a marker is referenced outside its declared sequence.
///
/// These indicate an authoring or programming error and are never clamped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    /// Ordinal outside `0..len`
    #[error("marker ordinal {ordinal} is out of range for `{sequence}` ({len} markers)")]
    OutOfRange {
        /// Requested ordinal
        ordinal: usize,
        /// Number of declared markers
        len: usize,
        /// Sequence type name
        sequence: &'static str,
    },

    /// Name not declared in the sequence
    #[error("`{name}` is not a marker of `{sequence}`")]
    UnknownName {
        /// Requested name
        name: String,
        /// Sequence type name
        sequence: &'static str,
    },
}

/// A checkpoint in a stage.
///
/// Implemented by [`markers!`](crate::markers); implementing it by hand is
/// possible but `SEQUENCE` must list every variant in ordinal order.
pub trait Marker:
    Copy + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + 'static
{
    /// Every marker, in order.
    const SEQUENCE: &'static [Self];

    /// Short type name used in errors and logs.
    const SEQUENCE_NAME: &'static str;

    /// Position in [`Marker::SEQUENCE`].
    fn ordinal(self) -> usize;

    /// Unique name.
    fn name(self) -> &'static str;
}

/// Lookups and range queries over a marker sequence.
///
/// All functions are associated; the type only carries `M`.
pub struct MarkerSequence<M>(PhantomData<M>);

impl<M: Marker> MarkerSequence<M> {
    /// Number of declared markers.
    pub fn len() -> usize {
        M::SEQUENCE.len()
    }

    /// Ordinal of `m`.
    pub fn ordinal(m: M) -> usize {
        m.ordinal()
    }

    /// Marker at `ordinal`.
    pub fn from_ordinal(ordinal: usize) -> Result<M> {
        M::SEQUENCE
            .get(ordinal)
            .copied()
            .ok_or(MarkerError::OutOfRange {
                ordinal,
                len: M::SEQUENCE.len(),
                sequence: M::SEQUENCE_NAME,
            })
    }

    /// Marker called `name`.
    pub fn from_name(name: &str) -> Result<M> {
        M::SEQUENCE
            .iter()
            .copied()
            .find(|m| m.name() == name)
            .ok_or_else(|| MarkerError::UnknownName {
                name: name.to_string(),
                sequence: M::SEQUENCE_NAME,
            })
    }

    /// First marker.
    pub fn first() -> M {
        M::SEQUENCE[0]
    }

    /// Last marker.
    pub fn last() -> M {
        M::SEQUENCE[M::SEQUENCE.len() - 1]
    }

    /// The marker after `m`, if any.
    pub fn next(m: M) -> Option<M> {
        M::SEQUENCE.get(m.ordinal() + 1).copied()
    }

    /// The marker before `m`, if any.
    pub fn previous(m: M) -> Option<M> {
        m.ordinal().checked_sub(1).map(|i| M::SEQUENCE[i])
    }

    /// Whether `m` is `target`.
    pub fn is_current(m: M, target: M) -> bool {
        m == target
    }

    /// Whether `m` lies between `lo` and `hi`.
    pub fn between(m: M, lo: M, hi: M, inclusive_lo: bool, inclusive_hi: bool) -> bool {
        let above = if inclusive_lo { m >= lo } else { m > lo };
        let below = if inclusive_hi { m <= hi } else { m < hi };
        above && below
    }

    /// [`MarkerSequence::between`] with both ends included.
    pub fn between_inclusive(m: M, lo: M, hi: M) -> bool {
        Self::between(m, lo, hi, true, true)
    }

    /// Whether `m` is `target` or later.
    pub fn at_or_after(m: M, target: M) -> bool {
        m >= target
    }

    /// All markers in order.
    pub fn iter() -> impl Iterator<Item = M> {
        M::SEQUENCE.iter().copied()
    }

    /// Markers from `lo` to `hi`, both included. Empty when `lo > hi`.
    pub fn range(lo: M, hi: M) -> impl Iterator<Item = M> {
        let end = if lo > hi { lo.ordinal() } else { hi.ordinal() + 1 };
        M::SEQUENCE[lo.ordinal()..end].iter().copied()
    }
}

/// Serialize a marker as its ordinal.
pub fn serialize_marker<M: Marker, S: Serializer>(
    marker: &M,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(marker.ordinal() as u64)
}

/// Deserialize a marker from its ordinal or its name.
pub fn deserialize_marker<'de, M: Marker, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<M, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Ordinal(u64),
        Name(String),
    }

    let marker = match Repr::deserialize(deserializer)? {
        Repr::Ordinal(n) => MarkerSequence::<M>::from_ordinal(n as usize),
        Repr::Name(name) => MarkerSequence::<M>::from_name(&name),
    };
    marker.map_err(de::Error::custom)
}

/// Declare a stage's marker sequence.
///
/// ```
/// datastory_core::markers! {
///     /// Checkpoints of a tiny stage.
///     pub enum Step {
///         Intro = "intro",
///         Measure = "measure",
///         Done = "done",
///     }
/// }
///
/// use datastory_core::{Marker, MarkerSequence};
/// assert_eq!(Step::Measure.ordinal(), 1);
/// assert_eq!(MarkerSequence::<Step>::last(), Step::Done);
/// ```
#[macro_export]
macro_rules! markers {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $crate::Marker for $name {
            const SEQUENCE: &'static [Self] = &[$($name::$variant),+];
            const SEQUENCE_NAME: &'static str = stringify!($name);

            fn ordinal(self) -> usize {
                self as usize
            }

            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::Marker::name(*self))
            }
        }

        impl $crate::__serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: $crate::__serde::Serializer,
            {
                $crate::marker::serialize_marker(self, serializer)
            }
        }

        impl<'de> $crate::__serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: $crate::__serde::Deserializer<'de>,
            {
                $crate::marker::deserialize_marker(deserializer)
            }
        }
    };
}
