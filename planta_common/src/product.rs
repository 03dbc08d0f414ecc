//! Product identity.
//!
//! A product id is allocated once by station 0 and is never reused. The
//! shared segment stores ids as raw `u32` with `0` meaning "empty slot", so
//! [`ProductId`] wraps a `NonZeroU32` and `Option<ProductId>` maps one-to-one
//! onto the raw slot value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

use crate::consts::NUM_STATIONS;

/// Identity of a product travelling down the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductId(NonZeroU32);

impl ProductId {
    /// Wrap a raw slot value. Returns `None` for the empty marker `0`.
    #[inline]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Raw value as stored in shared memory.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A product that was inside a station when the line was last stopped.
///
/// Raw integers on purpose: this is the persisted record shape, and values
/// read back from disk are validated by the consumer rather than at parse
/// time, so a single bad entry does not discard the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightProduct {
    /// Product id (`0` is invalid and ignored on restore).
    pub product_id: u32,
    /// Zero-based station index holding the product.
    pub station_index: usize,
}

impl InFlightProduct {
    /// Create a record for `product` held by `station_index`.
    pub const fn new(product: ProductId, station_index: usize) -> Self {
        Self {
            product_id: product.get(),
            station_index,
        }
    }

    /// Validated product id, if the record describes a real product on a
    /// real station.
    pub const fn product(&self) -> Option<ProductId> {
        if self.station_index >= NUM_STATIONS {
            return None;
        }
        ProductId::new(self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_the_empty_marker() {
        assert_eq!(ProductId::new(0), None);
    }

    #[test]
    fn raw_value_survives_wrapping() {
        let id = ProductId::new(42).unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "#42");
    }

    #[test]
    fn in_flight_validation() {
        assert!(InFlightProduct { product_id: 7, station_index: 2 }.product().is_some());
        assert!(InFlightProduct { product_id: 0, station_index: 2 }.product().is_none());
        assert!(
            InFlightProduct { product_id: 7, station_index: NUM_STATIONS }
                .product()
                .is_none()
        );
    }
}
