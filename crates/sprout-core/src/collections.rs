//! Hash containers for child diffing and the host surface. `std-hash` swaps
//! `hashbrown` for the standard library maps.

#[cfg(feature = "std-hash")]
pub(crate) mod map {
    pub(crate) use std::collections::{HashMap, HashSet};
}

#[cfg(not(feature = "std-hash"))]
pub(crate) mod map {
    pub(crate) use hashbrown::{HashMap, HashSet};
}
