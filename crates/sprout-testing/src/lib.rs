//! Testing utilities and harness for Sprout

pub mod testing;

pub use testing::*;

pub mod prelude {
    pub use crate::testing::*;
}
