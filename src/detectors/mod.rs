//! Pattern and gap detectors
//!
//! Detection runs in three passes, each a pure function of its inputs:
//!
//! - **Exhaustion**: two completed daily bars where C2 runs beyond C1 and
//!   closes back inside its body.
//! - **Structural gap pass**: three-candle fair value gaps on the pattern day's
//!   intraday series that nothing after the triplet has traded back into.
//! - **Projection pass**: a reaction level from earlier in the day that was
//!   respected until the gap formed.

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod exhaustion;
pub mod fvg;

// Re-export all detectors for convenience
pub use exhaustion::*;
pub use fvg::*;
pub use helpers::*;
