//! Chart formation detectors
//!
//! Each detector is a pipeline over an immutable bar slice: a geometry
//! search (`find`) yielding raw matches, a level calculator pricing entry,
//! stop and target, and a detection-time scorer.
//!
//! # Formations
//!
//! - **Pin bar**: single-bar rejection wick
//! - **Double top / bottom**: two near-equal swing extremes with a neckline
//! - **Head and shoulders**: three swings with a dominant head, both forms
//! - **False breakout**: failed break of a support/resistance level

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
    ($($detector:ty),* $(,)?) => {
        $(impl $detector {
            pub fn with_defaults() -> Self { Self::default() }
        })*
    };
}

pub mod double;
pub mod false_breakout;
pub mod head_and_shoulders;
pub mod pin_bar;

pub use double::*;
pub use false_breakout::*;
pub use head_and_shoulders::*;
pub use pin_bar::*;

impl_with_defaults!(
    PinBarDetector,
    DoubleTopDetector,
    DoubleBottomDetector,
    HeadAndShouldersDetector,
    FalseBreakoutDetector,
);
