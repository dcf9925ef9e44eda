pub mod enums;
pub mod frequency;
pub mod prescription;

pub use enums::*;
pub use frequency::DoseFrequency;
pub use prescription::*;
