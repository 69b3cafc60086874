//! # Time units

/// KiloHertz
pub type KiloHertz = fugit::KilohertzU32;

/// MegaHertz
pub type MegaHertz = fugit::MegahertzU32;

/// Microseconds
pub type Microseconds = fugit::MicrosDurationU32;
