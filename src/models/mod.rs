pub mod enums;
pub mod medication;
pub mod profile;

pub use enums::*;
pub use medication::*;
pub use profile::*;
