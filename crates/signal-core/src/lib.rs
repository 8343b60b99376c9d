pub mod error;
pub mod params;
pub mod stats;
pub mod timestamp;
pub mod traits;
pub mod types;

pub use error::*;
pub use params::*;
pub use traits::*;
pub use types::*;
