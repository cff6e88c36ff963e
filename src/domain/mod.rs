pub mod error;
pub mod observation;
pub mod prediction;
pub mod session;
pub mod types;

pub use error::*;
pub use observation::*;
pub use prediction::*;
pub use session::*;
pub use types::*;
