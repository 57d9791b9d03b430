pub mod events;
pub mod lot_size;
pub mod models;
pub mod symbol;
pub mod traits;

pub use events::*;
pub use lot_size::*;
pub use models::*;
pub use symbol::*;
pub use traits::*;
