pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod governance;
pub mod ids;
pub mod trace;

pub use config::*;
pub use error::*;
pub use events::*;
pub use execution::*;
pub use governance::*;
pub use ids::*;
pub use trace::*;
