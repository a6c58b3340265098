pub mod domain;
pub mod events;
pub mod printer;
pub mod state;

pub use domain::*;
pub use events::PrinterEvent;
pub use printer::{PrinterDefinition, Settings};
pub use state::*;
