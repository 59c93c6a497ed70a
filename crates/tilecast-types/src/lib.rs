pub mod event;
pub mod history;
pub mod provider;
pub mod tool;

pub use event::*;
pub use history::*;
pub use provider::*;
pub use tool::*;
