pub mod actions;
pub mod classifier;
pub mod gc;
pub mod monitor;
pub mod process_table;
pub mod recovery;
pub mod registry;
pub mod resolver;
pub mod window_system;

pub use actions::SwallowActions;
pub use classifier::SwallowRules;
pub use gc::GcSweeper;
pub use monitor::EventMonitor;
pub use registry::SwallowRegistry;
pub use window_system::create_backend;
