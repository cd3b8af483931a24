//! WindowSystem service: responsibility and boundaries
//!
//! This module and its submodules are responsible ONLY for talking to the window
//! manager: querying window metadata, emitting lifecycle WindowEvent(s) and
//! executing placement commands. It MUST NOT decide whether a window should be
//! swallowed; that belongs to the classifier and the EventMonitor.

pub mod dry_run;
mod hyprland;
mod sway;
mod window_system;
mod r#trait;

pub use self::r#trait::WindowSystem;
pub use self::window_system::create_backend;
