pub mod app;
pub mod scanner;
pub mod cleaner;
pub mod config;
pub mod cli;
pub mod tui;
pub mod utils;

// Re-export commonly used types
pub use scanner::{Scanner, ScanHandle, ScanProgress, VenvEntry};
pub use cleaner::{Cleaner, DeletionProgress, RemovalTool};
pub use config::Config;
