// Export modules for use in tests and the binary
pub mod panic_handler;
pub mod render;
pub mod settings;

// Re-export main provider components
pub use render::{ImmediateImage, PageProvider, PageSource, RequesterHost, RequesterId, Scale};
pub use settings::RenderSettings;
