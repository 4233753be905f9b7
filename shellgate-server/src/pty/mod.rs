//! PTY-backed Command Sessions

mod config;
mod handle;
mod session;

pub use config::PtyConfig;
pub use handle::PtyHandle;
pub use session::PtySessionFactory;
