//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `AudioFocusManager` that always grants focus (desktop mixers share output)
//!
//! The media player itself is always supplied by the host application.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopAudioFocus, ReqwestHttpClient, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let fs = TokioFileSystem::new();
//!     let focus = DesktopAudioFocus::new();
//!
//!     // Use in core configuration
//! }
//! ```

mod audio_focus;
mod filesystem;
mod http;

pub use audio_focus::DesktopAudioFocus;
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
