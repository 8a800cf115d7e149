//! Mail helpers shared by the normalizer and reply composition.

pub mod address;
pub mod text;

pub use address::bare_address;
pub use text::{render_html, strip_html, strip_quoted_text};
