//! HTTP request handlers.

pub mod admin;
pub mod info;
pub mod nodes;
pub mod preauth;

pub use admin::*;
pub use info::*;
pub use nodes::*;
pub use preauth::*;
