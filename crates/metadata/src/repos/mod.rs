//! Repository traits for metadata operations.

pub mod archives;
pub mod bootstrap;
pub mod nodes;
pub mod tokens;

pub use archives::{ArchiveRepo, ExpirySweep};
pub use bootstrap::BootstrapRepo;
pub use nodes::NodeRepo;
pub use tokens::TokenRepo;
