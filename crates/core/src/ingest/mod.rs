pub mod error;
pub mod loader;
pub mod normalize;
pub mod provider;
pub mod retry;
