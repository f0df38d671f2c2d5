pub mod disposables;
pub mod keep;
#[cfg(feature = "tokio")]
pub mod wait;

pub use disposables::*;
pub use keep::*;
#[cfg(feature = "tokio")]
pub use wait::*;
