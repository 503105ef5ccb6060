//! Wire clients for the secondary anime catalog and the stream backend.

pub mod anilist;
pub mod backend;
pub mod retry;
pub mod traits;

pub use retry::{RetryPolicy, Transient};
