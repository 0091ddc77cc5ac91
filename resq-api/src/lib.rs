mod client;
pub use client::*;
mod personnel;
pub use personnel::*;
