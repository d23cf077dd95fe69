//! Frame I/O.
//!
//! [`AmsFrame`] is the I/O-agnostic unit exchanged over an AMS/TCP connection.
//! The [`blocking`] and [`tokio`] submodules provide stream types that read
//! and write frames using `std::io` and `tokio::io` respectively.

pub mod blocking;
mod frame;
pub mod tokio;

pub use frame::{AMS_FRAME_MAX_LEN, AmsFrame};
