//! Reverse proxy: listeners, routing and forwarding

mod response;
mod router;
mod server;

pub use router::{Router, Scheme};
pub use server::{BoundAddresses, RouterServer};
