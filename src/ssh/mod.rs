pub mod listener;

pub use listener::{Authorized, Listener};
