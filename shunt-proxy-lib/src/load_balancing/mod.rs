pub mod random;

pub use random::{draw, pick, pick_index};
