pub mod json_placeholder;

pub use json_placeholder::{JsonPlaceholderClient, JsonPlaceholderUser};
