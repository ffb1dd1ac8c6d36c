pub mod message;
pub mod token;

pub use message::{parse_message, ParsedMessage};
pub use token::{extract, extract_from_message};
