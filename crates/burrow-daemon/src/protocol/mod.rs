pub mod codec;

pub use codec::{read_message, write_message};
