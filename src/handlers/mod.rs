pub mod config;
pub mod transcribe;

pub use self::config::get_config;
pub use self::transcribe::transcribe_upload;
