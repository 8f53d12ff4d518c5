pub mod fs;

pub use fs::{find_files, relative_files, to_slash_path};
