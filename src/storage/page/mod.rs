mod directory_page;

pub use directory_page::*;
