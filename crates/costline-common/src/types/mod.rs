pub mod billing;
pub mod line_item;
pub mod response;
pub mod usage;
pub mod window;
