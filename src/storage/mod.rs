pub mod cursor;
pub mod images;
pub mod queue;
