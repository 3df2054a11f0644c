pub mod exercise;
pub mod net;
pub mod room;
