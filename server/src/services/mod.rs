pub mod capabilities;
pub mod throttle;
pub mod timeline;
