pub mod comments;
pub mod credential;
pub mod video;
