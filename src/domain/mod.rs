pub mod mail;
pub mod settings;
pub mod unread;
