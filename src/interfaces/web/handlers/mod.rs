pub mod chat;
pub mod credentials;
pub mod modules;
pub mod oauth;
pub mod threads;
pub mod tokens;
pub mod workflows;
