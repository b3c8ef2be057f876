// src/handlers/mod.rs

pub mod auth;
pub mod borrow_requests;
pub mod chats;
pub mod notifications;
pub mod resources;
pub mod reviews;
pub mod users;
