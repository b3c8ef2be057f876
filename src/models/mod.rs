// src/models/mod.rs

pub mod borrow_request;
pub mod chat;
pub mod message;
pub mod notification;
pub mod resource;
pub mod review;
pub mod user;
