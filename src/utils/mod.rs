// src/utils/mod.rs

pub mod envelope;
pub mod hash;
pub mod html;
pub mod jwt;
