pub mod browser;
pub mod qr;
pub mod web;
