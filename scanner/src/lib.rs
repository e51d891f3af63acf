pub mod capture;
pub mod client;
pub mod controller;
pub mod overlay;
pub mod source;
pub mod ui;
