//! Drives a third-party mockup editor through synthetic input events: clear
//! it, hand it one or two screenshots, set the frame to 16:9 and leave it on
//! the Mockup tab.

pub mod config;
pub mod dom;
pub mod face;
pub mod hands;
pub mod page;
pub mod payload;
pub mod poll;
pub mod sequencer;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;
