// src/algorithms/mod.rs

pub mod fixed_window;

#[cfg(test)]
mod tests;

pub use fixed_window::{window_start, FixedWindow, WindowCount};
