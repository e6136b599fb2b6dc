// src/algorithms/tests/mod.rs

// Tests for Fixed Window counting
mod fixed_window_tests;
