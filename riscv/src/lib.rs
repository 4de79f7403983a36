//! This crate provides RISC-V specific functions and data structures,
//! and access to various system registers.

#![no_std]
#![warn(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod instructions;
pub mod registers;
