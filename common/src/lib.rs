#![no_std]

//! Wire vocabulary shared by the host link and the controller firmware.

pub mod physical;
pub mod protocol;
