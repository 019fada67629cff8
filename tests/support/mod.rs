#![allow(dead_code)]

pub mod chain;
pub mod clock;
pub mod fixtures;
pub mod flow;
pub mod lp;
pub mod wait;
