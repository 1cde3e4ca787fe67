pub mod bmv2;
pub mod memory;
pub mod pipeconf;
pub mod pure;
pub mod status;
pub mod switch;
