pub mod bus;
pub mod controller;
pub mod dmac;
pub mod scsi;
pub mod tickable;
pub mod types;
pub mod wd33c93;
