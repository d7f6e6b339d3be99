pub mod assemble;
pub mod calibration;
pub mod matcher;
pub mod piecewise;
pub mod pulses;
pub mod regression;
pub mod report;
pub mod segments;
