pub mod appointment;
pub mod blood_request;
pub mod enums;
pub mod lab;
pub mod patient;
pub mod prescription;
pub mod staff;
pub mod vitals;

pub use appointment::*;
pub use blood_request::*;
pub use enums::*;
pub use lab::*;
pub use patient::*;
pub use prescription::*;
pub use staff::*;
pub use vitals::*;
