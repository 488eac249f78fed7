pub mod check;
pub mod manual;
pub mod secrets;
pub mod sync;
