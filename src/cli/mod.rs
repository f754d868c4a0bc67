pub mod check;
pub mod simulate;
pub mod status;
