pub mod linear;
pub mod syn;
