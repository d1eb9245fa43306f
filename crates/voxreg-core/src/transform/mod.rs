pub mod init;
pub mod io;
pub mod linear;
pub mod model;
