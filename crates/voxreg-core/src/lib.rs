pub mod consts;
pub mod error;
pub mod volume;
pub mod interp;
pub mod filters;
pub mod transform;
pub mod metric;
pub mod warp;
pub mod registration;
pub mod reorient;
