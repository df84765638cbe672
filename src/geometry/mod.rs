pub mod distances;
pub mod transforms;
