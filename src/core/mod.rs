pub mod mapping;
pub mod streamline;
pub mod volume;
