pub mod jetstream;
pub mod local;
