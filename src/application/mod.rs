pub mod dispatcher;
pub mod services;
pub mod trigger;
pub mod usecases;
