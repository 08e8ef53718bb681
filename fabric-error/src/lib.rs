//! Ошибки транспортного и маршрутизирующего ядра фабрики.

pub mod ext;
pub mod status_code;
pub mod types;

pub use ext::*;
pub use status_code::*;
pub use types::*;
