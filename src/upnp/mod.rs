pub mod device;
pub mod error;
pub mod event;
pub mod gena;
pub mod notify;
pub mod subscription;
