pub mod dispatch;
pub mod matcher;
pub mod zones;
