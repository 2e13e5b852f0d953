pub mod list;
pub mod record;
pub mod view;
