pub mod category;
pub mod codec;
pub mod config;
pub mod export;
pub mod import;
pub mod store;
pub mod table;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_support;
