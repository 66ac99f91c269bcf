pub mod controller;
pub mod fetcher;
pub mod pool;
pub mod site;
pub mod task;
pub mod walker;

#[cfg(test)]
pub mod testing;
