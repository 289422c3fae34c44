pub mod client;
pub mod connector;

#[cfg(test)]
pub(crate) mod test_server;
