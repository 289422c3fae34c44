pub mod credentials;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;
