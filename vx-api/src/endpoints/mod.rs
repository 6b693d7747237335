//! Home-server endpoint groups, each adding methods to [`ApiClient`](crate::ApiClient).

pub mod pushers;
