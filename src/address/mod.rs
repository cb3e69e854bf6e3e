pub mod ip_resolver;
pub mod norm_address;
