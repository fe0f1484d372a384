mod client_details;

pub use client_details::client_details_middleware;
