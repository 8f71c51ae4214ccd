mod address;

pub use address::ServiceAddress;
