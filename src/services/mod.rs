pub mod access_point;
pub mod dhcp;
pub mod mode;
pub mod passphrase;
pub mod profile;
pub mod wait;
pub mod wpa;
