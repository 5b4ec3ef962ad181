//! Domain types of the token sale and the ports the core consumes.

pub mod coupon;
pub mod currency;
pub mod ledger;
pub mod money;
pub mod ports;
pub mod round;
pub mod wallet;
